use crate::application_port::*;
use crate::domain_port::UserEventPayload;
use crate::server::{EventHandler, HandleError, QueueMessage};
use anyhow::anyhow;
use std::sync::Arc;

/// Grants a fixed role to the user named in the event. Re-delivery is harmless
/// because role assignment is an upsert.
pub struct RoleAssignmentHandler {
    rbac: Arc<dyn RbacService>,
    role_name: String,
}

impl RoleAssignmentHandler {
    pub fn new(rbac: Arc<dyn RbacService>, role_name: &str) -> Self {
        Self {
            rbac,
            role_name: role_name.to_owned(),
        }
    }
}

#[async_trait::async_trait]
impl EventHandler for RoleAssignmentHandler {
    async fn handle(&self, message: &QueueMessage) -> Result<(), HandleError> {
        let payload: UserEventPayload = serde_json::from_slice(&message.payload)
            .map_err(|e| HandleError::Malformed(e.to_string()))?;

        let role = self
            .rbac
            .get_role_by_name(&self.role_name)
            .await
            .map_err(|e| anyhow!("looking up role '{}': {}", self.role_name, e))?;

        self.rbac
            .assign_roles_to_user(payload.user_id, &[role.id])
            .await
            .map_err(|e| anyhow!("assigning role '{}': {}", self.role_name, e))?;

        tracing::info!(
            user_id = %payload.user_id,
            role = %self.role_name,
            event_id = %message.event_id,
            "role assigned from event"
        );
        Ok(())
    }
}
