use crate::domain_model::UserId;

/// Read-only view of a subject's current grants, consulted whenever tokens are minted.
#[async_trait::async_trait]
pub trait RbacQuery: Send + Sync {
    async fn list_roles_for_user(&self, user_id: UserId) -> anyhow::Result<Vec<String>>;
    async fn list_permissions_for_user(&self, user_id: UserId) -> anyhow::Result<Vec<String>>;
}
