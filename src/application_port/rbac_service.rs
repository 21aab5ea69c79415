use crate::domain_model::*;
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum RbacError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("store error: {0}")]
    Store(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionGrant {
    pub permission_id: PermissionId,
    #[serde(default)]
    pub granter_id: Option<UserId>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait::async_trait]
pub trait RbacService: Send + Sync {
    async fn create_role(&self, name: &str) -> Result<Role, RbacError>;
    async fn get_role(&self, role_id: RoleId) -> Result<Role, RbacError>;
    async fn get_role_by_name(&self, name: &str) -> Result<Role, RbacError>;
    async fn list_roles(&self) -> Result<Vec<Role>, RbacError>;
    async fn update_role(&self, role_id: RoleId, name: &str) -> Result<Role, RbacError>;
    async fn delete_role(&self, role_id: RoleId) -> Result<Role, RbacError>;

    async fn create_permission(&self, name: &str) -> Result<Permission, RbacError>;
    async fn get_permission_by_name(&self, name: &str) -> Result<Permission, RbacError>;
    async fn list_permissions(&self) -> Result<Vec<Permission>, RbacError>;
    async fn delete_permission(&self, permission_id: PermissionId)
    -> Result<Permission, RbacError>;

    async fn assign_roles_to_user(
        &self,
        user_id: UserId,
        role_ids: &[RoleId],
    ) -> Result<Vec<UserRole>, RbacError>;

    async fn assign_permissions_to_user(
        &self,
        user_id: UserId,
        grants: &[PermissionGrant],
    ) -> Result<Vec<UserPermission>, RbacError>;

    async fn assign_permissions_to_role(
        &self,
        role_id: RoleId,
        permission_ids: &[PermissionId],
    ) -> Result<Vec<RolePermission>, RbacError>;

    async fn remove_role_from_user(
        &self,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<UserRole, RbacError>;

    async fn remove_permission_from_user(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
    ) -> Result<UserPermission, RbacError>;

    async fn remove_permission_from_role(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> Result<RolePermission, RbacError>;

    async fn list_roles_for_user(&self, user_id: UserId) -> Result<Vec<Role>, RbacError>;

    /// Direct unexpired grants plus everything granted through the user's roles.
    async fn list_permissions_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Permission>, RbacError>;

    async fn list_permissions_for_role(
        &self,
        role_id: RoleId,
    ) -> Result<Vec<Permission>, RbacError>;

    async fn list_users_for_role(&self, role_id: RoleId) -> Result<Vec<UserId>, RbacError>;

    async fn list_users_for_permission(
        &self,
        permission_id: PermissionId,
    ) -> Result<Vec<UserId>, RbacError>;

    async fn list_roles_for_permission(
        &self,
        permission_id: PermissionId,
    ) -> Result<Vec<Role>, RbacError>;

    /// Creates the built-in roles and permissions. Safe to run on every start.
    async fn seed(&self) -> Result<(), RbacError>;
}
