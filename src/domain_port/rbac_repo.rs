use crate::application_port::RbacError;
use crate::domain_model::*;
use crate::domain_port::repo_tx::StorageTx;
use chrono::{DateTime, Utc};

/// All lookups see active (not soft-deleted) rows only.
#[async_trait::async_trait]
pub trait RoleRepo: Send + Sync {
    /// Fails with `AlreadyExists` when an active role has the same name.
    async fn create_in_tx(&self, tx: &mut dyn StorageTx, role: &Role) -> Result<(), RbacError>;

    async fn get_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        role_id: RoleId,
    ) -> Result<Option<Role>, RbacError>;

    async fn get_by_name_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        name: &str,
    ) -> Result<Option<Role>, RbacError>;

    async fn get(&self, role_id: RoleId) -> Result<Option<Role>, RbacError>;

    async fn get_by_name(&self, name: &str) -> Result<Option<Role>, RbacError>;

    async fn list(&self) -> Result<Vec<Role>, RbacError>;

    async fn rename(&self, role_id: RoleId, name: &str) -> Result<Option<Role>, RbacError>;

    async fn soft_delete(
        &self,
        role_id: RoleId,
        now: DateTime<Utc>,
    ) -> Result<Option<Role>, RbacError>;
}

#[async_trait::async_trait]
pub trait PermissionRepo: Send + Sync {
    async fn create_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        permission: &Permission,
    ) -> Result<(), RbacError>;

    async fn get_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        permission_id: PermissionId,
    ) -> Result<Option<Permission>, RbacError>;

    async fn get_by_name_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        name: &str,
    ) -> Result<Option<Permission>, RbacError>;

    async fn get(&self, permission_id: PermissionId) -> Result<Option<Permission>, RbacError>;

    async fn get_by_name(&self, name: &str) -> Result<Option<Permission>, RbacError>;

    async fn list(&self) -> Result<Vec<Permission>, RbacError>;

    async fn soft_delete(
        &self,
        permission_id: PermissionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Permission>, RbacError>;
}

/// The three join relations. Upserts revive soft-deleted pairs; removals soft-delete
/// and return the removed row, or `None` if no active pair existed.
#[async_trait::async_trait]
pub trait AssignmentRepo: Send + Sync {
    async fn upsert_user_role_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        user_id: UserId,
        role_id: RoleId,
        now: DateTime<Utc>,
    ) -> Result<UserRole, RbacError>;

    async fn upsert_user_permission_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        grant: &UserPermission,
    ) -> Result<UserPermission, RbacError>;

    async fn upsert_role_permission_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        role_id: RoleId,
        permission_id: PermissionId,
        now: DateTime<Utc>,
    ) -> Result<RolePermission, RbacError>;

    async fn remove_user_role(
        &self,
        user_id: UserId,
        role_id: RoleId,
        now: DateTime<Utc>,
    ) -> Result<Option<UserRole>, RbacError>;

    async fn remove_user_permission(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
        now: DateTime<Utc>,
    ) -> Result<Option<UserPermission>, RbacError>;

    async fn remove_role_permission(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
        now: DateTime<Utc>,
    ) -> Result<Option<RolePermission>, RbacError>;

    async fn roles_for_user(&self, user_id: UserId) -> Result<Vec<Role>, RbacError>;

    /// Direct grants that have not expired at `now`.
    async fn direct_permissions_for_user(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Permission>, RbacError>;

    /// Permissions reachable through the user's active roles.
    async fn role_permissions_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Permission>, RbacError>;

    async fn permissions_for_role(&self, role_id: RoleId) -> Result<Vec<Permission>, RbacError>;

    async fn users_for_role(&self, role_id: RoleId) -> Result<Vec<UserId>, RbacError>;

    async fn users_for_permission(
        &self,
        permission_id: PermissionId,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserId>, RbacError>;

    async fn roles_for_permission(
        &self,
        permission_id: PermissionId,
    ) -> Result<Vec<Role>, RbacError>;
}
