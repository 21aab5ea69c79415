use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct RbacRepos {
    pub roles: Arc<dyn RoleRepo>,
    pub permissions: Arc<dyn PermissionRepo>,
    pub assignments: Arc<dyn AssignmentRepo>,
    pub tx_manager: Arc<dyn TxManager>,
}

pub struct RealRbacService {
    repos: RbacRepos,
}

impl RealRbacService {
    pub fn new(repos: RbacRepos) -> Self {
        Self { repos }
    }

    async fn begin(&self) -> Result<Box<dyn StorageTx>, RbacError> {
        self.repos
            .tx_manager
            .begin()
            .await
            .map_err(|e| RbacError::Store(e.to_string()))
    }

    async fn role_or_not_found(&self, role_id: RoleId) -> Result<Role, RbacError> {
        self.repos
            .roles
            .get(role_id)
            .await?
            .ok_or_else(|| RbacError::NotFound(format!("role {}", role_id)))
    }

    async fn permission_or_not_found(
        &self,
        permission_id: PermissionId,
    ) -> Result<Permission, RbacError> {
        self.repos
            .permissions
            .get(permission_id)
            .await?
            .ok_or_else(|| RbacError::NotFound(format!("permission {}", permission_id)))
    }
}

/// Role and permission names are free text but must never be confused with ids.
pub fn validate_name(kind: &str, name: &str) -> Result<String, RbacError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RbacError::InvalidArgument(format!("{} name is required", kind)));
    }
    if looks_like_uuid(name) {
        return Err(RbacError::InvalidArgument(format!(
            "{} name must not be a UUID",
            kind
        )));
    }
    Ok(name.to_owned())
}

async fn commit(tx: Box<dyn StorageTx>) -> Result<(), RbacError> {
    tx.commit()
        .await
        .map_err(|e| RbacError::Store(e.to_string()))
}

async fn rollback(tx: Box<dyn StorageTx>) -> Result<(), RbacError> {
    tx.rollback()
        .await
        .map_err(|e| RbacError::Store(e.to_string()))
}

#[async_trait::async_trait]
impl RbacService for RealRbacService {
    async fn create_role(&self, name: &str) -> Result<Role, RbacError> {
        let name = validate_name("role", name)?;
        let role = Role::new(&name, false);

        let mut tx = self.begin().await?;
        self.repos.roles.create_in_tx(tx.as_mut(), &role).await?;
        commit(tx).await?;

        info!(role_id = %role.id, name = %role.name, "role created");
        Ok(role)
    }

    async fn get_role(&self, role_id: RoleId) -> Result<Role, RbacError> {
        self.role_or_not_found(role_id).await
    }

    async fn get_role_by_name(&self, name: &str) -> Result<Role, RbacError> {
        let name = validate_name("role", name)?;
        self.repos
            .roles
            .get_by_name(&name)
            .await?
            .ok_or_else(|| RbacError::NotFound(format!("role '{}'", name)))
    }

    async fn list_roles(&self) -> Result<Vec<Role>, RbacError> {
        self.repos.roles.list().await
    }

    async fn update_role(&self, role_id: RoleId, name: &str) -> Result<Role, RbacError> {
        let name = validate_name("role", name)?;
        let current = self.role_or_not_found(role_id).await?;
        if current.built_in && current.name != name {
            return Err(RbacError::InvalidArgument(format!(
                "built-in role '{}' cannot be renamed",
                current.name
            )));
        }
        let role = self
            .repos
            .roles
            .rename(role_id, &name)
            .await?
            .ok_or_else(|| RbacError::NotFound(format!("role {}", role_id)))?;
        info!(role_id = %role.id, name = %role.name, "role updated");
        Ok(role)
    }

    async fn delete_role(&self, role_id: RoleId) -> Result<Role, RbacError> {
        let current = self.role_or_not_found(role_id).await?;
        if current.built_in {
            return Err(RbacError::InvalidArgument(format!(
                "built-in role '{}' cannot be deleted",
                current.name
            )));
        }
        let role = self
            .repos
            .roles
            .soft_delete(role_id, Utc::now())
            .await?
            .ok_or_else(|| RbacError::NotFound(format!("role {}", role_id)))?;
        info!(role_id = %role.id, "role deleted");
        Ok(role)
    }

    async fn create_permission(&self, name: &str) -> Result<Permission, RbacError> {
        let name = validate_name("permission", name)?;
        let permission = Permission::new(&name);

        let mut tx = self.begin().await?;
        self.repos
            .permissions
            .create_in_tx(tx.as_mut(), &permission)
            .await?;
        commit(tx).await?;

        info!(permission_id = %permission.id, name = %permission.name, "permission created");
        Ok(permission)
    }

    async fn get_permission_by_name(&self, name: &str) -> Result<Permission, RbacError> {
        let name = validate_name("permission", name)?;
        self.repos
            .permissions
            .get_by_name(&name)
            .await?
            .ok_or_else(|| RbacError::NotFound(format!("permission '{}'", name)))
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, RbacError> {
        self.repos.permissions.list().await
    }

    async fn delete_permission(
        &self,
        permission_id: PermissionId,
    ) -> Result<Permission, RbacError> {
        let permission = self
            .repos
            .permissions
            .soft_delete(permission_id, Utc::now())
            .await?
            .ok_or_else(|| RbacError::NotFound(format!("permission {}", permission_id)))?;
        info!(permission_id = %permission.id, "permission deleted");
        Ok(permission)
    }

    async fn assign_roles_to_user(
        &self,
        user_id: UserId,
        role_ids: &[RoleId],
    ) -> Result<Vec<UserRole>, RbacError> {
        let now = Utc::now();
        let mut tx = self.begin().await?;
        let mut assigned = Vec::with_capacity(role_ids.len());

        for &role_id in role_ids {
            if self.repos.roles.get_in_tx(tx.as_mut(), role_id).await?.is_none() {
                rollback(tx).await?;
                return Err(RbacError::NotFound(format!("role {}", role_id)));
            }
            let row = self
                .repos
                .assignments
                .upsert_user_role_in_tx(tx.as_mut(), user_id, role_id, now)
                .await?;
            assigned.push(row);
        }

        commit(tx).await?;
        info!(%user_id, count = assigned.len(), "roles assigned to user");
        Ok(assigned)
    }

    async fn assign_permissions_to_user(
        &self,
        user_id: UserId,
        grants: &[PermissionGrant],
    ) -> Result<Vec<UserPermission>, RbacError> {
        let now = Utc::now();
        let mut tx = self.begin().await?;
        let mut assigned = Vec::with_capacity(grants.len());

        for grant in grants {
            let exists = self
                .repos
                .permissions
                .get_in_tx(tx.as_mut(), grant.permission_id)
                .await?
                .is_some();
            if !exists {
                rollback(tx).await?;
                return Err(RbacError::NotFound(format!(
                    "permission {}",
                    grant.permission_id
                )));
            }
            let row = UserPermission {
                user_id,
                permission_id: grant.permission_id,
                granter_id: grant.granter_id,
                expires_at: grant.expires_at,
                created_at: now,
                deleted_at: None,
            };
            let row = self
                .repos
                .assignments
                .upsert_user_permission_in_tx(tx.as_mut(), &row)
                .await?;
            assigned.push(row);
        }

        commit(tx).await?;
        info!(%user_id, count = assigned.len(), "permissions assigned to user");
        Ok(assigned)
    }

    async fn assign_permissions_to_role(
        &self,
        role_id: RoleId,
        permission_ids: &[PermissionId],
    ) -> Result<Vec<RolePermission>, RbacError> {
        let now = Utc::now();
        let mut tx = self.begin().await?;

        if self.repos.roles.get_in_tx(tx.as_mut(), role_id).await?.is_none() {
            rollback(tx).await?;
            return Err(RbacError::NotFound(format!("role {}", role_id)));
        }

        let mut assigned = Vec::with_capacity(permission_ids.len());
        for &permission_id in permission_ids {
            let exists = self
                .repos
                .permissions
                .get_in_tx(tx.as_mut(), permission_id)
                .await?
                .is_some();
            if !exists {
                rollback(tx).await?;
                return Err(RbacError::NotFound(format!("permission {}", permission_id)));
            }
            let row = self
                .repos
                .assignments
                .upsert_role_permission_in_tx(tx.as_mut(), role_id, permission_id, now)
                .await?;
            assigned.push(row);
        }

        commit(tx).await?;
        info!(%role_id, count = assigned.len(), "permissions assigned to role");
        Ok(assigned)
    }

    async fn remove_role_from_user(
        &self,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<UserRole, RbacError> {
        self.repos
            .assignments
            .remove_user_role(user_id, role_id, Utc::now())
            .await?
            .ok_or_else(|| RbacError::NotFound(format!("role {} for user {}", role_id, user_id)))
    }

    async fn remove_permission_from_user(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
    ) -> Result<UserPermission, RbacError> {
        self.repos
            .assignments
            .remove_user_permission(user_id, permission_id, Utc::now())
            .await?
            .ok_or_else(|| {
                RbacError::NotFound(format!("permission {} for user {}", permission_id, user_id))
            })
    }

    async fn remove_permission_from_role(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> Result<RolePermission, RbacError> {
        self.repos
            .assignments
            .remove_role_permission(role_id, permission_id, Utc::now())
            .await?
            .ok_or_else(|| {
                RbacError::NotFound(format!("permission {} for role {}", permission_id, role_id))
            })
    }

    async fn list_roles_for_user(&self, user_id: UserId) -> Result<Vec<Role>, RbacError> {
        self.repos.assignments.roles_for_user(user_id).await
    }

    async fn list_permissions_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Permission>, RbacError> {
        let direct = self
            .repos
            .assignments
            .direct_permissions_for_user(user_id, Utc::now())
            .await?;
        let via_roles = self
            .repos
            .assignments
            .role_permissions_for_user(user_id)
            .await?;

        let merged: BTreeMap<String, Permission> = direct
            .into_iter()
            .chain(via_roles)
            .map(|p| (p.name.clone(), p))
            .collect();
        Ok(merged.into_values().collect())
    }

    async fn list_permissions_for_role(
        &self,
        role_id: RoleId,
    ) -> Result<Vec<Permission>, RbacError> {
        self.role_or_not_found(role_id).await?;
        self.repos.assignments.permissions_for_role(role_id).await
    }

    async fn list_users_for_role(&self, role_id: RoleId) -> Result<Vec<UserId>, RbacError> {
        self.role_or_not_found(role_id).await?;
        self.repos.assignments.users_for_role(role_id).await
    }

    async fn list_users_for_permission(
        &self,
        permission_id: PermissionId,
    ) -> Result<Vec<UserId>, RbacError> {
        self.permission_or_not_found(permission_id).await?;
        self.repos
            .assignments
            .users_for_permission(permission_id, Utc::now())
            .await
    }

    async fn list_roles_for_permission(
        &self,
        permission_id: PermissionId,
    ) -> Result<Vec<Role>, RbacError> {
        self.permission_or_not_found(permission_id).await?;
        self.repos
            .assignments
            .roles_for_permission(permission_id)
            .await
    }

    async fn seed(&self) -> Result<(), RbacError> {
        let now = Utc::now();
        let mut tx = self.begin().await?;
        let mut permission_ids = BTreeMap::new();

        for &name in BUILT_IN_PERMISSIONS {
            let permission = match self
                .repos
                .permissions
                .get_by_name_in_tx(tx.as_mut(), name)
                .await?
            {
                Some(p) => p,
                None => {
                    let p = Permission::new(name);
                    self.repos
                        .permissions
                        .create_in_tx(tx.as_mut(), &p)
                        .await?;
                    debug!(name, "seeded permission");
                    p
                }
            };
            permission_ids.insert(name, permission.id);
        }

        for &(role_name, granted) in BUILT_IN_ROLES {
            let role = match self
                .repos
                .roles
                .get_by_name_in_tx(tx.as_mut(), role_name)
                .await?
            {
                Some(r) => r,
                None => {
                    let r = Role::new(role_name, true);
                    self.repos.roles.create_in_tx(tx.as_mut(), &r).await?;
                    debug!(name = role_name, "seeded role");
                    r
                }
            };
            for perm_name in granted {
                if let Some(&permission_id) = permission_ids.get(perm_name) {
                    self.repos
                        .assignments
                        .upsert_role_permission_in_tx(tx.as_mut(), role.id, permission_id, now)
                        .await?;
                }
            }
        }

        commit(tx).await?;
        info!("built-in roles and permissions seeded");
        Ok(())
    }
}
