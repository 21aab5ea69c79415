use super::db::{MemoryDb, MemoryTables, downcast};
use crate::application_port::RbacError;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

fn store_err(e: anyhow::Error) -> RbacError {
    RbacError::Store(e.to_string())
}

fn active_role(t: &MemoryTables, id: RoleId) -> Option<Role> {
    t.roles.get(&id).filter(|r| r.deleted_at.is_none()).cloned()
}

fn active_role_by_name(t: &MemoryTables, name: &str) -> Option<Role> {
    t.roles
        .values()
        .find(|r| r.deleted_at.is_none() && r.name == name)
        .cloned()
}

fn active_permission(t: &MemoryTables, id: PermissionId) -> Option<Permission> {
    t.permissions
        .get(&id)
        .filter(|p| p.deleted_at.is_none())
        .cloned()
}

fn active_permission_by_name(t: &MemoryTables, name: &str) -> Option<Permission> {
    t.permissions
        .values()
        .find(|p| p.deleted_at.is_none() && p.name == name)
        .cloned()
}

fn sorted_by_name<T>(mut items: Vec<T>, name: impl Fn(&T) -> &str) -> Vec<T> {
    items.sort_by(|a, b| name(a).cmp(name(b)));
    items
}

pub struct MemoryRoleRepo {
    db: MemoryDb,
}

impl MemoryRoleRepo {
    pub fn new(db: MemoryDb) -> Self {
        MemoryRoleRepo { db }
    }
}

#[async_trait::async_trait]
impl RoleRepo for MemoryRoleRepo {
    async fn create_in_tx(&self, tx: &mut dyn StorageTx, role: &Role) -> Result<(), RbacError> {
        let t = downcast(tx).map_err(store_err)?;
        if active_role_by_name(t, &role.name).is_some() {
            return Err(RbacError::AlreadyExists(format!("role '{}'", role.name)));
        }
        t.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn get_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        role_id: RoleId,
    ) -> Result<Option<Role>, RbacError> {
        let t = downcast(tx).map_err(store_err)?;
        Ok(active_role(t, role_id))
    }

    async fn get_by_name_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        name: &str,
    ) -> Result<Option<Role>, RbacError> {
        let t = downcast(tx).map_err(store_err)?;
        Ok(active_role_by_name(t, name))
    }

    async fn get(&self, role_id: RoleId) -> Result<Option<Role>, RbacError> {
        Ok(self.db.read(|t| active_role(t, role_id)).await)
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Role>, RbacError> {
        Ok(self.db.read(|t| active_role_by_name(t, name)).await)
    }

    async fn list(&self) -> Result<Vec<Role>, RbacError> {
        let roles: Vec<Role> = self
            .db
            .read(|t| {
                t.roles
                    .values()
                    .filter(|r| r.deleted_at.is_none())
                    .cloned()
                    .collect()
            })
            .await;
        Ok(sorted_by_name(roles, |r: &Role| r.name.as_str()))
    }

    async fn rename(&self, role_id: RoleId, name: &str) -> Result<Option<Role>, RbacError> {
        self.db
            .write(|t| {
                if let Some(other) = active_role_by_name(t, name) {
                    if other.id != role_id {
                        return Err(RbacError::AlreadyExists(format!("role '{}'", name)));
                    }
                }
                Ok(t.roles
                    .get_mut(&role_id)
                    .filter(|r| r.deleted_at.is_none())
                    .map(|r| {
                        r.name = name.to_owned();
                        r.clone()
                    }))
            })
            .await
    }

    async fn soft_delete(
        &self,
        role_id: RoleId,
        now: DateTime<Utc>,
    ) -> Result<Option<Role>, RbacError> {
        Ok(self
            .db
            .write(|t| {
                t.roles
                    .get_mut(&role_id)
                    .filter(|r| r.deleted_at.is_none())
                    .map(|r| {
                        r.deleted_at = Some(now);
                        r.clone()
                    })
            })
            .await)
    }
}

pub struct MemoryPermissionRepo {
    db: MemoryDb,
}

impl MemoryPermissionRepo {
    pub fn new(db: MemoryDb) -> Self {
        MemoryPermissionRepo { db }
    }
}

#[async_trait::async_trait]
impl PermissionRepo for MemoryPermissionRepo {
    async fn create_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        permission: &Permission,
    ) -> Result<(), RbacError> {
        let t = downcast(tx).map_err(store_err)?;
        if active_permission_by_name(t, &permission.name).is_some() {
            return Err(RbacError::AlreadyExists(format!(
                "permission '{}'",
                permission.name
            )));
        }
        t.permissions.insert(permission.id, permission.clone());
        Ok(())
    }

    async fn get_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        permission_id: PermissionId,
    ) -> Result<Option<Permission>, RbacError> {
        let t = downcast(tx).map_err(store_err)?;
        Ok(active_permission(t, permission_id))
    }

    async fn get_by_name_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        name: &str,
    ) -> Result<Option<Permission>, RbacError> {
        let t = downcast(tx).map_err(store_err)?;
        Ok(active_permission_by_name(t, name))
    }

    async fn get(&self, permission_id: PermissionId) -> Result<Option<Permission>, RbacError> {
        Ok(self.db.read(|t| active_permission(t, permission_id)).await)
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Permission>, RbacError> {
        Ok(self.db.read(|t| active_permission_by_name(t, name)).await)
    }

    async fn list(&self) -> Result<Vec<Permission>, RbacError> {
        let perms: Vec<Permission> = self
            .db
            .read(|t| {
                t.permissions
                    .values()
                    .filter(|p| p.deleted_at.is_none())
                    .cloned()
                    .collect()
            })
            .await;
        Ok(sorted_by_name(perms, |p: &Permission| p.name.as_str()))
    }

    async fn soft_delete(
        &self,
        permission_id: PermissionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Permission>, RbacError> {
        Ok(self
            .db
            .write(|t| {
                t.permissions
                    .get_mut(&permission_id)
                    .filter(|p| p.deleted_at.is_none())
                    .map(|p| {
                        p.deleted_at = Some(now);
                        p.clone()
                    })
            })
            .await)
    }
}

pub struct MemoryAssignmentRepo {
    db: MemoryDb,
}

impl MemoryAssignmentRepo {
    pub fn new(db: MemoryDb) -> Self {
        MemoryAssignmentRepo { db }
    }
}

fn roles_of_user(t: &MemoryTables, user_id: UserId) -> Vec<Role> {
    t.user_roles
        .values()
        .filter(|ur| ur.user_id == user_id && ur.deleted_at.is_none())
        .filter_map(|ur| active_role(t, ur.role_id))
        .collect()
}

fn permissions_of_role(t: &MemoryTables, role_id: RoleId) -> Vec<Permission> {
    t.role_permissions
        .values()
        .filter(|rp| rp.role_id == role_id && rp.deleted_at.is_none())
        .filter_map(|rp| active_permission(t, rp.permission_id))
        .collect()
}

#[async_trait::async_trait]
impl AssignmentRepo for MemoryAssignmentRepo {
    async fn upsert_user_role_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        user_id: UserId,
        role_id: RoleId,
        now: DateTime<Utc>,
    ) -> Result<UserRole, RbacError> {
        let t = downcast(tx).map_err(store_err)?;
        let row = t
            .user_roles
            .entry((user_id, role_id))
            .and_modify(|ur| ur.deleted_at = None)
            .or_insert_with(|| UserRole {
                user_id,
                role_id,
                created_at: now,
                deleted_at: None,
            });
        Ok(row.clone())
    }

    async fn upsert_user_permission_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        grant: &UserPermission,
    ) -> Result<UserPermission, RbacError> {
        let t = downcast(tx).map_err(store_err)?;
        let row = t
            .user_permissions
            .entry((grant.user_id, grant.permission_id))
            .and_modify(|up| {
                up.granter_id = grant.granter_id;
                up.expires_at = grant.expires_at;
                up.deleted_at = None;
            })
            .or_insert_with(|| UserPermission {
                deleted_at: None,
                ..grant.clone()
            });
        Ok(row.clone())
    }

    async fn upsert_role_permission_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        role_id: RoleId,
        permission_id: PermissionId,
        now: DateTime<Utc>,
    ) -> Result<RolePermission, RbacError> {
        let t = downcast(tx).map_err(store_err)?;
        let row = t
            .role_permissions
            .entry((role_id, permission_id))
            .and_modify(|rp| rp.deleted_at = None)
            .or_insert_with(|| RolePermission {
                role_id,
                permission_id,
                created_at: now,
                deleted_at: None,
            });
        Ok(row.clone())
    }

    async fn remove_user_role(
        &self,
        user_id: UserId,
        role_id: RoleId,
        now: DateTime<Utc>,
    ) -> Result<Option<UserRole>, RbacError> {
        Ok(self
            .db
            .write(|t| {
                t.user_roles
                    .get_mut(&(user_id, role_id))
                    .filter(|ur| ur.deleted_at.is_none())
                    .map(|ur| {
                        ur.deleted_at = Some(now);
                        ur.clone()
                    })
            })
            .await)
    }

    async fn remove_user_permission(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
        now: DateTime<Utc>,
    ) -> Result<Option<UserPermission>, RbacError> {
        Ok(self
            .db
            .write(|t| {
                t.user_permissions
                    .get_mut(&(user_id, permission_id))
                    .filter(|up| up.deleted_at.is_none())
                    .map(|up| {
                        up.deleted_at = Some(now);
                        up.clone()
                    })
            })
            .await)
    }

    async fn remove_role_permission(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
        now: DateTime<Utc>,
    ) -> Result<Option<RolePermission>, RbacError> {
        Ok(self
            .db
            .write(|t| {
                t.role_permissions
                    .get_mut(&(role_id, permission_id))
                    .filter(|rp| rp.deleted_at.is_none())
                    .map(|rp| {
                        rp.deleted_at = Some(now);
                        rp.clone()
                    })
            })
            .await)
    }

    async fn roles_for_user(&self, user_id: UserId) -> Result<Vec<Role>, RbacError> {
        let roles: Vec<Role> = self.db.read(|t| roles_of_user(t, user_id)).await;
        Ok(sorted_by_name(roles, |r: &Role| r.name.as_str()))
    }

    async fn direct_permissions_for_user(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Permission>, RbacError> {
        let perms: Vec<Permission> = self
            .db
            .read(|t| {
                t.user_permissions
                    .values()
                    .filter(|up| up.user_id == user_id && up.is_active_at(now))
                    .filter_map(|up| active_permission(t, up.permission_id))
                    .collect()
            })
            .await;
        Ok(sorted_by_name(perms, |p: &Permission| p.name.as_str()))
    }

    async fn role_permissions_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Permission>, RbacError> {
        let perms: Vec<Permission> = self
            .db
            .read(|t| {
                roles_of_user(t, user_id)
                    .into_iter()
                    .flat_map(|r| permissions_of_role(t, r.id))
                    .collect()
            })
            .await;
        Ok(sorted_by_name(perms, |p: &Permission| p.name.as_str()))
    }

    async fn permissions_for_role(&self, role_id: RoleId) -> Result<Vec<Permission>, RbacError> {
        let perms: Vec<Permission> = self.db.read(|t| permissions_of_role(t, role_id)).await;
        Ok(sorted_by_name(perms, |p: &Permission| p.name.as_str()))
    }

    async fn users_for_role(&self, role_id: RoleId) -> Result<Vec<UserId>, RbacError> {
        Ok(self
            .db
            .read(|t| {
                t.user_roles
                    .values()
                    .filter(|ur| ur.role_id == role_id && ur.deleted_at.is_none())
                    .map(|ur| ur.user_id)
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .await)
    }

    async fn users_for_permission(
        &self,
        permission_id: PermissionId,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserId>, RbacError> {
        Ok(self
            .db
            .read(|t| {
                t.user_permissions
                    .values()
                    .filter(|up| up.permission_id == permission_id && up.is_active_at(now))
                    .map(|up| up.user_id)
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .await)
    }

    async fn roles_for_permission(
        &self,
        permission_id: PermissionId,
    ) -> Result<Vec<Role>, RbacError> {
        let roles: Vec<Role> = self
            .db
            .read(|t| {
                t.role_permissions
                    .values()
                    .filter(|rp| rp.permission_id == permission_id && rp.deleted_at.is_none())
                    .filter_map(|rp| active_role(t, rp.role_id))
                    .collect()
            })
            .await;
        Ok(sorted_by_name(roles, |r: &Role| r.name.as_str()))
    }
}
