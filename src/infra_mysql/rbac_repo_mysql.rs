use super::util::{downcast, is_dup_key};
use crate::application_port::RbacError;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlConnection, MySqlPool, Row};
use uuid::Uuid;

fn store_err<E: std::fmt::Display>(e: E) -> RbacError {
    RbacError::Store(e.to_string())
}

fn row_to_role(row: &MySqlRow) -> Result<Role, RbacError> {
    Ok(Role {
        id: row.try_get("id").map_err(store_err)?,
        name: row.try_get("name").map_err(store_err)?,
        built_in: row.try_get("built_in").map_err(store_err)?,
        created_at: row.try_get("created_at").map_err(store_err)?,
        deleted_at: row.try_get("deleted_at").map_err(store_err)?,
    })
}

fn row_to_permission(row: &MySqlRow) -> Result<Permission, RbacError> {
    Ok(Permission {
        id: row.try_get("id").map_err(store_err)?,
        name: row.try_get("name").map_err(store_err)?,
        created_at: row.try_get("created_at").map_err(store_err)?,
        deleted_at: row.try_get("deleted_at").map_err(store_err)?,
    })
}

fn row_to_user_id(row: &MySqlRow) -> Result<UserId, RbacError> {
    row.try_get("user_id").map_err(store_err)
}

const ROLE_SELECT: &str = "SELECT id, name, built_in, created_at, deleted_at FROM roles";
const PERMISSION_SELECT: &str = "SELECT id, name, created_at, deleted_at FROM permissions";

pub struct MySqlRoleRepo {
    pool: MySqlPool,
}

impl MySqlRoleRepo {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlRoleRepo { pool }
    }

    async fn by_id(conn: &mut MySqlConnection, role_id: RoleId) -> Result<Option<Role>, RbacError> {
        let row = sqlx::query(&format!("{ROLE_SELECT} WHERE id = ? AND deleted_at IS NULL"))
            .bind(role_id)
            .fetch_optional(conn)
            .await
            .map_err(store_err)?;
        row.as_ref().map(row_to_role).transpose()
    }

    async fn by_name(conn: &mut MySqlConnection, name: &str) -> Result<Option<Role>, RbacError> {
        let row = sqlx::query(&format!("{ROLE_SELECT} WHERE name = ? AND deleted_at IS NULL"))
            .bind(name)
            .fetch_optional(conn)
            .await
            .map_err(store_err)?;
        row.as_ref().map(row_to_role).transpose()
    }
}

#[async_trait::async_trait]
impl RoleRepo for MySqlRoleRepo {
    async fn create_in_tx(&self, tx: &mut dyn StorageTx, role: &Role) -> Result<(), RbacError> {
        let tx = downcast(tx).map_err(store_err)?;

        sqlx::query(
            r#"
INSERT INTO roles (id, name, built_in, created_at)
VALUES (?, ?, ?, ?)
"#,
        )
        .bind(role.id)
        .bind(&role.name)
        .bind(role.built_in)
        .bind(role.created_at)
        .execute(tx.conn())
        .await
        .map_err(|e| {
            if is_dup_key(&e) {
                RbacError::AlreadyExists(format!("role '{}'", role.name))
            } else {
                store_err(e)
            }
        })?;

        Ok(())
    }

    async fn get_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        role_id: RoleId,
    ) -> Result<Option<Role>, RbacError> {
        let tx = downcast(tx).map_err(store_err)?;
        Self::by_id(tx.conn(), role_id).await
    }

    async fn get_by_name_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        name: &str,
    ) -> Result<Option<Role>, RbacError> {
        let tx = downcast(tx).map_err(store_err)?;
        Self::by_name(tx.conn(), name).await
    }

    async fn get(&self, role_id: RoleId) -> Result<Option<Role>, RbacError> {
        let mut conn = self.pool.acquire().await.map_err(store_err)?;
        Self::by_id(&mut conn, role_id).await
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Role>, RbacError> {
        let mut conn = self.pool.acquire().await.map_err(store_err)?;
        Self::by_name(&mut conn, name).await
    }

    async fn list(&self) -> Result<Vec<Role>, RbacError> {
        let rows = sqlx::query(&format!(
            "{ROLE_SELECT} WHERE deleted_at IS NULL ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.iter().map(row_to_role).collect()
    }

    async fn rename(&self, role_id: RoleId, name: &str) -> Result<Option<Role>, RbacError> {
        sqlx::query("UPDATE roles SET name = ? WHERE id = ? AND deleted_at IS NULL")
            .bind(name)
            .bind(role_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_dup_key(&e) {
                    RbacError::AlreadyExists(format!("role '{}'", name))
                } else {
                    store_err(e)
                }
            })?;

        self.get(role_id).await
    }

    async fn soft_delete(
        &self,
        role_id: RoleId,
        now: DateTime<Utc>,
    ) -> Result<Option<Role>, RbacError> {
        let Some(mut role) = self.get(role_id).await? else {
            return Ok(None);
        };

        let result =
            sqlx::query("UPDATE roles SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(now)
                .bind(role_id)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        role.deleted_at = Some(now);
        Ok(Some(role))
    }
}

pub struct MySqlPermissionRepo {
    pool: MySqlPool,
}

impl MySqlPermissionRepo {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlPermissionRepo { pool }
    }

    async fn by_id(
        conn: &mut MySqlConnection,
        permission_id: PermissionId,
    ) -> Result<Option<Permission>, RbacError> {
        let row = sqlx::query(&format!(
            "{PERMISSION_SELECT} WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(permission_id)
        .fetch_optional(conn)
        .await
        .map_err(store_err)?;
        row.as_ref().map(row_to_permission).transpose()
    }

    async fn by_name(
        conn: &mut MySqlConnection,
        name: &str,
    ) -> Result<Option<Permission>, RbacError> {
        let row = sqlx::query(&format!(
            "{PERMISSION_SELECT} WHERE name = ? AND deleted_at IS NULL"
        ))
        .bind(name)
        .fetch_optional(conn)
        .await
        .map_err(store_err)?;
        row.as_ref().map(row_to_permission).transpose()
    }
}

#[async_trait::async_trait]
impl PermissionRepo for MySqlPermissionRepo {
    async fn create_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        permission: &Permission,
    ) -> Result<(), RbacError> {
        let tx = downcast(tx).map_err(store_err)?;

        sqlx::query("INSERT INTO permissions (id, name, created_at) VALUES (?, ?, ?)")
            .bind(permission.id)
            .bind(&permission.name)
            .bind(permission.created_at)
            .execute(tx.conn())
            .await
            .map_err(|e| {
                if is_dup_key(&e) {
                    RbacError::AlreadyExists(format!("permission '{}'", permission.name))
                } else {
                    store_err(e)
                }
            })?;

        Ok(())
    }

    async fn get_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        permission_id: PermissionId,
    ) -> Result<Option<Permission>, RbacError> {
        let tx = downcast(tx).map_err(store_err)?;
        Self::by_id(tx.conn(), permission_id).await
    }

    async fn get_by_name_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        name: &str,
    ) -> Result<Option<Permission>, RbacError> {
        let tx = downcast(tx).map_err(store_err)?;
        Self::by_name(tx.conn(), name).await
    }

    async fn get(&self, permission_id: PermissionId) -> Result<Option<Permission>, RbacError> {
        let mut conn = self.pool.acquire().await.map_err(store_err)?;
        Self::by_id(&mut conn, permission_id).await
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Permission>, RbacError> {
        let mut conn = self.pool.acquire().await.map_err(store_err)?;
        Self::by_name(&mut conn, name).await
    }

    async fn list(&self) -> Result<Vec<Permission>, RbacError> {
        let rows = sqlx::query(&format!(
            "{PERMISSION_SELECT} WHERE deleted_at IS NULL ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.iter().map(row_to_permission).collect()
    }

    async fn soft_delete(
        &self,
        permission_id: PermissionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Permission>, RbacError> {
        let Some(mut permission) = self.get(permission_id).await? else {
            return Ok(None);
        };

        let result =
            sqlx::query("UPDATE permissions SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(now)
                .bind(permission_id)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        permission.deleted_at = Some(now);
        Ok(Some(permission))
    }
}

pub struct MySqlAssignmentRepo {
    pool: MySqlPool,
}

impl MySqlAssignmentRepo {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlAssignmentRepo { pool }
    }

    async fn roles(&self, sql: &str, id: Uuid) -> Result<Vec<Role>, RbacError> {
        let rows = sqlx::query(sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.iter().map(row_to_role).collect()
    }

    async fn permissions(
        &self,
        sql: &str,
        id: Uuid,
    ) -> Result<Vec<Permission>, RbacError> {
        let rows = sqlx::query(sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.iter().map(row_to_permission).collect()
    }
}

fn row_to_user_role(row: &MySqlRow) -> Result<UserRole, RbacError> {
    Ok(UserRole {
        user_id: row.try_get("user_id").map_err(store_err)?,
        role_id: row.try_get("role_id").map_err(store_err)?,
        created_at: row.try_get("created_at").map_err(store_err)?,
        deleted_at: row.try_get("deleted_at").map_err(store_err)?,
    })
}

fn row_to_user_permission(row: &MySqlRow) -> Result<UserPermission, RbacError> {
    Ok(UserPermission {
        user_id: row.try_get("user_id").map_err(store_err)?,
        permission_id: row.try_get("permission_id").map_err(store_err)?,
        granter_id: row.try_get("granter_id").map_err(store_err)?,
        expires_at: row.try_get("expires_at").map_err(store_err)?,
        created_at: row.try_get("created_at").map_err(store_err)?,
        deleted_at: row.try_get("deleted_at").map_err(store_err)?,
    })
}

fn row_to_role_permission(row: &MySqlRow) -> Result<RolePermission, RbacError> {
    Ok(RolePermission {
        role_id: row.try_get("role_id").map_err(store_err)?,
        permission_id: row.try_get("permission_id").map_err(store_err)?,
        created_at: row.try_get("created_at").map_err(store_err)?,
        deleted_at: row.try_get("deleted_at").map_err(store_err)?,
    })
}

#[async_trait::async_trait]
impl AssignmentRepo for MySqlAssignmentRepo {
    async fn upsert_user_role_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        user_id: UserId,
        role_id: RoleId,
        now: DateTime<Utc>,
    ) -> Result<UserRole, RbacError> {
        let tx = downcast(tx).map_err(store_err)?;

        sqlx::query(
            r#"
INSERT INTO user_roles (user_id, role_id, created_at)
VALUES (?, ?, ?)
ON DUPLICATE KEY UPDATE deleted_at = NULL
"#,
        )
        .bind(user_id)
        .bind(role_id)
        .bind(now)
        .execute(tx.conn())
        .await
        .map_err(store_err)?;

        let row = sqlx::query(
            "SELECT user_id, role_id, created_at, deleted_at FROM user_roles WHERE user_id = ? AND role_id = ?",
        )
        .bind(user_id)
        .bind(role_id)
        .fetch_one(tx.conn())
        .await
        .map_err(store_err)?;
        row_to_user_role(&row)
    }

    async fn upsert_user_permission_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        grant: &UserPermission,
    ) -> Result<UserPermission, RbacError> {
        let tx = downcast(tx).map_err(store_err)?;

        sqlx::query(
            r#"
INSERT INTO user_permissions (user_id, permission_id, granter_id, expires_at, created_at)
VALUES (?, ?, ?, ?, ?) AS new
ON DUPLICATE KEY UPDATE
    granter_id = new.granter_id,
    expires_at = new.expires_at,
    deleted_at = NULL
"#,
        )
        .bind(grant.user_id)
        .bind(grant.permission_id)
        .bind(grant.granter_id)
        .bind(grant.expires_at)
        .bind(grant.created_at)
        .execute(tx.conn())
        .await
        .map_err(store_err)?;

        let row = sqlx::query(
            r#"
SELECT user_id, permission_id, granter_id, expires_at, created_at, deleted_at
FROM user_permissions
WHERE user_id = ? AND permission_id = ?
"#,
        )
        .bind(grant.user_id)
        .bind(grant.permission_id)
        .fetch_one(tx.conn())
        .await
        .map_err(store_err)?;
        row_to_user_permission(&row)
    }

    async fn upsert_role_permission_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        role_id: RoleId,
        permission_id: PermissionId,
        now: DateTime<Utc>,
    ) -> Result<RolePermission, RbacError> {
        let tx = downcast(tx).map_err(store_err)?;

        sqlx::query(
            r#"
INSERT INTO role_permissions (role_id, permission_id, created_at)
VALUES (?, ?, ?)
ON DUPLICATE KEY UPDATE deleted_at = NULL
"#,
        )
        .bind(role_id)
        .bind(permission_id)
        .bind(now)
        .execute(tx.conn())
        .await
        .map_err(store_err)?;

        let row = sqlx::query(
            "SELECT role_id, permission_id, created_at, deleted_at FROM role_permissions WHERE role_id = ? AND permission_id = ?",
        )
        .bind(role_id)
        .bind(permission_id)
        .fetch_one(tx.conn())
        .await
        .map_err(store_err)?;
        row_to_role_permission(&row)
    }

    async fn remove_user_role(
        &self,
        user_id: UserId,
        role_id: RoleId,
        now: DateTime<Utc>,
    ) -> Result<Option<UserRole>, RbacError> {
        let row = sqlx::query(
            "SELECT user_id, role_id, created_at, deleted_at FROM user_roles WHERE user_id = ? AND role_id = ? AND deleted_at IS NULL",
        )
        .bind(user_id)
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        let Some(mut removed) = row.as_ref().map(row_to_user_role).transpose()? else {
            return Ok(None);
        };

        let result = sqlx::query(
            "UPDATE user_roles SET deleted_at = ? WHERE user_id = ? AND role_id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(user_id)
        .bind(role_id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        removed.deleted_at = Some(now);
        Ok(Some(removed))
    }

    async fn remove_user_permission(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
        now: DateTime<Utc>,
    ) -> Result<Option<UserPermission>, RbacError> {
        let row = sqlx::query(
            r#"
SELECT user_id, permission_id, granter_id, expires_at, created_at, deleted_at
FROM user_permissions
WHERE user_id = ? AND permission_id = ? AND deleted_at IS NULL
"#,
        )
        .bind(user_id)
        .bind(permission_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        let Some(mut removed) = row.as_ref().map(row_to_user_permission).transpose()? else {
            return Ok(None);
        };

        let result = sqlx::query(
            "UPDATE user_permissions SET deleted_at = ? WHERE user_id = ? AND permission_id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(user_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        removed.deleted_at = Some(now);
        Ok(Some(removed))
    }

    async fn remove_role_permission(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
        now: DateTime<Utc>,
    ) -> Result<Option<RolePermission>, RbacError> {
        let row = sqlx::query(
            "SELECT role_id, permission_id, created_at, deleted_at FROM role_permissions WHERE role_id = ? AND permission_id = ? AND deleted_at IS NULL",
        )
        .bind(role_id)
        .bind(permission_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        let Some(mut removed) = row.as_ref().map(row_to_role_permission).transpose()? else {
            return Ok(None);
        };

        let result = sqlx::query(
            "UPDATE role_permissions SET deleted_at = ? WHERE role_id = ? AND permission_id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(role_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        removed.deleted_at = Some(now);
        Ok(Some(removed))
    }

    async fn roles_for_user(&self, user_id: UserId) -> Result<Vec<Role>, RbacError> {
        self.roles(
            r#"
SELECT r.id, r.name, r.built_in, r.created_at, r.deleted_at
FROM user_roles ur
JOIN roles r ON r.id = ur.role_id
WHERE ur.user_id = ? AND ur.deleted_at IS NULL AND r.deleted_at IS NULL
ORDER BY r.name
"#,
            user_id.0,
        )
        .await
    }

    async fn direct_permissions_for_user(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Permission>, RbacError> {
        let rows = sqlx::query(
            r#"
SELECT p.id, p.name, p.created_at, p.deleted_at
FROM user_permissions up
JOIN permissions p ON p.id = up.permission_id
WHERE up.user_id = ?
  AND up.deleted_at IS NULL
  AND (up.expires_at IS NULL OR up.expires_at > ?)
  AND p.deleted_at IS NULL
ORDER BY p.name
"#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.iter().map(row_to_permission).collect()
    }

    async fn role_permissions_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Permission>, RbacError> {
        self.permissions(
            r#"
SELECT DISTINCT p.id, p.name, p.created_at, p.deleted_at
FROM user_roles ur
JOIN roles r ON r.id = ur.role_id AND r.deleted_at IS NULL
JOIN role_permissions rp ON rp.role_id = r.id AND rp.deleted_at IS NULL
JOIN permissions p ON p.id = rp.permission_id AND p.deleted_at IS NULL
WHERE ur.user_id = ? AND ur.deleted_at IS NULL
ORDER BY p.name
"#,
            user_id.0,
        )
        .await
    }

    async fn permissions_for_role(&self, role_id: RoleId) -> Result<Vec<Permission>, RbacError> {
        self.permissions(
            r#"
SELECT p.id, p.name, p.created_at, p.deleted_at
FROM role_permissions rp
JOIN permissions p ON p.id = rp.permission_id
WHERE rp.role_id = ? AND rp.deleted_at IS NULL AND p.deleted_at IS NULL
ORDER BY p.name
"#,
            role_id.0,
        )
        .await
    }

    async fn users_for_role(&self, role_id: RoleId) -> Result<Vec<UserId>, RbacError> {
        let rows = sqlx::query(
            r#"
SELECT DISTINCT user_id
FROM user_roles
WHERE role_id = ? AND deleted_at IS NULL
ORDER BY user_id
"#,
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.iter().map(row_to_user_id).collect()
    }

    async fn users_for_permission(
        &self,
        permission_id: PermissionId,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserId>, RbacError> {
        let rows = sqlx::query(
            r#"
SELECT DISTINCT user_id
FROM user_permissions
WHERE permission_id = ?
  AND deleted_at IS NULL
  AND (expires_at IS NULL OR expires_at > ?)
ORDER BY user_id
"#,
        )
        .bind(permission_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.iter().map(row_to_user_id).collect()
    }

    async fn roles_for_permission(
        &self,
        permission_id: PermissionId,
    ) -> Result<Vec<Role>, RbacError> {
        self.roles(
            r#"
SELECT r.id, r.name, r.built_in, r.created_at, r.deleted_at
FROM role_permissions rp
JOIN roles r ON r.id = rp.role_id
WHERE rp.permission_id = ? AND rp.deleted_at IS NULL AND r.deleted_at IS NULL
ORDER BY r.name
"#,
            permission_id.0,
        )
        .await
    }
}
