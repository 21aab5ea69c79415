use super::UserId;
use chrono::{DateTime, Utc};
use serde::Serialize;

crate::uuid_id!(RoleId);
crate::uuid_id!(PermissionId);

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";

pub const PERMISSION_READ_PROFILE: &str = "read_profile";
pub const PERMISSION_WRITE_PROFILE: &str = "write_profile";
pub const PERMISSION_MANAGE_USERS: &str = "manage_users";
pub const PERMISSION_MANAGE_ROLES: &str = "manage_roles";
pub const PERMISSION_MANAGE_PERMISSIONS: &str = "manage_permissions";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub built_in: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Permission {
    pub id: PermissionId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Role {
    pub fn new(name: &str, built_in: bool) -> Self {
        Self {
            id: RoleId::new_v4(),
            name: name.to_owned(),
            built_in,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }
}

impl Permission {
    pub fn new(name: &str) -> Self {
        Self {
            id: PermissionId::new_v4(),
            name: name.to_owned(),
            created_at: Utc::now(),
            deleted_at: None,
        }
    }
}

/// Built-in roles and the permissions each one starts with.
pub const BUILT_IN_ROLES: &[(&str, &[&str])] = &[
    (
        ROLE_ADMIN,
        &[
            PERMISSION_READ_PROFILE,
            PERMISSION_WRITE_PROFILE,
            PERMISSION_MANAGE_USERS,
            PERMISSION_MANAGE_ROLES,
            PERMISSION_MANAGE_PERMISSIONS,
        ],
    ),
    (ROLE_USER, &[PERMISSION_READ_PROFILE, PERMISSION_WRITE_PROFILE]),
];

pub const BUILT_IN_PERMISSIONS: &[&str] = &[
    PERMISSION_READ_PROFILE,
    PERMISSION_WRITE_PROFILE,
    PERMISSION_MANAGE_USERS,
    PERMISSION_MANAGE_ROLES,
    PERMISSION_MANAGE_PERMISSIONS,
];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RolePermission {
    pub role_id: RoleId,
    pub permission_id: PermissionId,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserRole {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A direct grant. `expires_at == None` means the grant never expires.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserPermission {
    pub user_id: UserId,
    pub permission_id: PermissionId,
    pub granter_id: Option<UserId>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl UserPermission {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.deleted_at.is_none() && self.expires_at.is_none_or(|exp| exp > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn grant(expires_at: Option<DateTime<Utc>>) -> UserPermission {
        UserPermission {
            user_id: UserId::new_v4(),
            permission_id: PermissionId::new_v4(),
            granter_id: None,
            expires_at,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn grant_without_expiry_never_lapses() {
        let far = Utc::now() + Duration::days(365 * 100);
        assert!(grant(None).is_active_at(far));
    }

    #[test]
    fn grant_lapses_at_expiry_and_on_soft_delete() {
        let now = Utc::now();
        assert!(grant(Some(now + Duration::minutes(1))).is_active_at(now));
        assert!(!grant(Some(now)).is_active_at(now));

        let mut deleted = grant(None);
        deleted.deleted_at = Some(now);
        assert!(!deleted.is_active_at(now));
    }
}
