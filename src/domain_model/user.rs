use chrono::{DateTime, Utc};
use serde::Serialize;

crate::uuid_id!(UserId);
crate::uuid_id!(CredentialId);

pub const PROVIDER_LOCAL: &str = "local";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub username: String,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(email: &str, username: &str, email_verified: bool) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::new_v4(),
            email: email.to_owned(),
            username: username.to_owned(),
            email_verified,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// A login method attached to a user. Only the `local` provider carries a
/// password digest; other providers would key on `provider_uid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub id: CredentialId,
    pub user_id: UserId,
    pub provider: String,
    pub provider_uid: String,
    pub secret_digest: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn local(user_id: UserId, secret_digest: String) -> Self {
        Self {
            id: CredentialId::new_v4(),
            user_id,
            provider: PROVIDER_LOCAL.to_owned(),
            provider_uid: user_id.to_string(),
            secret_digest,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }
}
