use super::db::{MemoryDb, downcast};
use crate::application_port::AuthError;
use crate::domain_model::*;
use crate::domain_port::*;

pub struct MemoryUserRepo {
    db: MemoryDb,
}

impl MemoryUserRepo {
    pub fn new(db: MemoryDb) -> Self {
        MemoryUserRepo { db }
    }
}

fn same_email(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[async_trait::async_trait]
impl UserRepo for MemoryUserRepo {
    async fn create_in_tx(&self, tx: &mut dyn StorageTx, user: &User) -> Result<(), AuthError> {
        let tables = downcast(tx).map_err(|e| AuthError::Store(e.to_string()))?;
        if tables
            .users
            .values()
            .any(|u| same_email(&u.email, &user.email))
        {
            return Err(AuthError::EmailTaken);
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_by_id(&self, user_id: UserId) -> Result<Option<User>, AuthError> {
        Ok(self
            .db
            .read(|t| t.users.get(&user_id).filter(|u| u.deleted_at.is_none()).cloned())
            .await)
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        Ok(self
            .db
            .read(|t| {
                t.users
                    .values()
                    .find(|u| u.deleted_at.is_none() && same_email(&u.email, email))
                    .cloned()
            })
            .await)
    }

    async fn email_exists(&self, email: &str) -> Result<bool, AuthError> {
        Ok(self
            .db
            .read(|t| t.users.values().any(|u| same_email(&u.email, email)))
            .await)
    }

    async fn list(&self) -> Result<Vec<User>, AuthError> {
        let mut users: Vec<User> = self
            .db
            .read(|t| {
                t.users
                    .values()
                    .filter(|u| u.deleted_at.is_none())
                    .cloned()
                    .collect()
            })
            .await;
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(users)
    }
}

pub struct MemoryCredentialRepo {
    db: MemoryDb,
}

impl MemoryCredentialRepo {
    pub fn new(db: MemoryDb) -> Self {
        MemoryCredentialRepo { db }
    }
}

#[async_trait::async_trait]
impl CredentialRepo for MemoryCredentialRepo {
    async fn create_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        credential: &Credential,
    ) -> Result<(), AuthError> {
        let tables = downcast(tx).map_err(|e| AuthError::Store(e.to_string()))?;
        if !tables.users.contains_key(&credential.user_id) {
            return Err(AuthError::Store(format!(
                "credential references missing user {}",
                credential.user_id
            )));
        }
        let duplicate = tables.credentials.iter().any(|c| {
            c.deleted_at.is_none()
                && c.provider == credential.provider
                && (c.user_id == credential.user_id || c.provider_uid == credential.provider_uid)
        });
        if duplicate {
            return Err(AuthError::Store("duplicate credential".to_string()));
        }
        tables.credentials.push(credential.clone());
        Ok(())
    }

    async fn get_local_by_user(&self, user_id: UserId) -> Result<Option<Credential>, AuthError> {
        Ok(self
            .db
            .read(|t| {
                t.credentials
                    .iter()
                    .find(|c| {
                        c.user_id == user_id
                            && c.provider == PROVIDER_LOCAL
                            && c.deleted_at.is_none()
                    })
                    .cloned()
            })
            .await)
    }
}
