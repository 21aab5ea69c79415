use super::db::{MemoryDb, MemoryTables, downcast};
use crate::application_port::AuthError;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};

pub struct MemoryRefreshTokenRepo {
    db: MemoryDb,
}

impl MemoryRefreshTokenRepo {
    pub fn new(db: MemoryDb) -> Self {
        MemoryRefreshTokenRepo { db }
    }
}

fn insert(tables: &mut MemoryTables, record: &RefreshTokenRecord) -> Result<(), AuthError> {
    if tables
        .refresh_tokens
        .values()
        .any(|r| r.token_hash == record.token_hash)
    {
        return Err(AuthError::Store("duplicate refresh token hash".to_string()));
    }
    tables.refresh_tokens.insert(record.id, record.clone());
    Ok(())
}

#[async_trait::async_trait]
impl RefreshTokenRepo for MemoryRefreshTokenRepo {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), AuthError> {
        self.db.write(|t| insert(t, record)).await
    }

    async fn insert_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        record: &RefreshTokenRecord,
    ) -> Result<(), AuthError> {
        let tables = downcast(tx).map_err(|e| AuthError::Store(e.to_string()))?;
        insert(tables, record)
    }

    async fn find_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, AuthError> {
        Ok(self
            .db
            .read(|t| {
                t.refresh_tokens
                    .values()
                    .find(|r| r.token_hash == token_hash)
                    .cloned()
            })
            .await)
    }

    async fn revoke_if_active_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        id: RefreshTokenId,
    ) -> Result<bool, AuthError> {
        let tables = downcast(tx).map_err(|e| AuthError::Store(e.to_string()))?;
        match tables.refresh_tokens.get_mut(&id) {
            Some(r) if !r.revoked => {
                r.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_by_hash(&self, token_hash: &str) -> Result<bool, AuthError> {
        Ok(self
            .db
            .write(|t| {
                match t
                    .refresh_tokens
                    .values_mut()
                    .find(|r| r.token_hash == token_hash && !r.revoked)
                {
                    Some(r) => {
                        r.revoked = true;
                        true
                    }
                    None => false,
                }
            })
            .await)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        Ok(self
            .db
            .write(|t| {
                let before = t.refresh_tokens.len();
                t.refresh_tokens.retain(|_, r| r.expires_at > now);
                (before - t.refresh_tokens.len()) as u64
            })
            .await)
    }
}
