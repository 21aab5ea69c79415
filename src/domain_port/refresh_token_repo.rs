use crate::application_port::AuthError;
use crate::domain_model::*;
use crate::domain_port::repo_tx::StorageTx;
use chrono::{DateTime, Utc};

#[async_trait::async_trait]
pub trait RefreshTokenRepo: Send + Sync {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), AuthError>;

    async fn insert_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        record: &RefreshTokenRecord,
    ) -> Result<(), AuthError>;

    async fn find_by_hash(&self, token_hash: &str)
    -> Result<Option<RefreshTokenRecord>, AuthError>;

    /// Flips `revoked` only if it is still false. Returns whether this call did the flip.
    async fn revoke_if_active_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        id: RefreshTokenId,
    ) -> Result<bool, AuthError>;

    async fn revoke_by_hash(&self, token_hash: &str) -> Result<bool, AuthError>;

    /// Removes every row whose expiry is at or before `now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError>;
}
