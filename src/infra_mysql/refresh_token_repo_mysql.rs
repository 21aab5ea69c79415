use super::util::downcast;
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlConnection, MySqlPool, Row};

fn store_err<E: std::fmt::Display>(e: E) -> AuthError {
    AuthError::Store(e.to_string())
}

pub struct MySqlRefreshTokenRepo {
    pool: MySqlPool,
}

impl MySqlRefreshTokenRepo {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlRefreshTokenRepo { pool }
    }

    fn row_to_record(row: &MySqlRow) -> Result<RefreshTokenRecord, AuthError> {
        Ok(RefreshTokenRecord {
            id: row.try_get("id").map_err(store_err)?,
            user_id: row.try_get("user_id").map_err(store_err)?,
            token_hash: row.try_get("token_hash").map_err(store_err)?,
            user_agent: row.try_get("user_agent").map_err(store_err)?,
            ip_address: row.try_get("ip_address").map_err(store_err)?,
            created_at: row.try_get("created_at").map_err(store_err)?,
            expires_at: row.try_get("expires_at").map_err(store_err)?,
            revoked: row.try_get("revoked").map_err(store_err)?,
        })
    }

    async fn insert_on(
        conn: &mut MySqlConnection,
        record: &RefreshTokenRecord,
    ) -> Result<(), AuthError> {
        sqlx::query(
            r#"
INSERT INTO refresh_tokens
    (id, user_id, token_hash, user_agent, ip_address, created_at, expires_at, revoked)
VALUES (?, ?, ?, ?, ?, ?, ?, ?)
"#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.token_hash)
        .bind(&record.user_agent)
        .bind(&record.ip_address)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(record.revoked)
        .execute(conn)
        .await
        .map_err(store_err)?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl RefreshTokenRepo for MySqlRefreshTokenRepo {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), AuthError> {
        let mut conn = self.pool.acquire().await.map_err(store_err)?;
        Self::insert_on(&mut conn, record).await
    }

    async fn insert_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        record: &RefreshTokenRecord,
    ) -> Result<(), AuthError> {
        let tx = downcast(tx).map_err(store_err)?;
        Self::insert_on(tx.conn(), record).await
    }

    async fn find_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, AuthError> {
        let row = sqlx::query(
            r#"
SELECT id, user_id, token_hash, user_agent, ip_address, created_at, expires_at, revoked
FROM refresh_tokens
WHERE token_hash = ?
"#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn revoke_if_active_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        id: RefreshTokenId,
    ) -> Result<bool, AuthError> {
        let tx = downcast(tx).map_err(store_err)?;

        let result =
            sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = ? AND revoked = FALSE")
                .bind(id)
                .execute(tx.conn())
                .await
                .map_err(store_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_by_hash(&self, token_hash: &str) -> Result<bool, AuthError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE WHERE token_hash = ? AND revoked = FALSE",
        )
        .bind(token_hash)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        Ok(result.rows_affected())
    }
}
