use super::util::{downcast, is_dup_key};
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};

fn store_err<E: std::fmt::Display>(e: E) -> AuthError {
    AuthError::Store(e.to_string())
}

const USER_COLUMNS: &str =
    "id, email, username, email_verified, created_at, updated_at, deleted_at";

pub struct MySqlUserRepo {
    pool: MySqlPool,
}

impl MySqlUserRepo {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlUserRepo { pool }
    }

    fn row_to_user(row: &MySqlRow) -> Result<User, AuthError> {
        Ok(User {
            id: row.try_get("id").map_err(store_err)?,
            email: row.try_get("email").map_err(store_err)?,
            username: row.try_get("username").map_err(store_err)?,
            email_verified: row.try_get("email_verified").map_err(store_err)?,
            created_at: row.try_get("created_at").map_err(store_err)?,
            updated_at: row.try_get("updated_at").map_err(store_err)?,
            deleted_at: row.try_get("deleted_at").map_err(store_err)?,
        })
    }
}

#[async_trait::async_trait]
impl UserRepo for MySqlUserRepo {
    async fn create_in_tx(&self, tx: &mut dyn StorageTx, user: &User) -> Result<(), AuthError> {
        let tx = downcast(tx).map_err(store_err)?;

        sqlx::query(
            r#"
INSERT INTO users (id, email, username, email_verified, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, ?)
"#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(user.email_verified)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(tx.conn())
        .await
        .map_err(|e| {
            if is_dup_key(&e) {
                AuthError::EmailTaken
            } else {
                store_err(e)
            }
        })?;

        Ok(())
    }

    async fn get_by_id(&self, user_id: UserId) -> Result<Option<User>, AuthError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ? AND deleted_at IS NULL"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn email_exists(&self, email: &str) -> Result<bool, AuthError> {
        let count: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM users WHERE email = ?"#)
            .bind(email)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;

        Ok(count > 0)
    }

    async fn list(&self) -> Result<Vec<User>, AuthError> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(Self::row_to_user).collect()
    }
}

pub struct MySqlCredentialRepo {
    pool: MySqlPool,
}

impl MySqlCredentialRepo {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlCredentialRepo { pool }
    }
}

#[async_trait::async_trait]
impl CredentialRepo for MySqlCredentialRepo {
    async fn create_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        credential: &Credential,
    ) -> Result<(), AuthError> {
        let tx = downcast(tx).map_err(store_err)?;

        sqlx::query(
            r#"
INSERT INTO credentials (id, user_id, provider, provider_uid, secret_digest, created_at)
VALUES (?, ?, ?, ?, ?, ?)
"#,
        )
        .bind(credential.id)
        .bind(credential.user_id)
        .bind(&credential.provider)
        .bind(&credential.provider_uid)
        .bind(&credential.secret_digest)
        .bind(credential.created_at)
        .execute(tx.conn())
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn get_local_by_user(&self, user_id: UserId) -> Result<Option<Credential>, AuthError> {
        let row = sqlx::query(
            r#"
SELECT id, user_id, provider, provider_uid, secret_digest, created_at, deleted_at
FROM credentials
WHERE user_id = ? AND provider = ? AND deleted_at IS NULL
"#,
        )
        .bind(user_id)
        .bind(PROVIDER_LOCAL)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Credential {
            id: row.try_get("id").map_err(store_err)?,
            user_id: row.try_get("user_id").map_err(store_err)?,
            provider: row.try_get("provider").map_err(store_err)?,
            provider_uid: row.try_get("provider_uid").map_err(store_err)?,
            secret_digest: row.try_get("secret_digest").map_err(store_err)?,
            created_at: row.try_get("created_at").map_err(store_err)?,
            deleted_at: row.try_get("deleted_at").map_err(store_err)?,
        }))
    }
}
