use crate::application_port::AuthError;
use crate::domain_model::*;
use crate::domain_port::repo_tx::StorageTx;

#[async_trait::async_trait]
pub trait UserRepo: Send + Sync {
    /// Fails with `EmailTaken` when the email is already registered.
    async fn create_in_tx(&self, tx: &mut dyn StorageTx, user: &User) -> Result<(), AuthError>;

    async fn get_by_id(&self, user_id: UserId) -> Result<Option<User>, AuthError>;

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    async fn email_exists(&self, email: &str) -> Result<bool, AuthError>;

    async fn list(&self) -> Result<Vec<User>, AuthError>;
}

#[async_trait::async_trait]
pub trait CredentialRepo: Send + Sync {
    /// The user row must already exist.
    async fn create_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        credential: &Credential,
    ) -> Result<(), AuthError>;

    async fn get_local_by_user(&self, user_id: UserId) -> Result<Option<Credential>, AuthError>;
}
