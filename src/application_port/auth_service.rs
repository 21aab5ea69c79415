use crate::domain_model::*;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token invalid")]
    InvalidToken,
    #[error("token expired")]
    Expired,
    #[error("unexpected token type")]
    WrongType,
    #[error("signing error: {0}")]
    Signing(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("email already registered")]
    EmailTaken,
    #[error("user not found")]
    UserNotFound,
    #[error("invalid refresh token")]
    InvalidRefreshToken,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("rbac error: {0}")]
    Rbac(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct CreateAdminInput {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResult {
    pub user: User,
    pub tokens: TokenPair,
}

#[derive(Debug, Clone)]
pub struct TokenTtl {
    pub access: Duration,
    pub refresh: Duration,
}

impl Default for TokenTtl {
    fn default() -> Self {
        Self {
            access: Duration::minutes(15),
            refresh: Duration::days(7),
        }
    }
}

/// Signs and verifies tokens. Pure computation, no I/O.
pub trait TokenCodec: Send + Sync {
    fn issue_token_pair(
        &self,
        subject: UserId,
        roles: &[String],
        permissions: &[String],
        ttl: &TokenTtl,
    ) -> Result<TokenPair, TokenError>;

    fn issue_access_token(
        &self,
        subject: UserId,
        roles: &[String],
        permissions: &[String],
        ttl: Duration,
    ) -> Result<(AccessToken, DateTime<Utc>), TokenError>;

    fn verify_token(&self, token: &str, expected: TokenType)
    -> Result<VerifiedClaims, TokenError>;

    fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        match self.verify_token(token, TokenType::Access)? {
            VerifiedClaims::Access(claims) => Ok(claims),
            VerifiedClaims::Refresh(_) => Err(TokenError::WrongType),
        }
    }

    fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        match self.verify_token(token, TokenType::Refresh)? {
            VerifiedClaims::Refresh(claims) => Ok(claims),
            VerifiedClaims::Access(_) => Err(TokenError::WrongType),
        }
    }
}

#[async_trait::async_trait]
pub trait CredentialHasher: Send + Sync {
    async fn hash_password(&self, password: &str) -> Result<String, AuthError>;
    async fn verify_password(&self, password: &str, password_hash: &str)
    -> Result<bool, AuthError>;
}

#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    async fn register(
        &self,
        input: RegisterInput,
        client: &ClientInfo,
    ) -> Result<LoginResult, AuthError>;

    async fn login(&self, input: LoginInput, client: &ClientInfo)
    -> Result<LoginResult, AuthError>;

    async fn create_admin(&self, input: CreateAdminInput) -> Result<User, AuthError>;

    async fn refresh(&self, refresh_token: &str, client: &ClientInfo)
    -> Result<TokenPair, AuthError>;

    /// Revokes the given refresh token. Unknown or already revoked tokens succeed.
    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError>;

    async fn clean_expired_tokens(&self) -> Result<u64, AuthError>;

    async fn get_user(&self, user_id: UserId) -> Result<User, AuthError>;

    async fn get_current_user(&self, identity: &Identity) -> Result<User, AuthError>;

    async fn list_users(&self) -> Result<Vec<User>, AuthError>;
}
