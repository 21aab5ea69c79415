use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

pub const DEFAULT_MIN_PASSWORD_LEN: usize = 8;

/// Refresh tokens are stored and looked up by this digest only.
pub fn refresh_token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub struct AuthRepos {
    pub users: Arc<dyn UserRepo>,
    pub credentials: Arc<dyn CredentialRepo>,
    pub refresh_tokens: Arc<dyn RefreshTokenRepo>,
    pub outbox: Arc<dyn OutboxRepo>,
    pub tx_manager: Arc<dyn TxManager>,
}

pub struct RealAuthService {
    repos: AuthRepos,
    credential_hasher: Arc<dyn CredentialHasher>,
    token_codec: Arc<dyn TokenCodec>,
    rbac: Arc<dyn RbacQuery>,
    ttl: TokenTtl,
    min_password_len: usize,
    /// Verified against when there is no stored hash, so a failed login
    /// costs the same whether or not the account exists.
    decoy_hash: OnceCell<String>,
}

impl RealAuthService {
    pub fn new(
        repos: AuthRepos,
        credential_hasher: Arc<dyn CredentialHasher>,
        token_codec: Arc<dyn TokenCodec>,
        rbac: Arc<dyn RbacQuery>,
        ttl: TokenTtl,
    ) -> Self {
        Self {
            repos,
            credential_hasher,
            token_codec,
            rbac,
            ttl,
            min_password_len: DEFAULT_MIN_PASSWORD_LEN,
            decoy_hash: OnceCell::new(),
        }
    }

    pub fn with_min_password_len(mut self, len: usize) -> Self {
        self.min_password_len = len;
        self
    }

    fn validate_new_user(&self, email: &str, username: &str, password: &str) -> Result<(), AuthError> {
        if !looks_like_email(email) {
            return Err(AuthError::InvalidArgument("invalid email".to_string()));
        }
        if username.trim().is_empty() {
            return Err(AuthError::InvalidArgument("username is required".to_string()));
        }
        if password.chars().count() < self.min_password_len {
            return Err(AuthError::InvalidArgument(format!(
                "password must be at least {} characters",
                self.min_password_len
            )));
        }
        Ok(())
    }

    /// Writes the user, its local credential and one outbox row atomically.
    async fn create_user(
        &self,
        email: &str,
        username: &str,
        password: &str,
        email_verified: bool,
        event_type: EventType,
    ) -> Result<User, AuthError> {
        let email = normalize_email(email);
        self.validate_new_user(&email, username, password)?;

        if self.repos.users.email_exists(&email).await? {
            return Err(AuthError::EmailTaken);
        }

        let password_hash = self.credential_hasher.hash_password(password).await?;
        let user = User::new(&email, username.trim(), email_verified);
        let credential = Credential::local(user.id, password_hash);
        let event = NewOutboxEvent::for_user(user.id, event_type)
            .map_err(|e| AuthError::InternalError(e.to_string()))?;

        let mut tx = self
            .repos
            .tx_manager
            .begin()
            .await
            .map_err(|e| AuthError::Store(e.to_string()))?;

        self.repos.users.create_in_tx(tx.as_mut(), &user).await?;
        self.repos
            .credentials
            .create_in_tx(tx.as_mut(), &credential)
            .await?;
        let event_id = self
            .repos
            .outbox
            .enqueue_in_tx(tx.as_mut(), &event)
            .await
            .map_err(|e| AuthError::Store(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AuthError::Store(e.to_string()))?;

        info!(user_id = %user.id, event_id, %event_type, "user created");
        Ok(user)
    }

    async fn burn_verify(&self, password: &str) -> Result<(), AuthError> {
        let decoy = self
            .decoy_hash
            .get_or_try_init(|| self.credential_hasher.hash_password("turnstile-decoy"))
            .await?;
        self.credential_hasher.verify_password(password, decoy).await?;
        Ok(())
    }

    async fn grants_for(&self, user_id: UserId) -> Result<(Vec<String>, Vec<String>), AuthError> {
        let roles = self
            .rbac
            .list_roles_for_user(user_id)
            .await
            .map_err(|e| AuthError::Rbac(e.to_string()))?;
        let permissions = self
            .rbac
            .list_permissions_for_user(user_id)
            .await
            .map_err(|e| AuthError::Rbac(e.to_string()))?;
        Ok((roles, permissions))
    }

    fn new_refresh_record(user_id: UserId, pair: &TokenPair, client: &ClientInfo) -> RefreshTokenRecord {
        RefreshTokenRecord {
            id: RefreshTokenId::new_v4(),
            user_id,
            token_hash: refresh_token_digest(&pair.refresh_token.0),
            user_agent: client.user_agent.clone(),
            ip_address: client.ip_address.clone(),
            created_at: Utc::now(),
            expires_at: pair.refresh_token_expires_at,
            revoked: false,
        }
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn looks_like_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

#[async_trait::async_trait]
impl AuthService for RealAuthService {
    async fn register(
        &self,
        input: RegisterInput,
        client: &ClientInfo,
    ) -> Result<LoginResult, AuthError> {
        let RegisterInput {
            email,
            username,
            password,
        } = input;

        let user = self
            .create_user(&email, &username, &password, false, EventType::UserRegistered)
            .await?;

        self.login(
            LoginInput {
                email: user.email.clone(),
                password,
            },
            client,
        )
        .await
    }

    async fn login(&self, input: LoginInput, client: &ClientInfo) -> Result<LoginResult, AuthError> {
        let LoginInput { email, password } = input;
        let email = normalize_email(&email);

        let Some(user) = self.repos.users.get_by_email(&email).await? else {
            warn!("login for unknown email");
            self.burn_verify(&password).await?;
            return Err(AuthError::InvalidCredentials);
        };
        let Some(credential) = self.repos.credentials.get_local_by_user(user.id).await? else {
            warn!(user_id = %user.id, "login for user without local credential");
            self.burn_verify(&password).await?;
            return Err(AuthError::InvalidCredentials);
        };

        let ok = self
            .credential_hasher
            .verify_password(&password, &credential.secret_digest)
            .await?;
        if !ok {
            warn!(user_id = %user.id, "password mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        let (roles, permissions) = self.grants_for(user.id).await?;
        let tokens = self
            .token_codec
            .issue_token_pair(user.id, &roles, &permissions, &self.ttl)?;

        let record = Self::new_refresh_record(user.id, &tokens, client);
        self.repos.refresh_tokens.insert(&record).await?;

        info!(user_id = %user.id, "user logged in");
        Ok(LoginResult { user, tokens })
    }

    async fn create_admin(&self, input: CreateAdminInput) -> Result<User, AuthError> {
        let CreateAdminInput {
            email,
            username,
            password,
        } = input;
        self.create_user(&email, &username, &password, true, EventType::AdminUserCreated)
            .await
    }

    async fn refresh(&self, refresh_token: &str, client: &ClientInfo) -> Result<TokenPair, AuthError> {
        let digest = refresh_token_digest(refresh_token);
        let record = match self.repos.refresh_tokens.find_by_hash(&digest).await? {
            Some(r) if r.is_usable_at(Utc::now()) => r,
            Some(r) => {
                warn!(token_id = %r.id, revoked = r.revoked, "refresh with unusable token");
                return Err(AuthError::InvalidRefreshToken);
            }
            None => return Err(AuthError::InvalidRefreshToken),
        };

        let claims = self
            .token_codec
            .verify_refresh(refresh_token)
            .map_err(|_| AuthError::InvalidRefreshToken)?;
        if claims.id != record.user_id {
            warn!(token_id = %record.id, "refresh token subject does not match its owner");
            return Err(AuthError::InvalidRefreshToken);
        }

        let (roles, permissions) = self.grants_for(record.user_id).await?;
        let tokens = self
            .token_codec
            .issue_token_pair(record.user_id, &roles, &permissions, &self.ttl)?;
        let successor = Self::new_refresh_record(record.user_id, &tokens, client);

        let mut tx = self
            .repos
            .tx_manager
            .begin()
            .await
            .map_err(|e| AuthError::Store(e.to_string()))?;

        let revoked = self
            .repos
            .refresh_tokens
            .revoke_if_active_in_tx(tx.as_mut(), record.id)
            .await?;
        if !revoked {
            tx.rollback()
                .await
                .map_err(|e| AuthError::Store(e.to_string()))?;
            warn!(token_id = %record.id, "refresh token already used");
            return Err(AuthError::InvalidRefreshToken);
        }

        self.repos
            .refresh_tokens
            .insert_in_tx(tx.as_mut(), &successor)
            .await?;
        tx.commit()
            .await
            .map_err(|e| AuthError::Store(e.to_string()))?;

        info!(user_id = %record.user_id, "tokens refreshed");
        Ok(tokens)
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let digest = refresh_token_digest(refresh_token);
        if self.repos.refresh_tokens.revoke_by_hash(&digest).await? {
            info!("refresh token revoked");
        }
        Ok(())
    }

    async fn clean_expired_tokens(&self) -> Result<u64, AuthError> {
        self.repos.refresh_tokens.delete_expired(Utc::now()).await
    }

    async fn get_user(&self, user_id: UserId) -> Result<User, AuthError> {
        self.repos
            .users
            .get_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    async fn get_current_user(&self, identity: &Identity) -> Result<User, AuthError> {
        self.get_user(identity.subject_id).await
    }

    async fn list_users(&self) -> Result<Vec<User>, AuthError> {
        self.repos.users.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_hex() {
        let d = refresh_token_digest("abc");
        assert_eq!(d.len(), 64);
        assert_eq!(
            d,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn email_shape() {
        assert!(looks_like_email("a@b.io"));
        assert!(!looks_like_email("a@b"));
        assert!(!looks_like_email("@b.io"));
        assert!(!looks_like_email("a b@c.io"));
        assert!(!looks_like_email("a@@b.io"));
        assert_eq!(normalize_email("  Bob@Example.COM "), "bob@example.com");
    }
}
