mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Barrier;
use turnstile::application_impl::{Argon2PasswordHasher, refresh_token_digest};
use turnstile::application_port::*;
use turnstile::domain_model::*;
use turnstile::server::TokenSweeper;

fn roles_in(codec: &dyn TokenCodec, tokens: &TokenPair) -> Vec<String> {
    codec.verify_access(&tokens.access_token.0).unwrap().roles
}

#[tokio::test]
async fn registered_user_gets_user_role_once_event_is_consumed() {
    let h = Harness::new().await;

    let registered = h.register("alice@example.com").await;
    assert_eq!(registered.user.email, "alice@example.com");
    // role assignment is eventually consistent
    assert!(roles_in(h.codec.as_ref(), &registered.tokens).is_empty());

    assert_eq!(h.pump().await, 1);

    let logged_in = h.login("alice@example.com").await;
    let claims = h.codec.verify_access(&logged_in.tokens.access_token.0).unwrap();
    assert_eq!(claims.id, registered.user.id);
    assert_eq!(claims.roles, vec![ROLE_USER.to_string()]);
    assert!(claims.permissions.contains(&PERMISSION_READ_PROFILE.to_string()));
    assert!(!claims.permissions.contains(&PERMISSION_MANAGE_USERS.to_string()));
}

#[tokio::test]
async fn admin_account_gets_admin_role() {
    let h = Harness::new().await;

    let admin = h
        .auth
        .create_admin(CreateAdminInput {
            email: "root@example.com".to_string(),
            username: "root".to_string(),
            password: PASSWORD.to_string(),
        })
        .await
        .unwrap();
    assert!(admin.email_verified);
    h.pump().await;

    let logged_in = h.login("root@example.com").await;
    assert!(roles_in(h.codec.as_ref(), &logged_in.tokens).contains(&ROLE_ADMIN.to_string()));
}

#[tokio::test]
async fn email_is_normalized_and_unique() {
    let h = Harness::new().await;
    h.register("Bob@Example.com").await;

    let err = h
        .auth
        .register(
            RegisterInput {
                email: "  bob@EXAMPLE.com ".to_string(),
                username: "bob2".to_string(),
                password: PASSWORD.to_string(),
            },
            &ClientInfo::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::EmailTaken), "{:?}", err);

    // the rejected registration left no event behind
    assert_eq!(h.db.read(|t| t.outbox.len()).await, 1);
    assert_eq!(h.db.read(|t| t.users.len()).await, 1);
}

#[tokio::test]
async fn invalid_registrations_write_nothing() {
    let h = Harness::new().await;

    for (email, username, password) in [
        ("not-an-email", "x", PASSWORD),
        ("x@example.com", "   ", PASSWORD),
        ("x@example.com", "x", "short"),
    ] {
        let err = h
            .auth
            .register(
                RegisterInput {
                    email: email.to_string(),
                    username: username.to_string(),
                    password: password.to_string(),
                },
                &ClientInfo::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidArgument(_)), "{:?}", err);
    }

    assert_eq!(h.db.read(|t| t.outbox.len()).await, 0);
    assert_eq!(h.db.read(|t| t.users.len()).await, 0);
}

/// Argon2 behind a barrier on hashing, counting verifications.
struct GatedHasher {
    gate: Barrier,
    verifies: AtomicUsize,
}

impl GatedHasher {
    fn new(parties: usize) -> Arc<Self> {
        Arc::new(Self {
            gate: Barrier::new(parties),
            verifies: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl CredentialHasher for GatedHasher {
    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        self.gate.wait().await;
        Argon2PasswordHasher.hash_password(password).await
    }

    async fn verify_password(&self, password: &str, password_hash: &str) -> Result<bool, AuthError> {
        self.verifies.fetch_add(1, Ordering::SeqCst);
        Argon2PasswordHasher
            .verify_password(password, password_hash)
            .await
    }
}

fn registration(email: &str, username: &str) -> RegisterInput {
    RegisterInput {
        email: email.to_string(),
        username: username.to_string(),
        password: PASSWORD.to_string(),
    }
}

#[tokio::test]
async fn racing_registrations_commit_one_user_and_one_event() {
    let h = Harness::new().await;
    // both requests pass the email pre-check before either transaction begins
    let auth = h.auth_with_hasher(GatedHasher::new(2));
    let client = ClientInfo::default();

    let (a, b) = tokio::join!(
        auth.register(registration("jo@example.com", "jo"), &client),
        auth.register(registration("JO@example.com", "jo2"), &client),
    );
    let (winner, loser) = match (a, b) {
        (Ok(w), Err(l)) | (Err(l), Ok(w)) => (w, l),
        other => panic!("expected one winner, got {:?}", other),
    };
    assert!(matches!(loser, AuthError::EmailTaken), "{:?}", loser);
    assert_eq!(winner.user.email, "jo@example.com");

    let (users, credentials, outbox) = h
        .db
        .read(|t| (t.users.len(), t.credentials.len(), t.outbox.len()))
        .await;
    assert_eq!((users, credentials, outbox), (1, 1, 1));

    let pending = h.outbox.fetch_pending(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].aggregate_id, winner.user.id.to_string());
}

#[tokio::test]
async fn unknown_email_still_runs_a_password_verification() {
    let h = Harness::new().await;
    h.register("kim@example.com").await;
    let hasher = GatedHasher::new(1);
    let auth = h.auth_with_hasher(hasher.clone());

    let login = |email: &str, password: &str| LoginInput {
        email: email.to_string(),
        password: password.to_string(),
    };

    let err = auth
        .login(login("nobody@example.com", PASSWORD), &ClientInfo::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials), "{:?}", err);
    assert_eq!(hasher.verifies.load(Ordering::SeqCst), 1);

    let err = auth
        .login(login("kim@example.com", "not-the-password"), &ClientInfo::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials), "{:?}", err);
    assert_eq!(hasher.verifies.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn wrong_password_and_unknown_email_look_the_same() {
    let h = Harness::new().await;
    h.register("carol@example.com").await;

    let wrong_password = h
        .auth
        .login(
            LoginInput {
                email: "carol@example.com".to_string(),
                password: "not-the-password".to_string(),
            },
            &ClientInfo::default(),
        )
        .await
        .unwrap_err();
    let unknown = h
        .auth
        .login(
            LoginInput {
                email: "nobody@example.com".to_string(),
                password: PASSWORD.to_string(),
            },
            &ClientInfo::default(),
        )
        .await
        .unwrap_err();

    let a: Status = wrong_password.into();
    let b: Status = unknown.into();
    assert_eq!(a, b);
    assert_eq!(a.code, StatusCode::Unauthenticated);
}

#[tokio::test]
async fn refresh_token_is_single_use() {
    let h = Harness::new().await;
    let first = h.register("dave@example.com").await.tokens;
    let client = ClientInfo::new(Some("test-agent".to_string()), Some("10.0.0.1".to_string()));

    let second = h.auth.refresh(&first.refresh_token.0, &client).await.unwrap();
    assert_ne!(second.refresh_token.0, first.refresh_token.0);

    let replay = h.auth.refresh(&first.refresh_token.0, &client).await.unwrap_err();
    assert!(matches!(replay, AuthError::InvalidRefreshToken), "{:?}", replay);

    // the successor is usable and records the caller
    let record = h
        .refresh_tokens
        .find_by_hash(&refresh_token_digest(&second.refresh_token.0))
        .await
        .unwrap()
        .unwrap();
    assert!(!record.revoked);
    assert_eq!(record.user_agent, "test-agent");
    assert_eq!(record.ip_address, "10.0.0.1");
    h.auth.refresh(&second.refresh_token.0, &client).await.unwrap();
}

#[tokio::test]
async fn concurrent_refreshes_of_one_token_have_one_winner() {
    let h = Harness::new().await;
    let tokens = h.register("erin@example.com").await.tokens;
    let client = ClientInfo::default();

    let (a, b) = tokio::join!(
        h.auth.refresh(&tokens.refresh_token.0, &client),
        h.auth.refresh(&tokens.refresh_token.0, &client),
    );
    let winners = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(winners, 1);

    let active = h
        .db
        .read(|t| t.refresh_tokens.values().filter(|r| !r.revoked).count())
        .await;
    assert_eq!(active, 1);
}

#[tokio::test]
async fn access_token_is_not_a_refresh_token() {
    let h = Harness::new().await;
    let tokens = h.register("frank@example.com").await.tokens;

    let err = h
        .auth
        .refresh(&tokens.access_token.0, &ClientInfo::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidRefreshToken), "{:?}", err);
}

#[tokio::test]
async fn logout_revokes_and_is_idempotent() {
    let h = Harness::new().await;
    let tokens = h.register("gina@example.com").await.tokens;

    h.auth.logout(&tokens.refresh_token.0).await.unwrap();
    h.auth.logout(&tokens.refresh_token.0).await.unwrap();
    h.auth.logout("never-issued").await.unwrap();

    let err = h
        .auth
        .refresh(&tokens.refresh_token.0, &ClientInfo::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidRefreshToken), "{:?}", err);
}

#[tokio::test]
async fn current_user_and_lookups() {
    let h = Harness::new().await;
    let hank = h.register("hank@example.com").await;
    h.register("ivy@example.com").await;

    let identity = Identity::from(h.codec.verify_access(&hank.tokens.access_token.0).unwrap());
    let me = h.auth.get_current_user(&identity).await.unwrap();
    assert_eq!(me.id, hank.user.id);

    assert_eq!(h.auth.list_users().await.unwrap().len(), 2);

    let err = h.auth.get_user(UserId::new_v4()).await.unwrap_err();
    assert!(matches!(err, AuthError::UserNotFound), "{:?}", err);
}

fn record(user_id: UserId, token: &str, expires_in: ChronoDuration) -> RefreshTokenRecord {
    let now = Utc::now();
    RefreshTokenRecord {
        id: RefreshTokenId::new_v4(),
        user_id,
        token_hash: refresh_token_digest(token),
        user_agent: String::new(),
        ip_address: String::new(),
        created_at: now,
        expires_at: now + expires_in,
        revoked: false,
    }
}

#[tokio::test]
async fn expired_tokens_are_swept_and_live_ones_kept() {
    let h = Harness::new().await;
    let user_id = UserId::new_v4();
    h.refresh_tokens
        .insert(&record(user_id, "stale", ChronoDuration::seconds(-5)))
        .await
        .unwrap();
    h.refresh_tokens
        .insert(&record(user_id, "live", ChronoDuration::hours(1)))
        .await
        .unwrap();

    assert_eq!(h.auth.clean_expired_tokens().await.unwrap(), 1);
    assert_eq!(h.auth.clean_expired_tokens().await.unwrap(), 0);

    let live = h.refresh_tokens.find_by_hash(&refresh_token_digest("live")).await.unwrap();
    assert!(live.is_some());
}

#[tokio::test]
async fn sweeper_runs_until_cancelled() {
    let h = Harness::new().await;
    h.refresh_tokens
        .insert(&record(UserId::new_v4(), "stale", ChronoDuration::seconds(-1)))
        .await
        .unwrap();

    let sweeper = TokenSweeper::new(h.auth.clone(), Duration::from_millis(10), h.cancel.clone());
    let handle = tokio::spawn(async move { sweeper.run().await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.db.read(|t| t.refresh_tokens.len()).await > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    h.cancel.cancel();
    handle.await.unwrap().unwrap();
}
