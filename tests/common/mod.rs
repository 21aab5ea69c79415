#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use turnstile::application_impl::{
    Argon2PasswordHasher, LocalRbacQuery, RealAuthService, RealRbacService,
};
use turnstile::application_port::*;
use turnstile::domain_port::{OutboxRepo, RefreshTokenRepo};
use turnstile::infra_memory::MemoryDb;
use turnstile::server::{
    EventDispatcher, MemoryBroker, OutboxPublisher, Stores, identity_event_dispatcher,
    retry_policy_from, token_codec_from,
};
use turnstile::settings::Settings;

pub const TOPIC: &str = "identity.events";
pub const PASSWORD: &str = "correct-horse-battery";

pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.auth.access_secret = "test-access-secret".to_string();
    settings.auth.refresh_secret = "test-refresh-secret".to_string();
    settings.queue.topic = TOPIC.to_string();
    settings.outbox.tick_ms = 20;
    settings.consumer.max_attempts = 3;
    settings.consumer.retry_delay_ms = 1;
    settings
}

/// Services on memory backends with no background tasks. Tests drive the
/// outbox and the consumer by hand through [`Harness::pump`].
pub struct Harness {
    pub db: MemoryDb,
    pub broker: Arc<MemoryBroker>,
    pub codec: Arc<dyn TokenCodec>,
    pub auth: Arc<dyn AuthService>,
    pub rbac: Arc<dyn RbacService>,
    pub outbox: Arc<dyn OutboxRepo>,
    pub refresh_tokens: Arc<dyn RefreshTokenRepo>,
    pub publisher: OutboxPublisher,
    pub dispatcher: EventDispatcher,
    pub cancel: CancellationToken,
}

impl Harness {
    pub async fn new() -> Self {
        let settings = test_settings();
        let db = MemoryDb::new();
        let stores = Stores::memory(db.clone());
        let cancel = CancellationToken::new();
        let broker = Arc::new(
            MemoryBroker::new(cancel.clone()).with_redelivery_pause(Duration::from_millis(5)),
        );

        let codec = token_codec_from(&settings.auth).unwrap();
        let rbac: Arc<dyn RbacService> = Arc::new(RealRbacService::new(stores.rbac_repos()));
        rbac.seed().await.unwrap();

        let auth: Arc<dyn AuthService> = Arc::new(RealAuthService::new(
            stores.auth_repos(),
            Arc::new(Argon2PasswordHasher),
            codec.clone(),
            Arc::new(LocalRbacQuery::new(rbac.clone())),
            TokenTtl::default(),
        ));

        let publisher = OutboxPublisher::new(
            stores.outbox.clone(),
            broker.clone(),
            TOPIC,
            100,
            Duration::from_millis(10),
            cancel.clone(),
        );
        let dispatcher = identity_event_dispatcher(
            rbac.clone(),
            broker.clone(),
            TOPIC,
            retry_policy_from(&settings.consumer),
        );

        Self {
            db,
            broker,
            codec,
            auth,
            rbac,
            outbox: stores.outbox.clone(),
            refresh_tokens: stores.refresh_tokens.clone(),
            publisher,
            dispatcher,
            cancel,
        }
    }

    /// Relays pending outbox rows and consumes them. Returns the number of
    /// messages acknowledged.
    pub async fn pump(&self) -> usize {
        self.publisher.tick_once().await.unwrap();
        self.broker
            .consume_pending(&[TOPIC], &self.dispatcher)
            .await
            .unwrap()
    }

    /// A second auth service over the same tables, hashing with `hasher`.
    pub fn auth_with_hasher(&self, hasher: Arc<dyn CredentialHasher>) -> Arc<dyn AuthService> {
        Arc::new(RealAuthService::new(
            Stores::memory(self.db.clone()).auth_repos(),
            hasher,
            self.codec.clone(),
            Arc::new(LocalRbacQuery::new(self.rbac.clone())),
            TokenTtl::default(),
        ))
    }

    pub async fn register(&self, email: &str) -> LoginResult {
        let username = email.split('@').next().unwrap_or("someone").to_string();
        self.auth
            .register(
                RegisterInput {
                    email: email.to_string(),
                    username,
                    password: PASSWORD.to_string(),
                },
                &Default::default(),
            )
            .await
            .unwrap()
    }

    pub async fn login(&self, email: &str) -> LoginResult {
        self.auth
            .login(
                LoginInput {
                    email: email.to_string(),
                    password: PASSWORD.to_string(),
                },
                &Default::default(),
            )
            .await
            .unwrap()
    }
}
