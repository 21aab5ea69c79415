use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use crate::infra_memory::*;
use crate::infra_mysql::*;
use crate::logger::*;
use crate::server::*;
use crate::settings::*;
use anyhow::{Context, anyhow};
use nanoid::nanoid;
use sqlx::MySqlPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Every repo a service may need, backed by one storage engine.
pub struct Stores {
    pub users: Arc<dyn UserRepo>,
    pub credentials: Arc<dyn CredentialRepo>,
    pub refresh_tokens: Arc<dyn RefreshTokenRepo>,
    pub outbox: Arc<dyn OutboxRepo>,
    pub roles: Arc<dyn RoleRepo>,
    pub permissions: Arc<dyn PermissionRepo>,
    pub assignments: Arc<dyn AssignmentRepo>,
    pub tx_manager: Arc<dyn TxManager>,
}

impl Stores {
    pub fn memory(db: MemoryDb) -> Self {
        Self {
            users: Arc::new(MemoryUserRepo::new(db.clone())),
            credentials: Arc::new(MemoryCredentialRepo::new(db.clone())),
            refresh_tokens: Arc::new(MemoryRefreshTokenRepo::new(db.clone())),
            outbox: Arc::new(MemoryOutboxRepo::new(db.clone())),
            roles: Arc::new(MemoryRoleRepo::new(db.clone())),
            permissions: Arc::new(MemoryPermissionRepo::new(db.clone())),
            assignments: Arc::new(MemoryAssignmentRepo::new(db.clone())),
            tx_manager: Arc::new(MemoryTxManager::new(db)),
        }
    }

    pub fn mysql(pool: MySqlPool) -> Self {
        Self {
            users: Arc::new(MySqlUserRepo::new(pool.clone())),
            credentials: Arc::new(MySqlCredentialRepo::new(pool.clone())),
            refresh_tokens: Arc::new(MySqlRefreshTokenRepo::new(pool.clone())),
            outbox: Arc::new(MySqlOutboxRepo::new(pool.clone())),
            roles: Arc::new(MySqlRoleRepo::new(pool.clone())),
            permissions: Arc::new(MySqlPermissionRepo::new(pool.clone())),
            assignments: Arc::new(MySqlAssignmentRepo::new(pool.clone())),
            tx_manager: Arc::new(MySqlTxManager::new(pool)),
        }
    }

    pub fn auth_repos(&self) -> AuthRepos {
        AuthRepos {
            users: self.users.clone(),
            credentials: self.credentials.clone(),
            refresh_tokens: self.refresh_tokens.clone(),
            outbox: self.outbox.clone(),
            tx_manager: self.tx_manager.clone(),
        }
    }

    pub fn rbac_repos(&self) -> RbacRepos {
        RbacRepos {
            roles: self.roles.clone(),
            permissions: self.permissions.clone(),
            assignments: self.assignments.clone(),
            tx_manager: self.tx_manager.clone(),
        }
    }
}

/// Both halves of the queue.
pub struct Queue {
    pub publisher: Arc<dyn EventPublisher>,
    pub consumer: Arc<dyn EventConsumer>,
}

impl Queue {
    pub fn memory(broker: Arc<MemoryBroker>) -> Self {
        Self {
            publisher: broker.clone(),
            consumer: broker,
        }
    }
}

pub struct Server {
    pub mode: ServiceMode,
    pub auth_service: Option<Arc<dyn AuthService>>,
    pub rbac_service: Option<Arc<dyn RbacService>>,
    pub gate: Arc<AuthorizationGate>,
    pub request_timeout: Duration,
    handles: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    cancel: CancellationToken,
    pool: Option<MySqlPool>,
}

impl Server {
    pub async fn try_new(settings: &Settings, mode: ServiceMode) -> anyhow::Result<Self> {
        let alphabet: [char; 16] = [
            '1', '2', '3', '4', '5', '6', '7', '8', '9', '0', 'a', 'b', 'c', 'd', 'e', 'f',
        ];
        let run_id = nanoid!(10, &alphabet);
        info!(run_id = %run_id, ?mode, "building server");

        let cancel = CancellationToken::new();

        let (stores, pool) = match settings.storage.backend {
            StorageBackend::Memory => (Stores::memory(MemoryDb::new()), None),
            StorageBackend::Mysql => {
                let pool = connect_pool(
                    &settings.storage.database_url,
                    settings.storage.max_connections,
                    Duration::from_millis(settings.storage.acquire_timeout_ms),
                )
                .await?;
                if settings.storage.run_migrations {
                    if mode != ServiceMode::Rbac {
                        run_migrations(&pool, Schema::User).await?;
                    }
                    if mode != ServiceMode::User {
                        run_migrations(&pool, Schema::Rbac).await?;
                    }
                }
                (Stores::mysql(pool.clone()), Some(pool))
            }
        };

        let queue = match settings.queue.backend {
            QueueBackend::Memory => {
                if mode != ServiceMode::Standalone {
                    warn!("memory queue outside standalone mode: events stay in this process");
                }
                Queue::memory(Arc::new(MemoryBroker::new(cancel.clone())))
            }
            QueueBackend::Kafka => Queue {
                publisher: Arc::new(KafkaPublisher::new(
                    &settings.queue.brokers,
                    &format!("{}-pub-{}", settings.queue.client_id, run_id),
                    Duration::from_millis(settings.queue.delivery_timeout_ms),
                )?),
                consumer: Arc::new(KafkaConsumer::new(
                    &settings.queue.brokers,
                    &format!("{}-sub-{}", settings.queue.client_id, run_id),
                    cancel.clone(),
                )),
            },
        };

        let mut server = Self::from_components(settings, mode, stores, queue, cancel).await?;
        server.pool = pool;
        Ok(server)
    }

    /// Wires services and starts background tasks on top of already-built
    /// storage and queue backends.
    pub async fn from_components(
        settings: &Settings,
        mode: ServiceMode,
        stores: Stores,
        queue: Queue,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        settings.validate()?;
        let token_codec = token_codec_from(&settings.auth)?;
        let gate = Arc::new(AuthorizationGate::new(token_codec.clone()));
        let mut handles: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

        let rbac_service: Option<Arc<dyn RbacService>> = if mode != ServiceMode::User {
            let rbac: Arc<dyn RbacService> = Arc::new(RealRbacService::new(stores.rbac_repos()));
            rbac.seed()
                .await
                .map_err(|e| anyhow!("seeding built-in roles: {}", e))?;
            Some(rbac)
        } else {
            None
        };

        let auth_service: Option<Arc<dyn AuthService>> = if mode != ServiceMode::Rbac {
            let rbac_query: Arc<dyn RbacQuery> = match &rbac_service {
                Some(rbac) => Arc::new(LocalRbacQuery::new(rbac.clone())),
                None => Arc::new(HttpRbacQuery::new(
                    &settings.auth.rbac_url,
                    token_codec.clone(),
                    Duration::from_millis(settings.auth.rbac_timeout_ms),
                )?),
            };

            let ttl = TokenTtl {
                access: chrono::Duration::seconds(settings.auth.access_ttl_secs),
                refresh: chrono::Duration::seconds(settings.auth.refresh_ttl_secs),
            };
            let auth: Arc<dyn AuthService> = Arc::new(
                RealAuthService::new(
                    stores.auth_repos(),
                    Arc::new(Argon2PasswordHasher),
                    token_codec.clone(),
                    rbac_query,
                    ttl,
                )
                .with_min_password_len(settings.auth.min_password_len),
            );

            if let Some(admin) = &settings.admin {
                seed_admin(auth.as_ref(), stores.users.as_ref(), admin).await?;
            }

            let publisher = OutboxPublisher::new(
                stores.outbox.clone(),
                queue.publisher.clone(),
                &settings.queue.topic,
                settings.outbox.batch_size,
                Duration::from_millis(settings.outbox.tick_ms),
                cancel.clone(),
            );
            handles.push((
                "outbox publisher",
                tokio::spawn(async move {
                    if let Err(e) = publisher.run().await {
                        error!("outbox publisher stopped: {:#}", e);
                    }
                }),
            ));

            let sweeper = TokenSweeper::new(
                auth.clone(),
                Duration::from_secs(settings.auth.sweep_interval_secs.max(1)),
                cancel.clone(),
            );
            handles.push((
                "token sweeper",
                tokio::spawn(async move {
                    if let Err(e) = sweeper.run().await {
                        error!("token sweeper stopped: {:#}", e);
                    }
                }),
            ));

            Some(auth)
        } else {
            None
        };

        if let Some(rbac) = &rbac_service {
            let dispatcher = Arc::new(identity_event_dispatcher(
                rbac.clone(),
                queue.publisher.clone(),
                &settings.queue.topic,
                retry_policy_from(&settings.consumer),
            ));
            let consumer = queue.consumer.clone();
            let topic = settings.queue.topic.clone();
            let group = settings.queue.consumer_group.clone();
            handles.push((
                "event consumer",
                tokio::spawn(async move {
                    if let Err(e) = consumer.run(&group, &[topic.as_str()], dispatcher).await {
                        error!("event consumer stopped: {:#}", e);
                    }
                }),
            ));
        }

        info!(?mode, tasks = handles.len(), "server started");

        Ok(Self {
            mode,
            auth_service,
            rbac_service,
            gate,
            request_timeout: Duration::from_millis(settings.http.request_timeout_ms),
            handles: Mutex::new(handles),
            cancel,
            pool: None,
        })
    }

    pub async fn shutdown(&self) {
        info!("server shutting down...");

        self.cancel.cancel();

        let handles = std::mem::take(&mut *self.handles.lock().await);
        for (name, handle) in handles {
            match tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, handle).await {
                Ok(r) => info!(task = name, "task stopped: {:?}", r),
                Err(_) => warn!(task = name, "task did not stop in time"),
            }
        }

        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}

pub fn token_codec_from(auth: &crate::settings::Auth) -> anyhow::Result<Arc<dyn TokenCodec>> {
    if auth.access_secret.is_empty() || auth.refresh_secret.is_empty() {
        return Err(anyhow!(
            "auth.access_secret and auth.refresh_secret must be set"
        ));
    }
    if auth.access_secret == auth.refresh_secret {
        warn!("access and refresh secrets are identical");
    }
    Ok(Arc::new(JwtHs256Codec::new(JwtConfig {
        access_secret: auth.access_secret.clone().into_bytes(),
        refresh_secret: auth.refresh_secret.clone().into_bytes(),
    })))
}

pub fn retry_policy_from(consumer: &crate::settings::Consumer) -> RetryPolicy {
    RetryPolicy {
        max_attempts: consumer.max_attempts.max(1),
        delay: Duration::from_millis(consumer.retry_delay_ms),
        multiplier: consumer.retry_multiplier,
    }
}

/// Routes identity events to role grants: registered users get `user`,
/// admin accounts get `admin`.
pub fn identity_event_dispatcher(
    rbac: Arc<dyn RbacService>,
    dlq_publisher: Arc<dyn EventPublisher>,
    topic: &str,
    retry: RetryPolicy,
) -> EventDispatcher {
    EventDispatcher::new(dlq_publisher, &dlq_topic_for(topic), retry)
        .register(
            EventType::UserRegistered.as_str(),
            Arc::new(RoleAssignmentHandler::new(rbac.clone(), ROLE_USER)),
        )
        .register(
            EventType::AdminUserCreated.as_str(),
            Arc::new(RoleAssignmentHandler::new(rbac, ROLE_ADMIN)),
        )
}

async fn seed_admin(
    auth: &dyn AuthService,
    users: &dyn UserRepo,
    admin: &crate::settings::Admin,
) -> anyhow::Result<()> {
    let email = admin.email.trim().to_lowercase();
    if users
        .email_exists(&email)
        .await
        .map_err(|e| anyhow!("checking admin account: {}", e))?
    {
        debug!(email = %email, "admin account already present");
        return Ok(());
    }

    match auth
        .create_admin(CreateAdminInput {
            email: email.clone(),
            username: admin.username.clone(),
            password: admin.password.clone(),
        })
        .await
    {
        Ok(user) => {
            info!(user_id = %user.id, "admin account created");
            Ok(())
        }
        Err(AuthError::EmailTaken) => Ok(()),
        Err(e) => Err(e).context("creating admin account"),
    }
}
