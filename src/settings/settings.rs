use crate::logger::LogFormat;
use anyhow::{Result, anyhow, bail};
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub queue: Queue,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub outbox: Outbox,
    #[serde(default)]
    pub consumer: Consumer,
    /// Admin account created at startup if its email is not yet registered.
    #[serde(default)]
    pub admin: Option<Admin>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Http {
    pub address: String,
    pub request_timeout_ms: u64,
    pub tls: Option<Tls>,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            request_timeout_ms: 10_000,
            tls: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tls {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Log {
    pub filter: String,
    pub format: LogFormat,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Mysql,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Storage {
    pub backend: StorageBackend,
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    pub run_migrations: bool,
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            database_url: String::new(),
            max_connections: 10,
            acquire_timeout_ms: 5_000,
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Memory,
    Kafka,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Queue {
    pub backend: QueueBackend,
    pub brokers: String,
    pub topic: String,
    pub client_id: String,
    pub consumer_group: String,
    pub delivery_timeout_ms: u64,
}

impl Default for Queue {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            brokers: "localhost:9092".to_string(),
            topic: "identity.events".to_string(),
            client_id: "turnstile".to_string(),
            consumer_group: "turnstile-rbac".to_string(),
            delivery_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Auth {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub min_password_len: usize,
    pub sweep_interval_secs: u64,
    /// Base URL of the RBAC service API, used by a standalone user service.
    pub rbac_url: String,
    pub rbac_timeout_ms: u64,
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            access_secret: String::new(),
            refresh_secret: String::new(),
            access_ttl_secs: 15 * 60,
            refresh_ttl_secs: 7 * 24 * 60 * 60,
            min_password_len: 8,
            sweep_interval_secs: 24 * 60 * 60,
            rbac_url: "http://127.0.0.1:8081/api/v1".to_string(),
            rbac_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Outbox {
    pub tick_ms: u64,
    pub batch_size: u32,
}

impl Default for Outbox {
    fn default() -> Self {
        Self {
            tick_ms: 1_000,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Consumer {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub retry_multiplier: f64,
}

impl Default for Consumer {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay_ms: 1_000,
            retry_multiplier: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Admin {
    pub email: String,
    pub username: String,
    pub password: String,
}

impl Settings {
    /// Rejects values the background tasks and the request deadline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.http.request_timeout_ms == 0 {
            bail!("http.request_timeout_ms must be greater than 0");
        }
        if self.outbox.tick_ms == 0 {
            bail!("outbox.tick_ms must be greater than 0");
        }
        if self.auth.sweep_interval_secs == 0 {
            bail!("auth.sweep_interval_secs must be greater than 0");
        }
        let multiplier = self.consumer.retry_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            bail!(
                "consumer.retry_multiplier must be a finite number >= 1.0, got {}",
                multiplier
            );
        }
        Ok(())
    }
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

const ENV_PREFIX: &str = "TURNSTILE";

/// Reads the TOML file, then applies `TURNSTILE__SECTION__KEY` overrides.
pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;
    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_fall_back_to_defaults() {
        let settings: Settings = Config::builder()
            .add_source(config::File::from_str(
                r#"
[auth]
access_secret = "a"
refresh_secret = "r"

[queue]
topic = "custom.events"
"#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.auth.access_secret, "a");
        assert_eq!(settings.auth.access_ttl_secs, 900);
        assert_eq!(settings.queue.topic, "custom.events");
        assert_eq!(settings.queue.backend, QueueBackend::Memory);
        assert_eq!(settings.storage.backend, StorageBackend::Memory);
        assert_eq!(settings.outbox.batch_size, 100);
        assert_eq!(settings.consumer.max_attempts, 5);
        assert_eq!(settings.http.request_timeout_ms, 10_000);
        assert!(settings.admin.is_none());
    }

    #[test]
    fn backends_parse_lowercase() {
        let settings: Settings = Config::builder()
            .add_source(config::File::from_str(
                r#"
[storage]
backend = "mysql"
database_url = "mysql://localhost/turnstile"

[queue]
backend = "kafka"

[log]
format = "json"
"#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.storage.backend, StorageBackend::Mysql);
        assert_eq!(settings.queue.backend, QueueBackend::Kafka);
        assert_eq!(settings.log.format, LogFormat::Json);
    }

    fn from_toml(toml: &str) -> Settings {
        Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn zero_intervals_and_bad_multipliers_are_rejected() {
        for toml in [
            "[outbox]\ntick_ms = 0",
            "[http]\nrequest_timeout_ms = 0",
            "[auth]\nsweep_interval_secs = 0",
            "[consumer]\nretry_multiplier = 0.5",
            "[consumer]\nretry_multiplier = inf",
            "[consumer]\nretry_multiplier = nan",
        ] {
            let err = from_toml(toml).validate().unwrap_err();
            assert!(err.to_string().contains("must be"), "{}: {}", toml, err);
        }
    }
}
