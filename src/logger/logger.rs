use anyhow::{Result, anyhow};
use serde::Deserialize;
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

pub struct LogConfig {
    pub filter: String,
}

pub struct Logger {
    reload_handle: reload::Handle<EnvFilter, Registry>,
}

impl Logger {
    /// Installs the global subscriber at `info`. The output format is fixed
    /// for the life of the process; the filter can be reloaded.
    pub fn new_bootstrap(format: LogFormat) -> Result<Self> {
        let filter = EnvFilter::new("info");
        let (filter, reload_handle) = reload::Layer::new(filter);

        let (text, json) = match format {
            LogFormat::Text => (Some(fmt::layer()), None),
            LogFormat::Json => (None, Some(fmt::layer().json())),
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(text)
            .with(json)
            .try_init()
            .map_err(|e| anyhow!(e))?;

        Ok(Self { reload_handle })
    }

    pub fn reload_from_config(&self, config: &LogConfig) -> Result<()> {
        let filter = EnvFilter::try_new(&config.filter).map_err(|e| anyhow!(e))?;
        self.reload_handle.reload(filter).map_err(|e| anyhow!(e))?;
        Ok(())
    }
}
