use crate::application_port::AuthService;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Periodically prunes refresh tokens past their expiry.
pub struct TokenSweeper {
    auth_service: Arc<dyn AuthService>,
    period: Duration,
    cancellation_token: CancellationToken,
}

impl TokenSweeper {
    pub fn new(
        auth_service: Arc<dyn AuthService>,
        period: Duration,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            auth_service,
            period,
            cancellation_token,
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(period = ?self.period, "token sweeper started");

        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    tracing::info!("token sweeper shutting down...");
                    break;
                }
                _ = interval.tick() => {}
            }

            match self.auth_service.clean_expired_tokens().await {
                Ok(0) => {}
                Ok(n) => tracing::info!(deleted = n, "expired refresh tokens removed"),
                Err(e) => tracing::error!("token sweep failed: {}", e),
            }
        }
        Ok(())
    }
}
