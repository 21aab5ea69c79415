use crate::server::{EventHandler, EventPublisher, HandleError, QueueMessage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    /// 1.0 keeps the delay fixed.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
            multiplier: 1.0,
        }
    }
}

/// Upper bound for a single backoff pause.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

impl RetryPolicy {
    /// Pause before attempt `failed + 1`, given `failed` failures so far.
    /// Saturates at [`MAX_RETRY_DELAY`].
    pub fn delay_after(&self, failed: u32) -> Duration {
        if self.delay.is_zero() {
            return Duration::ZERO;
        }
        let exp = failed.saturating_sub(1).min(i32::MAX as u32) as i32;
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        let secs = self.delay.as_secs_f64() * multiplier.powi(exp);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled { attempts: u32 },
    DeadLettered { attempts: u32 },
    UnknownType,
}

/// Routes messages by event type, retrying failed handlers and dead-lettering
/// messages that keep failing.
pub struct EventDispatcher {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    dlq_publisher: Arc<dyn EventPublisher>,
    dlq_topic: String,
    retry: RetryPolicy,
}

impl EventDispatcher {
    pub fn new(dlq_publisher: Arc<dyn EventPublisher>, dlq_topic: &str, retry: RetryPolicy) -> Self {
        Self {
            handlers: HashMap::new(),
            dlq_publisher,
            dlq_topic: dlq_topic.to_owned(),
            retry,
        }
    }

    pub fn register(mut self, event_type: &str, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(event_type.to_owned(), handler);
        self
    }

    /// `Ok` means the message may be acknowledged. `Err` means it could not be
    /// handled or dead-lettered and must be redelivered.
    pub async fn dispatch(&self, message: &QueueMessage) -> anyhow::Result<DispatchOutcome> {
        let Some(handler) = self.handlers.get(&message.event_type) else {
            warn!(
                event_type = %message.event_type,
                event_id = %message.event_id,
                "no handler for event type, acking"
            );
            return Ok(DispatchOutcome::UnknownType);
        };

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempts = 0;
        let last_error = loop {
            attempts += 1;
            match handler.handle(message).await {
                Ok(()) => {
                    info!(
                        event_type = %message.event_type,
                        event_id = %message.event_id,
                        attempts,
                        "event handled"
                    );
                    return Ok(DispatchOutcome::Handled { attempts });
                }
                Err(HandleError::Malformed(reason)) => break reason,
                Err(HandleError::Transient(e)) => {
                    warn!(
                        event_type = %message.event_type,
                        event_id = %message.event_id,
                        attempts,
                        "handler failed: {:#}",
                        e
                    );
                    if attempts >= max_attempts {
                        break format!("{:#}", e);
                    }
                    tokio::time::sleep(self.retry.delay_after(attempts)).await;
                }
            }
        };

        self.dlq_publisher
            .publish(&self.dlq_topic, message)
            .await
            .map_err(|e| {
                error!(
                    event_type = %message.event_type,
                    event_id = %message.event_id,
                    "dead-letter publish failed: {:#}",
                    e
                );
                e
            })?;

        error!(
            event_type = %message.event_type,
            event_id = %message.event_id,
            attempts,
            dlq = %self.dlq_topic,
            "event dead-lettered: {}",
            last_error
        );
        Ok(DispatchOutcome::DeadLettered { attempts })
    }
}
