use crate::server::{EventConsumer, EventDispatcher, EventPublisher, QueueMessage};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// In-process broker with per-topic FIFO queues. Consumer groups are ignored:
/// every running consumer competes for the same queues.
pub struct MemoryBroker {
    topics: Mutex<HashMap<String, VecDeque<QueueMessage>>>,
    notify: Notify,
    cancellation_token: CancellationToken,
    redelivery_pause: Duration,
}

impl MemoryBroker {
    pub fn new(cancellation_token: CancellationToken) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            cancellation_token,
            redelivery_pause: Duration::from_millis(200),
        }
    }

    pub fn with_redelivery_pause(mut self, pause: Duration) -> Self {
        self.redelivery_pause = pause;
        self
    }

    fn with_topics<R>(&self, f: impl FnOnce(&mut HashMap<String, VecDeque<QueueMessage>>) -> R) -> R {
        let mut guard = self
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    pub fn len(&self, topic: &str) -> usize {
        self.with_topics(|t| t.get(topic).map_or(0, VecDeque::len))
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    /// Copies of the queued messages, oldest first.
    pub fn peek_all(&self, topic: &str) -> Vec<QueueMessage> {
        self.with_topics(|t| {
            t.get(topic)
                .map(|q| q.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    pub fn drain(&self, topic: &str) -> Vec<QueueMessage> {
        self.with_topics(|t| {
            t.get_mut(topic)
                .map(|q| q.drain(..).collect())
                .unwrap_or_default()
        })
    }

    fn front(&self, topics: &[&str]) -> Option<(String, QueueMessage)> {
        self.with_topics(|t| {
            topics.iter().find_map(|topic| {
                t.get(*topic)
                    .and_then(|q| q.front())
                    .map(|m| (topic.to_string(), m.clone()))
            })
        })
    }

    fn ack(&self, topic: &str, message: &QueueMessage) {
        self.with_topics(|t| {
            if let Some(q) = t.get_mut(topic) {
                if q.front() == Some(message) {
                    q.pop_front();
                }
            }
        })
    }

    /// Dispatches whatever is queued right now and returns how many messages
    /// were acknowledged. Stops at the first message that cannot be acked.
    pub async fn consume_pending(
        &self,
        topics: &[&str],
        dispatcher: &EventDispatcher,
    ) -> anyhow::Result<usize> {
        let mut acked = 0;
        while let Some((topic, message)) = self.front(topics) {
            dispatcher.dispatch(&message).await?;
            self.ack(&topic, &message);
            acked += 1;
        }
        Ok(acked)
    }
}

#[async_trait::async_trait]
impl EventPublisher for MemoryBroker {
    async fn publish(&self, topic: &str, message: &QueueMessage) -> anyhow::Result<()> {
        self.with_topics(|t| {
            t.entry(topic.to_owned())
                .or_default()
                .push_back(message.clone())
        });
        self.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventConsumer for MemoryBroker {
    async fn run(
        &self,
        consumer_group_id: &str,
        topics: &[&str],
        dispatcher: Arc<EventDispatcher>,
    ) -> anyhow::Result<()> {
        tracing::info!(group = consumer_group_id, ?topics, "memory consumer started");

        while !self.cancellation_token.is_cancelled() {
            let notified = self.notify.notified();

            if let Some((topic, message)) = self.front(topics) {
                match dispatcher.dispatch(&message).await {
                    Ok(_) => self.ack(&topic, &message),
                    Err(e) => {
                        tracing::error!(error = ?e, "dispatch failed; redelivering");
                        tokio::select! {
                            biased;
                            _ = self.cancellation_token.cancelled() => break,
                            _ = tokio::time::sleep(self.redelivery_pause) => {}
                        }
                    }
                }
                continue;
            }

            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => break,
                _ = notified => {}
            }
        }

        tracing::info!(group = consumer_group_id, "memory consumer shutting down...");
        Ok(())
    }
}
