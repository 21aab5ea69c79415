use crate::server::EventDispatcher;
use std::sync::Arc;

/// One message on the event queue. The payload is opaque JSON bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Partition key, the aggregate id.
    pub key: String,
    pub event_type: String,
    pub event_id: String,
    pub payload: Vec<u8>,
}

pub const HEADER_EVENT_TYPE: &str = "event_type";
pub const HEADER_EVENT_ID: &str = "event_id";

pub fn dlq_topic_for(topic: &str) -> String {
    format!("{}.dlq", topic)
}

#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    /// Resolves once the broker has acknowledged the message.
    async fn publish(&self, topic: &str, message: &QueueMessage) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
pub trait EventConsumer: Send + Sync {
    /// Consumes until cancelled. A message is acknowledged only after the
    /// dispatcher returns `Ok`.
    async fn run(
        &self,
        consumer_group_id: &str,
        topics: &[&str],
        dispatcher: Arc<EventDispatcher>,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    /// The message can never succeed; retrying is pointless.
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error(transparent)]
    Transient(#[from] anyhow::Error),
}

#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// Must be idempotent: the same message may be delivered more than once.
    async fn handle(&self, message: &QueueMessage) -> Result<(), HandleError>;
}
