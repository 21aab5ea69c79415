use crate::domain_model::*;
use crate::domain_port::repo_tx::StorageTx;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const AGGREGATE_USER: &str = "User";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    UserRegistered,
    AdminUserCreated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserRegistered => "UserRegistered",
            EventType::AdminUserCreated => "AdminUserCreated",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "UserRegistered" => Ok(Self::UserRegistered),
            "AdminUserCreated" => Ok(Self::AdminUserCreated),
            _ => anyhow::bail!("unknown event type: {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Processed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processed => "processed",
        }
    }
}

impl FromStr for OutboxStatus {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processed" => Ok(Self::Processed),
            _ => anyhow::bail!("unknown outbox status: {}", s),
        }
    }
}

/// Body of every identity event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEventPayload {
    pub user_id: UserId,
}

#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: EventType,
    pub payload: serde_json::Value,
}

impl NewOutboxEvent {
    pub fn new<T: Serialize>(
        aggregate_type: &str,
        aggregate_id: String,
        event_type: EventType,
        payload: &T,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            aggregate_type: aggregate_type.to_owned(),
            aggregate_id,
            event_type,
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn for_user(user_id: UserId, event_type: EventType) -> anyhow::Result<Self> {
        Self::new(
            AGGREGATE_USER,
            user_id.to_string(),
            event_type,
            &UserEventPayload { user_id },
        )
    }
}

#[derive(Debug, Clone)]
pub struct OutboxEvent {
    pub id: i64,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

#[async_trait::async_trait]
pub trait OutboxRepo: Send + Sync {
    /// Returns the id assigned to the new row.
    async fn enqueue_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        event: &NewOutboxEvent,
    ) -> anyhow::Result<i64>;

    /// Pending rows in ascending id order.
    async fn fetch_pending(&self, limit: u32) -> anyhow::Result<Vec<OutboxEvent>>;

    /// No-op for rows that are already processed. Returns whether the row changed.
    async fn mark_processed(&self, id: i64, processed_at: DateTime<Utc>) -> anyhow::Result<bool>;

    async fn record_failure(&self, id: i64, last_error: &str) -> anyhow::Result<()>;
}

pub const LAST_ERROR_MAX_LEN: usize = 1024;

pub fn truncate_error(err: &str) -> String {
    err.chars().take(LAST_ERROR_MAX_LEN).collect()
}
