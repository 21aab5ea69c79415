use super::db::{MemoryDb, downcast};
use crate::domain_port::*;
use chrono::{DateTime, Utc};

pub struct MemoryOutboxRepo {
    db: MemoryDb,
}

impl MemoryOutboxRepo {
    pub fn new(db: MemoryDb) -> Self {
        MemoryOutboxRepo { db }
    }

    /// Every row, pending or not, for assertions in tests and tooling.
    pub async fn snapshot(&self) -> Vec<OutboxEvent> {
        self.db.read(|t| t.outbox.values().cloned().collect()).await
    }
}

#[async_trait::async_trait]
impl OutboxRepo for MemoryOutboxRepo {
    async fn enqueue_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        event: &NewOutboxEvent,
    ) -> anyhow::Result<i64> {
        let tables = downcast(tx)?;
        tables.next_outbox_id += 1;
        let id = tables.next_outbox_id;
        tables.outbox.insert(
            id,
            OutboxEvent {
                id,
                aggregate_type: event.aggregate_type.clone(),
                aggregate_id: event.aggregate_id.clone(),
                event_type: event.event_type,
                payload: event.payload.clone(),
                status: OutboxStatus::Pending,
                created_at: Utc::now(),
                processed_at: None,
                attempts: 0,
                last_error: None,
            },
        );
        Ok(id)
    }

    async fn fetch_pending(&self, limit: u32) -> anyhow::Result<Vec<OutboxEvent>> {
        Ok(self
            .db
            .read(|t| {
                t.outbox
                    .values()
                    .filter(|e| e.status == OutboxStatus::Pending)
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn mark_processed(&self, id: i64, processed_at: DateTime<Utc>) -> anyhow::Result<bool> {
        Ok(self
            .db
            .write(|t| match t.outbox.get_mut(&id) {
                Some(e) if e.status == OutboxStatus::Pending => {
                    e.status = OutboxStatus::Processed;
                    e.processed_at = Some(processed_at);
                    e.last_error = None;
                    true
                }
                _ => false,
            })
            .await)
    }

    async fn record_failure(&self, id: i64, last_error: &str) -> anyhow::Result<()> {
        let last_error = truncate_error(last_error);
        self.db
            .write(|t| {
                if let Some(e) = t.outbox.get_mut(&id) {
                    e.attempts += 1;
                    e.last_error = Some(last_error);
                }
            })
            .await;
        Ok(())
    }
}
