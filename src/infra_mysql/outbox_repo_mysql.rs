use super::util::downcast;
use crate::domain_port::*;
use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::mysql::MySqlRow;
use sqlx::types::JsonValue;
use sqlx::{Database, Decode, Encode, MySqlPool, Row, Type};
use std::str::FromStr;

impl<'r, DB: Database> Decode<'r, DB> for EventType
where
    &'r str: Decode<'r, DB>,
{
    fn decode(value: <DB as Database>::ValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<DB>>::decode(value)?;
        Ok(s.parse()?)
    }
}

impl<'q, DB: Database> Encode<'q, DB> for EventType
where
    String: Encode<'q, DB>,
{
    fn encode_by_ref(
        &self,
        buf: &mut <DB as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, BoxDynError> {
        self.as_str().to_string().encode_by_ref(buf)
    }
}

impl<DB: Database> Type<DB> for EventType
where
    String: Type<DB>,
{
    fn type_info() -> <DB as Database>::TypeInfo {
        <String as Type<DB>>::type_info()
    }
}

pub struct MySqlOutboxRepo {
    pool: MySqlPool,
}

impl MySqlOutboxRepo {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlOutboxRepo { pool }
    }

    fn row_to_item(r: &MySqlRow) -> anyhow::Result<OutboxEvent> {
        let status: String = r.try_get("status")?;
        let payload: JsonValue = r.try_get("payload")?;

        Ok(OutboxEvent {
            id: r.try_get("id")?,
            aggregate_type: r.try_get("aggregate_type")?,
            aggregate_id: r.try_get("aggregate_id")?,
            event_type: r.try_get("event_type")?,
            payload,
            status: OutboxStatus::from_str(&status)?,
            created_at: r.try_get("created_at")?,
            processed_at: r.try_get("processed_at")?,
            attempts: r.try_get("attempts")?,
            last_error: r.try_get("last_error")?,
        })
    }
}

#[async_trait::async_trait]
impl OutboxRepo for MySqlOutboxRepo {
    async fn enqueue_in_tx(
        &self,
        tx: &mut dyn StorageTx,
        event: &NewOutboxEvent,
    ) -> anyhow::Result<i64> {
        let tx = downcast(tx)?;

        let result = sqlx::query(
            r#"
INSERT INTO outbox (aggregate_type, aggregate_id, event_type, payload, status)
VALUES (?, ?, ?, ?, ?)
"#,
        )
        .bind(&event.aggregate_type)
        .bind(&event.aggregate_id)
        .bind(event.event_type)
        .bind(&event.payload)
        .bind(OutboxStatus::Pending.as_str())
        .execute(tx.conn())
        .await
        .context("inserting outbox row")?;

        Ok(result.last_insert_id() as i64)
    }

    async fn fetch_pending(&self, limit: u32) -> anyhow::Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(
            r#"
SELECT id, aggregate_type, aggregate_id, event_type, payload, status,
       created_at, processed_at, attempts, last_error
FROM outbox
WHERE status = ?
ORDER BY id ASC
LIMIT ?
"#,
        )
        .bind(OutboxStatus::Pending.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_item).collect()
    }

    async fn mark_processed(&self, id: i64, processed_at: DateTime<Utc>) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
UPDATE outbox
SET status = ?, processed_at = ?, last_error = NULL
WHERE id = ? AND status = ?
"#,
        )
        .bind(OutboxStatus::Processed.as_str())
        .bind(processed_at)
        .bind(id)
        .bind(OutboxStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_failure(&self, id: i64, last_error: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
UPDATE outbox
SET attempts = attempts + 1,
    last_error = LEFT(?, 1024)
WHERE id = ? AND status = ?
"#,
        )
        .bind(truncate_error(last_error))
        .bind(id)
        .bind(OutboxStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
