use crate::domain_port::*;
use crate::server::{EventPublisher, QueueMessage};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const MIN_TICK: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub published: usize,
    pub failed: usize,
}

/// Relays pending outbox rows to the queue. A row is marked processed only
/// after the broker acknowledged it.
pub struct OutboxPublisher {
    outbox_repo: Arc<dyn OutboxRepo>,
    event_publisher: Arc<dyn EventPublisher>,
    topic: String,
    batch_size: u32,
    tick: Duration,
    cancellation_token: CancellationToken,
}

impl OutboxPublisher {
    pub fn new(
        outbox_repo: Arc<dyn OutboxRepo>,
        event_publisher: Arc<dyn EventPublisher>,
        topic: &str,
        batch_size: u32,
        tick: Duration,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            outbox_repo,
            event_publisher,
            topic: topic.to_owned(),
            batch_size: batch_size.max(1),
            tick: tick.max(MIN_TICK),
            cancellation_token,
        }
    }

    pub fn to_message(event: &OutboxEvent) -> anyhow::Result<QueueMessage> {
        Ok(QueueMessage {
            key: event.aggregate_id.clone(),
            event_type: event.event_type.to_string(),
            event_id: event.id.to_string(),
            payload: serde_json::to_vec(&event.payload)?,
        })
    }

    pub async fn tick_once(&self) -> anyhow::Result<TickReport> {
        let batch = self.outbox_repo.fetch_pending(self.batch_size).await?;
        let mut report = TickReport::default();

        for event in &batch {
            let published = match Self::to_message(event) {
                Ok(message) => self.event_publisher.publish(&self.topic, &message).await,
                Err(e) => Err(e),
            };

            match published {
                Ok(()) => {
                    self.outbox_repo.mark_processed(event.id, Utc::now()).await?;
                    report.published += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        outbox_id = event.id,
                        event_type = %event.event_type,
                        "publish failed: {:#}",
                        e
                    );
                    self.outbox_repo
                        .record_failure(event.id, &truncate_error(&format!("{e:#}")))
                        .await?;
                    report.failed += 1;
                }
            }
        }

        if report.published + report.failed > 0 {
            tracing::debug!(
                published = report.published,
                failed = report.failed,
                "outbox tick"
            );
        }
        Ok(report)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(topic = %self.topic, "outbox publisher started");

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    tracing::info!("outbox publisher shutting down...");
                    break;
                }
                _ = interval.tick() => {}
            }

            // A started tick runs to completion.
            if let Err(e) = self.tick_once().await {
                tracing::error!("outbox publisher error: {:#?}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_model::UserId;
    use crate::infra_memory::*;

    struct FailingPublisher;

    #[async_trait::async_trait]
    impl EventPublisher for FailingPublisher {
        async fn publish(&self, _topic: &str, _message: &QueueMessage) -> anyhow::Result<()> {
            anyhow::bail!("broker unavailable")
        }
    }

    async fn seed_events(db: &MemoryDb, repo: &MemoryOutboxRepo, n: usize) -> Vec<UserId> {
        let txm = MemoryTxManager::new(db.clone());
        let mut ids = Vec::new();
        for _ in 0..n {
            let user_id = UserId::new_v4();
            let mut tx = txm.begin().await.unwrap();
            repo.enqueue_in_tx(
                &mut *tx,
                &NewOutboxEvent::for_user(user_id, EventType::UserRegistered).unwrap(),
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
            ids.push(user_id);
        }
        ids
    }

    #[tokio::test]
    async fn tick_publishes_in_id_order_and_marks_processed() {
        let db = MemoryDb::new();
        let repo = Arc::new(MemoryOutboxRepo::new(db.clone()));
        let users = seed_events(&db, &repo, 3).await;

        let broker = Arc::new(crate::server::MemoryBroker::new(CancellationToken::new()));
        let publisher = OutboxPublisher::new(
            repo.clone(),
            broker.clone(),
            "identity.events",
            100,
            Duration::from_millis(10),
            CancellationToken::new(),
        );

        let report = publisher.tick_once().await.unwrap();
        assert_eq!(report, TickReport { published: 3, failed: 0 });

        let queued = broker.peek_all("identity.events");
        let keys: Vec<String> = queued.iter().map(|m| m.key.clone()).collect();
        let expected: Vec<String> = users.iter().map(|u| u.to_string()).collect();
        assert_eq!(keys, expected);
        assert!(queued.iter().all(|m| m.event_type == "UserRegistered"));

        let body: UserEventPayload = serde_json::from_slice(&queued[0].payload).unwrap();
        assert_eq!(body.user_id, users[0]);

        assert!(repo.fetch_pending(100).await.unwrap().is_empty());
        let second = publisher.tick_once().await.unwrap();
        assert_eq!(second, TickReport::default());
    }

    #[tokio::test]
    async fn failed_publish_leaves_row_pending_with_error() {
        let db = MemoryDb::new();
        let repo = Arc::new(MemoryOutboxRepo::new(db.clone()));
        seed_events(&db, &repo, 1).await;

        let publisher = OutboxPublisher::new(
            repo.clone(),
            Arc::new(FailingPublisher),
            "identity.events",
            100,
            Duration::from_millis(10),
            CancellationToken::new(),
        );

        let report = publisher.tick_once().await.unwrap();
        assert_eq!(report, TickReport { published: 0, failed: 1 });

        let pending = repo.fetch_pending(100).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, OutboxStatus::Pending);
        assert_eq!(pending[0].attempts, 1);
        assert!(
            pending[0]
                .last_error
                .as_deref()
                .unwrap()
                .contains("broker unavailable")
        );
    }

    #[tokio::test]
    async fn batch_size_bounds_one_tick() {
        let db = MemoryDb::new();
        let repo = Arc::new(MemoryOutboxRepo::new(db.clone()));
        seed_events(&db, &repo, 5).await;

        let broker = Arc::new(crate::server::MemoryBroker::new(CancellationToken::new()));
        let publisher = OutboxPublisher::new(
            repo.clone(),
            broker.clone(),
            "identity.events",
            2,
            Duration::from_millis(10),
            CancellationToken::new(),
        );

        assert_eq!(publisher.tick_once().await.unwrap().published, 2);
        assert_eq!(repo.fetch_pending(100).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let db = MemoryDb::new();
        let repo = Arc::new(MemoryOutboxRepo::new(db.clone()));
        let cancel = CancellationToken::new();
        let publisher = OutboxPublisher::new(
            repo,
            Arc::new(FailingPublisher),
            "identity.events",
            10,
            Duration::from_millis(5),
            cancel.clone(),
        );

        let handle = tokio::spawn(async move { publisher.run().await });
        cancel.cancel();
        let joined = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(matches!(joined, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn zero_tick_still_relays() {
        let db = MemoryDb::new();
        let repo = Arc::new(MemoryOutboxRepo::new(db.clone()));
        seed_events(&db, &repo, 2).await;

        let broker = Arc::new(crate::server::MemoryBroker::new(CancellationToken::new()));
        let cancel = CancellationToken::new();
        let publisher = OutboxPublisher::new(
            repo.clone(),
            broker.clone(),
            "identity.events",
            10,
            Duration::ZERO,
            cancel.clone(),
        );
        let handle = tokio::spawn(async move { publisher.run().await });

        tokio::time::timeout(Duration::from_secs(5), async {
            while !repo.fetch_pending(10).await.unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(broker.peek_all("identity.events").len(), 2);

        cancel.cancel();
        let joined = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(matches!(joined, Ok(Ok(Ok(())))));
    }
}
