use crate::server::{
    EventConsumer, EventDispatcher, HEADER_EVENT_ID, HEADER_EVENT_TYPE, QueueMessage,
    dlq_topic_for,
};
use futures_util::StreamExt;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication, TopicResult};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers};
use rdkafka::{ClientConfig, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// An existing topic is fine; any other per-topic failure is an error.
fn check_topic_results(results: Vec<TopicResult>) -> anyhow::Result<()> {
    let mut failed = Vec::new();
    for result in results {
        match result {
            Ok(topic) => tracing::info!(%topic, "topic created"),
            Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                tracing::debug!(%topic, "topic already exists")
            }
            Err((topic, code)) => {
                tracing::error!(%topic, ?code, "topic creation failed");
                failed.push(format!("{}: {}", topic, code));
            }
        }
    }
    if !failed.is_empty() {
        anyhow::bail!("creating topics failed: {}", failed.join(", "));
    }
    Ok(())
}

pub struct KafkaConsumer {
    bootstrap_server: String,
    client_id: String,
    cancellation_token: CancellationToken,
    redelivery_pause: Duration,
}

impl KafkaConsumer {
    pub fn new(
        bootstrap_server: &str,
        client_id: &str,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            bootstrap_server: bootstrap_server.to_string(),
            client_id: client_id.to_string(),
            cancellation_token,
            redelivery_pause: Duration::from_secs(1),
        }
    }

    async fn ensure_topics(bootstrap: &str, topics: &[&str]) -> anyhow::Result<()> {
        let admin: AdminClient<_> = ClientConfig::new()
            .set("bootstrap.servers", bootstrap)
            .create()?;

        let mut names: Vec<String> = Vec::with_capacity(topics.len() * 2);
        for t in topics {
            names.push(t.to_string());
            names.push(dlq_topic_for(t));
        }
        let new_topics: Vec<_> = names
            .iter()
            .map(|t| NewTopic::new(t, 1, TopicReplication::Fixed(1)))
            .collect();

        let results = admin
            .create_topics(&new_topics, &AdminOptions::new())
            .await?;

        check_topic_results(results)
    }

    fn to_queue_message(m: &BorrowedMessage<'_>) -> QueueMessage {
        let mut event_type = String::new();
        let mut event_id = String::new();
        if let Some(headers) = m.headers() {
            for h in headers.iter() {
                let value = h
                    .value
                    .map(|v| String::from_utf8_lossy(v).into_owned())
                    .unwrap_or_default();
                match h.key {
                    HEADER_EVENT_TYPE => event_type = value,
                    HEADER_EVENT_ID => event_id = value,
                    _ => {}
                }
            }
        }

        QueueMessage {
            key: m
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned())
                .unwrap_or_default(),
            event_type,
            event_id,
            payload: m.payload().unwrap_or(&[]).to_vec(),
        }
    }
}

#[async_trait::async_trait]
impl EventConsumer for KafkaConsumer {
    async fn run(
        &self,
        consumer_group_id: &str,
        topics: &[&str],
        dispatcher: Arc<EventDispatcher>,
    ) -> anyhow::Result<()> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.bootstrap_server)
            .set("client.id", &self.client_id)
            .set("group.id", consumer_group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;

        Self::ensure_topics(&self.bootstrap_server, topics).await?;
        consumer.subscribe(topics)?;

        let mut stream = consumer.stream();

        'consume: loop {
            let result = tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    tracing::info!("Kafka consumer shutting down...");
                    break;
                }
                msg = stream.next() => msg,
            };

            let Some(message) = result else {
                tracing::error!("Kafka consumer stream terminated");
                break;
            };

            let m = match message {
                Ok(m) => m,
                Err(e) => {
                    // broker hiccup
                    tracing::warn!(error = ?e, "consumer poll error");
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    continue;
                }
            };

            let queue_message = Self::to_queue_message(&m);

            // Only an acked dispatch may advance the offset.
            loop {
                match dispatcher.dispatch(&queue_message).await {
                    Ok(_) => break,
                    Err(e) => {
                        tracing::error!(
                            error = ?e,
                            event_id = %queue_message.event_id,
                            "dispatch failed; redelivering"
                        );
                        tokio::select! {
                            biased;
                            _ = self.cancellation_token.cancelled() => break 'consume,
                            _ = tokio::time::sleep(self.redelivery_pause) => {}
                        }
                    }
                }
            }

            if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                tracing::warn!(error = ?e, "commit failed but ignored");
            }
        }

        drop(stream);
        consumer.unsubscribe();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_topics_are_accepted() {
        let results = vec![
            Ok("identity.events".to_string()),
            Err((
                "identity.events.dlq".to_string(),
                RDKafkaErrorCode::TopicAlreadyExists,
            )),
        ];
        assert!(check_topic_results(results).is_ok());
    }

    #[test]
    fn other_topic_errors_are_reported() {
        let results = vec![
            Err((
                "identity.events".to_string(),
                RDKafkaErrorCode::TopicAlreadyExists,
            )),
            Err((
                "identity.events.dlq".to_string(),
                RDKafkaErrorCode::TopicAuthorizationFailed,
            )),
        ];
        let err = check_topic_results(results).unwrap_err();
        assert!(err.to_string().contains("identity.events.dlq"), "{}", err);
        assert!(!err.to_string().contains("identity.events:"), "{}", err);
    }
}
