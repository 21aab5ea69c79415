use crate::server::{EventPublisher, HEADER_EVENT_ID, HEADER_EVENT_TYPE, QueueMessage};
use rdkafka::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;

pub struct KafkaPublisher {
    inner: FutureProducer,
    delivery_timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(
        bootstrap_server: &str,
        client_id: &str,
        delivery_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let inner = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_server)
            .set("client.id", client_id)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("max.in.flight.requests.per.connection", "1")
            .set("message.timeout.ms", delivery_timeout.as_millis().to_string())
            .set("compression.type", "lz4")
            .create()?;
        Ok(Self {
            inner,
            delivery_timeout,
        })
    }
}

#[async_trait::async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, topic: &str, message: &QueueMessage) -> anyhow::Result<()> {
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: HEADER_EVENT_TYPE,
                value: Some(message.event_type.as_bytes()),
            })
            .insert(Header {
                key: HEADER_EVENT_ID,
                value: Some(message.event_id.as_bytes()),
            });

        let rec = FutureRecord::to(topic)
            .key(message.key.as_bytes())
            .payload(message.payload.as_slice())
            .headers(headers);

        self.inner
            .send(rec, self.delivery_timeout)
            .await
            .map(|_delivery_report| ())
            .map_err(|(e, _msg)| anyhow::anyhow!(e))
    }
}
