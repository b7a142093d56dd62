//! NATS JetStream implementation of the schedule bus.
//!
//! - One work-queue stream carries promoted records; each record id maps to
//!   its own subject, so deliveries for a given id stay ordered.
//! - All consumer processes share one durable pull consumer, giving
//!   consumer-group semantics; an explicit ack is the offset commit.

use crate::error::BusError;
use crate::traits::{MessageAck, ScheduleDelivery, SchedulePublisher, ScheduleSource};
use async_nats::jetstream;
use async_nats::jetstream::consumer::pull;
use async_trait::async_trait;
use futures::StreamExt;
use punctual_schedule::ScheduleRecord;

/// Stream name for promoted schedules.
const STREAM_NAME: &str = "SCHEDULED_TASKS";

/// Subject prefix; the record id is appended per message.
const SUBJECT_PREFIX: &str = "schedules.dispatch";

/// Durable consumer shared by every consumer process.
const CONSUMER_GROUP: &str = "schedule_processor_group";

/// Configuration for the NATS-backed schedule bus.
#[derive(Debug, Clone)]
pub struct NatsBusConfig {
    /// NATS server URL.
    pub url: String,
    /// Stream name (defaults to SCHEDULED_TASKS).
    pub stream_name: Option<String>,
    /// Durable consumer name (defaults to schedule_processor_group).
    pub consumer_group: Option<String>,
}

impl NatsBusConfig {
    /// Creates a new config with the given NATS URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream_name: None,
            consumer_group: None,
        }
    }

    fn stream(&self) -> &str {
        self.stream_name.as_deref().unwrap_or(STREAM_NAME)
    }

    fn group(&self) -> &str {
        self.consumer_group.as_deref().unwrap_or(CONSUMER_GROUP)
    }
}

fn subject_for(key: &str) -> String {
    format!("{SUBJECT_PREFIX}.{key}")
}

async fn ensure_stream(
    jetstream: &jetstream::Context,
    config: &NatsBusConfig,
) -> Result<jetstream::stream::Stream, BusError> {
    let stream_config = jetstream::stream::Config {
        name: config.stream().to_string(),
        subjects: vec![format!("{SUBJECT_PREFIX}.>")],
        storage: jetstream::stream::StorageType::File,
        retention: jetstream::stream::RetentionPolicy::WorkQueue,
        ..Default::default()
    };

    jetstream
        .get_or_create_stream(stream_config)
        .await
        .map_err(|e| BusError::ConnectionFailed {
            message: format!("failed to create schedule stream: {e}"),
        })
}

/// JetStream-backed publisher.
pub struct NatsSchedulePublisher {
    jetstream: jetstream::Context,
}

impl NatsSchedulePublisher {
    /// Connects and ensures the stream exists.
    ///
    /// # Errors
    ///
    /// Returns a bus error when the connection or stream setup fails.
    pub async fn connect(config: &NatsBusConfig) -> Result<Self, BusError> {
        let client =
            async_nats::connect(&config.url)
                .await
                .map_err(|e| BusError::ConnectionFailed {
                    message: e.to_string(),
                })?;

        let jetstream = jetstream::new(client);
        ensure_stream(&jetstream, config).await?;

        Ok(Self { jetstream })
    }
}

#[async_trait]
impl SchedulePublisher for NatsSchedulePublisher {
    async fn publish(&self, record: &ScheduleRecord) -> Result<(), BusError> {
        let bytes = serde_json::to_vec(record).map_err(|e| BusError::PublishFailed {
            message: format!("failed to serialize schedule: {e}"),
        })?;

        self.jetstream
            .publish(subject_for(&record.id.to_string()), bytes.into())
            .await
            .map_err(|e| BusError::PublishFailed {
                message: e.to_string(),
            })?
            .await
            .map_err(|e| BusError::PublishFailed {
                message: e.to_string(),
            })?;

        Ok(())
    }
}

struct NatsAck {
    message: jetstream::Message,
}

#[async_trait]
impl MessageAck for NatsAck {
    async fn ack(self: Box<Self>) -> Result<(), BusError> {
        self.message.ack().await.map_err(|e| BusError::AckFailed {
            message: e.to_string(),
        })
    }
}

/// JetStream-backed source: one member of the shared durable consumer.
pub struct NatsScheduleSource {
    messages: jetstream::consumer::pull::Stream,
}

impl NatsScheduleSource {
    /// Connects, ensures the stream, and joins the durable consumer group.
    ///
    /// # Errors
    ///
    /// Returns a bus error when connection, stream, or consumer setup fails.
    pub async fn connect(config: &NatsBusConfig) -> Result<Self, BusError> {
        let client =
            async_nats::connect(&config.url)
                .await
                .map_err(|e| BusError::ConnectionFailed {
                    message: e.to_string(),
                })?;

        let jetstream = jetstream::new(client);
        let stream = ensure_stream(&jetstream, config).await?;

        let consumer_config = pull::Config {
            durable_name: Some(config.group().to_string()),
            filter_subject: format!("{SUBJECT_PREFIX}.>"),
            ..Default::default()
        };

        let consumer = stream
            .get_or_create_consumer(config.group(), consumer_config)
            .await
            .map_err(|e| BusError::ConnectionFailed {
                message: format!("failed to join consumer group: {e}"),
            })?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::FetchFailed {
                message: e.to_string(),
            })?;

        Ok(Self { messages })
    }
}

#[async_trait]
impl ScheduleSource for NatsScheduleSource {
    async fn next(&mut self) -> Result<Option<ScheduleDelivery>, BusError> {
        match self.messages.next().await {
            Some(Ok(message)) => {
                let key = message
                    .subject
                    .as_str()
                    .rsplit('.')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                let payload = message.payload.to_vec();
                Ok(Some(ScheduleDelivery::new(
                    key,
                    payload,
                    Box::new(NatsAck { message }),
                )))
            }
            Some(Err(e)) => Err(BusError::FetchFailed {
                message: e.to_string(),
            }),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = NatsBusConfig::new("nats://localhost:4222");
        assert_eq!(config.stream(), STREAM_NAME);
        assert_eq!(config.group(), CONSUMER_GROUP);
    }

    #[test]
    fn config_overrides() {
        let config = NatsBusConfig {
            url: "nats://localhost:4222".to_string(),
            stream_name: Some("CUSTOM".to_string()),
            consumer_group: Some("custom_group".to_string()),
        };
        assert_eq!(config.stream(), "CUSTOM");
        assert_eq!(config.group(), "custom_group");
    }

    #[test]
    fn subject_embeds_the_key() {
        assert_eq!(
            subject_for("sch_01ARZ3NDEKTSV4RRFFQ69G5FAV"),
            "schedules.dispatch.sch_01ARZ3NDEKTSV4RRFFQ69G5FAV"
        );
    }
}
