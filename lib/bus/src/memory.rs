//! In-memory schedule bus for tests.
//!
//! A bounded channel stands in for the broker; acknowledgement is a no-op
//! because the channel has no offsets to commit.

use crate::error::BusError;
use crate::traits::{NoopAck, ScheduleDelivery, SchedulePublisher, ScheduleSource};
use async_trait::async_trait;
use punctual_schedule::ScheduleRecord;
use tokio::sync::mpsc;

/// Creates a connected in-memory publisher/source pair.
#[must_use]
pub fn in_memory_bus(capacity: usize) -> (InMemorySchedulePublisher, InMemoryScheduleSource) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        InMemorySchedulePublisher { tx },
        InMemoryScheduleSource { rx },
    )
}

/// Publisher half of the in-memory bus.
#[derive(Clone)]
pub struct InMemorySchedulePublisher {
    tx: mpsc::Sender<(String, Vec<u8>)>,
}

#[async_trait]
impl SchedulePublisher for InMemorySchedulePublisher {
    async fn publish(&self, record: &ScheduleRecord) -> Result<(), BusError> {
        let bytes = serde_json::to_vec(record).map_err(|e| BusError::PublishFailed {
            message: format!("failed to serialize schedule: {e}"),
        })?;

        self.tx
            .send((record.id.to_string(), bytes))
            .await
            .map_err(|_| BusError::PublishFailed {
                message: "in-memory bus closed".to_string(),
            })
    }
}

impl InMemorySchedulePublisher {
    /// Publishes raw bytes under a key, for poison-message tests.
    ///
    /// # Errors
    ///
    /// Returns a publish error when the source half is gone.
    pub async fn publish_raw(&self, key: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.tx
            .send((key.to_string(), payload))
            .await
            .map_err(|_| BusError::PublishFailed {
                message: "in-memory bus closed".to_string(),
            })
    }
}

/// Source half of the in-memory bus.
pub struct InMemoryScheduleSource {
    rx: mpsc::Receiver<(String, Vec<u8>)>,
}

#[async_trait]
impl ScheduleSource for InMemoryScheduleSource {
    async fn next(&mut self) -> Result<Option<ScheduleDelivery>, BusError> {
        Ok(self
            .rx
            .recv()
            .await
            .map(|(key, payload)| ScheduleDelivery::new(key, payload, Box::new(NoopAck))))
    }
}
