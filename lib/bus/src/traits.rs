//! Bus abstraction for schedule promotion.
//!
//! The producer publishes claimed records keyed by id; consumer processes
//! pull them as members of a shared group and acknowledge each message only
//! after it is safely in the dispatch queue. This abstraction allows the
//! engine to be tested without a broker while still supporting the NATS
//! JetStream implementation in production.

use crate::error::BusError;
use async_trait::async_trait;
use punctual_schedule::ScheduleRecord;

/// Publishes claimed schedule records onto the bus.
#[async_trait]
pub trait SchedulePublisher: Send + Sync {
    /// Publishes one record, keyed by its id so all messages for a given
    /// record preserve ordering.
    async fn publish(&self, record: &ScheduleRecord) -> Result<(), BusError>;
}

/// Acknowledgement capability attached to a delivery.
#[async_trait]
pub trait MessageAck: Send {
    /// Commits the message (the bus-side offset advance).
    async fn ack(self: Box<Self>) -> Result<(), BusError>;
}

/// A message pulled from the bus, not yet acknowledged.
pub struct ScheduleDelivery {
    /// The message key (record id as published).
    pub key: String,
    /// The raw message payload.
    pub payload: Vec<u8>,
    acker: Box<dyn MessageAck>,
}

impl ScheduleDelivery {
    /// Wraps a payload with its acknowledgement capability.
    #[must_use]
    pub fn new(key: String, payload: Vec<u8>, acker: Box<dyn MessageAck>) -> Self {
        Self {
            key,
            payload,
            acker,
        }
    }

    /// Acknowledges the message.
    ///
    /// # Errors
    ///
    /// Returns a bus error when the commit fails; the message will then be
    /// redelivered and deduplicated downstream.
    pub async fn ack(self) -> Result<(), BusError> {
        self.acker.ack().await
    }
}

impl std::fmt::Debug for ScheduleDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleDelivery")
            .field("key", &self.key)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Pulls schedule deliveries for a consumer-group member.
#[async_trait]
pub trait ScheduleSource: Send {
    /// Returns the next delivery, or `None` when the subscription ends.
    async fn next(&mut self) -> Result<Option<ScheduleDelivery>, BusError>;
}

/// No-op acknowledgement for transports without offsets.
pub struct NoopAck;

#[async_trait]
impl MessageAck for NoopAck {
    async fn ack(self: Box<Self>) -> Result<(), BusError> {
        Ok(())
    }
}
