//! # harness-broker
//!
//! The narrow broker surface the harness drives, plus two backends.
//!
//! The harness never implements delivery guarantees itself. It sends,
//! receives with a timeout, and acknowledges or releases what it received;
//! everything else (durability, redelivery, ordering across restarts) is the
//! backend's business.
//!
//! ## Design
//!
//! - [`Broker::send`] enqueues with auto-commit
//! - [`Broker::begin`] opens an exclusive [`TransactedSession`] whose sends
//!   become visible together on commit
//! - [`Broker::receive`] hands out a [`Delivery`] that stays in flight until
//!   [`Broker::ack`] or [`Broker::release`]
//!
//! ## Backends
//!
//! - [`MemoryBroker`] - in-process queues with failure injection, for tests
//! - [`SqliteBroker`] - durable queues in a SQLite file, so a crashed harness
//!   leaves its in-flight work behind for the next run

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod memory;
mod sqlite;

pub use error::{BrokerError, BrokerResult};
pub use memory::MemoryBroker;
pub use sqlite::SqliteBroker;

use async_trait::async_trait;
use harness_types::{Message, QueueName};
use std::time::Duration;

/// A message handed out by a broker, awaiting ack or release.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Queue the message was received from.
    pub queue: QueueName,
    /// The message itself.
    pub message: Message,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_count: u32,
    /// Backend-specific handle used by ack and release.
    ///
    /// Together with `delivery_count` it names one claim: once a lease has
    /// expired and the message was handed out again, ack and release from
    /// the earlier holder fail with [`BrokerError::UnknownDelivery`].
    pub receipt: u64,
}

impl Delivery {
    /// True if this message was handed out before and not acknowledged.
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

/// Broker operations used by the driver and the relay.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Enqueue one message (auto-commit).
    async fn send(&self, queue: &QueueName, message: Message) -> BrokerResult<()>;

    /// Open an exclusive transactional session.
    async fn begin(&self) -> BrokerResult<Box<dyn TransactedSession>>;

    /// Wait up to `timeout` for a message.
    ///
    /// Returns `Ok(None)` when the timeout expires.
    async fn receive(&self, queue: &QueueName, timeout: Duration)
        -> BrokerResult<Option<Delivery>>;

    /// Permanently remove a delivered message.
    async fn ack(&self, delivery: &Delivery) -> BrokerResult<()>;

    /// Return a delivered message to its queue for redelivery.
    async fn release(&self, delivery: &Delivery) -> BrokerResult<()>;

    /// Number of messages held for a queue, ready and in flight.
    async fn depth(&self, queue: &QueueName) -> BrokerResult<u64>;

    /// Receive and immediately acknowledge (automatic acknowledgment).
    async fn consume(&self, queue: &QueueName, timeout: Duration) -> BrokerResult<Option<Message>> {
        match self.receive(queue, timeout).await? {
            Some(delivery) => {
                self.ack(&delivery).await?;
                Ok(Some(delivery.message))
            }
            None => Ok(None),
        }
    }
}

/// A transactional producer session.
///
/// Sends are invisible to consumers until [`commit`](Self::commit).
/// Dropping the session without committing discards them.
#[async_trait]
pub trait TransactedSession: Send {
    /// Stage a message for the given queue.
    async fn send(&mut self, queue: &QueueName, message: Message) -> BrokerResult<()>;

    /// Make every staged message visible at once.
    async fn commit(self: Box<Self>) -> BrokerResult<()>;

    /// Discard every staged message.
    async fn rollback(self: Box<Self>) -> BrokerResult<()>;
}
