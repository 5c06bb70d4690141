//! In-process broker for tests and throwaway runs.
//!
//! FIFO queues held in memory. Nothing survives the process, so a forced
//! crash loses every message; use [`SqliteBroker`](crate::SqliteBroker) when
//! recovery has to be observed. Failure injection mirrors a mock transport:
//! the next send, commit or receive can be told to fail once.

use crate::{Broker, BrokerError, BrokerResult, Delivery, TransactedSession};
use async_trait::async_trait;
use dashmap::DashMap;
use harness_types::{Message, QueueName};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// In-memory broker.
///
/// Cloning shares the same queues.
#[derive(Debug, Default, Clone)]
pub struct MemoryBroker {
    inner: Arc<MemoryBrokerInner>,
}

#[derive(Debug, Default)]
struct MemoryBrokerInner {
    queues: DashMap<QueueName, Arc<QueueState>>,
    next_receipt: AtomicU64,
    failures: Mutex<FailurePlan>,
}

#[derive(Debug, Default)]
struct FailurePlan {
    next_send: Option<String>,
    next_commit: Option<String>,
    next_receive: Option<String>,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: Mutex<QueueEntries>,
    available: Notify,
}

#[derive(Debug, Default)]
struct QueueEntries {
    ready: VecDeque<Stored>,
    in_flight: HashMap<u64, Stored>,
}

#[derive(Debug, Clone)]
struct Stored {
    message: Message,
    delivery_count: u32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cause the next send (plain or transacted) to fail with the given reason.
    pub fn fail_next_send(&self, reason: &str) {
        lock(&self.inner.failures).next_send = Some(reason.to_string());
    }

    /// Cause the next transaction commit to fail with the given reason.
    pub fn fail_next_commit(&self, reason: &str) {
        lock(&self.inner.failures).next_commit = Some(reason.to_string());
    }

    /// Cause the next receive to fail with the given reason.
    pub fn fail_next_receive(&self, reason: &str) {
        lock(&self.inner.failures).next_receive = Some(reason.to_string());
    }

    /// Number of deliveries handed out and not yet acked or released.
    pub fn in_flight_count(&self, queue: &QueueName) -> usize {
        self.existing(queue).map_or(0, |state| {
            let entries = lock(&state.entries);
            entries.in_flight.len()
        })
    }

    fn queue(&self, name: &QueueName) -> Arc<QueueState> {
        let entry = self.inner.queues.entry(name.clone()).or_default();
        Arc::clone(&*entry)
    }

    /// Look up a queue without registering it.
    fn existing(&self, name: &QueueName) -> Option<Arc<QueueState>> {
        self.inner.queues.get(name).map(|entry| Arc::clone(&*entry))
    }

    fn take_send_failure(&self) -> Option<String> {
        lock(&self.inner.failures).next_send.take()
    }

    fn enqueue_all(&self, queue: &QueueName, messages: Vec<Message>) {
        let state = self.queue(queue);
        let count = messages.len();
        {
            let mut entries = lock(&state.entries);
            entries.ready.extend(messages.into_iter().map(|message| Stored {
                message,
                delivery_count: 0,
            }));
        }
        for _ in 0..count {
            state.available.notify_one();
        }
    }

    fn try_claim(&self, queue: &QueueName, state: &QueueState) -> Option<Delivery> {
        let mut entries = lock(&state.entries);
        let mut stored = entries.ready.pop_front()?;
        stored.delivery_count += 1;

        let receipt = self.inner.next_receipt.fetch_add(1, Ordering::Relaxed) + 1;
        entries.in_flight.insert(receipt, stored.clone());

        Some(Delivery {
            queue: queue.clone(),
            message: stored.message,
            delivery_count: stored.delivery_count,
            receipt,
        })
    }

    fn take_in_flight(&self, delivery: &Delivery) -> BrokerResult<(Arc<QueueState>, Stored)> {
        let taken = self.existing(&delivery.queue).and_then(|state| {
            let stored = lock(&state.entries).in_flight.remove(&delivery.receipt);
            stored.map(|stored| (state, stored))
        });
        match taken {
            Some(taken) => Ok(taken),
            None => Err(BrokerError::UnknownDelivery {
                queue: delivery.queue.to_string(),
                receipt: delivery.receipt,
            }),
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn send(&self, queue: &QueueName, message: Message) -> BrokerResult<()> {
        if let Some(reason) = self.take_send_failure() {
            return Err(BrokerError::SendFailed(reason));
        }
        self.enqueue_all(queue, vec![message]);
        Ok(())
    }

    async fn begin(&self) -> BrokerResult<Box<dyn TransactedSession>> {
        Ok(Box::new(MemorySession {
            broker: self.clone(),
            staged: Vec::new(),
        }))
    }

    async fn receive(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> BrokerResult<Option<Delivery>> {
        let forced = lock(&self.inner.failures).next_receive.take();
        if let Some(reason) = forced {
            return Err(BrokerError::ReceiveFailed(reason));
        }

        let state = self.queue(queue);
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(delivery) = self.try_claim(queue, &state) {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, state.available.notified())
                .await
                .is_err()
            {
                return Ok(self.try_claim(queue, &state));
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> BrokerResult<()> {
        self.take_in_flight(delivery).map(|_| ())
    }

    async fn release(&self, delivery: &Delivery) -> BrokerResult<()> {
        let (state, stored) = self.take_in_flight(delivery)?;
        lock(&state.entries).ready.push_front(stored);
        state.available.notify_one();
        Ok(())
    }

    async fn depth(&self, queue: &QueueName) -> BrokerResult<u64> {
        let depth = self.existing(queue).map_or(0, |state| {
            let entries = lock(&state.entries);
            entries.ready.len() + entries.in_flight.len()
        });
        Ok(depth as u64)
    }
}

/// Transacted session over a [`MemoryBroker`].
struct MemorySession {
    broker: MemoryBroker,
    staged: Vec<(QueueName, Message)>,
}

#[async_trait]
impl TransactedSession for MemorySession {
    async fn send(&mut self, queue: &QueueName, message: Message) -> BrokerResult<()> {
        if let Some(reason) = self.broker.take_send_failure() {
            return Err(BrokerError::SendFailed(reason));
        }
        self.staged.push((queue.clone(), message));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> BrokerResult<()> {
        let MemorySession { broker, staged } = *self;
        let forced = lock(&broker.inner.failures).next_commit.take();
        if let Some(reason) = forced {
            return Err(BrokerError::CommitFailed(reason));
        }

        // One append per queue keeps each queue's share of the batch atomic.
        let mut by_queue: Vec<(QueueName, Vec<Message>)> = Vec::new();
        for (queue, message) in staged {
            match by_queue.iter_mut().find(|(q, _)| *q == queue) {
                Some((_, messages)) => messages.push(message),
                None => by_queue.push((queue, vec![message])),
            }
        }
        for (queue, messages) in by_queue {
            broker.enqueue_all(&queue, messages);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> BrokerResult<()> {
        tracing::debug!(staged = self.staged.len(), "Rolled back memory session");
        Ok(())
    }
}
