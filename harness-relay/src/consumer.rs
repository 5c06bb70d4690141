//! The relay consumer.
//!
//! Invoked once per inbound delivery. Each invocation takes an ordinal from
//! the shared [`ProcessedCounter`], simulates some work, sends a reply that
//! names the inbound message, and then lets the [`CrashTrigger`] decide
//! whether the process survives.

use crate::crash::CrashTrigger;
use crate::workload::{simulate_business_logic, WorkloadConfig};
use crate::{ProcessedCounter, RelayMetrics, RelayResult};
use async_trait::async_trait;
use harness_broker::{Broker, Delivery};
use harness_types::{Message, QueueName, IN_MESSAGE_ID_PROPERTY, QUEUE_MDB_REPLY_MESSAGE};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Handles deliveries pushed by a listener pool.
///
/// Returning `Ok` lets the pool acknowledge the delivery; returning `Err`
/// makes it release the delivery for redelivery.
#[async_trait]
pub trait MessageListener: Send + Sync + 'static {
    /// Process one delivery.
    async fn on_message(&self, delivery: &Delivery) -> RelayResult<()>;
}

/// Counts, relays and (every so often) crashes.
pub struct RelayConsumer {
    broker: Arc<dyn Broker>,
    reply_queue: QueueName,
    counter: Arc<ProcessedCounter>,
    trigger: CrashTrigger,
    workload: WorkloadConfig,
    metrics: Arc<RelayMetrics>,
}

impl std::fmt::Debug for RelayConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConsumer")
            .field("reply_queue", &self.reply_queue)
            .field("processed", &self.counter.get())
            .field("trigger", &self.trigger)
            .field("workload", &self.workload)
            .finish_non_exhaustive()
    }
}

impl RelayConsumer {
    /// Create a consumer replying to `reply_queue`.
    pub fn new(
        broker: Arc<dyn Broker>,
        reply_queue: QueueName,
        counter: Arc<ProcessedCounter>,
        trigger: CrashTrigger,
    ) -> Self {
        Self {
            broker,
            reply_queue,
            counter,
            trigger,
            workload: WorkloadConfig::default(),
            metrics: Arc::new(RelayMetrics::default()),
        }
    }

    /// Use a different simulated workload.
    pub fn with_workload(mut self, workload: WorkloadConfig) -> Self {
        self.workload = workload;
        self
    }

    /// Share a metrics instance (e.g. with the HTTP surface).
    pub fn with_metrics(mut self, metrics: Arc<RelayMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The consumer's counters.
    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    /// The shared processed counter.
    pub fn counter(&self) -> &Arc<ProcessedCounter> {
        &self.counter
    }
}

#[async_trait]
impl MessageListener for RelayConsumer {
    async fn on_message(&self, delivery: &Delivery) -> RelayResult<()> {
        let ordinal = self.counter.increment();
        self.metrics.received_total.fetch_add(1, Ordering::Relaxed);

        let inbound = &delivery.message;
        match inbound.text_payload() {
            Some(text) => tracing::info!(
                ordinal,
                text,
                details = %inbound,
                delivery_count = delivery.delivery_count,
                "Relay received message"
            ),
            None => {
                self.metrics.type_mismatch_total.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(ordinal, details = %inbound, "Message of wrong type");
            }
        }

        let workload = self.workload.clone();
        let slept = tokio::task::spawn_blocking(move || simulate_business_logic(&workload))
            .await
            .map_err(|e| {
                self.metrics.failures_total.fetch_add(1, Ordering::Relaxed);
                tracing::error!(ordinal, error = %e, "Simulated workload failed");
                e
            })?;
        tracing::debug!(ordinal, slept_ms = slept.as_millis() as u64, "Workload finished");

        let reply = Message::text(QUEUE_MDB_REPLY_MESSAGE)
            .with_property(IN_MESSAGE_ID_PROPERTY, inbound.id().to_string());

        if let Err(e) = self.broker.send(&self.reply_queue, reply).await {
            self.metrics.failures_total.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                ordinal,
                message_id = %inbound.id(),
                queue = %self.reply_queue,
                error = %e,
                "Failed to send reply"
            );
            return Err(e.into());
        }
        self.metrics.relayed_total.fetch_add(1, Ordering::Relaxed);

        self.trigger.check(ordinal);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crash::RecordingHalt;
    use crate::RelayError;
    use harness_broker::MemoryBroker;
    use harness_types::QUEUE_MDB_TEXT_MESSAGE;
    use std::time::Duration;

    const SHORT: Duration = Duration::from_millis(50);

    struct Fixture {
        broker: Arc<MemoryBroker>,
        consumer: Arc<RelayConsumer>,
        halts: Arc<RecordingHalt>,
        in_queue: QueueName,
        out_queue: QueueName,
    }

    fn fixture(threshold: u64) -> Fixture {
        let broker = Arc::new(MemoryBroker::new());
        let halts = Arc::new(RecordingHalt::new());
        let out_queue = QueueName::new("out-queue").unwrap();
        let consumer = RelayConsumer::new(
            broker.clone(),
            out_queue.clone(),
            Arc::new(ProcessedCounter::new()),
            CrashTrigger::new(threshold, halts.clone()),
        )
        .with_workload(WorkloadConfig::none());

        Fixture {
            broker,
            consumer: Arc::new(consumer),
            halts,
            in_queue: QueueName::new("in-queue").unwrap(),
            out_queue,
        }
    }

    async fn deliver(f: &Fixture, message: Message) -> Delivery {
        f.broker.send(&f.in_queue, message).await.unwrap();
        f.broker.receive(&f.in_queue, SHORT).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn reply_names_the_inbound_message() {
        let f = fixture(0);
        let delivery = deliver(&f, Message::text(QUEUE_MDB_TEXT_MESSAGE)).await;

        f.consumer.on_message(&delivery).await.unwrap();

        let reply = f.broker.consume(&f.out_queue, SHORT).await.unwrap().unwrap();
        assert_eq!(reply.text_payload(), Some(QUEUE_MDB_REPLY_MESSAGE));
        assert_eq!(reply.correlation_id(), Some(delivery.message.id()));
        assert_eq!(f.consumer.counter().get(), 1);
    }

    #[tokio::test]
    async fn non_text_message_is_still_relayed() {
        let f = fixture(0);
        let delivery = deliver(&f, Message::bytes(vec![1, 2, 3])).await;

        f.consumer.on_message(&delivery).await.unwrap();

        let metrics = f.consumer.metrics().snapshot();
        assert_eq!(metrics.type_mismatch_total, 1);
        assert_eq!(metrics.relayed_total, 1);
        assert_eq!(f.broker.depth(&f.out_queue).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_invocations_get_distinct_ordinals() {
        let f = fixture(10);
        let mut deliveries = Vec::new();
        for _ in 0..50 {
            deliveries.push(deliver(&f, Message::text(QUEUE_MDB_TEXT_MESSAGE)).await);
        }

        let handles: Vec<_> = deliveries
            .into_iter()
            .map(|delivery| {
                let consumer = f.consumer.clone();
                tokio::spawn(async move { consumer.on_message(&delivery).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(f.consumer.counter().get(), 50);
        let mut halted = f.halts.ordinals();
        halted.sort_unstable();
        assert_eq!(halted, vec![10, 20, 30, 40, 50]);
        assert_eq!(f.broker.depth(&f.out_queue).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn crash_happens_after_the_reply_is_sent() {
        let f = fixture(1);
        let delivery = deliver(&f, Message::text(QUEUE_MDB_TEXT_MESSAGE)).await;

        f.consumer.on_message(&delivery).await.unwrap();

        assert_eq!(f.halts.ordinals(), vec![1]);
        assert_eq!(f.broker.depth(&f.out_queue).await.unwrap(), 1);
        // The inbound delivery is still in flight; only the listener acks.
        assert_eq!(f.broker.in_flight_count(&f.in_queue), 1);
    }

    #[tokio::test]
    async fn failed_reply_send_is_an_error_and_does_not_crash() {
        let f = fixture(1);
        let delivery = deliver(&f, Message::text(QUEUE_MDB_TEXT_MESSAGE)).await;
        f.broker.fail_next_send("broker down");

        let err = f.consumer.on_message(&delivery).await.unwrap_err();

        assert!(matches!(err, RelayError::Broker(_)));
        assert!(f.halts.ordinals().is_empty());
        assert_eq!(f.consumer.metrics().snapshot().failures_total, 1);
        assert_eq!(f.broker.depth(&f.out_queue).await.unwrap(), 0);
    }
}
