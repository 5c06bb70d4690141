//! Listener pool.
//!
//! A fixed number of workers pull from one queue and push each delivery into
//! a [`MessageListener`]. A delivery is acknowledged only after the listener
//! returns `Ok`; an error releases it back to the broker. A process that dies
//! inside the listener therefore leaves the delivery unacknowledged.

use crate::MessageListener;
use harness_broker::{Broker, Delivery};
use harness_types::QueueName;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Listener pool settings.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Queue the workers receive from.
    pub queue: QueueName,
    /// Number of concurrent workers (at least one is started).
    pub concurrency: usize,
    /// How long each receive waits before re-checking for shutdown.
    pub poll_timeout: Duration,
}

/// Handle to a running pool of listener workers.
#[derive(Debug)]
pub struct ListenerPool {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl ListenerPool {
    /// Number of workers started.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Signal every worker to stop and wait for them.
    ///
    /// Workers finish their current receive and invocation first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Listener worker ended abnormally");
            }
        }
        tracing::info!("Listener pool stopped");
    }
}

/// Start `config.concurrency` workers feeding `listener`.
pub fn spawn_listener_pool(
    broker: Arc<dyn Broker>,
    listener: Arc<dyn MessageListener>,
    config: ListenerConfig,
) -> ListenerPool {
    let (shutdown, signal) = watch::channel(false);
    let concurrency = config.concurrency.max(1);

    let workers = (0..concurrency)
        .map(|worker| {
            tokio::spawn(run_worker(
                worker,
                Arc::clone(&broker),
                Arc::clone(&listener),
                config.queue.clone(),
                config.poll_timeout,
                signal.clone(),
            ))
        })
        .collect();

    tracing::info!(
        queue = %config.queue,
        concurrency,
        poll_timeout_ms = config.poll_timeout.as_millis() as u64,
        "Listener pool started"
    );

    ListenerPool { shutdown, workers }
}

async fn run_worker(
    worker: usize,
    broker: Arc<dyn Broker>,
    listener: Arc<dyn MessageListener>,
    queue: QueueName,
    poll_timeout: Duration,
    shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(worker, "Listener worker started");

    while !*shutdown.borrow() {
        match broker.receive(&queue, poll_timeout).await {
            Ok(Some(delivery)) => dispatch(worker, broker.as_ref(), listener.as_ref(), delivery).await,
            Ok(None) => {}
            Err(e) => {
                tracing::error!(worker, queue = %queue, error = %e, "Receive failed");
                tokio::time::sleep(poll_timeout).await;
            }
        }
    }

    tracing::debug!(worker, "Listener worker stopped");
}

async fn dispatch(
    worker: usize,
    broker: &dyn Broker,
    listener: &dyn MessageListener,
    delivery: Delivery,
) {
    match listener.on_message(&delivery).await {
        Ok(()) => {
            if let Err(e) = broker.ack(&delivery).await {
                tracing::error!(worker, receipt = delivery.receipt, error = %e, "Ack failed");
            }
        }
        Err(e) => {
            tracing::warn!(
                worker,
                message_id = %delivery.message.id(),
                delivery_count = delivery.delivery_count,
                error = %e,
                "Listener failed, releasing delivery"
            );
            if let Err(e) = broker.release(&delivery).await {
                tracing::error!(worker, receipt = delivery.receipt, error = %e, "Release failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crash::{CrashTrigger, RecordingHalt};
    use crate::workload::WorkloadConfig;
    use crate::{ProcessedCounter, RelayConsumer, RelayError, RelayResult};
    use async_trait::async_trait;
    use harness_broker::{BrokerError, MemoryBroker};
    use harness_types::Message;
    use std::sync::Mutex;

    fn queue(name: &str) -> QueueName {
        QueueName::new(name).unwrap()
    }

    fn config(concurrency: usize) -> ListenerConfig {
        ListenerConfig {
            queue: queue("in-queue"),
            concurrency,
            poll_timeout: Duration::from_millis(20),
        }
    }

    async fn wait_for_depth(broker: &MemoryBroker, queue: &QueueName, expected: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while broker.depth(queue).await.unwrap() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queue never reached expected depth");
    }

    /// Fails the first invocation of every message, succeeds afterwards.
    #[derive(Default)]
    struct FailFirst {
        seen: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl MessageListener for FailFirst {
        async fn on_message(&self, delivery: &Delivery) -> RelayResult<()> {
            self.seen.lock().unwrap().push(delivery.delivery_count);
            if delivery.is_redelivery() {
                Ok(())
            } else {
                Err(RelayError::Broker(BrokerError::SendFailed("first try".into())))
            }
        }
    }

    #[tokio::test]
    async fn successful_invocations_are_acknowledged() {
        let broker = Arc::new(MemoryBroker::new());
        let in_queue = queue("in-queue");
        let out_queue = queue("out-queue");
        for _ in 0..30 {
            broker.send(&in_queue, Message::text("req")).await.unwrap();
        }

        let counter = Arc::new(ProcessedCounter::new());
        let consumer = RelayConsumer::new(
            broker.clone(),
            out_queue.clone(),
            counter.clone(),
            CrashTrigger::new(0, Arc::new(RecordingHalt::new())),
        )
        .with_workload(WorkloadConfig::none());

        let pool = spawn_listener_pool(broker.clone(), Arc::new(consumer), config(4));
        assert_eq!(pool.worker_count(), 4);

        wait_for_depth(&broker, &out_queue, 30).await;
        wait_for_depth(&broker, &in_queue, 0).await;
        pool.shutdown().await;

        assert_eq!(counter.get(), 30);
        assert_eq!(broker.in_flight_count(&in_queue), 0);
    }

    #[tokio::test]
    async fn failed_invocation_is_released_and_redelivered() {
        let broker = Arc::new(MemoryBroker::new());
        let in_queue = queue("in-queue");
        broker.send(&in_queue, Message::text("req")).await.unwrap();

        let listener = Arc::new(FailFirst::default());
        let pool = spawn_listener_pool(broker.clone(), listener.clone(), config(1));

        wait_for_depth(&broker, &in_queue, 0).await;
        pool.shutdown().await;

        assert_eq!(*listener.seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn receive_errors_do_not_stop_the_worker() {
        let broker = Arc::new(MemoryBroker::new());
        let in_queue = queue("in-queue");
        broker.fail_next_receive("transient");
        broker.send(&in_queue, Message::text("req")).await.unwrap();

        let listener = Arc::new(FailFirst::default());
        let pool = spawn_listener_pool(broker.clone(), listener.clone(), config(1));

        wait_for_depth(&broker, &in_queue, 0).await;
        pool.shutdown().await;

        assert_eq!(listener.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn shutdown_stops_idle_workers() {
        let broker = Arc::new(MemoryBroker::new());
        let pool = spawn_listener_pool(
            broker,
            Arc::new(FailFirst::default()),
            config(0),
        );
        assert_eq!(pool.worker_count(), 1);

        tokio::time::timeout(Duration::from_secs(1), pool.shutdown())
            .await
            .expect("pool did not stop");
    }
}
