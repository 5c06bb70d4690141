//! SQLite-backed broker.
//!
//! One row per message. A receive claims the oldest unleased row of a queue
//! by stamping a lease deadline; ack deletes the row, release clears the
//! lease. Rows whose lease expired are claimable again, and opening the
//! broker clears every lease left behind by a crashed process.

use crate::{Broker, BrokerError, BrokerResult, Delivery, TransactedSession};
use async_trait::async_trait;
use harness_types::{Message, QueueName};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Default lease on a received, unacknowledged message.
const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// Shortest lease `with_lease` accepts.
const MIN_LEASE: Duration = Duration::from_millis(1);

/// How often a waiting receive re-checks the table.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

const INSERT_MESSAGE: &str = r#"
    INSERT INTO messages (queue, message_id, payload, enqueued_at)
    VALUES (?1, ?2, ?3, ?4)
"#;

/// SQLite-based durable broker.
#[derive(Clone, Debug)]
pub struct SqliteBroker {
    pool: SqlitePool,
    lease: Duration,
}

impl SqliteBroker {
    /// Open (or create) a broker database file.
    ///
    /// Leases held by a previous process are cleared, so messages it was
    /// processing when it died are delivered again.
    pub async fn open(path: &Path) -> BrokerResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        // One connection serialises claims, so no row is handed out twice.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let broker = Self {
            pool,
            lease: DEFAULT_LEASE,
        };
        broker.run_migrations().await?;

        let recovered = broker.recover_in_flight().await?;
        if recovered > 0 {
            tracing::info!(recovered, path = %path.display(), "Released in-flight messages from previous run");
        }
        Ok(broker)
    }

    /// Create an in-memory broker (for testing).
    pub async fn in_memory() -> BrokerResult<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let broker = Self {
            pool,
            lease: DEFAULT_LEASE,
        };
        broker.run_migrations().await?;
        Ok(broker)
    }

    /// Override how long a received message stays leased before it is
    /// handed out again. Raised to one millisecond if shorter.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease.max(MIN_LEASE);
        self
    }

    /// Clear every lease. Returns how many messages became deliverable again.
    pub async fn recover_in_flight(&self) -> BrokerResult<u64> {
        let result =
            sqlx::query("UPDATE messages SET leased_until = NULL WHERE leased_until IS NOT NULL")
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Close the connection pool, flushing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn run_migrations(&self) -> BrokerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                receipt INTEGER PRIMARY KEY AUTOINCREMENT,
                queue TEXT NOT NULL,
                message_id TEXT NOT NULL,
                payload BLOB NOT NULL,
                delivery_count INTEGER NOT NULL DEFAULT 0,
                leased_until INTEGER,
                enqueued_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_queue_receipt ON messages(queue, receipt)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn try_claim(&self, queue: &QueueName) -> BrokerResult<Option<Delivery>> {
        let now = now_millis();
        let lease_until = now + self.lease.as_millis() as i64;

        let row = sqlx::query_as::<_, ClaimedRow>(
            r#"
            UPDATE messages
            SET leased_until = ?2, delivery_count = delivery_count + 1
            WHERE receipt = (
                SELECT receipt FROM messages
                WHERE queue = ?1 AND (leased_until IS NULL OR leased_until <= ?3)
                ORDER BY receipt ASC
                LIMIT 1
            )
            RETURNING receipt, payload, delivery_count
            "#,
        )
        .bind(queue.as_str())
        .bind(lease_until)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Delivery {
                queue: queue.clone(),
                message: Message::from_bytes(&row.payload)?,
                delivery_count: row.delivery_count as u32,
                receipt: row.receipt as u64,
            })),
            None => Ok(None),
        }
    }

    fn unknown(delivery: &Delivery) -> BrokerError {
        BrokerError::UnknownDelivery {
            queue: delivery.queue.to_string(),
            receipt: delivery.receipt,
        }
    }
}

#[async_trait]
impl Broker for SqliteBroker {
    async fn send(&self, queue: &QueueName, message: Message) -> BrokerResult<()> {
        let payload = message.to_bytes()?;
        sqlx::query(INSERT_MESSAGE)
            .bind(queue.as_str())
            .bind(message.id().to_string())
            .bind(payload)
            .bind(now_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn begin(&self) -> BrokerResult<Box<dyn TransactedSession>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteSession { tx }))
    }

    async fn receive(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> BrokerResult<Option<Delivery>> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(delivery) = self.try_claim(queue).await? {
                return Ok(Some(delivery));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> BrokerResult<()> {
        // A claim is the row plus the delivery count it was handed out with;
        // a holder whose lease expired and was re-claimed no longer matches.
        let result = sqlx::query(
            "DELETE FROM messages WHERE receipt = ?1 AND delivery_count = ?2 AND leased_until IS NOT NULL",
        )
        .bind(delivery.receipt as i64)
        .bind(i64::from(delivery.delivery_count))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::unknown(delivery));
        }
        Ok(())
    }

    async fn release(&self, delivery: &Delivery) -> BrokerResult<()> {
        let result = sqlx::query(
            "UPDATE messages SET leased_until = NULL \
             WHERE receipt = ?1 AND delivery_count = ?2 AND leased_until IS NOT NULL",
        )
        .bind(delivery.receipt as i64)
        .bind(i64::from(delivery.delivery_count))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::unknown(delivery));
        }
        Ok(())
    }

    async fn depth(&self, queue: &QueueName) -> BrokerResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE queue = ?1")
            .bind(queue.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

/// Transacted session holding an open SQLite transaction.
///
/// Dropping it without commit rolls the transaction back.
struct SqliteSession {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl TransactedSession for SqliteSession {
    async fn send(&mut self, queue: &QueueName, message: Message) -> BrokerResult<()> {
        let payload = message.to_bytes()?;
        sqlx::query(INSERT_MESSAGE)
            .bind(queue.as_str())
            .bind(message.id().to_string())
            .bind(payload)
            .bind(now_millis())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> BrokerResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| BrokerError::CommitFailed(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> BrokerResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct ClaimedRow {
    receipt: i64,
    payload: Vec<u8>,
    delivery_count: i64,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(50);

    fn queue(name: &str) -> QueueName {
        QueueName::new(name).unwrap()
    }

    #[tokio::test]
    async fn send_receive_ack() {
        let broker = SqliteBroker::in_memory().await.unwrap();
        let q = queue("test-queue");

        broker.send(&q, Message::text("hello")).await.unwrap();
        assert_eq!(broker.depth(&q).await.unwrap(), 1);

        let delivery = broker.receive(&q, SHORT).await.unwrap().unwrap();
        assert_eq!(delivery.message.text_payload(), Some("hello"));
        assert_eq!(delivery.delivery_count, 1);
        assert_eq!(broker.depth(&q).await.unwrap(), 1);

        broker.ack(&delivery).await.unwrap();
        assert_eq!(broker.depth(&q).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn receive_is_fifo_per_queue() {
        let broker = SqliteBroker::in_memory().await.unwrap();
        let a = queue("a");
        let b = queue("b");

        broker.send(&a, Message::text("a1")).await.unwrap();
        broker.send(&b, Message::text("b1")).await.unwrap();
        broker.send(&a, Message::text("a2")).await.unwrap();

        let first = broker.consume(&a, SHORT).await.unwrap().unwrap();
        let second = broker.consume(&a, SHORT).await.unwrap().unwrap();
        assert_eq!(first.text_payload(), Some("a1"));
        assert_eq!(second.text_payload(), Some("a2"));
        assert_eq!(broker.depth(&b).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn receive_on_empty_queue_times_out() {
        let broker = SqliteBroker::in_memory().await.unwrap();
        let started = Instant::now();

        let got = broker.receive(&queue("empty"), SHORT).await.unwrap();

        assert!(got.is_none());
        assert!(started.elapsed() >= SHORT);
    }

    #[tokio::test]
    async fn leased_message_is_not_handed_out_twice() {
        let broker = SqliteBroker::in_memory().await.unwrap();
        let q = queue("q");
        broker.send(&q, Message::text("only")).await.unwrap();

        let _held = broker.receive(&q, SHORT).await.unwrap().unwrap();
        assert!(broker.receive(&q, SHORT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn release_redelivers_same_message() {
        let broker = SqliteBroker::in_memory().await.unwrap();
        let q = queue("q");
        broker.send(&q, Message::text("first")).await.unwrap();
        broker.send(&q, Message::text("second")).await.unwrap();

        let first = broker.receive(&q, SHORT).await.unwrap().unwrap();
        broker.release(&first).await.unwrap();

        let again = broker.receive(&q, SHORT).await.unwrap().unwrap();
        assert_eq!(again.message.id(), first.message.id());
        assert_eq!(again.delivery_count, 2);
        assert!(again.is_redelivery());
    }

    #[tokio::test]
    async fn expired_lease_is_claimable_again() {
        let broker = SqliteBroker::in_memory()
            .await
            .unwrap()
            .with_lease(Duration::from_millis(30));
        let q = queue("q");
        broker.send(&q, Message::text("x")).await.unwrap();

        let first = broker.receive(&q, SHORT).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let again = broker.receive(&q, SHORT).await.unwrap().unwrap();
        assert_eq!(again.message.id(), first.message.id());
        assert_eq!(again.delivery_count, 2);
    }

    #[tokio::test]
    async fn stale_holder_cannot_ack_or_release_a_reclaimed_message() {
        let broker = SqliteBroker::in_memory()
            .await
            .unwrap()
            .with_lease(Duration::from_millis(30));
        let q = queue("q");
        broker.send(&q, Message::text("x")).await.unwrap();

        let stale = broker.receive(&q, SHORT).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let current = broker.receive(&q, SHORT).await.unwrap().unwrap();
        assert_eq!(current.receipt, stale.receipt);

        assert!(matches!(
            broker.ack(&stale).await,
            Err(BrokerError::UnknownDelivery { .. })
        ));
        assert!(matches!(
            broker.release(&stale).await,
            Err(BrokerError::UnknownDelivery { .. })
        ));
        assert_eq!(broker.depth(&q).await.unwrap(), 1);

        // The current holder still owns the claim and can hand it back.
        broker.release(&current).await.unwrap();
        let again = broker.receive(&q, SHORT).await.unwrap().unwrap();
        assert_eq!(again.message.id(), stale.message.id());
        assert_eq!(again.delivery_count, 3);
        broker.ack(&again).await.unwrap();
        assert_eq!(broker.depth(&q).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zero_lease_is_raised_to_minimum() {
        let broker = SqliteBroker::in_memory()
            .await
            .unwrap()
            .with_lease(Duration::ZERO);
        assert_eq!(broker.lease, MIN_LEASE);
    }

    #[tokio::test]
    async fn ack_of_unknown_receipt_fails() {
        let broker = SqliteBroker::in_memory().await.unwrap();
        let q = queue("q");
        broker.send(&q, Message::text("x")).await.unwrap();
        let delivery = broker.receive(&q, SHORT).await.unwrap().unwrap();

        broker.ack(&delivery).await.unwrap();
        assert!(matches!(
            broker.ack(&delivery).await,
            Err(BrokerError::UnknownDelivery { .. })
        ));
        assert!(matches!(
            broker.release(&delivery).await,
            Err(BrokerError::UnknownDelivery { .. })
        ));
    }

    #[tokio::test]
    async fn transaction_commit_makes_batch_visible() {
        let broker = SqliteBroker::in_memory().await.unwrap();
        let q = queue("in-queue");

        let mut session = broker.begin().await.unwrap();
        for i in 0..20 {
            session
                .send(&q, Message::text(format!("m{i}")))
                .await
                .unwrap();
        }
        session.commit().await.unwrap();

        assert_eq!(broker.depth(&q).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn transaction_rollback_and_drop_leave_nothing() {
        let broker = SqliteBroker::in_memory().await.unwrap();
        let q = queue("in-queue");

        let mut session = broker.begin().await.unwrap();
        session.send(&q, Message::text("x")).await.unwrap();
        session.rollback().await.unwrap();

        {
            let mut dropped = broker.begin().await.unwrap();
            dropped.send(&q, Message::text("y")).await.unwrap();
        }

        assert_eq!(broker.depth(&q).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn properties_survive_storage() {
        let broker = SqliteBroker::in_memory().await.unwrap();
        let q = queue("out-queue");
        let msg = Message::text("reply").with_property("inMessageId", "ID:123");

        broker.send(&q, msg.clone()).await.unwrap();
        let got = broker.consume(&q, SHORT).await.unwrap().unwrap();

        assert_eq!(got, msg);
    }

    #[tokio::test]
    async fn messages_survive_reopen_and_leases_are_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.db");
        let q = queue("in-queue");

        let first_id = {
            let broker = SqliteBroker::open(&path).await.unwrap();
            broker.send(&q, Message::text("a")).await.unwrap();
            broker.send(&q, Message::text("b")).await.unwrap();
            let held = broker.receive(&q, SHORT).await.unwrap().unwrap();
            broker.close().await;
            held.message.id()
        };

        let broker = SqliteBroker::open(&path).await.unwrap();
        assert_eq!(broker.depth(&q).await.unwrap(), 2);

        let redelivered = broker.receive(&q, SHORT).await.unwrap().unwrap();
        assert_eq!(redelivered.message.id(), first_id);
        assert_eq!(redelivered.delivery_count, 2);
    }
}
