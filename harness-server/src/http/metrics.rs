//! Prometheus metrics endpoint.

use crate::server::Harness;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Counters are monotonic since startup; queue depths are read from the
/// broker on every scrape (best effort, 0 on error).
pub async fn metrics_handler(Extension(harness): Extension<Arc<Harness>>) -> impl IntoResponse {
    let m = harness.metrics();
    let relay = harness.relay_metrics().snapshot();
    let queues = harness.queues();

    // Monotonic counters
    let requests = m.requests_total.load(Ordering::Relaxed);
    let sent = m.messages_sent_total.load(Ordering::Relaxed);
    let received = m.messages_received_total.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);
    let processed = harness.processed();

    // Queue depths, best effort
    let broker = harness.broker();
    let test_depth = broker.depth(&queues.test).await.unwrap_or(0);
    let in_depth = broker.depth(&queues.inbound).await.unwrap_or(0);
    let out_depth = broker.depth(&queues.outbound).await.unwrap_or(0);

    let body = format!(
        r#"# HELP mq_harness_info Harness information
# TYPE mq_harness_info gauge
mq_harness_info{{version="{version}"}} 1

# HELP mq_harness_requests_total Total /mq-test requests handled
# TYPE mq_harness_requests_total counter
mq_harness_requests_total {requests}

# HELP mq_harness_messages_sent_total Total messages sent by the driver
# TYPE mq_harness_messages_sent_total counter
mq_harness_messages_sent_total {sent}

# HELP mq_harness_messages_received_total Total messages consumed by the driver
# TYPE mq_harness_messages_received_total counter
mq_harness_messages_received_total {received}

# HELP mq_harness_errors_total Total failed driver operations
# TYPE mq_harness_errors_total counter
mq_harness_errors_total {errors}

# HELP mq_harness_relay_processed_messages Relay invocations in this process
# TYPE mq_harness_relay_processed_messages gauge
mq_harness_relay_processed_messages {processed}

# HELP mq_harness_relay_received_total Inbound deliveries handed to the relay
# TYPE mq_harness_relay_received_total counter
mq_harness_relay_received_total {relay_received}

# HELP mq_harness_relay_relayed_total Replies sent by the relay
# TYPE mq_harness_relay_relayed_total counter
mq_harness_relay_relayed_total {relay_relayed}

# HELP mq_harness_relay_type_mismatch_total Inbound messages that were not text
# TYPE mq_harness_relay_type_mismatch_total counter
mq_harness_relay_type_mismatch_total {relay_mismatch}

# HELP mq_harness_relay_failures_total Failed relay invocations
# TYPE mq_harness_relay_failures_total counter
mq_harness_relay_failures_total {relay_failures}

# HELP mq_harness_queue_depth Messages held per queue (ready and in flight)
# TYPE mq_harness_queue_depth gauge
mq_harness_queue_depth{{queue="{test_name}"}} {test_depth}
mq_harness_queue_depth{{queue="{in_name}"}} {in_depth}
mq_harness_queue_depth{{queue="{out_name}"}} {out_depth}
"#,
        version = env!("CARGO_PKG_VERSION"),
        relay_received = relay.received_total,
        relay_relayed = relay.relayed_total,
        relay_mismatch = relay.type_mismatch_total,
        relay_failures = relay.failures_total,
        test_name = queues.test,
        in_name = queues.inbound,
        out_name = queues.outbound,
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerBackend, Config};
    use axum::body::to_bytes;
    use harness_types::Message;

    #[tokio::test]
    async fn reports_queue_depths() {
        let mut config = Config::default();
        config.broker.backend = BrokerBackend::Memory;
        let harness = Arc::new(Harness::open(config).await.unwrap());
        for _ in 0..3 {
            harness
                .broker()
                .send(&harness.queues().inbound, Message::text("req"))
                .await
                .unwrap();
        }

        let response = metrics_handler(Extension(harness)).await.into_response();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();

        assert!(body.contains("mq_harness_queue_depth{queue=\"in-queue\"} 3"));
        assert!(body.contains("mq_harness_queue_depth{queue=\"out-queue\"} 0"));
        assert!(body.contains("# TYPE mq_harness_requests_total counter"));
    }
}
