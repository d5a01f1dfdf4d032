//! End-to-end checks against a real RabbitMQ.
//!
//! Run with `cargo test -p messaging --features amqp -- --ignored`.

#![cfg(feature = "amqp")]

use async_trait::async_trait;
use messaging::amqp::{AmqpTransport, RabbitMqConfig};
use messaging::{
    JobHandler, JobMessage, ProcessingError, QueueBroker, RetryConsumer, RetryPolicy, Topology,
    Worker,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use test_utils::TestRabbitMq;
use tokio::sync::watch;

struct FlakyHandler {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl JobHandler for FlakyHandler {
    async fn handle(&self, _message: &JobMessage) -> Result<(), ProcessingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(ProcessingError::transient("not yet"))
        } else {
            Ok(())
        }
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

fn broker(rabbit: &TestRabbitMq) -> Arc<QueueBroker> {
    let config = RabbitMqConfig {
        host: rabbit.host.clone(),
        port: rabbit.port,
        ..RabbitMqConfig::default()
    };
    Arc::new(QueueBroker::new(
        Arc::new(AmqpTransport::new(&config)),
        Topology::new("it_exchange", "it.queue", "it.queue.dlq"),
    ))
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_failed_job_is_retried_through_the_broker() {
    let rabbit = TestRabbitMq::new().await;
    let broker = broker(&rabbit);
    broker.connect().await.unwrap();

    let handler = Arc::new(FlakyHandler {
        failures: 2,
        calls: AtomicUsize::new(0),
    });
    let policy = RetryPolicy::fixed(3, Duration::from_millis(10)).unwrap();
    let consumer = RetryConsumer::new(Arc::clone(&handler), Arc::clone(&broker), policy);
    let worker = Worker::new(Arc::clone(&broker), "it.queue", Arc::new(consumer));
    let (tx, rx) = watch::channel(false);
    let running = tokio::spawn(async move { worker.run(rx).await });

    let message = JobMessage::with_entry("criteria", serde_json::json!({}), "it.queue").unwrap();
    assert!(broker.publish(&message, "it.queue", None).await);

    for _ in 0..100 {
        if handler.calls.load(Ordering::SeqCst) >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tx.send(true).unwrap();
    running.await.unwrap().unwrap();
    broker.close().await.unwrap();

    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_connect_declares_topology_once() {
    let rabbit = TestRabbitMq::new().await;
    let broker = broker(&rabbit);

    broker.connect().await.unwrap();
    broker.connect().await.unwrap();

    assert!(broker.is_connected().await);
    broker.close().await.unwrap();
    assert!(!broker.is_connected().await);
}
