//! In-process transport.
//!
//! Records every declaration, publish and settlement so tests can assert on the
//! exact conversation a consumer had with the broker. Published messages are
//! delivered to the queue's (single) subscriber.

use crate::envelope::Headers;
use crate::error::BrokerError;
use crate::transport::{Acknowledge, Channel, Delivery, DeliveryStream, Transport};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    Exchange(String),
    Queue(String),
    Binding {
        queue: String,
        exchange: String,
        routing_key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub queue: String,
    pub body: Vec<u8>,
    pub headers: Headers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    Ack,
    Nack { requeue: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub queue: String,
    pub delivery_tag: u64,
    pub outcome: SettleOutcome,
}

struct QueueSlot {
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: Option<mpsc::UnboundedReceiver<Delivery>>,
}

impl QueueSlot {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Some(receiver),
        }
    }
}

#[derive(Default)]
struct State {
    declarations: Vec<Declaration>,
    queues: HashMap<String, QueueSlot>,
    published: Vec<Published>,
    settlements: Vec<Settlement>,
    failing_queues: HashSet<String>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    opens: AtomicUsize,
    next_tag: AtomicU64,
    fail_open: AtomicBool,
    fail_publish: AtomicBool,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the recorded history.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_tag(&self) -> u64 {
        self.next_tag.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn enqueue(self: &Arc<Self>, queue: &str, body: Vec<u8>, headers: Headers) -> u64 {
        let delivery = self.delivery(queue, body, headers);
        let tag = delivery.delivery_tag;
        let mut state = self.state();
        let slot = state
            .queues
            .entry(queue.to_string())
            .or_insert_with(QueueSlot::new);
        // Nobody listening any more: the message stays recorded in `published`.
        let _ = slot.sender.send(delivery);
        tag
    }

    fn delivery(self: &Arc<Self>, queue: &str, body: Vec<u8>, headers: Headers) -> Delivery {
        let tag = self.next_tag();
        let acker = MemoryAcker {
            inner: Arc::downgrade(self),
            queue: queue.to_string(),
            delivery_tag: tag,
            body: body.clone(),
            headers: headers.clone(),
        };
        Delivery::new(queue, tag, body, headers, Box::new(acker))
    }
}

/// Broker living entirely in memory. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    inner: Arc<Inner>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` calls fail with a connectivity error.
    pub fn fail_open(&self, fail: bool) {
        self.inner.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make every publish fail.
    pub fn fail_publish(&self, fail: bool) {
        self.inner.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make publishes to one queue fail.
    pub fn fail_publish_to(&self, queue: &str) {
        self.inner.state().failing_queues.insert(queue.to_string());
    }

    pub fn open_count(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    pub fn declarations(&self) -> Vec<Declaration> {
        self.inner.state().declarations.clone()
    }

    /// Messages published to `queue`, oldest first.
    pub fn published(&self, queue: &str) -> Vec<Published> {
        self.inner
            .state()
            .published
            .iter()
            .filter(|p| p.queue == queue)
            .cloned()
            .collect()
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.inner.state().settlements.clone()
    }

    /// Build a delivery for `queue` without routing it through a subscriber.
    pub fn delivery(&self, queue: &str, body: Vec<u8>, headers: Headers) -> Delivery {
        self.inner.delivery(queue, body, headers)
    }

    /// Close the subscription on `queue`, as a dropped channel would.
    pub fn end_stream(&self, queue: &str) {
        self.inner.state().queues.remove(queue);
    }

    /// Enqueue a message as if a producer had published it, without recording it.
    pub fn inject(&self, queue: &str, body: Vec<u8>, headers: Headers) -> u64 {
        self.inner.enqueue(queue, body, headers)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn open(&self) -> Result<Arc<dyn Channel>, BrokerError> {
        if self.inner.fail_open.load(Ordering::SeqCst) {
            return Err(BrokerError::connection("connection refused"));
        }
        self.inner.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryChannel {
            inner: Arc::clone(&self.inner),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryChannel {
    inner: Arc<Inner>,
    closed: AtomicBool,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }

    fn record(&self, declaration: Declaration) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.inner.state().declarations.push(declaration);
        Ok(())
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_exchange(&self, exchange: &str) -> Result<(), BrokerError> {
        self.record(Declaration::Exchange(exchange.to_string()))
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.record(Declaration::Queue(queue.to_string()))?;
        self.inner
            .state()
            .queues
            .entry(queue.to_string())
            .or_insert_with(QueueSlot::new);
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.record(Declaration::Binding {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        })
    }

    async fn publish(
        &self,
        queue: &str,
        body: Vec<u8>,
        headers: Headers,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        {
            let mut state = self.inner.state();
            if self.inner.fail_publish.load(Ordering::SeqCst)
                || state.failing_queues.contains(queue)
            {
                return Err(BrokerError::publish(queue, "simulated publish failure"));
            }
            state.published.push(Published {
                queue: queue.to_string(),
                body: body.clone(),
                headers: headers.clone(),
            });
        }
        self.inner.enqueue(queue, body, headers);
        Ok(())
    }

    async fn consume(&self, queue: &str, _prefetch: u16) -> Result<DeliveryStream, BrokerError> {
        self.ensure_open()?;
        let receiver = self
            .inner
            .state()
            .queues
            .entry(queue.to_string())
            .or_insert_with(QueueSlot::new)
            .receiver
            .take()
            .ok_or_else(|| BrokerError::consume(queue, "queue already has a consumer"))?;
        Ok(UnboundedReceiverStream::new(receiver).map(Ok).boxed())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryAcker {
    inner: Weak<Inner>,
    queue: String,
    delivery_tag: u64,
    body: Vec<u8>,
    headers: Headers,
}

impl MemoryAcker {
    fn settle(&self, outcome: SettleOutcome) -> Result<Arc<Inner>, BrokerError> {
        let inner = self
            .inner
            .upgrade()
            .ok_or_else(|| BrokerError::settle(self.delivery_tag, "transport dropped"))?;
        inner.state().settlements.push(Settlement {
            queue: self.queue.clone(),
            delivery_tag: self.delivery_tag,
            outcome,
        });
        Ok(inner)
    }
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.settle(SettleOutcome::Ack).map(|_| ())
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        let inner = self.settle(SettleOutcome::Nack { requeue })?;
        if requeue {
            inner.enqueue(&self.queue, self.body.clone(), self.headers.clone());
        }
        Ok(())
    }
}
