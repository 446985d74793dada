//! In-process broker.
//!
//! Every subscription gets its own unbounded channel, so delivery is
//! exactly-once and in publish order per subscription. Optional duplicate
//! delivery simulates an at-least-once broker.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::trace;

use crate::topic::{topic_matches, validate_filter, validate_topic};
use crate::{Inbound, QoS, Subscription, Transport, TransportError, TransportFuture};

/// Shared in-memory broker. Cloning yields another handle to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<BrokerInner>>,
    next_client: Arc<AtomicU64>,
}

#[derive(Default)]
struct BrokerInner {
    routes: Vec<Route>,
    history: Vec<Inbound>,
    duplicate_delivery: bool,
}

struct Route {
    client: u64,
    filter: String,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new client connected to this broker.
    pub fn client(&self) -> MemoryClient {
        MemoryClient {
            id: self.next_client.fetch_add(1, Ordering::Relaxed),
            broker: self.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// When enabled, every message is delivered twice to each matching
    /// subscription.
    pub fn set_duplicate_delivery(&self, enabled: bool) {
        self.inner.lock().unwrap().duplicate_delivery = enabled;
    }

    /// Every message published so far, in publish order.
    pub fn history(&self) -> Vec<Inbound> {
        self.inner.lock().unwrap().history.clone()
    }

    /// Payloads published to exactly `topic`, in publish order.
    pub fn published_to(&self, topic: &str) -> Vec<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner
            .history
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    fn route(&self, topic: &str, payload: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        let copies = if inner.duplicate_delivery { 2 } else { 1 };
        let msg = Inbound {
            topic: topic.to_string(),
            payload,
        };

        // Routes whose subscription was dropped are pruned on the way.
        inner.routes.retain(|route| {
            if !topic_matches(&route.filter, topic) {
                return true;
            }
            (0..copies).all(|_| route.tx.send(msg.clone()).is_ok())
        });
        trace!(topic, bytes = msg.payload.len(), "routed message");
        inner.history.push(msg);
    }

    fn add_route(&self, client: u64, filter: &str) -> mpsc::UnboundedReceiver<Inbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap().routes.push(Route {
            client,
            filter: filter.to_string(),
            tx,
        });
        rx
    }

    fn remove_client(&self, client: u64) {
        self.inner
            .lock()
            .unwrap()
            .routes
            .retain(|route| route.client != client);
    }
}

/// A client handle on a [`MemoryBroker`].
pub struct MemoryClient {
    id: u64,
    broker: MemoryBroker,
    closed: Arc<AtomicBool>,
}

impl MemoryClient {
    /// Closes the client: its subscriptions end and further publish or
    /// subscribe calls fail with [`TransportError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.broker.remove_client(self.id);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Transport for MemoryClient {
    fn publish(&self, topic: &str, payload: Vec<u8>, _qos: QoS) -> TransportFuture<'_, ()> {
        let topic = topic.to_string();
        Box::pin(async move {
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            if !validate_topic(&topic) {
                return Err(TransportError::InvalidTopic(topic));
            }
            self.broker.route(&topic, payload);
            Ok(())
        })
    }

    fn subscribe(&self, filter: &str, _qos: QoS) -> TransportFuture<'_, Subscription> {
        let filter = filter.to_string();
        Box::pin(async move {
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            if !validate_filter(&filter) {
                return Err(TransportError::InvalidTopic(filter));
            }
            let rx = self.broker.add_route(self.id, &filter);
            Ok(Subscription::new(filter, rx))
        })
    }
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        self.broker.remove_client(self.id);
    }
}
