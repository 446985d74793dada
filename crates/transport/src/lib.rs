//! Publish/subscribe transport seam.
//!
//! The transfer engine only needs topic-scoped publish with delivery
//! confirmation and per-subscription inbound streams. Real brokers are wired in
//! by implementing [`Transport`]; [`MemoryBroker`] provides an in-process
//! implementation.

pub mod memory;
pub mod topic;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use memory::{MemoryBroker, MemoryClient};
pub use topic::topic_matches;

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Errors reported by a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("invalid topic: {0}")]
    InvalidTopic(String),
}

/// Delivery guarantee requested for a publish or subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    #[default]
    ExactlyOnce,
}

/// A message delivered to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Inbound message stream for one subscription.
///
/// Dropping the subscription stops delivery to it.
#[derive(Debug)]
pub struct Subscription {
    filter: String,
    rx: mpsc::UnboundedReceiver<Inbound>,
}

impl Subscription {
    /// Wraps a receiver fed by a transport implementation.
    pub fn new(filter: impl Into<String>, rx: mpsc::UnboundedReceiver<Inbound>) -> Self {
        Self {
            filter: filter.into(),
            rx,
        }
    }

    /// The topic filter this subscription was created with.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Waits for the next message. Returns `None` once the transport closed
    /// the subscription.
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }
}

/// Topic-scoped publish/subscribe capability.
///
/// Implementations must deliver messages in publish order per topic for the
/// single-outstanding-chunk flow control to be sufficient on its own.
pub trait Transport: Send + Sync {
    /// Publishes `payload` to `topic`. Resolves once the transport confirms
    /// the publish at the requested `qos`.
    fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> TransportFuture<'_, ()>;

    /// Subscribes to `filter`. Resolves once the subscription is active, so
    /// no message published afterwards is missed.
    fn subscribe(&self, filter: &str, qos: QoS) -> TransportFuture<'_, Subscription>;
}
