//! Flow-control channel: correlates acknowledgments with outstanding chunks.
//!
//! Each sent chunk registers a pending completion handle keyed by its
//! sequence. The ack pump resolves handles as acks arrive; the transmitter
//! waits on them with a bounded timeout.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mqxfer_protocol::{ControlMessage, Frame, decode_frame};
use mqxfer_transport::{Subscription, TransportError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::TransferError;

/// Why a pending ack can never be satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AckFault {
    Protocol(String),
    Closed,
}

impl From<AckFault> for TransferError {
    fn from(fault: AckFault) -> Self {
        match fault {
            AckFault::Protocol(detail) => TransferError::Protocol(detail),
            AckFault::Closed => TransferError::Transport(TransportError::Closed),
        }
    }
}

type AckResult = Result<(), AckFault>;

/// Pending acknowledgments, shared between the transmitter and its ack pump.
#[derive(Clone, Default)]
pub struct FlowControl {
    inner: Arc<Mutex<FlowInner>>,
}

#[derive(Default)]
struct FlowInner {
    pending: HashMap<u64, oneshot::Sender<AckResult>>,
    fault: Option<AckFault>,
}

/// Completion handle for one outstanding chunk.
pub struct PendingAck {
    sequence: u64,
    rx: oneshot::Receiver<AckResult>,
}

impl PendingAck {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl FlowControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers chunk `sequence` as outstanding.
    ///
    /// After a fault the returned handle resolves immediately with it.
    pub fn register(&self, sequence: u64) -> PendingAck {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().unwrap();
        if let Some(fault) = inner.fault.clone() {
            let _ = tx.send(Err(fault));
        } else {
            inner.pending.insert(sequence, tx);
        }
        PendingAck { sequence, rx }
    }

    /// Resolves the handle for `sequence`. Returns `false` if nothing was
    /// waiting for it (duplicate or unknown ack).
    pub fn acknowledge(&self, sequence: u64) -> bool {
        let tx = self.inner.lock().unwrap().pending.remove(&sequence);
        match tx {
            Some(tx) => {
                let _ = tx.send(Ok(()));
                true
            }
            None => false,
        }
    }

    /// Number of registered chunks still awaiting an ack.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    /// Waits for `ack`, bounded by `timeout`. The pending entry is removed on
    /// every exit path.
    pub async fn wait(&self, ack: PendingAck, timeout: Duration) -> Result<(), TransferError> {
        let PendingAck { sequence, rx } = ack;
        let result = tokio::time::timeout(timeout, rx).await;
        self.inner.lock().unwrap().pending.remove(&sequence);

        match result {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(fault))) => Err(fault.into()),
            Ok(Err(_)) => Err(AckFault::Closed.into()),
            Err(_) => Err(TransferError::TransportTimeout { sequence }),
        }
    }

    fn fail_all(&self, fault: AckFault) {
        let mut inner = self.inner.lock().unwrap();
        for (_, tx) in inner.pending.drain() {
            let _ = tx.send(Err(fault.clone()));
        }
        inner.fault.get_or_insert(fault);
    }
}

/// Routes acks from `sub` into `flow` until cancelled or the stream ends.
///
/// Messages for other topics are ignored. A frame on the ack topic that is not
/// an ack fails every pending wait with a protocol error.
pub(crate) async fn ack_pump(
    mut sub: Subscription,
    ack_topic: String,
    flow: FlowControl,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = sub.recv() => {
                let Some(msg) = msg else {
                    debug!(topic = %ack_topic, "ack stream ended");
                    flow.fail_all(AckFault::Closed);
                    break;
                };
                if msg.topic != ack_topic {
                    trace!(topic = %msg.topic, "ignoring message for another topic");
                    continue;
                }
                match decode_frame(&msg.payload) {
                    Ok(Frame::Control(ControlMessage::Ack(ack))) => {
                        if flow.acknowledge(ack.sequence) {
                            trace!(sequence = ack.sequence, "ack received");
                        } else {
                            debug!(sequence = ack.sequence, "ack with no pending chunk, ignoring");
                        }
                    }
                    Ok(other) => {
                        let detail = format!("unexpected frame on ack topic: {other:?}");
                        warn!("{detail}");
                        flow.fail_all(AckFault::Protocol(detail));
                        break;
                    }
                    Err(e) => {
                        warn!("malformed ack: {e}");
                        flow.fail_all(AckFault::Protocol(format!("malformed ack: {e}")));
                        break;
                    }
                }
            }
        }
    }
}
