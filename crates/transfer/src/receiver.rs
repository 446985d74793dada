//! Receiving side of a transfer.
//!
//! [`ReceiverMachine`] dispatches inbound frames for one topic: start opens a
//! sink, chunks are written strictly in sequence order and acknowledged, and
//! end flushes the sink before the size and digest are verified.
//! [`Receiver`] drives a machine from a transport subscription on a spawned
//! task and hands out its events through a [`ReceiverHandle`].

use std::collections::BTreeMap;
use std::sync::Arc;

use mqxfer_protocol::{
    AckMessage, ControlMessage, EndMessage, Frame, StartMessage, ack_topic, decode_frame,
    encode_control,
};
use mqxfer_transport::{Subscription, Transport, TransportError};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{MessagePolicy, TransferConfig};
use crate::sink::{Sink, SinkFactory};
use crate::types::{SessionState, TransferReport, TransferSession};
use crate::TransferError;

/// Capacity of the event channel between the pump and its handle.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Receiver notifications. Each session ends with exactly one `Done` or
/// `Failed`.
#[derive(Debug)]
pub enum ReceiverEvent {
    Started { file_name: String, total_size: u64 },
    Done(TransferReport),
    Failed(TransferError),
}

struct ActiveSession {
    session: TransferSession,
    start: StartMessage,
    sink: Sink,
    /// Chunks that arrived ahead of the expected sequence.
    reorder: BTreeMap<u64, Vec<u8>>,
}

/// Frame dispatcher for a single data topic.
pub struct ReceiverMachine {
    topic: String,
    ack_topic: String,
    transport: Arc<dyn Transport>,
    sinks: Arc<dyn SinkFactory>,
    config: TransferConfig,
    active: Option<ActiveSession>,
    /// Start of the session that ended last. Its trailing chunk and end
    /// frames are dropped until the next start arrives.
    ended: Option<StartMessage>,
    last_state: SessionState,
}

impl ReceiverMachine {
    pub fn new(
        topic: impl Into<String>,
        transport: Arc<dyn Transport>,
        sinks: Arc<dyn SinkFactory>,
        config: TransferConfig,
    ) -> Self {
        let topic = topic.into();
        Self {
            ack_topic: ack_topic(&topic),
            topic,
            transport,
            sinks,
            config,
            active: None,
            ended: None,
            last_state: SessionState::Idle,
        }
    }

    /// State of the current session, or of the last one once it ended.
    pub fn state(&self) -> SessionState {
        self.active
            .as_ref()
            .map(|a| a.session.state())
            .unwrap_or(self.last_state)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Processes one inbound message and returns the events it produced.
    pub async fn handle(&mut self, topic: &str, payload: &[u8]) -> Vec<ReceiverEvent> {
        if topic != self.topic {
            trace!(topic, "ignoring message for another topic");
            return Vec::new();
        }

        let frame = match decode_frame(payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(topic, bytes = payload.len(), "malformed message: {e}");
                return self.fail(TransferError::from(e));
            }
        };

        match frame {
            Frame::Control(ControlMessage::Start(start)) => self.on_start(start).await,
            Frame::Chunk { sequence, payload } => self.on_chunk(sequence, payload).await,
            Frame::Control(ControlMessage::End(end)) => self.on_end(end).await,
            Frame::Control(ControlMessage::Ack(ack)) => {
                self.unexpected(format!("ack {} on data topic", ack.sequence))
            }
        }
    }

    /// Fails the active session with `err`, if there is one.
    pub fn abort(&mut self, err: TransferError) -> Vec<ReceiverEvent> {
        if self.active.is_none() {
            return Vec::new();
        }
        self.fail(err)
    }

    async fn on_start(&mut self, start: StartMessage) -> Vec<ReceiverEvent> {
        let mut events = Vec::new();

        if let Some(active) = &self.active {
            if active.start == start && active.session.bytes_transferred() == 0 {
                debug!(file_name = %start.file_name, "duplicate start, ignoring");
                return events;
            }
            let detail = format!(
                "session for {} superseded by a new start",
                active.start.file_name
            );
            events.extend(self.fail(TransferError::Protocol(detail)));
        }

        let sink = match self.sinks.open(&start.file_name).await {
            Ok(sink) => sink,
            Err(e) => {
                warn!(file_name = %start.file_name, "cannot open sink: {e}");
                self.ended = Some(start);
                self.last_state = SessionState::Failed;
                events.push(ReceiverEvent::Failed(e));
                return events;
            }
        };

        let mut session = TransferSession::new(&start.file_name, start.total_size);
        if let Err(e) = session.advance(SessionState::MetadataReceived) {
            events.push(ReceiverEvent::Failed(e));
            return events;
        }
        info!(
            topic = %self.topic,
            file_name = %start.file_name,
            total_size = start.total_size,
            id = %session.id(),
            "receiving"
        );
        events.push(ReceiverEvent::Started {
            file_name: start.file_name.clone(),
            total_size: start.total_size,
        });
        self.ended = None;
        self.active = Some(ActiveSession {
            session,
            start,
            sink,
            reorder: BTreeMap::new(),
        });
        events
    }

    async fn on_chunk(&mut self, sequence: u64, payload: &[u8]) -> Vec<ReceiverEvent> {
        let max_reorder = self.config.max_reorder_chunks;
        let Some(active) = self.active.as_mut() else {
            if let Some(ended) = &self.ended {
                debug!(sequence, file_name = %ended.file_name, "chunk for ended session, dropping");
                return Vec::new();
            }
            return self.unexpected(format!("chunk {sequence} with no active session"));
        };

        let expected = active.session.expected_sequence();
        if sequence < expected {
            debug!(sequence, "duplicate chunk, re-acknowledging");
            return self.send_ack(sequence).await;
        }
        if sequence > expected {
            if active.reorder.contains_key(&sequence) {
                debug!(sequence, "duplicate buffered chunk, ignoring");
                return Vec::new();
            }
            let buffered = active.reorder.len();
            if buffered >= max_reorder {
                return self.fail(TransferError::Protocol(format!(
                    "chunk {sequence} arrived while {buffered} chunks were buffered waiting for {expected}"
                )));
            }
            trace!(sequence, expected, "buffering out-of-order chunk");
            active.reorder.insert(sequence, payload.to_vec());
            return Vec::new();
        }

        let mut events = self.write_chunk(sequence, payload).await;
        while events.is_empty() {
            let next = match self.active.as_mut() {
                Some(active) => {
                    let seq = active.session.expected_sequence();
                    active.reorder.remove(&seq).map(|data| (seq, data))
                }
                None => None,
            };
            let Some((seq, data)) = next else { break };
            events = self.write_chunk(seq, &data).await;
        }
        events
    }

    /// Appends an in-order chunk to the sink and acknowledges it.
    async fn write_chunk(&mut self, sequence: u64, payload: &[u8]) -> Vec<ReceiverEvent> {
        let Some(active) = self.active.as_mut() else {
            return Vec::new();
        };

        if active.session.state() == SessionState::MetadataReceived {
            if let Err(e) = active.session.advance(SessionState::Streaming) {
                return self.fail(e);
            }
        }
        let declared = active.session.total_size();
        let received = active.session.bytes_transferred() + payload.len() as u64;
        if declared != 0 && received > declared {
            return self.fail(TransferError::SizeMismatch {
                expected: declared,
                actual: received,
            });
        }
        if let Err(e) = active.sink.write_all(payload).await {
            return self.fail(e.into());
        }
        if let Err(e) = active.session.record_chunk(sequence, payload) {
            return self.fail(e);
        }
        debug!(sequence, bytes = payload.len(), "chunk written");
        self.send_ack(sequence).await
    }

    async fn send_ack(&mut self, sequence: u64) -> Vec<ReceiverEvent> {
        let ack: ControlMessage = AckMessage { sequence }.into();
        let payload = match encode_control(&ack) {
            Ok(payload) => payload,
            Err(e) => return self.fail(TransferError::Protocol(format!("encode ack: {e}"))),
        };
        match self
            .transport
            .publish(&self.ack_topic, payload, self.config.qos)
            .await
        {
            Ok(()) => Vec::new(),
            Err(e) => self.fail(e.into()),
        }
    }

    async fn on_end(&mut self, end: EndMessage) -> Vec<ReceiverEvent> {
        let Some(mut active) = self.active.take() else {
            if let Some(ended) = &self.ended {
                debug!(file_name = %ended.file_name, "end for ended session, dropping");
                return Vec::new();
            }
            return self.unexpected("end with no active session".to_string());
        };

        let mut outcome = finalize(&mut active, &end).await;
        if outcome.is_ok() {
            if let Err(e) = self.sinks.commit(&active.start.file_name).await {
                outcome = Err(e);
            }
        }
        match outcome {
            Ok(report) => {
                self.last_state = SessionState::Done;
                info!(
                    topic = %self.topic,
                    file_name = %report.file_name,
                    bytes = report.bytes_transferred,
                    checksum = %report.checksum,
                    "transfer verified"
                );
                self.ended = Some(active.start);
                vec![ReceiverEvent::Done(report)]
            }
            Err(e) => {
                active.session.fail();
                drop(active.sink);
                self.sinks.discard(&active.start.file_name);
                self.last_state = SessionState::Failed;
                warn!(
                    topic = %self.topic,
                    file_name = %active.start.file_name,
                    "transfer failed: {e}"
                );
                self.ended = Some(active.start);
                vec![ReceiverEvent::Failed(e)]
            }
        }
    }

    /// Applies the configured policy to a message that fits no session.
    fn unexpected(&mut self, detail: String) -> Vec<ReceiverEvent> {
        match self.config.unexpected_messages {
            MessagePolicy::Ignore => {
                debug!(topic = %self.topic, "{detail}, ignoring");
                Vec::new()
            }
            MessagePolicy::Reject => {
                warn!(topic = %self.topic, "{detail}");
                self.fail(TransferError::Protocol(detail))
            }
        }
    }

    /// Ends the active session (if any) with `err`. The sink is released
    /// without being finalized.
    fn fail(&mut self, err: TransferError) -> Vec<ReceiverEvent> {
        if let Some(mut active) = self.active.take() {
            active.session.fail();
            drop(active.sink);
            self.sinks.discard(&active.start.file_name);
            warn!(
                topic = %self.topic,
                file_name = %active.start.file_name,
                sequence = active.session.last_sequence(),
                "transfer failed: {err}"
            );
            self.ended = Some(active.start);
        }
        self.last_state = SessionState::Failed;
        vec![ReceiverEvent::Failed(err)]
    }
}

async fn finalize(
    active: &mut ActiveSession,
    end: &EndMessage,
) -> Result<TransferReport, TransferError> {
    if !active.reorder.is_empty() {
        return Err(TransferError::Protocol(format!(
            "end received with chunk {} missing ({} buffered)",
            active.session.expected_sequence(),
            active.reorder.len()
        )));
    }

    active.session.advance(SessionState::Finalizing)?;
    // Every buffered write reaches the sink before anything is verified.
    active.sink.shutdown().await?;

    let declared = match active.session.total_size() {
        0 => end.total_size.unwrap_or(0),
        size => size,
    };
    let actual = active.session.bytes_transferred();
    if actual != declared {
        return Err(TransferError::SizeMismatch {
            expected: declared,
            actual,
        });
    }

    let digest = active.session.digest();
    if !digest.eq_ignore_ascii_case(&end.checksum) {
        return Err(TransferError::ChecksumMismatch {
            expected: end.checksum.clone(),
            actual: digest,
        });
    }

    active.session.advance(SessionState::Done)?;
    Ok(TransferReport {
        file_name: active.session.file_name().to_string(),
        checksum: digest,
        total_size: declared,
        bytes_transferred: actual,
    })
}

// ---------------------------------------------------------------------------
// Receiver / ReceiverHandle
// ---------------------------------------------------------------------------

/// Listens on a topic and writes every announced transfer to a sink.
pub struct Receiver {
    transport: Arc<dyn Transport>,
    sinks: Arc<dyn SinkFactory>,
    config: TransferConfig,
}

impl Receiver {
    pub fn new(
        transport: Arc<dyn Transport>,
        sinks: Arc<dyn SinkFactory>,
        config: TransferConfig,
    ) -> Self {
        Self {
            transport,
            sinks,
            config,
        }
    }

    /// Subscribes to `topic` and starts processing messages in the
    /// background.
    pub async fn start(self, topic: &str) -> Result<ReceiverHandle, TransferError> {
        self.config.validate()?;
        let sub = self.transport.subscribe(topic, self.config.qos).await?;
        debug!(topic, "receiver subscribed");

        let machine = ReceiverMachine::new(topic, self.transport, self.sinks, self.config);
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(receive_pump(sub, machine, tx, cancel.clone()));

        Ok(ReceiverHandle {
            events: rx,
            cancel,
            task: Some(task),
        })
    }
}

async fn receive_pump(
    mut sub: Subscription,
    mut machine: ReceiverMachine,
    events: mpsc::Sender<ReceiverEvent>,
    cancel: CancellationToken,
) {
    loop {
        let produced = tokio::select! {
            _ = cancel.cancelled() => break,

            msg = sub.recv() => match msg {
                Some(msg) => machine.handle(&msg.topic, &msg.payload).await,
                None => {
                    debug!("subscription ended");
                    let last = machine.abort(TransferError::Transport(TransportError::Closed));
                    forward(&events, last, &cancel).await;
                    break;
                }
            },
        };
        if !forward(&events, produced, &cancel).await {
            break;
        }
    }
}

/// Sends `produced` to the handle. Returns `false` once nobody is listening.
async fn forward(
    events: &mpsc::Sender<ReceiverEvent>,
    produced: Vec<ReceiverEvent>,
    cancel: &CancellationToken,
) -> bool {
    for event in produced {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            result = events.send(event) => {
                if result.is_err() {
                    return false;
                }
            }
        }
    }
    true
}

/// Handle on a running [`Receiver`]. Dropping it stops the receiver and
/// releases any open sink without completing its session.
pub struct ReceiverHandle {
    events: mpsc::Receiver<ReceiverEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ReceiverHandle {
    /// Next event, or `None` once the receiver has stopped.
    pub async fn next_event(&mut self) -> Option<ReceiverEvent> {
        self.events.recv().await
    }

    /// Waits for the next session outcome, skipping start notifications.
    pub async fn wait_for_outcome(&mut self) -> Result<TransferReport, TransferError> {
        loop {
            match self.next_event().await {
                Some(ReceiverEvent::Started { .. }) => continue,
                Some(ReceiverEvent::Done(report)) => return Ok(report),
                Some(ReceiverEvent::Failed(e)) => return Err(e),
                None => return Err(TransferError::Transport(TransportError::Closed)),
            }
        }
    }

    /// Stops the receiver and waits for its task to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ReceiverHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
