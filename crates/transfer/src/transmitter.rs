//! Sending side of a transfer.
//!
//! Publishes a start message, then each chunk gated by the flow-control
//! window, then an end message carrying the SHA-256 of everything sent.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use mqxfer_protocol::{
    ControlMessage, EndMessage, StartMessage, ack_topic, encode_chunk, encode_control,
};
use mqxfer_transport::Transport;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::chunked::ChunkReader;
use crate::config::TransferConfig;
use crate::flow::{FlowControl, PendingAck, ack_pump};
use crate::progress::{Progress, ProgressReporter};
use crate::source::TransferSource;
use crate::types::{SessionState, TransferReport, TransferSession};
use crate::TransferError;

/// Notifications sent to the caller while a transfer runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TransmitterEvent {
    /// The start message was published.
    Started { file_name: String, total_size: u64 },
    Progress(Progress),
}

/// Sends one source over a transport. A transmitter runs at most one transfer.
pub struct Transmitter {
    transport: Arc<dyn Transport>,
    config: TransferConfig,
    cancel: CancellationToken,
    started: bool,
}

impl Transmitter {
    pub fn new(transport: Arc<dyn Transport>, config: TransferConfig) -> Self {
        Self {
            transport,
            config,
            cancel: CancellationToken::new(),
            started: false,
        }
    }

    /// Uses `cancel` instead of a private token, so the caller can abort the
    /// transfer from elsewhere.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Aborts a running transfer. No end message is published afterwards.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Transfers `source` on `topic` and resolves once the end message has
    /// been published.
    ///
    /// Events go to `events`; a closed event channel does not stop the
    /// transfer.
    pub async fn start(
        &mut self,
        source: TransferSource,
        topic: &str,
        events: &mpsc::Sender<TransmitterEvent>,
    ) -> Result<TransferReport, TransferError> {
        if self.started {
            return Err(TransferError::AlreadyStarted);
        }
        self.started = true;
        self.config.validate()?;
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let (file_name, total_size, reader) = source.into_parts();
        let mut session = TransferSession::new(file_name, total_size.unwrap_or(0));

        // Subscribe before announcing the session so no ack can be missed.
        let acks = ack_topic(topic);
        let sub = self
            .cancellable(async {
                self.transport
                    .subscribe(&acks, self.config.qos)
                    .await
                    .map_err(TransferError::from)
            })
            .await?;
        let flow = FlowControl::new();
        let pump_cancel = self.cancel.child_token();
        let pump = PumpGuard {
            task: tokio::spawn(ack_pump(sub, acks, flow.clone(), pump_cancel.clone())),
            cancel: pump_cancel,
        };

        let reader = ChunkReader::new(reader, self.config.chunk_size);
        let result = self.run(&mut session, reader, topic, &flow, events).await;
        drop(pump);

        match result {
            Ok(report) => Ok(report),
            Err(e) => {
                session.fail();
                warn!(
                    topic,
                    file_name = session.file_name(),
                    sequence = session.last_sequence(),
                    "transfer failed: {e}"
                );
                Err(e)
            }
        }
    }

    async fn run<R>(
        &self,
        session: &mut TransferSession,
        mut reader: ChunkReader<R>,
        topic: &str,
        flow: &FlowControl,
        events: &mpsc::Sender<TransmitterEvent>,
    ) -> Result<TransferReport, TransferError>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        let start = StartMessage {
            file_name: session.file_name().to_string(),
            total_size: session.total_size(),
        };
        self.publish_control(topic, start.into()).await?;
        session.advance(SessionState::MetadataSent)?;
        info!(
            topic,
            file_name = session.file_name(),
            total_size = session.total_size(),
            id = %session.id(),
            "transfer started"
        );
        self.emit(
            events,
            TransmitterEvent::Started {
                file_name: session.file_name().to_string(),
                total_size: session.total_size(),
            },
        )
        .await;

        let mut progress = ProgressReporter::new(session.total_size(), self.config.progress_step);
        let mut outstanding: VecDeque<PendingAck> = VecDeque::new();

        while let Some(chunk) = self.cancellable(reader.next_chunk()).await? {
            if session.state() == SessionState::MetadataSent {
                session.advance(SessionState::Streaming)?;
            }

            let sequence = chunk.sequence;
            let ack = flow.register(sequence);
            let frame = encode_chunk(sequence, &chunk.data);
            self.cancellable(async {
                self.transport
                    .publish(topic, frame, self.config.qos)
                    .await
                    .map_err(TransferError::from)
            })
            .await?;
            session.record_chunk(sequence, &chunk.data)?;
            outstanding.push_back(ack);
            debug!(topic, sequence, bytes = chunk.data.len(), "chunk sent");

            while outstanding.len() >= self.config.ack_window {
                if let Some(ack) = outstanding.pop_front() {
                    self.await_ack(flow, ack).await?;
                }
            }

            let sent = session.bytes_transferred();
            if let Some(p) = progress.record(sent, chunk.data.len() as u64) {
                self.emit(events, TransmitterEvent::Progress(p)).await;
            }
        }

        while let Some(ack) = outstanding.pop_front() {
            self.await_ack(flow, ack).await?;
        }

        session.advance(SessionState::Finalizing)?;
        let sent = session.bytes_transferred();
        if session.total_size() != 0 && session.total_size() != sent {
            warn!(
                topic,
                declared = session.total_size(),
                sent,
                "source length differs from declared size"
            );
        }

        let checksum = session.digest();
        let end = EndMessage {
            checksum: checksum.clone(),
            total_size: Some(sent),
        };
        self.publish_control(topic, end.into()).await?;
        session.advance(SessionState::Done)?;

        if let Some(p) = progress.complete(sent) {
            self.emit(events, TransmitterEvent::Progress(p)).await;
        }
        info!(
            topic,
            file_name = session.file_name(),
            bytes = sent,
            chunks = session.last_sequence(),
            checksum = %checksum,
            "transfer finished"
        );

        Ok(session.report(checksum))
    }

    async fn publish_control(&self, topic: &str, msg: ControlMessage) -> Result<(), TransferError> {
        let payload = encode_control(&msg)
            .map_err(|e| TransferError::Protocol(format!("encode {}: {e}", msg.kind())))?;
        trace!(topic, kind = msg.kind(), "publishing control message");
        self.cancellable(async {
            self.transport
                .publish(topic, payload, self.config.qos)
                .await
                .map_err(TransferError::from)
        })
        .await
    }

    async fn await_ack(&self, flow: &FlowControl, ack: PendingAck) -> Result<(), TransferError> {
        let sequence = ack.sequence();
        self.cancellable(flow.wait(ack, self.config.ack_timeout())).await?;
        trace!(sequence, "chunk acknowledged");
        Ok(())
    }

    /// Runs `fut` unless the transfer is cancelled first.
    async fn cancellable<T>(
        &self,
        fut: impl Future<Output = Result<T, TransferError>>,
    ) -> Result<T, TransferError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransferError::Cancelled),
            result = fut => result,
        }
    }

    async fn emit(&self, events: &mpsc::Sender<TransmitterEvent>, event: TransmitterEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            result = events.send(event) => {
                if result.is_err() {
                    trace!("event receiver dropped");
                }
            }
        }
    }
}

/// Stops the ack pump when the transfer ends or its future is dropped.
struct PumpGuard {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Drop for PumpGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}
