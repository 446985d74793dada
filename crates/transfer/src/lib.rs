//! Integrity-checked file transfer over a publish/subscribe transport.
//!
//! A [`Transmitter`] frames a byte stream into sequenced chunks between a
//! start and an end message; a [`Receiver`] reassembles them into a sink and
//! verifies size and SHA-256 digest before reporting completion.

mod chunked;
mod config;
mod flow;
mod progress;
mod receiver;
mod sink;
mod source;
mod transmitter;
mod types;
mod validation;

pub use chunked::{ChunkReader, RunningHash, calculate_file_checksum, checksum_bytes};
pub use config::{MessagePolicy, TransferConfig};
pub use flow::{FlowControl, PendingAck};
pub use progress::{Progress, ProgressReporter, SpeedCalculator};
pub use receiver::{Receiver, ReceiverEvent, ReceiverHandle, ReceiverMachine};
pub use sink::{DirectorySinkFactory, MemorySinkFactory, Sink, SinkFactory, SinkFuture};
pub use source::TransferSource;
pub use transmitter::{Transmitter, TransmitterEvent};
pub use types::{Chunk, SessionState, TransferReport, TransferSession};
pub use validation::validate_file_name;

use mqxfer_protocol::CodecError;
use mqxfer_transport::TransportError;

/// Default chunk size: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("cancelled")]
    Cancelled,

    #[error("timed out waiting for ack of chunk {sequence}")]
    TransportTimeout { sequence: u64 },

    #[error("transfer already started")]
    AlreadyStarted,

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl From<CodecError> for TransferError {
    fn from(err: CodecError) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Coarse classification of a [`TransferError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    Transport,
    ChecksumMismatch,
    SizeMismatch,
    Protocol,
    Cancelled,
    TransportTimeout,
    InvalidUsage,
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::InvalidPath(_) => ErrorKind::Io,
            Self::Transport(_) => ErrorKind::Transport,
            Self::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Self::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::TransportTimeout { .. } => ErrorKind::TransportTimeout,
            Self::AlreadyStarted | Self::InvalidConfig(_) => ErrorKind::InvalidUsage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TransferError::SizeMismatch {
            expected: 100,
            actual: 96,
        };
        assert_eq!(err.to_string(), "size mismatch: expected 100 bytes, got 96");
        assert_eq!(
            TransferError::TransportTimeout { sequence: 3 }.to_string(),
            "timed out waiting for ack of chunk 3"
        );
    }

    #[test]
    fn codec_errors_are_protocol_errors() {
        let err: TransferError = CodecError::Empty.into();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.to_string().contains("empty frame"));
    }

    #[test]
    fn invalid_path_is_io_kind() {
        let err = TransferError::InvalidPath("../x".into());
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(TransferError::AlreadyStarted.kind(), ErrorKind::InvalidUsage);
    }
}
