use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::TransferError;
use crate::chunked::RunningHash;

/// One sequenced slice of the source stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Wire sequence number, starting at 1.
    pub sequence: u64,
    /// Byte offset of `data` within the source stream.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
}

/// Lifecycle of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    MetadataSent,
    MetadataReceived,
    Streaming,
    Finalizing,
    Done,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    fn can_advance_to(self, next: Self) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, MetadataSent | MetadataReceived) => true,
            (MetadataSent | MetadataReceived, Streaming) => true,
            // A zero-byte source goes straight from metadata to finalizing.
            (MetadataSent | MetadataReceived | Streaming, Finalizing) => true,
            (Finalizing, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Outcome of a successful transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReport {
    pub file_name: String,
    /// Lowercase hex SHA-256 of the transferred content.
    pub checksum: String,
    pub total_size: u64,
    pub bytes_transferred: u64,
}

/// State of one transfer, owned by a single transmitter or receiver.
///
/// Not reused: every start message opens a new session.
#[derive(Debug)]
pub struct TransferSession {
    id: Uuid,
    file_name: String,
    total_size: u64,
    state: SessionState,
    last_sequence: u64,
    hash: RunningHash,
}

impl TransferSession {
    /// Creates an idle session for `file_name` declaring `total_size` bytes.
    pub fn new(file_name: impl Into<String>, total_size: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name: file_name.into(),
            total_size,
            state: SessionState::Idle,
            last_sequence: 0,
            hash: RunningHash::new(),
        }
    }

    /// Moves to `next`, rejecting transitions the lifecycle does not allow.
    pub fn advance(&mut self, next: SessionState) -> Result<(), TransferError> {
        if !self.state.can_advance_to(next) {
            return Err(TransferError::Protocol(format!(
                "invalid session transition {:?} -> {next:?}",
                self.state
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Marks the session failed. No-op once terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Failed;
        }
    }

    /// Accounts for the chunk `sequence`, which must directly follow the last
    /// recorded one.
    pub fn record_chunk(&mut self, sequence: u64, data: &[u8]) -> Result<(), TransferError> {
        if self.state != SessionState::Streaming {
            return Err(TransferError::Protocol(format!(
                "chunk {sequence} recorded while {:?}",
                self.state
            )));
        }
        if sequence != self.expected_sequence() {
            return Err(TransferError::Protocol(format!(
                "chunk {sequence} out of order, expected {}",
                self.expected_sequence()
            )));
        }
        self.hash.update(data);
        self.last_sequence = sequence;
        Ok(())
    }

    /// Sequence number the next chunk must carry.
    pub fn expected_sequence(&self) -> u64 {
        self.last_sequence + 1
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.hash.bytes()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Hex digest of the chunks recorded so far.
    pub fn digest(&self) -> String {
        self.hash.hex_digest()
    }

    /// Builds the success report with `checksum`.
    pub fn report(&self, checksum: String) -> TransferReport {
        TransferReport {
            file_name: self.file_name.clone(),
            checksum,
            total_size: self.total_size,
            bytes_transferred: self.bytes_transferred(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunked::checksum_bytes;

    fn streaming_session() -> TransferSession {
        let mut session = TransferSession::new("data.bin", 10);
        session.advance(SessionState::MetadataReceived).unwrap();
        session.advance(SessionState::Streaming).unwrap();
        session
    }

    #[test]
    fn new_session_is_idle() {
        let session = TransferSession::new("a", 1);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.bytes_transferred(), 0);
        assert_eq!(session.expected_sequence(), 1);
    }

    #[test]
    fn sessions_get_distinct_ids() {
        assert_ne!(TransferSession::new("a", 0).id(), TransferSession::new("a", 0).id());
    }

    #[test]
    fn full_lifecycle() {
        let mut session = TransferSession::new("a", 0);
        session.advance(SessionState::MetadataSent).unwrap();
        session.advance(SessionState::Streaming).unwrap();
        session.advance(SessionState::Finalizing).unwrap();
        session.advance(SessionState::Done).unwrap();
        assert!(session.state().is_terminal());
    }

    #[test]
    fn empty_source_skips_streaming() {
        let mut session = TransferSession::new("a", 0);
        session.advance(SessionState::MetadataSent).unwrap();
        session.advance(SessionState::Finalizing).unwrap();
    }

    #[test]
    fn rejects_invalid_transitions() {
        let mut session = TransferSession::new("a", 0);
        assert!(session.advance(SessionState::Streaming).is_err());
        assert!(session.advance(SessionState::Done).is_err());

        session.fail();
        assert!(session.advance(SessionState::MetadataSent).is_err());
        assert!(session.advance(SessionState::Failed).is_err());
    }

    #[test]
    fn fail_keeps_done() {
        let mut session = TransferSession::new("a", 0);
        session.advance(SessionState::MetadataSent).unwrap();
        session.advance(SessionState::Finalizing).unwrap();
        session.advance(SessionState::Done).unwrap();
        session.fail();
        assert_eq!(session.state(), SessionState::Done);
    }

    #[test]
    fn records_chunks_in_order() {
        let mut session = streaming_session();
        session.record_chunk(1, b"AABB").unwrap();
        session.record_chunk(2, b"CCDD").unwrap();
        session.record_chunk(3, b"EE").unwrap();
        assert_eq!(session.bytes_transferred(), 10);
        assert_eq!(session.last_sequence(), 3);
        assert_eq!(session.digest(), checksum_bytes(b"AABBCCDDEE"));
    }

    #[test]
    fn rejects_gap_and_replay() {
        let mut session = streaming_session();
        assert!(session.record_chunk(2, b"x").is_err());
        session.record_chunk(1, b"x").unwrap();
        assert!(session.record_chunk(1, b"x").is_err());
        assert_eq!(session.bytes_transferred(), 1);
    }

    #[test]
    fn rejects_chunk_before_streaming() {
        let mut session = TransferSession::new("a", 1);
        assert!(session.record_chunk(1, b"x").is_err());
    }

    #[test]
    fn report_uses_camel_case() {
        let session = streaming_session();
        let json = serde_json::to_value(session.report("ff".into())).unwrap();
        assert_eq!(json["fileName"], "data.bin");
        assert_eq!(json["totalSize"], 10);
        assert_eq!(json["bytesTransferred"], 0);
    }
}
