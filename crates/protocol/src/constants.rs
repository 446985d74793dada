/// Suffix appended to a transfer topic to form its acknowledgment topic.
pub const ACK_TOPIC_SUFFIX: &str = "/ack";

/// First byte of every chunk frame.
///
/// Never the first byte of an encoded control envelope, which always starts
/// with [`CONTROL_LEAD`].
pub const CHUNK_TAG: u8 = 0x00;

/// First byte of every encoded control envelope (`{`).
pub const CONTROL_LEAD: u8 = b'{';

/// Chunk frame header length: tag byte + 8-byte big-endian sequence.
pub const CHUNK_HEADER_LEN: usize = 1 + 8;

/// First sequence number assigned to a chunk.
pub const FIRST_SEQUENCE: u64 = 1;

/// Returns the acknowledgment topic derived from `topic`.
pub fn ack_topic(topic: &str) -> String {
    format!("{topic}{ACK_TOPIC_SUFFIX}")
}
