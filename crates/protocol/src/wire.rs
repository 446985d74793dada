//! Frame encoding and classification.
//!
//! # Wire format
//!
//! ```text
//! CONTROL: UTF-8 JSON object, first byte always '{' (0x7B)
//!   {"kind":"start","fileName":"...","totalSize":N}
//!   {"kind":"end","checksum":"<64 hex>","totalSize":N}
//!   {"kind":"ack","sequence":N}
//!
//! CHUNK:
//!   [1 byte: 0x00 tag]
//!   [8 bytes BE: sequence]
//!   [rest: raw payload]
//! ```
//!
//! Classification looks only at the first byte, so payload bytes are never
//! interpreted.

use crate::constants::{CHUNK_HEADER_LEN, CHUNK_TAG, CONTROL_LEAD, FIRST_SEQUENCE};
use crate::messages::ControlMessage;

/// Length of a hex-encoded SHA-256 digest.
const CHECKSUM_HEX_LEN: usize = 64;

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<'a> {
    Control(ControlMessage),
    Chunk { sequence: u64, payload: &'a [u8] },
}

/// Errors from frame decoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("empty frame")]
    Empty,

    #[error("chunk frame truncated: need {CHUNK_HEADER_LEN} header bytes, got {0}")]
    ChunkTruncated(usize),

    #[error("chunk sequence must start at {FIRST_SEQUENCE}, got 0")]
    ZeroSequence,

    #[error("unrecognized frame lead byte 0x{0:02x}")]
    UnknownLead(u8),

    #[error("invalid control envelope: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid checksum {0:?}: expected {CHECKSUM_HEX_LEN} hex characters")]
    InvalidChecksum(String),
}

/// Encodes a control message as a JSON envelope.
pub fn encode_control(msg: &ControlMessage) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(msg)
}

/// Encodes a chunk frame: tag, big-endian sequence, payload.
pub fn encode_chunk(sequence: u64, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(CHUNK_HEADER_LEN + payload.len());
    buf.push(CHUNK_TAG);
    buf.extend_from_slice(&sequence.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Classifies and decodes an inbound frame.
pub fn decode_frame(data: &[u8]) -> Result<Frame<'_>, CodecError> {
    let Some(&lead) = data.first() else {
        return Err(CodecError::Empty);
    };

    match lead {
        CHUNK_TAG => {
            if data.len() < CHUNK_HEADER_LEN {
                return Err(CodecError::ChunkTruncated(data.len()));
            }
            let mut seq = [0u8; 8];
            seq.copy_from_slice(&data[1..CHUNK_HEADER_LEN]);
            let sequence = u64::from_be_bytes(seq);
            if sequence == 0 {
                return Err(CodecError::ZeroSequence);
            }
            Ok(Frame::Chunk {
                sequence,
                payload: &data[CHUNK_HEADER_LEN..],
            })
        }
        CONTROL_LEAD => {
            let msg: ControlMessage = serde_json::from_slice(data)?;
            if let ControlMessage::End(end) = &msg {
                if !is_hex_digest(&end.checksum) {
                    return Err(CodecError::InvalidChecksum(end.checksum.clone()));
                }
            }
            Ok(Frame::Control(msg))
        }
        other => Err(CodecError::UnknownLead(other)),
    }
}

fn is_hex_digest(s: &str) -> bool {
    s.len() == CHECKSUM_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}
