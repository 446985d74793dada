//! Wire protocol for file transfers over a publish/subscribe transport.
//!
//! Control messages (start, end, ack) travel as JSON envelopes. Chunk payloads
//! travel as raw bytes behind a fixed-width binary prefix. See [`wire`] for the
//! framing and the classification rule.

pub mod constants;
pub mod messages;
pub mod wire;

pub use constants::ack_topic;
pub use messages::{AckMessage, ControlMessage, EndMessage, StartMessage};
pub use wire::{CodecError, Frame, decode_frame, encode_chunk, encode_control};
