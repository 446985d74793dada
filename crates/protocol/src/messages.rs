use serde::{Deserialize, Serialize};

/// Opens a transfer session: names the content and declares its size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMessage {
    pub file_name: String,
    /// Declared byte length; 0 when the transmitter could not determine it.
    pub total_size: u64,
}

/// Closes a transfer session with the digest of everything sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndMessage {
    /// Lowercase hex SHA-256 of the concatenated chunk payloads.
    pub checksum: String,
    /// Bytes actually sent. Used as the declared size when the start message
    /// declared 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
}

/// Confirms that the receiver processed the chunk with `sequence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckMessage {
    pub sequence: u64,
}

/// Control envelope, discriminated by its `kind` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ControlMessage {
    Start(StartMessage),
    End(EndMessage),
    Ack(AckMessage),
}

impl ControlMessage {
    /// Short name of the message kind, as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::End(_) => "end",
            Self::Ack(_) => "ack",
        }
    }
}

impl From<StartMessage> for ControlMessage {
    fn from(msg: StartMessage) -> Self {
        Self::Start(msg)
    }
}

impl From<EndMessage> for ControlMessage {
    fn from(msg: EndMessage) -> Self {
        Self::End(msg)
    }
}

impl From<AckMessage> for ControlMessage {
    fn from(msg: AckMessage) -> Self {
        Self::Ack(msg)
    }
}
