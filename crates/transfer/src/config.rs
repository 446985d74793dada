//! Transfer tuning knobs shared by transmitter and receiver.

use std::time::Duration;

use mqxfer_transport::QoS;
use serde::{Deserialize, Serialize};

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// What the receiver does with a chunk or end message that arrives while no
/// session is streaming.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePolicy {
    /// Log and drop.
    #[default]
    Ignore,
    /// Report a protocol error.
    Reject,
}

/// Transfer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Maximum payload bytes per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Chunks the transmitter may have unacknowledged at once (1 = wait for
    /// each ack before sending the next chunk).
    #[serde(default = "default_ack_window")]
    pub ack_window: usize,

    /// Upper bound on each ack wait, in milliseconds.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Minimum percent advance between progress events.
    #[serde(default = "default_progress_step")]
    pub progress_step: u8,

    /// Delivery guarantee requested from the transport.
    #[serde(default)]
    pub qos: QoS,

    #[serde(default)]
    pub unexpected_messages: MessagePolicy,

    /// Out-of-order chunks the receiver holds before failing the session.
    #[serde(default = "default_max_reorder_chunks")]
    pub max_reorder_chunks: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_ack_window() -> usize {
    1
}

fn default_ack_timeout_ms() -> u64 {
    30_000
}

fn default_progress_step() -> u8 {
    1
}

fn default_max_reorder_chunks() -> usize {
    64
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            ack_window: default_ack_window(),
            ack_timeout_ms: default_ack_timeout_ms(),
            progress_step: default_progress_step(),
            qos: QoS::default(),
            unexpected_messages: MessagePolicy::default(),
            max_reorder_chunks: default_max_reorder_chunks(),
        }
    }
}

impl TransferConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.chunk_size == 0 {
            return Err(TransferError::InvalidConfig("chunk_size must be > 0".into()));
        }
        if self.ack_window == 0 {
            return Err(TransferError::InvalidConfig("ack_window must be > 0".into()));
        }
        if self.ack_timeout_ms == 0 {
            return Err(TransferError::InvalidConfig(
                "ack_timeout_ms must be > 0".into(),
            ));
        }
        if !(1..=100).contains(&self.progress_step) {
            return Err(TransferError::InvalidConfig(format!(
                "progress_step must be within 1..=100, got {}",
                self.progress_step
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TransferConfig::default();
        config.validate().unwrap();
        assert_eq!(config.chunk_size, 64 * 1024);
        assert_eq!(config.ack_window, 1);
        assert_eq!(config.ack_timeout(), Duration::from_secs(30));
        assert_eq!(config.unexpected_messages, MessagePolicy::Ignore);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: TransferConfig =
            serde_json::from_str(r#"{"chunk_size": 4, "unexpected_messages": "reject"}"#)
                .unwrap();
        assert_eq!(config.chunk_size, 4);
        assert_eq!(config.unexpected_messages, MessagePolicy::Reject);
        assert_eq!(config.ack_window, 1);
        assert_eq!(config.qos, QoS::ExactlyOnce);
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let config = TransferConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TransferError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_zero_window() {
        let config = TransferConfig {
            ack_window: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_progress_step() {
        for step in [0u8, 101] {
            let config = TransferConfig {
                progress_step: step,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "step {step} accepted");
        }
    }
}
