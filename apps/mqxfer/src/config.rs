//! Application configuration.
//!
//! Read from a TOML file:
//!
//! ```toml
//! topic = "mqxfer/files"
//! output_dir = "./received"
//!
//! [transfer]
//! chunk_size = 65536
//! ack_timeout_ms = 30000
//! ```

use std::path::{Path, PathBuf};

use mqxfer_transfer::TransferConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data topic; acks use `<topic>/ack`.
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Directory received files are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub transfer: TransferConfig,
}

fn default_topic() -> String {
    "mqxfer/files".into()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("received")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            output_dir: default_output_dir(),
            transfer: TransferConfig::default(),
        }
    }
}

impl Config {
    /// Loads and validates the configuration at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.transfer.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqxfer_transfer::MessagePolicy;
    use mqxfer_transport::QoS;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.topic, "mqxfer/files");
        assert_eq!(config.output_dir, PathBuf::from("received"));
        assert_eq!(config.transfer, TransferConfig::default());
    }

    #[test]
    fn transfer_table_overrides() {
        let config = Config::parse(
            r#"
            topic = "lab/upload"
            output_dir = "/srv/in"

            [transfer]
            chunk_size = 4096
            ack_window = 4
            qos = "at_least_once"
            unexpected_messages = "reject"
            "#,
        )
        .unwrap();
        assert_eq!(config.topic, "lab/upload");
        assert_eq!(config.transfer.chunk_size, 4096);
        assert_eq!(config.transfer.ack_window, 4);
        assert_eq!(config.transfer.qos, QoS::AtLeastOnce);
        assert_eq!(config.transfer.unexpected_messages, MessagePolicy::Reject);
        assert_eq!(config.transfer.ack_timeout_ms, 30_000);
    }

    #[test]
    fn invalid_transfer_settings_rejected() {
        assert!(Config::parse("[transfer]\nchunk_size = 0\n").is_err());
        assert!(Config::parse("[transfer]\nprogress_step = 0\n").is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mqxfer.toml");
        std::fs::write(&path, "topic = \"x/y\"\n").unwrap();
        assert_eq!(Config::load(&path).unwrap().topic, "x/y");
        assert!(Config::load(&dir.path().join("missing.toml")).is_err());
    }
}
