use std::path::Path;

use tokio::io::AsyncRead;

use crate::TransferError;

/// The byte stream a transmitter sends, with the name and size it announces.
pub struct TransferSource {
    file_name: String,
    total_size: Option<u64>,
    reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl TransferSource {
    /// Wraps an arbitrary reader. `total_size` is `None` when the length is
    /// not known up front; an empty `file_name` is replaced by a generated one.
    pub fn new(
        file_name: impl Into<String>,
        reader: impl AsyncRead + Send + Unpin + 'static,
        total_size: Option<u64>,
    ) -> Self {
        let file_name = file_name.into();
        Self {
            file_name: if file_name.is_empty() {
                generated_name()
            } else {
                file_name
            },
            total_size,
            reader: Box::new(reader),
        }
    }

    /// Opens a file; name and size come from the path and its metadata.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .unwrap_or_else(generated_name);
        Ok(Self::new(file_name, file, Some(size)))
    }

    /// In-memory source of known size.
    pub fn from_bytes(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self::new(file_name, std::io::Cursor::new(data), Some(size))
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    pub(crate) fn into_parts(self) -> (String, Option<u64>, Box<dyn AsyncRead + Send + Unpin>) {
        (self.file_name, self.total_size, self.reader)
    }
}

fn generated_name() -> String {
    format!("file_{}", chrono::Utc::now().timestamp_millis())
}
