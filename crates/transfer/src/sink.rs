//! Destination sinks for received content.
//!
//! Content is staged while a session streams and only published under its
//! final name by [`SinkFactory::commit`], after verification succeeded.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncWrite, BufWriter};
use tracing::{debug, warn};

use crate::TransferError;
use crate::validation::validate_file_name;

/// Suffix of the staging file a directory sink writes into.
const PARTIAL_SUFFIX: &str = ".part";

/// Writable destination for one session. Shut down (flushed and closed)
/// before verification.
pub type Sink = Box<dyn AsyncWrite + Send + Unpin>;

pub type SinkFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransferError>> + Send + 'a>>;

/// Opens a staged sink for each announced file name.
pub trait SinkFactory: Send + Sync {
    fn open(&self, file_name: &str) -> SinkFuture<'_, Sink>;

    /// Publishes the verified, shut-down content staged for `file_name`.
    fn commit(&self, file_name: &str) -> SinkFuture<'_, ()>;

    /// Drops whatever was staged for `file_name`. Best effort.
    fn discard(&self, file_name: &str);
}

// ---------------------------------------------------------------------------
// DirectorySinkFactory
// ---------------------------------------------------------------------------

/// Writes each artifact to `<dir>/<file name>.part` and renames it to
/// `<dir>/<file name>` on commit, replacing an existing file.
pub struct DirectorySinkFactory {
    dir: PathBuf,
}

impl DirectorySinkFactory {
    /// Creates `dir` (and parents) if missing.
    pub fn new(dir: &Path) -> Result<Self, TransferError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.dir
    }

    fn partial_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(format!("{file_name}{PARTIAL_SUFFIX}"))
    }
}

impl SinkFactory for DirectorySinkFactory {
    fn open(&self, file_name: &str) -> SinkFuture<'_, Sink> {
        let file_name = file_name.to_string();
        Box::pin(async move {
            validate_file_name(&file_name)?;
            let path = self.partial_path(&file_name);
            let file = tokio::fs::File::create(&path).await?;
            debug!(path = %path.display(), "sink opened");
            Ok(Box::new(BufWriter::new(file)) as Sink)
        })
    }

    fn commit(&self, file_name: &str) -> SinkFuture<'_, ()> {
        let file_name = file_name.to_string();
        Box::pin(async move {
            validate_file_name(&file_name)?;
            let target = self.dir.join(&file_name);
            tokio::fs::rename(self.partial_path(&file_name), &target).await?;
            debug!(path = %target.display(), "artifact committed");
            Ok(())
        })
    }

    fn discard(&self, file_name: &str) {
        if validate_file_name(file_name).is_err() {
            return;
        }
        let path = self.partial_path(file_name);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "partial artifact removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), "cannot remove partial artifact: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// MemorySinkFactory
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryStore {
    staged: HashMap<String, Vec<u8>>,
    artifacts: HashMap<String, Vec<u8>>,
}

/// Keeps artifacts in memory. Content is staged when its sink shuts down and
/// becomes visible through [`artifact`](Self::artifact) once committed.
#[derive(Clone, Default)]
pub struct MemorySinkFactory {
    store: Arc<Mutex<MemoryStore>>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents of the committed artifact named `file_name`.
    pub fn artifact(&self, file_name: &str) -> Option<Vec<u8>> {
        self.store.lock().unwrap().artifacts.get(file_name).cloned()
    }

    /// Whether content for `file_name` is staged but not committed.
    pub fn is_staged(&self, file_name: &str) -> bool {
        self.store.lock().unwrap().staged.contains_key(file_name)
    }

    pub fn len(&self) -> usize {
        self.store.lock().unwrap().artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SinkFactory for MemorySinkFactory {
    fn open(&self, file_name: &str) -> SinkFuture<'_, Sink> {
        let sink = MemorySink {
            file_name: file_name.to_string(),
            buf: Vec::new(),
            store: Arc::clone(&self.store),
            closed: false,
        };
        Box::pin(async move { Ok(Box::new(sink) as Sink) })
    }

    fn commit(&self, file_name: &str) -> SinkFuture<'_, ()> {
        let file_name = file_name.to_string();
        Box::pin(async move {
            let mut store = self.store.lock().unwrap();
            let Some(data) = store.staged.remove(&file_name) else {
                return Err(TransferError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("nothing staged for {file_name}"),
                )));
            };
            store.artifacts.insert(file_name, data);
            Ok(())
        })
    }

    fn discard(&self, file_name: &str) {
        self.store.lock().unwrap().staged.remove(file_name);
    }
}

struct MemorySink {
    file_name: String,
    buf: Vec<u8>,
    store: Arc<Mutex<MemoryStore>>,
    closed: bool,
}

impl AsyncWrite for MemorySink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "sink already closed",
            )));
        }
        self.buf.extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if !self.closed {
            self.closed = true;
            let data = std::mem::take(&mut self.buf);
            self.store
                .lock()
                .unwrap()
                .staged
                .insert(self.file_name.clone(), data);
        }
        Poll::Ready(Ok(()))
    }
}
