//! Append-only JSON-lines sink
//!
//! Workers hand records to a [`SinkHandle`]; a single writer task owns the
//! file and appends one line per record, flushing after each. Because only
//! that task touches the file, concurrent emits can never interleave partial
//! lines.
//!
//! The writer stops when every handle has been dropped. It drains whatever
//! is still buffered, flushes, and reports how many records it wrote.

mod record;

pub use record::ExtractedRecord;

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Errors that can occur while persisting records
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write records file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Sink writer has stopped")]
    Closed,

    #[error("Sink writer task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Producer side of the sink; cheap to clone, one per worker
#[derive(Debug, Clone)]
pub struct SinkHandle {
    tx: mpsc::Sender<ExtractedRecord>,
}

impl SinkHandle {
    /// Queues `record` for the writer
    ///
    /// Waits while the buffer is full. Fails only if the writer has stopped,
    /// which happens after a write error.
    pub async fn emit(&self, record: ExtractedRecord) -> Result<(), SinkError> {
        self.tx.send(record).await.map_err(|_| SinkError::Closed)
    }
}

/// Owner of the writer task
pub struct SinkWriter {
    handle: SinkHandle,
    task: JoinHandle<Result<u64, SinkError>>,
}

impl SinkWriter {
    /// Opens `path` for appending and starts the writer task
    ///
    /// # Arguments
    ///
    /// * `path` - Records file; created if missing, never truncated
    /// * `buffer` - Records that may wait in the channel before `emit` blocks
    pub async fn open(path: impl AsRef<Path>, buffer: usize) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SinkError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| SinkError::Io {
                path: path.clone(),
                source,
            })?;

        let (tx, rx) = mpsc::channel(buffer.max(1));
        let task = tokio::spawn(write_records(BufWriter::new(file), rx, path));

        Ok(Self {
            handle: SinkHandle { tx },
            task,
        })
    }

    /// Returns a new producer handle
    pub fn handle(&self) -> SinkHandle {
        self.handle.clone()
    }

    /// Drops the writer's own handle and waits for the task to drain
    ///
    /// Completes once every other handle has been dropped as well. Returns
    /// the number of records written by this writer.
    pub async fn finish(self) -> Result<u64, SinkError> {
        let Self { handle, task } = self;
        drop(handle);
        task.await?
    }
}

async fn write_records(
    mut out: BufWriter<tokio::fs::File>,
    mut rx: mpsc::Receiver<ExtractedRecord>,
    path: PathBuf,
) -> Result<u64, SinkError> {
    let io_err = |source| SinkError::Io {
        path: path.clone(),
        source,
    };
    let mut written = 0u64;

    while let Some(record) = rx.recv().await {
        let line = match record.to_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Skipping record for {}: {}", record.target(), e);
                continue;
            }
        };

        out.write_all(line.as_bytes()).await.map_err(io_err)?;
        out.flush().await.map_err(io_err)?;
        written += 1;
    }

    out.flush().await.map_err(io_err)?;
    out.get_mut().sync_all().await.map_err(io_err)?;
    tracing::debug!("Sink writer closed after {} records", written);

    Ok(written)
}
