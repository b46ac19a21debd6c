//! Streaming artifact sink.
//!
//! `open_sink` hands back a synchronous [`ArtifactWriter`] and an
//! [`UploadHandle`]. Bytes written to the writer travel in chunks over a
//! bounded channel to a blocking worker that feeds them to
//! [`ObjectStore::put_reader`], so a generated archive is never held twice in
//! memory by the producer. Closing the writer and awaiting the handle reports
//! whether the upload succeeded.
//!
//! If the worker fails the receiving end goes away and the next write
//! returns `BrokenPipe`; the store error itself comes back from
//! [`UploadHandle::wait`]. A writer dropped without [`ArtifactWriter::close`]
//! aborts the upload instead of storing a truncated object.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::ObjectStore;

/// Bytes buffered by the writer before a chunk is handed to the worker.
const CHUNK_SIZE: usize = 64 * 1024;

/// Chunks in flight between writer and worker.
const CHANNEL_DEPTH: usize = 8;

enum Chunk {
    Data(Vec<u8>),
    End,
}

/// Open a streaming upload to `key`.
///
/// Must be called from within a tokio runtime; the draining worker runs on
/// the blocking thread pool.
pub fn open_sink(store: Arc<dyn ObjectStore>, key: &str) -> (ArtifactWriter, UploadHandle) {
    let (tx, rx) = sync_channel(CHANNEL_DEPTH);
    let worker_key = key.to_string();
    let join = tokio::task::spawn_blocking(move || {
        let mut reader = ChunkReader::new(rx);
        store.put_reader(&worker_key, &mut reader)
    });
    debug!(%key, "artifact sink opened");

    (
        ArtifactWriter {
            key: key.to_string(),
            tx: Some(tx),
            pending: Vec::with_capacity(CHUNK_SIZE),
        },
        UploadHandle {
            key: key.to_string(),
            join,
        },
    )
}

/// Writable end of an artifact upload.
pub struct ArtifactWriter {
    key: String,
    tx: Option<SyncSender<Chunk>>,
    pending: Vec<u8>,
}

impl ArtifactWriter {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Flush buffered bytes and mark the end of the artifact.
    pub fn close(mut self) -> io::Result<()> {
        self.send_pending()?;
        if let Some(tx) = self.tx.take() {
            tx.send(Chunk::End).map_err(|_| aborted(&self.key))?;
        }
        Ok(())
    }

    fn send_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.pending, Vec::with_capacity(CHUNK_SIZE));
        match &self.tx {
            Some(tx) => tx.send(Chunk::Data(chunk)).map_err(|_| aborted(&self.key)),
            None => Err(aborted(&self.key)),
        }
    }
}

impl Write for ArtifactWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.tx.is_none() {
            return Err(aborted(&self.key));
        }
        let room = CHUNK_SIZE - self.pending.len();
        let take = room.min(buf.len());
        self.pending.extend_from_slice(&buf[..take]);
        if self.pending.len() == CHUNK_SIZE {
            self.send_pending()?;
        }
        Ok(take)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_pending()
    }
}

impl Drop for ArtifactWriter {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!(key = %self.key, "artifact writer dropped before close, upload aborted");
        }
    }
}

fn aborted(key: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::BrokenPipe,
        format!("upload of {key} is no longer accepting data"),
    )
}

/// Completion handle for an artifact upload.
pub struct UploadHandle {
    key: String,
    join: JoinHandle<StoreResult<()>>,
}

impl UploadHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the worker to finish uploading.
    pub async fn wait(self) -> StoreResult<()> {
        match self.join.await {
            Ok(result) => {
                if result.is_ok() {
                    debug!(key = %self.key, "artifact uploaded");
                }
                result
            }
            Err(e) => Err(StoreError::Upload {
                key: self.key,
                reason: format!("upload worker did not complete: {e}"),
            }),
        }
    }
}

/// `Read` adapter over the receiving end of the chunk channel.
struct ChunkReader {
    rx: Receiver<Chunk>,
    current: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl ChunkReader {
    fn new(rx: Receiver<Chunk>) -> Self {
        Self {
            rx,
            current: Vec::new(),
            pos: 0,
            finished: false,
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.current.len() {
            if self.finished {
                return Ok(0);
            }
            match self.rx.recv() {
                Ok(Chunk::Data(data)) => {
                    self.current = data;
                    self.pos = 0;
                }
                Ok(Chunk::End) => self.finished = true,
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "artifact writer went away before close",
                    ));
                }
            }
        }
        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
