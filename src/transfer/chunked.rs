//! Chunked transfer
//!
//! Streams a byte source to the device as a series of PUTs, keeping at most
//! `window` of them outstanding. Each successful completion chains the next
//! chunk from inside the completion handler; the first failure stops new
//! submissions while chunks already on the wire drain.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::buffer::ByteBuffer;
use crate::entry::{compute_tag, Algorithm, Entry, Synchronization, MAX_KEY_LEN, MAX_VALUE_LEN};
use crate::error::{KineticError, Result};
use crate::network::{Completion, CompletionHandler, SequenceNumber};
use crate::protocol::Status;
use crate::session::Session;

use super::BatchCompletion;

/// Anything that can accept a chunk PUT
pub trait ChunkSink: Send + Sync {
    /// Submit `entry`; on `Ok`, `handler` must eventually run exactly once
    fn put_chunk(&self, entry: Entry, handler: CompletionHandler) -> Result<SequenceNumber>;
}

impl ChunkSink for Session {
    fn put_chunk(&self, entry: Entry, handler: CompletionHandler) -> Result<SequenceNumber> {
        self.put(&entry, handler)
    }
}

/// Transfer parameters
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Maximum chunks outstanding at once
    pub window: usize,

    /// Bytes per chunk
    pub chunk_size: usize,

    /// Key prefix; each chunk's key is `prefix || u64be(chunk index)`
    pub prefix: Bytes,

    pub algorithm: Algorithm,
    pub synchronization: Synchronization,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            window: 15,
            chunk_size: MAX_VALUE_LEN,
            prefix: Bytes::new(),
            algorithm: Algorithm::Sha1,
            synchronization: Synchronization::WriteThrough,
        }
    }
}

impl TransferOptions {
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(KineticError::Config("window must be at least 1".to_string()));
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_VALUE_LEN {
            return Err(KineticError::Config(format!(
                "chunk size must be between 1 and {} bytes",
                MAX_VALUE_LEN
            )));
        }
        if self.prefix.len() + 8 > MAX_KEY_LEN {
            return Err(KineticError::Config(format!(
                "key prefix too long: {} bytes",
                self.prefix.len()
            )));
        }
        // Fails for algorithms we cannot compute
        compute_tag(self.algorithm, &[])?;
        Ok(())
    }
}

struct Source {
    reader: Box<dyn Read + Send>,
    next_index: u64,
}

/// One in-progress chunked transfer
pub struct Transfer<S: ChunkSink + 'static> {
    sink: Arc<S>,
    source: Mutex<Source>,
    batch: BatchCompletion,
    options: TransferOptions,
}

impl<S: ChunkSink + 'static> Transfer<S> {
    /// Start transferring `reader` through `sink`
    ///
    /// Submits up to `options.window` chunks before returning.
    pub fn start<R>(sink: Arc<S>, reader: R, options: TransferOptions) -> Result<Arc<Self>>
    where
        R: Read + Send + 'static,
    {
        options.validate()?;

        let transfer = Arc::new(Self {
            sink,
            source: Mutex::new(Source {
                reader: Box::new(reader),
                next_index: 0,
            }),
            batch: BatchCompletion::new(options.window),
            options,
        });

        for _ in 0..transfer.options.window {
            transfer.submit_next();
        }
        Ok(transfer)
    }

    /// Block until the transfer succeeds or the first chunk fails
    pub fn wait(&self) -> Status {
        self.batch.wait()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Status> {
        self.batch.wait_timeout(timeout)
    }

    pub fn batch(&self) -> &BatchCompletion {
        &self.batch
    }

    pub fn outstanding(&self) -> usize {
        self.batch.outstanding()
    }

    /// Chunks read from the source so far
    pub fn chunks_read(&self) -> u64 {
        self.source.lock().next_index
    }

    /// Reserve a slot, read one chunk, and submit it
    fn submit_next(self: &Arc<Self>) {
        if !self.batch.try_begin() {
            return;
        }

        let (index, value) = match self.read_chunk() {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                self.batch.release_exhausted();
                return;
            }
            Err(e) => {
                tracing::error!("Failed reading transfer input: {}", e);
                self.batch.release_failed(Status::ClientIoError);
                return;
            }
        };

        let entry = match self.build_entry(index, value) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!("Failed building chunk {}: {}", index, e);
                self.batch.release_failed(Status::InvalidRequest);
                return;
            }
        };

        let transfer = Arc::clone(self);
        let handler: CompletionHandler =
            Box::new(move |completion: Completion| transfer.on_complete(completion));

        if let Err(e) = self.sink.put_chunk(entry, handler) {
            tracing::warn!("Failed writing chunk {}: {}", index, e);
            self.batch.release_failed(submit_error_status(&e));
        }
    }

    fn on_complete(self: &Arc<Self>, completion: Completion) {
        self.batch.finish(completion.status);

        if completion.status.is_success() {
            self.submit_next();
        } else {
            tracing::warn!(
                "Chunk PUT sequence {} failed: {}",
                completion.sequence,
                completion.status
            );
        }
    }

    /// Read the next chunk; `None` at end of input
    fn read_chunk(&self) -> std::io::Result<Option<(u64, Bytes)>> {
        let mut source = self.source.lock();

        let mut chunk = vec![0u8; self.options.chunk_size];
        let mut filled = 0;
        while filled < chunk.len() {
            match source.reader.read(&mut chunk[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if filled == 0 {
            return Ok(None);
        }
        chunk.truncate(filled);

        let index = source.next_index;
        source.next_index += 1;
        Ok(Some((index, Bytes::from(chunk))))
    }

    fn build_entry(&self, index: u64, value: Bytes) -> Result<Entry> {
        let mut key = ByteBuffer::with_capacity(MAX_KEY_LEN);
        key.append(&self.options.prefix)?
            .append(&index.to_be_bytes())?;

        Entry::new(key.freeze(), value)
            .synchronization(self.options.synchronization)
            .compute_tag(self.options.algorithm)
    }
}

/// Store the file at `path` through `session` and wait for the outcome
pub fn store_file(
    session: Arc<Session>,
    path: impl AsRef<Path>,
    options: TransferOptions,
) -> Result<Status> {
    let path = path.as_ref();
    let file = File::open(path)?;
    tracing::info!("Storing {} (window {})", path.display(), options.window);

    let transfer = Transfer::start(session, file, options)?;
    let status = transfer.wait();

    tracing::info!("Transfer of {} finished: {}", path.display(), status);
    Ok(status)
}

/// Store several files at once through `session`, one transfer thread each
///
/// File `i` is keyed under `options.prefix || u32be(i)`, so its chunk keys
/// are `options.prefix || u32be(i) || u64be(chunk index)`. Outcomes are
/// returned in the order of `paths`.
pub fn store_files<P>(
    session: Arc<Session>,
    paths: &[P],
    options: TransferOptions,
) -> Vec<Result<Status>>
where
    P: AsRef<Path> + Sync,
{
    thread::scope(|scope| {
        let workers: Vec<_> = paths
            .iter()
            .enumerate()
            .map(|(index, path)| {
                let session = Arc::clone(&session);
                let mut prefix = options.prefix.to_vec();
                prefix.extend_from_slice(&(index as u32).to_be_bytes());
                let options = TransferOptions {
                    prefix: Bytes::from(prefix),
                    ..options.clone()
                };
                scope.spawn(move || store_file(session, path, options))
            })
            .collect();

        workers
            .into_iter()
            .map(|worker| {
                worker.join().unwrap_or_else(|_| {
                    Err(KineticError::Io(std::io::Error::new(
                        ErrorKind::Other,
                        "transfer thread panicked",
                    )))
                })
            })
            .collect()
    })
}

fn submit_error_status(error: &KineticError) -> Status {
    match error {
        // Raised while building the request; the connection is untouched
        KineticError::InvalidEntry(_)
        | KineticError::BufferOverrun { .. }
        | KineticError::Framing(_)
        | KineticError::Serialization(_)
        | KineticError::Authentication(_) => Status::InvalidRequest,
        KineticError::BackpressureExceeded { .. } => Status::DeviceBusy,
        KineticError::Io(_)
        | KineticError::ConnectionClosed
        | KineticError::DuplicateSequence(_)
        | KineticError::NotConnected => Status::ConnectionError,
        _ => Status::ClientIoError,
    }
}
