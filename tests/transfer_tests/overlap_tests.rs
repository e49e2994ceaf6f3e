//! Chunked Transfer Tests
//!
//! Tests drive `Transfer` through fake sinks instead of a device.
//!
//! Tests verify:
//! - At most `window` chunks are ever outstanding
//! - Each completion chains exactly one more chunk
//! - Short inputs, empty inputs and short final chunks
//! - The first failure stops further submissions

use std::collections::{HashSet, VecDeque};
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use kinetic::entry::compute_tag;
use kinetic::network::{Completion, CompletionHandler, OperationOutput, SequenceNumber};
use kinetic::transfer::{ChunkSink, Transfer, TransferOptions};
use kinetic::{Algorithm, Entry, KineticError, OperationKind, Result, Status};
use parking_lot::Mutex;

const TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Fake Sinks
// =============================================================================

fn completion(sequence: SequenceNumber, status: Status) -> Completion {
    Completion {
        sequence,
        kind: OperationKind::Put,
        status,
        message: None,
        output: OperationOutput::Empty,
    }
}

/// Completes every PUT inside `put_chunk`, failing the chunk at `fail_at`
#[derive(Default)]
struct ImmediateSink {
    puts: Mutex<Vec<Entry>>,
    fail_at: Option<usize>,
    status: Option<Status>,
}

impl ImmediateSink {
    fn failing(fail_at: usize, status: Status) -> Self {
        Self {
            fail_at: Some(fail_at),
            status: Some(status),
            ..Self::default()
        }
    }

    fn puts(&self) -> Vec<Entry> {
        self.puts.lock().clone()
    }
}

impl ChunkSink for ImmediateSink {
    fn put_chunk(&self, entry: Entry, handler: CompletionHandler) -> Result<SequenceNumber> {
        let sequence = {
            let mut puts = self.puts.lock();
            puts.push(entry);
            puts.len() as u64 - 1
        };
        let status = match self.fail_at {
            Some(at) if at as u64 == sequence => self.status.unwrap_or(Status::DeviceInternalError),
            _ => Status::Success,
        };
        handler(completion(sequence, status));
        Ok(sequence)
    }
}

/// Holds every handler until the test completes it
#[derive(Default)]
struct DeferredSink {
    pending: Mutex<VecDeque<(SequenceNumber, CompletionHandler)>>,
    submitted: AtomicUsize,
}

impl DeferredSink {
    fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Complete the oldest pending PUT; false if none
    fn complete_next(&self, status: Status) -> bool {
        // Release the lock before the handler chains the next PUT
        let next = self.pending.lock().pop_front();
        match next {
            Some((sequence, handler)) => {
                handler(completion(sequence, status));
                true
            }
            None => false,
        }
    }
}

impl ChunkSink for DeferredSink {
    fn put_chunk(&self, _entry: Entry, handler: CompletionHandler) -> Result<SequenceNumber> {
        let sequence = self.submitted.fetch_add(1, Ordering::SeqCst) as u64;
        self.pending.lock().push_back((sequence, handler));
        Ok(sequence)
    }
}

/// Completes each PUT from another thread after a short delay
#[derive(Default)]
struct ThreadedSink {
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    keys: Mutex<Vec<Bytes>>,
}

impl ChunkSink for ThreadedSink {
    fn put_chunk(&self, entry: Entry, handler: CompletionHandler) -> Result<SequenceNumber> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let sequence = {
            let mut keys = self.keys.lock();
            keys.push(entry.key);
            keys.len() as u64 - 1
        };

        let in_flight = Arc::clone(&self.in_flight);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(1));
            in_flight.fetch_sub(1, Ordering::SeqCst);
            handler(completion(sequence, Status::Success));
        });
        Ok(sequence)
    }
}

/// Refuses every submission with the error `refusal` builds
struct RefusingSink {
    refusal: fn() -> KineticError,
}

impl RefusingSink {
    fn busy() -> Self {
        Self {
            refusal: || KineticError::BackpressureExceeded { limit: 1 },
        }
    }

    fn unframeable() -> Self {
        Self {
            refusal: || KineticError::Framing("value exceeds maximum".to_string()),
        }
    }

    fn disconnected() -> Self {
        Self {
            refusal: || KineticError::ConnectionClosed,
        }
    }
}

impl ChunkSink for RefusingSink {
    fn put_chunk(&self, _entry: Entry, _handler: CompletionHandler) -> Result<SequenceNumber> {
        Err((self.refusal)())
    }
}

struct FailingReader;

impl Read for FailingReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Other, "disk on fire"))
    }
}

fn options(window: usize, chunk_size: usize) -> TransferOptions {
    TransferOptions {
        window,
        chunk_size,
        prefix: Bytes::from_static(b"file/"),
        ..TransferOptions::default()
    }
}

fn input(len: usize) -> Cursor<Vec<u8>> {
    Cursor::new((0..len).map(|i| (i % 251) as u8).collect())
}

// =============================================================================
// Window Tests
// =============================================================================

#[test]
fn test_start_fills_window_and_no_more() {
    let sink = Arc::new(DeferredSink::default());
    let transfer = Transfer::start(Arc::clone(&sink), input(100), options(3, 10)).unwrap();

    assert_eq!(sink.pending(), 3);
    assert_eq!(transfer.outstanding(), 3);
    assert_eq!(transfer.chunks_read(), 3);
    assert_eq!(transfer.wait_timeout(Duration::from_millis(20)), None);
}

#[test]
fn test_each_completion_chains_one_chunk() {
    let sink = Arc::new(DeferredSink::default());
    let transfer = Transfer::start(Arc::clone(&sink), input(100), options(3, 10)).unwrap();

    // 10 chunks in total; the window stays full until the input runs out
    for completed in 1..=10 {
        assert!(sink.complete_next(Status::Success));
        let expected = (10 - completed).min(3);
        assert_eq!(sink.pending(), expected);
    }

    assert!(!sink.complete_next(Status::Success));
    assert_eq!(transfer.wait_timeout(TIMEOUT), Some(Status::Success));
    assert_eq!(sink.submitted.load(Ordering::SeqCst), 10);
    assert_eq!(transfer.batch().peak_outstanding(), 3);
    assert_eq!(transfer.outstanding(), 0);
}

#[test]
fn test_threaded_completions_respect_window() {
    let sink = Arc::new(ThreadedSink::default());
    let transfer = Transfer::start(Arc::clone(&sink), input(500), options(4, 10)).unwrap();

    assert_eq!(transfer.wait_timeout(TIMEOUT), Some(Status::Success));
    assert!(transfer.batch().wait_drained(TIMEOUT));

    assert!(sink.peak.load(Ordering::SeqCst) <= 4);
    assert!(transfer.batch().peak_outstanding() <= 4);

    let keys = sink.keys.lock().clone();
    assert_eq!(keys.len(), 50);
    let unique: HashSet<Bytes> = keys.into_iter().collect();
    assert_eq!(unique.len(), 50);
}

// =============================================================================
// Input Shape Tests
// =============================================================================

#[test]
fn test_fewer_chunks_than_window() {
    let sink = Arc::new(ImmediateSink::default());
    let transfer = Transfer::start(Arc::clone(&sink), input(25), options(15, 10)).unwrap();

    assert_eq!(transfer.wait(), Status::Success);
    assert_eq!(transfer.outstanding(), 0);
    assert_eq!(transfer.batch().completed(), 3);

    let puts = sink.puts();
    assert_eq!(puts.len(), 3);
    assert_eq!(puts[2].value.len(), 5);
}

#[test]
fn test_empty_input() {
    let sink = Arc::new(ImmediateSink::default());
    let transfer = Transfer::start(Arc::clone(&sink), input(0), options(15, 10)).unwrap();

    assert_eq!(transfer.wait(), Status::Success);
    assert!(sink.puts().is_empty());
}

#[test]
fn test_chunk_keys_and_tags() {
    let sink = Arc::new(ImmediateSink::default());
    let transfer = Transfer::start(Arc::clone(&sink), input(30), options(2, 10)).unwrap();
    assert_eq!(transfer.wait(), Status::Success);

    for (index, entry) in sink.puts().iter().enumerate() {
        let mut key = b"file/".to_vec();
        key.extend_from_slice(&(index as u64).to_be_bytes());
        assert_eq!(&entry.key[..], &key[..]);

        assert_eq!(entry.algorithm, Algorithm::Sha1);
        assert_eq!(entry.tag, compute_tag(Algorithm::Sha1, &entry.value).unwrap());
    }
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_failed_chunk_stops_transfer() {
    let sink = Arc::new(ImmediateSink::failing(1, Status::DeviceInternalError));
    let transfer = Transfer::start(Arc::clone(&sink), input(30), options(1, 10)).unwrap();

    assert_eq!(transfer.wait(), Status::DeviceInternalError);
    // Chunk 0 succeeded, chunk 1 failed, chunk 2 was never sent
    assert_eq!(sink.puts().len(), 2);
}

#[test]
fn test_failure_with_chunks_in_flight() {
    let sink = Arc::new(DeferredSink::default());
    let transfer = Transfer::start(Arc::clone(&sink), input(100), options(3, 10)).unwrap();

    assert!(sink.complete_next(Status::VersionMismatch));
    assert_eq!(transfer.wait_timeout(TIMEOUT), Some(Status::VersionMismatch));

    // The two in flight drain without chaining new chunks
    assert!(sink.complete_next(Status::Success));
    assert!(sink.complete_next(Status::Success));
    assert_eq!(sink.pending(), 0);
    assert_eq!(sink.submitted.load(Ordering::SeqCst), 3);
    assert!(transfer.batch().wait_drained(TIMEOUT));
    assert_eq!(transfer.wait(), Status::VersionMismatch);
}

#[test]
fn test_read_error_is_client_io_error() {
    let sink = Arc::new(ImmediateSink::default());
    let transfer = Transfer::start(Arc::clone(&sink), FailingReader, options(4, 10)).unwrap();

    assert_eq!(transfer.wait(), Status::ClientIoError);
    assert!(sink.puts().is_empty());
}

#[test]
fn test_refused_submission_is_reported() {
    let sink = Arc::new(RefusingSink::busy());
    let transfer = Transfer::start(sink, input(10), options(2, 10)).unwrap();
    assert_eq!(transfer.wait(), Status::DeviceBusy);
    assert_eq!(transfer.outstanding(), 0);
}

#[test]
fn test_unframeable_chunk_is_an_invalid_request() {
    let sink = Arc::new(RefusingSink::unframeable());
    let transfer = Transfer::start(sink, input(10), options(2, 10)).unwrap();
    assert_eq!(transfer.wait(), Status::InvalidRequest);
    assert_eq!(transfer.outstanding(), 0);
}

#[test]
fn test_closed_connection_is_a_connection_error() {
    let sink = Arc::new(RefusingSink::disconnected());
    let transfer = Transfer::start(sink, input(10), options(2, 10)).unwrap();
    assert_eq!(transfer.wait(), Status::ConnectionError);
}

#[test]
fn test_invalid_options_rejected() {
    let sink = Arc::new(ImmediateSink::default());

    assert!(Transfer::start(Arc::clone(&sink), input(1), options(0, 10)).is_err());
    assert!(Transfer::start(Arc::clone(&sink), input(1), options(1, 0)).is_err());

    let unsupported = TransferOptions {
        algorithm: Algorithm::Sha3,
        ..options(1, 10)
    };
    assert!(Transfer::start(Arc::clone(&sink), input(1), unsupported).is_err());
    assert!(sink.puts().is_empty());
}
