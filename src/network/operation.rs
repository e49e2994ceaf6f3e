//! Operations
//!
//! A submitted request becomes a [`PendingOperation`] owned by the
//! connection's operation table. Its completion handler is an owned
//! `FnOnce`, so the only way to invoke it is to consume the operation:
//! exactly-once delivery falls out of ownership.

use std::panic::{self, AssertUnwindSafe};

use bytes::Bytes;

use crate::entry::{Entry, KeyRange};
use crate::protocol::{Command, KeyValue, OperationKind, Status};

use super::SequenceNumber;

/// Completion handler, invoked exactly once with the terminal outcome
pub type CompletionHandler = Box<dyn FnOnce(Completion) + Send + 'static>;

/// Data returned by a completed operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutput {
    Empty,
    Entry(Entry),
    Keys(Vec<Bytes>),
}

/// Terminal outcome of one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub sequence: SequenceNumber,
    pub kind: OperationKind,
    pub status: Status,

    /// Detail text from the device, or the teardown reason for `Cancelled`
    pub message: Option<String>,

    pub output: OperationOutput,
}

impl Completion {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Entry returned by a read, if any
    pub fn entry(&self) -> Option<&Entry> {
        match &self.output {
            OperationOutput::Entry(entry) => Some(entry),
            _ => None,
        }
    }

    /// Keys returned by a range scan (empty for other operations)
    pub fn keys(&self) -> &[Bytes] {
        match &self.output {
            OperationOutput::Keys(keys) => keys,
            _ => &[],
        }
    }
}

/// What to remember about a request to interpret its response
#[derive(Debug, Clone, Default)]
pub struct RequestCapture {
    /// Key of the request; fills in a read response that omits it
    pub key: Option<Bytes>,
    pub metadata_only: bool,
}

/// An outbound request before it is assigned a sequence number
#[derive(Debug, Clone)]
pub struct Request {
    pub kind: OperationKind,
    pub key_value: Option<KeyValue>,
    pub range: Option<KeyRange>,
    pub value: Bytes,
    pub capture: RequestCapture,
}

impl Request {
    pub fn put(entry: &Entry) -> Self {
        Self {
            kind: OperationKind::Put,
            key_value: Some(KeyValue::for_write(entry)),
            range: None,
            value: entry.value.clone(),
            capture: RequestCapture {
                key: Some(entry.key.clone()),
                metadata_only: false,
            },
        }
    }

    /// Get, GetNext or GetPrevious relative to `entry.key`
    pub fn read(kind: OperationKind, entry: &Entry) -> Self {
        Self {
            kind,
            key_value: Some(KeyValue::for_read(entry)),
            range: None,
            value: Bytes::new(),
            capture: RequestCapture {
                // GetNext/GetPrevious answer with a different key
                key: (kind == OperationKind::Get).then(|| entry.key.clone()),
                metadata_only: entry.metadata_only,
            },
        }
    }

    pub fn delete(entry: &Entry) -> Self {
        Self {
            kind: OperationKind::Delete,
            key_value: Some(KeyValue::for_delete(entry)),
            range: None,
            value: Bytes::new(),
            capture: RequestCapture {
                key: Some(entry.key.clone()),
                metadata_only: false,
            },
        }
    }

    pub fn key_range(range: &KeyRange) -> Self {
        Self {
            kind: OperationKind::GetKeyRange,
            key_value: None,
            range: Some(range.clone()),
            value: Bytes::new(),
            capture: RequestCapture::default(),
        }
    }

    /// NoOp or Flush: header only
    pub fn empty(kind: OperationKind) -> Self {
        Self {
            kind,
            key_value: None,
            range: None,
            value: Bytes::new(),
            capture: RequestCapture::default(),
        }
    }
}

/// A request awaiting its response
pub struct PendingOperation {
    sequence: SequenceNumber,
    kind: OperationKind,
    capture: RequestCapture,
    handler: CompletionHandler,
}

impl PendingOperation {
    pub fn new(
        sequence: SequenceNumber,
        kind: OperationKind,
        capture: RequestCapture,
        handler: CompletionHandler,
    ) -> Self {
        Self {
            sequence,
            kind,
            capture,
            handler,
        }
    }

    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Complete from the device's response command and the frame's value
    pub fn resolve(self, command: Command, value: Bytes) {
        let status = command.status_code();
        let message = command.status.and_then(|s| s.message);

        let output = match self.kind {
            OperationKind::Get | OperationKind::GetNext | OperationKind::GetPrevious
                if status.is_success() =>
            {
                let mut key_value = command.key_value.unwrap_or_default();
                if key_value.key.is_empty() {
                    if let Some(key) = &self.capture.key {
                        key_value.key = key.clone();
                    }
                }
                key_value.metadata_only = self.capture.metadata_only;
                OperationOutput::Entry(key_value.into_entry(value))
            }
            OperationKind::GetKeyRange if status.is_success() => OperationOutput::Keys(command.keys),
            _ => OperationOutput::Empty,
        };

        let completion = Completion {
            sequence: self.sequence,
            kind: self.kind,
            status,
            message,
            output,
        };
        self.complete(completion);
    }

    /// Complete with `Cancelled`, recording why
    pub fn cancel(self, reason: &str) {
        let completion = Completion {
            sequence: self.sequence,
            kind: self.kind,
            status: Status::Cancelled,
            message: Some(reason.to_string()),
            output: OperationOutput::Empty,
        };
        self.complete(completion);
    }

    /// Invoke the handler, consuming the operation
    pub fn complete(self, completion: Completion) {
        let sequence = self.sequence;
        let handler = self.handler;

        // A panicking handler must not take the receive loop down with it
        if panic::catch_unwind(AssertUnwindSafe(move || handler(completion))).is_err() {
            tracing::error!("Completion handler for sequence {} panicked", sequence);
        }
    }
}

impl std::fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOperation")
            .field("sequence", &self.sequence)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
