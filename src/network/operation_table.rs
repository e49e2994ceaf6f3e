//! Operation Table
//!
//! Maps in-flight sequence numbers to their pending operations. The table is
//! the only owner of pending state: once an operation is removed, nothing
//! else can reach it.
//!
//! ## Concurrency
//! - One `Mutex` guards both the map and the `closed` flag
//! - `drain_all` closes the table in the same critical section that empties
//!   it, so a submission racing with teardown is either drained or refused,
//!   and a response racing with teardown either finds its entry or is stale

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{KineticError, Result};
use crate::protocol::OperationKind;

use super::{PendingOperation, SequenceNumber};

/// Thread-safe sequence -> pending operation map
pub struct OperationTable {
    state: Mutex<TableState>,

    /// Maximum number of entries at once
    limit: usize,
}

struct TableState {
    pending: HashMap<SequenceNumber, PendingOperation>,
    closed: bool,
}

impl OperationTable {
    pub fn new(limit: usize) -> Self {
        Self {
            state: Mutex::new(TableState {
                pending: HashMap::new(),
                closed: false,
            }),
            limit,
        }
    }

    /// Register a pending operation
    ///
    /// Fails with `NotConnected` once drained, `BackpressureExceeded` at the
    /// limit, and `DuplicateSequence` if the sequence is already live.
    pub fn insert(&self, operation: PendingOperation) -> Result<()> {
        let mut state = self.state.lock();

        if state.closed {
            return Err(KineticError::NotConnected);
        }
        if state.pending.contains_key(&operation.sequence()) {
            return Err(KineticError::DuplicateSequence(operation.sequence()));
        }
        if state.pending.len() >= self.limit {
            return Err(KineticError::BackpressureExceeded { limit: self.limit });
        }

        state.pending.insert(operation.sequence(), operation);
        Ok(())
    }

    /// Remove and return the operation for `sequence`
    pub fn remove(&self, sequence: SequenceNumber) -> Result<PendingOperation> {
        self.state
            .lock()
            .pending
            .remove(&sequence)
            .ok_or(KineticError::OperationNotFound(sequence))
    }

    /// Remove the operation for `sequence` only if it awaits a `kind` response
    ///
    /// A mismatched kind leaves the entry in place.
    pub fn remove_response(
        &self,
        sequence: SequenceNumber,
        kind: OperationKind,
    ) -> Result<PendingOperation> {
        let mut state = self.state.lock();
        let expected = match state.pending.get(&sequence) {
            Some(operation) => operation.kind(),
            None => return Err(KineticError::UnsolicitedResponse(sequence)),
        };
        if expected != kind {
            return Err(KineticError::MismatchedResponse {
                sequence,
                expected,
                actual: kind,
            });
        }
        state
            .pending
            .remove(&sequence)
            .ok_or(KineticError::OperationNotFound(sequence))
    }

    /// Close the table and take every entry, ordered by sequence
    pub fn drain_all(&self) -> Vec<PendingOperation> {
        let mut drained: Vec<PendingOperation> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.pending.drain().map(|(_, op)| op).collect()
        };
        drained.sort_by_key(|op| op.sequence());
        drained
    }

    pub fn contains(&self, sequence: SequenceNumber) -> bool {
        self.state.lock().pending.contains_key(&sequence)
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `drain_all` has run
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}
