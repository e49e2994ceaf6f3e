//! Session
//!
//! The public entry point. A `Session` is an explicit, instance-scoped
//! engine: create it, `connect`, submit operations, `disconnect`, drop it.
//! Nothing is process-global.
//!
//! Every asynchronous operation returns as soon as the request is on the
//! wire; its handler later receives a [`Completion`] on the connection's
//! receive thread. The `*_blocking` variants wait for that completion and
//! must not be called from inside a handler.

use std::sync::Arc;

use bytes::Bytes;
use crossbeam::channel;
use parking_lot::{Mutex, RwLock};

use crate::config::SessionConfig;
use crate::entry::{Entry, KeyRange};
use crate::error::{KineticError, Result};
use crate::network::{
    Completion, CompletionHandler, Connection, ConnectionState, Request, SequenceNumber,
};
use crate::protocol::{BincodeCodec, MessageCodec, OperationKind};

/// A client session with one device
pub struct Session {
    config: SessionConfig,
    codec: Arc<dyn MessageCodec>,

    /// Current connection; replaced only by an explicit `connect`
    connection: RwLock<Option<Arc<Connection>>>,

    /// Held for the whole of `connect` so concurrent callers cannot both win
    connecting: Mutex<()>,
}

impl Session {
    /// Create a session using the default codec. Does not connect.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_codec(config, Arc::new(BincodeCodec::new()))
    }

    /// Create a session with a specific command codec
    pub fn with_codec(config: SessionConfig, codec: Arc<dyn MessageCodec>) -> Self {
        Self {
            config,
            codec,
            connection: RwLock::new(None),
            connecting: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open a connection and complete the handshake
    ///
    /// Fails if the session is already connected. A connection that broke
    /// is replaced; there is no reconnection without this call.
    pub fn connect(&self) -> Result<()> {
        let connecting = self.connecting.lock();
        if self.is_connected() {
            return Err(KineticError::Config("session is already connected".to_string()));
        }

        let connection = Connection::connect(self.config.clone(), Arc::clone(&self.codec))
            .map_err(|e| {
                tracing::warn!("Failed creating connection to {}: {}", self.config.address(), e);
                e
            })?;

        let previous = self.connection.write().replace(Arc::new(connection));
        drop(connecting);
        if let Some(previous) = previous {
            previous.disconnect();
        }
        Ok(())
    }

    /// Disconnect, cancelling every pending operation. Idempotent.
    pub fn disconnect(&self) {
        // Take the connection out first: cancelled handlers may call back
        // into this session and must not find the lock held.
        let connection = self.connection.write().take();
        if let Some(connection) = connection {
            connection.disconnect();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .read()
            .as_ref()
            .map(|c| c.state() == ConnectionState::Connected)
            .unwrap_or(false)
    }

    /// The current connection
    pub fn connection(&self) -> Result<Arc<Connection>> {
        self.connection
            .read()
            .as_ref()
            .cloned()
            .ok_or(KineticError::NotConnected)
    }

    /// Operations awaiting a response on the current connection
    pub fn outstanding(&self) -> usize {
        self.connection
            .read()
            .as_ref()
            .map(|c| c.outstanding())
            .unwrap_or(0)
    }

    // =========================================================================
    // Asynchronous Operations
    // =========================================================================

    /// Store `entry`
    pub fn put<F>(&self, entry: &Entry, handler: F) -> Result<SequenceNumber>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        entry.validate()?;
        self.submit(Request::put(entry), Box::new(handler))
    }

    /// Fetch the entry stored under `key`
    pub fn get<F>(&self, key: impl Into<Bytes>, handler: F) -> Result<SequenceNumber>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        self.read(OperationKind::Get, Entry::with_key(key), handler)
    }

    /// Fetch with full control over the request (e.g. `metadata_only`)
    pub fn get_entry<F>(&self, entry: &Entry, handler: F) -> Result<SequenceNumber>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        self.read(OperationKind::Get, entry.clone(), handler)
    }

    /// Fetch the entry with the next key after `key`
    pub fn get_next<F>(&self, key: impl Into<Bytes>, handler: F) -> Result<SequenceNumber>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        self.read(OperationKind::GetNext, Entry::with_key(key), handler)
    }

    /// Fetch the entry with the previous key before `key`
    pub fn get_previous<F>(&self, key: impl Into<Bytes>, handler: F) -> Result<SequenceNumber>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        self.read(OperationKind::GetPrevious, Entry::with_key(key), handler)
    }

    /// List keys within `range`
    pub fn get_key_range<F>(&self, range: &KeyRange, handler: F) -> Result<SequenceNumber>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        range.validate()?;
        self.submit(Request::key_range(range), Box::new(handler))
    }

    /// Delete `entry.key`, checking `entry.db_version` unless `entry.force`
    pub fn delete<F>(&self, entry: &Entry, handler: F) -> Result<SequenceNumber>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        entry.validate()?;
        self.submit(Request::delete(entry), Box::new(handler))
    }

    /// Ping the device
    pub fn noop<F>(&self, handler: F) -> Result<SequenceNumber>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        self.submit(Request::empty(OperationKind::NoOp), Box::new(handler))
    }

    /// Persist all write-back entries on the device
    pub fn flush<F>(&self, handler: F) -> Result<SequenceNumber>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        self.submit(Request::empty(OperationKind::Flush), Box::new(handler))
    }

    // =========================================================================
    // Blocking Operations
    // =========================================================================

    pub fn put_blocking(&self, entry: &Entry) -> Result<Completion> {
        self.wait_for(|handler| self.put(entry, handler))
    }

    pub fn get_blocking(&self, key: impl Into<Bytes>) -> Result<Completion> {
        let key = key.into();
        self.wait_for(|handler| self.get(key, handler))
    }

    pub fn delete_blocking(&self, entry: &Entry) -> Result<Completion> {
        self.wait_for(|handler| self.delete(entry, handler))
    }

    pub fn noop_blocking(&self) -> Result<Completion> {
        self.wait_for(|handler| self.noop(handler))
    }

    pub fn flush_blocking(&self) -> Result<Completion> {
        self.wait_for(|handler| self.flush(handler))
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn read<F>(&self, kind: OperationKind, entry: Entry, handler: F) -> Result<SequenceNumber>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        entry.validate()?;
        self.submit(Request::read(kind, &entry), Box::new(handler))
    }

    fn submit(&self, request: Request, handler: CompletionHandler) -> Result<SequenceNumber> {
        // Clone the Arc so no session lock is held during the write
        let connection = self.connection()?;
        connection.submit(request, handler)
    }

    /// Submit through `submit` and block until the handler fires
    fn wait_for<S>(&self, submit: S) -> Result<Completion>
    where
        S: FnOnce(CompletionHandler) -> Result<SequenceNumber>,
    {
        let (tx, rx) = channel::bounded(1);
        submit(Box::new(move |completion: Completion| {
            // Receiver only goes away if the waiting thread is gone
            let _ = tx.send(completion);
        }))?;

        // Every accepted submission completes, cancellation included
        rx.recv().map_err(|_| KineticError::NotConnected)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}
