//! Bounded byte buffer
//!
//! An append-only buffer with a fixed capacity chosen at creation. Keys,
//! tags and frames are assembled in these so an oversized field is caught at
//! the point it is built instead of on the wire.

use std::fmt;
use std::io::Write;

use bytes::{Bytes, BytesMut};

use crate::error::{KineticError, Result};

/// Append-only buffer that never grows past its capacity
#[derive(Clone, PartialEq, Eq)]
pub struct ByteBuffer {
    data: BytesMut,
    capacity: usize,
}

impl ByteBuffer {
    /// Create an empty buffer able to hold `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Create a buffer and fill it with `bytes`
    pub fn from_slice(capacity: usize, bytes: &[u8]) -> Result<Self> {
        let mut buffer = Self::with_capacity(capacity);
        buffer.append(bytes)?;
        Ok(buffer)
    }

    /// Append bytes, failing without modification if they do not fit
    pub fn append(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        if bytes.len() > self.remaining() {
            return Err(KineticError::BufferOverrun {
                needed: bytes.len(),
                remaining: self.remaining(),
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(self)
    }

    /// Append formatted text, e.g. `buf.append_formatted(format_args!("tag_{:04}", n))`
    pub fn append_formatted(&mut self, args: fmt::Arguments<'_>) -> Result<&mut Self> {
        let mut scratch = Vec::new();
        scratch.write_fmt(args)?;
        self.append(&scratch)
    }

    /// Number of bytes written so far
    pub fn bytes_used(&self) -> usize {
        self.data.len()
    }

    /// Fixed capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes still available
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Discard the contents, keeping the capacity
    pub fn reset(&mut self) {
        self.data.clear();
    }

    /// Convert into an immutable, cheaply clonable `Bytes`
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("used", &self.data.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
