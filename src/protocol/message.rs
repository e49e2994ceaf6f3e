//! Protocol messages
//!
//! A frame's message section holds a [`Message`]: authentication info plus
//! the serialized [`Command`]. The HMAC is computed over the command bytes
//! exactly as they appear in the message, so the command is kept serialized
//! inside the envelope instead of nested as a structure.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::entry::{Algorithm, Entry, KeyRange, Synchronization};

use super::Status;

/// Kinds of operation a client can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Put,
    Get,
    GetNext,
    GetPrevious,
    GetKeyRange,
    Delete,
    NoOp,
    Flush,
}

/// Message type carried in the command header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Request(OperationKind),
    Response(OperationKind),
    /// Device-initiated status (handshake, imminent close)
    Unsolicited,
}

/// How a message is authenticated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthInfo {
    /// HMAC over the command bytes, keyed by the identity's secret
    Hmac { identity: i64, hmac: Bytes },

    /// Device status messages that are sent without an HMAC
    Unsolicited,
}

/// Envelope serialized into the frame's message section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub auth: AuthInfo,

    /// Serialized [`Command`]
    pub command: Bytes,
}

/// Routing and correlation fields of a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandHeader {
    pub cluster_version: i64,
    pub connection_id: i64,

    /// Request sequence number (requests)
    pub sequence: u64,

    /// Sequence of the request being answered (responses)
    pub ack_sequence: u64,

    pub message_type: MessageType,

    /// Device-side timeout for the operation, 0 = device default
    pub timeout_ms: u64,
}

/// Key/value metadata of a command; the value itself travels in the frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: Bytes,
    pub tag: Bytes,
    pub new_version: Bytes,
    pub db_version: Bytes,
    pub algorithm: Option<Algorithm>,
    pub synchronization: Option<Synchronization>,
    pub force: bool,
    pub metadata_only: bool,
}

impl KeyValue {
    /// Metadata for a write of `entry`
    pub fn for_write(entry: &Entry) -> Self {
        Self {
            key: entry.key.clone(),
            tag: entry.tag.clone(),
            new_version: entry.new_version.clone(),
            db_version: entry.db_version.clone(),
            algorithm: Some(entry.algorithm),
            synchronization: Some(entry.synchronization),
            force: entry.force,
            metadata_only: false,
        }
    }

    /// Metadata for a read of `entry.key`
    pub fn for_read(entry: &Entry) -> Self {
        Self {
            key: entry.key.clone(),
            metadata_only: entry.metadata_only,
            ..Self::default()
        }
    }

    /// Metadata for a delete of `entry`
    pub fn for_delete(entry: &Entry) -> Self {
        Self {
            key: entry.key.clone(),
            db_version: entry.db_version.clone(),
            synchronization: Some(entry.synchronization),
            force: entry.force,
            ..Self::default()
        }
    }

    /// Rebuild an entry from response metadata and the frame's value
    pub fn into_entry(self, value: Bytes) -> Entry {
        Entry {
            key: self.key,
            tag: self.tag,
            value,
            // The device reports the stored version in `db_version`
            new_version: Bytes::new(),
            db_version: self.db_version,
            algorithm: self.algorithm.unwrap_or(Algorithm::Sha1),
            synchronization: self.synchronization.unwrap_or(Synchronization::WriteThrough),
            force: false,
            metadata_only: self.metadata_only,
        }
    }
}

/// Status block of a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStatus {
    pub code: Status,
    pub message: Option<String>,
}

/// A request or response command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub header: CommandHeader,
    pub key_value: Option<KeyValue>,
    pub range: Option<KeyRange>,

    /// Keys returned by a range scan
    pub keys: Vec<Bytes>,

    pub status: Option<CommandStatus>,
}

impl Command {
    /// Command with only a header
    pub fn new(header: CommandHeader) -> Self {
        Self {
            header,
            key_value: None,
            range: None,
            keys: Vec::new(),
            status: None,
        }
    }

    /// Status code, `NotAttempted` when the command carries none
    pub fn status_code(&self) -> Status {
        self.status
            .as_ref()
            .map(|s| s.code)
            .unwrap_or(Status::NotAttempted)
    }
}
