//! Network Module
//!
//! The protocol engine for one device connection.
//!
//! ## Architecture
//! - `Connection`: socket, handshake, serialized writes
//! - Receive thread (`dispatch`): reads, authenticates and routes responses
//! - `OperationTable`: sequence number -> pending operation
//!
//! ```text
//!  caller threads ──submit──▶ OperationTable::insert ──▶ writer lock ──▶ socket
//!                                      ▲
//!  receive thread ◀──frames── socket   │
//!        └── authenticate ── remove(ack_sequence) ──▶ handler(Completion)
//! ```

mod connection;
mod dispatch;
mod operation;
mod operation_table;

pub use connection::{Connection, ConnectionState, HandshakeInfo};
pub use operation::{
    Completion, CompletionHandler, OperationOutput, PendingOperation, Request, RequestCapture,
};
pub use operation_table::OperationTable;

/// Per-connection request identifier
pub type SequenceNumber = u64;
