//! # kinetic
//!
//! Client engine for the Kinetic key/value storage device protocol:
//! - Length-prefixed binary frames with bounded decoding
//! - HMAC-authenticated requests and responses
//! - Many operations in flight on one connection, completed out of order
//! - Exactly-once completion handlers, including on teardown
//! - Bounded-window chained bulk transfers
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Session                              │
//! │        connect / put / get / delete / noop / disconnect      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ submit
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                       Connection                             │
//! │     Codec + Authenticator + Frame ──▶ writer lock ──▶ TCP    │
//! └──────────┬──────────────────────────────────────┬───────────┘
//!            │ insert                               │ frames
//!            ▼                                      ▼
//!   ┌─────────────────┐   remove(ack_seq)   ┌─────────────────┐
//!   │ OperationTable  │◀────────────────────│  Receive Loop   │
//!   │  (Mutex<Map>)   │                     │  (one thread)   │
//!   └─────────────────┘                     └────────┬────────┘
//!                                                    │
//!                                                    ▼
//!                                          handler(Completion)
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod auth;
pub mod buffer;
pub mod entry;
pub mod network;
pub mod protocol;
pub mod session;
pub mod transfer;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{KineticError, Result};
pub use config::{FrameFormat, SessionConfig};
pub use entry::{Algorithm, Entry, KeyRange, Synchronization};
pub use network::{Completion, OperationOutput, SequenceNumber};
pub use protocol::{OperationKind, Status};
pub use session::Session;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of the client
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
