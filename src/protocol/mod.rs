//! Protocol Module
//!
//! Defines the device wire protocol.
//!
//! ## Frame Format
//! ```text
//! ┌──────────┬──────────┬──────────┬─────────────────┬─────────────────┐
//! │Marker (1)│MsgLen (4)│ValLen (4)│ Message         │ Value           │
//! └──────────┴──────────┴──────────┴─────────────────┴─────────────────┘
//! ```
//!
//! ### Message
//! The message section is a serialized [`Message`]: authentication info
//! (HMAC or unsolicited) and the serialized [`Command`]. The command carries
//! the header (cluster version, connection id, sequence, ack sequence,
//! message type), optional key/value metadata, optional key range, and, in
//! responses, a [`Status`].
//!
//! ### Value
//! Raw entry bytes for PUT requests and GET responses; empty otherwise.

mod codec;
mod frame;
mod message;
mod status;

pub use codec::{BincodeCodec, MessageCodec};
pub use frame::{read_frame, write_frame, Frame, FrameHeader, HEADER_SIZE};
pub use message::{
    AuthInfo, Command, CommandHeader, CommandStatus, KeyValue, Message, MessageType,
    OperationKind,
};
pub use status::Status;
