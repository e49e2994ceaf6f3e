//! Message codec
//!
//! The engine frames, signs and transmits the command payload without
//! interpreting its byte layout; the layout belongs to a [`MessageCodec`].
//! [`BincodeCodec`] is the default implementation.

use std::fmt;

use bincode::Options;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

use super::{Command, Message};

/// Serializes messages and commands to and from bytes
pub trait MessageCodec: Send + Sync + fmt::Debug {
    fn encode_message(&self, message: &Message) -> Result<Bytes>;
    fn decode_message(&self, bytes: &[u8]) -> Result<Message>;
    fn encode_command(&self, command: &Command) -> Result<Bytes>;
    fn decode_command(&self, bytes: &[u8]) -> Result<Command>;
}

/// Compact binary codec built on bincode
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl BincodeCodec {
    pub fn new() -> Self {
        Self
    }
}

impl MessageCodec for BincodeCodec {
    fn encode_message(&self, message: &Message) -> Result<Bytes> {
        encode(message)
    }

    fn decode_message(&self, bytes: &[u8]) -> Result<Message> {
        decode(bytes)
    }

    fn encode_command(&self, command: &Command) -> Result<Bytes> {
        encode(command)
    }

    fn decode_command(&self, bytes: &[u8]) -> Result<Command> {
        decode(bytes)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    let bytes = bincode::DefaultOptions::new().serialize(value)?;
    Ok(Bytes::from(bytes))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    // Length prefixes inside the payload are peer-controlled; never let them
    // claim more than the frame actually carried.
    let value = bincode::DefaultOptions::new()
        .with_limit(bytes.len() as u64)
        .deserialize(bytes)?;
    Ok(value)
}
