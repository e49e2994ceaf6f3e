//! Receive loop
//!
//! One thread per connection reads frames, authenticates them, and hands
//! each response to the pending operation it answers. Any framing, decoding
//! or authentication failure ends the loop and tears the connection down;
//! there is no attempt to find the next frame boundary in a corrupted stream.

use std::io::BufReader;
use std::net::TcpStream;
use std::sync::Arc;

use crate::error::{KineticError, Result};
use crate::protocol::{read_frame, AuthInfo, Frame, MessageType};

use super::connection::{ConnectionState, Shared};

/// Run until the connection fails or is disconnected
pub(crate) fn run(shared: Arc<Shared>, mut reader: BufReader<TcpStream>) {
    let connection_id = shared.handshake.connection_id;
    tracing::debug!("Receive loop started for connection {}", connection_id);

    let reason = loop {
        let result = read_frame(&mut reader, &shared.config.frame)
            .and_then(|frame| dispatch_frame(&shared, frame));
        if let Err(e) = result {
            break e;
        }
    };

    let reason = match shared.state() {
        ConnectionState::Disconnected => {
            tracing::debug!("Receive loop for connection {} stopped", connection_id);
            "connection disconnected".to_string()
        }
        _ => {
            tracing::error!(
                "Connection {} to {} failed: {}",
                connection_id,
                shared.peer_addr,
                reason
            );
            reason.to_string()
        }
    };

    shared.abort(&reason);
}

/// Authenticate one frame and complete the operation it answers
fn dispatch_frame(shared: &Shared, frame: Frame) -> Result<()> {
    let message = shared.codec.decode_message(&frame.message)?;
    let signed = match &message.auth {
        AuthInfo::Hmac { identity, hmac } => {
            shared
                .authenticator
                .verify(*identity, &message.command, hmac)?;
            true
        }
        AuthInfo::Unsolicited => false,
    };

    let command = shared.codec.decode_command(&message.command)?;
    let kind = match command.header.message_type {
        MessageType::Unsolicited => {
            // Status notices never complete an operation, whatever their ack
            tracing::warn!(
                "Unsolicited status from {}: {}",
                shared.peer_addr,
                command.status_code()
            );
            return Ok(());
        }
        other if !signed => {
            return Err(KineticError::Authentication(format!(
                "unauthenticated {:?} frame",
                other
            )));
        }
        MessageType::Response(kind) => kind,
        MessageType::Request(kind) => {
            tracing::warn!(
                "Ignoring {:?} request sent by device {}",
                kind,
                shared.peer_addr
            );
            return Ok(());
        }
    };

    let sequence = command.header.ack_sequence;
    match shared.operations.remove_response(sequence, kind) {
        Ok(operation) => {
            tracing::trace!(
                "Completing {:?} sequence {} with {}",
                kind,
                sequence,
                command.status_code()
            );
            operation.resolve(command, frame.value);
        }
        Err(e) => {
            // Already cancelled by teardown, never ours, or the wrong kind;
            // a mismatched response leaves the operation waiting
            tracing::warn!("Dropping response from {}: {}", shared.peer_addr, e);
        }
    }

    Ok(())
}
