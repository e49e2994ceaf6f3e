//! Shared test support: an in-process mock device
//!
//! `MockDevice::start` binds an ephemeral port, accepts one connection,
//! sends the handshake, and runs a script against the device side of the
//! socket on its own thread.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use kinetic::auth::Authenticator;
use kinetic::config::{FrameFormat, SessionConfig};
use kinetic::protocol::{
    read_frame, AuthInfo, BincodeCodec, Command, CommandHeader, CommandStatus, Frame, KeyValue,
    Message, MessageCodec, MessageType, OperationKind, Status,
};

pub const CONNECTION_ID: i64 = 4242;
pub const IDENTITY: i64 = 1;
pub const HMAC_KEY: &[u8] = b"asdfasdf";

// =============================================================================
// Device Settings
// =============================================================================

#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub connection_id: i64,
    pub cluster_version: i64,
    pub identity: i64,
    pub hmac_key: Bytes,
    pub send_handshake: bool,
    pub handshake_status: Status,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            connection_id: CONNECTION_ID,
            cluster_version: 0,
            identity: IDENTITY,
            hmac_key: Bytes::from_static(HMAC_KEY),
            send_handshake: true,
            handshake_status: Status::Success,
        }
    }
}

// =============================================================================
// Mock Device
// =============================================================================

pub struct MockDevice {
    port: u16,
    handle: Option<JoinHandle<()>>,
}

impl MockDevice {
    /// Start a device with default settings
    pub fn start<F>(script: F) -> Self
    where
        F: FnOnce(&mut DeviceSide) + Send + 'static,
    {
        Self::start_with(DeviceSettings::default(), script)
    }

    pub fn start_with<F>(settings: DeviceSettings, script: F) -> Self
    where
        F: FnOnce(&mut DeviceSide) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut device = DeviceSide::new(stream, settings);
            if device.settings.send_handshake {
                device.send_handshake();
            }
            script(&mut device);
        });

        Self {
            port,
            handle: Some(handle),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Client config pointing at this device
    pub fn config(&self) -> SessionConfig {
        SessionConfig::builder()
            .host("127.0.0.1")
            .port(self.port)
            .identity(IDENTITY)
            .hmac_key(Bytes::from_static(HMAC_KEY))
            .handshake_timeout_ms(2000)
            .connect_timeout_ms(2000)
            .build()
    }

    /// Wait for the script to finish, propagating its panics
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("device script panicked");
        }
    }
}

// =============================================================================
// Device Side
// =============================================================================

/// A request as the device saw it
#[derive(Debug, Clone)]
pub struct Received {
    pub command: Command,
    pub value: Bytes,
    pub authenticated: bool,
}

impl Received {
    pub fn sequence(&self) -> u64 {
        self.command.header.sequence
    }

    pub fn kind(&self) -> OperationKind {
        match self.command.header.message_type {
            MessageType::Request(kind) => kind,
            other => panic!("not a request: {:?}", other),
        }
    }

    pub fn metadata_only(&self) -> bool {
        self.command
            .key_value
            .as_ref()
            .map_or(false, |kv| kv.metadata_only)
    }

    pub fn key(&self) -> Bytes {
        self.command
            .key_value
            .as_ref()
            .map(|kv| kv.key.clone())
            .unwrap_or_default()
    }
}

pub struct DeviceSide {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    codec: BincodeCodec,
    auth: Authenticator,
    format: FrameFormat,
    pub settings: DeviceSettings,
}

impl DeviceSide {
    fn new(stream: TcpStream, settings: DeviceSettings) -> Self {
        Self {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: stream,
            codec: BincodeCodec::new(),
            auth: Authenticator::new(settings.identity, settings.hmac_key.clone()),
            format: FrameFormat::default(),
            settings,
        }
    }

    fn header(&self, message_type: MessageType, ack_sequence: u64) -> CommandHeader {
        CommandHeader {
            cluster_version: self.settings.cluster_version,
            connection_id: self.settings.connection_id,
            sequence: 0,
            ack_sequence,
            message_type,
            timeout_ms: 0,
        }
    }

    pub fn send_handshake(&mut self) {
        let status = self.settings.handshake_status;
        self.send_unsolicited(status);
    }

    /// Next request, or `None` once the client closed the connection
    pub fn recv(&mut self) -> Option<Received> {
        let frame = read_frame(&mut self.reader, &self.format).ok()?;
        let message = self.codec.decode_message(&frame.message).unwrap();
        let authenticated = match &message.auth {
            AuthInfo::Hmac { identity, hmac } => {
                self.auth.verify(*identity, &message.command, hmac).is_ok()
            }
            AuthInfo::Unsolicited => false,
        };
        let command = self.codec.decode_command(&message.command).unwrap();
        Some(Received {
            command,
            value: frame.value,
            authenticated,
        })
    }

    /// Receive exactly `count` requests
    pub fn recv_many(&mut self, count: usize) -> Vec<Received> {
        (0..count)
            .map(|_| self.recv().expect("client closed early"))
            .collect()
    }

    /// Block until the client closes the connection
    pub fn wait_for_close(&mut self) {
        while self.recv().is_some() {}
    }

    /// Build the response command for `request`
    pub fn response(&self, request: &Received, status: Status) -> Command {
        let mut command = Command::new(
            self.header(MessageType::Response(request.kind()), request.sequence()),
        );
        command.status = Some(CommandStatus {
            code: status,
            message: None,
        });
        command
    }

    /// Reply with `status` and no payload
    pub fn respond(&mut self, request: &Received, status: Status) {
        let command = self.response(request, status);
        self.send_command(&command, Bytes::new());
    }

    /// Reply to a read with an entry
    pub fn respond_entry(&mut self, request: &Received, key_value: KeyValue, value: Bytes) {
        let mut command = self.response(request, Status::Success);
        command.key_value = Some(key_value);
        self.send_command(&command, value);
    }

    /// Send a signed command
    pub fn send_command(&mut self, command: &Command, value: Bytes) {
        let command_bytes = self.codec.encode_command(command).unwrap();
        let message = Message {
            auth: self.auth.auth_info(&command_bytes).unwrap(),
            command: command_bytes,
        };
        self.send_message(&message, value);
    }

    /// Send a response whose HMAC does not match its command
    pub fn send_tampered(&mut self, request: &Received) {
        let command = self.response(request, Status::Success);
        let command_bytes = self.codec.encode_command(&command).unwrap();
        let mut hmac = self.auth.sign(&command_bytes).unwrap().to_vec();
        hmac[0] ^= 0xFF;
        let message = Message {
            auth: AuthInfo::Hmac {
                identity: self.settings.identity,
                hmac: Bytes::from(hmac),
            },
            command: command_bytes,
        };
        self.send_message(&message, Bytes::new());
    }

    /// Send a device-initiated status without HMAC
    pub fn send_unsolicited(&mut self, status: Status) {
        let mut command = Command::new(self.header(MessageType::Unsolicited, 0));
        command.status = Some(CommandStatus {
            code: status,
            message: None,
        });
        let message = Message {
            auth: AuthInfo::Unsolicited,
            command: self.codec.encode_command(&command).unwrap(),
        };
        self.send_message(&message, Bytes::new());
    }

    pub fn send_message(&mut self, message: &Message, value: Bytes) {
        let frame = Frame::new(self.codec.encode_message(message).unwrap(), value);
        let bytes = frame.encode(&self.format).unwrap();
        self.send_raw(&bytes);
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        // The client may already have torn the connection down
        let _ = self.writer.write_all(bytes);
        let _ = self.writer.flush();
    }

    /// Answer every request from an in-memory store until the client closes
    pub fn serve_store(&mut self) {
        let mut store: BTreeMap<Bytes, (KeyValue, Bytes)> = BTreeMap::new();

        while let Some(request) = self.recv() {
            if !request.authenticated {
                self.respond(&request, Status::HmacFailure);
                continue;
            }

            let key = request.key();
            match request.kind() {
                OperationKind::Put => {
                    let kv = request.command.key_value.clone().unwrap_or_default();
                    let current = store.get(&key).map(|(stored, _)| stored.db_version.clone());
                    if !kv.force && current.clone().unwrap_or_default() != kv.db_version {
                        self.respond(&request, Status::VersionMismatch);
                        continue;
                    }
                    let stored = KeyValue {
                        db_version: kv.new_version.clone(),
                        new_version: Bytes::new(),
                        ..kv
                    };
                    store.insert(key, (stored, request.value.clone()));
                    self.respond(&request, Status::Success);
                }
                OperationKind::Get => match store.get(&key).cloned() {
                    Some((kv, _)) if request.metadata_only() => {
                        self.respond_entry(&request, kv, Bytes::new())
                    }
                    Some((kv, value)) => self.respond_entry(&request, kv, value),
                    None => self.respond(&request, Status::NotFound),
                },
                OperationKind::GetNext => {
                    let next = store
                        .range(key.clone()..)
                        .find(|(k, _)| **k != key)
                        .map(|(_, v)| v.clone());
                    match next {
                        Some((kv, value)) => self.respond_entry(&request, kv, value),
                        None => self.respond(&request, Status::NotFound),
                    }
                }
                OperationKind::GetPrevious => {
                    let previous = store.range(..key.clone()).next_back().map(|(_, v)| v.clone());
                    match previous {
                        Some((kv, value)) => self.respond_entry(&request, kv, value),
                        None => self.respond(&request, Status::NotFound),
                    }
                }
                OperationKind::GetKeyRange => {
                    let range = request.command.range.clone().unwrap();
                    let mut keys: Vec<Bytes> = store
                        .keys()
                        .filter(|k| {
                            let above = if range.start_inclusive {
                                **k >= range.start_key
                            } else {
                                **k > range.start_key
                            };
                            let below = if range.end_inclusive {
                                **k <= range.end_key
                            } else {
                                **k < range.end_key
                            };
                            above && below
                        })
                        .cloned()
                        .collect();
                    if range.reverse {
                        keys.reverse();
                    }
                    keys.truncate(range.max_returned as usize);
                    let mut command = self.response(&request, Status::Success);
                    command.keys = keys;
                    self.send_command(&command, Bytes::new());
                }
                OperationKind::Delete => {
                    let kv = request.command.key_value.clone().unwrap_or_default();
                    let current = store.get(&key).map(|(stored, _)| stored.db_version.clone());
                    match current {
                        None => self.respond(&request, Status::NotFound),
                        Some(version) if !kv.force && version != kv.db_version => {
                            self.respond(&request, Status::VersionMismatch)
                        }
                        Some(_) => {
                            store.remove(&key);
                            self.respond(&request, Status::Success);
                        }
                    }
                }
                OperationKind::NoOp | OperationKind::Flush => {
                    self.respond(&request, Status::Success)
                }
            }
        }
    }
}
