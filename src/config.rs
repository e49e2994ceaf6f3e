//! Configuration for a Kinetic session
//!
//! Centralized configuration with sensible defaults.

use std::time::Duration;

use bytes::Bytes;

use crate::error::{KineticError, Result};

/// Default clear-text port of a Kinetic device
pub const DEFAULT_PORT: u16 = 8123;

/// Default identity provisioned on factory-fresh devices
pub const DEFAULT_IDENTITY: i64 = 1;

/// Default HMAC key paired with [`DEFAULT_IDENTITY`]
pub const DEFAULT_HMAC_KEY: &[u8] = b"asdfasdf";

/// Marker byte that opens every frame
pub const DEFAULT_FRAME_MARKER: u8 = b'F';

/// Maximum serialized message size accepted on the wire (1 MB)
pub const DEFAULT_MAX_MESSAGE_LEN: u32 = 1024 * 1024;

/// Maximum raw value size accepted on the wire (1 MB)
pub const DEFAULT_MAX_VALUE_LEN: u32 = 1024 * 1024;

/// Session configuration, immutable for the lifetime of one connection
#[derive(Debug, Clone)]
pub struct SessionConfig {
    // -------------------------------------------------------------------------
    // Device Addressing
    // -------------------------------------------------------------------------
    /// Device host name or IP address
    pub host: String,

    /// Device TCP port
    pub port: u16,

    // -------------------------------------------------------------------------
    // Security
    // -------------------------------------------------------------------------
    /// Cluster version; must equal the device's current cluster version
    pub cluster_version: i64,

    /// Identity (account number) used for every request
    pub identity: i64,

    /// Shared secret bound to `identity`, used as the HMAC key
    pub hmac_key: Bytes,

    // -------------------------------------------------------------------------
    // Connection Behaviour
    // -------------------------------------------------------------------------
    /// TCP connect timeout (milliseconds)
    pub connect_timeout_ms: u64,

    /// How long to wait for the device's handshake frame (milliseconds)
    pub handshake_timeout_ms: u64,

    /// Socket write timeout (milliseconds, 0 = none)
    pub write_timeout_ms: u64,

    /// Ceiling on operations outstanding at once on one connection
    pub max_outstanding: usize,

    /// Frame header contract
    pub frame: FrameFormat,
}

/// Versioned frame header contract
///
/// The marker byte and the length maxima are not hard-coded so that a
/// different device generation can be targeted without touching the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    /// First byte of every frame
    pub marker: u8,

    /// Largest serialized message accepted
    pub max_message_len: u32,

    /// Largest raw value accepted
    pub max_value_len: u32,
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self {
            marker: DEFAULT_FRAME_MARKER,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            max_value_len: DEFAULT_MAX_VALUE_LEN,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            cluster_version: 0,
            identity: DEFAULT_IDENTITY,
            hmac_key: Bytes::from_static(DEFAULT_HMAC_KEY),
            connect_timeout_ms: 5000,
            handshake_timeout_ms: 5000,
            write_timeout_ms: 5000,
            max_outstanding: 1024,
            frame: FrameFormat::default(),
        }
    }
}

impl SessionConfig {
    /// Create a new config builder
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// `host:port` string used for connecting and logging
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Check values that would make a connection unusable
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(KineticError::Config("host must not be empty".to_string()));
        }
        if self.hmac_key.is_empty() {
            return Err(KineticError::Config("hmac key must not be empty".to_string()));
        }
        if self.max_outstanding == 0 {
            return Err(KineticError::Config(
                "max_outstanding must be at least 1".to_string(),
            ));
        }
        if self.handshake_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(KineticError::Config(
                "connect and handshake timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for SessionConfig
#[derive(Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Set the device host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the device port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the expected cluster version
    pub fn cluster_version(mut self, version: i64) -> Self {
        self.config.cluster_version = version;
        self
    }

    /// Set the identity used to sign requests
    pub fn identity(mut self, identity: i64) -> Self {
        self.config.identity = identity;
        self
    }

    /// Set the shared HMAC key
    pub fn hmac_key(mut self, key: impl Into<Bytes>) -> Self {
        self.config.hmac_key = key.into();
        self
    }

    /// Set the TCP connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Set the handshake timeout (in milliseconds)
    pub fn handshake_timeout_ms(mut self, ms: u64) -> Self {
        self.config.handshake_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Set the outstanding-operation ceiling
    pub fn max_outstanding(mut self, count: usize) -> Self {
        self.config.max_outstanding = count;
        self
    }

    /// Set the frame header contract
    pub fn frame_format(mut self, format: FrameFormat) -> Self {
        self.config.frame = format;
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}
