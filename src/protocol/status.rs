//! Operation status codes
//!
//! Every completed operation carries exactly one of these.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Terminal outcome of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Initial value before any response arrives
    NotAttempted,
    Success,
    InvalidRequest,
    NotFound,
    /// Entry version on the device differs from `db_version`
    VersionMismatch,
    ClusterVersionMismatch,
    HmacFailure,
    NotAuthorized,
    NoSpace,
    DeviceInternalError,
    DeviceBusy,
    Expired,
    DataError,
    /// Transport-level failure reported locally
    ConnectionError,
    /// Local I/O failure (e.g. reading transfer input)
    ClientIoError,
    /// Orphaned by connection teardown
    Cancelled,
}

impl Status {
    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    /// Human readable description
    pub fn description(self) -> &'static str {
        match self {
            Status::NotAttempted => "NOT_ATTEMPTED",
            Status::Success => "SUCCESS",
            Status::InvalidRequest => "INVALID_REQUEST",
            Status::NotFound => "NOT_FOUND",
            Status::VersionMismatch => "VERSION_MISMATCH",
            Status::ClusterVersionMismatch => "CLUSTER_VERSION_MISMATCH",
            Status::HmacFailure => "HMAC_FAILURE",
            Status::NotAuthorized => "NOT_AUTHORIZED",
            Status::NoSpace => "NO_SPACE",
            Status::DeviceInternalError => "DEVICE_INTERNAL_ERROR",
            Status::DeviceBusy => "DEVICE_BUSY",
            Status::Expired => "EXPIRED",
            Status::DataError => "DATA_ERROR",
            Status::ConnectionError => "CONNECTION_ERROR",
            Status::ClientIoError => "CLIENT_IO_ERROR",
            Status::Cancelled => "CANCELLED",
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::NotAttempted
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}
