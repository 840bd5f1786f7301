//! Error types for the VN-100 driver

use std::fmt;

use log::warn;
use thiserror::Error;

use crate::publish::PublishError;

/// Error codes reported by the vendor SDK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VnErrorCode {
    Unknown,
    NotImplemented,
    Timeout,
    SensorInvalidParameter,
    InvalidValue,
    FileNotFound,
    NotConnected,
    PermissionDenied,
    /// Any code this driver does not recognize (raw vendor value)
    Other(i32),
}

/// How the driver reacts to an SDK error code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Abort the current operation and propagate to the caller
    Fatal,
    /// Log a warning and carry on with the sequence
    Recoverable,
}

impl VnErrorCode {
    /// Classify this code. Unrecognized codes are recoverable.
    pub fn severity(self) -> Severity {
        match self {
            VnErrorCode::Unknown
            | VnErrorCode::NotImplemented
            | VnErrorCode::NotConnected
            | VnErrorCode::PermissionDenied => Severity::Fatal,
            VnErrorCode::Timeout
            | VnErrorCode::SensorInvalidParameter
            | VnErrorCode::InvalidValue
            | VnErrorCode::FileNotFound
            | VnErrorCode::Other(_) => Severity::Recoverable,
        }
    }

    pub fn is_fatal(self) -> bool {
        self.severity() == Severity::Fatal
    }

    pub fn description(self) -> &'static str {
        match self {
            VnErrorCode::Unknown => "unknown error",
            VnErrorCode::NotImplemented => "not implemented",
            VnErrorCode::Timeout => "operation timed out",
            VnErrorCode::SensorInvalidParameter => "sensor invalid parameter",
            VnErrorCode::InvalidValue => "invalid value",
            VnErrorCode::FileNotFound => "file not found",
            VnErrorCode::NotConnected => "not connected",
            VnErrorCode::PermissionDenied => "permission denied",
            VnErrorCode::Other(_) => "unrecognized error code",
        }
    }
}

impl fmt::Display for VnErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VnErrorCode::Other(raw) => write!(f, "{} ({})", self.description(), raw),
            _ => f.write_str(self.description()),
        }
    }
}

/// Error type for VN-100 driver operations
#[derive(Error, Debug)]
pub enum Vn100Error {
    /// Fatal-class error returned by the vendor SDK
    #[error("VN: {operation} failed: {code}")]
    Device {
        operation: &'static str,
        code: VnErrorCode,
    },

    /// A fatal error interrupted streaming; `initialize()` must run again
    #[error("device session must be re-initialized after a fatal error")]
    ReinitializeRequired,

    /// Stream operation issued in the wrong state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration could not be loaded
    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Result type for VN-100 operations
pub type Result<T> = std::result::Result<T, Vn100Error>;

/// Apply the error taxonomy to a raw SDK result.
///
/// Fatal codes become `Vn100Error::Device`. Recoverable codes are logged
/// and yield `Ok(None)`; nothing is retried.
pub fn ensure<T>(
    operation: &'static str,
    result: std::result::Result<T, VnErrorCode>,
) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(code) if code.is_fatal() => Err(Vn100Error::Device { operation, code }),
        Err(code) => {
            warn!("VN: {} returned {}, continuing", operation, code);
            Ok(None)
        }
    }
}
