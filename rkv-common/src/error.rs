//! # RecordKV Error Types
//!
//! ## Design Principles
//!
//! 1. **Name the Key**: Every adapter error carries the identifier or storage
//!    key it was raised for, so pipeline logs point at the offending record.
//! 2. **Layered Taxonomy**: `StoreError` belongs to the store collaborator and
//!    is wrapped unchanged by the adapter-level `Error`.
//! 3. **Stable Codes**: Store error kinds keep fixed numeric codes grouped by
//!    intent (client, server, transient, protocol).
//! 4. **Recoverability Hints**: Transient store errors are marked retryable.
//!    Nothing in the workspace acts on the hint; retry policy belongs to the
//!    caller or the store client.

use core::fmt;

use thiserror::Error;

/// Result type used by the adapter layer.
pub type RkvResult<T> = core::result::Result<T, Error>;

/// Result type used by store collaborators.
pub type StoreResult<T> = core::result::Result<T, StoreError>;

/// High-level category for grouping store error kinds.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCategory {
    /// Invalid input or configuration supplied by the caller.
    Client,
    /// Server-side resource or invariant failures.
    Server,
    /// Retryable conditions such as dropped connections or timeouts.
    Transient,
    /// Wire-level or payload format mismatches.
    Protocol,
}

impl ErrorCategory {
    /// Returns true if the category is safe to retry.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Kinds of failure a store collaborator can report.
#[repr(u16)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StoreErrorKind {
    /// Client error: store options could not be interpreted (code 1).
    Config = 1,

    /// Server error: the store rejected the command (code 10).
    Server = 10,
    /// Server error: the store is out of memory or capacity (code 11).
    Capacity = 11,

    /// Transient error: connection refused, reset or closed (code 20).
    Connection = 20,
    /// Transient error: a connect/read/write timeout elapsed (code 21).
    Timeout = 21,
    /// Transient error: the store is busy or still loading (code 22).
    Busy = 22,

    /// Protocol error: the reply did not match the expected shape (code 30).
    Protocol = 30,
}

impl StoreErrorKind {
    /// Returns the stable numeric code for the kind.
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Returns the coarse category of the kind.
    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::Config => ErrorCategory::Client,
            Self::Server | Self::Capacity => ErrorCategory::Server,
            Self::Connection | Self::Timeout | Self::Busy => ErrorCategory::Transient,
            Self::Protocol => ErrorCategory::Protocol,
        }
    }

    /// Converts a numeric code into a typed kind.
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(Self::Config),
            10 => Some(Self::Server),
            11 => Some(Self::Capacity),
            20 => Some(Self::Connection),
            21 => Some(Self::Timeout),
            22 => Some(Self::Busy),
            30 => Some(Self::Protocol),
            _ => None,
        }
    }
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Config => "invalid store option",
            Self::Server => "server error",
            Self::Capacity => "capacity exceeded",
            Self::Connection => "connection error",
            Self::Timeout => "timeout",
            Self::Busy => "busy",
            Self::Protocol => "protocol violation",
        };
        write!(f, "{}", label)
    }
}

/// Failure reported by a store collaborator.
///
/// The adapter never inspects or retries these; it wraps them in
/// [`Error::Store`] together with the key that was being accessed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct StoreError {
    kind: StoreErrorKind,
    message: String,
}

impl StoreError {
    /// Builds an error of the given kind.
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        StoreError {
            kind,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Config, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Protocol, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Connection, message)
    }

    /// Classifies an error reply sent by a Redis-compatible server.
    ///
    /// The first word of the reply is the error prefix (`ERR`, `OOM`, ...).
    pub fn from_server_reply(reply: &str) -> Self {
        let prefix = reply.split_whitespace().next().unwrap_or_default();
        let kind = match prefix {
            "OOM" => StoreErrorKind::Capacity,
            "BUSY" | "LOADING" | "TRYAGAIN" => StoreErrorKind::Busy,
            _ => StoreErrorKind::Server,
        };
        Self::new(kind, reply)
    }

    pub fn kind(&self) -> StoreErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if callers may retry the operation.
    pub fn is_retryable(&self) -> bool {
        self.kind.category().is_retryable()
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let kind = match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => StoreErrorKind::Timeout,
            _ => StoreErrorKind::Connection,
        };
        StoreError::new(kind, err.to_string())
    }
}

/// Failure raised by a serializer while encoding or decoding a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The record contains data the format cannot represent.
    #[error("encode failed: {0}")]
    Encode(String),
    /// The payload is malformed, truncated or does not match the record shape.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Adapter-level error returned by every `KeyValueAdapter` operation.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid adapter configuration, detected eagerly at construction.
    #[error("invalid configuration for {setting}: {reason}")]
    Configuration { setting: String, reason: String },

    /// The requested identifier has no value in the store.
    #[error("record {record_id:?} not found (key {key:?})")]
    NotFound { record_id: String, key: String },

    /// Encoding or decoding the payload stored under `key` failed.
    #[error("serialization failed for key {key:?}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: CodecError,
    },

    /// The store collaborator failed while accessing `key`.
    #[error("store request failed for key {key:?}: {source}")]
    Store {
        key: String,
        #[source]
        source: StoreError,
    },
}

impl Error {
    pub fn configuration(setting: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Configuration {
            setting: setting.into(),
            reason: reason.into(),
        }
    }

    /// Returns the storage key (or scan pattern) the error was raised for.
    ///
    /// Configuration errors happen before any key exists and return `None`.
    pub fn record_key(&self) -> Option<&str> {
        match self {
            Error::Configuration { .. } => None,
            Error::NotFound { key, .. }
            | Error::Serialization { key, .. }
            | Error::Store { key, .. } => Some(key),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Returns true only for transient store failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Store { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}
