use crate::command::Handle;
use crate::drivers::DriverKind;
use thiserror::Error;

/// Coarse classification every failure maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed request field, caught before any backend call.
    Validation,
    /// Opening a connection failed or timed out.
    Connection,
    /// Unknown, closed or mismatched handle.
    Handle,
    /// The backend rejected the SQL or failed mid-statement.
    Execution,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Connection => "connection",
            ErrorKind::Handle => "handle",
            ErrorKind::Execution => "execution",
        }
    }

    /// Stable numeric code used by the native ABI.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::Validation => 1,
            ErrorKind::Connection => 2,
            ErrorKind::Handle => 3,
            ErrorKind::Execution => 4,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("cannot open {driver} connection: {reason}")]
    Connection { driver: DriverKind, reason: String },

    #[error("unknown or closed handle {0}")]
    UnknownHandle(Handle),

    #[error("handle {handle} was opened with driver {actual}, not {requested}")]
    DriverMismatch {
        handle: Handle,
        actual: DriverKind,
        requested: DriverKind,
    },

    #[error("execution failed: {0}")]
    Execution(#[from] sqlx::Error),

    #[error("batch {index} starting at line {line} failed: {source}")]
    Batch {
        index: usize,
        line: usize,
        #[source]
        source: Box<EdgeError>,
    },
}

pub type Result<T> = std::result::Result<T, EdgeError>;

impl EdgeError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        EdgeError::Validation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EdgeError::Validation(_) => ErrorKind::Validation,
            EdgeError::Connection { .. } => ErrorKind::Connection,
            EdgeError::UnknownHandle(_) | EdgeError::DriverMismatch { .. } => ErrorKind::Handle,
            EdgeError::Execution(_) => ErrorKind::Execution,
            EdgeError::Batch { source, .. } => source.kind(),
        }
    }
}
