//! Error types for snapshot collection.

use std::io;
use std::path::PathBuf;

/// Result type for sockdemand operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while collecting a demand snapshot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from socket or file operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Kernel returned an error code.
    #[error("kernel error: {message} (errno {errno})")]
    Kernel {
        /// The errno value from the kernel.
        errno: i32,
        /// Human-readable error message.
        message: String,
    },

    /// Message was truncated.
    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Expected message length.
        expected: usize,
        /// Actual bytes received.
        actual: usize,
    },

    /// Invalid message format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Invalid attribute format.
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    /// Parse error in a text or binary record.
    #[error("parse error: {0}")]
    Parse(String),

    /// A data source (proc table, proc directory) could not be opened.
    #[error("cannot open {}: {source}", path.display())]
    SourceOpen {
        /// The path that failed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Error from the procfs reader.
    #[error("proc error: {0}")]
    Proc(#[from] procfs::ProcError),

    /// A failure that makes the whole cycle meaningless.
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    /// A netlink dump stopped before its DONE message.
    #[error("dump aborted: {0}")]
    DumpAborted(String),
}

impl Error {
    /// Create a kernel error from a (negative) errno value.
    pub fn from_errno(errno: i32) -> Self {
        let message = io::Error::from_raw_os_error(-errno).to_string();
        Self::Kernel {
            errno: -errno,
            message,
        }
    }

    /// Wrap an open failure with the path that caused it.
    pub fn source_open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::SourceOpen {
            path: path.into(),
            source,
        }
    }

    /// Check if this is a "not found" error (ENOENT, ENODEV, missing file).
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Kernel { errno, .. } => matches!(*errno, 2 | 19), // ENOENT=2, ENODEV=19
            Self::SourceOpen { source, .. } | Self::Io(source) => {
                source.kind() == io::ErrorKind::NotFound
            }
            Self::Proc(procfs::ProcError::NotFound(_)) => true,
            _ => false,
        }
    }

    /// Check if this is a permission error (EPERM, EACCES).
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::Kernel { errno, .. } => matches!(*errno, 1 | 13), // EPERM=1, EACCES=13
            Self::SourceOpen { source, .. } | Self::Io(source) => {
                source.kind() == io::ErrorKind::PermissionDenied
            }
            Self::Proc(procfs::ProcError::PermissionDenied(_)) => true,
            _ => false,
        }
    }

    /// Whether this error abandons the whole cycle rather than one source.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Bootstrap(_))
    }

    /// Get the errno value if this is a kernel error.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Kernel { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}
