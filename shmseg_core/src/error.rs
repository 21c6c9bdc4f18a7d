//! Error types for SHMSEG
//!
//! Every backend failure ends up as a [`SegmentError`]. OS errors from
//! `errno` or `GetLastError` are classified through [`SegmentError::from_io`]
//! so callers can match on the same kinds regardless of platform.

use std::fmt;
use std::io;

/// Result alias used throughout the crate
pub type SegmentResult<T> = Result<T, SegmentError>;

/// Errors produced while creating, attaching, accessing or disposing a segment
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    /// Non-positive size, malformed name, or an attach size larger than the object
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A host found a same-named object of a different size
    #[error("Segment already exists: {0}")]
    AlreadyExists(String),

    /// A client found no backing object under the name
    #[error("Segment not found: {0}")]
    NotFound(String),

    /// Missing privilege (global segments) or access-control rejection
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The virtual memory mapping could not be established
    #[error("Mapping failed: {0}")]
    MapFailed(String),

    /// The segment was used after `dispose`
    #[error("Segment '{0}' has been disposed")]
    Disposed(String),

    /// OS failure that does not fit one of the kinds above
    #[error("{op} failed for '{id}': {source}")]
    Os {
        op: &'static str,
        id: String,
        #[source]
        source: io::Error,
    },

    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`SegmentError`]
///
/// The numeric values are part of the C API.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument = 1,
    AlreadyExists = 2,
    NotFound = 3,
    PermissionDenied = 4,
    MapFailed = 5,
    Disposed = 6,
    Os = 7,
    Config = 8,
    Internal = 9,
}

impl SegmentError {
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        SegmentError::InvalidArgument(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        SegmentError::Config(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        SegmentError::Internal(msg.into())
    }

    /// Classify an OS error raised by `op` on the object `id`
    pub fn from_io(op: &'static str, id: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => {
                SegmentError::NotFound(format!("{}: {} ({})", op, id, err))
            }
            io::ErrorKind::AlreadyExists => {
                SegmentError::AlreadyExists(format!("{}: {} ({})", op, id, err))
            }
            io::ErrorKind::PermissionDenied => {
                SegmentError::PermissionDenied(format!("{}: {} ({})", op, id, err))
            }
            io::ErrorKind::InvalidInput => {
                SegmentError::InvalidArgument(format!("{}: {} ({})", op, id, err))
            }
            _ => SegmentError::Os {
                op,
                id: id.to_string(),
                source: err,
            },
        }
    }

    /// Same as [`from_io`](Self::from_io) but for a mapping call
    ///
    /// Unclassified failures become `MapFailed` instead of `Os`.
    pub fn map_failed(op: &'static str, id: &str, err: io::Error) -> Self {
        match SegmentError::from_io(op, id, err) {
            SegmentError::Os { op, id, source } => {
                SegmentError::MapFailed(format!("{}: {} ({})", op, id, source))
            }
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SegmentError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            SegmentError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            SegmentError::NotFound(_) => ErrorKind::NotFound,
            SegmentError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            SegmentError::MapFailed(_) => ErrorKind::MapFailed,
            SegmentError::Disposed(_) => ErrorKind::Disposed,
            SegmentError::Os { .. } => ErrorKind::Os,
            SegmentError::Config(_) => ErrorKind::Config,
            SegmentError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::MapFailed => "MapFailed",
            ErrorKind::Disposed => "Disposed",
            ErrorKind::Os => "Os",
            ErrorKind::Config => "Config",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_are_classified() {
        let err = SegmentError::from_io(
            "shm_open",
            "/missing",
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = SegmentError::from_io(
            "shm_open",
            "/locked",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        let err = SegmentError::from_io("ftruncate", "/x", io::Error::other("disk on fire"));
        assert_eq!(err.kind(), ErrorKind::Os);
        assert!(err.to_string().contains("ftruncate"));
    }

    #[test]
    fn test_map_failed_keeps_known_kinds() {
        let err = SegmentError::map_failed("mmap", "/x", io::Error::other("no address space"));
        assert_eq!(err.kind(), ErrorKind::MapFailed);

        let err = SegmentError::map_failed(
            "mmap",
            "/x",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }
}
