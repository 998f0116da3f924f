use std::fmt;

/// The error taxonomy of the store: invalid arguments, out-of-range record
/// ids, underlying I/O failures, and malformed log lines hit during
/// recovery.
#[derive(Debug)]
pub enum StoreError {
    InvalidArgument(String),
    OutOfBounds(u64),
    Io(std::io::Error),
    LogParse(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            StoreError::OutOfBounds(id) => write!(f, "record id {} is out of bounds", id),
            StoreError::Io(e) => write!(f, "io error: {}", e),
            StoreError::LogParse(line) => write!(f, "malformed log line: {}", line),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

pub type StoreResult<T = ()> = Result<T, StoreError>;
