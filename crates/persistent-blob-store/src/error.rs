//! Error types for the persistent blob store

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum StoreError {
    Io(Box<io::Error>),
    Corrupt(String),
    NotFound(String),
    InvalidKey(String),
}

impl StoreError {
    /// Whether this error only means the record does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound(_) => true,
            StoreError::Io(err) => err.kind() == io::ErrorKind::NotFound,
            StoreError::Corrupt(_) | StoreError::InvalidKey(_) => false,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(err) => write!(f, "IO error: {}", err),
            StoreError::Corrupt(msg) => write!(f, "Corrupt record: {}", msg),
            StoreError::NotFound(key) => write!(f, "Record not found: {}", key),
            StoreError::InvalidKey(key) => write!(f, "Invalid record key: {:?}", key),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Io(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_error_display() {
        let err = StoreError::Corrupt("bad magic".to_string());
        assert_eq!(format!("{}", err), "Corrupt record: bad magic");
    }

    #[test]
    fn test_not_found_display() {
        let err = StoreError::NotFound("ABC.mp4".to_string());
        assert_eq!(format!("{}", err), "Record not found: ABC.mp4");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_invalid_key_display() {
        let err = StoreError::InvalidKey("../etc".to_string());
        assert_eq!(format!("{}", err), "Invalid record key: \"../etc\"");
    }

    #[test]
    fn test_io_error_source() {
        let err = StoreError::from(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_not_found());
        assert!(format!("{}", err).contains("denied"));
    }

    #[test]
    fn test_io_not_found_is_not_found() {
        let err = StoreError::from(io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());
    }
}
