//! Common error types for Tether.

use thiserror::Error;

/// Result type alias using Tether's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Tether operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (socket, stdin, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create an internal error from any displayable type.
    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Self::Internal(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        assert_eq!(
            Error::config("bad peer key").to_string(),
            "configuration error: bad peer key"
        );
        assert_eq!(
            Error::internal("oops").to_string(),
            "internal error: oops"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
