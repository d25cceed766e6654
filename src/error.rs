//! Error types for the bot framework.
//!
//! [`BotError`] covers connection lifecycle and argument validation;
//! line-level parse failures use [`LineParseError`] and never tear down a
//! live session.

use thiserror::Error;

/// Convenience type alias for Results using [`BotError`].
pub type Result<T, E = BotError> = std::result::Result<T, E>;

/// Top-level framework errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BotError {
    /// A caller supplied an unusable value (empty line, bad IP byte slice).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `connect` was called while a session is already live.
    #[error("already connected to {0}")]
    AlreadyConnected(String),

    /// I/O error while opening, reading or writing the session socket.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The server rejected our nick and automatic nick changing is off.
    #[error("nickname already in use: {0}")]
    NickAlreadyInUse(String),

    /// The server replied with a non-recoverable error during registration.
    /// Carries the raw offending line.
    #[error("irc error: {0}")]
    Irc(String),

    /// `reconnect` was called before any successful `connect`.
    #[error("not connected to any server")]
    NotConnected,
}

/// Errors encountered when splitting a raw server line into its parts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LineParseError {
    /// Line was empty.
    #[error("empty line")]
    EmptyLine,

    /// Command token was missing or malformed.
    #[error("invalid command in line: {0}")]
    InvalidCommand(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BotError::AlreadyConnected("irc.example.com".to_string());
        assert_eq!(format!("{}", err), "already connected to irc.example.com");

        let err = BotError::NickAlreadyInUse("slirc".to_string());
        assert_eq!(format!("{}", err), "nickname already in use: slirc");
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: BotError = io_err.into();
        match err {
            BotError::Io(_) => {}
            _ => panic!("expected Io variant"),
        }
    }
}
