//! Error types for the SMTP session.
//!
//! Transport failures are fatal to a session; anything else that goes wrong
//! while processing a single command is recoverable, answered with a 500 and
//! the session carries on.

use std::io;

use postern_common::error::SessionError;
use thiserror::Error;

/// Errors that can occur during connection operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// I/O error during connection operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Connection was closed by peer.
    #[error("Connection closed by peer")]
    Closed,

    /// The client sent nothing for longer than the idle timeout.
    #[error("Timed out waiting for the client")]
    TimedOut,
}

/// Errors that can occur during TLS operations.
#[derive(Debug, Error)]
pub enum TlsError {
    /// I/O error during TLS operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to load TLS certificate.
    #[error("Failed to load TLS certificate from {path}: {source}")]
    CertificateLoad {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Failed to load TLS private key.
    #[error("Failed to load TLS private key from {path}: {reason}")]
    KeyLoad { path: String, reason: String },

    /// The connection is not in a state that can be upgraded.
    #[error("TLS upgrade failed: {0}")]
    UpgradeFailed(String),

    /// Rustls library error.
    #[error("TLS error: {0}")]
    Rustls(String),
}

impl From<tokio_rustls::rustls::Error> for TlsError {
    fn from(err: tokio_rustls::rustls::Error) -> Self {
        Self::Rustls(err.to_string())
    }
}

/// The outcome of a command that could not be completed normally.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The transport is gone or unusable; the session ends.
    #[error(transparent)]
    Fatal(#[from] ConnectionError),

    /// TLS negotiation failed after `220 Ready to start TLS`; the session ends.
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// Something unexpected happened while processing the command; the
    /// client gets `500 Internal server error.` and the session continues.
    #[error("{0}")]
    Recoverable(String),
}

impl CommandError {
    pub(crate) fn sink(err: &io::Error) -> Self {
        Self::Recoverable(format!("Unable to write to message sink: {err}"))
    }
}

impl From<CommandError> for SessionError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Fatal(ConnectionError::Io(err)) => Self::Connection(err),
            CommandError::Fatal(ConnectionError::Closed) => {
                Self::Connection(io::Error::from(io::ErrorKind::UnexpectedEof))
            }
            CommandError::Tls(err) => Self::Tls(err.to_string()),
            err => Self::Protocol(err.to_string()),
        }
    }
}

/// Specialized `Result` type for connection operations.
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// Specialized `Result` type for TLS operations.
pub type TlsResult<T> = std::result::Result<T, TlsError>;

/// Specialized `Result` type for command handlers.
pub type CommandResult<T> = std::result::Result<T, CommandError>;
