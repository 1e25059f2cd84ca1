//! Error types for the lirc-client crate.

use std::io;
use std::time::Duration;

use crate::protocol::ProtocolError;
use crate::transport::CodecError;

/// Unified error type for client operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("client is not connected")]
    NotConnected,

    #[error("client is already connected")]
    AlreadyConnected,

    #[error("another operation is already in progress on this client")]
    Reentrancy,

    #[error("connection lost")]
    ConnectionLost,

    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid endpoint: {0:?}")]
    InvalidEndpoint(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("lircd command failed: {0}")]
    Command(String),
}

/// True for I/O failures that mean the daemon hung up.
fn is_disconnect(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(e) if is_disconnect(e.kind()) => Self::ConnectionLost,
            CodecError::Io(e) => Self::Io(e),
            CodecError::Protocol(e) => Self::Protocol(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
