//! # Error Taxonomy
//!
//! All errors that can cross the wire are modeled as a single closed enum so
//! that the dispatcher and client proxy can map between a Rust error value
//! and the `ERROR.kind` string carried on the wire without ad-hoc string
//! matching at each call site.

use std::fmt;

use thiserror::Error;

/// The wire-carried error taxonomy from the protocol design.
///
/// Every variant here corresponds 1:1 to an `ERROR.kind` value that may
/// appear in a frame payload. `Internal` is reserved for dispatcher bugs and
/// should never be constructed deliberately by command code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TransportError,
    CodecError,
    ProtocolError,
    CodecNegotiation,
    UnknownService,
    UnknownCommand,
    BadArguments,
    Cancelled,
    TimeoutError,
    CommandError,
    Internal,
}

impl ErrorKind {
    /// The identifier used in the wire `ERROR.kind` field.
    pub fn as_wire_str(self) -> &'static str {
        match self {
            ErrorKind::TransportError => "TransportError",
            ErrorKind::CodecError => "CodecError",
            ErrorKind::ProtocolError => "ProtocolError",
            ErrorKind::CodecNegotiation => "CodecNegotiation",
            ErrorKind::UnknownService => "UnknownService",
            ErrorKind::UnknownCommand => "UnknownCommand",
            ErrorKind::BadArguments => "BadArguments",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::TimeoutError => "TimeoutError",
            ErrorKind::CommandError => "CommandError",
            ErrorKind::Internal => "Internal",
        }
    }

    /// Parse a wire `ERROR.kind` string back into a typed variant.
    ///
    /// An unrecognized string is treated as `Internal` rather than rejected
    /// outright, since a peer running a newer protocol revision may send a
    /// kind this build doesn't know about yet.
    pub fn from_wire_str(s: &str) -> Self {
        match s {
            "TransportError" => ErrorKind::TransportError,
            "CodecError" => ErrorKind::CodecError,
            "ProtocolError" => ErrorKind::ProtocolError,
            "CodecNegotiation" => ErrorKind::CodecNegotiation,
            "UnknownService" => ErrorKind::UnknownService,
            "UnknownCommand" => ErrorKind::UnknownCommand,
            "BadArguments" => ErrorKind::BadArguments,
            "Cancelled" => ErrorKind::Cancelled,
            "TimeoutError" => ErrorKind::TimeoutError,
            "CommandError" => ErrorKind::CommandError,
            _ => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

/// The engine's single error type, covering both local failures (transport
/// I/O, codec mismatches) and errors reflected back from a remote peer.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no common codec between client offer and server support")]
    CodecNegotiation,

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("unknown command: {0}.{1}")]
    UnknownCommand(String, String),

    #[error("bad arguments: {0}")]
    BadArguments(String),

    #[error("call cancelled")]
    Cancelled,

    #[error("call timed out")]
    Timeout,

    #[error("command error: {0}")]
    Command {
        message: String,
        traceback: Option<String>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl RpcError {
    /// The wire `kind` this error would be reported under.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::Transport(_) => ErrorKind::TransportError,
            RpcError::Codec(_) => ErrorKind::CodecError,
            RpcError::Protocol(_) => ErrorKind::ProtocolError,
            RpcError::CodecNegotiation => ErrorKind::CodecNegotiation,
            RpcError::UnknownService(_) => ErrorKind::UnknownService,
            RpcError::UnknownCommand(_, _) => ErrorKind::UnknownCommand,
            RpcError::BadArguments(_) => ErrorKind::BadArguments,
            RpcError::Cancelled => ErrorKind::Cancelled,
            RpcError::Timeout => ErrorKind::TimeoutError,
            RpcError::Command { .. } => ErrorKind::CommandError,
            RpcError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Build the `{message, traceback?}` pair carried by an `ERROR` frame.
    ///
    /// `traceback_enabled` mirrors the server's debug flag (§7): tracebacks
    /// are never included unless the server was explicitly configured to
    /// expose them.
    pub fn to_wire_message(&self, traceback_enabled: bool) -> (String, Option<String>) {
        match self {
            RpcError::Command { message, traceback } => (
                message.clone(),
                if traceback_enabled {
                    traceback.clone()
                } else {
                    None
                },
            ),
            other => (other.to_string(), None),
        }
    }

    /// Reconstruct an error from a wire `ERROR` frame's fields, used on the
    /// receiving side to raise a typed error from `{kind, message, traceback}`.
    pub fn from_wire(kind: ErrorKind, message: String, traceback: Option<String>) -> Self {
        match kind {
            ErrorKind::TransportError => RpcError::Transport(std::io::Error::other(message)),
            ErrorKind::CodecError => RpcError::Codec(message),
            ErrorKind::ProtocolError => RpcError::Protocol(message),
            ErrorKind::CodecNegotiation => RpcError::CodecNegotiation,
            ErrorKind::UnknownService => RpcError::UnknownService(message),
            ErrorKind::UnknownCommand => {
                let mut parts = message.splitn(2, '.');
                let service = parts.next().unwrap_or_default().to_string();
                let command = parts.next().unwrap_or_default().to_string();
                RpcError::UnknownCommand(service, command)
            }
            ErrorKind::BadArguments => RpcError::BadArguments(message),
            ErrorKind::Cancelled => RpcError::Cancelled,
            ErrorKind::TimeoutError => RpcError::Timeout,
            ErrorKind::CommandError => RpcError::Command {
                message,
                traceback,
            },
            ErrorKind::Internal => RpcError::Internal(message),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Codec(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
