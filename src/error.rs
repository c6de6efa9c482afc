//! Error codes shared with the daemon, and the crate-level error type.

use thiserror::Error;

/// Protocol-level error codes.
///
/// These travel on the wire inside `ERROR` replies and are also what a
/// [`Context`](crate::client::Context) reports through
/// [`last_error`](crate::client::Context::last_error) after a failure.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// No error.
    #[error("no error")]
    Ok,

    /// Access denied by the daemon.
    #[error("access denied")]
    AccessDenied,

    /// The daemon did not recognize the command.
    #[error("unknown command")]
    InvalidCommand,

    /// A request argument was rejected.
    #[error("invalid argument")]
    InvalidArgument,

    /// An entity with that name already exists.
    #[error("entity exists")]
    EntityExists,

    /// No entity with that name or index.
    #[error("no such entity")]
    NoSuchEntity,

    /// The connection attempt was refused.
    #[error("connection refused")]
    ConnectionRefused,

    /// The peer violated the protocol; the session cannot continue.
    #[error("protocol error")]
    Protocol,

    /// A request did not complete within its deadline.
    #[error("timeout")]
    Timeout,

    /// The authentication cookie was missing, unreadable or rejected.
    #[error("no authorization key")]
    AuthKey,

    /// Internal daemon error.
    #[error("internal error")]
    Internal,

    /// The connection was terminated.
    #[error("connection terminated")]
    ConnectionTerminated,

    /// The entity was killed by the daemon.
    #[error("entity killed")]
    Killed,

    /// The server specification could not be parsed or resolved.
    #[error("invalid server")]
    InvalidServer,
}

impl ErrorCode {
    pub fn is_ok(self) -> bool {
        self == ErrorCode::Ok
    }

    /// Convert to the wire representation.
    pub fn to_wire(self) -> u32 {
        match self {
            ErrorCode::Ok => 0,
            ErrorCode::AccessDenied => 1,
            ErrorCode::InvalidCommand => 2,
            ErrorCode::InvalidArgument => 3,
            ErrorCode::EntityExists => 4,
            ErrorCode::NoSuchEntity => 5,
            ErrorCode::ConnectionRefused => 6,
            ErrorCode::Protocol => 7,
            ErrorCode::Timeout => 8,
            ErrorCode::AuthKey => 9,
            ErrorCode::Internal => 10,
            ErrorCode::ConnectionTerminated => 11,
            ErrorCode::Killed => 12,
            ErrorCode::InvalidServer => 13,
        }
    }

    /// Convert from the wire representation. Unknown codes collapse to
    /// [`ErrorCode::Internal`] so a newer daemon cannot wedge an older client.
    pub fn from_wire(code: u32) -> Self {
        match code {
            0 => ErrorCode::Ok,
            1 => ErrorCode::AccessDenied,
            2 => ErrorCode::InvalidCommand,
            3 => ErrorCode::InvalidArgument,
            4 => ErrorCode::EntityExists,
            5 => ErrorCode::NoSuchEntity,
            6 => ErrorCode::ConnectionRefused,
            7 => ErrorCode::Protocol,
            8 => ErrorCode::Timeout,
            9 => ErrorCode::AuthKey,
            10 => ErrorCode::Internal,
            11 => ErrorCode::ConnectionTerminated,
            12 => ErrorCode::Killed,
            13 => ErrorCode::InvalidServer,
            _ => ErrorCode::Internal,
        }
    }
}

/// Crate-level convenience error.
///
/// Asynchronous failures surface through the context state machine and
/// [`ErrorCode`]; this type covers the synchronous entry points.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A failure reported by the daemon or the session state machine.
    #[error("daemon error: {0}")]
    Daemon(ErrorCode),

    /// The entry point was called in a state that does not permit it.
    #[error("invalid invocation: {0}")]
    InvalidState(&'static str),

    /// Configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
