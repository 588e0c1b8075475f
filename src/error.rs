//! Error types for dfhack-remote.

use std::fmt;

use thiserror::Error;

/// Main error type for all transport-level operations.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (configuration file only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Handshake magic or version mismatch.
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Protocol error (invalid header, unexpected reply id, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Declared or produced message exceeds the wire limit.
    #[error("Message of {0} bytes exceeds the maximum message size")]
    MessageTooLarge(usize),

    /// A client function is already bound to another target.
    #[error("Function already bound to {plugin}::{name}")]
    AlreadyBound { plugin: String, name: String },

    /// A catalog already holds a function with this name.
    #[error("Duplicate RPC function name: {0}")]
    DuplicateFunction(String),

    /// The connection's function table ran out of ids.
    #[error("Function table is full")]
    TableFull,

    /// A remote call ended with a non-`Ok` status.
    #[error("Remote call failed: {0}")]
    Call(CommandResult),

    /// A handler task panicked or was cancelled.
    #[error("Handler task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias using RemoteError.
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Status code of a remote call, carried in failure frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandResult {
    /// Transport failure: I/O error, malformed frame or oversized message.
    LinkFailure,
    /// The operation needs an interactive console.
    NeedsConsole,
    /// The operation is not implemented or not bound.
    NotImplemented,
    /// Success.
    Ok,
    /// Generic failure.
    Failure,
    /// Bad arguments.
    WrongUsage,
    /// A requested item was not found.
    NotFound,
    /// Any other code received from the peer.
    Unknown(i32),
}

impl CommandResult {
    /// Numeric wire value.
    pub fn code(self) -> i32 {
        match self {
            CommandResult::LinkFailure => -3,
            CommandResult::NeedsConsole => -2,
            CommandResult::NotImplemented => -1,
            CommandResult::Ok => 0,
            CommandResult::Failure => 1,
            CommandResult::WrongUsage => 2,
            CommandResult::NotFound => 3,
            CommandResult::Unknown(code) => code,
        }
    }

    /// Map a wire value back to a status.
    pub fn from_code(code: i32) -> Self {
        match code {
            -3 => CommandResult::LinkFailure,
            -2 => CommandResult::NeedsConsole,
            -1 => CommandResult::NotImplemented,
            0 => CommandResult::Ok,
            1 => CommandResult::Failure,
            2 => CommandResult::WrongUsage,
            3 => CommandResult::NotFound,
            other => CommandResult::Unknown(other),
        }
    }

    #[inline]
    pub fn is_ok(self) -> bool {
        self == CommandResult::Ok
    }
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandResult::LinkFailure => f.write_str("link failure"),
            CommandResult::NeedsConsole => f.write_str("needs console"),
            CommandResult::NotImplemented => f.write_str("not implemented"),
            CommandResult::Ok => f.write_str("ok"),
            CommandResult::Failure => f.write_str("failure"),
            CommandResult::WrongUsage => f.write_str("wrong usage"),
            CommandResult::NotFound => f.write_str("not found"),
            CommandResult::Unknown(code) => write!(f, "status {}", code),
        }
    }
}
