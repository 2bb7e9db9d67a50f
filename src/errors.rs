//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every failure mode surfaced to callers.
///
/// Protocol-level noise (malformed lines, unknown shapes, unregistered
/// events) is never reported through this type; it is logged and dropped.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// `start_connection` was called on a session that is already open.
    AlreadyOpen,
    /// The session has been closed and cannot be used to connect again.
    Closed,
    /// A listener removal named an event that was never registered.
    NotRegistered(String),
    /// The transport could not be opened or enumerated.
    Transport(String),
    /// Read or write failure on an open transport.
    Io(String),
    /// Outgoing event could not be encoded.
    Protocol(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::AlreadyOpen => write!(f, "serial connection has already been established"),
            Self::Closed => write!(f, "serial connection has been closed"),
            Self::NotRegistered(name) => write!(f, "there is no listener named {name}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serialport::Error> for AppError {
    fn from(err: serialport::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
