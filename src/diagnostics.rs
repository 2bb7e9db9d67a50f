//! Structured diagnostics published by the receive path.
//!
//! Framing and dispatch faults never interrupt the receive loop. Instead each
//! one is logged and published on a [`broadcast`](tokio::sync::broadcast)
//! channel that callers can observe through
//! [`Session::subscribe_diagnostics`](crate::session::Session::subscribe_diagnostics).

use std::fmt::{Display, Formatter};

/// Capacity of the per-session diagnostics channel.
pub const DIAGNOSTICS_CAPACITY: usize = 64;

/// A non-fatal event observed while receiving from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkDiagnostic {
    /// A pending line grew past `max_line_bytes` and was dropped.
    LineOverflow {
        /// Number of bytes discarded.
        discarded: usize,
    },
    /// Bytes that are not valid UTF-8 were replaced with `U+FFFD`.
    InvalidUtf8 {
        /// Number of offending bytes.
        bytes: usize,
    },
    /// A listener panicked; the rest of that event's fan-out was skipped.
    ListenerPanicked {
        /// Event name being dispatched.
        event: String,
    },
    /// Reading from the transport failed and the receive loop stopped.
    ReadFailed {
        /// Rendered I/O error.
        error: String,
    },
    /// The device stream reached end of file.
    StreamClosed,
}

impl Display for LinkDiagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LineOverflow { discarded } => {
                write!(f, "line overflow: discarded {discarded} bytes")
            }
            Self::InvalidUtf8 { bytes } => write!(f, "invalid utf-8: replaced {bytes} bytes"),
            Self::ListenerPanicked { event } => write!(f, "listener for {event} panicked"),
            Self::ReadFailed { error } => write!(f, "read failed: {error}"),
            Self::StreamClosed => write!(f, "stream closed"),
        }
    }
}
