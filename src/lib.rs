#![forbid(unsafe_code)]

//! Host-side JSON event link for line-oriented serial devices.

pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod link;
pub mod listeners;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::LinkConfig;
pub use errors::{AppError, Result};
pub use session::{ConnectionState, Session};
