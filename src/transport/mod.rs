//! Byte-duplex transport abstraction.
//!
//! The [`Transport`] trait decouples the session from the physical device.
//! An implementation opens a device for an [`OpenRequest`] and hands back
//! a pair of async byte streams plus a shutdown token that releases the
//! device when cancelled.
//!
//! - `serial`: [`SerialTransport`](serial::SerialTransport), backed by the
//!   `serialport` crate.

pub mod serial;

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::config::{LinkConfig, PortFilter};
use crate::Result;

/// Incoming byte stream handed to the receive loop.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Outgoing byte stream used by the send path.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Parameters for opening a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    /// Explicit device path; when `None` the transport selects by `filters`.
    pub port: Option<String>,
    /// Line speed.
    pub baud_rate: u32,
    /// Acceptance filters; empty accepts any device.
    pub filters: Vec<PortFilter>,
}

impl OpenRequest {
    /// Build a request from the link configuration.
    #[must_use]
    pub fn from_config(config: &LinkConfig) -> Self {
        Self {
            port: config.port.clone(),
            baud_rate: config.baud_rate,
            filters: config.filters.clone(),
        }
    }
}

/// Streams of an opened device.
pub struct TransportStreams {
    /// Device → host bytes.
    pub reader: BoxedReader,
    /// Host → device bytes.
    pub writer: BoxedWriter,
    /// Cancelled by the session on close to release the device.
    pub shutdown: CancellationToken,
}

impl TransportStreams {
    /// Wrap a reader/writer pair with a fresh shutdown token.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            shutdown: CancellationToken::new(),
        }
    }
}

impl std::fmt::Debug for TransportStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportStreams")
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Opens byte-duplex device connections.
pub trait Transport: Send + Sync {
    /// Open the device described by `request`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) if no
    /// device matches or the device cannot be opened.
    fn open<'a>(
        &'a self,
        request: &'a OpenRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportStreams>> + Send + 'a>>;
}
