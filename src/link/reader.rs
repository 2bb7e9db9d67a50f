//! Receive loop.
//!
//! Reads `\r\n`-delimited lines from the device stream, decodes each one
//! with [`decode_line`] and routes it:
//!
//! | Decoded line                | Action                                   |
//! |-----------------------------|------------------------------------------|
//! | `["_w", msg]`               | `WARN` on the `device` target            |
//! | `["_l", msg]`               | `INFO` on the `device` target            |
//! | `["_e", msg]`               | `ERROR` on the `device` target           |
//! | `["_d", payload]`           | Emitted to `"data"` listeners            |
//! | `[name, payload]`           | Emitted to `name` listeners              |
//! | `"name"`                    | Emitted to `name` listeners with `null`  |
//! | *(anything else)*           | Dropped; logged at `TRACE`               |
//!
//! The loop runs until the stream ends, a read fails, or the session
//! cancels it. It never restarts itself.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::broadcast;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::LinkConfig;
use crate::diagnostics::LinkDiagnostic;
use crate::link::codec::LineCodec;
use crate::listeners::ListenerRegistry;
use crate::protocol::{decode_line, display_payload, Inbound, ReservedKind};

// ── Receive context ──────────────────────────────────────────────────────────

/// Everything the receive loop needs besides the stream itself.
#[derive(Debug, Clone)]
pub struct ReceiveContext {
    /// Session identifier used in log fields.
    pub session_id: String,
    /// Link configuration.
    pub config: Arc<LinkConfig>,
    /// Listeners receiving dispatched events.
    pub listeners: Arc<ListenerRegistry>,
    /// Sink for non-fatal diagnostics.
    pub diagnostics: broadcast::Sender<LinkDiagnostic>,
}

impl ReceiveContext {
    fn publish(&self, diagnostic: LinkDiagnostic) {
        // No subscribers is fine; the diagnostic was already logged.
        let _ = self.diagnostics.send(diagnostic);
    }
}

// ── Receive loop ─────────────────────────────────────────────────────────────

/// Why the receive loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The session cancelled the loop.
    Cancelled,
    /// The device stream reached EOF.
    StreamClosed,
    /// Reading from the device failed.
    ReadFailed,
}

/// Run the receive loop over `reader` until EOF, read failure or `cancel`.
pub async fn run_receive_loop<R>(reader: R, ctx: ReceiveContext, cancel: CancellationToken) -> LoopExit
where
    R: AsyncRead + Unpin + Send,
{
    let session_id = ctx.session_id.as_str();
    let mut framed = FramedRead::new(reader, LineCodec::new(ctx.config.max_line_bytes));

    let exit = loop {
        let item = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "receive loop: cancellation received, stopping");
                break LoopExit::Cancelled;
            }

            item = framed.next() => item,
        };

        for diagnostic in framed.decoder_mut().take_diagnostics() {
            warn!(session_id, %diagnostic, "receive loop: framing fault");
            ctx.publish(diagnostic);
        }

        match item {
            None => {
                debug!(session_id, "receive loop: stream closed");
                ctx.publish(LinkDiagnostic::StreamClosed);
                break LoopExit::StreamClosed;
            }
            Some(Err(err)) => {
                error!(
                    session_id,
                    error = %err,
                    baud_rate = ctx.config.baud_rate,
                    "could not read serial data; make sure the device uses the same baud rate \
                     and is not flooding the link"
                );
                ctx.publish(LinkDiagnostic::ReadFailed {
                    error: err.to_string(),
                });
                break LoopExit::ReadFailed;
            }
            Some(Ok(line)) => dispatch_line(&ctx, &line),
        }
    };

    debug!(session_id, ?exit, "receive loop finished");
    exit
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

/// Decode one line and route it to logs or listeners.
pub fn dispatch_line(ctx: &ReceiveContext, line: &str) {
    if line.is_empty() {
        return;
    }

    let session_id = ctx.session_id.as_str();
    if ctx.config.log_incoming_serial_data {
        info!(session_id, line, "serial <-");
    }

    let inbound = decode_line(line);
    match &inbound {
        Inbound::Reserved(kind @ ReservedKind::Warning, message) => {
            warn!(
                target: "device",
                session_id,
                channel = kind.wire_name(),
                "[device] {}",
                display_payload(message)
            );
        }
        Inbound::Reserved(kind @ ReservedKind::Log, message) => {
            info!(
                target: "device",
                session_id,
                channel = kind.wire_name(),
                "[device] {}",
                display_payload(message)
            );
        }
        Inbound::Reserved(kind @ ReservedKind::Error, message) => {
            error!(
                target: "device",
                session_id,
                channel = kind.wire_name(),
                "[device] {}",
                display_payload(message)
            );
        }
        Inbound::Unrecognized => {
            trace!(session_id, line, "receive loop: ignoring non-protocol line");
        }
        Inbound::Reserved(ReservedKind::Data, _) | Inbound::Named { .. } | Inbound::Bare(_) => {
            if let Some((name, payload)) = inbound.dispatch_target() {
                deliver(ctx, name, payload);
            }
        }
    }
}

// ── Private helpers ──────────────────────────────────────────────────────────

/// Emit to listeners, containing a listener panic to this one line.
fn deliver(ctx: &ReceiveContext, name: &str, payload: &Value) {
    let outcome = catch_unwind(AssertUnwindSafe(|| ctx.listeners.emit(name, payload)));
    if outcome.is_err() {
        error!(
            session_id = ctx.session_id.as_str(),
            event = name,
            "listener panicked; remaining listeners for this event were skipped"
        );
        ctx.publish(LinkDiagnostic::ListenerPanicked {
            event: name.to_owned(),
        });
    }
}
