//! Connection session: transport lifecycle, receive loop and send path.
//!
//! # Lifecycle
//!
//! ```text
//! Unopened ──start_connection──▶ Open ──close──▶ Closed
//! ```
//!
//! 1. [`Session::start_connection`] opens the transport. On failure the
//!    error is returned and the session stays `Unopened`.
//! 2. On success the writer is installed, the receive loop is spawned and
//!    the session becomes `Open`. A second call fails with
//!    [`AppError::AlreadyOpen`].
//! 3. [`Session::close`] cancels the receive loop, shuts the writer down and
//!    releases the transport. A closed session is not reused; build a new
//!    one to reconnect.
//!
//! If the device stream ends on its own, the read side becomes unavailable
//! ([`Session::readable`] turns false) but the state stays `Open` until
//! `close` is called.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::LinkConfig;
use crate::diagnostics::{LinkDiagnostic, DIAGNOSTICS_CAPACITY};
use crate::link::reader::{run_receive_loop, ReceiveContext};
use crate::listeners::{Listener, ListenerRegistry, Subscription};
use crate::protocol::{coerce_numeric, encode_line, DATA_CHANNEL, EVENT_CHANNEL};
use crate::transport::{BoxedWriter, OpenRequest, Transport, TransportStreams};
use crate::{AppError, Result};

// ── State types ──────────────────────────────────────────────────────────────

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The transport has not been opened yet.
    Unopened,
    /// The transport is open and the receive loop has been started.
    Open,
    /// The session was closed.
    Closed,
}

/// Resources held while the connection is open.
struct Running {
    receive_task: JoinHandle<()>,
    cancel: CancellationToken,
    transport_shutdown: CancellationToken,
}

// ── Session ──────────────────────────────────────────────────────────────────

/// Host-side endpoint of one serial link.
pub struct Session {
    id: String,
    config: Arc<LinkConfig>,
    transport: Arc<dyn Transport>,
    listeners: Arc<ListenerRegistry>,
    state: Mutex<ConnectionState>,
    running: AsyncMutex<Option<Running>>,
    writer: AsyncMutex<Option<BoxedWriter>>,
    readable: Arc<AtomicBool>,
    writable: AtomicBool,
    diagnostics: broadcast::Sender<LinkDiagnostic>,
}

impl Session {
    /// Create an unopened session over `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if `config` fails validation.
    pub fn new(config: LinkConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let (diagnostics, _) = broadcast::channel(DIAGNOSTICS_CAPACITY);
        let listeners = Arc::new(ListenerRegistry::new(
            config.warn_about_unregistered_events,
        ));

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            config: Arc::new(config),
            transport,
            listeners,
            state: Mutex::new(ConnectionState::Unopened),
            running: AsyncMutex::new(None),
            writer: AsyncMutex::new(None),
            readable: Arc::new(AtomicBool::new(false)),
            writable: AtomicBool::new(false),
            diagnostics,
        })
    }

    /// Unique identifier used in log fields.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Configuration this session was built with.
    #[must_use]
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Open the transport and start the receive loop.
    ///
    /// # Errors
    ///
    /// - [`AppError::AlreadyOpen`] if the session is open.
    /// - [`AppError::Closed`] if the session was closed.
    /// - Any error returned by [`Transport::open`]; the session stays
    ///   `Unopened`.
    pub async fn start_connection(&self) -> Result<()> {
        let mut running = self.running.lock().await;

        match self.state() {
            ConnectionState::Open => return Err(AppError::AlreadyOpen),
            ConnectionState::Closed => return Err(AppError::Closed),
            ConnectionState::Unopened => {}
        }

        let request = OpenRequest::from_config(&self.config);
        let TransportStreams {
            reader,
            writer,
            shutdown,
        } = self.transport.open(&request).await.map_err(|err| {
            error!(session_id = self.id.as_str(), %err, "failed to open transport");
            err
        })?;

        *self.writer.lock().await = Some(writer);
        self.writable.store(true, Ordering::SeqCst);
        self.readable.store(true, Ordering::SeqCst);

        let ctx = ReceiveContext {
            session_id: self.id.clone(),
            config: Arc::clone(&self.config),
            listeners: Arc::clone(&self.listeners),
            diagnostics: self.diagnostics.clone(),
        };
        let cancel = CancellationToken::new();
        let readable = Arc::clone(&self.readable);
        let loop_cancel = cancel.clone();
        let receive_task = tokio::spawn(async move {
            run_receive_loop(reader, ctx, loop_cancel).await;
            readable.store(false, Ordering::SeqCst);
        });

        *running = Some(Running {
            receive_task,
            cancel,
            transport_shutdown: shutdown,
        });
        self.set_state(ConnectionState::Open);

        info!(
            session_id = self.id.as_str(),
            baud_rate = self.config.baud_rate,
            "serial connection established"
        );
        Ok(())
    }

    /// Stop the receive loop, shut the writer down and release the transport.
    ///
    /// Idempotent. An unopened session simply becomes `Closed`.
    pub async fn close(&self) {
        let mut running = self.running.lock().await;
        if self.state() == ConnectionState::Closed {
            return;
        }
        self.set_state(ConnectionState::Closed);
        self.writable.store(false, Ordering::SeqCst);

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(err) = writer.shutdown().await {
                debug!(session_id = self.id.as_str(), %err, "writer shutdown failed");
            }
        }

        if let Some(running) = running.take() {
            running.cancel.cancel();
            running.transport_shutdown.cancel();
            if let Err(err) = running.receive_task.await {
                warn!(session_id = self.id.as_str(), %err, "receive task ended abnormally");
            }
        }

        self.readable.store(false, Ordering::SeqCst);
        info!(session_id = self.id.as_str(), "serial connection closed");
    }

    // ── Readiness ────────────────────────────────────────────────────────────

    /// Whether both directions of the transport are available.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.readable() && self.writable()
    }

    /// Whether the device → host direction is available.
    #[must_use]
    pub fn readable(&self) -> bool {
        self.readable.load(Ordering::SeqCst)
    }

    /// Whether the host → device direction is available.
    #[must_use]
    pub fn writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }

    /// Subscribe to framing and dispatch diagnostics.
    #[must_use]
    pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<LinkDiagnostic> {
        self.diagnostics.subscribe()
    }

    /// The listener registry shared with the receive loop.
    #[must_use]
    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    // ── Listeners ────────────────────────────────────────────────────────────

    /// Register `callback` for events named `name`.
    ///
    /// Payloads of the reserved `_d` channel are delivered under `"data"`.
    pub fn on<F>(&self, name: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.listeners.on(name, callback)
    }

    /// Remove the registration identified by `subscription`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotRegistered`] if the name was never registered.
    pub fn remove_listener(&self, subscription: &Subscription) -> Result<bool> {
        self.listeners.remove_listener(subscription)
    }

    /// Remove every registration of `listener` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotRegistered`] if the name was never registered.
    pub fn remove_callback(&self, name: &str, listener: &Listener) -> Result<bool> {
        self.listeners.remove_callback(name, listener)
    }

    /// Clear every listener of `name`; `false` if there was none.
    pub fn remove_listeners(&self, name: &str) -> bool {
        self.listeners.remove_listeners(name)
    }

    /// Dispatch `payload` to the listeners of `name` as if it was received.
    pub fn emit(&self, name: &str, payload: &Value) -> usize {
        self.listeners.emit(name, payload)
    }

    // ── Send path ────────────────────────────────────────────────────────────

    /// Send an event to the device.
    ///
    /// With `data` set, `[name, data]` is sent. Without it, `name` itself is
    /// raw data and `["_d", name]` is sent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if writing to the transport fails. Sending
    /// while the transport is not writable is a silent no-op.
    pub async fn send(&self, name: &str, data: Option<Value>) -> Result<()> {
        match data {
            Some(data) => self.write_event(name, data).await,
            None => {
                self.write_event(DATA_CHANNEL, Value::String(name.to_owned()))
                    .await
            }
        }
    }

    /// Send `["_e", name]`: an event without payload.
    ///
    /// # Errors
    ///
    /// See [`Session::send`].
    pub async fn send_event(&self, name: &str) -> Result<()> {
        self.write_event(EVENT_CHANNEL, Value::String(name.to_owned()))
            .await
    }

    /// Send `["_d", data]`: raw data.
    ///
    /// # Errors
    ///
    /// See [`Session::send`].
    pub async fn send_data(&self, data: impl Into<Value>) -> Result<()> {
        self.write_event(DATA_CHANNEL, data.into()).await
    }

    async fn write_event(&self, name: &str, payload: Value) -> Result<()> {
        let session_id = self.id.as_str();
        if !self.writable() {
            debug!(session_id, event = name, "send skipped: transport not writable");
            return Ok(());
        }

        let payload = if self.config.parse_strings_as_numbers {
            coerce_numeric(payload)
        } else {
            payload
        };
        let line = encode_line(name, &payload, &self.config.new_line_character)?;

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Ok(());
        };

        if self.config.log_outgoing_serial_data {
            info!(session_id, line = line.trim_end(), "serial ->");
        }

        let written = match writer.write_all(line.as_bytes()).await {
            Ok(()) => writer.flush().await,
            Err(err) => Err(err),
        };
        written.map_err(|err| {
            warn!(session_id, %err, "write to transport failed");
            self.writable.store(false, Ordering::SeqCst);
            AppError::Io(format!("write failed: {err}"))
        })
    }
}

// ── Trait impls ──────────────────────────────────────────────────────────────

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("readable", &self.readable())
            .field("writable", &self.writable())
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
            running.transport_shutdown.cancel();
        }
    }
}
