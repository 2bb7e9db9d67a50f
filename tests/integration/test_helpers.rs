//! Shared transports and helpers for session integration tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

use serial_events::transport::{OpenRequest, Transport, TransportStreams};
use serial_events::{AppError, LinkConfig, Result, Session};

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Device end of a [`LoopbackTransport`].
pub struct Device {
    to_host: WriteHalf<DuplexStream>,
    from_host: BufReader<ReadHalf<DuplexStream>>,
}

impl Device {
    /// Write raw text towards the host.
    pub async fn write(&mut self, text: &str) {
        self.to_host.write_all(text.as_bytes()).await.unwrap();
        self.to_host.flush().await.unwrap();
    }

    /// Close the device → host direction (end of stream for the host).
    pub async fn hang_up(&mut self) {
        self.to_host.shutdown().await.unwrap();
    }

    /// Read one line written by the host, terminator included.
    ///
    /// Returns `None` on EOF.
    pub async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = tokio::time::timeout(WAIT, self.from_host.read_line(&mut line))
            .await
            .expect("timed out waiting for host output")
            .unwrap();
        (n > 0).then_some(line)
    }

    /// Read one host line and parse it as JSON.
    pub async fn read_json(&mut self) -> Value {
        let line = self.read_line().await.expect("host closed the stream");
        serde_json::from_str(line.trim_end()).unwrap()
    }
}

/// In-memory transport handing out one duplex pipe.
pub struct LoopbackTransport {
    streams: Mutex<Option<TransportStreams>>,
    requests: Mutex<Vec<OpenRequest>>,
}

impl LoopbackTransport {
    /// Requests received by `open`, in order.
    pub fn requests(&self) -> Vec<OpenRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for LoopbackTransport {
    fn open<'a>(
        &'a self,
        request: &'a OpenRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportStreams>> + Send + 'a>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request.clone());
            self.streams
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| AppError::Transport("device already claimed".into()))
        })
    }
}

/// Build a loopback transport and the device end of its pipe.
pub fn loopback() -> (Arc<LoopbackTransport>, Device) {
    let (host, device) = tokio::io::duplex(64 * 1024);
    let (host_rx, host_tx) = tokio::io::split(host);
    let (device_rx, device_tx) = tokio::io::split(device);

    let transport = LoopbackTransport {
        streams: Mutex::new(Some(TransportStreams::new(host_rx, host_tx))),
        requests: Mutex::new(Vec::new()),
    };
    let device = Device {
        to_host: device_tx,
        from_host: BufReader::new(device_rx),
    };
    (Arc::new(transport), device)
}

/// Transport whose `open` always fails, like a missing device.
pub struct FailingTransport;

impl Transport for FailingTransport {
    fn open<'a>(
        &'a self,
        _request: &'a OpenRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportStreams>> + Send + 'a>> {
        Box::pin(async { Err(AppError::Transport("failed to open /dev/null0: no such device".into())) })
    }
}

/// Open a session over a fresh loopback pipe.
pub async fn open_session(config: LinkConfig) -> (Session, Device, Arc<LoopbackTransport>) {
    let (transport, device) = loopback();
    let session = Session::new(config, Arc::clone(&transport) as Arc<dyn Transport>).unwrap();
    session.start_connection().await.unwrap();
    (session, device, transport)
}

/// Forward every payload of `name` into a channel.
pub fn collect(session: &Session, name: &str) -> mpsc::UnboundedReceiver<Value> {
    let (tx, rx) = mpsc::unbounded_channel();
    session.on(name, move |payload| {
        let _ = tx.send(payload.clone());
    });
    rx
}

/// Receive the next collected payload or fail after [`WAIT`].
pub async fn next(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("listener channel closed")
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
