//! Serial port transport backed by the `serialport` crate.
//!
//! `serialport` handles are blocking, so an opened port is bridged to tokio
//! through an in-memory [`tokio::io::duplex`] pipe driven by two dedicated
//! threads:
//!
//! - the read pump polls the port with a short timeout and copies bytes into
//!   the pipe, stopping on shutdown, read failure or when the host side goes
//!   away; it then shuts its end down so the receive loop sees EOF;
//! - the write pump copies bytes the host writes into the pipe out to the
//!   port until the host shuts its writer down or shutdown is requested.
//!   Write timeouts from a congested port are retried, not fatal.

use std::future::Future;
use std::io::{self, ErrorKind, Read, Write};
use std::pin::Pin;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use serialport::{SerialPort, SerialPortType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PortFilter;
use crate::transport::{OpenRequest, Transport, TransportStreams};
use crate::{AppError, Result};

/// Poll interval of the read pump; bounds shutdown latency.
const READ_POLL: Duration = Duration::from_millis(10);

/// Bytes copied per pump iteration.
const CHUNK_BYTES: usize = 256;

/// Capacity of each direction of the in-memory pipe.
const PIPE_CAPACITY: usize = 16 * 1024;

/// Description of an available serial port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// OS device path.
    pub port_name: String,
    /// `USB`, `Bluetooth`, `PCI` or `Unknown`.
    pub port_type: String,
    /// USB vendor id.
    pub vid: Option<u16>,
    /// USB product id.
    pub pid: Option<u16>,
    /// USB manufacturer string.
    pub manufacturer: Option<String>,
    /// USB product string.
    pub product: Option<String>,
    /// USB serial number.
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Whether this port passes `filters`; an empty list accepts every port.
    #[must_use]
    pub fn accepted_by(&self, filters: &[PortFilter]) -> bool {
        if filters.is_empty() {
            return true;
        }
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => filters.iter().any(|f| f.matches(vid, pid)),
            _ => false,
        }
    }
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let mut port = Self {
            port_name: info.port_name,
            port_type: "Unknown".into(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        };
        match info.port_type {
            SerialPortType::UsbPort(usb) => {
                port.port_type = "USB".into();
                port.vid = Some(usb.vid);
                port.pid = Some(usb.pid);
                port.manufacturer = usb.manufacturer;
                port.product = usb.product;
                port.serial_number = usb.serial_number;
            }
            SerialPortType::BluetoothPort => port.port_type = "Bluetooth".into(),
            SerialPortType::PciPort => port.port_type = "PCI".into(),
            SerialPortType::Unknown => {}
        }
        port
    }
}

/// List the serial ports present on this host.
///
/// # Errors
///
/// Returns [`AppError::Transport`] if enumeration fails.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().map(PortInfo::from).collect())
}

/// Pick the first listed port accepted by `filters`.
///
/// # Errors
///
/// Returns [`AppError::Transport`] if no port is accepted.
pub fn select_port(ports: &[PortInfo], filters: &[PortFilter]) -> Result<String> {
    ports
        .iter()
        .find(|port| port.accepted_by(filters))
        .map(|port| port.port_name.clone())
        .ok_or_else(|| {
            AppError::Transport("no serial port matches the configured filters".into())
        })
}

/// [`Transport`] for local serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialTransport;

impl SerialTransport {
    /// Create a serial transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Transport for SerialTransport {
    fn open<'a>(
        &'a self,
        request: &'a OpenRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportStreams>> + Send + 'a>> {
        Box::pin(async move {
            let explicit = request.port.clone();
            let filters = request.filters.clone();
            let baud_rate = request.baud_rate;

            // Enumeration and open are blocking system calls.
            let (path, port) = tokio::task::spawn_blocking(move || -> Result<_> {
                let path = match explicit {
                    Some(path) => path,
                    None => select_port(&list_ports()?, &filters)?,
                };
                let port = serialport::new(&path, baud_rate)
                    .timeout(READ_POLL)
                    .open()
                    .map_err(|err| AppError::Transport(format!("failed to open {path}: {err}")))?;
                Ok((path, port))
            })
            .await
            .map_err(|err| AppError::Transport(format!("open task panicked: {err}")))??;

            info!(port = path.as_str(), baud_rate, "serial port opened");
            bridge(port, &path)
        })
    }
}

/// Connect a blocking port to async streams through two pump threads.
fn bridge(port: Box<dyn SerialPort>, path: &str) -> Result<TransportStreams> {
    let port_reader = port.try_clone()?;
    let port_writer = port;

    let (host_side, device_side) = tokio::io::duplex(PIPE_CAPACITY);
    let (device_rx, device_tx) = tokio::io::split(device_side);
    let (host_rx, host_tx) = tokio::io::split(host_side);

    let streams = TransportStreams::new(host_rx, host_tx);
    let shutdown = streams.shutdown.clone();
    let runtime = Handle::current();

    thread::Builder::new()
        .name(format!("serial-read {path}"))
        .spawn({
            let shutdown = shutdown.clone();
            let runtime = runtime.clone();
            move || read_pump(port_reader, device_tx, &shutdown, &runtime)
        })
        .map_err(|err| AppError::Transport(format!("failed to start read pump: {err}")))?;

    thread::Builder::new()
        .name(format!("serial-write {path}"))
        .spawn(move || write_pump(port_writer, device_rx, &shutdown, &runtime))
        .map_err(|err| AppError::Transport(format!("failed to start write pump: {err}")))?;

    Ok(streams)
}

fn read_pump(
    mut port: Box<dyn SerialPort>,
    mut pipe: tokio::io::WriteHalf<tokio::io::DuplexStream>,
    shutdown: &CancellationToken,
    runtime: &Handle,
) {
    let mut buf = [0u8; CHUNK_BYTES];

    while !shutdown.is_cancelled() {
        match port.read(&mut buf) {
            Ok(0) => {
                debug!("serial read pump: port returned EOF");
                break;
            }
            Ok(n) => {
                if runtime.block_on(pipe.write_all(&buf[..n])).is_err() {
                    debug!("serial read pump: host side closed");
                    break;
                }
            }
            Err(err) if is_transient(&err) => {}
            Err(err) => {
                warn!(error = %err, "serial read pump: read failed, closing stream");
                break;
            }
        }
    }

    // Signals EOF to the receive loop.
    if let Err(err) = runtime.block_on(pipe.shutdown()) {
        debug!(error = %err, "serial read pump: pipe shutdown failed");
    }
    debug!("serial read pump stopped");
}

fn write_pump(
    mut port: Box<dyn SerialPort>,
    mut pipe: tokio::io::ReadHalf<tokio::io::DuplexStream>,
    shutdown: &CancellationToken,
    runtime: &Handle,
) {
    let mut buf = [0u8; CHUNK_BYTES];

    loop {
        let read = runtime.block_on(async {
            tokio::select! {
                () = shutdown.cancelled() => Ok(0),
                read = pipe.read(&mut buf) => read,
            }
        });

        match read {
            Ok(0) => break,
            Ok(n) => {
                if let Err(err) = write_port(&mut port, &buf[..n], shutdown) {
                    warn!(error = %err, "serial write pump: write failed, stopping");
                    break;
                }
            }
            Err(err) => {
                warn!(error = %err, "serial write pump: pipe read failed, stopping");
                break;
            }
        }
    }
    debug!("serial write pump stopped");
}

/// The port timeout applies to writes too; a full transmit buffer shows up
/// as `TimedOut` and is retried.
fn is_transient(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted)
}

/// Write and flush `bytes`, retrying transient errors until `shutdown`.
fn write_port<W>(port: &mut W, mut bytes: &[u8], shutdown: &CancellationToken) -> io::Result<()>
where
    W: Write + ?Sized,
{
    while !bytes.is_empty() {
        if shutdown.is_cancelled() {
            return Ok(());
        }
        match port.write(bytes) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => bytes = &bytes[n..],
            Err(err) if is_transient(&err) => {}
            Err(err) => return Err(err),
        }
    }

    loop {
        match port.flush() {
            Err(err) if is_transient(&err) && !shutdown.is_cancelled() => {}
            other => return other,
        }
    }
}
