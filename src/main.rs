#![forbid(unsafe_code)]

//! `serial-events`: serial event monitor.
//!
//! Opens a serial device, prints every incoming event as a JSON line on
//! stdout and forwards commands typed on stdin to the device.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use serial_events::config::LinkConfig;
use serial_events::diagnostics::LinkDiagnostic;
use serial_events::protocol::DATA_EVENT;
use serial_events::transport::serial::{list_ports, SerialTransport};
use serial_events::{AppError, Result, Session};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "serial-events", about = "Serial JSON event monitor", version, long_about = None)]
struct Cli {
    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List serial ports present on this host.
    ListPorts,

    /// Connect to a device and exchange events.
    ///
    /// Incoming events are printed as `{"event": ..., "payload": ...}` lines.
    /// Stdin accepts `event <name>`, `data <json>` and `send <name> <json>`.
    Monitor {
        /// Path to a TOML link configuration file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Device path; overrides the configuration file.
        #[arg(long)]
        port: Option<String>,

        /// Baud rate; overrides the configuration file.
        #[arg(long)]
        baud: Option<u32>,

        /// Event names to print besides `data`.
        #[arg(long = "listen", value_name = "EVENT")]
        listen: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args.command))
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::ListPorts => {
            for port in list_ports()? {
                let line = serde_json::to_string(&port)
                    .map_err(|err| AppError::Protocol(format!("failed to render port: {err}")))?;
                println!("{line}");
            }
            Ok(())
        }
        Command::Monitor {
            config,
            port,
            baud,
            listen,
        } => {
            let mut link = match config {
                Some(path) => LinkConfig::load_from_path(path)?,
                None => LinkConfig::default(),
            };
            if port.is_some() {
                link.port = port;
            }
            if let Some(baud) = baud {
                link.baud_rate = baud;
            }
            monitor(link, listen).await
        }
    }
}

async fn monitor(config: LinkConfig, listen: Vec<String>) -> Result<()> {
    let session = Session::new(config, Arc::new(SerialTransport::new()))?;

    for name in std::iter::once(DATA_EVENT.to_owned()).chain(listen) {
        let event = name.clone();
        session.on(name, move |payload| {
            println!("{}", json!({ "event": event, "payload": payload }));
        });
    }

    let mut diagnostics = session.subscribe_diagnostics();
    session.start_connection().await?;
    info!(session_id = session.id(), "monitor ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if let Err(err) = forward_command(&session, line.trim()).await {
                            warn!(%err, "command rejected");
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        error!(%err, "stdin read failed");
                        break;
                    }
                }
            }
            diagnostic = diagnostics.recv() => {
                match diagnostic {
                    Ok(LinkDiagnostic::StreamClosed | LinkDiagnostic::ReadFailed { .. })
                    | Err(RecvError::Closed) => {
                        info!("device stream ended");
                        break;
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
        }
    }

    session.close().await;
    Ok(())
}

/// Parse one stdin command and send it.
async fn forward_command(session: &Session, command: &str) -> Result<()> {
    let (verb, rest) = command.split_once(' ').unwrap_or((command, ""));
    match verb {
        "" => Ok(()),
        "event" => {
            let name = rest.trim();
            if name.is_empty() {
                return Err(AppError::Protocol("event requires a name".into()));
            }
            session.send_event(name).await
        }
        "data" => session.send_data(parse_json_arg(rest)).await,
        "send" => {
            let (name, payload) = rest.trim().split_once(' ').unwrap_or((rest.trim(), ""));
            if name.is_empty() {
                return Err(AppError::Protocol("send requires an event name".into()));
            }
            let payload = (!payload.trim().is_empty()).then(|| parse_json_arg(payload));
            session.send(name, payload).await
        }
        other => Err(AppError::Protocol(format!("unknown command: {other}"))),
    }
}

/// Interpret an argument as JSON, falling back to a plain string.
fn parse_json_arg(raw: &str) -> Value {
    let raw = raw.trim();
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
