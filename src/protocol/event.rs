//! Encoding and decoding of single protocol lines.

use serde_json::Value;

use crate::{AppError, Result};

/// Wire name carrying raw data in both directions.
pub const DATA_CHANNEL: &str = "_d";

/// Wire name for host-originated events without payload.
pub const EVENT_CHANNEL: &str = "_e";

/// Listener name receiving payloads of the `_d` channel.
pub const DATA_EVENT: &str = "data";

/// Reserved incoming channel intercepted before user dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedKind {
    /// `_w`: device warning.
    Warning,
    /// `_l`: device log line.
    Log,
    /// `_e`: device error.
    Error,
    /// `_d`: raw data, re-dispatched as [`DATA_EVENT`].
    Data,
}

impl ReservedKind {
    /// Map a wire name to its reserved kind, if any.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        [Self::Warning, Self::Log, Self::Error, Self::Data]
            .into_iter()
            .find(|kind| kind.wire_name() == name)
    }

    /// Wire name of this kind.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Warning => "_w",
            Self::Log => "_l",
            Self::Error => "_e",
            Self::Data => "_d",
        }
    }
}

/// Decoded shape of one incoming line.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// `[reserved, payload]` for one of the reserved wire names.
    Reserved(ReservedKind, Value),
    /// `[name, payload]` for any other string name.
    Named {
        /// Event name as sent by the device.
        name: String,
        /// Second array element, `null` when missing.
        payload: Value,
    },
    /// A bare non-empty JSON string; dispatched with a `null` payload.
    Bare(String),
    /// Anything else: invalid JSON, numbers, objects, `null`, empty input.
    Unrecognized,
}

impl Inbound {
    /// Listener name and payload this line should be delivered to.
    ///
    /// Returns `None` for device log channels and unrecognized lines.
    #[must_use]
    pub fn dispatch_target(&self) -> Option<(&str, &Value)> {
        const NULL: &Value = &Value::Null;
        match self {
            Self::Reserved(ReservedKind::Data, payload) => Some((DATA_EVENT, payload)),
            Self::Named { name, payload } => Some((name.as_str(), payload)),
            Self::Bare(name) => Some((name.as_str(), NULL)),
            Self::Reserved(..) | Self::Unrecognized => None,
        }
    }
}

/// Decode one complete line.
///
/// Malformed JSON is not an error: the serial link is best effort and
/// devices routinely print non-protocol text, so such lines are simply
/// [`Inbound::Unrecognized`].
#[must_use]
pub fn decode_line(line: &str) -> Inbound {
    if line.trim().is_empty() {
        return Inbound::Unrecognized;
    }

    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return Inbound::Unrecognized;
    };

    match value {
        Value::Array(items) => {
            let mut items = items.into_iter();
            let Some(Value::String(name)) = items.next() else {
                return Inbound::Unrecognized;
            };
            let payload = items.next().unwrap_or(Value::Null);

            match ReservedKind::from_wire(&name) {
                Some(kind) => Inbound::Reserved(kind, payload),
                None => Inbound::Named { name, payload },
            }
        }
        Value::String(name) if !name.is_empty() => Inbound::Bare(name),
        _ => Inbound::Unrecognized,
    }
}

/// Encode `[name, payload]` as compact JSON followed by `terminator`.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if serialization fails.
pub fn encode_line(name: &str, payload: &Value, terminator: &str) -> Result<String> {
    let mut line = serde_json::to_string(&(name, payload))
        .map_err(|e| AppError::Protocol(format!("failed to encode {name}: {e}")))?;
    line.push_str(terminator);
    Ok(line)
}

/// Render a device log payload: strings verbatim, everything else as JSON.
#[must_use]
pub fn display_payload(payload: &Value) -> String {
    match payload {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
