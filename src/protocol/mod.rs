//! Event protocol carried over the serial lines.
//!
//! Every frame is a JSON document: either a two-element array
//! `[name, payload]` or a bare string naming an event without payload.
//!
//! | Wire name | Direction       | Meaning                                 |
//! |-----------|-----------------|-----------------------------------------|
//! | `_w`      | device → host   | Device warning, logged at `WARN`        |
//! | `_l`      | device → host   | Device log line, logged at `INFO`       |
//! | `_e`      | device → host   | Device error, logged at `ERROR`         |
//! | `_e`      | host → device   | Event name without payload              |
//! | `_d`      | both            | Raw data; delivered to `"data"` listeners |
//! | *(other)* | both            | User event dispatched under its name    |

pub mod coerce;
pub mod event;

pub use coerce::{coerce_numeric, parse_numeric};
pub use event::{
    decode_line, display_payload, encode_line, Inbound, ReservedKind, DATA_CHANNEL, DATA_EVENT,
    EVENT_CHANNEL,
};
