//! Incoming serial stream handling.
//!
//! Bytes read from the transport are decoded to text, split into
//! `\r\n`-terminated lines and dispatched to listeners by a single
//! long-lived receive task per session.
//!
//! - `framer`: text accumulator that carries partial lines across fragments.
//! - `codec`: [`Decoder`](tokio_util::codec::Decoder) that turns raw bytes
//!   into lines through the framer.
//! - `reader`: the receive loop that decodes each line and fans it out.

pub mod codec;
pub mod framer;
pub mod reader;
