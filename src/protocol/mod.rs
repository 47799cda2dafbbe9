//! Client-server communication protocol.
//!
//! This module defines the messages exchanged between a client and an RPC server,
//! how they are encoded, and how they are moved over a byte stream.
//!
//! # Overview
//!
//! Every message is an [`Envelope`]: a request, a response or a notification. An
//! envelope is lowered to a positional array [`Value`] whose first element is the
//! message type tag:
//!
//! - Request: `[0, msgid, method, params]`
//! - Response: `[1, msgid, error, result]`
//! - Notification: `[2, method, params]`
//!
//! The `msgid` pairs a response with the request it answers; `error` is nil on
//! success, otherwise it is the application error reported by the server.
//!
//! # Binary Format
//!
//! Values are serialized with bincode (see [`Encoding`]). Each encoded value is
//! self-delimiting, so messages are written back to back without a length header.
//! The reading side feeds whatever the socket returns into a [`StreamDecoder`],
//! which yields complete values and keeps partial trailing input for later.
//!
//! A message may span at most [`MAX_MESSAGE_SIZE`] bytes and nest at most
//! [`MAX_DEPTH`] levels; anything beyond either is rejected as a protocol error.
//!
//! # Key Components
//!
//! - [`Envelope`]: A protocol message and its wire shape.
//! - [`Value`]: Dynamically typed payload for params, results and errors.
//! - [`StreamDecoder`]: Incremental decoder over arbitrarily chunked input.
//! - [`ProtocolTransport`]: Envelope exchange over any `Read + Write` stream.
//!
//! # See Also
//!
//! - [`connection`](crate::connection): Request/response calls over a TCP stream.
mod codec;
mod message;
mod transport;
mod value;

pub use codec::{Encoding, MAX_MESSAGE_SIZE, StreamDecoder, encode};
pub use message::{Envelope, MSGTYPE_NOTIFICATION, MSGTYPE_REQUEST, MSGTYPE_RESPONSE};
pub use transport::{BUFSIZE, ProtocolTransport};
pub use value::{MAX_DEPTH, Value};
