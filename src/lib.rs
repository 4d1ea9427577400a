//! Websocket protocol (RFC 6455) over arbitrary byte streams.
//!
//! The crate converts between the wire-level frame format and a
//! stream-oriented message API: bit-exact frame encode/decode with
//! optional masking, fragmentation of outgoing messages, lazy streaming
//! reassembly of incoming ones, and the HTTP upgrade handshake in both
//! directions. Transport establishment is pluggable; anything that is
//! `Read + Write` can carry a connection, including two independent
//! one-way streams standing in for one full-duplex channel.

pub mod cancel;
pub mod connection;
pub mod dial;
pub mod error;
pub mod frame;
pub mod handshake;
mod mask;
pub mod message;
pub mod protocol;
pub mod stream;
mod util;

pub use cancel::CancelToken;
pub use connection::{Connection, Status};
pub use dial::{accept, connect, connect_with_dialer, connect_with_request, server_pair, DialedConnection};
pub use error::Error;
pub use message::Message;
pub use protocol::OpCode;
