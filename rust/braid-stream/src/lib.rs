#![deny(unsafe_code)]

//! Reference codec and transport glue for [`braid`].
//!
//! Frames are `u32` little-endian length prefixes over postcard bodies; see
//! [`codec`] for the body layout. [`listen_and_serve`] / [`dial_and_deliver`]
//! run the protocol over TCP; [`connection`] wraps any
//! `AsyncRead + AsyncWrite` stream, which is how the tests run everything
//! over in-memory duplex pipes.

pub mod codec;
pub mod framing;
pub mod net;

pub use codec::{StreamDecoder, StreamEncoder, StreamMessage};
pub use framing::{DEFAULT_MAX_FRAME, StreamConfig};
pub use net::{StreamConn, connection, connection_with_config, dial_and_deliver, listen_and_serve, serve};
