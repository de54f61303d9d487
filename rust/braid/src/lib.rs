#![deny(unsafe_code)]

//! Bidirectional RPC that passes typed channel endpoints inside values.
//!
//! A value sent over a connection may carry [`Tx`]/[`Rx`] channel handles in
//! its fields. The handles become operational on the remote side; subsequent
//! sends and closes on them are multiplexed over the same connection.
//! Call/reply, streaming, and "give me a channel to send results on" are all
//! expressed as ordinary structured values; no request ids or stream ids
//! appear in the API.
//!
//! This crate is the connection core: channel handles, the [`Payload`]
//! traversal, the wire contracts, and [`Conn`]. The reference codec and the
//! TCP helpers live in `braid-stream`; byte-chunk adapters in `braid-chunk`.
//!
//! ```no_run
//! use braid::{payload, Tx};
//!
//! payload! {
//!     pub struct Job {
//!         pub name: String,
//!         pub results: Tx<String>,
//!     }
//! }
//!
//! # async fn demo(jobs: braid::Tx<Job>) {
//! // Hand the peer a channel to stream results on:
//! let (results, mut incoming) = braid::channel::<String>(8);
//! jobs.send(Job { name: "build".into(), results }).await.unwrap();
//! while let Some(line) = incoming.recv().await {
//!     println!("{line}");
//! }
//! # }
//! ```

pub mod channel;
pub mod codec;
pub mod conn;
pub mod desc;
mod errors;
pub mod payload;

pub use channel::{Rx, Tx, TxError, channel};
pub use codec::{DecodedMessage, Decoder, Encoder, WireError};
pub use conn::Conn;
pub use desc::{ChanDesc, ChannelId, Dir, ROOT_CHANNEL};
pub use errors::ConnError;
pub use payload::{Payload, Visitor};

#[cfg(test)]
mod tests;
