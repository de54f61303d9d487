//! Wire contracts consumed by the connection.
//!
//! The connection core is codec-agnostic: it hands values to an [`Encoder`]
//! and drains messages from a [`Decoder`]. Both sides of a connection must
//! agree on the codec before any frame is exchanged; there is no negotiation.
//! `braid-stream` provides the reference implementation (length-prefixed
//! postcard frames).

use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::desc::{ChanDesc, ChannelId};

/// Fault in the codec or the byte stream under it.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended cleanly at a frame boundary. Silent on teardown.
    #[error("end of stream")]
    Eof,

    /// Serialization or deserialization failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The byte stream carried something that is not a valid frame.
    #[error("protocol error, {0}")]
    Protocol(String),
}

/// Writes frames to the peer. Implementations own the write half of the
/// underlying stream; [`Encoder::shutdown`] is the connection's close handle
/// for it.
pub trait Encoder: Send + 'static {
    /// Write one Send frame: the id, the descriptor records, then the value.
    fn encode_send<T: Serialize + Sync>(
        &mut self,
        id: ChannelId,
        descs: &[ChanDesc],
        value: &T,
    ) -> impl Future<Output = Result<(), WireError>> + Send;

    /// Write one Close frame for the id.
    fn encode_close(&mut self, id: ChannelId) -> impl Future<Output = Result<(), WireError>> + Send;

    /// Close the underlying stream, unblocking the peer. Idempotent,
    /// best-effort.
    fn shutdown(&mut self) -> impl Future<Output = ()> + Send;
}

/// Reads frames from the peer.
pub trait Decoder: Send + 'static {
    type Message: DecodedMessage;

    /// Read the next frame. Clean end-of-stream is [`WireError::Eof`].
    fn decode(&mut self) -> impl Future<Output = Result<Self::Message, WireError>> + Send;
}

/// One decoded frame. A Close message has `closed() == true` and no body;
/// a Send message defers body decoding until [`DecodedMessage::decode_value`]
/// is called with the element type of the destination channel.
pub trait DecodedMessage: Send + 'static {
    fn chan_id(&self) -> ChannelId;

    fn closed(&self) -> bool;

    /// The descriptor records carried by this frame. Yields the list once.
    fn take_desc_list(&mut self) -> Vec<ChanDesc>;

    /// Decode the frame body into the channel's element type.
    fn decode_value<T: DeserializeOwned>(&mut self) -> Result<T, WireError>;
}
