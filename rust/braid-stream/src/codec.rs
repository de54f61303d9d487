//! The reference codec: postcard frame bodies.
//!
//! A Send body is the action tag `1`, the channel id, the descriptor
//! records, then the value's postcard encoding. A Close body is the tag `2`
//! and the id. The value bytes are kept aside at decode time and only
//! deserialized when the connection knows the destination channel's element
//! type.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};

use braid::{ChanDesc, ChannelId, DecodedMessage, Decoder, Encoder, WireError};

use crate::framing::{FrameReader, FrameWriter, StreamConfig};

const ACTION_SEND: u8 = 1;
const ACTION_CLOSE: u8 = 2;

fn codec_err(err: postcard::Error) -> WireError {
    WireError::Codec(err.to_string())
}

/// Encoding half of the reference codec. Owns the write half of the stream.
pub struct StreamEncoder<W> {
    writer: FrameWriter<W>,
}

impl<W: AsyncWrite + Unpin> StreamEncoder<W> {
    pub fn new(io: W) -> Self {
        Self {
            writer: FrameWriter::new(io),
        }
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> Encoder for StreamEncoder<W> {
    async fn encode_send<T: Serialize + Sync>(
        &mut self,
        id: ChannelId,
        descs: &[ChanDesc],
        value: &T,
    ) -> Result<(), WireError> {
        let mut body = postcard::to_stdvec(&(ACTION_SEND, id)).map_err(codec_err)?;
        body.extend(postcard::to_stdvec(descs).map_err(codec_err)?);
        body.extend(postcard::to_stdvec(value).map_err(codec_err)?);
        self.writer.write_frame(&body).await
    }

    async fn encode_close(&mut self, id: ChannelId) -> Result<(), WireError> {
        let body = postcard::to_stdvec(&(ACTION_CLOSE, id)).map_err(codec_err)?;
        self.writer.write_frame(&body).await
    }

    async fn shutdown(&mut self) {
        self.writer.shutdown().await;
    }
}

/// Decoding half of the reference codec. Owns the read half of the stream.
pub struct StreamDecoder<R> {
    reader: FrameReader<R>,
}

impl<R: AsyncRead + Unpin> StreamDecoder<R> {
    pub fn new(io: R) -> Self {
        Self::with_config(io, StreamConfig::default())
    }

    pub fn with_config(io: R, config: StreamConfig) -> Self {
        Self {
            reader: FrameReader::new(io, config.max_frame),
        }
    }
}

impl<R: AsyncRead + Unpin + Send + 'static> Decoder for StreamDecoder<R> {
    type Message = StreamMessage;

    async fn decode(&mut self) -> Result<StreamMessage, WireError> {
        let frame = self.reader.read_frame().await?;
        let ((action, id), rest) =
            postcard::take_from_bytes::<(u8, ChannelId)>(&frame).map_err(codec_err)?;
        match action {
            ACTION_SEND => {
                let (descs, value) =
                    postcard::take_from_bytes::<Vec<ChanDesc>>(rest).map_err(codec_err)?;
                let value_offset = frame.len() - value.len();
                Ok(StreamMessage {
                    id,
                    closed: false,
                    descs,
                    value: frame.slice(value_offset..),
                })
            }
            ACTION_CLOSE => Ok(StreamMessage {
                id,
                closed: true,
                descs: Vec::new(),
                value: Bytes::new(),
            }),
            other => Err(WireError::Protocol(format!("invalid action {other}"))),
        }
    }
}

/// One decoded frame; the value bytes wait for their element type.
#[derive(Debug)]
pub struct StreamMessage {
    id: ChannelId,
    closed: bool,
    descs: Vec<ChanDesc>,
    value: Bytes,
}

impl DecodedMessage for StreamMessage {
    fn chan_id(&self) -> ChannelId {
        self.id
    }

    fn closed(&self) -> bool {
        self.closed
    }

    fn take_desc_list(&mut self) -> Vec<ChanDesc> {
        std::mem::take(&mut self.descs)
    }

    fn decode_value<T: DeserializeOwned>(&mut self) -> Result<T, WireError> {
        postcard::from_bytes(&self.value).map_err(codec_err)
    }
}
