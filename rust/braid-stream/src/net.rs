//! Listen/dial helpers.
//!
//! One connection per accepted stream, all feeding the same request channel.
//! There is no handshake and no negotiation: both ends simply run the
//! reference codec.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use braid::{Conn, Payload, Rx, Tx};

use crate::codec::{StreamDecoder, StreamEncoder};
use crate::framing::StreamConfig;

/// A connection running the reference codec over `S`.
pub type StreamConn<S> = Conn<StreamEncoder<WriteHalf<S>>, StreamDecoder<ReadHalf<S>>>;

/// Wrap any async byte stream into a connection.
pub fn connection<S>(stream: S) -> StreamConn<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    connection_with_config(stream, StreamConfig::default())
}

/// Wrap a stream with explicit transport tuning.
pub fn connection_with_config<S>(stream: S, config: StreamConfig) -> StreamConn<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read, write) = tokio::io::split(stream);
    Conn::new(
        StreamEncoder::new(write),
        StreamDecoder::with_config(read, config),
    )
}

/// Bind a TCP listener and serve the protocol; incoming requests are
/// delivered on the given channel.
pub async fn listen_and_serve<T: Payload>(
    addr: impl ToSocketAddrs,
    requests: Tx<T>,
) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, requests).await
}

/// Accept connections forever; every connection feeds the same request
/// channel.
pub async fn serve<T: Payload>(listener: TcpListener, requests: Tx<T>) -> io::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        tracing::debug!(%addr, "accepted connection");
        let conn = connection(stream);
        conn.set_request_channel(&requests);
        tokio::spawn(async move { conn.receive_values().await });
    }
}

/// Dial a server and deliver requests from the channel until the channel
/// closes or the connection ends. The handle keeps its underlying half, so
/// callers reconnect by looping over the same channel.
pub async fn dial_and_deliver<T: Payload>(
    addr: impl ToSocketAddrs,
    requests: &mut Rx<T>,
) -> io::Result<()> {
    let stream = TcpStream::connect(addr).await?;
    let conn = connection(stream);
    conn.deliver(requests).await;
    Ok(())
}
