//! Connection tests over an in-memory codec pair.
//!
//! The pipe codec serializes frames with postcard and carries them over an
//! unbounded channel, so these tests exercise the multiplexer without any
//! byte-stream plumbing.

use std::io;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::channel::{Rx, Tx};
use crate::codec::{DecodedMessage, Decoder, Encoder, WireError};
use crate::conn::Conn;
use crate::desc::{ChanDesc, ChannelId, Dir};
use crate::{channel, payload};

// ============================================================================
// Pipe codec
// ============================================================================

const ACTION_SEND: u8 = 1;
const ACTION_CLOSE: u8 = 2;

struct PipeEncoder {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

struct PipeDecoder {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

struct PipeMessage {
    id: ChannelId,
    closed: bool,
    descs: Vec<ChanDesc>,
    body: Vec<u8>,
}

fn codec_err(err: postcard::Error) -> WireError {
    WireError::Codec(err.to_string())
}

impl PipeEncoder {
    fn push(&self, frame: Vec<u8>) -> Result<(), WireError> {
        let Some(tx) = &self.tx else {
            return Err(WireError::Io(io::Error::from(io::ErrorKind::BrokenPipe)));
        };
        tx.send(frame)
            .map_err(|_| WireError::Io(io::Error::from(io::ErrorKind::BrokenPipe)))
    }
}

impl Encoder for PipeEncoder {
    async fn encode_send<T: Serialize + Sync>(
        &mut self,
        id: ChannelId,
        descs: &[ChanDesc],
        value: &T,
    ) -> Result<(), WireError> {
        let mut frame = postcard::to_stdvec(&(ACTION_SEND, id)).map_err(codec_err)?;
        frame.extend(postcard::to_stdvec(descs).map_err(codec_err)?);
        frame.extend(postcard::to_stdvec(value).map_err(codec_err)?);
        self.push(frame)
    }

    async fn encode_close(&mut self, id: ChannelId) -> Result<(), WireError> {
        let frame = postcard::to_stdvec(&(ACTION_CLOSE, id)).map_err(codec_err)?;
        self.push(frame)
    }

    async fn shutdown(&mut self) {
        self.tx = None;
    }
}

impl Decoder for PipeDecoder {
    type Message = PipeMessage;

    async fn decode(&mut self) -> Result<PipeMessage, WireError> {
        let Some(frame) = self.rx.recv().await else {
            return Err(WireError::Eof);
        };
        let ((action, id), rest) =
            postcard::take_from_bytes::<(u8, ChannelId)>(&frame).map_err(codec_err)?;
        match action {
            ACTION_SEND => {
                let (descs, body) =
                    postcard::take_from_bytes::<Vec<ChanDesc>>(rest).map_err(codec_err)?;
                let body = body.to_vec();
                Ok(PipeMessage {
                    id,
                    closed: false,
                    descs,
                    body,
                })
            }
            ACTION_CLOSE => Ok(PipeMessage {
                id,
                closed: true,
                descs: Vec::new(),
                body: Vec::new(),
            }),
            other => Err(WireError::Protocol(format!("invalid action {other}"))),
        }
    }
}

impl DecodedMessage for PipeMessage {
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
        postcard::from_bytes(&self.body).map_err(codec_err)
    }
}

type PipeConn = Conn<PipeEncoder, PipeDecoder>;

fn conn_pair() -> (PipeConn, PipeConn) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        Conn::new(PipeEncoder { tx: Some(a_tx) }, PipeDecoder { rx: b_rx }),
        Conn::new(PipeEncoder { tx: Some(b_tx) }, PipeDecoder { rx: a_rx }),
    )
}

async fn decode_one(frame: Vec<u8>) -> PipeMessage {
    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(frame).unwrap();
    let mut dec = PipeDecoder { rx };
    dec.decode().await.unwrap()
}

// ============================================================================
// Message types
// ============================================================================

payload! {
    struct Req {
        tag: String,
        reply: Tx<Rep>,
    }
}

payload! {
    struct Rep {
        body: String,
        done: bool,
    }
}

payload! {
    struct Feed {
        items: Tx<Item>,
    }
}

payload! {
    struct Item {
        n: u32,
        ack: Tx<String>,
    }
}

payload! {
    struct TwoChans {
        a: Tx<u32>,
        b: Rx<u32>,
    }
}

const TICK: Duration = Duration::from_secs(5);

/// Server-mode setup. The returned sender is the application's half of the
/// request channel and must stay alive for the connection's lifetime.
fn start_server<T: crate::Payload>(conn: &PipeConn) -> (Tx<T>, Rx<T>, tokio::task::JoinHandle<()>) {
    let (req_tx, req_rx) = channel::<T>(4);
    conn.set_request_channel(&req_tx);
    let server = conn.clone();
    let handle = tokio::spawn(async move { server.receive_values().await });
    (req_tx, req_rx, handle)
}

/// Client-mode setup: deliver a fresh root producer of type `T`.
fn start_client<T: crate::Payload>(conn: &PipeConn) -> (Tx<T>, tokio::task::JoinHandle<()>) {
    let (root_tx, mut root_rx) = channel::<T>(4);
    let client = conn.clone();
    let handle = tokio::spawn(async move { client.deliver(&mut root_rx).await });
    (root_tx, handle)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn reply_channel_round_trip() {
    let (client, server) = conn_pair();
    let (_req_tx, mut req_rx, _server_loop) = start_server::<Req>(&server);
    let (root_tx, _deliver) = start_client::<Req>(&client);

    let (reply_tx, mut reply_rx) = channel::<Rep>(10);
    root_tx
        .send(Req {
            tag: "exec".into(),
            reply: reply_tx,
        })
        .await
        .unwrap();

    let req = timeout(TICK, req_rx.recv()).await.unwrap().unwrap();
    assert_eq!(req.tag, "exec");
    assert!(!req.reply.is_detached());
    for (body, done) in [("f", false), ("o", false), ("o", true)] {
        req.reply
            .send(Rep {
                body: body.into(),
                done,
            })
            .await
            .unwrap();
    }
    drop(req);

    let mut collected = String::new();
    let mut done = false;
    while let Some(rep) = timeout(TICK, reply_rx.recv()).await.unwrap() {
        collected.push_str(&rep.body);
        done = rep.done;
    }
    assert_eq!(collected, "foo");
    assert!(done);
}

#[tokio::test]
async fn nested_channels_allocate_symmetrically() {
    let (client, server) = conn_pair();
    let (_req_tx, mut req_rx, _server_loop) = start_server::<Feed>(&server);
    let (root_tx, _deliver) = start_client::<Feed>(&client);

    // The items the server streams back each carry their own ack channel, so
    // both peers hand out fresh ids concurrently; signs keep them apart.
    let (items_tx, mut items_rx) = channel::<Item>(4);
    root_tx.send(Feed { items: items_tx }).await.unwrap();

    let feed = timeout(TICK, req_rx.recv()).await.unwrap().unwrap();
    let server_task = tokio::spawn(async move {
        let mut ack_rxs = Vec::new();
        for n in 0..2u32 {
            let (ack_tx, ack_rx) = channel::<String>(1);
            feed.items.send(Item { n, ack: ack_tx }).await.unwrap();
            ack_rxs.push(ack_rx);
        }
        let mut acks = Vec::new();
        for mut ack_rx in ack_rxs {
            acks.push(timeout(TICK, ack_rx.recv()).await.unwrap().unwrap());
        }
        acks
    });

    for _ in 0..2 {
        let item = timeout(TICK, items_rx.recv()).await.unwrap().unwrap();
        item.ack.send(format!("ack-{}", item.n)).await.unwrap();
    }

    let acks = server_task.await.unwrap();
    assert_eq!(acks, vec!["ack-0".to_owned(), "ack-1".to_owned()]);
}

#[tokio::test]
async fn unbuffered_channel_is_rejected() {
    let (client, server) = conn_pair();
    let (req_tx, mut req_rx, server_loop) = start_server::<Req>(&server);
    let (root_tx, _deliver) = start_client::<Req>(&client);

    let (reply_tx, mut reply_rx) = channel::<Rep>(0);
    root_tx
        .send(Req {
            tag: "bad".into(),
            reply: reply_tx,
        })
        .await
        .unwrap();

    // The send side fails registration; the offered endpoint closes and the
    // peer sees end-of-stream.
    assert!(timeout(TICK, reply_rx.recv()).await.unwrap().is_none());
    timeout(TICK, server_loop).await.unwrap().unwrap();
    drop(req_tx);
    assert!(req_rx.recv().await.is_none());
}

#[tokio::test]
async fn direction_mismatch_tears_down() {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, _out_rx) = mpsc::unbounded_channel();
    let server = Conn::new(PipeEncoder { tx: Some(out_tx) }, PipeDecoder { rx: in_rx });
    let (req_tx, mut req_rx, server_loop) = start_server::<Req>(&server);

    // A descriptor claiming the peer receives on `.reply`, aimed at a field
    // the receiver types as send-only.
    let mut enc = PipeEncoder { tx: Some(in_tx) };
    enc.encode_send(
        0,
        &[ChanDesc {
            id: -1,
            path: ".reply".to_owned(),
            dir: Dir::Recv,
            cap: 4,
        }],
        &Req {
            tag: "craft".into(),
            reply: Tx::detached(),
        },
    )
    .await
    .unwrap();

    timeout(TICK, server_loop).await.unwrap().unwrap();
    drop(req_tx);
    assert!(req_rx.recv().await.is_none());
}

#[tokio::test]
async fn unmatched_descriptor_path_tears_down() {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, _out_rx) = mpsc::unbounded_channel();
    let server = Conn::new(PipeEncoder { tx: Some(out_tx) }, PipeDecoder { rx: in_rx });
    let (_req_tx, _req_rx, server_loop) = start_server::<Req>(&server);

    let mut enc = PipeEncoder { tx: Some(in_tx) };
    enc.encode_send(
        0,
        &[ChanDesc {
            id: 1,
            path: ".tag".to_owned(),
            dir: Dir::Send,
            cap: 4,
        }],
        &Req {
            tag: "craft".into(),
            reply: Tx::detached(),
        },
    )
    .await
    .unwrap();

    timeout(TICK, server_loop).await.unwrap().unwrap();
}

#[tokio::test]
async fn unknown_channel_id_tears_down() {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, _out_rx) = mpsc::unbounded_channel();
    let server = Conn::new(PipeEncoder { tx: Some(out_tx) }, PipeDecoder { rx: in_rx });
    let (_req_tx, _req_rx, server_loop) = start_server::<Req>(&server);

    let mut enc = PipeEncoder { tx: Some(in_tx) };
    enc.encode_send(42, &[], &Rep {
        body: "stray".into(),
        done: false,
    })
    .await
    .unwrap();

    timeout(TICK, server_loop).await.unwrap().unwrap();
}

#[tokio::test]
async fn invalid_action_tears_down() {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, _out_rx) = mpsc::unbounded_channel();
    let server = Conn::new(PipeEncoder { tx: Some(out_tx) }, PipeDecoder { rx: in_rx });
    let (_req_tx, _req_rx, server_loop) = start_server::<Req>(&server);

    in_tx
        .send(postcard::to_stdvec(&(9u8, 0i64)).unwrap())
        .unwrap();

    timeout(TICK, server_loop).await.unwrap().unwrap();
}

#[tokio::test]
async fn teardown_closes_live_reply_channels() {
    let (client, server) = conn_pair();
    let (_req_tx, mut req_rx, _server_loop) = start_server::<Req>(&server);
    let (root_tx, _deliver) = start_client::<Req>(&client);

    let (reply_tx, mut reply_rx) = channel::<Rep>(10);
    root_tx
        .send(Req {
            tag: "partial".into(),
            reply: reply_tx,
        })
        .await
        .unwrap();

    let req = timeout(TICK, req_rx.recv()).await.unwrap().unwrap();
    for body in ["one", "two"] {
        req.reply
            .send(Rep {
                body: body.into(),
                done: false,
            })
            .await
            .unwrap();
    }

    // Two values arrive, then the connection drops without the reply channel
    // ever being closed by its producer.
    for body in ["one", "two"] {
        let rep = timeout(TICK, reply_rx.recv()).await.unwrap().unwrap();
        assert_eq!(rep.body, body);
        assert!(!rep.done);
    }
    server.close();
    assert!(timeout(TICK, reply_rx.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn wire_ids_and_descriptor_order() {
    let (wire_tx, mut wire_rx) = mpsc::unbounded_channel();
    let (keep_tx, keep_rx) = mpsc::unbounded_channel();
    let client = Conn::new(PipeEncoder { tx: Some(wire_tx) }, PipeDecoder {
        rx: keep_rx,
    });
    let _keep = keep_tx;

    let (root_tx, _deliver) = start_client::<TwoChans>(&client);

    let (a_tx, _a_rx) = channel::<u32>(3);
    let (b_keep, b_rx) = channel::<u32>(5);
    root_tx.send(TwoChans { a: a_tx, b: b_rx }).await.unwrap();

    let mut msg = decode_one(timeout(TICK, wire_rx.recv()).await.unwrap().unwrap()).await;
    assert_eq!(msg.chan_id(), 0);
    assert!(!msg.closed());
    let descs = msg.take_desc_list();
    assert_eq!(descs.len(), 2);
    assert_eq!((descs[0].id, descs[0].dir, descs[0].cap), (1, Dir::Send, 3));
    assert_eq!(descs[0].path, ".a");
    assert_eq!((descs[1].id, descs[1].dir, descs[1].cap), (-1, Dir::Recv, 5));
    assert_eq!(descs[1].path, ".b");

    // Closing the root producer announces the close on id 0.
    drop(root_tx);
    let msg = decode_one(timeout(TICK, wire_rx.recv()).await.unwrap().unwrap()).await;
    assert_eq!(msg.chan_id(), 0);
    assert!(msg.closed());

    drop(b_keep);
}
