//! The connection multiplexer.
//!
//! One [`Conn`] per byte stream. It owns the codec halves, the channel
//! registry, and the two id counters. Values flow out through per-channel
//! forwarder tasks and in through a single receive loop; embedded channel
//! handles are detached from outgoing values at registration and grafted
//! into incoming values as they are decoded.
//!
//! Id allocation is symmetric: both peers start their send counter at `+1`
//! and their receive counter at `-1`. A side only ever allocates ids of its
//! own sign for a given role and only ever accepts the mirror ids from the
//! peer, so simultaneous allocation on both ends cannot collide.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::{Mutex, Notify};

use crate::channel::{Rx, Tx};
use crate::codec::{DecodedMessage, Decoder, Encoder};
use crate::desc::{ChanDesc, ChannelId, Dir, ROOT_CHANNEL};
use crate::errors::ConnError;
use crate::payload::{Payload, Visitor};

/// A connection between two peers. Cheap to clone; all clones drive the same
/// underlying stream.
pub struct Conn<E: Encoder, D: Decoder> {
    core: Arc<Core<E, D>>,
}

impl<E: Encoder, D: Decoder> Clone for Conn<E, D> {
    fn clone(&self) -> Self {
        Conn {
            core: Arc::clone(&self.core),
        }
    }
}

impl<E: Encoder, D: Decoder> Conn<E, D> {
    /// Wrap a codec pair into a connection. Nothing runs until
    /// [`Conn::receive_values`] or [`Conn::deliver`] is called.
    pub fn new(encoder: E, decoder: D) -> Self {
        Conn {
            core: Arc::new(Core {
                enc: Mutex::new(encoder),
                dec: Mutex::new(Some(decoder)),
                registry: RwLock::new(Registry {
                    entries: HashMap::new(),
                    next_send_id: 1,
                    next_recv_id: -1,
                    closed: false,
                }),
                closed: AtomicBool::new(false),
                teardown: Notify::new(),
            }),
        }
    }

    /// Install the application's request channel at id 0 (server mode).
    /// Must be called before [`Conn::receive_values`]; incoming root frames
    /// are delivered into it.
    ///
    /// The connection keeps only a clone of the sender, so teardown never
    /// closes the application's channel, and several connections may share
    /// one.
    pub fn set_request_channel<T: Payload>(&self, requests: &Tx<T>) {
        let Some(sender) = requests.clone_sender() else {
            tracing::debug!("request channel handle is detached; nothing installed");
            return;
        };
        self.core
            .registry
            .write()
            .entries
            .insert(ROOT_CHANNEL, Arc::new(TypedSink { tx: sender }));
    }

    /// Run the receive loop until the connection ends. Decodes frames,
    /// dispatches them into local endpoints, and tears everything down on
    /// the way out.
    pub async fn receive_values(&self) {
        let core = &self.core;
        let Some(mut dec) = core.dec.lock().await.take() else {
            // The loop is already running (or already ran) elsewhere.
            return;
        };

        loop {
            if core.closed.load(Ordering::SeqCst) {
                break;
            }
            let msg = tokio::select! {
                _ = core.teardown.notified() => break,
                decoded = dec.decode() => match decoded {
                    Ok(msg) => msg,
                    Err(err) => {
                        core.handle_error(err.into());
                        break;
                    }
                },
            };

            let id = msg.chan_id();

            if msg.closed() {
                // Dropping the sink is what closes the local endpoint.
                if core.registry.write().entries.remove(&id).is_none() {
                    core.handle_error(ConnError::UnknownChannel(id));
                    break;
                }
                continue;
            }

            let sink = core.registry.read().entries.get(&id).map(Arc::clone);
            let Some(sink) = sink else {
                core.handle_error(ConnError::UnknownChannel(id));
                break;
            };
            if let Err(err) = sink.deliver(core, msg).await {
                core.handle_error(err);
                break;
            }
        }

        // Drop every live endpoint. Non-root channels close here because the
        // connection holds their only sender; the root survives because the
        // application keeps the original.
        let entries = {
            let mut registry = core.registry.write();
            registry.closed = true;
            std::mem::take(&mut registry.entries)
        };
        drop(entries);
    }

    /// Install the channel as the root producer and run until it closes or
    /// the connection fails (client mode). Spawns the receive loop.
    ///
    /// The handle keeps its underlying half afterwards, so a caller can loop
    /// reconnect attempts over the same channel.
    pub async fn deliver<T: Payload>(&self, requests: &mut Rx<T>) {
        let loop_conn = self.clone();
        tokio::spawn(async move { loop_conn.receive_values().await });

        match requests.receiver_mut() {
            Some(source) => forward_loop(&self.core, ROOT_CHANNEL, source).await,
            None => {
                // A detached producer behaves like an already-closed one.
                if let Err(err) = self.core.transmit_close(ROOT_CHANNEL).await {
                    self.core.handle_error(err);
                }
            }
        }
    }

    /// Tear the connection down without logging. The peer observes
    /// end-of-stream; local endpoints close as the receive loop exits.
    pub fn close(&self) {
        self.core.handle_error(ConnError::Closed);
    }
}

// ============================================================================
// Shared core
// ============================================================================

pub(crate) struct Core<E: Encoder, D: Decoder> {
    /// Guards the encoder across registration *and* emission: a frame that
    /// announces a channel must reach the wire before any frame that uses
    /// the announced id.
    enc: Mutex<E>,
    dec: Mutex<Option<D>>,
    registry: RwLock<Registry<E, D>>,
    closed: AtomicBool,
    teardown: Notify,
}

struct Registry<E: Encoder, D: Decoder> {
    entries: HashMap<ChannelId, Arc<dyn Sink<E, D>>>,
    next_send_id: ChannelId,
    next_recv_id: ChannelId,
    closed: bool,
}

impl<E: Encoder, D: Decoder> Core<E, D> {
    /// Walk the value, register the channels it carries, and emit one Send
    /// frame, holding the encoder for the whole critical section.
    async fn transmit_send<T: Payload>(
        self: &Arc<Self>,
        id: ChannelId,
        mut value: T,
    ) -> Result<(), ConnError> {
        let mut collector = CollectVisitor { found: Vec::new() };
        let mut path = String::new();
        value.traverse(&mut path, &mut collector);

        let mut enc = self.enc.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            // Dropping the collected endpoints closes them for their local
            // holders.
            return Err(ConnError::Closed);
        }
        let descs = self.register_channels(collector.found)?;
        enc.encode_send(id, &descs, &value).await?;
        Ok(())
    }

    async fn transmit_close(self: &Arc<Self>, id: ChannelId) -> Result<(), ConnError> {
        let mut enc = self.enc.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnError::Closed);
        }
        enc.encode_close(id).await?;
        Ok(())
    }

    /// Assign ids to freshly discovered channels and wire them up: channels
    /// this side will receive on get a registry entry, channels this side
    /// will forward from get a forwarder task. Caller holds the encoder.
    fn register_channels(
        self: &Arc<Self>,
        found: Vec<Discovered<E, D>>,
    ) -> Result<Vec<ChanDesc>, ConnError> {
        if found.is_empty() {
            return Ok(Vec::new());
        }
        let mut registry = self.registry.write();
        let mut descs = Vec::with_capacity(found.len());
        for mut item in found {
            if item.desc.cap == 0 {
                return Err(ConnError::Unbuffered);
            }
            if registry.closed {
                // Teardown won the race; dropping the rest of `found` closes
                // every offered endpoint immediately.
                return Err(ConnError::Closed);
            }
            match item.endpoint {
                Endpoint::Deliver(sink) => {
                    item.desc.id = registry.next_send_id;
                    registry.next_send_id += 1;
                    registry.entries.insert(item.desc.id, sink);
                }
                Endpoint::Forward(source) => {
                    item.desc.id = registry.next_recv_id;
                    registry.next_recv_id -= 1;
                    source.spawn(Arc::clone(self), item.desc.id);
                }
            }
            tracing::trace!(id = item.desc.id, path = %item.desc.path, "registered channel");
            descs.push(item.desc);
        }
        Ok(descs)
    }

    /// The single fatal path: first caller wins, logs unless the cause was a
    /// clean end-of-stream, wakes the receive loop, and closes the stream so
    /// the peer unblocks. Forwarders observe the closure on their next
    /// emission.
    fn handle_error(self: &Arc<Self>, err: ConnError) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if !err.is_silent() {
            tracing::error!(%err, "tearing down connection");
        }
        self.teardown.notify_waiters();
        let core = Arc::clone(self);
        tokio::spawn(async move {
            let mut enc = core.enc.lock().await;
            enc.shutdown().await;
        });
    }
}

/// One forwarder owns one outbound endpoint: pop values, transmit them,
/// announce the close when the producer is done. Always tries to emit the
/// Close frame, even after a failure.
async fn forward_loop<T, E, D>(core: &Arc<Core<E, D>>, id: ChannelId, source: &mut mpsc::Receiver<T>)
where
    T: Payload,
    E: Encoder,
    D: Decoder,
{
    while let Some(value) = source.recv().await {
        if let Err(err) = core.transmit_send(id, value).await {
            core.handle_error(err);
            break;
        }
    }
    if let Err(err) = core.transmit_close(id).await {
        core.handle_error(err);
    }
}

async fn forward_channel<T, E, D>(core: Arc<Core<E, D>>, id: ChannelId, mut source: mpsc::Receiver<T>)
where
    T: Payload,
    E: Encoder,
    D: Decoder,
{
    forward_loop(&core, id, &mut source).await;
}

// ============================================================================
// Registry entries (type-erased delivery)
// ============================================================================

type DeliverFuture = Pin<Box<dyn Future<Output = Result<(), ConnError>> + Send + 'static>>;

/// A registry entry: delivers decoded frames into one typed local endpoint.
trait Sink<E: Encoder, D: Decoder>: Send + Sync {
    fn deliver(&self, core: &Arc<Core<E, D>>, msg: D::Message) -> DeliverFuture;
}

struct TypedSink<T> {
    tx: mpsc::Sender<T>,
}

impl<T: Payload, E: Encoder, D: Decoder> Sink<E, D> for TypedSink<T> {
    fn deliver(&self, core: &Arc<Core<E, D>>, mut msg: D::Message) -> DeliverFuture {
        let tx = self.tx.clone();
        let core = Arc::clone(core);
        Box::pin(async move {
            let mut value: T = msg.decode_value()?;
            graft_channels(&core, &mut value, msg.take_desc_list())?;
            // Waiting for buffer space here is what backpressures the receive
            // loop onto the local consumer. A consumer that dropped its
            // receiver just discards the value.
            let _ = tx.send(value).await;
            Ok(())
        })
    }
}

// ============================================================================
// Collect walk (send path)
// ============================================================================

enum Endpoint<E: Encoder, D: Decoder> {
    /// Peer will send on this channel; install a registry entry.
    Deliver(Arc<dyn Sink<E, D>>),
    /// Peer will receive from this channel; run a forwarder over it.
    Forward(Box<dyn Forward<E, D>>),
}

/// A not-yet-spawned forwarder holding its typed receiver.
trait Forward<E: Encoder, D: Decoder>: Send {
    fn spawn(self: Box<Self>, core: Arc<Core<E, D>>, id: ChannelId);
}

struct TypedSource<T> {
    rx: mpsc::Receiver<T>,
}

impl<T: Payload, E: Encoder, D: Decoder> Forward<E, D> for TypedSource<T> {
    fn spawn(self: Box<Self>, core: Arc<Core<E, D>>, id: ChannelId) {
        tokio::spawn(forward_channel(core, id, self.rx));
    }
}

struct Discovered<E: Encoder, D: Decoder> {
    desc: ChanDesc,
    endpoint: Endpoint<E, D>,
}

/// Detaches every live channel handle from an outgoing value, leaving a
/// descriptor (id still unassigned) plus the endpoint the connection keeps.
/// Detached handles yield nothing, like nil channel fields.
struct CollectVisitor<E: Encoder, D: Decoder> {
    found: Vec<Discovered<E, D>>,
}

impl<E: Encoder, D: Decoder> Visitor for CollectVisitor<E, D> {
    fn tx<T: Payload>(&mut self, path: &str, slot: &mut Tx<T>) {
        let cap = slot.capacity();
        let Some(sender) = slot.take_sender() else {
            return;
        };
        self.found.push(Discovered {
            desc: ChanDesc {
                id: 0,
                path: path.to_owned(),
                dir: Dir::Send,
                cap,
            },
            endpoint: Endpoint::Deliver(Arc::new(TypedSink { tx: sender })),
        });
    }

    fn rx<T: Payload>(&mut self, path: &str, slot: &mut Rx<T>) {
        let cap = slot.capacity();
        let Some(receiver) = slot.take_receiver() else {
            return;
        };
        self.found.push(Discovered {
            desc: ChanDesc {
                id: 0,
                path: path.to_owned(),
                dir: Dir::Recv,
                cap,
            },
            endpoint: Endpoint::Forward(Box::new(TypedSource { rx: receiver })),
        });
    }
}

// ============================================================================
// Graft walk (receive path)
// ============================================================================

/// Rebuild the channel fields of a freshly decoded value from its descriptor
/// list: each descriptor gets a fresh endpoint of its declared capacity, the
/// field gets the application-facing half, and the connection keeps the
/// other. The descriptor's direction is the sender's view, so the side doing
/// the grafting takes the opposite wire role: `Send` fields are forwarded
/// from, `Recv` fields are received into.
fn graft_channels<T, E, D>(
    core: &Arc<Core<E, D>>,
    value: &mut T,
    descs: Vec<ChanDesc>,
) -> Result<(), ConnError>
where
    T: Payload,
    E: Encoder,
    D: Decoder,
{
    if descs.is_empty() {
        return Ok(());
    }
    let mut visitor = GraftVisitor {
        core,
        used: vec![false; descs.len()],
        descs: &descs,
        failure: None,
    };
    let mut path = String::new();
    value.traverse(&mut path, &mut visitor);
    if let Some(err) = visitor.failure {
        return Err(err);
    }
    for (used, desc) in visitor.used.iter().zip(&descs) {
        if !used {
            return Err(ConnError::ChannelExpected(desc.path.clone()));
        }
    }
    Ok(())
}

struct GraftVisitor<'a, E: Encoder, D: Decoder> {
    core: &'a Arc<Core<E, D>>,
    descs: &'a [ChanDesc],
    used: Vec<bool>,
    failure: Option<ConnError>,
}

impl<E: Encoder, D: Decoder> GraftVisitor<'_, E, D> {
    fn claim(&mut self, path: &str) -> Option<ChanDesc> {
        let idx = (0..self.descs.len()).find(|&i| !self.used[i] && self.descs[i].path == path)?;
        self.used[idx] = true;
        Some(self.descs[idx].clone())
    }

    fn check(&mut self, desc: &ChanDesc, want: Dir, path: &str) -> bool {
        if desc.dir != want {
            self.failure = Some(ConnError::WrongDirection(path.to_owned()));
            return false;
        }
        if desc.cap == 0 {
            self.failure = Some(ConnError::Unbuffered);
            return false;
        }
        true
    }
}

impl<E: Encoder, D: Decoder> Visitor for GraftVisitor<'_, E, D> {
    fn tx<T: Payload>(&mut self, path: &str, slot: &mut Tx<T>) {
        if self.failure.is_some() {
            return;
        }
        let Some(desc) = self.claim(path) else {
            // No descriptor for this field: it was nil on the sending side.
            return;
        };
        if !self.check(&desc, Dir::Send, path) {
            return;
        }
        // The application sends into the field; a forwarder drains the pair
        // onto the wire under the peer-assigned id.
        let (tx, rx) = mpsc::channel::<T>(desc.cap);
        slot.attach_sender(tx, desc.cap);
        tokio::spawn(forward_channel(Arc::clone(self.core), desc.id, rx));
    }

    fn rx<T: Payload>(&mut self, path: &str, slot: &mut Rx<T>) {
        if self.failure.is_some() {
            return;
        }
        let Some(desc) = self.claim(path) else {
            return;
        };
        if !self.check(&desc, Dir::Recv, path) {
            return;
        }
        // The application receives from the field; incoming frames for the
        // peer-assigned id land in the pair through the registry.
        let (tx, rx) = mpsc::channel::<T>(desc.cap);
        slot.attach_receiver(rx, desc.cap);
        let mut registry = self.core.registry.write();
        if registry.closed {
            // Teardown raced the graft: dropping the sender leaves the field
            // at end-of-stream.
            return;
        }
        registry.entries.insert(desc.id, Arc::new(TypedSink { tx }));
    }
}
