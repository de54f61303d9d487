//! Typed, directional, buffered channel handles.
//!
//! A [`Tx`] or [`Rx`] can live inside any [`Payload`](crate::Payload) value
//! and be carried over a connection: the sender's side hands the underlying
//! half to the connection, the receiver's side gets a fresh half wired to the
//! wire. A handle whose half is gone is *detached*: it serializes as nothing,
//! the traversal skips it (the counterpart of a nil channel field), sends on
//! it fail and receives yield end-of-stream.

use std::fmt;

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use tokio::sync::mpsc;

/// Create a connected channel pair with the given buffer capacity.
///
/// The two halves are ordinary in-process endpoints until one of them is
/// embedded in a transmitted value. Capacity `0` is representable so that a
/// connection can reject it with *channel must be buffered*; such a pair
/// still buffers one value locally.
pub fn channel<T>(cap: usize) -> (Tx<T>, Rx<T>) {
    let (sender, receiver) = mpsc::channel(cap.max(1));
    (
        Tx {
            sender: Some(sender),
            cap,
        },
        Rx {
            receiver: Some(receiver),
            cap,
        },
    )
}

/// Sending half: the holder of this value may send `T`s.
pub struct Tx<T> {
    pub(crate) sender: Option<mpsc::Sender<T>>,
    pub(crate) cap: usize,
}

/// Receiving half: the holder of this value may receive `T`s.
pub struct Rx<T> {
    pub(crate) receiver: Option<mpsc::Receiver<T>>,
    pub(crate) cap: usize,
}

impl<T> Tx<T> {
    /// Send a value, waiting for buffer space.
    pub async fn send(&self, value: T) -> Result<(), TxError> {
        match &self.sender {
            Some(sender) => sender.send(value).await.map_err(|_| TxError::Closed),
            None => Err(TxError::Detached),
        }
    }

    /// Send without waiting; fails if the buffer is full.
    pub fn try_send(&self, value: T) -> Result<(), TxError> {
        match &self.sender {
            Some(sender) => sender.try_send(value).map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => TxError::Full,
                mpsc::error::TrySendError::Closed(_) => TxError::Closed,
            }),
            None => Err(TxError::Detached),
        }
    }

    /// True once the underlying half has been taken by a connection, or for a
    /// handle materialized by deserialization that was never grafted.
    pub fn is_detached(&self) -> bool {
        self.sender.is_none()
    }

    /// The buffer capacity recorded at creation.
    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub(crate) fn detached() -> Self {
        Tx {
            sender: None,
            cap: 0,
        }
    }

    pub(crate) fn take_sender(&mut self) -> Option<mpsc::Sender<T>> {
        self.sender.take()
    }

    pub(crate) fn clone_sender(&self) -> Option<mpsc::Sender<T>> {
        self.sender.clone()
    }

    pub(crate) fn attach_sender(&mut self, sender: mpsc::Sender<T>, cap: usize) {
        self.sender = Some(sender);
        self.cap = cap;
    }
}

impl<T> Rx<T> {
    /// Receive the next value; `None` once the channel is closed and drained,
    /// or for a detached handle.
    pub async fn recv(&mut self) -> Option<T> {
        match &mut self.receiver {
            Some(receiver) => receiver.recv().await,
            None => None,
        }
    }

    /// True once the underlying half has been taken by a connection, or for a
    /// handle materialized by deserialization that was never grafted.
    pub fn is_detached(&self) -> bool {
        self.receiver.is_none()
    }

    /// The buffer capacity recorded at creation.
    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub(crate) fn detached() -> Self {
        Rx {
            receiver: None,
            cap: 0,
        }
    }

    pub(crate) fn take_receiver(&mut self) -> Option<mpsc::Receiver<T>> {
        self.receiver.take()
    }

    pub(crate) fn receiver_mut(&mut self) -> Option<&mut mpsc::Receiver<T>> {
        self.receiver.as_mut()
    }

    pub(crate) fn attach_receiver(&mut self, receiver: mpsc::Receiver<T>, cap: usize) {
        self.receiver = Some(receiver);
        self.cap = cap;
    }
}

/// Error from sending on a [`Tx`].
#[derive(Debug, PartialEq, Eq)]
pub enum TxError {
    /// All receiving halves are gone.
    Closed,
    /// The handle's underlying half was taken or never attached.
    Detached,
    /// `try_send` found the buffer full.
    Full,
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxError::Closed => write!(f, "channel closed"),
            TxError::Detached => write!(f, "channel handle is detached"),
            TxError::Full => write!(f, "channel buffer is full"),
        }
    }
}

impl std::error::Error for TxError {}

impl<T> fmt::Debug for Tx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tx")
            .field("detached", &self.is_detached())
            .field("cap", &self.cap)
            .finish()
    }
}

impl<T> fmt::Debug for Rx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rx")
            .field("detached", &self.is_detached())
            .field("cap", &self.cap)
            .finish()
    }
}

// On the wire a channel field carries no payload of its own: the descriptor
// list is what rebuilds it. Handles therefore serialize as unit and
// deserialize detached, waiting to be grafted.

impl<T> Serialize for Tx<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_unit()
    }
}

impl<'de, T> Deserialize<'de> for Tx<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        <() as Deserialize>::deserialize(deserializer)?;
        Ok(Tx::detached())
    }
}

impl<T> Serialize for Rx<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_unit()
    }
}

impl<'de, T> Deserialize<'de> for Rx<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        <() as Deserialize>::deserialize(deserializer)?;
        Ok(Rx::detached())
    }
}
