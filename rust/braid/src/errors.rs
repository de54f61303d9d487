use crate::codec::WireError;
use crate::desc::ChannelId;

/// Fatal connection fault. Every variant tears the connection down; there is
/// no per-operation recovery.
#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    #[error(transparent)]
    Wire(#[from] WireError),

    /// An incoming frame referenced an id with no registry entry.
    #[error("protocol error, unknown channel id {0}")]
    UnknownChannel(ChannelId),

    /// A descriptor path did not resolve to a channel field in the value.
    #[error("protocol error, no channel at {0:?}")]
    ChannelExpected(String),

    /// A descriptor's direction disagreed with the field it points at.
    #[error("type error, wrong channel direction at {0:?}")]
    WrongDirection(String),

    /// A channel with zero capacity was offered for transmission.
    #[error("type error, channel must be buffered")]
    Unbuffered,

    /// The connection was already torn down.
    #[error("connection closed")]
    Closed,
}

impl ConnError {
    /// Faults that end a connection without being worth a log line: the peer
    /// hanging up cleanly, or a local close racing in-flight work.
    pub(crate) fn is_silent(&self) -> bool {
        matches!(self, ConnError::Wire(WireError::Eof) | ConnError::Closed)
    }
}
