//! Channel identifiers and wire descriptors.

use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};

/// Wire identifier for a channel. Nonzero in descriptors; the sign records
/// which side allocated it (see [`crate::Conn`]).
pub type ChannelId = i64;

/// The well-known id of the root request channel.
pub const ROOT_CHANNEL: ChannelId = 0;

/// Direction of a channel field, from the sending peer's point of view.
///
/// `Send` means the holder of the value may send on the field; `Recv` means
/// the holder may receive from it. Encoded as `1` / `2` on the wire; any
/// other byte fails decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    Send,
    Recv,
}

impl Dir {
    fn as_wire(self) -> u8 {
        match self {
            Dir::Send => 1,
            Dir::Recv => 2,
        }
    }
}

impl Serialize for Dir {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for Dir {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            1 => Ok(Dir::Send),
            2 => Ok(Dir::Recv),
            other => Err(de::Error::custom(format!(
                "invalid channel direction {other}"
            ))),
        }
    }
}

/// Over-the-wire record describing one channel endpoint embedded in a value.
///
/// The `path` locates the channel field relative to the root of the value:
/// dotted field names, with `*` marking a pointer dereference, e.g.
/// `.exec.*.reply`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChanDesc {
    pub id: ChannelId,
    pub path: String,
    pub dir: Dir,
    pub cap: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_wire_bytes() {
        assert_eq!(postcard::to_stdvec(&Dir::Send).unwrap(), vec![1]);
        assert_eq!(postcard::to_stdvec(&Dir::Recv).unwrap(), vec![2]);
    }

    #[test]
    fn dir_rejects_unknown_byte() {
        assert!(postcard::from_bytes::<Dir>(&[0]).is_err());
        assert!(postcard::from_bytes::<Dir>(&[3]).is_err());
    }

    #[test]
    fn desc_roundtrip() {
        let desc = ChanDesc {
            id: -4,
            path: ".exec.*.reply".to_owned(),
            dir: Dir::Send,
            cap: 10,
        };
        let bytes = postcard::to_stdvec(&desc).unwrap();
        assert_eq!(postcard::from_bytes::<ChanDesc>(&bytes).unwrap(), desc);
    }
}
