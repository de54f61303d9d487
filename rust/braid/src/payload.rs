//! The traverse-channel-endpoints capability.
//!
//! A connection discovers the channel handles embedded in a value by walking
//! it: depth-first, in field declaration order, building a dotted path as it
//! goes. [`Payload`] is that walk. Message structs get their implementation
//! from the [`payload!`](crate::payload!) macro; scalars and sequences are
//! leaves; `Box` and `Option` are the pointer-likes, extending the path with
//! `*` and skipping `None`.
//!
//! The walk order is load-bearing: it defines the order descriptors appear in
//! a frame and therefore the order channel ids are allocated.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::channel::{Rx, Tx};

/// A value that can be carried over a connection.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Walk this value, reporting every channel handle to the visitor with
    /// the dotted path that locates it.
    fn traverse<V: Visitor>(&mut self, path: &mut String, visitor: &mut V);
}

/// Receives the channel handles found by [`Payload::traverse`].
///
/// Implemented by the connection; user code only ever implements [`Payload`]
/// (usually via [`payload!`](crate::payload!)).
pub trait Visitor {
    fn tx<T: Payload>(&mut self, path: &str, slot: &mut Tx<T>);
    fn rx<T: Payload>(&mut self, path: &str, slot: &mut Rx<T>);
}

impl<T: Payload> Payload for Tx<T> {
    fn traverse<V: Visitor>(&mut self, path: &mut String, visitor: &mut V) {
        visitor.tx(path, self);
    }
}

impl<T: Payload> Payload for Rx<T> {
    fn traverse<V: Visitor>(&mut self, path: &mut String, visitor: &mut V) {
        visitor.rx(path, self);
    }
}

impl<T: Payload> Payload for Option<T> {
    fn traverse<V: Visitor>(&mut self, path: &mut String, visitor: &mut V) {
        if let Some(inner) = self {
            let len = path.len();
            path.push_str(".*");
            inner.traverse(path, visitor);
            path.truncate(len);
        }
    }
}

impl<T: Payload> Payload for Box<T> {
    fn traverse<V: Visitor>(&mut self, path: &mut String, visitor: &mut V) {
        let len = path.len();
        path.push_str(".*");
        (**self).traverse(path, visitor);
        path.truncate(len);
    }
}

/// Sequences are not walked; a channel handle inside one is not discoverable.
impl<T: Payload> Payload for Vec<T> {
    fn traverse<V: Visitor>(&mut self, _path: &mut String, _visitor: &mut V) {}
}

macro_rules! leaf_payload {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Payload for $ty {
                fn traverse<V: Visitor>(&mut self, _path: &mut String, _visitor: &mut V) {}
            }
        )*
    };
}

leaf_payload!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    String,
);

/// Define a message struct: the struct itself, serde derives, and a
/// [`Payload`] implementation that walks every field in declaration order.
///
/// ```
/// use braid::{payload, Tx};
///
/// payload! {
///     pub struct Job {
///         pub name: String,
///         pub progress: Tx<u32>,
///     }
/// }
/// ```
#[macro_export]
macro_rules! payload {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : $field_ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(::serde::Serialize, ::serde::Deserialize)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                $field_vis $field: $field_ty,
            )*
        }

        impl $crate::Payload for $name {
            #[allow(unused_variables)]
            fn traverse<V: $crate::Visitor>(
                &mut self,
                path: &mut ::std::string::String,
                visitor: &mut V,
            ) {
                $(
                    let len = path.len();
                    path.push('.');
                    path.push_str(::core::stringify!($field));
                    $crate::Payload::traverse(&mut self.$field, path, visitor);
                    path.truncate(len);
                )*
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel;

    payload! {
        struct Inner {
            label: String,
            ch: Tx<u32>,
        }
    }

    payload! {
        struct Outer {
            inner: Inner,
            boxed: Option<Box<Inner>>,
            data: Rx<Vec<u8>>,
            count: u64,
        }
    }

    struct PathLog {
        seen: Vec<(String, &'static str)>,
    }

    impl Visitor for PathLog {
        fn tx<T: Payload>(&mut self, path: &str, slot: &mut Tx<T>) {
            if !slot.is_detached() {
                self.seen.push((path.to_owned(), "tx"));
            }
        }
        fn rx<T: Payload>(&mut self, path: &str, slot: &mut Rx<T>) {
            if !slot.is_detached() {
                self.seen.push((path.to_owned(), "rx"));
            }
        }
    }

    fn walk<T: Payload>(value: &mut T) -> Vec<(String, &'static str)> {
        let mut log = PathLog { seen: Vec::new() };
        let mut path = String::new();
        value.traverse(&mut path, &mut log);
        log.seen
    }

    #[test]
    fn paths_follow_declaration_order() {
        let (tx1, _rx1) = channel::<u32>(1);
        let (tx2, _rx2) = channel::<u32>(1);
        let (_tx3, rx3) = channel::<Vec<u8>>(2);
        let mut value = Outer {
            inner: Inner {
                label: "a".into(),
                ch: tx1,
            },
            boxed: Some(Box::new(Inner {
                label: "b".into(),
                ch: tx2,
            })),
            data: rx3,
            count: 7,
        };

        assert_eq!(
            walk(&mut value),
            vec![
                (".inner.ch".to_owned(), "tx"),
                (".boxed.*.*.ch".to_owned(), "tx"),
                (".data".to_owned(), "rx"),
            ]
        );
    }

    #[test]
    fn none_and_detached_yield_nothing() {
        let (tx1, _rx1) = channel::<u32>(1);
        let mut value = Outer {
            inner: Inner {
                label: "a".into(),
                ch: tx1,
            },
            boxed: None,
            data: Rx::detached(),
            count: 0,
        };
        assert_eq!(walk(&mut value), vec![(".inner.ch".to_owned(), "tx")]);
    }

    #[test]
    fn boxed_root_starts_with_deref() {
        let (tx, _rx) = channel::<u32>(1);
        let mut value = Box::new(Inner {
            label: "x".into(),
            ch: tx,
        });
        assert_eq!(walk(&mut value), vec![(".*.ch".to_owned(), "tx")]);
    }
}
