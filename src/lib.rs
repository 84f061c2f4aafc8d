#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![deny(rustdoc::broken_intra_doc_links)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A concurrent hash table that remembers insertion order.
//!
//! `ordered-cht` provides [`ConcurrentHash`], the storage behind a dynamic
//! language's ordered hash value when that value is shared between native
//! threads. Lookups are lock-free, mutations synchronize with compare-and-swap
//! loops, and iteration always follows the order in which keys were first
//! inserted.
//!
//! # Example
//!
//! ```rust
//! use ordered_cht::ConcurrentHash;
//!
//! let hash = ConcurrentHash::new();
//!
//! hash.insert("a", 1).unwrap();
//! hash.insert("b", 2).unwrap();
//! hash.insert("c", 3).unwrap();
//!
//! assert_eq!(hash.remove("b"), Some(2));
//!
//! let keys: Vec<_> = hash.keys().collect();
//! assert_eq!(keys, vec!["a", "c"]);
//! assert_eq!(hash.len(), 2);
//! ```
//!
//! # Compare by identity
//!
//! A table can be switched, while still empty, to compare keys by their
//! [`Identity`] instead of by [`Eq`]. This mirrors `Hash#compare_by_identity`
//! of Ruby-like languages: two equal strings held by different `Arc`s become
//! distinct keys, and an owned `String` key is distinct from every other key.
//!
//! Keys and values must be `'static`, since removed entries may be reclaimed
//! after the table is dropped.
//!
//! # Garbage collector hook
//!
//! [`ConcurrentHash::export_reachable`] reports every key and value that is
//! itself a heap object (see [`Traceable`]) to an [`Accumulator`] supplied by a
//! tracing collector.
//!
//! # Logging
//!
//! Enable the `logging` feature to have the table report resize events and
//! failures through the [`log`](https://docs.rs/log) facade.

pub(crate) mod cht;
pub(crate) mod common;
mod hash;
mod reachability;

pub use common::{error::ResizeError, identity::Identity};
pub use hash::{ConcurrentHash, ConcurrentHashBuilder, Iter, Keys, Values};
pub use reachability::{accumulate_with, Accumulator, FnAccumulator, Traceable};

#[cfg(test)]
mod tests {
    #[test]
    fn table_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}

        assert_send_sync::<crate::ConcurrentHash<String, u64>>();
    }
}
