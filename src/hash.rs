//! The public, insertion-ordered concurrent hash table.

mod builder;
mod iter;
mod table;

pub use builder::ConcurrentHashBuilder;
pub use iter::{Iter, Keys, Values};
pub use table::ConcurrentHash;
