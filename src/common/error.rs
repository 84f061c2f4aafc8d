use std::collections::TryReserveError;

/// The error type for a failed resize of a [`ConcurrentHash`][hash-struct].
///
/// A resize is triggered by [`insert`][insert-method] once the table crosses
/// its load factor. When the resize fails, the entry has already been inserted
/// and the table keeps using its previous bucket array.
///
/// [hash-struct]: ./struct.ConcurrentHash.html
/// [insert-method]: ./struct.ConcurrentHash.html#method.insert
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResizeError {
    /// The new bucket array could not be allocated.
    #[error("failed to allocate a bucket array of {length} slots")]
    Alloc {
        /// The number of slots that was requested.
        length: usize,
        #[source]
        source: TryReserveError,
    },

    /// Doubling the bucket array would exceed the largest supported length.
    #[error("cannot grow a bucket array of {length} slots any further")]
    CapacityOverflow {
        /// The length of the bucket array that could not be doubled.
        length: usize,
    },
}
