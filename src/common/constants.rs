/// Bucket array length of a table built without an initial capacity.
pub(crate) const DEFAULT_BUCKET_ARRAY_LENGTH: usize = 8;

/// A resize is proposed once `len > buckets * load_factor`.
pub(crate) const DEFAULT_LOAD_FACTOR: f64 = 0.75;

/// Largest bucket array a table is created with. Larger initial capacities
/// are reached by growing, whose allocation failures are reported.
pub(crate) const MAX_INITIAL_BUCKET_ARRAY_LENGTH: usize = 1 << 24;

/// Largest bucket array a table grows to. Its size in bytes stays below
/// `isize::MAX`.
pub(crate) const MAX_BUCKET_ARRAY_LENGTH: usize =
    1 << (usize::BITS - 2 - std::mem::size_of::<usize>().trailing_zeros());
