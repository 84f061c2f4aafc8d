use super::ConcurrentHash;
use crate::common::{
    constants::{DEFAULT_BUCKET_ARRAY_LENGTH, DEFAULT_LOAD_FACTOR, MAX_INITIAL_BUCKET_ARRAY_LENGTH},
    identity::Identity,
};

use std::{
    collections::hash_map::RandomState,
    hash::{BuildHasher, Hash},
    marker::PhantomData,
};

/// Builds a [`ConcurrentHash`] with various configuration knobs.
///
/// # Examples
///
/// ```rust
/// use ordered_cht::ConcurrentHashBuilder;
///
/// let hash = ConcurrentHashBuilder::new()
///     // Room for 1,000 entries before the first resize.
///     .initial_capacity(1_000)
///     // Grow when the table is half full.
///     .load_factor(0.5)
///     .name("symbols")
///     .build();
///
/// hash.insert(1, "one").unwrap();
///
/// assert!(hash.capacity() >= 2_000);
/// assert_eq!(hash.name(), Some("symbols"));
/// ```
///
pub struct ConcurrentHashBuilder<K, V> {
    initial_capacity: Option<usize>,
    load_factor: f64,
    compare_by_identity: bool,
    name: Option<String>,
    table_type: PhantomData<ConcurrentHash<K, V>>,
}

impl<K, V> Default for ConcurrentHashBuilder<K, V>
where
    K: Hash + Eq + Identity + 'static,
    V: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ConcurrentHashBuilder<K, V>
where
    K: Hash + Eq + Identity + 'static,
    V: 'static,
{
    /// Constructs a new `ConcurrentHashBuilder` with the default settings.
    pub fn new() -> Self {
        Self {
            initial_capacity: None,
            load_factor: DEFAULT_LOAD_FACTOR,
            compare_by_identity: false,
            name: None,
            table_type: PhantomData,
        }
    }

    /// Sets the number of entries the table can hold before it has to grow.
    ///
    /// The initial bucket array is capped at 2<sup>24</sup> buckets. A larger
    /// capacity is reached by growing, which reports a failed allocation as a
    /// [`ResizeError`](crate::ResizeError) instead of aborting.
    pub fn initial_capacity(self, number_of_entries: usize) -> Self {
        Self {
            initial_capacity: Some(number_of_entries),
            ..self
        }
    }

    /// Sets the ratio of entries to buckets above which the table grows.
    ///
    /// # Panics
    ///
    /// Panics if `load_factor` is not within `(0.0, 1.0]`.
    pub fn load_factor(self, load_factor: f64) -> Self {
        assert!(
            load_factor > 0.0 && load_factor <= 1.0,
            "load factor must be within (0.0, 1.0], got {load_factor}"
        );

        Self {
            load_factor,
            ..self
        }
    }

    /// Makes the table compare keys by their [`Identity`] from the start.
    pub fn compare_by_identity(self, enabled: bool) -> Self {
        Self {
            compare_by_identity: enabled,
            ..self
        }
    }

    /// Sets the name of the table. It is used as a prefix of the log messages
    /// when the `logging` feature is enabled.
    pub fn name(self, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..self
        }
    }

    /// Builds a `ConcurrentHash<K, V>`.
    pub fn build(self) -> ConcurrentHash<K, V, RandomState> {
        self.build_with_hasher(RandomState::default())
    }

    /// Builds a `ConcurrentHash<K, V, S>`, with the given `hasher`.
    pub fn build_with_hasher<S>(self, hasher: S) -> ConcurrentHash<K, V, S>
    where
        S: BuildHasher,
    {
        let length = bucket_array_length(self.initial_capacity, self.load_factor);

        ConcurrentHash::with_everything(
            length,
            self.load_factor,
            self.compare_by_identity,
            self.name,
            hasher,
        )
    }
}

/// The smallest power of two, and at least the default length, that holds
/// `capacity` entries under `load_factor`. Never above
/// `MAX_INITIAL_BUCKET_ARRAY_LENGTH`.
pub(crate) fn bucket_array_length(capacity: Option<usize>, load_factor: f64) -> usize {
    let wanted = capacity.map_or(0, |c| (c as f64 / load_factor).ceil() as usize);

    wanted
        .clamp(DEFAULT_BUCKET_ARRAY_LENGTH, MAX_INITIAL_BUCKET_ARRAY_LENGTH)
        .next_power_of_two()
}
