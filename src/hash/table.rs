use super::{
    builder::bucket_array_length,
    iter::{Iter, Keys, Values},
    ConcurrentHashBuilder,
};
use crate::{
    cht::{
        bucket::{BucketArray, RelocatedError},
        entry::{defer_acquire_destroy, defer_destroy_entry, Entry, LINK_OWNED_TAG},
        resize::ResizeCoordinator,
        sequence,
        slots::HashSlots,
    },
    common::{
        constants::DEFAULT_LOAD_FACTOR,
        error::ResizeError,
        hash_key,
        identity::{is_identical, Identity},
    },
    reachability::{Accumulator, Traceable},
};

use std::{
    borrow::Borrow,
    collections::hash_map::RandomState,
    fmt,
    hash::{BuildHasher, Hash},
    sync::atomic::Ordering,
};

use crossbeam_epoch::{Guard, Owned, Shared};

/// A concurrent hash table that iterates in insertion order.
///
/// Lookups are lock-free. Insertions and removals are lock-free with respect
/// to each other and only wait for the rare resize, which migrates the table
/// into a larger bucket array while holding an exclusive lock.
///
/// Keys are compared by [`Eq`] by default. A table can be switched to compare
/// them by [`Identity`] instead, as long as it is still empty.
///
/// Lookups return _clones_ of the stored values, as references could not
/// outlive the epoch guard protecting them. Use the `*_and` variants to look at
/// a value in place.
///
/// # Examples
///
/// ```rust
/// use ordered_cht::ConcurrentHash;
///
/// use std::{sync::Arc, thread};
///
/// let hash = Arc::new(ConcurrentHash::new());
///
/// let handles: Vec<_> = (0..4u64)
///     .map(|t| {
///         let hash = Arc::clone(&hash);
///         thread::spawn(move || {
///             for i in 0..100 {
///                 hash.insert(t * 100 + i, i).unwrap();
///             }
///         })
///     })
///     .collect();
///
/// for handle in handles {
///     handle.join().unwrap();
/// }
///
/// assert_eq!(hash.len(), 400);
/// assert_eq!(hash.get(&250), Some(50));
/// ```
///
/// Removed entries are reclaimed once no thread can still be looking at them,
/// which may be after the table itself is gone. Keys and values therefore have
/// to be `'static`, and a table of borrowed values does not compile:
///
/// ```compile_fail
/// use ordered_cht::ConcurrentHash;
///
/// let borrowed = vec![7u8; 64];
/// let hash = ConcurrentHash::new();
/// hash.insert(1u32, &borrowed[..]).unwrap();
/// ```
pub struct ConcurrentHash<K, V, S = RandomState> {
    slots: HashSlots<K, V>,
    resize: ResizeCoordinator,
    build_hasher: S,
}

impl<K, V> ConcurrentHash<K, V, RandomState>
where
    K: Hash + Eq + Identity + 'static,
    V: 'static,
{
    /// Creates an empty table with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity_and_hasher(0, RandomState::default())
    }

    /// Creates an empty table that can hold at least `capacity` entries before
    /// it has to grow.
    ///
    /// The initial bucket array is capped at 2<sup>24</sup> buckets. A larger
    /// `capacity` is reached by growing, which reports a failed allocation as
    /// a [`ResizeError`] instead of aborting.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, RandomState::default())
    }

    /// Returns a [`ConcurrentHashBuilder`], which can build a table with
    /// various configurations.
    pub fn builder() -> ConcurrentHashBuilder<K, V> {
        ConcurrentHashBuilder::new()
    }
}

impl<K, V, S> ConcurrentHash<K, V, S>
where
    K: Hash + Eq + Identity + 'static,
    V: 'static,
    S: BuildHasher,
{
    /// Creates an empty table that hashes keys with `build_hasher`.
    pub fn with_hasher(build_hasher: S) -> Self {
        Self::with_capacity_and_hasher(0, build_hasher)
    }

    /// Creates an empty table that can hold at least `capacity` entries before
    /// it has to grow, and hashes keys with `build_hasher`.
    ///
    /// See [`with_capacity`](#method.with_capacity) for the cap on the initial
    /// bucket array.
    pub fn with_capacity_and_hasher(capacity: usize, build_hasher: S) -> Self {
        let length = bucket_array_length(Some(capacity), DEFAULT_LOAD_FACTOR);

        Self::with_everything(length, DEFAULT_LOAD_FACTOR, false, None, build_hasher)
    }

    pub(crate) fn with_everything(
        bucket_array_length: usize,
        load_factor: f64,
        compare_by_identity: bool,
        name: Option<String>,
        build_hasher: S,
    ) -> Self {
        Self {
            slots: HashSlots::initialize(
                BucketArray::with_length(bucket_array_length),
                compare_by_identity,
            ),
            resize: ResizeCoordinator::new(load_factor, name),
            build_hasher,
        }
    }
}

impl<K, V, S> ConcurrentHash<K, V, S> {
    /// Returns the number of entries in the table.
    ///
    /// The count is maintained with atomic increments and decrements, so it
    /// may be slightly off while other threads are inserting or removing, but
    /// it is never negative and it is exact once they are done.
    pub fn len(&self) -> usize {
        self.slots.get_size()
    }

    /// Returns `true` if the table holds no entries. The same caveats as for
    /// [`len`](#method.len) apply.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of buckets of the current bucket array.
    pub fn capacity(&self) -> usize {
        let guard = &crossbeam_epoch::pin();

        self.slots.store(guard).len()
    }

    /// Returns the name of the table, if one was given to the builder.
    pub fn name(&self) -> Option<&str> {
        self.resize.name()
    }

    /// Returns a reference to the table's [`BuildHasher`].
    pub fn hasher(&self) -> &S {
        &self.build_hasher
    }

    /// Returns `true` if keys are compared by [`Identity`].
    pub fn is_compare_by_identity(&self) -> bool {
        self.slots.is_compare_by_identity()
    }

    /// Switches the comparison mode from `expected` to `new` in one atomic step.
    /// Returns `false`, without changing anything, if the current mode is not
    /// `expected`.
    ///
    /// Only switch the mode of an empty table. Entries inserted under the
    /// other mode are hashed differently and cannot be found afterwards.
    pub fn compare_and_set_compare_by_identity(&self, expected: bool, new: bool) -> bool {
        self.slots.compare_and_set_compare_by_identity(expected, new)
    }

    /// Makes the table compare keys by [`Identity`]. Returns `true` if this call
    /// switched the mode.
    ///
    /// See [`compare_and_set_compare_by_identity`](#method.compare_and_set_compare_by_identity)
    /// for the emptiness requirement.
    pub fn compare_by_identity(&self) -> bool {
        #[cfg(feature = "logging")]
        if !self.is_empty() {
            log::warn!(
                "{}Switching a table with {} entries to compare by identity",
                self.name().map(|name| format!("[{name}] ")).unwrap_or_default(),
                self.len()
            );
        }

        self.compare_and_set_compare_by_identity(false, true)
    }

    /// Creates an iterator visiting all key-value pairs in insertion order.
    /// The iterator element type is `(K, V)`, where both are clones.
    ///
    /// See [`Iter`] for the consistency guarantees.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter::new(&self.slots)
    }

    /// Creates an iterator visiting all keys in insertion order.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys::new(self.iter())
    }

    /// Creates an iterator visiting all values in insertion order of their
    /// keys.
    pub fn values(&self) -> Values<'_, K, V> {
        Values::new(self.iter())
    }

    /// Returns a clone of the first entry in insertion order.
    pub fn first(&self) -> Option<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        self.iter().next()
    }

    /// Returns a clone of the last entry in insertion order.
    pub fn last(&self) -> Option<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let guard = &crossbeam_epoch::pin();
        let tail = unsafe { self.slots.last_in_sequence(guard).deref() };

        let mut curr = sequence::prev_live(guard, tail);
        while let Some(entry) = curr {
            if let (Some(key), Some(value)) = (entry.key(), entry.value(guard)) {
                return Some((key.clone(), value.clone()));
            }
            curr = sequence::prev_live(guard, entry);
        }

        None
    }

    /// Reports every key and value that refers to a heap object to
    /// `accumulator`.
    ///
    /// This is the hook for a tracing garbage collector. It may run while
    /// other threads insert and remove; it then reports a superset of what is
    /// reachable once they are done, and never looks at reclaimed memory.
    /// Resizing waits until it returns.
    ///
    /// The accumulator must not call back into this table to insert or
    /// remove.
    pub fn export_reachable<O, A>(&self, accumulator: &mut A)
    where
        K: Traceable<O>,
        V: Traceable<O>,
        A: Accumulator<O> + ?Sized,
    {
        let guard = &crossbeam_epoch::pin();
        let _shared = self.resize.read();

        self.slots.store(guard).for_each_live(guard, |entry| {
            if let Some(object) = entry.key().and_then(|k| k.heap_object()) {
                accumulator.accept(object);
            }
            if let Some(object) = entry.value(guard).and_then(|v| v.heap_object()) {
                accumulator.accept(object);
            }
        });
    }
}

impl<K, V, S> ConcurrentHash<K, V, S>
where
    K: Hash + Eq + Identity + 'static,
    V: 'static,
    S: BuildHasher,
{
    /// Returns a _clone_ of the value corresponding to the key.
    ///
    /// If you want to get a reference to the value instead of a clone, use
    /// [`get_and`](#method.get_and).
    ///
    /// `Q` may be any borrowed form of the key type, but [`Hash`], [`Eq`] and
    /// [`Identity`] on the borrowed form *must* match those for the key type.
    #[inline]
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Identity + ?Sized,
        V: Clone,
    {
        self.get_key_value_and(key, |_, v| v.clone())
    }

    /// Returns the result of invoking a function with a reference to the value
    /// corresponding to the key.
    #[inline]
    pub fn get_and<Q, F, T>(&self, key: &Q, with_value: F) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Identity + ?Sized,
        F: FnOnce(&V) -> T,
    {
        self.get_key_value_and(key, move |_, v| with_value(v))
    }

    /// Returns the result of invoking a function with a reference to the
    /// key-value pair corresponding to the supplied key.
    ///
    /// Never blocks and never writes to the table.
    pub fn get_key_value_and<Q, F, T>(&self, key: &Q, with_entry: F) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Identity + ?Sized,
        F: FnOnce(&K, &V) -> T,
    {
        let guard = &crossbeam_epoch::pin();

        let by_identity = self.slots.is_compare_by_identity();
        let hash = hash_key(&self.build_hasher, key, by_identity);
        let eq = |k: &K| key_matches(Borrow::<Q>::borrow(k), key, by_identity);

        let entry = loop {
            let stamp = self.resize.stamp();

            // The chains are being re-threaded. The sequence is not.
            if ResizeCoordinator::is_migrating(stamp) {
                let head = unsafe { self.slots.first_in_sequence(guard).deref() };
                break sequence::find(guard, head, hash, eq);
            }

            match self
                .slots
                .store(guard)
                .get(guard, hash, eq, || self.resize.validate(stamp))
            {
                Ok(found) => break found.map(|p| unsafe { p.deref() }),
                Err(RelocatedError) => continue,
            }
        }?;

        Some(with_entry(entry.key()?, entry.value(guard)?))
    }

    /// Returns `true` if the table contains a value for the key.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Identity + ?Sized,
    {
        self.get_key_value_and(key, |_, _| ()).is_some()
    }

    /// Inserts a key-value pair, returning a _clone_ of the value previously
    /// corresponding to the key.
    ///
    /// A new key is appended to the insertion order. Replacing the value of an
    /// existing key keeps its position, and the key already in the table is
    /// kept.
    ///
    /// # Errors
    ///
    /// Returns [`ResizeError`] if the insertion made the table exceed its load
    /// factor and the table could not grow. The entry has been inserted all
    /// the same, and the table keeps working with its current bucket array.
    #[inline]
    pub fn insert(&self, key: K, value: V) -> Result<Option<V>, ResizeError>
    where
        V: Clone,
    {
        self.insert_and(key, value, V::clone)
    }

    /// Inserts a key-value pair, returning the result of invoking a function
    /// with a reference to the value previously corresponding to the key.
    ///
    /// See [`insert`](#method.insert) for the error case.
    pub fn insert_and<F, T>(
        &self,
        key: K,
        value: V,
        with_previous_value: F,
    ) -> Result<Option<T>, ResizeError>
    where
        F: FnOnce(&V) -> T,
    {
        let guard = &crossbeam_epoch::pin();

        match self.insert_shared(guard, key, value, with_previous_value) {
            Inserted::Replaced(result) => Ok(Some(result)),
            Inserted::New { size } => {
                if self.resize.needs_resize(size, self.slots.store(guard).len()) {
                    self.resize.try_grow(&self.slots, guard)?;
                }
                Ok(None)
            }
        }
    }

    /// Removes a key from the table, returning a _clone_ of the value
    /// previously corresponding to the key.
    #[inline]
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Identity + ?Sized,
        V: Clone,
    {
        self.remove_entry_and(key, |_, v| v.clone())
    }

    /// Removes a key from the table, returning the result of invoking a
    /// function with a reference to the value previously corresponding to the
    /// key.
    #[inline]
    pub fn remove_and<Q, F, T>(&self, key: &Q, with_previous_value: F) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Identity + ?Sized,
        F: FnOnce(&V) -> T,
    {
        self.remove_entry_and(key, move |_, v| with_previous_value(v))
    }

    /// Removes a key from the table, returning the result of invoking a
    /// function with a reference to the key-value pair previously
    /// corresponding to the key.
    pub fn remove_entry_and<Q, F, T>(&self, key: &Q, with_previous_entry: F) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Identity + ?Sized,
        F: FnOnce(&K, &V) -> T,
    {
        let guard = &crossbeam_epoch::pin();
        let _shared = self.resize.read();

        let by_identity = self.slots.is_compare_by_identity();
        let hash = hash_key(&self.build_hasher, key, by_identity);
        let eq = |k: &K| key_matches(Borrow::<Q>::borrow(k), key, by_identity);
        let buckets = self.slots.store(guard);

        loop {
            let found = buckets.find(guard, hash, eq).found?;

            if unsafe { found.deref() }.try_mark_removed(guard) {
                return self.retire(guard, buckets, found, with_previous_entry);
            }

            // Another thread is removing it. The next search unlinks it or
            // finds a newer entry for the same key.
        }
    }

    /// Removes the first entry in insertion order and returns clones of its
    /// key and value.
    pub fn shift(&self) -> Option<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        self.shift_and(|k, v| (k.clone(), v.clone()))
    }

    /// Removes the first entry in insertion order, returning the result of
    /// invoking a function with a reference to its key and value.
    pub fn shift_and<F, T>(&self, with_entry: F) -> Option<T>
    where
        F: FnOnce(&K, &V) -> T,
    {
        let guard = &crossbeam_epoch::pin();
        let _shared = self.resize.read();

        let buckets = self.slots.store(guard);
        let head = unsafe { self.slots.first_in_sequence(guard).deref() };

        loop {
            let entry = sequence::next_live(guard, head)?;

            if entry.try_mark_removed(guard) {
                let entry = Shared::from(entry as *const Entry<K, V>);
                return self.retire(guard, buckets, entry, with_entry);
            }
        }
    }

    /// Removes all entries.
    ///
    /// Entries inserted while this runs may survive it.
    pub fn clear(&self) {
        let guard = &crossbeam_epoch::pin();
        let _shared = self.resize.read();

        let buckets = self.slots.store(guard);
        let head = unsafe { self.slots.first_in_sequence(guard).deref() };

        let mut curr = sequence::next_live(guard, head);
        while let Some(entry) = curr {
            if entry.try_mark_removed(guard) {
                let entry = Shared::from(entry as *const Entry<K, V>);
                self.retire(guard, buckets, entry, |_, _| ());
            }
            // A removed entry still leads forward.
            curr = sequence::next_live(guard, entry);
        }
    }

    /// Links a new entry, or replaces the value of an existing one, while
    /// holding the shared side of the resize lock.
    fn insert_shared<F, T>(
        &self,
        guard: &Guard,
        key: K,
        value: V,
        with_previous_value: F,
    ) -> Inserted<T>
    where
        F: FnOnce(&V) -> T,
    {
        let _shared = self.resize.read();

        let by_identity = self.slots.is_compare_by_identity();
        let hash = hash_key(&self.build_hasher, &key, by_identity);
        let buckets = self.slots.store(guard);
        let tail = self.slots.last_in_sequence(guard);

        let mut state = InsertState::New(key, Owned::new(value));

        loop {
            let search = {
                let key = state.key();
                buckets.find(guard, hash, |k: &K| key_matches(k, key, by_identity))
            };

            if let Some(found) = search.found {
                let (key, value) = state.into_key_value();

                match unsafe { found.deref() }.replace_value(value, guard) {
                    Ok(previous) => {
                        let result = with_previous_value(unsafe { previous.deref() });
                        unsafe { defer_acquire_destroy(guard, previous) };
                        return Inserted::Replaced(result);
                    }
                    // Removed after we found it.
                    Err(value) => {
                        state = InsertState::New(key, value);
                        continue;
                    }
                }
            }

            match buckets.try_link_head(guard, search.head, state.into_entry(hash, tail)) {
                Ok(linked) => {
                    sequence::append(guard, tail, linked);
                    let size = self.slots.increment_and_get_size();
                    return Inserted::New { size };
                }
                Err(entry) => state = InsertState::AttemptedInsertion(entry),
            }
        }
    }

    /// Unlinks an entry this thread has marked removed and retires it.
    ///
    /// Must be called with the shared side of the resize lock held.
    fn retire<'g, F, T>(
        &self,
        guard: &'g Guard,
        buckets: &BucketArray<K, V>,
        entry: Shared<'g, Entry<K, V>>,
        with_entry: F,
    ) -> Option<T>
    where
        F: FnOnce(&K, &V) -> T,
    {
        buckets.unlink(guard, entry);
        sequence::unlink(guard, entry);
        self.slots.decrement_size();

        let entry_ref = unsafe { entry.deref() };
        let value = entry_ref.take_value(guard);
        let result = match (entry_ref.key(), unsafe { value.as_ref() }) {
            (Some(key), Some(value)) => Some(with_entry(key, value)),
            _ => None,
        };

        unsafe {
            if !value.is_null() {
                defer_acquire_destroy(guard, value);
            }
            defer_destroy_entry(guard, entry);
        }

        result
    }
}

#[inline]
fn key_matches<Q>(candidate: &Q, key: &Q, by_identity: bool) -> bool
where
    Q: Eq + Identity + ?Sized,
{
    if by_identity {
        is_identical(candidate, key)
    } else {
        candidate == key
    }
}

enum Inserted<T> {
    New { size: usize },
    Replaced(T),
}

enum InsertState<K, V> {
    New(K, Owned<V>),
    AttemptedInsertion(Owned<Entry<K, V>>),
}

impl<K, V> InsertState<K, V> {
    fn key(&self) -> &K {
        match self {
            Self::New(k, _) => k,
            Self::AttemptedInsertion(e) => match e.key() {
                Some(k) => k,
                None => unreachable!(),
            },
        }
    }

    fn into_key_value(self) -> (K, Owned<V>) {
        match self {
            Self::New(k, v) => (k, v),
            Self::AttemptedInsertion(e) => match e.into_box().into_key_value() {
                Some(key_value) => key_value,
                None => unreachable!(),
            },
        }
    }

    fn into_entry(self, hash: u64, tail: Shared<'_, Entry<K, V>>) -> Owned<Entry<K, V>> {
        match self {
            Self::New(k, v) => {
                let entry = Owned::new(Entry::with_owned_value(hash, k, v));
                // Readers reaching the entry before its splice is complete stop
                // at the tail.
                entry
                    .seq_next
                    .store(tail.with_tag(LINK_OWNED_TAG), Ordering::Relaxed);
                entry
            }
            Self::AttemptedInsertion(e) => e,
        }
    }
}

impl<K, V, S> Default for ConcurrentHash<K, V, S>
where
    K: Hash + Eq + Identity + 'static,
    V: 'static,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> fmt::Debug for ConcurrentHash<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d_map = f.debug_map();
        let mut iter = self.iter();

        while iter
            .next_with(|k, v| {
                d_map.entry(k, v);
            })
            .is_some()
        {}

        d_map.finish()
    }
}

impl<K, V, S> Extend<(K, V)> for ConcurrentHash<K, V, S>
where
    K: Hash + Eq + Identity + 'static,
    V: 'static,
    S: BuildHasher,
{
    /// Inserts every pair. A failed resize is not fatal here: the pair is
    /// inserted regardless and the table keeps its current bucket array.
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            if let Err(_error) = self.insert_and(key, value, |_| ()) {
                #[cfg(feature = "logging")]
                log::warn!(
                    "{}Continuing to extend without growing: {_error}",
                    self.name().map(|name| format!("[{name}] ")).unwrap_or_default()
                );
            }
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for ConcurrentHash<K, V, S>
where
    K: Hash + Eq + Identity + 'static,
    V: 'static,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();

        let mut table = Self::with_capacity_and_hasher(lower, S::default());
        table.extend(iter);

        table
    }
}

#[cfg(test)]
impl<K, V, S> ConcurrentHash<K, V, S> {
    /// Checks that the chains and the sequence agree. Only meaningful once all
    /// mutators are done.
    pub(crate) fn assert_consistent(&self) {
        let guard = &crossbeam_epoch::pin();
        let _shared = self.resize.read();

        let mut in_chains = 0;
        self.slots.store(guard).for_each_live(guard, |_| in_chains += 1);

        let mut in_sequence = 0;
        let mut prev = self.slots.first_in_sequence(guard);
        let mut curr = unsafe { prev.deref() }.seq_next.load(Ordering::Acquire, guard);

        loop {
            assert_eq!(curr.tag(), 0, "a sequence link was left owned");
            let curr_ref = unsafe { curr.deref() };
            assert_eq!(curr_ref.seq_prev.load(Ordering::Acquire, guard), prev);

            if curr_ref.is_sentinel() {
                assert_eq!(curr, self.slots.last_in_sequence(guard));
                break;
            }

            assert!(!curr_ref.is_removed(guard));
            in_sequence += 1;

            prev = curr;
            curr = curr_ref.seq_next.load(Ordering::Acquire, guard);
        }

        assert_eq!(in_chains, in_sequence);
        assert_eq!(self.len(), in_sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::ConcurrentHash;
    use crate::{ConcurrentHashBuilder, ResizeError};

    use std::{
        collections::HashSet,
        sync::{Arc, Barrier},
    };

    crate::write_test_cases_for_me!(ConcurrentHash);

    mod compare_by_identity {
        use super::ConcurrentHash;
        use crate::{common::identity::Identity, ConcurrentHashBuilder};

        use std::{hash::Hash, sync::Arc};

        struct IdentityHash;

        impl IdentityHash {
            fn new<K: Hash + Eq + Identity + 'static, V: 'static>() -> ConcurrentHash<K, V> {
                ConcurrentHashBuilder::new().compare_by_identity(true).build()
            }

            fn with_capacity<K, V>(capacity: usize) -> ConcurrentHash<K, V>
            where
                K: Hash + Eq + Identity + 'static,
                V: 'static,
            {
                ConcurrentHashBuilder::new()
                    .initial_capacity(capacity)
                    .compare_by_identity(true)
                    .build()
            }
        }

        crate::write_test_cases_for_me!(IdentityHash);

        #[test]
        fn equal_strings_are_distinct_keys() {
            let hash = ConcurrentHash::new();
            assert!(hash.compare_by_identity());
            assert!(hash.is_compare_by_identity());

            let a = String::from("key");
            let b = String::from("key");

            assert_eq!(hash.insert(a, 1), Ok(None));
            assert_eq!(hash.get(&b), None);
            assert!(!hash.contains_key("key"));

            assert_eq!(hash.insert(b, 2), Ok(None));
            assert_eq!(hash.len(), 2);

            assert_eq!(hash.values().collect::<Vec<_>>(), vec![1, 2]);
            assert_eq!(hash.keys().collect::<Vec<_>>(), vec!["key", "key"]);
        }

        #[test]
        fn empty_strings_are_distinct_keys() {
            let hash = ConcurrentHashBuilder::new().compare_by_identity(true).build();

            assert_eq!(hash.insert(String::new(), 0), Ok(None));
            assert_eq!(hash.insert(String::new(), 1), Ok(None));
            assert_eq!(hash.len(), 2);
            assert_eq!(hash.get(""), None);

            assert_eq!(hash.shift(), Some((String::new(), 0)));
            assert_eq!(hash.shift(), Some((String::new(), 1)));
            assert!(hash.is_empty());
        }

        #[test]
        fn wide_integer_keys_stay_apart() {
            let hash = IdentityHash::new();

            assert_eq!(hash.insert(1u64, "low"), Ok(None));
            assert_eq!(hash.insert((1u64 << 32) + 1, "high"), Ok(None));
            assert_eq!(hash.len(), 2);
            assert_eq!(hash.get(&1), Some("low"));
            assert_eq!(hash.get(&((1 << 32) + 1)), Some("high"));
        }

        #[test]
        fn shared_keys_are_found_by_address() {
            let hash = ConcurrentHashBuilder::new().compare_by_identity(true).build();

            let a: Arc<str> = Arc::from("key");
            let b: Arc<str> = Arc::from("key");

            assert_eq!(hash.insert(Arc::clone(&a), 1), Ok(None));
            assert_eq!(hash.insert(Arc::clone(&b), 2), Ok(None));
            assert_eq!(hash.len(), 2);

            assert_eq!(hash.get(&a), Some(1));
            assert_eq!(hash.get(&b), Some(2));
            assert_eq!(hash.insert(Arc::clone(&a), 3), Ok(Some(1)));
            assert_eq!(hash.len(), 2);
        }
    }

    #[test]
    fn three_keys_scenario() {
        let hash = ConcurrentHashBuilder::new().initial_capacity(6).build();
        assert_eq!(hash.capacity(), 8);
        assert!(!hash.is_compare_by_identity());

        assert_eq!(hash.insert("a", 1), Ok(None));
        assert_eq!(hash.insert("b", 2), Ok(None));
        assert_eq!(hash.insert("c", 3), Ok(None));
        assert_eq!(hash.first(), Some(("a", 1)));

        assert_eq!(hash.remove("b"), Some(2));
        assert_eq!(hash.keys().collect::<Vec<_>>(), vec!["a", "c"]);
        assert_eq!(hash.get("b"), None);
        assert_eq!(hash.len(), 2);

        hash.assert_consistent();
    }

    #[test]
    fn last_write_wins() {
        let hash = ConcurrentHash::new();

        assert_eq!(hash.insert("k", 1), Ok(None));
        assert_eq!(hash.insert("k", 2), Ok(Some(1)));

        assert_eq!(hash.len(), 1);
        assert_eq!(hash.get("k"), Some(2));
        assert_eq!(hash.iter().collect::<Vec<_>>(), vec![("k", 2)]);
    }

    #[test]
    fn resize_keeps_order() {
        let hash = ConcurrentHashBuilder::new().load_factor(1.0).build();
        let initial_capacity = hash.capacity();

        let keys: Vec<u64> = (0..1000).map(|i| (i * 7919) % 1000).collect();
        for &k in &keys {
            assert_eq!(hash.insert(k, k * 2), Ok(None));
        }

        assert!(hash.capacity() >= 1000);
        assert!(hash.capacity() > initial_capacity);
        assert_eq!(hash.keys().collect::<Vec<_>>(), keys);
        for &k in &keys {
            assert_eq!(hash.get(&k), Some(k * 2));
        }

        hash.assert_consistent();
    }

    #[test]
    fn failed_resize_is_reported_after_inserting() {
        let mut hash = ConcurrentHashBuilder::new().load_factor(1.0).build();
        hash.resize.set_max_length(8);

        for i in 0..8 {
            assert_eq!(hash.insert(i, i), Ok(None));
        }
        assert_eq!(hash.capacity(), 8);

        assert_eq!(
            hash.insert(8, 8),
            Err(ResizeError::CapacityOverflow { length: 8 })
        );
        // Inserted all the same.
        assert_eq!(hash.get(&8), Some(8));
        assert_eq!(hash.len(), 9);
        assert_eq!(hash.capacity(), 8);

        // Replacing a value never resizes.
        assert_eq!(hash.insert(8, 80), Ok(Some(8)));

        hash.extend((9..20).map(|i| (i, i)));
        assert_eq!(hash.len(), 20);
        assert_eq!(hash.capacity(), 8);
        assert_eq!(hash.keys().collect::<Vec<_>>(), (0..20).collect::<Vec<_>>());
        assert_eq!(hash.remove(&8), Some(80));

        hash.assert_consistent();
    }

    #[test]
    fn shift_first_last_and_clear() {
        let hash = ConcurrentHash::new();
        assert_eq!(hash.shift(), None);
        assert_eq!(hash.first(), None);
        assert_eq!(hash.last(), None);

        for i in 0..10 {
            hash.insert(i, i.to_string()).unwrap();
        }

        assert_eq!(hash.first(), Some((0, "0".to_string())));
        assert_eq!(hash.last(), Some((9, "9".to_string())));

        assert_eq!(hash.shift(), Some((0, "0".to_string())));
        assert_eq!(hash.shift_and(|k, v| (*k, v.len())), Some((1, 1)));
        assert_eq!(hash.first(), Some((2, "2".to_string())));
        assert_eq!(hash.len(), 8);

        assert_eq!(hash.remove(&9), Some("9".to_string()));
        assert_eq!(hash.last(), Some((8, "8".to_string())));

        hash.clear();
        assert!(hash.is_empty());
        assert_eq!(hash.iter().count(), 0);
        assert_eq!(hash.get(&5), None);

        hash.insert(42, "42".to_string()).unwrap();
        assert_eq!(hash.first(), hash.last());

        hash.assert_consistent();
    }

    #[test]
    fn contains_key_and_borrowed_lookups() {
        let hash = ConcurrentHash::new();
        hash.insert(String::from("alpha"), 1).unwrap();

        assert!(hash.contains_key("alpha"));
        assert!(!hash.contains_key("beta"));
        assert_eq!(hash.get_and("alpha", |v| v + 1), Some(2));
        assert_eq!(
            hash.get_key_value_and("alpha", |k, v| format!("{k}={v}")),
            Some("alpha=1".to_string())
        );
        assert_eq!(hash.remove_and("alpha", |v| *v), Some(1));
        assert!(!hash.contains_key("alpha"));
    }

    #[test]
    fn identity_mode_is_compare_and_set() {
        let hash = ConcurrentHash::<u32, u32>::new();

        assert!(!hash.compare_and_set_compare_by_identity(true, false));
        assert!(hash.compare_and_set_compare_by_identity(false, true));
        assert!(!hash.compare_by_identity());
        assert!(hash.compare_and_set_compare_by_identity(true, false));
        assert!(!hash.is_compare_by_identity());
    }

    #[test]
    fn debug_format_follows_insertion_order() {
        let hash = ConcurrentHash::new();
        hash.insert("z", 1).unwrap();
        hash.insert("a", 2).unwrap();

        assert_eq!(format!("{hash:?}"), r#"{"z": 1, "a": 2}"#);
    }

    #[test]
    fn collect_and_extend() {
        let mut hash: ConcurrentHash<_, _> = (0..5).map(|i| (i, i * i)).collect();
        hash.extend(vec![(5, 25), (0, 100)]);

        assert_eq!(hash.len(), 6);
        assert_eq!(
            hash.iter().collect::<Vec<_>>(),
            vec![(0, 100), (1, 1), (2, 4), (3, 9), (4, 16), (5, 25)]
        );
    }

    #[test]
    fn export_sees_keys_and_values() {
        let hash = ConcurrentHash::new();

        let values: Vec<_> = (0..4).map(Arc::new).collect();
        for (i, v) in values.iter().enumerate() {
            hash.insert(i, Arc::clone(v)).unwrap();
        }
        hash.remove(&2);

        let mut reachable: Vec<Arc<i32>> = Vec::new();
        hash.export_reachable(&mut reachable);

        assert_eq!(reachable.len(), 3);
        for v in [&values[0], &values[1], &values[3]] {
            assert!(reachable.iter().any(|r| Arc::ptr_eq(r, v)));
        }
    }

    #[test]
    fn export_during_mutation() {
        const NUM_MUTATORS: usize = 4;
        const ROUNDS: usize = 2_000;

        let hash = Arc::new(ConcurrentHash::<usize, Arc<usize>>::new());
        let barrier = Arc::new(Barrier::new(NUM_MUTATORS + 1));

        let mutators: Vec<_> = (0..NUM_MUTATORS)
            .map(|t| {
                let hash = Arc::clone(&hash);
                let barrier = Arc::clone(&barrier);

                std::thread::spawn(move || {
                    barrier.wait();

                    for i in 0..ROUNDS {
                        let key = t * ROUNDS + i;
                        hash.insert(key, Arc::new(key)).unwrap();
                        if i % 3 == 0 {
                            assert_eq!(hash.remove(&key).as_deref(), Some(&key));
                        }
                    }
                })
            })
            .collect();

        barrier.wait();

        for _ in 0..50 {
            let mut reachable: Vec<Arc<usize>> = Vec::new();
            hash.export_reachable(&mut reachable);
            for value in reachable {
                // Only values are heap objects here, and each one is its key.
                assert!(*value < NUM_MUTATORS * ROUNDS);
            }
        }

        for mutator in mutators {
            mutator.join().unwrap();
        }

        let mut reachable: HashSet<Arc<usize>> = HashSet::new();
        hash.export_reachable(&mut reachable);
        assert_eq!(reachable.len(), hash.len());

        hash.assert_consistent();
        crate::cht::test_util::run_deferred();
    }

    #[test]
    fn iterators_survive_concurrent_removal() {
        let hash = ConcurrentHash::new();
        for i in 0..100 {
            hash.insert(i, i).unwrap();
        }

        let mut iter = hash.keys();
        assert_eq!(iter.next(), Some(0));
        assert_eq!(iter.next(), Some(1));

        // Remove the entry the iterator stands on and its successor.
        assert_eq!(hash.remove(&1), Some(1));
        assert_eq!(hash.remove(&2), Some(2));

        assert_eq!(iter.next(), Some(3));
        assert_eq!(iter.count(), 96);
    }
}
