use crate::cht::{entry::Entry, sequence, slots::HashSlots};

use std::marker::PhantomData;

use crossbeam_epoch::Guard;

/// Iterator visiting all key-value pairs of a table in insertion order.
///
/// Call [`ConcurrentHash::iter`](./struct.ConcurrentHash.html#method.iter) to
/// obtain an `Iter`.
///
/// The iterator is weakly consistent. It never yields an entry twice or a
/// torn entry, it yields every entry that was present for the whole of the
/// iteration, and it may or may not yield entries inserted or removed while it
/// runs. It yields _clones_ of the keys and values.
///
/// An `Iter` keeps its thread pinned to the current epoch, so memory retired
/// by other threads is not reclaimed until it is dropped. Avoid keeping one
/// around for long.
pub struct Iter<'i, K, V> {
    guard: Guard,
    cursor: *const Entry<K, V>,
    _marker: PhantomData<&'i HashSlots<K, V>>,
}

impl<'i, K, V> Iter<'i, K, V> {
    pub(crate) fn new(slots: &'i HashSlots<K, V>) -> Self {
        let guard = crossbeam_epoch::pin();
        let cursor = slots.first_in_sequence(&guard).as_raw();

        Self {
            guard,
            cursor,
            _marker: PhantomData,
        }
    }
}

impl<'i, K, V> Iter<'i, K, V> {
    pub(crate) fn next_with<T>(&mut self, mut with_entry: impl FnMut(&K, &V) -> T) -> Option<T> {
        loop {
            // The cursor starts at the head sentinel and then only ever points
            // to entries reached while `guard` was pinned.
            let current = unsafe { &*self.cursor };
            let entry = sequence::next_live(&self.guard, current)?;
            self.cursor = entry;

            // The value is gone if a remover got to the entry in the meantime.
            if let (Some(key), Some(value)) = (entry.key(), entry.value(&self.guard)) {
                return Some(with_entry(key, value));
            }
        }
    }
}

impl<'i, K, V> Iterator for Iter<'i, K, V>
where
    K: Clone,
    V: Clone,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.next_with(|k, v| (k.clone(), v.clone()))
    }
}

/// Iterator visiting all keys of a table in insertion order.
///
/// Call [`ConcurrentHash::keys`](./struct.ConcurrentHash.html#method.keys) to
/// obtain a `Keys`.
pub struct Keys<'i, K, V> {
    inner: Iter<'i, K, V>,
}

impl<'i, K, V> Keys<'i, K, V> {
    pub(crate) fn new(inner: Iter<'i, K, V>) -> Self {
        Self { inner }
    }
}

impl<'i, K, V> Iterator for Keys<'i, K, V>
where
    K: Clone,
{
    type Item = K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next_with(|k, _| k.clone())
    }
}

/// Iterator visiting all values of a table in insertion order of their keys.
///
/// Call [`ConcurrentHash::values`](./struct.ConcurrentHash.html#method.values)
/// to obtain a `Values`.
pub struct Values<'i, K, V> {
    inner: Iter<'i, K, V>,
}

impl<'i, K, V> Values<'i, K, V> {
    pub(crate) fn new(inner: Iter<'i, K, V>) -> Self {
        Self { inner }
    }
}

impl<'i, K, V> Iterator for Values<'i, K, V>
where
    V: Clone,
{
    type Item = V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next_with(|_, v| v.clone())
    }
}
