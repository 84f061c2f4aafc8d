use super::{bucket::BucketArray, entry::Entry};

use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use crossbeam_utils::CachePadded;

/// The per-table attributes the table keeps on its host object.
///
/// Each attribute is its own atomic field, read and written with atomic
/// operations only.
pub(crate) struct HashSlots<K, V> {
    store: Atomic<BucketArray<K, V>>,
    size: CachePadded<AtomicIsize>,
    compare_by_identity: AtomicBool,
    first_in_sequence: Atomic<Entry<K, V>>,
    last_in_sequence: Atomic<Entry<K, V>>,
}

impl<K, V> HashSlots<K, V> {
    /// Installs `array` as the store and a fresh pair of sentinels linked to
    /// each other.
    pub(crate) fn initialize(array: BucketArray<K, V>, compare_by_identity: bool) -> Self {
        let guard = unsafe { crossbeam_epoch::unprotected() };

        let head = Owned::new(Entry::sentinel()).into_shared(guard);
        let tail = Owned::new(Entry::sentinel()).into_shared(guard);

        unsafe {
            head.deref().seq_next.store(tail, Ordering::Relaxed);
            tail.deref().seq_prev.store(head, Ordering::Relaxed);
        }

        Self {
            store: Atomic::new(array),
            size: CachePadded::new(AtomicIsize::new(0)),
            compare_by_identity: AtomicBool::new(compare_by_identity),
            first_in_sequence: Atomic::from(head),
            last_in_sequence: Atomic::from(tail),
        }
    }

    pub(crate) fn store<'g>(&self, guard: &'g Guard) -> &'g BucketArray<K, V> {
        // Never null between `initialize` and `drop`.
        unsafe { self.store.load(Ordering::Acquire, guard).deref() }
    }

    /// Publishes a new bucket array and returns the one it replaced. Only the
    /// resizer calls this, while holding the exclusive resize lock.
    pub(crate) fn set_store<'g>(
        &self,
        array: Owned<BucketArray<K, V>>,
        guard: &'g Guard,
    ) -> Shared<'g, BucketArray<K, V>> {
        self.store.swap(array, Ordering::AcqRel, guard)
    }

    /// The size counter is only approximate under concurrent mutation; this
    /// never reports a negative value.
    pub(crate) fn get_size(&self) -> usize {
        self.size.load(Ordering::Acquire).max(0) as usize
    }

    pub(crate) fn increment_and_get_size(&self) -> usize {
        (self.size.fetch_add(1, Ordering::AcqRel) + 1).max(0) as usize
    }

    pub(crate) fn decrement_size(&self) {
        self.size.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn is_compare_by_identity(&self) -> bool {
        self.compare_by_identity.load(Ordering::Acquire)
    }

    pub(crate) fn compare_and_set_compare_by_identity(&self, old: bool, new: bool) -> bool {
        self.compare_by_identity
            .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn first_in_sequence<'g>(&self, guard: &'g Guard) -> Shared<'g, Entry<K, V>> {
        self.first_in_sequence.load(Ordering::Acquire, guard)
    }

    pub(crate) fn last_in_sequence<'g>(&self, guard: &'g Guard) -> Shared<'g, Entry<K, V>> {
        self.last_in_sequence.load(Ordering::Acquire, guard)
    }
}

impl<K, V> Drop for HashSlots<K, V> {
    fn drop(&mut self) {
        let guard = unsafe { crossbeam_epoch::unprotected() };

        // Every entry, removed ones excepted, is still spliced into the
        // sequence, so walking it from the head frees the sentinels and all
        // live entries. Removed entries were already handed to the collector.
        let mut curr = self.first_in_sequence.load(Ordering::Relaxed, guard);

        while !curr.is_null() {
            let next = unsafe { curr.deref() }
                .seq_next
                .load(Ordering::Relaxed, guard)
                .with_tag(0);
            drop(unsafe { curr.into_owned() });
            curr = next;
        }

        let store = self.store.load(Ordering::Relaxed, guard);
        if !store.is_null() {
            drop(unsafe { store.into_owned() });
        }
    }
}
