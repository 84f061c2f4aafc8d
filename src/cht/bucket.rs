use super::entry::{Entry, REMOVED_TAG};
use crate::common::error::ResizeError;

use std::{ptr, sync::atomic::Ordering};

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};

pub(crate) struct BucketArray<K, V> {
    pub(crate) buckets: Box<[Atomic<Entry<K, V>>]>,
}

impl<K, V> BucketArray<K, V> {
    pub(crate) fn with_length(length: usize) -> Self {
        assert!(length.is_power_of_two());

        let buckets = (0..length).map(|_| Atomic::null()).collect();

        Self { buckets }
    }

    /// Like `with_length`, but reports an allocation failure instead of
    /// aborting.
    pub(crate) fn try_with_length(length: usize) -> Result<Self, ResizeError> {
        assert!(length.is_power_of_two());

        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(length)
            .map_err(|source| ResizeError::Alloc { length, source })?;
        buckets.resize_with(length, Atomic::null);

        Ok(Self {
            buckets: buckets.into_boxed_slice(),
        })
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    fn slot(&self, hash: u64) -> &Atomic<Entry<K, V>> {
        // `len()` is never 0 because 0 is not a power of two.
        &self.buckets[hash as usize & (self.buckets.len() - 1)]
    }
}

/// The outcome of a chain search done by a mutator.
pub(crate) struct ChainSearch<'g, K, V> {
    /// The chain head the successful pass started from. A new entry may be
    /// linked in front of it with a single CAS on the slot.
    pub(crate) head: Shared<'g, Entry<K, V>>,
    pub(crate) found: Option<Shared<'g, Entry<K, V>>>,
}

#[derive(Debug, Eq, PartialEq)]
pub(crate) struct RelocatedError;

impl<'g, K: 'g, V: 'g> BucketArray<K, V> {
    /// Lock-free lookup. Never writes.
    ///
    /// `is_stable` must return `false` once a migration has started re-threading
    /// chains; the walk is then abandoned with `RelocatedError` because it may
    /// have strayed into another chain.
    pub(crate) fn get(
        &self,
        guard: &'g Guard,
        hash: u64,
        mut eq: impl FnMut(&K) -> bool,
        is_stable: impl Fn() -> bool,
    ) -> Result<Option<Shared<'g, Entry<K, V>>>, RelocatedError> {
        let mut curr = self.slot(hash).load(Ordering::Acquire, guard);

        while let Some(curr_ref) = unsafe { curr.as_ref() } {
            let next = curr_ref.chain_next.load(Ordering::Acquire, guard);

            if !is_stable() {
                return Err(RelocatedError);
            }

            if next.tag() & REMOVED_TAG == 0
                && curr_ref.hash == hash
                && curr_ref.key().map_or(false, |k| eq(k))
            {
                return Ok(Some(curr));
            }

            curr = next.with_tag(0);
        }

        if is_stable() {
            Ok(None)
        } else {
            Err(RelocatedError)
        }
    }

    /// Searches the chain for a live entry, unlinking removed entries on the
    /// way.
    ///
    /// Callers must hold the shared side of the resize lock.
    pub(crate) fn find(
        &self,
        guard: &'g Guard,
        hash: u64,
        mut eq: impl FnMut(&K) -> bool,
    ) -> ChainSearch<'g, K, V> {
        let slot = self.slot(hash);

        'retry: loop {
            let mut head = slot.load(Ordering::Acquire, guard);
            let mut pred = slot;
            let mut curr = head;

            while let Some(curr_ref) = unsafe { curr.as_ref() } {
                let next = curr_ref.chain_next.load(Ordering::Acquire, guard);

                if next.tag() & REMOVED_TAG != 0 {
                    let next = next.with_tag(0);

                    if pred
                        .compare_exchange(curr, next, Ordering::AcqRel, Ordering::Acquire, guard)
                        .is_err()
                    {
                        continue 'retry;
                    }

                    if ptr::eq(pred, slot) {
                        head = next;
                    }
                    curr = next;
                    continue;
                }

                if curr_ref.hash == hash && curr_ref.key().map_or(false, |k| eq(k)) {
                    return ChainSearch {
                        head,
                        found: Some(curr),
                    };
                }

                pred = &curr_ref.chain_next;
                curr = next;
            }

            return ChainSearch { head, found: None };
        }
    }

    /// Links `entry` in front of `head`. On failure the entry is handed back so
    /// the caller can search again and retry.
    ///
    /// Callers must hold the shared side of the resize lock.
    pub(crate) fn try_link_head(
        &self,
        guard: &'g Guard,
        head: Shared<'g, Entry<K, V>>,
        entry: Owned<Entry<K, V>>,
    ) -> Result<Shared<'g, Entry<K, V>>, Owned<Entry<K, V>>> {
        let slot = self.slot(entry.hash);
        entry.chain_next.store(head, Ordering::Relaxed);

        slot.compare_exchange(head, entry, Ordering::AcqRel, Ordering::Relaxed, guard)
            .map_err(|e| e.new)
    }

    /// Physically unlinks a removed entry. Returns once `target` is no longer
    /// reachable from its slot.
    ///
    /// Callers must hold the shared side of the resize lock.
    pub(crate) fn unlink(&self, guard: &'g Guard, target: Shared<'g, Entry<K, V>>) {
        let target = target.with_tag(0);
        let target_ref = unsafe { target.deref() };
        debug_assert!(target_ref.is_removed(guard));

        let slot = self.slot(target_ref.hash);

        'retry: loop {
            let mut pred = slot;
            let mut curr = slot.load(Ordering::Acquire, guard);

            while let Some(curr_ref) = unsafe { curr.as_ref() } {
                let next = curr_ref.chain_next.load(Ordering::Acquire, guard);

                if next.tag() & REMOVED_TAG != 0 {
                    let next = next.with_tag(0);

                    if pred
                        .compare_exchange(curr, next, Ordering::AcqRel, Ordering::Acquire, guard)
                        .is_err()
                    {
                        continue 'retry;
                    }

                    if curr == target {
                        return;
                    }
                    curr = next;
                    continue;
                }

                pred = &curr_ref.chain_next;
                curr = next;
            }

            // Someone else unlinked it for us.
            return;
        }
    }

    /// Re-threads every live entry into `next` by its stored hash. Sequence
    /// links are not touched.
    ///
    /// Callers must hold the exclusive side of the resize lock, and lock-free
    /// readers must already be able to tell that a migration is running.
    pub(crate) fn migrate_into(&self, guard: &'g Guard, next: &BucketArray<K, V>) {
        for slot in self.buckets.iter() {
            let mut curr = slot.load(Ordering::Acquire, guard);

            while let Some(curr_ref) = unsafe { curr.as_ref() } {
                let following = curr_ref.chain_next.load(Ordering::Acquire, guard);

                // Removers finish unlinking before they release the shared
                // lock, so no removed entry should be left here.
                debug_assert_eq!(following.tag() & REMOVED_TAG, 0);

                if following.tag() & REMOVED_TAG == 0 {
                    let new_slot = next.slot(curr_ref.hash);
                    curr_ref
                        .chain_next
                        .store(new_slot.load(Ordering::Relaxed, guard), Ordering::Release);
                    new_slot.store(curr, Ordering::Release);
                }

                curr = following.with_tag(0);
            }
        }
    }

    /// Visits every entry that is not marked removed.
    ///
    /// Callers must keep migrations out, for instance by holding the shared
    /// side of the resize lock.
    pub(crate) fn for_each_live(&self, guard: &'g Guard, mut f: impl FnMut(&'g Entry<K, V>)) {
        for slot in self.buckets.iter() {
            let mut curr = slot.load(Ordering::Acquire, guard);

            while let Some(curr_ref) = unsafe { curr.as_ref() } {
                let next = curr_ref.chain_next.load(Ordering::Acquire, guard);

                if next.tag() & REMOVED_TAG == 0 {
                    f(curr_ref);
                }

                curr = next.with_tag(0);
            }
        }
    }
}
