use super::{
    bucket::BucketArray,
    entry::defer_acquire_destroy,
    slots::HashSlots,
};
use crate::common::{constants::MAX_BUCKET_ARRAY_LENGTH, error::ResizeError};

use std::sync::atomic::{self, AtomicBool, AtomicUsize, Ordering};

use crossbeam_epoch::{Guard, Owned};
use crossbeam_utils::CachePadded;
use parking_lot::{RwLock, RwLockReadGuard};

/// Serializes capacity changes.
///
/// Mutators hold the shared side of `lock` for the whole of their operation.
/// The resizer holds the exclusive side while it re-threads the chains, so it
/// never races with a mutator. Lock-free readers are kept honest by `stamp`,
/// which is odd while a migration is running.
pub(crate) struct ResizeCoordinator {
    lock: RwLock<()>,
    stamp: CachePadded<AtomicUsize>,
    elected: AtomicBool,
    load_factor: f64,
    max_length: usize,
    name: Option<String>,
}

impl ResizeCoordinator {
    pub(crate) fn new(load_factor: f64, name: Option<String>) -> Self {
        debug_assert!(load_factor > 0.0 && load_factor <= 1.0);

        Self {
            lock: RwLock::new(()),
            stamp: CachePadded::new(AtomicUsize::new(0)),
            elected: AtomicBool::new(false),
            load_factor,
            max_length: MAX_BUCKET_ARRAY_LENGTH,
            name,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_max_length(&mut self, max_length: usize) {
        self.max_length = max_length;
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Takes the shared side of the resize lock.
    ///
    /// Must not be called again by a thread that already holds it: a resizer
    /// queued in between would deadlock both.
    #[inline]
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    #[inline]
    pub(crate) fn stamp(&self) -> usize {
        self.stamp.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_migrating(stamp: usize) -> bool {
        stamp & 1 == 1
    }

    /// Returns `true` if no migration has started since `stamp` was read.
    /// Everything loaded before this call is then consistent.
    #[inline]
    pub(crate) fn validate(&self, stamp: usize) -> bool {
        atomic::fence(Ordering::Acquire);
        self.stamp.load(Ordering::Relaxed) == stamp
    }

    #[inline]
    pub(crate) fn needs_resize(&self, size: usize, length: usize) -> bool {
        size as f64 > length as f64 * self.load_factor
    }

    /// Grows the bucket array if the load factor is exceeded.
    ///
    /// Only one thread resizes at a time; everybody else returns immediately.
    /// The caller must not hold the shared side of the resize lock.
    pub(crate) fn try_grow<K, V>(
        &self,
        slots: &HashSlots<K, V>,
        guard: &Guard,
    ) -> Result<(), ResizeError> {
        loop {
            if self
                .elected
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
                .is_err()
            {
                return Ok(());
            }

            self.grow_elected(slots, guard)?;

            // Mutators that lost the election to us may have pushed the table
            // over the load factor again.
            atomic::fence(Ordering::SeqCst);
            if !self.needs_resize(slots.get_size(), slots.store(guard).len()) {
                return Ok(());
            }
        }
    }

    fn grow_elected<K, V>(&self, slots: &HashSlots<K, V>, guard: &Guard) -> Result<(), ResizeError> {
        let _election = Election(&self.elected);
        let _exclusive = self.lock.write();

        let length = slots.store(guard).len();

        let result = match ResizeOp::new(length, slots.get_size(), self.load_factor, self.max_length) {
            Ok(ResizeOp::Expand(new_length)) => self.grow_to(slots, guard, new_length),
            Ok(ResizeOp::Skip) => Ok(()),
            Err(error) => Err(error),
        };

        #[cfg(feature = "logging")]
        if let Err(error) = &result {
            log_resize_failure(self.name(), error);
        }

        result
    }

    /// Migrates every entry into a new array of `length` buckets.
    ///
    /// Must be called with the exclusive side of the resize lock held.
    fn grow_to<K, V>(
        &self,
        slots: &HashSlots<K, V>,
        guard: &Guard,
        length: usize,
    ) -> Result<(), ResizeError> {
        // Allocate before anything becomes visible, so a failure leaves the
        // table untouched.
        let next = BucketArray::try_with_length(length)?;

        let current = slots.store(guard);
        #[cfg(feature = "logging")]
        let old_length = current.len();

        self.stamp.fetch_add(1, Ordering::Relaxed);
        atomic::fence(Ordering::Release);

        current.migrate_into(guard, &next);
        let old = slots.set_store(Owned::new(next), guard);

        self.stamp.fetch_add(1, Ordering::Release);

        unsafe { defer_acquire_destroy(guard, old) };

        #[cfg(feature = "logging")]
        log::debug!(
            "{}Resized the bucket array from {old_length} to {length} slots ({} entries)",
            name_prefix(self.name()),
            slots.get_size()
        );

        Ok(())
    }
}

/// Hands the election back when the resizer is done, whatever the outcome.
struct Election<'a>(&'a AtomicBool);

impl Drop for Election<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Eq, PartialEq)]
enum ResizeOp {
    Expand(usize),
    Skip,
}

impl ResizeOp {
    /// Doubles `length` until `size` entries fit under the load factor, but not
    /// beyond `max_length`.
    fn new(
        length: usize,
        size: usize,
        load_factor: f64,
        max_length: usize,
    ) -> Result<Self, ResizeError> {
        let fits = |length: usize| size as f64 <= length as f64 * load_factor;

        if fits(length) {
            return Ok(Self::Skip);
        }

        let mut new_length = length;
        while !fits(new_length) {
            new_length = new_length
                .checked_mul(2)
                .filter(|&doubled| doubled <= max_length)
                .ok_or(ResizeError::CapacityOverflow { length })?;
        }

        Ok(Self::Expand(new_length))
    }
}

#[cfg(feature = "logging")]
fn name_prefix(name: Option<&str>) -> String {
    name.map(|name| format!("[{name}] ")).unwrap_or_default()
}

#[cfg(feature = "logging")]
fn log_resize_failure(name: Option<&str>, error: &ResizeError) {
    log::error!(
        "{}Kept the current bucket array because growing it failed: {error}",
        name_prefix(name)
    );
}
