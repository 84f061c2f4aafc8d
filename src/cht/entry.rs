use std::{
    fmt, mem,
    sync::atomic::{self, Ordering},
};

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};

pub(crate) const REMOVED_TAG: usize = 0b1; // set on `chain_next` once the entry is logically removed
pub(crate) const LINK_OWNED_TAG: usize = 0b1; // set on `seq_next` while a thread rewires the outgoing link

/// A node of the table.
///
/// Every live entry is threaded through two independent structures: the
/// singly-linked chain of its bucket (`chain_next`) and the doubly-linked
/// insertion-order sequence (`seq_prev`/`seq_next`).
///
/// The removed flag is the [`REMOVED_TAG`] bit of `chain_next`. Once set, the
/// chain link is frozen and the entry only waits to be unlinked and reclaimed.
/// Likewise a removed entry keeps [`LINK_OWNED_TAG`] on `seq_next` forever, so
/// its forward sequence link is frozen too.
#[repr(align(8))]
pub(crate) struct Entry<K, V> {
    pub(crate) hash: u64,
    key: Option<K>,
    value: Atomic<V>,
    pub(crate) chain_next: Atomic<Entry<K, V>>,
    pub(crate) seq_prev: Atomic<Entry<K, V>>,
    pub(crate) seq_next: Atomic<Entry<K, V>>,
}

impl<K, V> Entry<K, V> {
    #[cfg(test)]
    pub(crate) fn new(hash: u64, key: K, value: V) -> Self {
        Self::with_owned_value(hash, key, Owned::new(value))
    }

    pub(crate) fn with_owned_value(hash: u64, key: K, value: Owned<V>) -> Self {
        Self {
            hash,
            key: Some(key),
            value: Atomic::from(value),
            chain_next: Atomic::null(),
            seq_prev: Atomic::null(),
            seq_next: Atomic::null(),
        }
    }

    /// Creates a head or tail marker of the insertion-order sequence.
    pub(crate) fn sentinel() -> Self {
        Self {
            hash: 0,
            key: None,
            value: Atomic::null(),
            chain_next: Atomic::null(),
            seq_prev: Atomic::null(),
            seq_next: Atomic::null(),
        }
    }

    #[inline]
    pub(crate) fn is_sentinel(&self) -> bool {
        self.key.is_none()
    }

    #[inline]
    pub(crate) fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    #[inline]
    pub(crate) fn value<'g>(&self, guard: &'g Guard) -> Option<&'g V> {
        unsafe { self.value.load(Ordering::Acquire, guard).as_ref() }
    }

    #[inline]
    pub(crate) fn is_removed(&self, guard: &Guard) -> bool {
        self.chain_next.load(Ordering::Acquire, guard).tag() & REMOVED_TAG != 0
    }

    /// Sets the removed flag. Returns `true` if this call set it, which makes
    /// the caller responsible for unlinking and reclaiming the entry.
    pub(crate) fn try_mark_removed(&self, guard: &Guard) -> bool {
        let mut next = self.chain_next.load(Ordering::Acquire, guard);

        loop {
            if next.tag() & REMOVED_TAG != 0 {
                return false;
            }

            match self.chain_next.compare_exchange_weak(
                next,
                next.with_tag(REMOVED_TAG),
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(_) => return true,
                // The successor was unlinked under us, or someone else won.
                Err(e) => next = e.current,
            }
        }
    }

    /// Replaces the value in place and returns the previous one, which the
    /// caller must retire.
    ///
    /// Fails, handing `value` back, once a remover has taken the value out.
    pub(crate) fn replace_value<'g>(
        &self,
        mut value: Owned<V>,
        guard: &'g Guard,
    ) -> Result<Shared<'g, V>, Owned<V>> {
        let mut current = self.value.load(Ordering::Acquire, guard);

        loop {
            if current.is_null() {
                return Err(value);
            }

            match self.value.compare_exchange_weak(
                current,
                value,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(_) => return Ok(current),
                Err(e) => {
                    current = e.current;
                    value = e.new;
                }
            }
        }
    }

    /// Takes the value out of a removed entry. Later replacements fail, and
    /// readers see the entry as empty.
    pub(crate) fn take_value<'g>(&self, guard: &'g Guard) -> Shared<'g, V> {
        self.value.swap(Shared::null(), Ordering::AcqRel, guard)
    }

    /// Takes the key and value out of an entry that was never published.
    pub(crate) fn into_key_value(mut self) -> Option<(K, Owned<V>)> {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let key = self.key.take()?;
        let value = mem::replace(&mut self.value, Atomic::null()).load(Ordering::Relaxed, guard);

        if value.is_null() {
            return None;
        }

        // SAFETY: the entry is exclusively owned, so nobody else can observe
        // its value.
        Some((key, unsafe { value.into_owned() }))
    }
}

impl<K, V> Drop for Entry<K, V> {
    fn drop(&mut self) {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let value = self.value.load(Ordering::Relaxed, guard);

        if !value.is_null() {
            mem::drop(unsafe { value.into_owned() });
        }
    }
}

impl<K: fmt::Debug, V> fmt::Debug for Entry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("hash", &self.hash)
            .field("key", &self.key)
            .finish()
    }
}

/// Schedules the destruction of an entry (and its current value) once no
/// pinned thread can still reach it.
///
/// # Safety
///
/// The entry must be unreachable from both its bucket chain and the sequence,
/// and this must be the only call that retires it.
pub(crate) unsafe fn defer_destroy_entry<'g, K, V>(guard: &'g Guard, ptr: Shared<'g, Entry<K, V>>) {
    assert!(!ptr.is_null());

    defer_acquire_destroy(guard, ptr.with_tag(0));
}

pub(crate) unsafe fn defer_acquire_destroy<'g, T>(guard: &'g Guard, ptr: Shared<'g, T>) {
    assert!(!ptr.is_null());

    guard.defer_unchecked(move || {
        atomic::fence(Ordering::Acquire);
        mem::drop(ptr.into_owned());
    });
}

#[cfg(test)]
mod tests {
    use super::{defer_acquire_destroy, Entry, REMOVED_TAG};
    use crate::cht::test_util::{DropNotifier, NoisyDropper};

    use crossbeam_epoch::Owned;
    use std::sync::{atomic::Ordering, Arc};

    #[test]
    fn sentinel_has_no_contents() {
        let guard = &crossbeam_epoch::pin();
        let sentinel = Entry::<u32, u32>::sentinel();

        assert!(sentinel.is_sentinel());
        assert_eq!(sentinel.key(), None);
        assert_eq!(sentinel.value(guard), None);
        assert!(!sentinel.is_removed(guard));
    }

    #[test]
    fn removed_mark_is_set_once() {
        let guard = &crossbeam_epoch::pin();
        let entry = Entry::new(1, "k", 1);

        assert!(!entry.is_removed(guard));
        assert!(entry.try_mark_removed(guard));
        assert!(entry.is_removed(guard));
        assert!(!entry.try_mark_removed(guard));
        assert_eq!(
            entry.chain_next.load(Ordering::Relaxed, guard).tag(),
            REMOVED_TAG
        );
    }

    #[test]
    fn replaced_value_is_dropped() {
        let first = Arc::new(DropNotifier::new());
        let second = Arc::new(DropNotifier::new());

        {
            let guard = &crossbeam_epoch::pin();
            let entry = Entry::new(1, "k", NoisyDropper::new(Arc::clone(&first), 1));

            let previous = entry
                .replace_value(Owned::new(NoisyDropper::new(Arc::clone(&second), 2)), guard)
                .unwrap();
            assert_eq!(unsafe { previous.deref() }.elem, 1);
            assert_eq!(entry.value(guard).map(|v| v.elem), Some(2));

            unsafe { defer_acquire_destroy(guard, previous) };
        }

        crate::cht::test_util::run_deferred();

        assert!(first.was_dropped());
        assert!(second.was_dropped());
    }

    #[test]
    fn taken_value_cannot_be_replaced() {
        let guard = &crossbeam_epoch::pin();
        let entry = Entry::new(1, "k", 1);

        let taken = entry.take_value(guard);
        assert_eq!(unsafe { taken.as_ref() }, Some(&1));
        assert_eq!(entry.value(guard), None);

        let rejected = entry.replace_value(Owned::new(2), guard);
        assert_eq!(rejected.err().map(|v| *v), Some(2));

        unsafe { defer_acquire_destroy(guard, taken) };
    }

    #[test]
    fn unpublished_entry_gives_back_its_contents() {
        let entry = Entry::new(9, String::from("key"), 42);

        let (key, value) = entry.into_key_value().unwrap();
        assert_eq!(key, "key");
        assert_eq!(*value, 42);
    }
}
