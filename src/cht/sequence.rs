//! The insertion-order list.
//!
//! All functions here take the sentinels and entries as epoch-protected
//! pointers; the caller's guard must stay pinned for as long as it uses the
//! returned references.

use super::entry::{Entry, LINK_OWNED_TAG};

use std::sync::atomic::Ordering;

use crossbeam_epoch::{Guard, Shared};
use crossbeam_utils::Backoff;

/// Splices `entry` in front of the tail sentinel.
///
/// `entry` must already be linked into its bucket chain, and its `seq_next`
/// must point to `tail` with [`LINK_OWNED_TAG`] set, so that a reader reaching
/// it before the splice completes stops at the tail.
pub(crate) fn append<'g, K, V>(
    guard: &'g Guard,
    tail: Shared<'g, Entry<K, V>>,
    entry: Shared<'g, Entry<K, V>>,
) {
    let tail_ref = unsafe { tail.deref() };
    let entry_ref = unsafe { entry.deref() };
    debug_assert_eq!(
        entry_ref.seq_next.load(Ordering::Relaxed, guard),
        tail.with_tag(LINK_OWNED_TAG)
    );

    let backoff = Backoff::new();

    // Own the link into the tail.
    let last = loop {
        let last = tail_ref.seq_prev.load(Ordering::Acquire, guard);
        let last_ref = unsafe { last.deref() };

        if last_ref
            .seq_next
            .compare_exchange(
                tail,
                tail.with_tag(LINK_OWNED_TAG),
                Ordering::AcqRel,
                Ordering::Relaxed,
                guard,
            )
            .is_ok()
        {
            break last;
        }

        backoff.snooze();
    };

    entry_ref.seq_prev.store(last, Ordering::Release);
    unsafe { last.deref() }
        .seq_next
        .store(entry, Ordering::Release);
    tail_ref.seq_prev.store(entry, Ordering::Release);
    entry_ref.seq_next.store(tail, Ordering::Release);
}

/// Splices a removed entry out of the list.
///
/// The entry keeps its outgoing link tagged forever, so concurrent iterators
/// standing on it can still walk forward.
pub(crate) fn unlink<'g, K, V>(guard: &'g Guard, entry: Shared<'g, Entry<K, V>>) {
    let entry = entry.with_tag(0);
    let entry_ref = unsafe { entry.deref() };
    debug_assert!(entry_ref.is_removed(guard));

    let backoff = Backoff::new();

    // Own the link into the entry. `seq_prev` is null until the inserting
    // thread has started its append.
    let prev = loop {
        let prev = entry_ref.seq_prev.load(Ordering::Acquire, guard);

        if let Some(prev_ref) = unsafe { prev.as_ref() } {
            if prev_ref
                .seq_next
                .compare_exchange(
                    entry,
                    entry.with_tag(LINK_OWNED_TAG),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                    guard,
                )
                .is_ok()
            {
                break prev;
            }
        }

        backoff.snooze();
    };

    backoff.reset();

    // Then the link out of it.
    let next = loop {
        let next = entry_ref.seq_next.load(Ordering::Acquire, guard);

        if next.tag() & LINK_OWNED_TAG == 0
            && entry_ref
                .seq_next
                .compare_exchange(
                    next,
                    next.with_tag(LINK_OWNED_TAG),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                    guard,
                )
                .is_ok()
        {
            break next;
        }

        backoff.snooze();
    };

    unsafe { next.deref() }
        .seq_prev
        .store(prev, Ordering::Release);
    unsafe { prev.deref() }
        .seq_next
        .store(next, Ordering::Release);
}

/// Returns the first entry after `from` that is not marked removed, or `None`
/// once the tail sentinel is reached.
pub(crate) fn next_live<'g, K, V>(guard: &'g Guard, from: &Entry<K, V>) -> Option<&'g Entry<K, V>> {
    let mut curr = from.seq_next.load(Ordering::Acquire, guard);

    loop {
        let curr_ref = unsafe { curr.with_tag(0).as_ref() }?;

        if curr_ref.is_sentinel() {
            return None;
        }
        if !curr_ref.is_removed(guard) {
            return Some(curr_ref);
        }

        curr = curr_ref.seq_next.load(Ordering::Acquire, guard);
    }
}

/// Returns the last entry before `from` that is not marked removed, or `None`
/// once the head sentinel is reached.
pub(crate) fn prev_live<'g, K, V>(guard: &'g Guard, from: &Entry<K, V>) -> Option<&'g Entry<K, V>> {
    let mut curr = from.seq_prev.load(Ordering::Acquire, guard);

    loop {
        let curr_ref = unsafe { curr.as_ref() }?;

        if curr_ref.is_sentinel() {
            return None;
        }
        if !curr_ref.is_removed(guard) {
            return Some(curr_ref);
        }

        curr = curr_ref.seq_prev.load(Ordering::Acquire, guard);
    }
}

/// Looks a key up by walking the list from the head sentinel. Used while the
/// bucket chains are being re-threaded.
pub(crate) fn find<'g, K, V>(
    guard: &'g Guard,
    head: &Entry<K, V>,
    hash: u64,
    mut eq: impl FnMut(&K) -> bool,
) -> Option<&'g Entry<K, V>> {
    let mut curr = next_live(guard, head);

    while let Some(entry) = curr {
        if entry.hash == hash && entry.key().map_or(false, |k| eq(k)) {
            return Some(entry);
        }
        curr = next_live(guard, entry);
    }

    None
}
