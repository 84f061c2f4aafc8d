//! The lock-free machinery behind [`ConcurrentHash`].
//!
//! Every entry of the table lives in two linked structures at once. The first
//! is the singly-linked chain of its bucket, which is what lookups walk. The
//! bucket array is a boxed slice of atomic pointers to chain heads, and its
//! length is always a power of two so a bucket index is the hash masked by
//! `len - 1`. The second is a doubly-linked list threading all entries in the
//! order their keys were first inserted. It runs between two sentinel entries
//! that carry neither key nor value and live as long as the table.
//!
//! Chains follow the Harris-Michael design. An insertion allocates an entry,
//! points it at the current chain head and CASes the bucket slot. A removal
//! first sets a tag bit on the entry's own `chain_next` pointer, which freezes
//! that pointer and logically deletes the entry, then CASes the predecessor's
//! pointer past it. Mutators that come across a marked entry while searching
//! help unlink it. Lookups never write, they only skip marked entries.
//!
//! The sequence list is harder because a splice touches two pointers of two
//! different entries. A thread that wants to rewrite the link from `a` to `b`
//! first CASes a tag bit into `a.seq_next`. While the bit is set only that
//! thread may change `a.seq_next` and `b.seq_prev`. The link is released with
//! a single release store of the new, untagged pointer. Appending owns the link
//! into the tail sentinel. Unlinking `x` owns the link into `x` and then the
//! link out of `x`, always left to right, so no cycle of waiters can form. A
//! removed entry never gives its outgoing link back, which freezes it, and
//! iterators standing on a removed entry can still walk forward from it.
//!
//! Growing the table is the only operation that needs mutual exclusion. Puts
//! and removes hold the shared side of a reader-writer lock, and the single
//! elected resizer takes the exclusive side, re-threads every entry's
//! `chain_next` into a larger array and publishes it. The sequence list is not
//! touched. Lookups do not take the lock. Instead they read a stamp that is odd
//! while a migration runs and check it again after every step; if it moved they
//! start over, and if a migration is in progress they answer from the sequence
//! list, which is stable throughout.
//!
//! Memory is reclaimed with [`crossbeam_epoch`]. An entry is retired only after
//! it is unreachable from both its chain and the sequence list. Replaced values
//! and old bucket arrays are retired the same way.
//!
//! [`ConcurrentHash`]: crate::ConcurrentHash

pub(crate) mod bucket;
pub(crate) mod entry;
pub(crate) mod resize;
pub(crate) mod sequence;
pub(crate) mod slots;

#[cfg(test)]
#[macro_use]
pub(crate) mod test_util;
