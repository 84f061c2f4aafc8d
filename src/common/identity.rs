use std::{rc::Rc, sync::Arc};

/// Provides the token used to compare keys by identity.
///
/// A table in compare-by-identity mode hashes and compares keys only by the
/// token returned from [`identity`](#tymethod.identity).
///
/// - Shared handles ([`Arc`], [`Rc`]) return the address of their allocation,
///   so clones of one handle are the same key and separately allocated handles
///   are different keys, whatever they point to.
/// - Immediates (integers, booleans, characters) return their value widened to
///   `u64`, so they keep comparing equal.
/// - Owned values (`String`, `Vec<T>`, `Box<T>`, `str`, slices) return `None`.
///   They have no identity apart from their contents: nothing outside the
///   table can refer to the key the table owns. In compare-by-identity mode
///   every insertion of such a key creates a new entry, and lookups by such a
///   key never find anything.
///
/// When a key type `K` borrows as `Q` (for example `Arc<str>` as itself, or a
/// wrapper as its contents), both implementations must return the same token
/// for the same key, otherwise a lookup through the borrowed form will miss.
///
/// # Examples
///
/// ```rust
/// use ordered_cht::Identity;
/// use std::sync::Arc;
///
/// let a: Arc<str> = Arc::from("key");
/// let b: Arc<str> = Arc::from("key");
///
/// assert_eq!(a.identity(), Arc::clone(&a).identity());
/// assert_ne!(a.identity(), b.identity());
/// assert_eq!(42u32.identity(), Some(42));
/// assert_eq!(String::from("key").identity(), None);
/// ```
pub trait Identity {
    /// Returns the identity token of this value, or `None` if it has none.
    fn identity(&self) -> Option<u64>;
}

macro_rules! impl_identity_for_immediates {
    ($($t:ty),* $(,)?) => {
        $(
            impl Identity for $t {
                #[inline]
                fn identity(&self) -> Option<u64> {
                    Some(*self as u64)
                }
            }
        )*
    };
}

impl_identity_for_immediates!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, bool, char);

macro_rules! impl_identity_for_owned {
    ($($t:ty),* $(,)?) => {
        $(
            impl Identity for $t {
                #[inline]
                fn identity(&self) -> Option<u64> {
                    None
                }
            }
        )*
    };
}

impl_identity_for_owned!(str, String);

impl<T> Identity for [T] {
    #[inline]
    fn identity(&self) -> Option<u64> {
        None
    }
}

impl<T> Identity for Vec<T> {
    #[inline]
    fn identity(&self) -> Option<u64> {
        None
    }
}

impl<T: ?Sized> Identity for Box<T> {
    #[inline]
    fn identity(&self) -> Option<u64> {
        None
    }
}

impl<T: ?Sized> Identity for Arc<T> {
    #[inline]
    fn identity(&self) -> Option<u64> {
        Some(Arc::as_ptr(self) as *const () as usize as u64)
    }
}

impl<T: ?Sized> Identity for Rc<T> {
    #[inline]
    fn identity(&self) -> Option<u64> {
        Some(Rc::as_ptr(self) as *const () as usize as u64)
    }
}

impl<T: ?Sized + Identity> Identity for &T {
    #[inline]
    fn identity(&self) -> Option<u64> {
        (**self).identity()
    }
}

/// Returns `true` if both values have an identity and it is the same.
#[inline]
pub(crate) fn is_identical<Q: Identity + ?Sized>(a: &Q, b: &Q) -> bool {
    matches!((a.identity(), b.identity()), (Some(a), Some(b)) if a == b)
}

#[cfg(test)]
mod tests {
    use super::{is_identical, Identity};
    use std::{rc::Rc, sync::Arc};

    #[test]
    fn immediates_are_identical_by_value() {
        assert_eq!(7i64.identity(), 7i64.identity());
        assert_eq!(true.identity(), Some(1));
        assert_eq!('a'.identity(), Some('a' as u64));
        assert!(is_identical(&3u8, &3u8));
    }

    #[test]
    fn wide_immediates_are_not_truncated() {
        let low = 1u64;
        let high = (1u64 << 32) + 1;

        assert_ne!(low.identity(), high.identity());
        assert!(!is_identical(&low, &high));
        assert_ne!((-1i64).identity(), (u32::MAX as i64).identity());
    }

    #[test]
    fn handles_are_identical_by_address() {
        let a: Arc<str> = Arc::from("x");
        let b = Arc::clone(&a);
        let c: Arc<str> = Arc::from("x");

        assert!(is_identical(&a, &b));
        assert!(!is_identical(&a, &c));
        assert_eq!(a.identity(), (&a).identity());

        // Zero-sized contents still live in distinct allocations.
        let d = Rc::new(());
        let e = Rc::new(());
        assert!(!is_identical(&d, &e));
    }

    #[test]
    fn owned_values_have_no_identity() {
        let empty = String::new();

        assert_eq!(empty.identity(), None);
        assert!(!is_identical(&empty, &empty));
        assert!(!is_identical(&Vec::<u8>::new(), &Vec::new()));
        assert!(!is_identical("abc", "abc"));
        assert!(!is_identical(&Box::new(()), &Box::new(())));
    }
}
