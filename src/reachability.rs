//! The hook a tracing garbage collector uses to find the objects a table keeps
//! alive.
//!
//! See [`ConcurrentHash::export_reachable`](crate::ConcurrentHash::export_reachable).

use std::{
    collections::HashSet,
    hash::{BuildHasher, Hash},
    sync::Arc,
};

/// A key or value that may be a handle to a collector-managed heap object of
/// type `O`.
///
/// Immediates (integers, booleans, characters) are never heap objects. They
/// implement `Traceable<O>` for every `O` and always return `None`.
///
/// # Examples
///
/// ```rust
/// use ordered_cht::{ConcurrentHash, Traceable};
///
/// #[derive(Clone, Debug, PartialEq)]
/// enum Value {
///     Fixnum(i64),
///     Object(usize),
/// }
///
/// impl Traceable<usize> for Value {
///     fn heap_object(&self) -> Option<usize> {
///         match self {
///             Value::Fixnum(_) => None,
///             Value::Object(address) => Some(*address),
///         }
///     }
/// }
///
/// let hash = ConcurrentHash::new();
/// hash.insert(1u32, Value::Fixnum(10)).unwrap();
/// hash.insert(2u32, Value::Object(0x1000)).unwrap();
///
/// let mut reachable: Vec<usize> = Vec::new();
/// hash.export_reachable(&mut reachable);
///
/// assert_eq!(reachable, vec![0x1000]);
/// ```
pub trait Traceable<O> {
    /// Returns the heap object this value refers to, if any.
    fn heap_object(&self) -> Option<O>;
}

macro_rules! impl_traceable_for_immediates {
    ($($t:ty),* $(,)?) => {
        $(
            impl<O> Traceable<O> for $t {
                #[inline]
                fn heap_object(&self) -> Option<O> {
                    None
                }
            }
        )*
    };
}

impl_traceable_for_immediates!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, bool, char, ());

impl<T: ?Sized> Traceable<Arc<T>> for Arc<T> {
    fn heap_object(&self) -> Option<Arc<T>> {
        Some(Arc::clone(self))
    }
}

impl<O, T: Traceable<O>> Traceable<O> for Option<T> {
    fn heap_object(&self) -> Option<O> {
        self.as_ref().and_then(Traceable::heap_object)
    }
}

/// A collector-supplied sink for reachable objects.
pub trait Accumulator<O> {
    fn accept(&mut self, object: O);
}

impl<O> Accumulator<O> for Vec<O> {
    fn accept(&mut self, object: O) {
        self.push(object);
    }
}

impl<O, S> Accumulator<O> for HashSet<O, S>
where
    O: Hash + Eq,
    S: BuildHasher,
{
    fn accept(&mut self, object: O) {
        self.insert(object);
    }
}

impl<O, A: Accumulator<O> + ?Sized> Accumulator<O> for &mut A {
    fn accept(&mut self, object: O) {
        (**self).accept(object);
    }
}

/// Adapts a closure into an [`Accumulator`].
///
/// ```rust
/// use ordered_cht::{accumulate_with, ConcurrentHash};
/// use std::sync::Arc;
///
/// let hash = ConcurrentHash::new();
/// hash.insert(1u32, Arc::new("one")).unwrap();
/// hash.insert(2u32, Arc::new("two")).unwrap();
///
/// let mut count = 0;
/// hash.export_reachable(&mut accumulate_with(|_object: Arc<&str>| count += 1));
///
/// assert_eq!(count, 2);
/// ```
pub fn accumulate_with<O, F: FnMut(O)>(f: F) -> FnAccumulator<F> {
    FnAccumulator(f)
}

/// An [`Accumulator`] created by [`accumulate_with`].
pub struct FnAccumulator<F>(F);

impl<O, F: FnMut(O)> Accumulator<O> for FnAccumulator<F> {
    fn accept(&mut self, object: O) {
        (self.0)(object);
    }
}
