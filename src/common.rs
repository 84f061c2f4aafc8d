use std::hash::{BuildHasher, Hash, Hasher};

pub(crate) mod constants;
pub(crate) mod error;
pub(crate) mod identity;

pub(crate) fn hash<K, H>(build_hasher: &H, key: &K) -> u64
where
    K: ?Sized + Hash,
    H: BuildHasher,
{
    let mut hasher = build_hasher.build_hasher();
    key.hash(&mut hasher);

    hasher.finish()
}

/// Computes the hash of `key` under the given comparison mode.
///
/// In compare-by-identity mode only the key's [`Identity`] token is hashed, so
/// keys that are `Eq` but live at different addresses land in different
/// chains. A key without a token never matches anything, so its contents are
/// hashed to keep such keys spread over the chains.
///
/// [`Identity`]: crate::Identity
pub(crate) fn hash_key<Q, H>(build_hasher: &H, key: &Q, by_identity: bool) -> u64
where
    Q: ?Sized + Hash + identity::Identity,
    H: BuildHasher,
{
    match key.identity() {
        Some(token) if by_identity => hash(build_hasher, &token),
        _ => hash(build_hasher, key),
    }
}
