//! Hash family: primary hash, tag hash, and the salted secondary functions.
//!
//! Only the primary hash runs user code (`K: Hash`), once per public
//! operation. The tag and every secondary ("R") function are derived from
//! the cached `u64` or from bucket indices, so displacement and resize never
//! call back into the key type.

use core::hash::{BuildHasher, Hash};

/// Number of entries in a redirect list; tags fall in `0..TAG_COUNT`.
pub const TAG_COUNT: usize = 8;

/// Number of secondary hash functions a redirect entry can name.
pub const R_FUNC_COUNT: usize = 8;

const TAG_BITS: u32 = TAG_COUNT.trailing_zeros();

/// 2^64 divided by the golden ratio, rounded to the nearest odd integer.
const GOLDEN: u64 = 0x9E37_79B9_7F4A_7C15;

const R_SALTS: [u64; R_FUNC_COUNT] = [7927, 8039, 8117, 8221, 8293, 8389, 8513, 9151];

#[derive(Clone, Debug, Default)]
pub(crate) struct HashFamily<S> {
    build: S,
}

impl<S: BuildHasher> HashFamily<S> {
    pub(crate) fn new(build: S) -> Self {
        Self { build }
    }

    pub(crate) fn hasher(&self) -> &S {
        &self.build
    }

    /// Primary hash of a key. Everything else is derived from this value.
    #[inline]
    pub(crate) fn hash_key<Q>(&self, q: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        self.build.hash_one(q)
    }
}

#[inline]
pub(crate) fn primary_bucket(hash: u64, buckets: usize) -> usize {
    (hash % buckets as u64) as usize
}

/// Tag of a key: the top bits of a multiplicative remix of its hash.
///
/// The primary bucket consumes the low bits of `hash` (modulo the bucket
/// count), so the tag is taken from the opposite end after mixing.
#[inline]
pub(crate) fn tag(hash: u64) -> usize {
    (hash.wrapping_mul(GOLDEN) >> (u64::BITS - TAG_BITS)) as usize
}

/// Secondary function `func` applied to a `(home, tag)` pair.
#[inline]
pub(crate) fn r_hash(home: usize, tag: usize, func: usize) -> u64 {
    let salt = R_SALTS[func];
    let seed = (home as u64).wrapping_add((tag as u64 + 1).wrapping_mul(salt));
    avalanche(seed ^ (salt << 32))
}

#[inline]
pub(crate) fn secondary_bucket(home: usize, tag: usize, func: usize, buckets: usize) -> usize {
    (r_hash(home, tag, func) % buckets as u64) as usize
}

// splitmix64 finalizer
#[inline]
fn avalanche(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
