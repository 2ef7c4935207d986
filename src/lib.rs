//! horton-map: a single-threaded Horton table, an open-addressing map with
//! fixed-size buckets that resolves overflow through a small family of
//! secondary hash functions instead of chaining.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: high load factors with bounded lookup cost. A lookup reads at
//!   most two buckets: the key's home bucket and, if that bucket has ever
//!   overflowed, the one bucket its redirect list names for the key's tag.
//! - Layers:
//!   - `hashing`: primary hash (the map's `BuildHasher`), the tag derived
//!     from it, and eight salted secondary functions of `(home, tag)`.
//!   - `bucket::Bucket`: `Plain` (all `C` slots hold pairs) or
//!     `Redirecting` (a redirect list plus `C - 1` slots).
//!   - `HortonMap<K, V, S>`: lookup, insertion, displacement, best-fit
//!     function selection, and doubling resize.
//!
//! Placement
//! - A new key goes to its home bucket if there is room.
//! - Otherwise the home bucket tries to push out some of its *secondary*
//!   entries (displacement); primary entries never move.
//! - Otherwise the home bucket turns redirect-bearing. One of its own
//!   primary entries gives up its slot and is re-placed elsewhere first;
//!   the conversion is undone if that fails. Secondary entries hosted in
//!   the bucket are never evicted this way, since their redirect entries
//!   live in other buckets. The key is then stored in the bucket named by
//!   the redirect entry for its tag, chosen as the emptiest of the eight
//!   candidates.
//! - If nothing fits, the table doubles its bucket count and reinserts
//!   every entry. Running out of room right after growing is treated as a
//!   broken invariant and panics.
//!
//! Constraints
//! - Single-threaded: `Send` but not `Sync`. Share across threads only
//!   behind a lock that excludes readers during `insert`.
//! - Every pair caches its `u64` hash; displacement and resize never call
//!   `K: Hash` again, and `K: Eq` runs only while looking a key up.
//! - Reentrancy from `K: Hash`/`K: Eq` back into the same map is caught by
//!   a debug-only guard.
//!
//! Notes and non-goals
//! - No removal. A secondary group must always stay together behind its
//!   redirect entry.
//! - No ordered iteration, persistence, or serialization.
//! - "Table full" is an internal result type; callers never see it.

mod bucket;
mod error;
mod hashing;
mod horton_map;
mod horton_map_proptest;
mod reentrancy;

// Public surface
pub use error::ConfigError;
pub use hashing::{R_FUNC_COUNT, TAG_COUNT};
pub use horton_map::{
    HortonMap, Iter, IterMut, LookupStats, DEFAULT_BUCKETS, DEFAULT_BUCKET_CAPACITY,
    MIN_BUCKET_CAPACITY,
};
