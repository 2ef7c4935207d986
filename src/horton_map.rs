//! HortonMap: bucketized open addressing with redirect-driven secondary
//! placement, best-fit function selection, displacement, and doubling.

use crate::bucket::{Bucket, Pair};
use crate::error::{invariant_violation, BucketFull, ConfigError, Full};
use crate::hashing::{self, HashFamily, R_FUNC_COUNT};
use crate::reentrancy::DebugReentrancy;
use core::borrow::Borrow;
use core::cell::Cell;
use core::cmp::Reverse;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::iter::FusedIterator;
use core::mem;
use hashbrown::hash_map::DefaultHashBuilder;

/// Bucket count used by `new` and `with_hasher`.
pub const DEFAULT_BUCKETS: usize = 16;
/// Per-bucket slot count used by `new` and `with_hasher`.
pub const DEFAULT_BUCKET_CAPACITY: usize = 8;
/// Smallest accepted per-bucket slot count: one slot for the redirect list
/// plus one for a pair.
pub const MIN_BUCKET_CAPACITY: usize = 2;

/// Counts of user-facing lookups by how far they had to look.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LookupStats {
    /// Resolved from the home bucket alone.
    pub primary: u64,
    /// Consulted the home bucket's redirect list.
    pub secondary: u64,
}

#[derive(Debug, Default)]
struct LookupCounters {
    primary: Cell<u64>,
    secondary: Cell<u64>,
}

impl LookupCounters {
    #[inline]
    fn record(&self, probe: Probe) {
        let c = match probe {
            Probe::Home => &self.primary,
            Probe::Redirected => &self.secondary,
        };
        c.set(c.get().wrapping_add(1));
    }

    fn snapshot(&self) -> LookupStats {
        LookupStats {
            primary: self.primary.get(),
            secondary: self.secondary.get(),
        }
    }

    fn reset(&self) {
        self.primary.set(0);
        self.secondary.set(0);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Probe {
    Home,
    Redirected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SlotRef {
    bucket: usize,
    slot: usize,
}

/// Secondary entries of one bucket governed by the same redirect entry.
struct Group {
    home: usize,
    tag: usize,
    slots: Vec<usize>,
}

pub struct HortonMap<K, V, S = DefaultHashBuilder> {
    hashes: HashFamily<S>,
    buckets: Vec<Bucket<K, V>>,
    bucket_capacity: usize,
    len: usize,
    stats: LookupCounters,
    reentrancy: DebugReentrancy,
}

impl<K, V> HortonMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }

    /// Map with `buckets` initial buckets of `bucket_capacity` slots each.
    ///
    /// # Panics
    ///
    /// Capacities 2 and 3 are accepted, but all secondary entries of one
    /// home bucket and tag must share a single bucket. With capacity 2 or 3
    /// a run of unlucky hashes can leave an entry with no room even right
    /// after the table doubles, and `insert` then panics. Use 4 or more
    /// unless the key set is known to spread well.
    ///
    /// # Errors
    ///
    /// `ConfigError` if `buckets` is 0 or `bucket_capacity` is below
    /// [`MIN_BUCKET_CAPACITY`].
    pub fn with_buckets(buckets: usize, bucket_capacity: usize) -> Result<Self, ConfigError> {
        Self::with_buckets_and_hasher(buckets, bucket_capacity, Default::default())
    }
}

impl<K, V> Default for HortonMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> HortonMap<K, V, S> {
    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current number of buckets; only ever doubles.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Slots per bucket, fixed at construction.
    pub fn bucket_capacity(&self) -> usize {
        self.bucket_capacity
    }

    /// Entries divided by total slots (redirect lists count as slots).
    pub fn load_factor(&self) -> f64 {
        self.len as f64 / (self.buckets.len() * self.bucket_capacity) as f64
    }

    pub fn lookup_stats(&self) -> LookupStats {
        self.stats.snapshot()
    }

    pub fn reset_lookup_stats(&self) {
        self.stats.reset()
    }

    /// Every entry once, in unspecified order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            buckets: self.buckets.iter(),
            slots: Default::default(),
            remaining: self.len,
        }
    }

    /// Every entry once with a mutable value, in unspecified order.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            buckets: self.buckets.iter_mut(),
            slots: Default::default(),
            remaining: self.len,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, v)| v)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> + '_ {
        self.iter_mut().map(|(_, v)| v)
    }
}

impl<K, V, S> HortonMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::build(DEFAULT_BUCKETS, DEFAULT_BUCKET_CAPACITY, hasher)
    }

    /// Like [`HortonMap::with_buckets`] with an explicit hasher. The same
    /// warning about capacities below 4 applies.
    pub fn with_buckets_and_hasher(
        buckets: usize,
        bucket_capacity: usize,
        hasher: S,
    ) -> Result<Self, ConfigError> {
        if buckets == 0 {
            return Err(ConfigError::NoBuckets);
        }
        if bucket_capacity < MIN_BUCKET_CAPACITY {
            return Err(ConfigError::BucketCapacityTooSmall {
                capacity: bucket_capacity,
            });
        }
        Ok(Self::build(buckets, bucket_capacity, hasher))
    }

    fn build(buckets: usize, bucket_capacity: usize, hasher: S) -> Self {
        Self {
            hashes: HashFamily::new(hasher),
            buckets: Self::allocate(buckets, bucket_capacity),
            bucket_capacity,
            len: 0,
            stats: LookupCounters::default(),
            reentrancy: DebugReentrancy::new(),
        }
    }

    fn allocate(buckets: usize, bucket_capacity: usize) -> Vec<Bucket<K, V>> {
        (0..buckets).map(|_| Bucket::new(bucket_capacity)).collect()
    }

    pub fn hasher(&self) -> &S {
        self.hashes.hasher()
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter();
        let hash = self.hashes.hash_key(key);
        let (probe, found) = self.locate(hash, key);
        self.stats.record(probe);
        let at = found?;
        self.buckets[at.bucket].slot(at.slot).map(|p| &p.value)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let at = {
            let _g = self.reentrancy.enter();
            let hash = self.hashes.hash_key(key);
            let (probe, found) = self.locate(hash, key);
            self.stats.record(probe);
            found?
        };
        self.buckets[at.bucket].slot_mut(at.slot).map(|p| &mut p.value)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter();
        let hash = self.hashes.hash_key(key);
        let (probe, found) = self.locate(hash, key);
        self.stats.record(probe);
        found.is_some()
    }

    /// Inserts or updates `key`, returning the previous value on update.
    ///
    /// A table with no room left doubles its bucket count and reinserts
    /// everything before this call returns; callers never see it as full.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let (hash, found) = {
            let _g = self.reentrancy.enter();
            let hash = self.hashes.hash_key(&key);
            (hash, self.locate(hash, &key).1)
        };
        if let Some(at) = found {
            let pair = self.pair_mut(at);
            return Some(mem::replace(&mut pair.value, value));
        }

        if let Err(Full(pending)) = self.place(Pair { key, value, hash }) {
            self.grow_and_place(pending);
        }
        self.len += 1;
        None
    }

    #[inline]
    fn home_of(&self, hash: u64) -> usize {
        hashing::primary_bucket(hash, self.buckets.len())
    }

    #[inline]
    fn secondary_of(&self, home: usize, tag: usize, func: usize) -> usize {
        hashing::secondary_bucket(home, tag, func, self.buckets.len())
    }

    /// Finds `key` in its home bucket or, failing that, in the bucket its
    /// home's redirect entry names. Reports whether the redirect was read.
    fn locate<Q>(&self, hash: u64, key: &Q) -> (Probe, Option<SlotRef>)
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let home = self.home_of(hash);
        let bucket = &self.buckets[home];
        if let Some(slot) = bucket.lookup(hash, key) {
            return (Probe::Home, Some(SlotRef { bucket: home, slot }));
        }
        // A plain bucket has never sent a key elsewhere.
        let Some(redirects) = bucket.redirects() else {
            return (Probe::Home, None);
        };
        let tag = hashing::tag(hash);
        let Some(func) = redirects.get(tag) else {
            return (Probe::Redirected, None);
        };
        let secondary = self.secondary_of(home, tag, func);
        let found = self.buckets[secondary]
            .lookup(hash, key)
            .map(|slot| SlotRef {
                bucket: secondary,
                slot,
            });
        (Probe::Redirected, found)
    }

    fn pair_mut(&mut self, at: SlotRef) -> &mut Pair<K, V> {
        match self.buckets[at.bucket].slot_mut(at.slot) {
            Some(pair) => pair,
            None => invariant_violation(format_args!(
                "located slot {} of bucket {} is empty",
                at.slot, at.bucket
            )),
        }
    }

    /// Places a key that is not yet in the table.
    fn place(&mut self, pair: Pair<K, V>) -> Result<(), Full<K, V>> {
        let home = self.home_of(pair.hash);
        let pair = match self.buckets[home].insert_if_empty(pair) {
            Ok(()) => return Ok(()),
            Err(pair) => pair,
        };

        if self.displace(home).is_ok() {
            if self.buckets[home].insert_if_empty(pair).is_err() {
                invariant_violation(format_args!("bucket {home} still full after displacement"));
            }
            return Ok(());
        }

        if !self.buckets[home].is_redirecting() {
            // The evicted pair is re-filed under `home`'s redirect list, so it
            // must be one of `home`'s own entries. Secondaries stay put.
            let Some(own) = self.first_primary_slot(home) else {
                return Err(Full(pair));
            };
            self.buckets[home].swap_slots(0, own);
            let Some(evicted) = self.buckets[home].become_redirecting() else {
                invariant_violation(format_args!("slot {own} of bucket {home} empty at conversion"));
            };
            log::trace!("bucket {home} converted to redirect-bearing");
            if let Err(Full(evicted)) = self.place_secondary(home, evicted) {
                self.buckets[home].revert_to_plain(Some(evicted));
                self.buckets[home].swap_slots(0, own);
                log::trace!("bucket {home} reverted to plain: no room for its evicted entry");
                return Err(Full(pair));
            }
        }

        self.place_secondary(home, pair)
    }

    fn first_primary_slot(&self, bucket: usize) -> Option<usize> {
        self.buckets[bucket]
            .occupied()
            .find(|(_, pair)| self.home_of(pair.hash) == bucket)
            .map(|(slot, _)| slot)
    }

    /// Places `pair` away from its (redirect-bearing) home bucket, in the
    /// bucket named by the home's redirect entry for the pair's tag.
    fn place_secondary(&mut self, home: usize, pair: Pair<K, V>) -> Result<(), Full<K, V>> {
        let tag = hashing::tag(pair.hash);
        let func = match self.buckets[home].redirect(tag) {
            Some(func) => func,
            None => {
                let func = self.best_func(home, tag);
                self.buckets[home].set_redirect(tag, func);
                func
            }
        };

        let mut target = self.secondary_of(home, tag, func);
        let pair = match self.buckets[target].insert_if_empty(pair) {
            Ok(()) => return Ok(()),
            Err(pair) => pair,
        };

        if self.displace(target).is_err() {
            return Err(Full(pair));
        }
        // Displacement may have moved this very (home, tag) group.
        if let Some(moved) = self.buckets[home].redirect(tag).filter(|&f| f != func) {
            target = self.secondary_of(home, tag, moved);
        }
        self.buckets[target].insert_if_empty(pair).map_err(Full)
    }

    /// Frees a slot in a full bucket by moving one (home, tag) group of its
    /// secondary entries to a bucket with room for all of them.
    fn displace(&mut self, bucket: usize) -> Result<(), BucketFull> {
        let mut groups: Vec<Group> = Vec::new();
        for (slot, pair) in self.buckets[bucket].occupied() {
            let home = self.home_of(pair.hash);
            if home == bucket {
                continue;
            }
            let tag = hashing::tag(pair.hash);
            match groups.iter_mut().find(|g| g.home == home && g.tag == tag) {
                Some(group) => group.slots.push(slot),
                None => groups.push(Group {
                    home,
                    tag,
                    slots: vec![slot],
                }),
            }
        }

        for group in groups {
            let func = self.best_func(group.home, group.tag);
            let dest = self.secondary_of(group.home, group.tag, func);
            if dest == bucket || self.buckets[dest].empty_slot_count() < group.slots.len() {
                continue;
            }

            let moved = group.slots.len();
            for slot in group.slots {
                let Some(pair) = self.buckets[bucket].take_slot(slot) else {
                    invariant_violation(format_args!("slot {slot} of bucket {bucket} emptied twice"));
                };
                if self.buckets[dest].insert_if_empty(pair).is_err() {
                    invariant_violation(format_args!(
                        "bucket {dest} ran out of slots while receiving displaced entries"
                    ));
                }
            }
            self.buckets[group.home].set_redirect(group.tag, func);
            log::trace!(
                "displaced {moved} entries of home {} tag {} from bucket {bucket} to {dest}",
                group.home,
                group.tag
            );
            return Ok(());
        }

        Err(BucketFull { bucket })
    }

    /// Secondary function whose candidate bucket has the most empty slots;
    /// ties go to the lowest function index.
    fn best_func(&self, home: usize, tag: usize) -> usize {
        (0..R_FUNC_COUNT)
            .min_by_key(|&func| {
                Reverse(self.buckets[self.secondary_of(home, tag, func)].empty_slot_count())
            })
            .unwrap_or(0)
    }

    /// Doubles the bucket count, then moves every entry, followed by
    /// `pending`, into the new array.
    #[cold]
    fn grow_and_place(&mut self, pending: Pair<K, V>) {
        let from = self.buckets.len();
        let Some(to) = from.checked_mul(2) else {
            invariant_violation(format_args!("bucket count overflow growing from {from}"));
        };
        log::debug!(
            "horton map full with {} entries in {from} buckets; growing to {to}",
            self.len
        );

        let old = mem::replace(&mut self.buckets, Self::allocate(to, self.bucket_capacity));
        let pairs = old
            .into_iter()
            .flat_map(Bucket::into_pairs)
            .chain(core::iter::once(pending));
        for pair in pairs {
            if self.place(pair).is_err() {
                invariant_violation(format_args!("no room for an entry right after growing to {to} buckets"));
            }
        }
    }
}

impl<K, V, S> fmt::Debug for HortonMap<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> Extend<(K, V)> for HortonMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for HortonMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::with_hasher(S::default());
        map.extend(iter);
        map
    }
}

impl<'a, K, V, S> IntoIterator for &'a HortonMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V, S> IntoIterator for &'a mut HortonMap<K, V, S> {
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

/// Iterator over the entries of a `HortonMap`.
pub struct Iter<'a, K, V> {
    buckets: core::slice::Iter<'a, Bucket<K, V>>,
    slots: core::slice::Iter<'a, Option<Pair<K, V>>>,
    remaining: usize,
}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Self {
            buckets: self.buckets.clone(),
            slots: self.slots.clone(),
            remaining: self.remaining,
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            for slot in self.slots.by_ref() {
                if let Some(p) = slot {
                    self.remaining -= 1;
                    return Some((&p.key, &p.value));
                }
            }
            self.slots = self.buckets.next()?.slots().iter();
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
impl<K, V> FusedIterator for Iter<'_, K, V> {}

/// Iterator over the entries of a `HortonMap` with mutable values.
pub struct IterMut<'a, K, V> {
    buckets: core::slice::IterMut<'a, Bucket<K, V>>,
    slots: core::slice::IterMut<'a, Option<Pair<K, V>>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            for slot in self.slots.by_ref() {
                if let Some(p) = slot {
                    self.remaining -= 1;
                    return Some((&p.key, &mut p.value));
                }
            }
            self.slots = self.buckets.next()?.slots_mut().iter_mut();
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}
impl<K, V> FusedIterator for IterMut<'_, K, V> {}

#[cfg(test)]
impl<K, V, S> HortonMap<K, V, S>
where
    K: Eq + Hash + fmt::Debug,
    S: BuildHasher,
{
    pub(crate) fn bucket(&self, index: usize) -> &Bucket<K, V> {
        &self.buckets[index]
    }

    pub(crate) fn try_place(&mut self, key: K, value: V) -> Result<(), K> {
        let hash = self.hashes.hash_key(&key);
        match self.place(Pair { key, value, hash }) {
            Ok(()) => {
                self.len += 1;
                Ok(())
            }
            Err(Full(pair)) => Err(pair.key),
        }
    }

    /// (bucket, slot) of every stored key.
    pub(crate) fn positions(&self) -> Vec<(&K, usize, usize)> {
        self.buckets
            .iter()
            .enumerate()
            .flat_map(|(b, bucket)| bucket.occupied().map(move |(s, p)| (&p.key, b, s)))
            .collect()
    }

    /// Whether `key` sits outside its home bucket.
    pub(crate) fn is_secondary<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hashes.hash_key(key);
        match self.locate(hash, key).1 {
            Some(at) => at.bucket != self.home_of(hash),
            None => panic!("key not present"),
        }
    }

    /// Checks the structural invariants: cached hashes are current, every
    /// stored pair is found by lookup at exactly its own position (so keys
    /// are unique and secondaries are reachable through their redirect),
    /// layouts expose the right capacity, and `len` is exact.
    pub(crate) fn assert_invariants(&self) {
        let mut count = 0;
        for (b, bucket) in self.buckets.iter().enumerate() {
            let expected = if bucket.is_redirecting() {
                self.bucket_capacity - 1
            } else {
                self.bucket_capacity
            };
            assert_eq!(bucket.capacity(), expected, "bucket {b} capacity");
            for (s, pair) in bucket.occupied() {
                count += 1;
                assert_eq!(pair.hash, self.hashes.hash_key(&pair.key), "stale hash");
                let (_, found) = self.locate(pair.hash, &pair.key);
                assert_eq!(
                    found,
                    Some(SlotRef { bucket: b, slot: s }),
                    "key {:?} not reachable at its own slot",
                    pair.key
                );
            }
        }
        assert_eq!(count, self.len, "len out of sync");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::hash::Hasher;

    /// Hashes a `u64` to itself so tests can pick home buckets directly.
    #[derive(Clone, Copy, Default)]
    struct IdentityBuildHasher;
    #[derive(Default)]
    struct IdentityHasher(u64);
    impl BuildHasher for IdentityBuildHasher {
        type Hasher = IdentityHasher;
        fn build_hasher(&self) -> Self::Hasher {
            IdentityHasher(0)
        }
    }
    impl Hasher for IdentityHasher {
        fn write(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.0 = (self.0 << 8) | u64::from(b);
            }
        }
        fn write_u64(&mut self, n: u64) {
            self.0 = n;
        }
        fn finish(&self) -> u64 {
            self.0
        }
    }

    type IdMap = HortonMap<u64, u64, IdentityBuildHasher>;

    fn id_map(buckets: usize, capacity: usize) -> IdMap {
        HortonMap::with_buckets_and_hasher(buckets, capacity, IdentityBuildHasher).unwrap()
    }

    /// Invariant: A new map is empty with the default geometry.
    #[test]
    fn new_map_defaults() {
        let m: HortonMap<String, i32> = HortonMap::new();
        assert!(m.is_empty());
        assert_eq!(m.len(), 0);
        assert_eq!(m.bucket_count(), DEFAULT_BUCKETS);
        assert_eq!(m.bucket_capacity(), DEFAULT_BUCKET_CAPACITY);
        assert_eq!(m.load_factor(), 0.0);
        assert!(m.get("missing").is_none());
        m.assert_invariants();
    }

    /// Invariant: Degenerate geometry is rejected at construction.
    #[test]
    fn degenerate_geometry_rejected() {
        assert_eq!(
            id_map_result(0, 4).err(),
            Some(ConfigError::NoBuckets)
        );
        assert_eq!(
            id_map_result(4, 1).err(),
            Some(ConfigError::BucketCapacityTooSmall { capacity: 1 })
        );
        assert_eq!(
            id_map_result(4, 0).err(),
            Some(ConfigError::BucketCapacityTooSmall { capacity: 0 })
        );
        assert!(id_map_result(1, MIN_BUCKET_CAPACITY).is_ok());
    }

    fn id_map_result(buckets: usize, capacity: usize) -> Result<IdMap, ConfigError> {
        HortonMap::with_buckets_and_hasher(buckets, capacity, IdentityBuildHasher)
    }

    /// Invariant: Buckets that never host secondary entries stay plain and
    /// report the full capacity, even when every slot is used.
    #[test]
    fn primary_only_buckets_stay_plain() {
        let mut m = id_map(4, 4);
        for k in 0..16u64 {
            assert_eq!(m.insert(k, k * 10), None);
        }
        assert_eq!(m.bucket_count(), 4, "exact fit must not grow");
        assert_eq!(m.load_factor(), 1.0);
        for b in 0..4 {
            assert!(!m.bucket(b).is_redirecting());
            assert_eq!(m.bucket(b).capacity(), 4);
            assert_eq!(m.bucket(b).empty_slot_count(), 0);
        }
        for k in 0..16u64 {
            assert_eq!(m.get(&k), Some(&(k * 10)));
            assert!(!m.is_secondary(&k));
        }
        m.assert_invariants();
    }

    /// Invariant: Overflowing a home bucket converts it to redirect-bearing
    /// (capacity C - 1) and the overflow lands in another bucket, still
    /// reachable through the redirect list.
    #[test]
    fn overflow_converts_home_bucket() {
        let mut m = id_map(8, 3);
        // Home bucket 0 takes 0, 8, 16; the fourth key overflows it.
        for k in [0u64, 8, 16, 24] {
            m.insert(k, k + 1);
        }
        assert_eq!(m.bucket_count(), 8);
        assert!(m.bucket(0).is_redirecting());
        assert_eq!(m.bucket(0).capacity(), 2);
        let secondaries: Vec<u64> = [0u64, 8, 16, 24]
            .into_iter()
            .filter(|k| m.is_secondary(k))
            .collect();
        assert_eq!(secondaries.len(), 2, "evicted entry and the new key");
        assert!(secondaries.contains(&0), "the first primary entry moved out");
        for k in [0u64, 8, 16, 24] {
            assert_eq!(m.get(&k), Some(&(k + 1)));
        }
        // Untouched buckets keep their plain layout.
        for b in 1..8 {
            assert_eq!(m.bucket(b).capacity(), 3);
        }
        m.assert_invariants();
    }

    /// Invariant: When the evicted entry cannot be placed elsewhere the
    /// conversion is rolled back, restoring the plain layout and the exact
    /// original slot order; the caller gets the key back as full.
    #[test]
    fn failed_conversion_rolls_back() {
        // With a single bucket every secondary function points back home.
        let mut m = id_map(1, 3);
        for k in [0u64, 1, 2] {
            m.insert(k, k);
        }
        let before: Vec<(u64, usize, usize)> =
            m.positions().into_iter().map(|(k, b, s)| (*k, b, s)).collect();

        assert_eq!(m.try_place(3, 3), Err(3));
        assert!(!m.bucket(0).is_redirecting());
        assert_eq!(m.bucket(0).capacity(), 3);
        assert_eq!(m.bucket(0).slot(0).map(|p| (p.key, p.value)), Some((0, 0)));
        let after: Vec<(u64, usize, usize)> =
            m.positions().into_iter().map(|(k, b, s)| (*k, b, s)).collect();
        assert_eq!(before, after);
        m.assert_invariants();

        // The public path absorbs the same condition by growing.
        assert_eq!(m.insert(3, 3), None);
        assert_eq!(m.bucket_count(), 2);
        for k in 0..4u64 {
            assert_eq!(m.get(&k), Some(&k));
        }
        m.assert_invariants();
    }

    /// Invariant: A bucket whose slot 0 hosts another home's secondary
    /// entry converts by evicting one of its own primaries; the hosted
    /// entry stays put and stays reachable through its own home.
    #[test]
    fn conversion_keeps_hosted_secondary_in_place() {
        let mut m = id_map(4, 3);
        let keys = [43u64, 8, 18, 4, 50, 6, 34, 13, 49];
        for (i, &k) in keys[..8].iter().enumerate() {
            m.insert(k, i as u64);
        }
        // Bucket 1 is full and plain: 18 and 34 belong to home 2, 13 is its own.
        assert!(!m.bucket(1).is_redirecting());
        assert_eq!(m.bucket(1).empty_slot_count(), 0);
        assert_eq!(m.bucket(1).slot(0).map(|p| p.key), Some(18));
        assert!(m.is_secondary(&18) && m.is_secondary(&34));
        assert!(!m.is_secondary(&13));

        m.insert(49, 8);
        assert_eq!(m.bucket_count(), 4, "conversion, not growth, made room");
        assert!(m.bucket(1).is_redirecting());
        let at: HashMap<u64, usize> =
            m.positions().into_iter().map(|(k, b, _)| (*k, b)).collect();
        assert_eq!(at[&18], 1);
        assert_eq!(at[&34], 1);
        assert_ne!(at[&13], 1, "bucket 1's own primary was evicted");
        assert!(m.is_secondary(&13) && m.is_secondary(&49));
        for (i, k) in keys.iter().enumerate() {
            assert_eq!(m.get(k), Some(&(i as u64)), "key {k}");
        }
        m.assert_invariants();
    }

    /// Invariant: A rolled-back conversion that had to move a primary into
    /// slot 0 puts it back, so the plain layout is exactly as before.
    #[test]
    fn rollback_restores_slot_order_after_swap() {
        let mut m = id_map(2, 3);
        for (i, k) in [6u64, 4, 52, 34, 63].into_iter().enumerate() {
            m.insert(k, i as u64);
        }
        assert_eq!(m.bucket_count(), 2);
        // 6 and 34 are hosted for home 0; 63 is bucket 1's only primary.
        let slots = |m: &IdMap| -> Vec<Option<u64>> {
            m.bucket(1).slots().iter().map(|s| s.as_ref().map(|p| p.key)).collect()
        };
        assert_eq!(slots(&m), vec![Some(6), Some(34), Some(63)]);

        assert_eq!(m.try_place(23, 5), Err(23));
        assert!(!m.bucket(1).is_redirecting());
        assert_eq!(slots(&m), vec![Some(6), Some(34), Some(63)]);
        m.assert_invariants();

        assert_eq!(m.insert(23, 5), None);
        assert_eq!(m.bucket_count(), 4);
        for (i, k) in [6u64, 4, 52, 34, 63, 23].into_iter().enumerate() {
            assert_eq!(m.get(&k), Some(&(i as u64)));
        }
        m.assert_invariants();
    }

    /// Invariant: A full plain bucket holding only other homes' entries
    /// cannot convert and reports full instead of evicting one of them.
    #[test]
    fn bucket_without_primaries_reports_full() {
        let mut m = id_map(2, 3);
        let keys = [23u64, 41, 15, 29, 39];
        for (i, &k) in keys.iter().enumerate() {
            m.insert(k, i as u64);
        }
        // Bucket 0 is full of entries whose home is bucket 1.
        assert!(!m.bucket(0).is_redirecting());
        assert_eq!(m.bucket(0).empty_slot_count(), 0);
        assert!(m.bucket(0).pairs().all(|p| p.key % 2 == 1));
        let before: Vec<(u64, usize, usize)> =
            m.positions().into_iter().map(|(k, b, s)| (*k, b, s)).collect();

        assert_eq!(m.try_place(44, 5), Err(44));
        assert!(!m.bucket(0).is_redirecting());
        let after: Vec<(u64, usize, usize)> =
            m.positions().into_iter().map(|(k, b, s)| (*k, b, s)).collect();
        assert_eq!(before, after);
        m.assert_invariants();

        assert_eq!(m.insert(44, 5), None);
        assert_eq!(m.bucket_count(), 4);
        for (i, k) in keys.iter().chain([44u64].iter()).enumerate() {
            assert_eq!(m.get(k), Some(&(i as u64)));
        }
        m.assert_invariants();
    }

    /// Invariant: Growth doubles the bucket count and keeps every entry.
    #[test]
    fn growth_doubles_and_preserves() {
        let mut m = id_map(1, 2);
        for k in 0..64u64 {
            m.insert(k, !k);
            m.assert_invariants();
            assert!(m.bucket_count().is_power_of_two());
            for j in 0..=k {
                assert_eq!(m.get(&j), Some(&!j));
            }
        }
        assert_eq!(m.len(), 64);
        assert!(m.bucket_count() >= 32);
    }

    /// Invariant: Updating an existing key changes only its value: no
    /// entry moves and no bucket changes layout.
    #[test]
    fn update_in_place_keeps_structure() {
        let mut m = id_map(4, 3);
        for k in 0..12u64 {
            m.insert(k * 4, k);
        }
        let before: Vec<(u64, usize, usize)> =
            m.positions().into_iter().map(|(k, b, s)| (*k, b, s)).collect();
        let buckets = m.bucket_count();
        for k in 0..12u64 {
            assert_eq!(m.insert(k * 4, k + 100), Some(k));
        }
        let after: Vec<(u64, usize, usize)> =
            m.positions().into_iter().map(|(k, b, s)| (*k, b, s)).collect();
        assert_eq!(before, after);
        assert_eq!(m.bucket_count(), buckets);
        assert_eq!(m.len(), 12);
        for k in 0..12u64 {
            assert_eq!(m.get(&(k * 4)), Some(&(k + 100)));
        }
    }

    /// Invariant: Without a resize, an entry that was primary stays in its
    /// home bucket unless that bucket just converted and evicted it; every
    /// value is unchanged by relocation.
    #[test]
    fn relocation_never_moves_settled_primaries() {
        let mut m = id_map(16, 4);
        let mut model: HashMap<u64, u64> = HashMap::new();
        let mut x = 0x2545_F491_4F6C_DD1Du64;
        for i in 0..2_000u64 {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            let key = x % 5_000;

            let buckets = m.bucket_count();
            let was_redirecting: Vec<bool> =
                (0..buckets).map(|b| m.bucket(b).is_redirecting()).collect();
            let primaries: Vec<u64> = m
                .positions()
                .into_iter()
                .filter(|&(k, b, _)| (*k % buckets as u64) as usize == b)
                .map(|(k, _, _)| *k)
                .collect();

            m.insert(key, i);
            model.insert(key, i);

            if m.bucket_count() == buckets {
                let converted = (0..buckets)
                    .filter(|&b| !was_redirecting[b] && m.bucket(b).is_redirecting())
                    .count();
                let left_home = primaries.iter().filter(|k| m.is_secondary(*k)).count();
                assert!(left_home <= converted, "a settled primary entry moved");
            }
            for (k, v) in &model {
                assert_eq!(m.get(k), Some(v));
            }
        }
        m.assert_invariants();
    }

    /// Invariant: Displacement frees a full bucket by moving a whole
    /// secondary group to one new bucket and repointing its redirect entry;
    /// nothing else moves and no value changes.
    #[test]
    fn displacement_moves_secondary_group() {
        let mut m = id_map(8, 3);
        for n in 0..16u64 {
            m.insert(n * 4 + 2, n);
        }
        assert_eq!(m.bucket_count(), 8);
        // 54 and 62 share home 6 and a tag, and overflowed into bucket 5.
        let tag = hashing::tag(54);
        assert_eq!(tag, hashing::tag(62));
        assert!(m.is_secondary(&54) && m.is_secondary(&62));
        let old_func = m.bucket(6).redirect(tag);
        let before: HashMap<u64, usize> =
            m.positions().into_iter().map(|(k, b, _)| (*k, b)).collect();

        m.insert(66, 16);
        assert_eq!(m.bucket_count(), 8, "displacement, not growth, made room");
        let after: HashMap<u64, usize> =
            m.positions().into_iter().map(|(k, b, _)| (*k, b)).collect();
        let mut moved: Vec<(u64, usize, usize)> = before
            .iter()
            .filter(|&(k, b)| after[k] != *b)
            .map(|(k, b)| (*k, *b, after[k]))
            .collect();
        moved.sort_unstable();
        assert_eq!(moved, vec![(54, 5, 7), (62, 5, 7)]);
        assert_ne!(m.bucket(6).redirect(tag), old_func);
        assert_eq!(m.get(&54), Some(&13));
        assert_eq!(m.get(&62), Some(&15));
        assert_eq!(m.get(&66), Some(&16));
        m.assert_invariants();
    }

    /// Invariant: Best-fit selection prefers the emptiest candidate and
    /// breaks ties toward the lowest function index.
    #[test]
    fn best_func_prefers_emptiest_then_lowest_index() {
        let mut m = id_map(64, 4);
        // All candidates empty: lowest index wins.
        assert_eq!(m.best_func(3, 5), 0);

        // Fill function 0's candidate; the next distinct candidate wins.
        let first = m.secondary_of(3, 5, 0);
        for s in 0..4u64 {
            m.buckets[first]
                .insert_if_empty(Pair {
                    key: 1_000 + s,
                    value: 0,
                    hash: first as u64,
                })
                .unwrap_or_else(|_| panic!("room"));
        }
        let best = m.best_func(3, 5);
        let chosen = m.secondary_of(3, 5, best);
        assert_ne!(chosen, first);
        assert_eq!(m.buckets[chosen].empty_slot_count(), 4);
        for func in 0..best {
            assert_eq!(
                m.secondary_of(3, 5, func),
                first,
                "an earlier function with an empty candidate was skipped"
            );
        }
    }

    /// Invariant: Lookup statistics separate home-only lookups from those
    /// that read a redirect list, and can be reset.
    #[test]
    fn lookup_stats_track_probe_depth() {
        let mut m = id_map(8, 3);
        for k in [0u64, 8, 16, 24] {
            m.insert(k, k);
        }
        let secondary: Vec<u64> = [0u64, 8, 16, 24]
            .into_iter()
            .filter(|k| m.is_secondary(k))
            .collect();
        let primary: Vec<u64> = [0u64, 8, 16, 24]
            .into_iter()
            .filter(|k| !m.is_secondary(k))
            .collect();
        m.reset_lookup_stats();

        for k in &primary {
            assert!(m.get(k).is_some());
        }
        for k in &secondary {
            assert!(m.get(k).is_some());
        }
        assert!(m.get(&2).is_none());
        assert_eq!(
            m.lookup_stats(),
            LookupStats {
                primary: primary.len() as u64 + 1,
                secondary: secondary.len() as u64,
            }
        );
        m.reset_lookup_stats();
        assert_eq!(m.lookup_stats(), LookupStats::default());
    }

    /// Invariant: `get_mut` edits in place; iteration sees each entry once.
    #[test]
    fn get_mut_and_iteration() {
        let mut m = id_map(2, 2);
        for k in 0..20u64 {
            m.insert(k, k);
        }
        *m.get_mut(&7).unwrap() += 100;
        assert_eq!(m.get(&7), Some(&107));
        assert!(m.get_mut(&99).is_none());

        for (_, v) in m.iter_mut() {
            *v *= 2;
        }
        let mut seen: Vec<(u64, u64)> = m.iter().map(|(k, v)| (*k, *v)).collect();
        seen.sort_unstable();
        let expected: Vec<(u64, u64)> = (0..20u64)
            .map(|k| (k, if k == 7 { 214 } else { k * 2 }))
            .collect();
        assert_eq!(seen, expected);
        assert_eq!(m.iter().len(), 20);
        assert_eq!(m.keys().count(), 20);
        assert_eq!(
            m.values().copied().sum::<u64>(),
            expected.iter().map(|p| p.1).sum::<u64>()
        );
        m.assert_invariants();
    }

    /// Invariant (debug-only): Re-entering the map from `K: Eq` during a
    /// lookup panics; in release builds, this test is skipped.
    #[cfg(debug_assertions)]
    #[test]
    fn reentrancy_panics_from_eq_during_get() {
        #[derive(Clone, Default)]
        struct ConstBuildHasher;
        struct ConstHasher;
        impl BuildHasher for ConstBuildHasher {
            type Hasher = ConstHasher;
            fn build_hasher(&self) -> Self::Hasher {
                ConstHasher
            }
        }
        impl Hasher for ConstHasher {
            fn write(&mut self, _bytes: &[u8]) {}
            fn finish(&self) -> u64 {
                0
            }
        }

        struct ReentryKey {
            id: &'static str,
            map: *const HortonMap<ReentryKey, i32, ConstBuildHasher>,
            trigger: bool,
        }
        impl fmt::Debug for ReentryKey {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.id)
            }
        }
        impl PartialEq for ReentryKey {
            fn eq(&self, other: &Self) -> bool {
                if self.id == other.id {
                    return true;
                }
                if other.trigger {
                    // Reach back into the map mid-lookup.
                    unsafe {
                        let m = &*other.map;
                        let _ = m.contains_key(self.id);
                    }
                }
                false
            }
        }
        impl Eq for ReentryKey {}
        impl Hash for ReentryKey {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }
        impl Borrow<str> for ReentryKey {
            fn borrow(&self) -> &str {
                self.id
            }
        }

        let mut m: HortonMap<ReentryKey, i32, ConstBuildHasher> =
            HortonMap::with_buckets_and_hasher(1, 4, ConstBuildHasher).unwrap();
        let key = ReentryKey {
            id: "a",
            map: &m as *const _,
            trigger: false,
        };
        m.insert(key, 1);

        let query = ReentryKey {
            id: "b",
            map: &m as *const _,
            trigger: true,
        };
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = m.get(&query);
        }));
        assert!(res.is_err(), "expected reentrancy to panic in debug builds");
    }
}
