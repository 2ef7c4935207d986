#![cfg(test)]

// Property tests for HortonMap kept inside the crate so they can check
// bucket-level invariants that the public API does not expose.

use crate::horton_map::HortonMap;
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hasher};

// Key newtype with Borrow<str> to exercise borrowed lookup.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Key(String);
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::borrow::Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// Pool-indexed operations shrink toward earlier keys and shorter pools.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    Get(usize),
    Contains(String),
    Mutate(usize, i32),
    Iterate,
}

fn key_from(pool: &[String], i: usize) -> Key {
    Key(pool[i].clone())
}

// Small tables so that conversion, displacement and growth all happen.
fn arb_geometry() -> impl Strategy<Value = (usize, usize)> {
    (1usize..=4, 4usize..=6)
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,6}", 1..=48).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            4 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            2 => idx.clone().prop_map(OpI::Get),
            1 => prop_oneof![contains_pool, "[a-z]{0,6}"].prop_map(OpI::Contains),
            1 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Mutate(i, d)),
            1 => Just(OpI::Iterate),
        ];
        proptest::collection::vec(op, 1..120).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Property: State-machine equivalence against std::collections::HashMap.
// Invariants exercised across random operation sequences:
// - `insert` returns the previous value exactly when the model had one.
// - `get`/`contains_key` parity, including lookups by borrowed `&str`.
// - `get_mut` edits are visible to later lookups.
// - `iter` yields each entry exactly once; key set equals the model's.
// - After every op: `len` parity, every stored pair reachable at its own
//   slot, layouts sized for their kind, load factor at most 1.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((buckets, capacity) in arb_geometry(), (pool, ops) in arb_scenario()) {
        let mut sut: HortonMap<Key, i32> = HortonMap::with_buckets(buckets, capacity).unwrap();
        let mut model: HashMap<Key, i32> = HashMap::new();

        for op in ops {
            match op {
                OpI::Insert(i, v) => {
                    let k = key_from(&pool, i);
                    let prev = sut.insert(k.clone(), v);
                    prop_assert_eq!(prev, model.insert(k, v));
                }
                OpI::Get(i) => {
                    let k = key_from(&pool, i);
                    prop_assert_eq!(sut.get(&k), model.get(&k));
                }
                OpI::Contains(s) => {
                    let has = sut.contains_key(s.as_str());
                    let has_model = model.keys().any(|k| k.0 == s);
                    prop_assert_eq!(has, has_model);
                }
                OpI::Mutate(i, d) => {
                    let k = key_from(&pool, i);
                    match (sut.get_mut(&k), model.get_mut(&k)) {
                        (Some(vr), Some(mv)) => {
                            *vr = vr.wrapping_add(d);
                            *mv = mv.wrapping_add(d);
                        }
                        (None, None) => {}
                        (s, m) => prop_assert!(false, "get_mut parity: {:?} vs {:?}", s, m),
                    }
                }
                OpI::Iterate => {
                    let s_keys: BTreeSet<_> = sut.keys().cloned().collect();
                    let m_keys: BTreeSet<_> = model.keys().cloned().collect();
                    prop_assert_eq!(sut.iter().count(), model.len());
                    prop_assert_eq!(s_keys, m_keys);
                }
            }

            sut.assert_invariants();
            prop_assert_eq!(sut.len(), model.len());
            prop_assert_eq!(sut.is_empty(), model.is_empty());
            prop_assert!(sut.load_factor() <= 1.0);
            prop_assert!(sut.bucket_count() >= buckets);
            prop_assert!(sut.bucket_count() % buckets == 0);
        }

        for (k, v) in &model {
            prop_assert_eq!(sut.get(k), Some(v));
        }
    }
}

// Identity hashing puts integer keys in predictable home buckets, so
// nearby keys crowd the same buckets and overflow early.
#[derive(Clone, Copy, Default)]
struct IdentityBuildHasher;
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

// Property: Same equivalence and structural invariants as above with
// clustered integer keys. Additionally, values never change as a side
// effect of relocating other entries, and growth only ever doubles.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_clustered_keys(
        (buckets, capacity) in arb_geometry(),
        ops in proptest::collection::vec((0u64..512, any::<u32>()), 1..120),
    ) {
        let mut sut: HortonMap<u64, u32, IdentityBuildHasher> =
            HortonMap::with_buckets_and_hasher(buckets, capacity, IdentityBuildHasher).unwrap();
        let mut model: HashMap<u64, u32> = HashMap::new();

        for (k, v) in ops {
            let before = sut.bucket_count();
            prop_assert_eq!(sut.insert(k, v), model.insert(k, v));
            let after = sut.bucket_count();
            prop_assert!(after == before || after == before * 2, "{} -> {}", before, after);

            sut.assert_invariants();
            prop_assert_eq!(sut.len(), model.len());
            for (mk, mv) in &model {
                prop_assert_eq!(sut.get(mk), Some(mv));
            }
        }

        let mut seen: Vec<(u64, u32)> = sut.iter().map(|(k, v)| (*k, *v)).collect();
        seen.sort_unstable();
        let mut expected: Vec<(u64, u32)> = model.into_iter().collect();
        expected.sort_unstable();
        prop_assert_eq!(seen, expected);
    }
}
