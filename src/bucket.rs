//! Fixed-capacity buckets in their two layouts.
//!
//! A bucket starts `Plain`: every one of its `C` slots may hold a pair.
//! Once it has to track keys stored elsewhere it becomes `Redirecting`,
//! giving up its first slot to a redirect list and keeping `C - 1` slots
//! for pairs. The layout is an enum so that slot 0 can never be read as
//! the wrong kind of cell.

use crate::hashing::{R_FUNC_COUNT, TAG_COUNT};
use core::borrow::Borrow;
use core::mem;

#[derive(Debug)]
pub(crate) struct Pair<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) hash: u64,
}

/// Secondary function chosen per tag; unset until a key with that tag has
/// been placed away from its home bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct RedirectList([Option<u8>; TAG_COUNT]);

impl RedirectList {
    #[inline]
    pub(crate) fn get(&self, tag: usize) -> Option<usize> {
        self.0[tag].map(usize::from)
    }

    #[inline]
    pub(crate) fn set(&mut self, tag: usize, func: usize) {
        debug_assert!(func < R_FUNC_COUNT);
        self.0[tag] = Some(func as u8);
    }
}

type Slots<K, V> = Vec<Option<Pair<K, V>>>;

#[derive(Debug)]
pub(crate) enum Bucket<K, V> {
    Plain(Slots<K, V>),
    Redirecting {
        redirects: RedirectList,
        slots: Slots<K, V>,
    },
}

impl<K, V> Bucket<K, V> {
    pub(crate) fn new(capacity: usize) -> Self {
        Bucket::Plain((0..capacity).map(|_| None).collect())
    }

    #[inline]
    pub(crate) fn slots(&self) -> &[Option<Pair<K, V>>] {
        match self {
            Bucket::Plain(slots) | Bucket::Redirecting { slots, .. } => slots,
        }
    }

    #[inline]
    pub(crate) fn slots_mut(&mut self) -> &mut [Option<Pair<K, V>>] {
        match self {
            Bucket::Plain(slots) | Bucket::Redirecting { slots, .. } => slots,
        }
    }

    /// Number of slots available to pairs in the current layout.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots().len()
    }

    #[inline]
    pub(crate) fn is_redirecting(&self) -> bool {
        matches!(self, Bucket::Redirecting { .. })
    }

    #[inline]
    pub(crate) fn redirects(&self) -> Option<&RedirectList> {
        match self {
            Bucket::Plain(_) => None,
            Bucket::Redirecting { redirects, .. } => Some(redirects),
        }
    }

    pub(crate) fn empty_slot_count(&self) -> usize {
        self.slots().iter().filter(|s| s.is_none()).count()
    }

    /// Stores `pair` in the first empty slot, or hands it back untouched.
    pub(crate) fn insert_if_empty(&mut self, pair: Pair<K, V>) -> Result<(), Pair<K, V>> {
        match self.slots_mut().iter_mut().find(|s| s.is_none()) {
            Some(slot) => {
                *slot = Some(pair);
                Ok(())
            }
            None => Err(pair),
        }
    }

    pub(crate) fn lookup<Q>(&self, hash: u64, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        self.slots().iter().position(|s| {
            s.as_ref()
                .map(|p| p.hash == hash && p.key.borrow() == key)
                .unwrap_or(false)
        })
    }

    #[inline]
    pub(crate) fn slot(&self, index: usize) -> Option<&Pair<K, V>> {
        self.slots().get(index)?.as_ref()
    }

    #[inline]
    pub(crate) fn slot_mut(&mut self, index: usize) -> Option<&mut Pair<K, V>> {
        self.slots_mut().get_mut(index)?.as_mut()
    }

    /// Empties a slot and returns what it held.
    pub(crate) fn take_slot(&mut self, index: usize) -> Option<Pair<K, V>> {
        self.slots_mut().get_mut(index)?.take()
    }

    /// Occupied slots with their indices.
    pub(crate) fn occupied(&self) -> impl Iterator<Item = (usize, &Pair<K, V>)> {
        self.slots()
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|p| (i, p)))
    }

    #[cfg(test)]
    pub(crate) fn pairs(&self) -> impl Iterator<Item = &Pair<K, V>> {
        self.slots().iter().flatten()
    }

    pub(crate) fn into_pairs(self) -> impl Iterator<Item = Pair<K, V>> {
        match self {
            Bucket::Plain(slots) | Bucket::Redirecting { slots, .. } => slots.into_iter().flatten(),
        }
    }

    #[inline]
    pub(crate) fn swap_slots(&mut self, a: usize, b: usize) {
        self.slots_mut().swap(a, b);
    }

    /// Gives up slot 0 to a fresh redirect list and returns whatever slot 0
    /// held. Panics if the bucket is already redirecting.
    pub(crate) fn become_redirecting(&mut self) -> Option<Pair<K, V>> {
        let Bucket::Plain(slots) = self else {
            panic!("bucket is already redirect-bearing");
        };
        let mut slots = mem::take(slots);
        let evicted = slots.remove(0);
        *self = Bucket::Redirecting {
            redirects: RedirectList::default(),
            slots,
        };
        evicted
    }

    /// Undoes `become_redirecting`: drops the redirect list and puts
    /// `evicted` back in slot 0. Panics on a plain bucket.
    pub(crate) fn revert_to_plain(&mut self, evicted: Option<Pair<K, V>>) {
        let Bucket::Redirecting { slots, .. } = self else {
            panic!("bucket is not redirect-bearing");
        };
        let mut slots = mem::take(slots);
        slots.insert(0, evicted);
        *self = Bucket::Plain(slots);
    }

    /// Redirect entry for `tag`. Panics on a plain bucket.
    pub(crate) fn redirect(&self, tag: usize) -> Option<usize> {
        match self {
            Bucket::Redirecting { redirects, .. } => redirects.get(tag),
            Bucket::Plain(_) => panic!("redirect entry read on a plain bucket"),
        }
    }

    /// Records `func` for `tag`. Panics on a plain bucket.
    pub(crate) fn set_redirect(&mut self, tag: usize, func: usize) {
        match self {
            Bucket::Redirecting { redirects, .. } => redirects.set(tag, func),
            Bucket::Plain(_) => panic!("redirect entry written on a plain bucket"),
        }
    }
}
