//! Debug-only reentrancy check.
//!
//! `HortonMap` calls user code (`K: Hash`, `K: Eq`) only while hashing and
//! comparing keys at the start of an operation. A key whose `Eq` or `Hash`
//! reaches back into the same map would observe it mid-operation, so debug
//! builds panic on such nested entry. Release builds compile this away.

#[cfg(debug_assertions)]
use core::cell::Cell;
#[cfg(not(debug_assertions))]
use core::marker::PhantomData;

/// Per-map entry tracker. Public entry points hold the returned guard
/// for as long as user code may run: `let _g = self.reentrancy.enter();`.
#[derive(Debug, Default)]
pub(crate) struct DebugReentrancy {
    #[cfg(debug_assertions)]
    active: Cell<bool>,
}

impl DebugReentrancy {
    pub(crate) const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            active: Cell::new(false),
        }
    }

    /// Marks the map as entered. In debug builds, panics if it already is.
    #[inline]
    pub(crate) fn enter(&self) -> Entered<'_> {
        #[cfg(debug_assertions)]
        {
            assert!(
                !self.active.replace(true),
                "reentrancy detected: horton map entered from key Hash/Eq"
            );
            Entered { owner: self }
        }

        #[cfg(not(debug_assertions))]
        {
            Entered { _owner: PhantomData }
        }
    }
}

/// RAII guard returned by `DebugReentrancy::enter`.
pub(crate) struct Entered<'a> {
    #[cfg(debug_assertions)]
    owner: &'a DebugReentrancy,
    #[cfg(not(debug_assertions))]
    _owner: PhantomData<&'a DebugReentrancy>,
}

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        self.owner.active.set(false);
    }
}
