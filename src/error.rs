//! Error and outcome types.
//!
//! Only `ConfigError` reaches callers. `Full` and `BucketFull` are ordinary
//! return values inside the insertion path; `insert` absorbs them by growing
//! the table. A broken internal invariant is not recoverable and panics.

use crate::bucket::Pair;
use crate::horton_map::MIN_BUCKET_CAPACITY;
use std::fmt;

/// Rejected construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The table needs at least one bucket.
    NoBuckets,
    /// A bucket must be able to hold its redirect list and at least one pair.
    BucketCapacityTooSmall { capacity: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoBuckets => write!(f, "bucket count must be at least 1"),
            ConfigError::BucketCapacityTooSmall { capacity } => write!(
                f,
                "bucket capacity {} is below the minimum of {}",
                capacity, MIN_BUCKET_CAPACITY
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// No insertion path had room at the current size. Carries the pair back
/// so the caller still owns it.
pub(crate) struct Full<K, V>(pub(crate) Pair<K, V>);

/// Displacement could not free a slot in `bucket`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BucketFull {
    pub(crate) bucket: usize,
}

/// Aborts on a broken table invariant.
#[cold]
#[inline(never)]
#[track_caller]
pub(crate) fn invariant_violation(what: fmt::Arguments<'_>) -> ! {
    panic!("horton map invariant violated: {what}")
}
