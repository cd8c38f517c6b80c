//! Process-wide unique id generator

use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out unique, monotonically increasing 64-bit ids
///
/// One generator is created per process and shared through the
/// [`RelayContext`](crate::context::RelayContext). Ids start at 1 so that 0 can
/// mean "no id" in cross-references.
#[derive(Debug)]
pub struct UidGenerator {
    last: AtomicU64,
}

impl UidGenerator {
    /// Create a generator whose first id is 1
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Next unique id
    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for UidGenerator {
    fn default() -> Self {
        Self::new()
    }
}
