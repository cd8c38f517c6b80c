//! Shared TTL countdown tokens
//!
//! One token is shared by every stream that must expire together (the RTP and
//! RTCP stream of the same side, and in shared TTL mode both sides). The
//! sweep decrements a token once per tick; media activity resets it.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::refcnt::{FaultHandler, Rco};

/// Idle countdown in sweep ticks
#[derive(Debug)]
pub struct Ttl {
    ticks: Mutex<u32>,
}

impl Ttl {
    /// Create a countdown starting at `initial_ticks`
    pub fn new(initial_ticks: u32) -> Self {
        Self {
            ticks: Mutex::new(initial_ticks),
        }
    }

    /// Create a reference-counted token
    pub fn new_shared(initial_ticks: u32, faults: Arc<dyn FaultHandler>) -> Rco<Ttl> {
        Rco::with_faults("ttl", Self::new(initial_ticks), faults)
    }

    /// Count down one tick and return what is left; zero stays zero
    pub fn decr(&self) -> u32 {
        let mut ticks = self.ticks.lock();
        *ticks = ticks.saturating_sub(1);
        *ticks
    }

    /// Keep-alive: restart the countdown at `ticks`
    pub fn reset(&self, ticks: u32) {
        *self.ticks.lock() = ticks;
    }

    /// Ticks left before expiration
    pub fn remaining(&self) -> u32 {
        *self.ticks.lock()
    }

    /// True once the countdown has reached zero
    pub fn is_expired(&self) -> bool {
        self.remaining() == 0
    }
}

/// Drop handles that point at an already-listed token
///
/// Every handle in `tokens` is a counted reference; the duplicates are
/// released, the survivors are returned to the caller who must release them.
pub(crate) fn unique_tokens(tokens: Vec<Rco<Ttl>>) -> Vec<Rco<Ttl>> {
    let mut unique: Vec<Rco<Ttl>> = Vec::with_capacity(tokens.len());
    for token in tokens {
        if unique.iter().any(|seen| Rco::ptr_eq(seen, &token)) {
            token.decref();
        } else {
            unique.push(token);
        }
    }
    unique
}
