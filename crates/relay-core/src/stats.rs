//! Named statistics counters
//!
//! The sink is shared by every session and pipe; updates are deltas so that
//! concurrent writers never need to read-modify-write a counter themselves.

use std::collections::BTreeMap;

use dashmap::DashMap;

/// Counter names updated by the session core
pub mod names {
    /// Sessions successfully constructed
    pub const NSESS_CREATED: &str = "nsess_created";
    /// Sessions destroyed
    pub const NSESS_DESTROYED: &str = "nsess_destroyed";
    /// Sessions expired by the TTL sweep
    pub const NSESS_TIMEOUT: &str = "nsess_timeout";
    /// Sum of session lifetimes in seconds
    pub const TOTAL_DURATION: &str = "total_duration";
}

/// Named integer and floating-point counters
#[derive(Debug, Default)]
pub struct StatsSink {
    counters: DashMap<String, u64>,
    dcounters: DashMap<String, f64>,
}

impl StatsSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to the integer counter `name`
    pub fn update_by_name(&self, name: &str, delta: u64) {
        if let Some(mut counter) = self.counters.get_mut(name) {
            *counter += delta;
            return;
        }
        *self.counters.entry(name.to_string()).or_insert(0) += delta;
    }

    /// Add `delta` to the floating-point counter `name`
    pub fn update_by_name_d(&self, name: &str, delta: f64) {
        if let Some(mut counter) = self.dcounters.get_mut(name) {
            *counter += delta;
            return;
        }
        *self.dcounters.entry(name.to_string()).or_insert(0.0) += delta;
    }

    /// Current value of an integer counter (0 if never updated)
    pub fn get(&self, name: &str) -> u64 {
        self.counters.get(name).map(|c| *c).unwrap_or(0)
    }

    /// Current value of a floating-point counter (0.0 if never updated)
    pub fn get_d(&self, name: &str) -> f64 {
        self.dcounters.get(name).map(|c| *c).unwrap_or(0.0)
    }

    /// Sorted copy of every counter, floating-point ones rendered as text
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for entry in self.counters.iter() {
            out.insert(entry.key().clone(), entry.value().to_string());
        }
        for entry in self.dcounters.iter() {
            out.insert(entry.key().clone(), format!("{:.3}", entry.value()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_and_float_counters() {
        let sink = StatsSink::new();
        assert_eq!(sink.get(names::NSESS_DESTROYED), 0);

        sink.update_by_name(names::NSESS_DESTROYED, 1);
        sink.update_by_name(names::NSESS_DESTROYED, 2);
        sink.update_by_name_d(names::TOTAL_DURATION, 1.5);
        sink.update_by_name_d(names::TOTAL_DURATION, 0.25);

        assert_eq!(sink.get(names::NSESS_DESTROYED), 3);
        assert_eq!(sink.get_d(names::TOTAL_DURATION), 1.75);

        let snap = sink.snapshot();
        assert_eq!(snap.get("nsess_destroyed").map(String::as_str), Some("3"));
        assert_eq!(snap.get("total_duration").map(String::as_str), Some("1.750"));
    }
}
