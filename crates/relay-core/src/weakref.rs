//! Non-owning uid lookup tables
//!
//! Streams cross-reference their siblings by uid. The tables here resolve a
//! uid back to a live object without ever holding a count themselves, so an
//! entry never keeps its object alive.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::refcnt::{Rco, WeakRco};

/// uid → object table holding weak references
pub struct WeakRefTable<T> {
    name: &'static str,
    entries: DashMap<u64, WeakRco<T>>,
    capacity: Option<usize>,
    reserved: AtomicUsize,
}

impl<T: Send + Sync + 'static> WeakRefTable<T> {
    /// Create an unbounded table
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            capacity: None,
            reserved: AtomicUsize::new(0),
        }
    }

    /// Create a table that refuses registrations beyond `capacity`
    pub fn with_capacity_limit(name: &'static str, capacity: Option<usize>) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            capacity,
            reserved: AtomicUsize::new(0),
        }
    }

    /// Make `object` resolvable under `uid`
    ///
    /// The capacity is reserved before inserting, so concurrent registrations
    /// never take the table past its limit.
    pub fn register(&self, uid: u64, object: &Rco<T>) -> Result<()> {
        let limit = self.capacity.unwrap_or(usize::MAX);
        let reserved = self
            .reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            });
        if reserved.is_err() {
            return Err(Error::allocation(
                self.name,
                format!("table is full ({} entries)", limit),
            ));
        }
        match self.entries.entry(uid) {
            Entry::Occupied(_) => {
                self.reserved.fetch_sub(1, Ordering::AcqRel);
                Err(Error::DuplicateId(uid))
            }
            Entry::Vacant(slot) => {
                slot.insert(object.downgrade());
                Ok(())
            }
        }
    }

    /// Forget `uid`; returns whether it was present
    pub fn unregister(&self, uid: u64) -> bool {
        let removed = self.entries.remove(&uid).is_some();
        if removed {
            self.reserved.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    /// Counted handle to the live object registered under `uid`
    ///
    /// The caller owns the returned reference and must release it.
    pub fn get_by_uid(&self, uid: u64) -> Option<Rco<T>> {
        let weak = self.entries.get(&uid)?.value().clone();
        weak.upgrade()
    }

    /// Whether `uid` is registered
    pub fn contains(&self, uid: u64) -> bool {
        self.entries.contains_key(&uid)
    }

    /// Number of registered entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refcnt::RecordingFaultHandler;
    use std::sync::Arc;

    #[test]
    fn test_lookup_does_not_own() {
        let faults = Arc::new(RecordingFaultHandler::new());
        let table = WeakRefTable::new("numbers");
        let obj = Rco::with_faults("number", 42u32, faults.clone());
        table.register(7, &obj).unwrap();
        assert_eq!(obj.refcount(), 1);

        let found = table.get_by_uid(7).unwrap();
        assert_eq!(found.call("get", |v| *v), 42);
        assert_eq!(obj.refcount(), 2);
        found.decref();

        obj.decref();
        assert!(table.get_by_uid(7).is_none());
        assert!(table.unregister(7));
        assert_eq!(faults.count(), 0);
    }

    #[test]
    fn test_concurrent_registrations_respect_capacity() {
        let table = WeakRefTable::with_capacity_limit("numbers", Some(64));
        let objects: Vec<Rco<u32>> = (0..256u32).map(|n| Rco::new("number", n)).collect();

        let accepted: usize = std::thread::scope(|scope| {
            let workers: Vec<_> = objects
                .chunks(32)
                .enumerate()
                .map(|(chunk, batch)| {
                    let table = &table;
                    scope.spawn(move || {
                        batch
                            .iter()
                            .enumerate()
                            .filter(|(i, obj)| {
                                let uid = (chunk * 32 + i + 1) as u64;
                                table.register(uid, obj).is_ok()
                            })
                            .count()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).sum()
        });

        assert_eq!(accepted, 64);
        assert_eq!(table.len(), 64);

        // Freed capacity can be taken again, duplicates give theirs back
        let first = (1..=256u64).find(|uid| table.contains(*uid)).unwrap();
        assert!(table.unregister(first));
        let other = (1..=256u64).find(|uid| table.contains(*uid)).unwrap();
        assert!(matches!(
            table.register(other, &objects[0]),
            Err(Error::DuplicateId(_))
        ));
        table.register(first, &objects[0]).unwrap();
        assert!(table.register(1000, &objects[0]).is_err());

        for obj in &objects {
            obj.decref();
        }
    }

    #[test]
    fn test_duplicate_and_capacity() {
        let table = WeakRefTable::with_capacity_limit("numbers", Some(1));
        let a = Rco::new("number", 1u32);
        let b = Rco::new("number", 2u32);

        table.register(1, &a).unwrap();
        assert!(matches!(table.register(1, &b), Err(Error::Allocation { .. })));

        table.unregister(1);
        table.register(1, &a).unwrap();
        let unbounded = WeakRefTable::new("numbers");
        unbounded.register(1, &a).unwrap();
        assert!(matches!(unbounded.register(1, &b), Err(Error::DuplicateId(1))));
        assert_eq!(unbounded.len(), 1);
    }
}
