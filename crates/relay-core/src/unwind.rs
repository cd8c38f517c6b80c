//! Reverse-order rollback for multi-step construction
//!
//! Constructors push one release step per acquired resource. If the
//! constructor returns early the guard is dropped and the steps run newest
//! first; on success [`Unwind::commit`] discards them.

use tracing::debug;

/// Stack of release steps run in reverse order unless committed
pub struct Unwind {
    what: &'static str,
    steps: Vec<(&'static str, Box<dyn FnOnce() + Send>)>,
}

impl Unwind {
    /// Start an empty rollback stack for constructing `what`
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            steps: Vec::new(),
        }
    }

    /// Register the release step for a resource that was just acquired
    pub fn push<F>(&mut self, resource: &'static str, release: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.steps.push((resource, Box::new(release)));
    }

    /// Number of release steps currently armed
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Keep every acquired resource; nothing is released
    pub fn commit(mut self) {
        self.steps.clear();
    }
}

impl Drop for Unwind {
    fn drop(&mut self) {
        while let Some((resource, release)) = self.steps.pop() {
            debug!(what = self.what, resource, "rolling back");
            release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_steps_run_newest_first() {
        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let mut unwind = Unwind::new("test");
            for name in ["first", "second", "third"] {
                let order = order.clone();
                unwind.push(name, move || order.lock().unwrap().push(name));
            }
            assert_eq!(unwind.len(), 3);
        }
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[test]
    fn test_commit_disarms() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut unwind = Unwind::new("test");
        let o = order.clone();
        unwind.push("only", move || o.lock().unwrap().push("only"));
        unwind.commit();
        assert!(order.lock().unwrap().is_empty());
    }
}
