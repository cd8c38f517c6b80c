//! Reference-counted objects with a finalization trap
//!
//! Every long-lived relay entity (TTL tokens, streams, pipes, sessions, session
//! logs) is wrapped in an [`Rco`]. The handle carries an explicit logical
//! reference count: each holder owns exactly one count, taken with
//! [`Rco::incref`] and given back with [`Rco::decref`]. When the count reaches
//! zero the attached destructor runs synchronously, exactly once, and the
//! object switches to its finalized state.
//!
//! A finalized object never executes an operation again. Any call routed
//! through [`Rco::call`] / [`Rco::try_call`] (or another `incref`/`decref`) is
//! reported to the object's [`FaultHandler`] instead. The default handler
//! aborts the process, which turns a use-after-release into an immediate,
//! reproducible failure.
//!
//! Memory stays valid for as long as any handle exists, so the trap is a
//! logical lifetime check, not a guard against dangling pointers.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::error;

/// Receives contract violations detected on reference-counted objects
pub trait FaultHandler: Send + Sync {
    /// Called when `method` is invoked on a destroyed `object`, or when the
    /// object's lifecycle contract is broken in another way.
    fn on_fault(&self, object: &'static str, method: &'static str);
}

/// Default fault handler: log and abort the process
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortOnFault;

impl FaultHandler for AbortOnFault {
    fn on_fault(&self, object: &'static str, method: &'static str) {
        error!(object, method, "method invoked after destruction");
        std::process::abort();
    }
}

/// Fault handler that records violations instead of aborting
///
/// Operations on a finalized object are still suppressed; only the fatal exit
/// is replaced by a counter.
#[derive(Debug, Default)]
pub struct RecordingFaultHandler {
    count: AtomicUsize,
    last: Mutex<Option<(&'static str, &'static str)>>,
}

impl RecordingFaultHandler {
    /// Create a new recording handler
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of faults seen so far
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// The most recent `(object, method)` pair reported
    pub fn last(&self) -> Option<(&'static str, &'static str)> {
        *self.last.lock()
    }
}

impl FaultHandler for RecordingFaultHandler {
    fn on_fault(&self, object: &'static str, method: &'static str) {
        error!(object, method, "method invoked after destruction");
        self.count.fetch_add(1, Ordering::SeqCst);
        *self.last.lock() = Some((object, method));
    }
}

type Destructor<T> = Box<dyn FnOnce(&T) + Send>;

struct RcoInner<T> {
    object: &'static str,
    count: AtomicUsize,
    finalized: AtomicBool,
    attached: AtomicBool,
    dtor: Mutex<Option<Destructor<T>>>,
    faults: Arc<dyn FaultHandler>,
    value: T,
}

/// Handle to a reference-counted object
///
/// Handles are not `Clone`: a new handle is only obtained through
/// [`Rco::incref`], which also takes a count for the new holder.
pub struct Rco<T> {
    inner: Arc<RcoInner<T>>,
}

impl<T: Send + Sync + 'static> Rco<T> {
    /// Wrap `value` with a count of one, using the aborting fault handler
    pub fn new(object: &'static str, value: T) -> Self {
        Self::with_faults(object, value, Arc::new(AbortOnFault))
    }

    /// Wrap `value` with a count of one, reporting faults to `faults`
    pub fn with_faults(object: &'static str, value: T, faults: Arc<dyn FaultHandler>) -> Self {
        Self {
            inner: Arc::new(RcoInner {
                object,
                count: AtomicUsize::new(1),
                finalized: AtomicBool::new(false),
                attached: AtomicBool::new(false),
                dtor: Mutex::new(None),
                faults,
                value,
            }),
        }
    }

    /// Take a new reference for another holder
    ///
    /// A count that already reached zero is never raised again, even while
    /// the destructor is still running.
    pub fn incref(&self) -> Rco<T> {
        if self.trap_if_finalized("incref") {
            return self.alias();
        }
        let mut cur = self.inner.count.load(Ordering::Acquire);
        loop {
            if cur == 0 {
                self.fault("incref");
                break;
            }
            match self.inner.count.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
        self.alias()
    }

    /// Give back one reference; destroys the object when it was the last
    pub fn decref(&self) {
        if self.trap_if_finalized("decref") {
            return;
        }
        let mut cur = self.inner.count.load(Ordering::Acquire);
        loop {
            if cur == 0 {
                self.fault("decref");
                return;
            }
            match self.inner.count.compare_exchange_weak(
                cur,
                cur - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
        if cur == 1 {
            self.finalize();
        }
    }

    /// Attach the destructor run when the count drops to zero
    ///
    /// Exactly one destructor may be attached per object.
    pub fn attach<F>(&self, dtor: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        if self.trap_if_finalized("attach") {
            return;
        }
        if self.inner.attached.swap(true, Ordering::AcqRel) {
            self.fault("attach");
            return;
        }
        *self.inner.dtor.lock() = Some(Box::new(dtor));
    }

    /// Run an operation on the live object
    ///
    /// Returns `None` after reporting a fault if the object was destroyed.
    pub fn try_call<R>(&self, method: &'static str, op: impl FnOnce(&T) -> R) -> Option<R> {
        if self.trap_if_finalized(method) {
            return None;
        }
        Some(op(&self.inner.value))
    }

    /// Run an operation on the live object, yielding `R::default()` if trapped
    pub fn call<R: Default>(&self, method: &'static str, op: impl FnOnce(&T) -> R) -> R {
        self.try_call(method, op).unwrap_or_default()
    }

    /// Current logical reference count
    pub fn refcount(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Whether the destructor has already run
    pub fn is_finalized(&self) -> bool {
        self.inner.finalized.load(Ordering::Acquire)
    }

    /// Name of the wrapped object type, as used in fault reports
    pub fn object_name(&self) -> &'static str {
        self.inner.object
    }

    /// Identity comparison
    pub fn ptr_eq(a: &Rco<T>, b: &Rco<T>) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Non-owning reference that does not hold a count
    pub fn downgrade(&self) -> WeakRco<T> {
        WeakRco {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Copy of the handle that does not take a count
    ///
    /// Used internally where a holder's count is tracked elsewhere, e.g. by
    /// rollback steps that release a reference they already own.
    pub(crate) fn alias(&self) -> Rco<T> {
        Rco {
            inner: Arc::clone(&self.inner),
        }
    }

    fn finalize(&self) {
        let dtor = self.inner.dtor.lock().take();
        if let Some(dtor) = dtor {
            dtor(&self.inner.value);
        }
        self.inner.finalized.store(true, Ordering::Release);
    }

    fn trap_if_finalized(&self, method: &'static str) -> bool {
        // A zero count means the destructor is running or has run
        if self.is_finalized() || self.refcount() == 0 {
            self.fault(method);
            return true;
        }
        false
    }

    fn fault(&self, method: &'static str) {
        self.inner.faults.on_fault(self.inner.object, method);
    }
}

impl<T> fmt::Debug for Rco<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rco")
            .field("object", &self.inner.object)
            .field("count", &self.inner.count.load(Ordering::Relaxed))
            .field("finalized", &self.inner.finalized.load(Ordering::Relaxed))
            .finish()
    }
}

/// Non-owning reference to an [`Rco`]
pub struct WeakRco<T> {
    inner: Weak<RcoInner<T>>,
}

impl<T: Send + Sync + 'static> WeakRco<T> {
    /// Take a counted handle if the object is still live
    pub fn upgrade(&self) -> Option<Rco<T>> {
        let inner = self.inner.upgrade()?;
        let mut cur = inner.count.load(Ordering::Acquire);
        loop {
            if cur == 0 || inner.finalized.load(Ordering::Acquire) {
                return None;
            }
            match inner.count.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(Rco { inner }),
                Err(actual) => cur = actual,
            }
        }
    }
}

impl<T> Clone for WeakRco<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}
