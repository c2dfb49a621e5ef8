//! Owning handles to script values.
//!
//! A [`ForeignHandle`] keeps one script value (typically a closure passed to
//! `dtest::add_test`) alive on the native side. Copying a handle retains the
//! value once more, dropping it releases exactly once, and a moved-from
//! handle is empty and releases nothing.
//!
//! Every retain and release is counted on a shared [`RefLedger`], so a
//! session can prove at teardown that the bridge gave back everything it
//! took.

use rhai::{Array, Dynamic, ImmutableString, Map};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Retain/release counters shared by all handles of one bridge.
#[derive(Debug, Default)]
pub struct RefLedger {
    retained: AtomicUsize,
    released: AtomicUsize,
}

impl RefLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn retained(&self) -> usize {
        self.retained.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// References taken and not yet given back.
    pub fn outstanding(&self) -> usize {
        self.retained().saturating_sub(self.released())
    }

    pub fn is_balanced(&self) -> bool {
        self.retained() == self.released()
    }

    fn retain(&self) {
        self.retained.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct ForeignCell {
    value: Dynamic,
    ledger: Arc<RefLedger>,
}

/// Owning reference to a script value; empty or exactly one reference.
#[derive(Default)]
pub struct ForeignHandle {
    cell: Option<Arc<ForeignCell>>,
}

impl ForeignHandle {
    /// An empty handle.
    pub const fn empty() -> Self {
        Self { cell: None }
    }

    /// Take ownership of `value` as one new reference.
    pub fn adopt(value: Dynamic, ledger: &Arc<RefLedger>) -> Self {
        ledger.retain();
        Self {
            cell: Some(Arc::new(ForeignCell {
                value,
                ledger: Arc::clone(ledger),
            })),
        }
    }

    pub fn is_some(&self) -> bool {
        self.cell.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.cell.is_none()
    }

    /// The held value, if any.
    pub fn get(&self) -> Option<&Dynamic> {
        self.cell.as_deref().map(|cell| &cell.value)
    }

    /// Move the reference out, leaving this handle empty.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Release the held reference now. No-op on an empty handle.
    pub fn release(&mut self) {
        if let Some(cell) = self.cell.take() {
            cell.ledger.release();
        }
    }

    /// Rhai type name of the held value.
    pub fn type_name(&self) -> Option<&'static str> {
        self.get().map(Dynamic::type_name)
    }

    /// Length of a held array, string or map.
    pub fn len(&self) -> Option<usize> {
        let value = self.get()?;
        if let Some(array) = value.read_lock::<Array>() {
            return Some(array.len());
        }
        if let Some(text) = value.read_lock::<ImmutableString>() {
            return Some(text.chars().count());
        }
        if let Some(map) = value.read_lock::<Map>() {
            return Some(map.len());
        }
        None
    }

    /// Number of live handles sharing this value (0 when empty).
    pub fn reference_count(&self) -> usize {
        self.cell.as_ref().map_or(0, Arc::strong_count)
    }

    /// True if both handles refer to the same retained value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.cell, &other.cell) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Clone for ForeignHandle {
    fn clone(&self) -> Self {
        if let Some(cell) = &self.cell {
            cell.ledger.retain();
        }
        Self {
            cell: self.cell.clone(),
        }
    }

    fn clone_from(&mut self, source: &Self) {
        // Retain the new value before releasing the old one.
        let mut copy = source.clone();
        std::mem::swap(self, &mut copy);
    }
}

impl Drop for ForeignHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ForeignHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.type_name() {
            Some(name) => f
                .debug_struct("ForeignHandle")
                .field("type", &name)
                .field("references", &self.reference_count())
                .finish(),
            None => f.write_str("ForeignHandle(empty)"),
        }
    }
}
