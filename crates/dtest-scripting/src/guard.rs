//! Execution and concurrency guards.
//!
//! [`ExecutionGuard`] brackets the existence of the script runtime. Its
//! lifecycle is a one-way state machine kept in a [`LifecycleCell`]:
//!
//! ```text
//! UNINITIALIZED --acquire--> ACTIVE --drop/release--> TERMINATED
//! ```
//!
//! A terminated cell can never be re-activated, so the runtime is started
//! at most once per cell. The binary uses the process-wide cell returned by
//! [`process_lifecycle`]; tests create their own `static` cells.
//!
//! [`ConcurrencyGuard`] is the scoped lock every entry into the runtime
//! holds. The lock is re-entrant: a command running under the guard may
//! invoke a test callback that acquires it again on the same thread.

use crate::error::BridgeError;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

// =============================================================================
// Execution Guard
// =============================================================================

const UNINITIALIZED: u8 = 0;
const ACTIVE: u8 = 1;
const TERMINATED: u8 = 2;

/// Runtime lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Active,
    Terminated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Uninitialized => f.write_str("uninitialized"),
            LifecycleState::Active => f.write_str("active"),
            LifecycleState::Terminated => f.write_str("terminated"),
        }
    }
}

/// Storage for one runtime lifecycle.
#[derive(Debug)]
pub struct LifecycleCell {
    state: AtomicU8,
}

impl LifecycleCell {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(UNINITIALIZED),
        }
    }

    pub fn state(&self) -> LifecycleState {
        match self.state.load(Ordering::SeqCst) {
            UNINITIALIZED => LifecycleState::Uninitialized,
            ACTIVE => LifecycleState::Active,
            _ => LifecycleState::Terminated,
        }
    }
}

impl Default for LifecycleCell {
    fn default() -> Self {
        Self::new()
    }
}

static PROCESS_LIFECYCLE: LifecycleCell = LifecycleCell::new();

/// The lifecycle of the process-wide script runtime.
pub fn process_lifecycle() -> &'static LifecycleCell {
    &PROCESS_LIFECYCLE
}

/// Marks the runtime ACTIVE for as long as it lives.
#[derive(Debug)]
pub struct ExecutionGuard {
    cell: &'static LifecycleCell,
}

impl ExecutionGuard {
    /// Move `cell` from UNINITIALIZED to ACTIVE.
    ///
    /// Fails if the runtime is already active or has been finalized.
    pub fn acquire(cell: &'static LifecycleCell) -> Result<Self, BridgeError> {
        cell.state
            .compare_exchange(UNINITIALIZED, ACTIVE, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| {
                BridgeError::Lifecycle(format!(
                    "cannot start the script runtime: it is {}",
                    cell.state()
                ))
            })?;
        tracing::debug!("script runtime active");
        Ok(Self { cell })
    }

    pub fn state(&self) -> LifecycleState {
        self.cell.state()
    }

    /// Finalize the runtime now. Equivalent to dropping the guard.
    pub fn release(self) {}
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.cell.state.store(TERMINATED, Ordering::SeqCst);
        tracing::debug!("script runtime terminated");
    }
}

// =============================================================================
// Concurrency Guard
// =============================================================================

/// Re-entrant lock serializing every entry into the script runtime.
#[derive(Default)]
pub struct RuntimeLock {
    mutex: ReentrantMutex<()>,
    depth: AtomicUsize,
}

impl RuntimeLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the calling thread holds the runtime.
    pub fn acquire(&self) -> ConcurrencyGuard<'_> {
        let inner = self.mutex.lock();
        self.depth.fetch_add(1, Ordering::SeqCst);
        ConcurrencyGuard {
            _inner: inner,
            depth: &self.depth,
        }
    }

    /// Nesting depth of the current holder (0 when free).
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_locked(&self) -> bool {
        self.mutex.is_locked()
    }
}

impl fmt::Debug for RuntimeLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeLock")
            .field("depth", &self.depth())
            .finish()
    }
}

/// Scoped hold on a [`RuntimeLock`]; released on drop.
pub struct ConcurrencyGuard<'a> {
    _inner: ReentrantMutexGuard<'a, ()>,
    depth: &'a AtomicUsize,
}

impl Drop for ConcurrencyGuard<'_> {
    fn drop(&mut self) {
        // Runs before `_inner` unlocks, so the count never goes stale.
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_guard_lifecycle() {
        static CELL: LifecycleCell = LifecycleCell::new();
        assert_eq!(CELL.state(), LifecycleState::Uninitialized);

        let guard = ExecutionGuard::acquire(&CELL).unwrap();
        assert_eq!(guard.state(), LifecycleState::Active);
        assert!(ExecutionGuard::acquire(&CELL).is_err());

        drop(guard);
        assert_eq!(CELL.state(), LifecycleState::Terminated);

        let err = ExecutionGuard::acquire(&CELL).unwrap_err();
        assert!(err.to_string().contains("terminated"));
    }

    #[test]
    fn test_release_terminates() {
        static CELL: LifecycleCell = LifecycleCell::new();
        ExecutionGuard::acquire(&CELL).unwrap().release();
        assert_eq!(CELL.state(), LifecycleState::Terminated);
    }

    #[test]
    fn test_reentrant_acquire() {
        let lock = RuntimeLock::new();
        let outer = lock.acquire();
        assert_eq!(lock.depth(), 1);
        {
            let _inner = lock.acquire();
            assert_eq!(lock.depth(), 2);
        }
        assert_eq!(lock.depth(), 1);
        drop(outer);
        assert_eq!(lock.depth(), 0);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_serializes_threads() {
        let lock = Arc::new(RuntimeLock::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let _guard = lock.acquire();
                        assert_eq!(lock.depth(), 1);
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 400);
    }
}
