//! Shared state of one bridge instance.

use crate::error::BridgeError;
use crate::handle::{ForeignHandle, RefLedger};
use crate::runtime::ScriptRuntime;
use dtest_core::Orchestrator;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};

/// A test callback the bridge keeps alive until teardown.
#[derive(Debug)]
pub struct TestRegistration {
    pub description: String,
    handle: ForeignHandle,
}

impl TestRegistration {
    pub fn handle(&self) -> &ForeignHandle {
        &self.handle
    }
}

/// State every command handler sees.
pub struct BridgeContext {
    engine: Arc<dyn Orchestrator>,
    ledger: Arc<RefLedger>,
    runtime: RwLock<Weak<ScriptRuntime>>,
    registrations: Mutex<Vec<TestRegistration>>,
    fatal: Mutex<Option<BridgeError>>,
    exit_code: Mutex<Option<i32>>,
}

impl BridgeContext {
    pub fn new(engine: Arc<dyn Orchestrator>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            ledger: RefLedger::new(),
            runtime: RwLock::new(Weak::new()),
            registrations: Mutex::new(Vec::new()),
            fatal: Mutex::new(None),
            exit_code: Mutex::new(None),
        })
    }

    pub fn engine(&self) -> &dyn Orchestrator {
        self.engine.as_ref()
    }

    pub fn ledger(&self) -> &Arc<RefLedger> {
        &self.ledger
    }

    pub(crate) fn attach_runtime(&self, runtime: &Arc<ScriptRuntime>) {
        *self.runtime.write() = Arc::downgrade(runtime);
    }

    pub(crate) fn detach_runtime(&self) {
        *self.runtime.write() = Weak::new();
    }

    pub(crate) fn runtime(&self) -> Weak<ScriptRuntime> {
        self.runtime.read().clone()
    }

    pub(crate) fn register_test(&self, description: String, handle: ForeignHandle) {
        self.registrations
            .lock()
            .push(TestRegistration { description, handle });
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Descriptions of the registered tests, in registration order.
    pub fn registered_tests(&self) -> Vec<String> {
        self.registrations
            .lock()
            .iter()
            .map(|r| r.description.clone())
            .collect()
    }

    /// Release every registered callback, returning how many were held.
    pub(crate) fn release_registrations(&self) -> usize {
        let drained: Vec<TestRegistration> = std::mem::take(&mut *self.registrations.lock());
        drained.len()
    }

    /// Remember a fatal error so the session fails even if the script
    /// swallowed it. The most recent one wins.
    pub(crate) fn record_fatal(&self, err: BridgeError) {
        *self.fatal.lock() = Some(err);
    }

    pub(crate) fn take_fatal(&self) -> Option<BridgeError> {
        self.fatal.lock().take()
    }

    pub(crate) fn set_exit_code(&self, code: i32) {
        *self.exit_code.lock() = Some(code);
    }

    /// Exit code of the last `dtest::run`, if the script ran the suite.
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock()
    }
}
