//! Script closures as native test callbacks.
//!
//! [`ScriptCallable::capture`] retains a Rhai function pointer in a
//! [`ForeignHandle`]. [`ScriptCallable::into_test_fn`] turns it into the
//! closure shape the engine stores. Each invocation re-acquires the
//! runtime lock, hands the round's output lines to the script as an array
//! of strings, and maps any script failure to [`EngineError::Test`].

use crate::error::{BoundaryError, BridgeError, BridgeResult};
use crate::handle::{ForeignHandle, RefLedger};
use crate::runtime::ScriptRuntime;
use dtest_core::{EngineError, Orchestrator, TestFn};
use rhai::{Array, Dynamic, FnPtr};
use std::sync::{Arc, Weak};

/// Something the engine can call with one round of output.
pub trait Invocable: Send + Sync {
    fn invoke(&self, lines: &[String]) -> BridgeResult<()>;
}

/// A retained script function pointer.
#[derive(Debug)]
pub struct ScriptCallable {
    handle: ForeignHandle,
    runtime: Weak<ScriptRuntime>,
}

impl ScriptCallable {
    /// Retain `callable`, which must be a function pointer or closure.
    pub fn capture(
        callable: &Dynamic,
        ledger: &Arc<RefLedger>,
        runtime: Weak<ScriptRuntime>,
    ) -> Result<Self, BoundaryError> {
        if !callable.is::<FnPtr>() {
            return Err(BoundaryError::WrongType {
                param: "callable",
                expected: "a function",
                found: callable.type_name().to_string(),
            });
        }
        Ok(Self {
            handle: ForeignHandle::adopt(callable.clone(), ledger),
            runtime,
        })
    }

    pub fn handle(&self) -> &ForeignHandle {
        &self.handle
    }

    /// Wrap into an engine test closure.
    pub fn into_test_fn(self) -> TestFn {
        Box::new(move |_: &dyn Orchestrator, lines: &[String]| {
            self.invoke(lines)
                .map_err(|e| EngineError::Test(e.to_string()))
        })
    }
}

impl Invocable for ScriptCallable {
    fn invoke(&self, lines: &[String]) -> BridgeResult<()> {
        let runtime = self
            .runtime
            .upgrade()
            .ok_or_else(|| BridgeError::Lifecycle("script runtime is gone".into()))?;
        let callable = self
            .handle
            .get()
            .and_then(|value| value.read_lock::<FnPtr>().map(|f| f.clone()))
            .ok_or_else(|| BridgeError::Lifecycle("test callback was released".into()))?;
        let lines: Array = lines.iter().cloned().map(Dynamic::from).collect();

        let _guard = runtime.lock().acquire();
        runtime.call(&callable, lines)
    }
}
