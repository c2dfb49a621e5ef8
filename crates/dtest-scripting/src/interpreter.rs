//! Interpreter lifecycle.
//!
//! ```text
//! Interpreter::initialize ──> start ──> Session::load_and_run ──> teardown
//!   (command module built)    (guard ACTIVE,     (script runs under     (callbacks released,
//!                              runtime created)   the runtime lock)      runtime dropped,
//!                                                                        guard TERMINATED)
//! ```
//!
//! Teardown always runs: explicitly through [`Session::teardown`] or when the
//! session is dropped. It releases every retained callback before the
//! runtime is finalized, so the ledger balances even when the script
//! failed halfway.

use crate::commands::{self, build_module};
use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use crate::guard::{process_lifecycle, ExecutionGuard, LifecycleCell, LifecycleState};
use crate::handle::RefLedger;
use crate::runtime::{RuntimeLimits, ScriptRuntime};
use dtest_core::Orchestrator;
use rhai::Module;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bridge with its command module built, not yet running.
pub struct Interpreter {
    bridge: Arc<BridgeContext>,
    module: Module,
    limits: RuntimeLimits,
    lifecycle: &'static LifecycleCell,
}

impl Interpreter {
    /// Prepare a bridge for `engine` using the process-wide lifecycle.
    pub fn initialize(engine: Arc<dyn Orchestrator>, limits: RuntimeLimits) -> BridgeResult<Self> {
        Self::initialize_in(process_lifecycle(), engine, limits)
    }

    /// Prepare a bridge whose runtime lifecycle lives in `lifecycle`.
    ///
    /// Fails if that lifecycle already ran to completion.
    pub fn initialize_in(
        lifecycle: &'static LifecycleCell,
        engine: Arc<dyn Orchestrator>,
        limits: RuntimeLimits,
    ) -> BridgeResult<Self> {
        if lifecycle.state() == LifecycleState::Terminated {
            return Err(BridgeError::Lifecycle(
                "the script runtime was already finalized".into(),
            ));
        }
        let bridge = BridgeContext::new(engine);
        let module = build_module(&bridge);
        for command in commands::commands() {
            debug!(
                command = command.name,
                availability = %command.availability,
                "registered dtest::{}",
                command.signature()
            );
        }
        Ok(Self {
            bridge,
            module,
            limits,
            lifecycle,
        })
    }

    pub fn bridge(&self) -> &Arc<BridgeContext> {
        &self.bridge
    }

    /// Activate the runtime. Only one session per lifecycle ever starts.
    pub fn start(self) -> BridgeResult<Session> {
        let guard = ExecutionGuard::acquire(self.lifecycle)?;
        let runtime = Arc::new(ScriptRuntime::new(self.module, self.limits));
        self.bridge.attach_runtime(&runtime);
        Ok(Session {
            bridge: self.bridge,
            runtime: Some(runtime),
            guard: Some(guard),
        })
    }
}

/// What teardown gave back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownReport {
    /// Callbacks released by the bridge.
    pub released: usize,
    /// Tests the engine dropped.
    pub discarded: usize,
    /// True if every retained script value was released.
    pub balanced: bool,
}

/// An active runtime bound to one engine.
pub struct Session {
    bridge: Arc<BridgeContext>,
    runtime: Option<Arc<ScriptRuntime>>,
    guard: Option<ExecutionGuard>,
}

impl Session {
    pub fn bridge(&self) -> &Arc<BridgeContext> {
        &self.bridge
    }

    pub fn ledger(&self) -> &Arc<RefLedger> {
        self.bridge.ledger()
    }

    pub fn runtime(&self) -> Option<&Arc<ScriptRuntime>> {
        self.runtime.as_ref()
    }

    /// Read `path` and run it with `ARGV = [path]`.
    pub fn load_and_run(&self, path: &Path) -> BridgeResult<()> {
        let source = std::fs::read_to_string(path).map_err(|source| BridgeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path.display().to_string();
        self.run_source(&name, &source, std::slice::from_ref(&name))
    }

    /// Run script text under the runtime lock.
    ///
    /// A fatal error raised by any command takes precedence over the
    /// script's own result.
    pub fn run_source(&self, name: &str, source: &str, argv: &[String]) -> BridgeResult<()> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| BridgeError::Lifecycle("session already torn down".into()))?;
        let result = {
            let _guard = runtime.lock().acquire();
            runtime.execute(name, source, argv)
        };
        if let Some(fatal) = self.bridge.take_fatal() {
            return Err(fatal);
        }
        result
    }

    /// Process exit status for a script that completed without error:
    /// 0 unless `dtest::run` produced a nonzero code.
    pub fn exit_status(&self) -> i32 {
        match self.bridge.exit_code() {
            Some(code) if code != 0 => 1,
            _ => 0,
        }
    }

    /// Release callbacks, stop leftover processes, drop the runtime and
    /// terminate the lifecycle.
    pub fn teardown(mut self) -> TeardownReport {
        self.shutdown()
    }

    fn shutdown(&mut self) -> TeardownReport {
        let released = self.bridge.release_registrations();
        let discarded = self.bridge.engine().discard_tests();
        self.bridge.engine().terminate();
        self.bridge.detach_runtime();
        if let Some(runtime) = self.runtime.take() {
            runtime.unload();
        }
        if let Some(guard) = self.guard.take() {
            guard.release();
        }

        let ledger = self.bridge.ledger();
        let balanced = ledger.is_balanced();
        if balanced {
            info!(released, discarded, "script runtime finalized");
        } else {
            warn!(
                retained = ledger.retained(),
                released = ledger.released(),
                "script values still referenced at teardown"
            );
        }
        TeardownReport {
            released,
            discarded,
            balanced,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.guard.is_some() {
            self.shutdown();
        }
    }
}
