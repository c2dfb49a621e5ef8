//! Orchestrator Trait - Engine Interface
//!
//! This module defines [`Orchestrator`], the contract between the scripting
//! bridge and a distributed-test engine. The bridge never spawns processes or
//! captures output itself; it forwards validated requests through this trait.
//!
//! # Phases
//!
//! Every engine starts in [`Phase::PreRun`] (topology and definition time).
//! [`Orchestrator::run`] moves it to [`Phase::PostRun`] for good. Definition
//! commands are only legal before `run`, runtime commands (`run_process`,
//! `kill_process`) only after it. Implementations enforce this themselves and
//! report violations as [`EngineError::Phase`].
//!
//! # Re-entrancy
//!
//! All methods take `&self`. Test callbacks are invoked from inside
//! [`Orchestrator::run`] and may call back into the same engine (to launch a
//! process or kill a node), so implementations must not hold internal locks
//! while a test callback runs.

use crate::cluster::{Cluster, NodeBitmap};
use crate::error::{EngineError, EngineResult};
use crate::process::{ArgStream, ExitCodePolicy, Signal};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Legality window of an engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Before `run()`: cluster, processes and tests are being defined.
    PreRun,
    /// During and after `run()`.
    PostRun,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::PreRun => f.write_str("pre-run"),
            Phase::PostRun => f.write_str("post-run"),
        }
    }
}

/// Native test closure: receives the engine and one round's output lines.
pub type TestFn =
    Box<dyn Fn(&dyn Orchestrator, &[String]) -> EngineResult<()> + Send + Sync + 'static>;

/// A registered test.
pub struct TestCase {
    pub description: String,
    test: TestFn,
}

impl TestCase {
    pub fn new(description: impl Into<String>, test: TestFn) -> Self {
        Self {
            description: description.into(),
            test,
        }
    }

    pub fn invoke(&self, engine: &dyn Orchestrator, lines: &[String]) -> EngineResult<()> {
        (self.test)(engine, lines)
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Distributed-test engine driven by the scripting bridge.
pub trait Orchestrator: Send + Sync {
    /// Current phase.
    fn phase(&self) -> Phase;

    /// Number of nodes in the current cluster (0 before `set_cluster`).
    fn cluster_size(&self) -> usize;

    /// Replace the cluster topology. Pre-run only.
    fn set_cluster(&self, cluster: Cluster) -> EngineResult<()>;

    /// Set how process exit codes fold into the run's exit code. Pre-run only.
    fn set_exit_code_policy(&self, policy: ExitCodePolicy) -> EngineResult<()>;

    /// Register a startup process on every selected node. Pre-run only.
    fn add_process(&self, nodes: NodeBitmap, args: ArgStream) -> EngineResult<()>;

    /// Launch a process on every selected node of an active run. Post-run only.
    fn run_process(&self, nodes: NodeBitmap, args: ArgStream) -> EngineResult<()>;

    /// Send `signal` to every live process on the selected nodes. Post-run only.
    fn kill_process(&self, nodes: NodeBitmap, signal: Signal) -> EngineResult<()>;

    /// Register a test callback. Pre-run only.
    fn emplace_test(&self, description: String, test: TestFn) -> EngineResult<()>;

    /// Run everything a second time after the first round. Pre-run only.
    fn will_restart(&self, restart: bool) -> EngineResult<()>;

    /// Delay between process launches on successive nodes. Pre-run only.
    fn execution_delay(&self, delay: Duration) -> EngineResult<()>;

    /// Run the suite and return the aggregated exit code. Pre-run only;
    /// moves the engine to post-run.
    fn run(&self) -> EngineResult<i32>;

    /// Drop every registered test, returning how many were dropped.
    fn discard_tests(&self) -> usize;

    /// Kill every process that is still alive.
    fn terminate(&self);
}

/// Fail with [`EngineError::Phase`] unless `actual == required`.
pub fn require_phase(operation: &'static str, required: Phase, actual: Phase) -> EngineResult<()> {
    if actual == required {
        Ok(())
    } else {
        Err(EngineError::Phase {
            operation,
            required,
            actual,
        })
    }
}

/// Registered tests, shared so `run` can invoke them without holding a lock.
#[derive(Debug, Default)]
pub struct TestRegistry {
    tests: Vec<Arc<TestCase>>,
}

impl TestRegistry {
    pub fn push(&mut self, test: TestCase) {
        self.tests.push(Arc::new(test));
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Cheap copy of the current list for lock-free invocation.
    pub fn snapshot(&self) -> Vec<Arc<TestCase>> {
        self.tests.clone()
    }

    pub fn clear(&mut self) -> usize {
        let n = self.tests.len();
        self.tests.clear();
        n
    }
}
