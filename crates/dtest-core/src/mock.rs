//! Recording engine for tests.
//!
//! [`RecordingEngine`] implements [`Orchestrator`] without touching the
//! operating system. It records every call, enforces phase legality exactly
//! like [`LocalEngine`](crate::LocalEngine), and delivers scripted output
//! lines to the registered tests when `run` is called.

use crate::cluster::{Cluster, NodeBitmap};
use crate::engine::{require_phase, Orchestrator, Phase, TestCase, TestFn, TestRegistry};
use crate::error::{EngineError, EngineResult, TestFailure};
use crate::process::{ArgStream, ExitCodePolicy, Signal};
use parking_lot::Mutex;
use std::time::Duration;

/// One call received by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    SetCluster { name: String, size: usize },
    ExitCodePolicy(ExitCodePolicy),
    AddProcess { nodes: Vec<usize>, args: Vec<String> },
    RunProcess { nodes: Vec<usize>, args: Vec<String> },
    KillProcess { nodes: Vec<usize>, signal: i32 },
    EmplaceTest(String),
    WillRestart(bool),
    ExecutionDelay(Duration),
    Run,
    DiscardTests(usize),
    Terminate,
}

#[derive(Debug)]
struct MockState {
    phase: Phase,
    cluster: Cluster,
    restart: bool,
    calls: Vec<EngineCall>,
    /// Output delivered per round; the last entry repeats for later rounds
    rounds: Vec<Vec<String>>,
    exit_code: i32,
}

/// In-memory engine that records calls and replays scripted output.
pub struct RecordingEngine {
    state: Mutex<MockState>,
    tests: Mutex<TestRegistry>,
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                phase: Phase::PreRun,
                cluster: Cluster::default(),
                restart: false,
                calls: Vec::new(),
                rounds: Vec::new(),
                exit_code: 0,
            }),
            tests: Mutex::new(TestRegistry::default()),
        }
    }

    /// Lines delivered to the tests in the next round (builder style).
    pub fn with_round_output<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .lock()
            .rounds
            .push(lines.into_iter().map(Into::into).collect());
        self
    }

    /// Exit code `run` returns on success.
    pub fn with_exit_code(self, code: i32) -> Self {
        self.state.lock().exit_code = code;
        self
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().calls.clone()
    }

    pub fn test_count(&self) -> usize {
        self.tests.lock().len()
    }

    fn record(&self, call: EngineCall) {
        self.state.lock().calls.push(call);
    }

    fn pre_run(&self, operation: &'static str) -> EngineResult<()> {
        require_phase(operation, Phase::PreRun, self.phase())
    }

    fn post_run(&self, operation: &'static str) -> EngineResult<()> {
        require_phase(operation, Phase::PostRun, self.phase())
    }

    fn check_selection(&self, nodes: &NodeBitmap) -> EngineResult<()> {
        let expected = self.cluster_size();
        if nodes.len() != expected {
            return Err(EngineError::SelectionSize {
                expected,
                got: nodes.len(),
            });
        }
        Ok(())
    }
}

impl Orchestrator for RecordingEngine {
    fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    fn cluster_size(&self) -> usize {
        self.state.lock().cluster.size()
    }

    fn set_cluster(&self, cluster: Cluster) -> EngineResult<()> {
        self.pre_run("cluster")?;
        self.record(EngineCall::SetCluster {
            name: cluster.name().to_string(),
            size: cluster.size(),
        });
        self.state.lock().cluster = cluster;
        Ok(())
    }

    fn set_exit_code_policy(&self, policy: ExitCodePolicy) -> EngineResult<()> {
        self.pre_run("exit_code")?;
        self.record(EngineCall::ExitCodePolicy(policy));
        Ok(())
    }

    fn add_process(&self, nodes: NodeBitmap, args: ArgStream) -> EngineResult<()> {
        self.pre_run("add_process")?;
        self.check_selection(&nodes)?;
        self.record(EngineCall::AddProcess {
            nodes: nodes.selected().collect(),
            args: args.as_slice().to_vec(),
        });
        Ok(())
    }

    fn run_process(&self, nodes: NodeBitmap, args: ArgStream) -> EngineResult<()> {
        self.post_run("run_process")?;
        self.check_selection(&nodes)?;
        self.record(EngineCall::RunProcess {
            nodes: nodes.selected().collect(),
            args: args.as_slice().to_vec(),
        });
        Ok(())
    }

    fn kill_process(&self, nodes: NodeBitmap, signal: Signal) -> EngineResult<()> {
        self.post_run("kill_node")?;
        self.check_selection(&nodes)?;
        self.record(EngineCall::KillProcess {
            nodes: nodes.selected().collect(),
            signal: signal.number(),
        });
        Ok(())
    }

    fn emplace_test(&self, description: String, test: TestFn) -> EngineResult<()> {
        self.pre_run("add_test")?;
        self.record(EngineCall::EmplaceTest(description.clone()));
        self.tests.lock().push(TestCase::new(description, test));
        Ok(())
    }

    fn will_restart(&self, restart: bool) -> EngineResult<()> {
        self.pre_run("will_restart")?;
        self.record(EngineCall::WillRestart(restart));
        self.state.lock().restart = restart;
        Ok(())
    }

    fn execution_delay(&self, delay: Duration) -> EngineResult<()> {
        self.pre_run("execution_delay")?;
        self.record(EngineCall::ExecutionDelay(delay));
        Ok(())
    }

    fn run(&self) -> EngineResult<i32> {
        let (rounds, outputs, exit_code) = {
            let mut state = self.state.lock();
            require_phase("run", Phase::PreRun, state.phase)?;
            state.phase = Phase::PostRun;
            state.calls.push(EngineCall::Run);
            let rounds = if state.restart { 2 } else { 1 };
            (rounds, state.rounds.clone(), state.exit_code)
        };

        let mut failures = Vec::new();
        for round in 0..rounds {
            let lines = outputs
                .get(round)
                .or_else(|| outputs.last())
                .cloned()
                .unwrap_or_default();
            let tests = self.tests.lock().snapshot();
            for test in tests {
                if let Err(e) = test.invoke(self, &lines) {
                    failures.push(TestFailure {
                        description: test.description.clone(),
                        round,
                        message: e.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(exit_code)
        } else {
            Err(EngineError::TestsFailed(failures))
        }
    }

    fn discard_tests(&self) -> usize {
        let n = self.tests.lock().clear();
        self.record(EngineCall::DiscardTests(n));
        n
    }

    fn terminate(&self) {
        self.record(EngineCall::Terminate);
    }
}
