//! Local Process Engine
//!
//! [`LocalEngine`] runs every cluster node as a set of local child processes.
//! It owns a multi-threaded tokio runtime which supervises the children and
//! captures their output; test callbacks are invoked on the thread that
//! called [`Orchestrator::run`].
//!
//! # Rounds
//!
//! A run has one round, or two when `will_restart(true)` was requested. Each
//! round:
//!
//! 1. launches every startup process on every selected node (node order,
//!    with the execution delay between successive launches),
//! 2. captures stdout and stderr line by line as `"<node>: <line>"`,
//! 3. waits for all startup processes to exit and folds their exit codes
//!    with the exit-code policy,
//! 4. invokes every test with the round's lines (collecting failures),
//! 5. waits for processes launched by tests via `run_process`, then invokes
//!    each test that launched any once more, with their output appended to
//!    the round's lines.
//!
//! Processes started during that second invocation are awaited before the
//! round ends, but their output is not shown to any test. A test that wants
//! to see the output of a process it launched checks for it first:
//!
//! ```text
//! if !lines.iter().any(|l| l == "x1: pong") {
//!     engine.run_process(nodes, ping)?;
//! }
//! ```
//!
//! # Process Environment
//!
//! Each child sees `DTEST_NODE_NAME`, `DTEST_NODE_INDEX` and, when networks
//! are configured, `DTEST_NODE_ADDRESS` / `DTEST_PEER_ADDRESS`.

use crate::cluster::{Cluster, ClusterNode, NodeBitmap};
use crate::engine::{require_phase, Orchestrator, Phase, TestCase, TestFn, TestRegistry};
use crate::error::{EngineError, EngineResult, TestFailure};
use crate::process::{ArgStream, ExitCodePolicy, Signal};
use parking_lot::Mutex;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
struct StartupProcess {
    nodes: NodeBitmap,
    args: ArgStream,
}

#[derive(Debug)]
struct EngineState {
    phase: Phase,
    cluster: Cluster,
    policy: ExitCodePolicy,
    restart: bool,
    delay: Duration,
    processes: Vec<StartupProcess>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            phase: Phase::PreRun,
            cluster: Cluster::default(),
            policy: ExitCodePolicy::default(),
            restart: false,
            delay: Duration::ZERO,
            processes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LiveProcess {
    id: u64,
    node: usize,
    pid: u32,
}

/// Engine that runs cluster nodes as local processes.
pub struct LocalEngine {
    state: Mutex<EngineState>,
    tests: Mutex<TestRegistry>,
    /// Output of the current round, in arrival order
    lines: Arc<Mutex<Vec<String>>>,
    live: Arc<Mutex<Vec<LiveProcess>>>,
    /// Processes launched by tests, awaited at the end of the round
    extra: Mutex<Vec<JoinHandle<i32>>>,
    next_id: AtomicU64,
    runtime: Runtime,
}

impl LocalEngine {
    /// Create an engine with its own supervision runtime.
    pub fn new() -> EngineResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("dtest-supervisor")
            .enable_all()
            .build()?;
        Ok(Self {
            state: Mutex::new(EngineState::default()),
            tests: Mutex::new(TestRegistry::default()),
            lines: Arc::new(Mutex::new(Vec::new())),
            live: Arc::new(Mutex::new(Vec::new())),
            extra: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            runtime,
        })
    }

    /// Number of registered tests.
    pub fn test_count(&self) -> usize {
        self.tests.lock().len()
    }

    /// Number of processes that are currently alive.
    pub fn live_processes(&self) -> usize {
        self.live.lock().len()
    }

    fn check_selection(nodes: &NodeBitmap, cluster: &Cluster) -> EngineResult<()> {
        if nodes.len() != cluster.size() {
            return Err(EngineError::SelectionSize {
                expected: cluster.size(),
                got: nodes.len(),
            });
        }
        Ok(())
    }

    /// Spawn `args` on `node`. Must be called inside the runtime context.
    fn spawn_on(&self, node: &ClusterNode, args: &ArgStream) -> EngineResult<JoinHandle<i32>> {
        let program = args.program().ok_or(EngineError::EmptyArguments)?;
        let mut cmd = Command::new(program);
        cmd.args(args.arguments())
            .env("DTEST_NODE_NAME", &node.name)
            .env("DTEST_NODE_INDEX", node.index.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(address) = node.address {
            cmd.env("DTEST_NODE_ADDRESS", address.to_string());
        }
        if let Some(address) = node.peer_address {
            cmd.env("DTEST_PEER_ADDRESS", address.to_string());
        }

        let mut child = cmd.spawn().map_err(|source| EngineError::Spawn {
            program: program.to_string(),
            node: node.name.clone(),
            source,
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Some(pid) = child.id() {
            self.live.lock().push(LiveProcess {
                id,
                node: node.index,
                pid,
            });
            info!(node = %node.name, pid, command = %args, "process started");
        }

        let stdout = child
            .stdout
            .take()
            .map(|s| tokio::spawn(capture(s, node.name.clone(), Arc::clone(&self.lines))));
        let stderr = child
            .stderr
            .take()
            .map(|s| tokio::spawn(capture(s, node.name.clone(), Arc::clone(&self.lines))));
        let live = Arc::clone(&self.live);
        let node_name = node.name.clone();

        Ok(tokio::spawn(async move {
            let status = child.wait().await;
            for task in [stdout, stderr].into_iter().flatten() {
                let _ = task.await;
            }
            live.lock().retain(|p| p.id != id);
            let code = exit_code(status);
            debug!(node = %node_name, code, "process exited");
            code
        }))
    }

    async fn launch_round(
        &self,
        cluster: &Cluster,
        processes: &[StartupProcess],
        delay: Duration,
    ) -> EngineResult<Vec<i32>> {
        let mut handles = Vec::new();
        for process in processes {
            for (n, index) in process.nodes.selected().enumerate() {
                if n > 0 && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let node = cluster
                    .node(index)
                    .ok_or(EngineError::SelectionSize {
                        expected: cluster.size(),
                        got: process.nodes.len(),
                    })?;
                handles.push(self.spawn_on(node, &process.args)?);
            }
        }

        let mut codes = Vec::with_capacity(handles.len());
        for handle in handles {
            let code = handle
                .await
                .map_err(|e| EngineError::Runtime(std::io::Error::other(e)))?;
            codes.push(code);
        }
        Ok(codes)
    }

    fn drain_extra(&self) {
        let handles = std::mem::take(&mut *self.extra.lock());
        if handles.is_empty() {
            return;
        }
        debug!(count = handles.len(), "waiting for processes launched by tests");
        self.runtime.block_on(async {
            for handle in handles {
                let _ = handle.await;
            }
        });
    }

    fn run_tests(&self, round: usize, failures: &mut Vec<TestFailure>) {
        let lines = self.lines.lock().clone();
        // The registry lock is released before any test runs.
        let tests: Vec<Arc<TestCase>> = self.tests.lock().snapshot();
        let mut follow_up = Vec::new();
        for test in tests {
            let launched = self.extra.lock().len();
            if self.invoke_test(&test, round, &lines, failures)
                && self.extra.lock().len() > launched
            {
                follow_up.push(test);
            }
        }
        self.drain_extra();

        if follow_up.is_empty() {
            return;
        }
        let lines = self.lines.lock().clone();
        for test in follow_up {
            debug!(test = %test.description, round, "invoking test again with the output it caused");
            self.invoke_test(&test, round, &lines, failures);
        }
        self.drain_extra();
    }

    /// Returns true if the test passed.
    fn invoke_test(
        &self,
        test: &TestCase,
        round: usize,
        lines: &[String],
        failures: &mut Vec<TestFailure>,
    ) -> bool {
        debug!(test = %test.description, round, lines = lines.len(), "invoking test");
        match test.invoke(self, lines) {
            Ok(()) => {
                info!(test = %test.description, round, "test passed");
                true
            }
            Err(e) => {
                error!(test = %test.description, round, error = %e, "test failed");
                failures.push(TestFailure {
                    description: test.description.clone(),
                    round,
                    message: e.to_string(),
                });
                false
            }
        }
    }
}

impl Orchestrator for LocalEngine {
    fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    fn cluster_size(&self) -> usize {
        self.state.lock().cluster.size()
    }

    fn set_cluster(&self, cluster: Cluster) -> EngineResult<()> {
        let mut state = self.state.lock();
        require_phase("cluster", Phase::PreRun, state.phase)?;
        info!(name = cluster.name(), size = cluster.size(), "cluster configured");
        state.cluster = cluster;
        Ok(())
    }

    fn set_exit_code_policy(&self, policy: ExitCodePolicy) -> EngineResult<()> {
        let mut state = self.state.lock();
        require_phase("exit_code", Phase::PreRun, state.phase)?;
        state.policy = policy;
        Ok(())
    }

    fn add_process(&self, nodes: NodeBitmap, args: ArgStream) -> EngineResult<()> {
        let mut state = self.state.lock();
        require_phase("add_process", Phase::PreRun, state.phase)?;
        Self::check_selection(&nodes, &state.cluster)?;
        if args.is_empty() {
            return Err(EngineError::EmptyArguments);
        }
        debug!(command = %args, nodes = nodes.count(), "startup process registered");
        state.processes.push(StartupProcess { nodes, args });
        Ok(())
    }

    fn run_process(&self, nodes: NodeBitmap, args: ArgStream) -> EngineResult<()> {
        let cluster = {
            let state = self.state.lock();
            require_phase("run_process", Phase::PostRun, state.phase)?;
            Self::check_selection(&nodes, &state.cluster)?;
            state.cluster.clone()
        };
        if args.is_empty() {
            return Err(EngineError::EmptyArguments);
        }
        let _context = self.runtime.enter();
        for index in nodes.selected() {
            if let Some(node) = cluster.node(index) {
                let handle = self.spawn_on(node, &args)?;
                self.extra.lock().push(handle);
            }
        }
        Ok(())
    }

    fn kill_process(&self, nodes: NodeBitmap, signal: Signal) -> EngineResult<()> {
        {
            let state = self.state.lock();
            require_phase("kill_node", Phase::PostRun, state.phase)?;
            Self::check_selection(&nodes, &state.cluster)?;
        }
        let targets: Vec<LiveProcess> = self
            .live
            .lock()
            .iter()
            .filter(|p| nodes.is_selected(p.node))
            .copied()
            .collect();
        for process in targets {
            info!(pid = process.pid, node = process.node, %signal, "sending signal");
            send_signal(process.pid, signal)?;
        }
        Ok(())
    }

    fn emplace_test(&self, description: String, test: TestFn) -> EngineResult<()> {
        require_phase("add_test", Phase::PreRun, self.phase())?;
        self.tests.lock().push(TestCase::new(description, test));
        Ok(())
    }

    fn will_restart(&self, restart: bool) -> EngineResult<()> {
        let mut state = self.state.lock();
        require_phase("will_restart", Phase::PreRun, state.phase)?;
        state.restart = restart;
        Ok(())
    }

    fn execution_delay(&self, delay: Duration) -> EngineResult<()> {
        let mut state = self.state.lock();
        require_phase("execution_delay", Phase::PreRun, state.phase)?;
        state.delay = delay;
        Ok(())
    }

    fn run(&self) -> EngineResult<i32> {
        let (cluster, processes, policy, delay, rounds) = {
            let mut state = self.state.lock();
            require_phase("run", Phase::PreRun, state.phase)?;
            state.phase = Phase::PostRun;
            (
                state.cluster.clone(),
                state.processes.clone(),
                state.policy,
                state.delay,
                if state.restart { 2 } else { 1 },
            )
        };

        let mut exit_code = 0;
        let mut failures = Vec::new();
        for round in 0..rounds {
            info!(round, processes = processes.len(), "starting round");
            self.lines.lock().clear();
            let codes = self
                .runtime
                .block_on(self.launch_round(&cluster, &processes, delay))?;
            let round_code = policy.aggregate(&codes)?;
            if exit_code == 0 {
                exit_code = round_code;
            }
            self.run_tests(round, &mut failures);
        }

        if failures.is_empty() {
            info!(exit_code, "run finished");
            Ok(exit_code)
        } else {
            Err(EngineError::TestsFailed(failures))
        }
    }

    fn discard_tests(&self) -> usize {
        self.tests.lock().clear()
    }

    fn terminate(&self) {
        let live: Vec<LiveProcess> = self.live.lock().clone();
        for process in live {
            if let Err(e) = send_signal(process.pid, Signal::KILL) {
                warn!(pid = process.pid, error = %e, "failed to kill process");
            }
        }
    }
}

async fn capture<R>(reader: R, node: String, lines: Arc<Mutex<Vec<String>>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader).lines();
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => lines.lock().push(format!("{}: {}", node, line)),
            Ok(None) => break,
            Err(e) => {
                warn!(node = %node, error = %e, "output capture stopped");
                break;
            }
        }
    }
}

fn exit_code(status: std::io::Result<ExitStatus>) -> i32 {
    match status {
        Ok(status) => status
            .code()
            .unwrap_or_else(|| 128 + status.signal().unwrap_or(0)),
        Err(e) => {
            warn!(error = %e, "failed to wait for process");
            1
        }
    }
}

/// Deliver `signal` to `pid`. A process that already exited is not an error.
#[allow(unsafe_code)]
fn send_signal(pid: u32, signal: Signal) -> EngineResult<()> {
    let raw_pid = match libc::pid_t::try_from(pid) {
        Ok(p) if p > 0 => p,
        _ => return Ok(()),
    };
    // SAFETY: kill(2) takes two plain integers and touches no memory we own.
    let rc = unsafe { libc::kill(raw_pid, signal.number()) };
    if rc == 0 {
        return Ok(());
    }
    let source = std::io::Error::last_os_error();
    if source.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(EngineError::Signal {
        signal: signal.number(),
        pid,
        source,
    })
}
