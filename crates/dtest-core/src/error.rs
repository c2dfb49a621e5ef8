//! Engine error type.
//!
//! Every failure the orchestration engine can report is an [`EngineError`].
//! The scripting bridge treats all of them as run-fatal: they unwind to the
//! driver, are printed on stderr and turn into exit status 1.

use crate::engine::Phase;
use thiserror::Error;

/// Convenience alias for engine results.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// A failed test together with the reason it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFailure {
    /// Human-readable test description given at registration time
    pub description: String,
    /// Restart round the failure happened in (0 = first round)
    pub round: usize,
    /// Failure message raised by the test
    pub message: String,
}

#[derive(Error, Debug)]
pub enum EngineError {
    /// Operation is not legal in the engine's current phase.
    #[error("{operation} is a {required} command, but the engine is in the {actual} phase")]
    Phase {
        operation: &'static str,
        required: Phase,
        actual: Phase,
    },

    #[error("invalid exit code policy '{0}': expected 'all', 'master' or a process number starting from 1")]
    InvalidExitCodePolicy(String),

    #[error("exit code policy selects process {requested}, but only {available} processes were started")]
    PolicyProcessMissing { requested: usize, available: usize },

    #[error("invalid network '{0}': expected <ipv4-address>/<prefix>")]
    InvalidNetwork(String),

    #[error("network {network} cannot hold {size} nodes")]
    NetworkExhausted { network: String, size: usize },

    #[error("cluster of {size} nodes exceeds the limit of {max}")]
    ClusterTooLarge { size: usize, max: usize },

    #[error("cluster name must not be empty")]
    EmptyClusterName,

    #[error("node selection has {got} entries but the cluster has {expected} nodes")]
    SelectionSize { expected: usize, got: usize },

    #[error("empty argument list: nothing to execute")]
    EmptyArguments,

    #[error("failed to spawn '{program}' on node {node}: {source}")]
    Spawn {
        program: String,
        node: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send signal {signal} to pid {pid}: {source}")]
    Signal {
        signal: i32,
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid event pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("event sequence mismatch: pattern '{pattern}' (#{index}) not found after line {after}")]
    EventSequence {
        pattern: String,
        index: usize,
        after: usize,
    },

    /// A test callback reported a failure; carries the callback's own message.
    #[error("{0}")]
    Test(String),

    #[error("{}", format_failures(.0))]
    TestsFailed(Vec<TestFailure>),

    #[error("engine runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

fn format_failures(failures: &[TestFailure]) -> String {
    failures
        .iter()
        .map(|f| {
            if f.round == 0 {
                format!("test '{}' failed: {}", f.description, f.message)
            } else {
                format!(
                    "test '{}' failed (after restart {}): {}",
                    f.description, f.round, f.message
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
