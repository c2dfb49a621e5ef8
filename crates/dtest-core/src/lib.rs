//! # dtest-core
//!
//! Orchestration engine side of dtest: the [`Orchestrator`] interface the
//! scripting bridge drives, the value types that cross it, and two engines:
//!
//! - [`LocalEngine`] runs cluster nodes as local child processes.
//! - [`mock::RecordingEngine`] records calls and replays scripted output.

pub mod cluster;
pub mod engine;
pub mod error;
pub mod events;
pub mod local;
pub mod mock;
pub mod process;

pub use cluster::{Cluster, ClusterNode, NetworkAddress, NodeBitmap, MAX_CLUSTER_SIZE};
pub use engine::{Orchestrator, Phase, TestCase, TestFn};
pub use error::{EngineError, EngineResult, TestFailure};
pub use events::expect_event_sequence;
pub use local::LocalEngine;
pub use process::{ArgStream, ExitCodePolicy, Signal};
