//! # dtest-scripting
//!
//! Rhai bridge between test scripts and a dtest [`Orchestrator`].
//!
//! Scripts see the engine as the `dtest` module:
//!
//! ```rhai
//! dtest::cluster(2, "x");
//! dtest::add_process([0, 1], ["/bin/sh", "-c", "echo $DTEST_NODE_NAME"]);
//! dtest::add_test("nodes report", |lines| {
//!     dtest::expect_event_sequence(lines, ["^x1: x1$"]);
//! });
//! dtest::run();
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dtest_core::LocalEngine;
//! use dtest_scripting::{Interpreter, RuntimeLimits};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Arc::new(LocalEngine::new()?);
//! let session = Interpreter::initialize(engine, RuntimeLimits::default())?.start()?;
//! session.load_and_run(Path::new("suite.rhai"))?;
//! let status = session.exit_status();
//! session.teardown();
//! # let _ = status;
//! # Ok(())
//! # }
//! ```
//!
//! [`Orchestrator`]: dtest_core::Orchestrator

pub mod callback;
pub mod commands;
pub mod context;
pub mod error;
pub mod events;
pub mod guard;
pub mod handle;
pub mod interpreter;
pub mod marshal;
pub mod runtime;
pub mod schema;

pub use callback::{Invocable, ScriptCallable};
pub use commands::{commands, Availability, Command};
pub use context::BridgeContext;
pub use error::{BoundaryError, BridgeError, BridgeResult};
pub use guard::{ConcurrencyGuard, ExecutionGuard, LifecycleCell, LifecycleState, RuntimeLock};
pub use handle::{ForeignHandle, RefLedger};
pub use interpreter::{Interpreter, Session, TeardownReport};
pub use runtime::{RuntimeLimits, ScriptRuntime};
