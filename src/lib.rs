//! # dtest
//!
//! Distributed unit test runner. A Rhai script describes a cluster, the
//! processes to start on it and the tests to check their output against;
//! [`driver::run_script`] runs it on the local machine.
//!
//! ## Crates
//!
//! - `dtest-core`: engine interface, value types and the local process engine
//! - `dtest-scripting`: the Rhai bridge exposing the `dtest::` commands
//! - `dtest` (this crate): configuration, logging and the command-line driver

pub mod config;
pub mod driver;
pub mod logging;

pub use config::DtestConfig;
pub use driver::run_script;
