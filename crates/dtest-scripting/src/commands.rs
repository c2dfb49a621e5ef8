//! Command table and dispatch.
//!
//! The eleven script commands live in one static table. Each entry carries
//! its name, parameter schema, the engine phase it belongs to, a help
//! string and the handler. [`build_module`] installs every entry into a Rhai
//! module once per arity, each overload taking plain `Dynamic` arguments, so
//! arity and type errors come from [`schema::bind`] with uniform messages
//! instead of Rhai's "function not found".
//!
//! # Error routing
//!
//! | Failure                         | Raised into the script as          |
//! |---------------------------------|------------------------------------|
//! | [`BridgeError::Boundary`]       | `ErrorRuntime` (catchable)         |
//! | engine error, `fail`, callbacks | `ErrorTerminated` (not catchable)  |
//!
//! Fatal errors are also recorded on the [`BridgeContext`] so the session
//! fails even if the script somehow continued.

use crate::callback::ScriptCallable;
use crate::context::BridgeContext;
use crate::error::{BoundaryError, BridgeError, BridgeResult};
use crate::events;
use crate::marshal::{
    scalar_to_address, scalar_to_enum, sequence_to_bitmap, sequence_to_string_array,
};
use crate::schema::{self, BoundArgs, ParamKind, ParamSpec, Presence};
use dtest_core::{ArgStream, Cluster, ExitCodePolicy, NodeBitmap, Phase, Signal};
use rhai::{Dynamic, EvalAltResult, FuncRegistration, Module, Position, INT};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Handler signature shared by all commands.
type Handler = fn(&BridgeContext, &BoundArgs) -> BridgeResult<Dynamic>;

/// When a command may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Legal only in this engine phase (checked by the engine).
    Phase(Phase),
    /// Legal at any time.
    Always,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Availability::Phase(phase) => write!(f, "{phase}"),
            Availability::Always => f.write_str("any phase"),
        }
    }
}

/// One entry of the command table.
pub struct Command {
    pub name: &'static str,
    pub params: &'static [ParamSpec],
    pub availability: Availability,
    pub doc: &'static str,
    handler: Handler,
}

impl Command {
    /// `name(param: kind, ...)`
    pub fn signature(&self) -> String {
        let params: Vec<String> = self.params.iter().map(ParamSpec::signature).collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("availability", &self.availability)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Command Table
// =============================================================================

use ParamKind::{Bool, Callable, Int, Sequence, Text, UInt};

const PRE_RUN: Availability = Availability::Phase(Phase::PreRun);
const POST_RUN: Availability = Availability::Phase(Phase::PostRun);

static COMMANDS: [Command; 11] = [
    Command {
        name: "cluster",
        params: &[
            ParamSpec::required("size", UInt),
            ParamSpec::required("name", Text),
            ParamSpec::optional("network", Text),
            ParamSpec::optional("peer_network", Text),
        ],
        availability: PRE_RUN,
        doc: "Define the cluster: `size` nodes named `name1`..`nameN`, optionally \
              addressed from `network` and `peer_network` (a.b.c.d/prefix).",
        handler: cluster,
    },
    Command {
        name: "exit_code",
        params: &[ParamSpec::required("policy", Text)],
        availability: PRE_RUN,
        doc: "Set the exit code policy: \"all\", \"master\" or a 1-based process number.",
        handler: exit_code,
    },
    Command {
        name: "add_process",
        params: &[
            ParamSpec::required("nodes", Sequence),
            ParamSpec::required("args", Sequence),
        ],
        availability: PRE_RUN,
        doc: "Start `args` on every node in `nodes` when the suite runs.",
        handler: add_process,
    },
    Command {
        name: "run_process",
        params: &[
            ParamSpec::required("nodes", Sequence),
            ParamSpec::required("args", Sequence),
        ],
        availability: POST_RUN,
        doc: "Launch `args` on every node in `nodes` while the suite is running.",
        handler: run_process,
    },
    Command {
        name: "kill_node",
        params: &[
            ParamSpec::required("nodes", Sequence),
            ParamSpec::with_default("signal", Int, Presence::DefaultInt(9)),
        ],
        availability: POST_RUN,
        doc: "Send `signal` to the processes on `nodes`. The default is SIGKILL (9), \
              not signal 0, which only checks that a process exists.",
        handler: kill_node,
    },
    Command {
        name: "add_test",
        params: &[
            ParamSpec::required("description", Text),
            ParamSpec::required("callable", Callable),
        ],
        availability: PRE_RUN,
        doc: "Register a test; `callable` receives each round's output lines.",
        handler: add_test,
    },
    Command {
        name: "will_restart",
        params: &[ParamSpec::with_default("restart", Bool, Presence::DefaultBool(true))],
        availability: PRE_RUN,
        doc: "Run the whole suite a second time after the first round.",
        handler: will_restart,
    },
    Command {
        name: "execution_delay",
        params: &[ParamSpec::required("milliseconds", UInt)],
        availability: PRE_RUN,
        doc: "Wait this long between process launches on successive nodes.",
        handler: execution_delay,
    },
    Command {
        name: "run",
        params: &[],
        availability: PRE_RUN,
        doc: "Run the suite; returns the aggregated exit code.",
        handler: run,
    },
    Command {
        name: "fail",
        params: &[ParamSpec::required("message", Text)],
        availability: Availability::Always,
        doc: "Fail the suite with `message`.",
        handler: fail,
    },
    Command {
        name: "expect_event_sequence",
        params: &[
            ParamSpec::required("lines", Sequence),
            ParamSpec::required("patterns", Sequence),
        ],
        availability: Availability::Always,
        doc: "Fail unless the regex `patterns` match `lines` in order.",
        handler: expect_event_sequence,
    },
];

/// Every script command, in table order.
pub fn commands() -> &'static [Command] {
    &COMMANDS
}

pub fn find(name: &str) -> Option<&'static Command> {
    COMMANDS.iter().find(|c| c.name == name)
}

/// Largest accepted call arity: every parameter plus a keyword map.
fn max_arity() -> usize {
    COMMANDS.iter().map(|c| c.params.len()).max().unwrap_or(0) + 1
}

// =============================================================================
// Handlers
// =============================================================================

fn cluster(bridge: &BridgeContext, args: &BoundArgs) -> BridgeResult<Dynamic> {
    let requested = args.int("size")?;
    let size = usize::try_from(requested).map_err(|_| BoundaryError::OutOfRange {
        param: "size",
        value: requested,
    })?;
    let mut cluster = Cluster::new(args.text("name")?);
    if let Some(network) = args.opt_text("network")? {
        cluster = cluster.with_network(scalar_to_address(network)?);
    }
    if let Some(network) = args.opt_text("peer_network")? {
        cluster = cluster.with_peer_network(scalar_to_address(network)?);
    }
    bridge.engine().set_cluster(cluster.generate_nodes(size)?)?;
    Ok(Dynamic::UNIT)
}

fn exit_code(bridge: &BridgeContext, args: &BoundArgs) -> BridgeResult<Dynamic> {
    let policy: ExitCodePolicy = scalar_to_enum(args.text("policy")?)?;
    bridge.engine().set_exit_code_policy(policy)?;
    Ok(Dynamic::UNIT)
}

fn process_request(bridge: &BridgeContext, args: &BoundArgs) -> BridgeResult<(NodeBitmap, ArgStream)> {
    let nodes = sequence_to_bitmap(args.sequence("nodes")?, bridge.engine().cluster_size())?;
    let argv = ArgStream::from(sequence_to_string_array(args.sequence("args")?)?);
    Ok((nodes, argv))
}

fn add_process(bridge: &BridgeContext, args: &BoundArgs) -> BridgeResult<Dynamic> {
    let (nodes, argv) = process_request(bridge, args)?;
    bridge.engine().add_process(nodes, argv)?;
    Ok(Dynamic::UNIT)
}

fn run_process(bridge: &BridgeContext, args: &BoundArgs) -> BridgeResult<Dynamic> {
    let (nodes, argv) = process_request(bridge, args)?;
    bridge.engine().run_process(nodes, argv)?;
    Ok(Dynamic::UNIT)
}

fn kill_node(bridge: &BridgeContext, args: &BoundArgs) -> BridgeResult<Dynamic> {
    let nodes = sequence_to_bitmap(args.sequence("nodes")?, bridge.engine().cluster_size())?;
    let number = args.int("signal")?;
    let signal = i32::try_from(number).map_err(|_| BoundaryError::OutOfRange {
        param: "signal",
        value: number,
    })?;
    bridge.engine().kill_process(nodes, Signal(signal))?;
    Ok(Dynamic::UNIT)
}

fn add_test(bridge: &BridgeContext, args: &BoundArgs) -> BridgeResult<Dynamic> {
    let description = args.text("description")?.to_string();
    let callable = ScriptCallable::capture(args.callable("callable")?, bridge.ledger(), bridge.runtime())?;
    // Released at teardown; if the engine refuses the test it is released here.
    let retained = callable.handle().clone();
    bridge
        .engine()
        .emplace_test(description.clone(), callable.into_test_fn())?;
    bridge.register_test(description, retained);
    Ok(Dynamic::UNIT)
}

fn will_restart(bridge: &BridgeContext, args: &BoundArgs) -> BridgeResult<Dynamic> {
    bridge.engine().will_restart(args.boolean("restart")?)?;
    Ok(Dynamic::UNIT)
}

fn execution_delay(bridge: &BridgeContext, args: &BoundArgs) -> BridgeResult<Dynamic> {
    let millis = u64::try_from(args.int("milliseconds")?).unwrap_or_default();
    bridge.engine().execution_delay(Duration::from_millis(millis))?;
    Ok(Dynamic::UNIT)
}

fn run(bridge: &BridgeContext, _: &BoundArgs) -> BridgeResult<Dynamic> {
    let code = bridge.engine().run()?;
    bridge.set_exit_code(code);
    Ok(Dynamic::from(INT::from(code)))
}

fn fail(_: &BridgeContext, args: &BoundArgs) -> BridgeResult<Dynamic> {
    Err(BridgeError::Failed(args.text("message")?.to_string()))
}

fn expect_event_sequence(_: &BridgeContext, args: &BoundArgs) -> BridgeResult<Dynamic> {
    events::expect_event_sequence(args.sequence("lines")?, args.sequence("patterns")?)?;
    Ok(Dynamic::UNIT)
}

// =============================================================================
// Dispatch
// =============================================================================

/// Validate, run and route the result of one command call.
pub fn dispatch(
    command: &'static Command,
    bridge: &BridgeContext,
    args: Vec<Dynamic>,
) -> Result<Dynamic, Box<EvalAltResult>> {
    debug!(command = command.name, args = args.len(), "dispatch");
    schema::bind(command.params, args)
        .map_err(BridgeError::from)
        .and_then(|bound| (command.handler)(bridge, &bound))
        .map_err(|err| raise(command, bridge, err))
}

fn raise(command: &Command, bridge: &BridgeContext, err: BridgeError) -> Box<EvalAltResult> {
    let message = format!("dtest::{}: {err}", command.name);
    if err.is_boundary() {
        warn!(command = command.name, error = %err, "rejected command arguments");
        return Box::new(EvalAltResult::ErrorRuntime(message.into(), Position::NONE));
    }

    error!(command = command.name, error = %err, "command failed");
    // `fail` reports the user's message verbatim.
    let token = match &err {
        BridgeError::Failed(text) => text.clone(),
        _ => message,
    };
    bridge.record_fatal(err);
    Box::new(EvalAltResult::ErrorTerminated(token.into(), Position::NONE))
}

/// Highest arity [`build_module`] registers.
const REGISTERED_ARITY: usize = 5;

/// Register `command` once per arity from 0 to [`REGISTERED_ARITY`], each
/// overload taking plain `Dynamic` arguments.
fn register(module: &mut Module, command: &'static Command, bridge: &Arc<BridgeContext>) {
    macro_rules! overload {
        ($($arg:ident),*) => {{
            let bridge = Arc::clone(bridge);
            FuncRegistration::new(command.name).set_into_module(
                module,
                move |$($arg: Dynamic),*| -> Result<Dynamic, Box<EvalAltResult>> {
                    dispatch(command, &bridge, vec![$($arg),*])
                },
            );
        }};
    }
    overload!();
    overload!(a);
    overload!(a, b);
    overload!(a, b, c);
    overload!(a, b, c, d);
    overload!(a, b, c, d, e);
}

/// Build the `dtest` module with every command bound to `bridge`.
pub fn build_module(bridge: &Arc<BridgeContext>) -> Module {
    debug_assert!(max_arity() <= REGISTERED_ARITY);
    let mut module = Module::new();
    module.set_id("dtest");
    for command in commands() {
        register(&mut module, command, bridge);
    }
    module
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::describe;
    use dtest_core::mock::RecordingEngine;
    use dtest_core::EngineError;
    use tracing_test::traced_test;

    #[test]
    fn test_table_is_complete() {
        let names: Vec<&str> = commands().iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            [
                "cluster",
                "exit_code",
                "add_process",
                "run_process",
                "kill_node",
                "add_test",
                "will_restart",
                "execution_delay",
                "run",
                "fail",
                "expect_event_sequence",
            ]
        );
        assert!(commands().iter().all(|c| !c.doc.is_empty()));
    }

    #[test]
    fn test_availability() {
        assert_eq!(find("run_process").unwrap().availability, POST_RUN);
        assert_eq!(find("kill_node").unwrap().availability, POST_RUN);
        assert_eq!(find("add_test").unwrap().availability, PRE_RUN);
        assert_eq!(find("fail").unwrap().availability, Availability::Always);
        assert!(find("spawn").is_none());
    }

    #[test]
    fn test_signature() {
        assert_eq!(
            find("kill_node").unwrap().signature(),
            "kill_node(nodes: array, signal: integer = 9)"
        );
        assert!(find("kill_node").unwrap().doc.contains("SIGKILL (9)"));
        assert_eq!(find("run").unwrap().signature(), "run()");
    }

    #[test]
    fn test_max_arity_covers_keyword_map() {
        assert_eq!(max_arity(), 5);
        assert!(max_arity() <= REGISTERED_ARITY);
    }

    fn bridge() -> (Arc<RecordingEngine>, Arc<BridgeContext>) {
        let engine = Arc::new(RecordingEngine::new());
        let bridge = BridgeContext::new(engine.clone());
        (engine, bridge)
    }

    #[test]
    #[traced_test]
    fn test_boundary_error_raised_as_runtime_error() {
        let (engine, bridge) = bridge();
        let command = find("cluster").unwrap();
        let err = dispatch(command, &bridge, vec![Dynamic::from(2_i64)]).unwrap_err();

        assert!(matches!(*err, EvalAltResult::ErrorRuntime(..)));
        assert!(err.is_catchable());
        assert!(describe(&err).starts_with("dtest::cluster: missing required argument 'name'"));
        assert!(engine.calls().is_empty());
        assert!(bridge.take_fatal().is_none());
        assert!(logs_contain("rejected command arguments"));
    }

    #[test]
    fn test_engine_error_raised_as_termination() {
        let (_, bridge) = bridge();
        let command = find("kill_node").unwrap();
        let nodes = Dynamic::from_array(Vec::new());
        let err = dispatch(command, &bridge, vec![nodes]).unwrap_err();

        assert!(matches!(*err, EvalAltResult::ErrorTerminated(..)));
        assert!(!err.is_catchable());
        assert!(matches!(
            bridge.take_fatal(),
            Some(BridgeError::Engine(EngineError::Phase { .. }))
        ));
    }

    #[test]
    fn test_fail_token_is_verbatim() {
        let (_, bridge) = bridge();
        let err = dispatch(find("fail").unwrap(), &bridge, vec![Dynamic::from("disk full")])
            .unwrap_err();
        assert_eq!(describe(&err), "disk full");
        assert!(matches!(bridge.take_fatal(), Some(BridgeError::Failed(_))));
    }

    #[test]
    fn test_module_dispatches_every_arity() {
        let (engine, bridge) = bridge();
        let mut rhai = rhai::Engine::new();
        rhai.register_static_module("dtest", build_module(&bridge).into());

        rhai.run(
            r#"
            try { dtest::cluster(); } catch (e) {
                if !e.contains("missing required argument 'size'") { throw e; }
            }
            dtest::cluster(#{ size: 2, name: "x" });
            dtest::add_process([0], ["true"], #{});
            dtest::cluster(2, "x", "10.0.0.0/24", #{});
            dtest::cluster(2, "x", "10.0.0.0/24", "10.1.0.0/24", #{});
            "#,
        )
        .unwrap();
        assert_eq!(engine.calls().len(), 4);
        assert!(bridge.take_fatal().is_none());
    }

    #[test]
    fn test_run_records_exit_code() {
        let engine = Arc::new(RecordingEngine::new().with_exit_code(4));
        let bridge = BridgeContext::new(engine);
        let code = dispatch(find("run").unwrap(), &bridge, Vec::new()).unwrap();
        assert_eq!(code.as_int().unwrap(), 4);
        assert_eq!(bridge.exit_code(), Some(4));
    }
}
