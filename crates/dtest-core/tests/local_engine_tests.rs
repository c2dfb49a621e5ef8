//! Local engine tests against real `/bin/sh` processes.
//!
//! Run with: `cargo test -p dtest-core --test local_engine_tests`

use dtest_core::{
    expect_event_sequence, ArgStream, Cluster, EngineError, EngineResult, ExitCodePolicy,
    LocalEngine, NodeBitmap, Orchestrator, Signal,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn sh(script: &str) -> ArgStream {
    ["/bin/sh", "-c", script].into_iter().collect()
}

fn engine_with_nodes(size: usize) -> LocalEngine {
    let engine = LocalEngine::new().unwrap();
    engine
        .set_cluster(Cluster::new("x").generate_nodes(size).unwrap())
        .unwrap();
    engine
}

type Rounds = Arc<Mutex<Vec<Vec<String>>>>;

fn collect_lines(engine: &LocalEngine) -> Rounds {
    let rounds: Rounds = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&rounds);
    engine
        .emplace_test(
            "collect".into(),
            Box::new(move |_: &dyn Orchestrator, lines: &[String]| -> EngineResult<()> {
                sink.lock().push(lines.to_vec());
                Ok(())
            }),
        )
        .unwrap();
    rounds
}

#[test]
fn test_output_prefixed_with_node_name() {
    let engine = engine_with_nodes(2);
    engine
        .add_process(NodeBitmap::all(2), sh("echo \"$DTEST_NODE_NAME\""))
        .unwrap();
    let rounds = collect_lines(&engine);

    assert_eq!(engine.run().unwrap(), 0);

    let rounds = rounds.lock();
    assert_eq!(rounds.len(), 1);
    let mut lines = rounds[0].clone();
    lines.sort();
    assert_eq!(lines, vec!["x1: x1".to_string(), "x2: x2".to_string()]);
}

#[test]
fn test_stderr_is_captured() {
    let engine = engine_with_nodes(1);
    engine
        .add_process(NodeBitmap::all(1), sh("echo oops >&2"))
        .unwrap();
    let rounds = collect_lines(&engine);
    engine.run().unwrap();
    assert_eq!(rounds.lock()[0], vec!["x1: oops".to_string()]);
}

#[test]
fn test_exit_code_policy_applied() {
    let engine = engine_with_nodes(2);
    engine
        .add_process(NodeBitmap::all(2), sh("exit $DTEST_NODE_INDEX"))
        .unwrap();
    engine.set_exit_code_policy(ExitCodePolicy::Master).unwrap();
    assert_eq!(engine.run().unwrap(), 0);

    let engine = engine_with_nodes(2);
    engine
        .add_process(NodeBitmap::all(2), sh("exit $DTEST_NODE_INDEX"))
        .unwrap();
    engine.set_exit_code_policy(ExitCodePolicy::All).unwrap();
    assert_eq!(engine.run().unwrap(), 1);
}

#[test]
fn test_restart_runs_tests_twice() {
    let engine = engine_with_nodes(1);
    engine
        .add_process(NodeBitmap::all(1), sh("echo round"))
        .unwrap();
    engine.will_restart(true).unwrap();
    let rounds = collect_lines(&engine);
    engine.run().unwrap();
    let rounds = rounds.lock();
    assert_eq!(rounds.len(), 2);
    assert_eq!(rounds[0], vec!["x1: round".to_string()]);
    assert_eq!(rounds[1], vec!["x1: round".to_string()]);
}

#[test]
fn test_failing_test_reported_with_message() {
    let engine = engine_with_nodes(1);
    engine
        .add_process(NodeBitmap::all(1), sh("echo hello"))
        .unwrap();
    engine
        .emplace_test(
            "needs world".into(),
            Box::new(|_: &dyn Orchestrator, lines: &[String]| -> EngineResult<()> {
                expect_event_sequence(lines, &["world"])
            }),
        )
        .unwrap();
    let err = engine.run().unwrap_err();
    assert!(matches!(err, EngineError::TestsFailed(ref f) if f.len() == 1));
    assert!(err.to_string().contains("test 'needs world' failed"));
}

#[test]
fn test_run_process_from_test_callback() {
    let engine = engine_with_nodes(2);
    engine
        .emplace_test(
            "launch".into(),
            Box::new(|engine: &dyn Orchestrator, _: &[String]| -> EngineResult<()> {
                engine.run_process(NodeBitmap::from(vec![false, true]), sh("true"))?;
                engine.kill_process(NodeBitmap::from(vec![false, true]), Signal::KILL)
            }),
        )
        .unwrap();
    assert_eq!(engine.run().unwrap(), 0);
    assert_eq!(engine.live_processes(), 0);
}

#[test]
fn test_callback_sees_output_of_processes_it_launched() {
    let engine = engine_with_nodes(1);
    engine
        .add_process(NodeBitmap::all(1), sh("echo start"))
        .unwrap();
    engine.will_restart(true).unwrap();
    let rounds: Rounds = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&rounds);
    engine
        .emplace_test(
            "late output".into(),
            Box::new(move |engine: &dyn Orchestrator, lines: &[String]| -> EngineResult<()> {
                sink.lock().push(lines.to_vec());
                if lines.iter().any(|line| line == "x1: late") {
                    return Ok(());
                }
                engine.run_process(NodeBitmap::all(1), sh("echo late"))
            }),
        )
        .unwrap();

    assert_eq!(engine.run().unwrap(), 0);
    assert_eq!(
        *rounds.lock(),
        vec![
            vec!["x1: start"],
            vec!["x1: start", "x1: late"],
            vec!["x1: start"],
            vec!["x1: start", "x1: late"],
        ]
    );
}

#[test]
fn test_quiet_tests_run_once_per_round() {
    let engine = engine_with_nodes(1);
    engine
        .add_process(NodeBitmap::all(1), sh("echo start"))
        .unwrap();
    let quiet = collect_lines(&engine);
    engine
        .emplace_test(
            "launch".into(),
            Box::new(|engine: &dyn Orchestrator, _: &[String]| -> EngineResult<()> {
                engine.run_process(NodeBitmap::all(1), sh("echo late"))
            }),
        )
        .unwrap();

    engine.run().unwrap();
    assert_eq!(*quiet.lock(), vec![vec!["x1: start"]]);
}

#[test]
fn test_kill_reaches_process_launched_by_test() {
    let engine = engine_with_nodes(1);
    engine
        .emplace_test(
            "stop the sleeper".into(),
            Box::new(|engine: &dyn Orchestrator, _: &[String]| -> EngineResult<()> {
                engine.run_process(NodeBitmap::all(1), sh("exec sleep 30"))?;
                engine.kill_process(NodeBitmap::all(1), Signal::TERMINATE)
            }),
        )
        .unwrap();

    let started = Instant::now();
    assert_eq!(engine.run().unwrap(), 0);
    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(engine.live_processes(), 0);
}

#[test]
fn test_phase_violations() {
    let engine = engine_with_nodes(1);
    let err = engine
        .kill_process(NodeBitmap::all(1), Signal::KILL)
        .unwrap_err();
    assert!(matches!(err, EngineError::Phase { .. }));

    engine.run().unwrap();
    let err = engine
        .add_process(NodeBitmap::all(1), sh("true"))
        .unwrap_err();
    assert!(matches!(err, EngineError::Phase { .. }));
}

#[test]
fn test_spawn_failure_is_reported() {
    let engine = engine_with_nodes(1);
    engine
        .add_process(
            NodeBitmap::all(1),
            ["/nonexistent/dtest-binary"].into_iter().collect(),
        )
        .unwrap();
    let err = engine.run().unwrap_err();
    assert!(matches!(err, EngineError::Spawn { .. }));
}
