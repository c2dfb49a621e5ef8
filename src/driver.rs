//! Script driver: engine + bridge + one script, start to finish.
//!
//! On failure the leftover processes are killed (after the configured grace
//! period) before teardown, and the error is returned for `main` to report.

use crate::config::DtestConfig;
use anyhow::{Context, Result};
use dtest_core::{LocalEngine, Orchestrator};
use dtest_scripting::guard::process_lifecycle;
use dtest_scripting::{Interpreter, LifecycleCell};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Run `script` against a [`LocalEngine`]; returns the process exit status.
pub fn run_script(script: &Path, config: &DtestConfig) -> Result<i32> {
    let engine = LocalEngine::new().context("failed to start the process supervisor")?;
    execute(Arc::new(engine), process_lifecycle(), script, config)
}

/// Run `script` against any engine, using `lifecycle` for the runtime guard.
pub fn execute(
    engine: Arc<dyn Orchestrator>,
    lifecycle: &'static LifecycleCell,
    script: &Path,
    config: &DtestConfig,
) -> Result<i32> {
    if config.engine.execution_delay_ms > 0 {
        engine
            .execution_delay(config.engine.execution_delay())
            .context("invalid engine.execution_delay_ms")?;
    }

    let session = Interpreter::initialize_in(lifecycle, Arc::clone(&engine), config.runtime_limits())
        .and_then(|interpreter| interpreter.start())
        .context("failed to start the script runtime")?;

    info!(script = %script.display(), "loading script");
    let outcome = session.load_and_run(script);
    let status = session.exit_status();

    if outcome.is_err() {
        let grace = config.engine.shutdown_grace();
        if !grace.is_zero() {
            warn!(?grace, "waiting before killing leftover processes");
            std::thread::sleep(grace);
        }
        engine.terminate();
    }

    let report = session.teardown();
    debug!(?report, "teardown complete");

    outcome.with_context(|| format!("{} failed", script.display()))?;
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtest_core::mock::{EngineCall, RecordingEngine};
    use std::io::Write;

    fn script(source: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".rhai")
            .tempfile()
            .unwrap();
        file.write_all(source.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_successful_run() {
        static LIFECYCLE: LifecycleCell = LifecycleCell::new();
        let engine = Arc::new(RecordingEngine::new());
        let file = script(r#"dtest::cluster(1, "x"); dtest::run();"#);

        let status = execute(engine.clone(), &LIFECYCLE, file.path(), &DtestConfig::default()).unwrap();
        assert_eq!(status, 0);
        assert!(engine.calls().contains(&EngineCall::Run));
    }

    #[test]
    fn test_nonzero_run_code_maps_to_one() {
        static LIFECYCLE: LifecycleCell = LifecycleCell::new();
        let engine = Arc::new(RecordingEngine::new().with_exit_code(3));
        let file = script("dtest::run();");

        let status = execute(engine, &LIFECYCLE, file.path(), &DtestConfig::default()).unwrap();
        assert_eq!(status, 1);
    }

    #[test]
    fn test_failure_terminates_engine() {
        static LIFECYCLE: LifecycleCell = LifecycleCell::new();
        let engine = Arc::new(RecordingEngine::new());
        let file = script(r#"dtest::fail("disk full");"#);

        let err = execute(engine.clone(), &LIFECYCLE, file.path(), &DtestConfig::default()).unwrap_err();
        assert!(format!("{err:#}").contains("disk full"));
        assert!(engine.calls().contains(&EngineCall::Terminate));
    }

    #[test]
    fn test_configured_delay_applied() {
        static LIFECYCLE: LifecycleCell = LifecycleCell::new();
        let engine = Arc::new(RecordingEngine::new());
        let file = script("");
        let mut config = DtestConfig::default();
        config.engine.execution_delay_ms = 20;

        execute(engine.clone(), &LIFECYCLE, file.path(), &config).unwrap();
        assert_eq!(
            engine.calls().first(),
            Some(&EngineCall::ExecutionDelay(std::time::Duration::from_millis(20)))
        );
    }
}
