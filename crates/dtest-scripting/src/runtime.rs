//! The embedded Rhai runtime.
//!
//! One [`ScriptRuntime`] owns the engine, the compiled script and the
//! [`RuntimeLock`]. Test callbacks hold only a `Weak` reference to it, so a
//! callback that outlives the runtime fails cleanly instead of keeping it
//! alive.

use crate::error::{describe, is_terminated, BridgeError, BridgeResult};
use crate::guard::RuntimeLock;
use parking_lot::RwLock;
use rhai::{Array, Dynamic, Engine, FnPtr, Module, Scope, AST};
use std::sync::Arc;
use tracing::{debug, info};

/// Limits applied to the script engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeLimits {
    /// Abort the script after this many operations (0 = unlimited).
    pub max_operations: u64,
    /// Maximum function call nesting.
    pub max_call_levels: usize,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_operations: 0,
            max_call_levels: 64,
        }
    }
}

pub struct ScriptRuntime {
    engine: Engine,
    ast: RwLock<Option<Arc<AST>>>,
    lock: RuntimeLock,
}

impl ScriptRuntime {
    /// Build an engine with `commands` installed as the `dtest` module.
    pub(crate) fn new(commands: Module, limits: RuntimeLimits) -> Self {
        let mut engine = Engine::new();
        engine.set_max_call_levels(limits.max_call_levels);

        if limits.max_operations > 0 {
            let max = limits.max_operations;
            engine.on_progress(move |count| {
                if count > max {
                    Some(Dynamic::from(format!(
                        "script exceeded the limit of {max} operations"
                    )))
                } else {
                    None
                }
            });
        }

        engine.on_print(|text| println!("{text}"));
        engine.on_debug(|text, source, pos| {
            debug!(target: "dtest::script", source = source.unwrap_or(""), %pos, "{text}");
        });

        engine.register_static_module("dtest", commands.into());
        Self {
            engine,
            ast: RwLock::new(None),
            lock: RuntimeLock::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn lock(&self) -> &RuntimeLock {
        &self.lock
    }

    /// Compile and evaluate `source` with `argv` bound to the `ARGV` constant.
    ///
    /// The caller must hold the runtime lock.
    pub(crate) fn execute(&self, name: &str, source: &str, argv: &[String]) -> BridgeResult<()> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|e| BridgeError::Script(format!("{name}: {e}")))?;
        let ast = Arc::new(ast);
        *self.ast.write() = Some(Arc::clone(&ast));

        let mut scope = Scope::new();
        let argv: Array = argv.iter().cloned().map(Dynamic::from).collect();
        scope.push_constant("ARGV", argv);

        info!(script = name, "running script");
        self.engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| {
                // Termination tokens are not part of the error's Display.
                if is_terminated(&e) {
                    BridgeError::Script(format!("{name}: {}", describe(&e)))
                } else {
                    BridgeError::Script(format!("{name}: {e}"))
                }
            })
    }

    /// Call a script function pointer with one round of output lines.
    ///
    /// The caller must hold the runtime lock.
    pub(crate) fn call(&self, callable: &FnPtr, lines: Array) -> BridgeResult<()> {
        let ast = self
            .ast
            .read()
            .clone()
            .ok_or_else(|| BridgeError::Lifecycle("no script is loaded".into()))?;
        callable
            .call::<Dynamic>(&self.engine, &ast, (lines,))
            .map(|_| ())
            .map_err(|e| {
                let message = describe(&e);
                if is_terminated(&e) {
                    BridgeError::Failed(message)
                } else {
                    BridgeError::Script(message)
                }
            })
    }

    /// Drop the compiled script.
    pub(crate) fn unload(&self) {
        self.ast.write().take();
    }
}
