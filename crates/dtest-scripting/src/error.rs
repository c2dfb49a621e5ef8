//! Bridge error domains.
//!
//! Two kinds of failure leave a command:
//!
//! - [`BoundaryError`]: the script passed something the command cannot
//!   accept (wrong type, unknown keyword, node index out of range). Raised
//!   into the script as a catchable runtime error.
//! - Everything else in [`BridgeError`]: engine rejections, explicit `fail`,
//!   failed test callbacks. These are fatal; the script cannot swallow them
//!   and the driver exits non-zero.

use dtest_core::EngineError;
use rhai::EvalAltResult;
use std::path::PathBuf;
use thiserror::Error;

/// Malformed input at the script/native boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoundaryError {
    #[error("takes at most {max} arguments ({given} given)")]
    TooManyArguments { max: usize, given: usize },

    #[error("missing required argument '{param}'")]
    MissingArgument { param: &'static str },

    #[error("got an unexpected keyword argument '{name}'")]
    UnknownKeyword { name: String },

    #[error("got multiple values for argument '{param}'")]
    DuplicateArgument { param: &'static str },

    #[error("argument '{param}' must be {expected}, not {found}")]
    WrongType {
        param: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("expected an array or range, not {found}")]
    NotASequence { found: String },

    #[error("element {position} of the node list is not an integer ({found})")]
    NotAnInteger { position: usize, found: String },

    #[error("node index {index} is out of range for a cluster of {size} nodes")]
    NodeOutOfRange { index: i64, size: usize },

    #[error("argument '{param}' is out of range: {value}")]
    OutOfRange { param: &'static str, value: i64 },

    #[error("cannot select nodes of a {size}-node cluster (limit {max})")]
    ClusterTooLarge { size: usize, max: usize },
}

/// Any failure produced by the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Boundary(#[from] BoundaryError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Explicit `dtest::fail(message)` or a fatal error raised inside a
    /// test callback.
    #[error("{0}")]
    Failed(String),

    /// Compile or evaluation error in the script itself.
    #[error("script error: {0}")]
    Script(String),

    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    #[error("cannot read script '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BridgeError {
    /// True for errors the script is allowed to catch.
    pub fn is_boundary(&self) -> bool {
        matches!(self, BridgeError::Boundary(_))
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Innermost message of a Rhai error, unwrapping function-call frames.
///
/// Fatal bridge errors travel as `ErrorTerminated` tokens and boundary
/// errors as `ErrorRuntime` values; both are reported by their payload.
pub fn describe(err: &EvalAltResult) -> String {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => describe(inner),
        EvalAltResult::ErrorTerminated(token, _) => token.to_string(),
        EvalAltResult::ErrorRuntime(value, _) => value.to_string(),
        other => other.to_string(),
    }
}

/// True if the error (or the error it wraps) is a non-catchable termination.
pub fn is_terminated(err: &EvalAltResult) -> bool {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => is_terminated(inner),
        EvalAltResult::ErrorTerminated(..) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhai::Position;

    #[test]
    fn test_boundary_messages() {
        let err = BoundaryError::NodeOutOfRange { index: 5, size: 2 };
        assert_eq!(
            err.to_string(),
            "node index 5 is out of range for a cluster of 2 nodes"
        );
        let err = BoundaryError::UnknownKeyword { name: "sise".into() };
        assert!(err.to_string().contains("'sise'"));
    }

    #[test]
    fn test_classification() {
        assert!(BridgeError::from(BoundaryError::MissingArgument { param: "size" }).is_boundary());
        assert!(!BridgeError::Failed("disk full".into()).is_boundary());
        assert!(!BridgeError::from(EngineError::EmptyClusterName).is_boundary());
    }

    #[test]
    fn test_describe_unwraps_frames() {
        let inner = EvalAltResult::ErrorTerminated("disk full".into(), Position::NONE);
        let wrapped = EvalAltResult::ErrorInFunctionCall(
            "check".into(),
            String::new(),
            Box::new(inner),
            Position::NONE,
        );
        assert_eq!(describe(&wrapped), "disk full");
        assert!(is_terminated(&wrapped));

        let runtime = EvalAltResult::ErrorRuntime("bad node".into(), Position::NONE);
        assert_eq!(describe(&runtime), "bad node");
        assert!(!is_terminated(&runtime));
    }
}
