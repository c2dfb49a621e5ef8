//! Process description types: argument lists, signals and exit-code policy.

use crate::error::{EngineError, EngineResult};
use std::fmt;
use std::str::FromStr;

/// Ordered command line of a process (program first).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgStream {
    args: Vec<String>,
}

impl ArgStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, arg: impl Into<String>) {
        self.args.push(arg.into());
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn program(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    pub fn arguments(&self) -> &[String] {
        self.args.get(1..).unwrap_or_default()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.args
    }
}

impl From<Vec<String>> for ArgStream {
    fn from(args: Vec<String>) -> Self {
        Self { args }
    }
}

impl<'a> FromIterator<&'a str> for ArgStream {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self {
            args: iter.into_iter().map(str::to_string).collect(),
        }
    }
}

impl fmt::Display for ArgStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.args.join(" "))
    }
}

/// Raw POSIX signal number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal(pub i32);

impl Signal {
    pub const TERMINATE: Signal = Signal(libc::SIGTERM);
    pub const KILL: Signal = Signal(libc::SIGKILL);

    pub fn number(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the exit codes of the startup processes are folded into one.
///
/// Processes are numbered from 1 in the order they were started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitCodePolicy {
    /// First nonzero exit code of any process, zero if all succeeded.
    #[default]
    All,
    /// Exit code of the first process.
    Master,
    /// Exit code of the given process.
    Process(usize),
}

impl ExitCodePolicy {
    /// Fold the exit codes of one round, listed in start order.
    pub fn aggregate(&self, codes: &[i32]) -> EngineResult<i32> {
        match *self {
            ExitCodePolicy::All => Ok(codes.iter().copied().find(|c| *c != 0).unwrap_or(0)),
            ExitCodePolicy::Master => Ok(codes.first().copied().unwrap_or(0)),
            ExitCodePolicy::Process(n) => n
                .checked_sub(1)
                .and_then(|i| codes.get(i))
                .copied()
                .ok_or(EngineError::PolicyProcessMissing {
                    requested: n,
                    available: codes.len(),
                }),
        }
    }
}

impl FromStr for ExitCodePolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all" => Ok(ExitCodePolicy::All),
            "master" => Ok(ExitCodePolicy::Master),
            other => match other.parse::<usize>() {
                Ok(n) if n >= 1 => Ok(ExitCodePolicy::Process(n)),
                _ => Err(EngineError::InvalidExitCodePolicy(s.to_string())),
            },
        }
    }
}

impl fmt::Display for ExitCodePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitCodePolicy::All => f.write_str("all"),
            ExitCodePolicy::Master => f.write_str("master"),
            ExitCodePolicy::Process(n) => write!(f, "{}", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parse() {
        assert_eq!("all".parse::<ExitCodePolicy>().unwrap(), ExitCodePolicy::All);
        assert_eq!(
            "master".parse::<ExitCodePolicy>().unwrap(),
            ExitCodePolicy::Master
        );
        assert_eq!(
            "3".parse::<ExitCodePolicy>().unwrap(),
            ExitCodePolicy::Process(3)
        );
        assert!("0".parse::<ExitCodePolicy>().is_err());
        assert!("everyone".parse::<ExitCodePolicy>().is_err());
    }

    #[test]
    fn test_policy_aggregate() {
        let codes = [0, 3, 5];
        assert_eq!(ExitCodePolicy::All.aggregate(&codes).unwrap(), 3);
        assert_eq!(ExitCodePolicy::Master.aggregate(&codes).unwrap(), 0);
        assert_eq!(ExitCodePolicy::Process(3).aggregate(&codes).unwrap(), 5);
        assert!(ExitCodePolicy::Process(4).aggregate(&codes).is_err());
        assert_eq!(ExitCodePolicy::All.aggregate(&[]).unwrap(), 0);
    }

    #[test]
    fn test_arg_stream_accessors() {
        let args: ArgStream = ["echo", "hello", "world"].into_iter().collect();
        assert_eq!(args.program(), Some("echo"));
        assert_eq!(args.arguments(), &["hello".to_string(), "world".to_string()]);
        assert_eq!(args.to_string(), "echo hello world");
        assert!(ArgStream::new().arguments().is_empty());
    }
}
