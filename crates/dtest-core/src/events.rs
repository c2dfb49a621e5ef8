//! Event-sequence matching.
//!
//! Each expected event is a regular expression. The events must occur in the
//! captured output in the given order, but need not be adjacent: the first
//! pattern is searched from the first line, every following pattern from the
//! line after the previous match.

use crate::error::{EngineError, EngineResult};
use regex::Regex;

/// Check that `patterns` match an ordered subsequence of `lines`.
pub fn expect_event_sequence<L, P>(lines: &[L], patterns: &[P]) -> EngineResult<()>
where
    L: AsRef<str>,
    P: AsRef<str>,
{
    let compiled = patterns
        .iter()
        .map(|p| {
            Regex::new(p.as_ref()).map_err(|e| EngineError::InvalidPattern {
                pattern: p.as_ref().to_string(),
                message: e.to_string(),
            })
        })
        .collect::<EngineResult<Vec<_>>>()?;

    let mut next_line = 0;
    for (index, regex) in compiled.iter().enumerate() {
        let found = lines
            .iter()
            .skip(next_line)
            .position(|line| regex.is_match(line.as_ref()));
        match found {
            Some(offset) => next_line += offset + 1,
            None => {
                tracing::debug!(
                    pattern = regex.as_str(),
                    index,
                    searched_from = next_line,
                    "event not found"
                );
                return Err(EngineError::EventSequence {
                    pattern: regex.as_str().to_string(),
                    index,
                    after: next_line,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_subsequence_found() {
        assert!(expect_event_sequence(&["a", "b", "c"], &["a", "c"]).is_ok());
        assert!(expect_event_sequence(&["x1: started", "x2: joined", "x1: leader"], &[
            "^x1: started$",
            "leader"
        ])
        .is_ok());
    }

    #[test]
    fn test_missing_event_fails() {
        let err = expect_event_sequence(&["a", "b"], &["c"]).unwrap_err();
        assert!(matches!(err, EngineError::EventSequence { index: 0, .. }));
    }

    #[test]
    fn test_order_matters() {
        assert!(expect_event_sequence(&["a", "b"], &["b", "a"]).is_err());
    }

    #[test]
    fn test_one_line_matches_one_event() {
        assert!(expect_event_sequence(&["a"], &["a", "a"]).is_err());
        assert!(expect_event_sequence(&["a", "a"], &["a", "a"]).is_ok());
    }

    #[test]
    fn test_empty_patterns_always_match() {
        let none: [&str; 0] = [];
        assert!(expect_event_sequence(&none, &none).is_ok());
        assert!(expect_event_sequence(&["a"], &none).is_ok());
    }

    #[test]
    fn test_invalid_regex_reported() {
        let err = expect_event_sequence(&["a"], &["("]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidPattern { .. }));
    }
}
