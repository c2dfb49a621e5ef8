//! Event-sequence adapter.
//!
//! Converts script sequences of output lines and regex patterns to native
//! strings and delegates matching to [`dtest_core::expect_event_sequence`].
//! A mismatch or a bad pattern is an engine error, so it is fatal.

use crate::error::BridgeResult;
use crate::marshal::sequence_to_string_array;
use rhai::Dynamic;

pub fn expect_event_sequence(lines: &Dynamic, patterns: &Dynamic) -> BridgeResult<()> {
    let lines = sequence_to_string_array(lines)?;
    let patterns = sequence_to_string_array(patterns)?;
    dtest_core::expect_event_sequence(&lines, &patterns)?;
    Ok(())
}
