//! Script values to native engine types.
//!
//! Sequences are Rhai arrays or integer ranges (`0..3`, `0..=2`). Conversions
//! either succeed completely or fail with a [`BoundaryError`]; no partially
//! filled result is ever handed to the engine.

use crate::error::{BoundaryError, BridgeError};
use dtest_core::{EngineError, NetworkAddress, NodeBitmap, MAX_CLUSTER_SIZE};
use rhai::{Array, Dynamic, ImmutableString, INT};
use std::ops::{Range, RangeInclusive};
use std::str::FromStr;

enum Sequence {
    Items(Array),
    Span(Range<INT>),
}

impl Sequence {
    fn of(value: &Dynamic) -> Result<Self, BoundaryError> {
        if let Some(items) = value.read_lock::<Array>() {
            return Ok(Sequence::Items(items.clone()));
        }
        if let Some(range) = value.read_lock::<Range<INT>>() {
            return Ok(Sequence::Span(range.clone()));
        }
        if let Some(range) = value.read_lock::<RangeInclusive<INT>>() {
            let (start, end) = (*range.start(), *range.end());
            return Ok(Sequence::Span(start..end.saturating_add(1)));
        }
        Err(BoundaryError::NotASequence {
            found: value.type_name().to_string(),
        })
    }
}

/// True for values [`sequence_to_bitmap`] and [`sequence_to_string_array`]
/// accept.
pub fn is_sequence(value: &Dynamic) -> bool {
    value.is_array() || value.is::<Range<INT>>() || value.is::<RangeInclusive<INT>>()
}

/// Build a node selection for a cluster of `cluster_size` nodes.
///
/// Elements must be integers, integral floats, or numeric strings in
/// `0..cluster_size`. Duplicates are harmless; an empty sequence selects
/// nothing.
pub fn sequence_to_bitmap(value: &Dynamic, cluster_size: usize) -> Result<NodeBitmap, BoundaryError> {
    if cluster_size > MAX_CLUSTER_SIZE {
        return Err(BoundaryError::ClusterTooLarge {
            size: cluster_size,
            max: MAX_CLUSTER_SIZE,
        });
    }
    let mut bits = vec![false; cluster_size];
    let out_of_range = |index: INT| BoundaryError::NodeOutOfRange {
        index,
        size: cluster_size,
    };

    match Sequence::of(value)? {
        Sequence::Items(items) => {
            for (position, item) in items.iter().enumerate() {
                let index = to_integer(item).ok_or_else(|| BoundaryError::NotAnInteger {
                    position,
                    found: item.type_name().to_string(),
                })?;
                let slot = usize::try_from(index)
                    .ok()
                    .filter(|slot| *slot < cluster_size)
                    .ok_or_else(|| out_of_range(index))?;
                bits[slot] = true;
            }
        }
        Sequence::Span(range) => {
            if !range.is_empty() {
                if range.start < 0 {
                    return Err(out_of_range(range.start));
                }
                let size = INT::try_from(cluster_size).unwrap_or(INT::MAX);
                if range.end > size {
                    return Err(out_of_range(range.start.max(size)));
                }
                for slot in range {
                    // Bounds checked above.
                    bits[slot as usize] = true;
                }
            }
        }
    }

    Ok(NodeBitmap::from(bits))
}

/// Stringify every element of a sequence, in order.
pub fn sequence_to_string_array(value: &Dynamic) -> Result<Vec<String>, BoundaryError> {
    Ok(match Sequence::of(value)? {
        Sequence::Items(items) => items.iter().map(Dynamic::to_string).collect(),
        Sequence::Span(range) => range.map(|n| n.to_string()).collect(),
    })
}

/// Parse a text scalar into a strongly typed engine value.
///
/// Parse failures come from the engine's own validation and are fatal.
pub fn scalar_to_enum<T>(text: &str) -> Result<T, BridgeError>
where
    T: FromStr<Err = EngineError>,
{
    T::from_str(text).map_err(BridgeError::Engine)
}

/// Parse `a.b.c.d/prefix` into a [`NetworkAddress`].
pub fn scalar_to_address(text: &str) -> Result<NetworkAddress, BridgeError> {
    scalar_to_enum(text)
}

fn to_integer(value: &Dynamic) -> Option<INT> {
    if let Ok(n) = value.as_int() {
        return Some(n);
    }
    if let Ok(f) = value.as_float() {
        return (f.is_finite() && f.fract() == 0.0).then_some(f as INT);
    }
    value
        .read_lock::<ImmutableString>()
        .and_then(|text| text.trim().parse().ok())
}
