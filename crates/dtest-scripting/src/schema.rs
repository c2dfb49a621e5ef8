//! Argument schemas for the command table.
//!
//! Every command declares its parameters once as a `&'static [ParamSpec]`.
//! [`bind`] validates a raw Rhai call against that declaration and produces
//! [`BoundArgs`], from which handlers read typed values by name.
//!
//! Calls may pass arguments positionally, by keyword through a trailing
//! object map, or both:
//!
//! ```text
//! dtest::cluster(2, "x");
//! dtest::cluster(#{ size: 2, name: "x" });
//! dtest::cluster(2, #{ name: "x", network: "10.0.0.0/24" });
//! ```
//!
//! A unit value `()` stands for "not given" on optional parameters.

use crate::error::BoundaryError;
use crate::marshal::is_sequence;
use rhai::{Dynamic, FnPtr, Map, INT};

/// Accepted type of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Int,
    /// Integer >= 0.
    UInt,
    Text,
    Bool,
    /// Array or integer range.
    Sequence,
    /// Function pointer or closure.
    Callable,
}

impl ParamKind {
    pub fn describe(self) -> &'static str {
        match self {
            ParamKind::Int => "an integer",
            ParamKind::UInt => "a non-negative integer",
            ParamKind::Text => "a string",
            ParamKind::Bool => "a boolean",
            ParamKind::Sequence => "an array or range",
            ParamKind::Callable => "a function",
        }
    }

    fn accept(self, param: &'static str, value: Dynamic) -> Result<Arg, BoundaryError> {
        let wrong_type = |value: &Dynamic| BoundaryError::WrongType {
            param,
            expected: self.describe(),
            found: value.type_name().to_string(),
        };
        match self {
            ParamKind::Int => value.as_int().map(Arg::Int).map_err(|_| wrong_type(&value)),
            ParamKind::UInt => match value.as_int() {
                Ok(n) if n >= 0 => Ok(Arg::Int(n)),
                Ok(n) => Err(BoundaryError::OutOfRange { param, value: n }),
                Err(_) => Err(wrong_type(&value)),
            },
            ParamKind::Bool => value.as_bool().map(Arg::Bool).map_err(|_| wrong_type(&value)),
            ParamKind::Text if value.is_string() => value
                .clone()
                .into_string()
                .map(Arg::Text)
                .map_err(|_| wrong_type(&value)),
            ParamKind::Sequence if is_sequence(&value) => Ok(Arg::Sequence(value)),
            ParamKind::Callable if value.is::<FnPtr>() => Ok(Arg::Callable(value)),
            _ => Err(wrong_type(&value)),
        }
    }
}

/// Fallback for a parameter that was not given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    /// Absent values stay absent.
    Optional,
    DefaultInt(INT),
    DefaultBool(bool),
}

/// One declared parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub presence: Presence,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            presence: Presence::Required,
        }
    }

    pub const fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            presence: Presence::Optional,
        }
    }

    pub const fn with_default(name: &'static str, kind: ParamKind, presence: Presence) -> Self {
        Self {
            name,
            kind,
            presence,
        }
    }

    /// Signature fragment for help output, e.g. `signal: integer = 9`.
    pub fn signature(&self) -> String {
        let kind = match self.kind {
            ParamKind::Int | ParamKind::UInt => "integer",
            ParamKind::Text => "string",
            ParamKind::Bool => "bool",
            ParamKind::Sequence => "array",
            ParamKind::Callable => "fn",
        };
        match self.presence {
            Presence::Required => format!("{}: {kind}", self.name),
            Presence::Optional => format!("{}: {kind} = ()", self.name),
            Presence::DefaultInt(n) => format!("{}: {kind} = {n}", self.name),
            Presence::DefaultBool(b) => format!("{}: {kind} = {b}", self.name),
        }
    }
}

/// A validated argument value.
#[derive(Debug, Clone)]
pub enum Arg {
    Int(INT),
    Text(String),
    Bool(bool),
    Sequence(Dynamic),
    Callable(Dynamic),
}

/// Arguments of one call, bound to the command's parameters.
#[derive(Debug)]
pub struct BoundArgs {
    params: &'static [ParamSpec],
    values: Vec<Option<Arg>>,
}

impl BoundArgs {
    /// The bound value of `name`, `None` if an optional parameter was not given.
    pub fn get(&self, name: &str) -> Option<&Arg> {
        self.params
            .iter()
            .position(|p| p.name == name)
            .and_then(|i| self.values[i].as_ref())
    }

    fn require(&self, name: &'static str) -> Result<&Arg, BoundaryError> {
        self.get(name)
            .ok_or(BoundaryError::MissingArgument { param: name })
    }

    fn mismatch(&self, name: &'static str, arg: &Arg) -> BoundaryError {
        let expected = self
            .params
            .iter()
            .find(|p| p.name == name)
            .map_or("a value", |p| p.kind.describe());
        BoundaryError::WrongType {
            param: name,
            expected,
            found: format!("{arg:?}"),
        }
    }

    pub fn int(&self, name: &'static str) -> Result<INT, BoundaryError> {
        match self.require(name)? {
            Arg::Int(n) => Ok(*n),
            other => Err(self.mismatch(name, other)),
        }
    }

    pub fn text(&self, name: &'static str) -> Result<&str, BoundaryError> {
        match self.require(name)? {
            Arg::Text(s) => Ok(s),
            other => Err(self.mismatch(name, other)),
        }
    }

    pub fn opt_text(&self, name: &'static str) -> Result<Option<&str>, BoundaryError> {
        match self.get(name) {
            None => Ok(None),
            Some(Arg::Text(s)) => Ok(Some(s)),
            Some(other) => Err(self.mismatch(name, other)),
        }
    }

    pub fn boolean(&self, name: &'static str) -> Result<bool, BoundaryError> {
        match self.require(name)? {
            Arg::Bool(b) => Ok(*b),
            other => Err(self.mismatch(name, other)),
        }
    }

    pub fn sequence(&self, name: &'static str) -> Result<&Dynamic, BoundaryError> {
        match self.require(name)? {
            Arg::Sequence(value) => Ok(value),
            other => Err(self.mismatch(name, other)),
        }
    }

    pub fn callable(&self, name: &'static str) -> Result<&Dynamic, BoundaryError> {
        match self.require(name)? {
            Arg::Callable(value) => Ok(value),
            other => Err(self.mismatch(name, other)),
        }
    }
}

/// Validate `args` against `params`.
///
/// A trailing object map is read as keyword arguments. Rejects surplus
/// positionals, unknown or duplicate keywords, wrong types and missing
/// required parameters.
pub fn bind(params: &'static [ParamSpec], mut args: Vec<Dynamic>) -> Result<BoundArgs, BoundaryError> {
    let keywords = match args.last() {
        Some(last) if last.is_map() => args.pop().and_then(|m| m.try_cast::<Map>()),
        _ => None,
    };

    if args.len() > params.len() {
        return Err(BoundaryError::TooManyArguments {
            max: params.len(),
            given: args.len() + usize::from(keywords.is_some()),
        });
    }

    let mut values: Vec<Option<Arg>> = vec![None; params.len()];
    for (slot, (spec, value)) in params.iter().zip(args).enumerate() {
        if value.is_unit() && spec.presence != Presence::Required {
            continue;
        }
        values[slot] = Some(spec.kind.accept(spec.name, value)?);
    }

    for (key, value) in keywords.into_iter().flatten() {
        let slot = params
            .iter()
            .position(|p| p.name == key.as_str())
            .ok_or_else(|| BoundaryError::UnknownKeyword {
                name: key.to_string(),
            })?;
        let spec = &params[slot];
        if values[slot].is_some() {
            return Err(BoundaryError::DuplicateArgument { param: spec.name });
        }
        if value.is_unit() && spec.presence != Presence::Required {
            continue;
        }
        values[slot] = Some(spec.kind.accept(spec.name, value)?);
    }

    for (spec, value) in params.iter().zip(values.iter_mut()) {
        if value.is_some() {
            continue;
        }
        *value = match spec.presence {
            Presence::Required => {
                return Err(BoundaryError::MissingArgument { param: spec.name })
            }
            Presence::Optional => None,
            Presence::DefaultInt(n) => Some(Arg::Int(n)),
            Presence::DefaultBool(b) => Some(Arg::Bool(b)),
        };
    }

    Ok(BoundArgs { params, values })
}
