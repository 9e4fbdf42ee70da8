//! The built-in function registry.
//!
//! Built-ins are pure functions over values: they may not touch the bundle
//! or the frame. The default registry carries the infix operator carriers
//! (the compiler lowers `+`, `==`, `&`, … to calls), the membership
//! internals, and a core library of aggregates, numeric, string,
//! collection and type helpers. Interpreters may register their own
//! built-ins on top; each interpreter owns its registry.

mod aggregates;
mod collections;
mod infix;
mod numbers;
mod runtime;
mod strings;
mod types;

use std::sync::Arc;

use ahash::AHashMap;

use crate::errors::ErrorCode;
use crate::value::Value;

/// Why a built-in refused its inputs.
#[derive(Debug, Clone)]
pub struct BuiltinError {
    pub code: ErrorCode,
    pub message: String,
    /// When set, the failure only surfaces as an error in strict mode;
    /// otherwise the call is undefined.
    pub strict_only: bool,
}

impl BuiltinError {
    /// A hard type error: always surfaces, strict mode or not.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::EvalTypeError,
            message: message.into(),
            strict_only: false,
        }
    }

    /// A domain failure: undefined unless strict-builtin-errors is on.
    pub fn soft(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::EvalBuiltinError,
            message: message.into(),
            strict_only: true,
        }
    }

    /// The canonical "operand N must be T but got U" message.
    pub fn operand(func: &str, index: usize, expected: &str, got: &Value) -> Self {
        Self::type_error(format!(
            "{func}: operand {} must be {expected} but got {}",
            index + 1,
            got.type_name_opt(true)
        ))
    }
}

pub type BuiltinResult = Result<Value, BuiltinError>;

/// Accepted argument count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(u8),
    /// Disables the arity check.
    Any,
}

type Behavior = Arc<dyn Fn(&[Value]) -> BuiltinResult + Send + Sync>;

/// One registered built-in.
#[derive(Clone)]
pub struct BuiltIn {
    pub name: String,
    pub arity: Arity,
    behavior: Behavior,
}

impl BuiltIn {
    pub fn call(&self, args: &[Value]) -> BuiltinResult {
        if let Arity::Exact(n) = self.arity {
            if args.len() != n as usize {
                return Err(BuiltinError::type_error(format!(
                    "{} expects {n} arguments, got {}",
                    self.name,
                    args.len()
                )));
            }
        }
        (self.behavior)(args)
    }
}

impl std::fmt::Debug for BuiltIn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltIn")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Name -> built-in map.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    map: AHashMap<String, BuiltIn>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The default registry every interpreter starts from.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        infix::register(&mut registry);
        aggregates::register(&mut registry);
        numbers::register(&mut registry);
        strings::register(&mut registry);
        collections::register(&mut registry);
        types::register(&mut registry);
        runtime::register(&mut registry);
        registry
    }

    /// Registers a built-in, replacing any previous one of the same name.
    pub fn register(
        &mut self,
        name: &str,
        arity: Arity,
        behavior: impl Fn(&[Value]) -> BuiltinResult + Send + Sync + 'static,
    ) {
        self.map.insert(
            name.to_owned(),
            BuiltIn {
                name: name.to_owned(),
                arity,
                behavior: Arc::new(behavior),
            },
        );
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&BuiltIn> {
        self.map.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_infix_carriers() {
        let registry = Registry::with_defaults();
        for name in ["plus", "minus", "mul", "div", "rem", "equal", "neq", "lt", "gt", "lte", "gte", "and", "or"] {
            assert!(registry.is_builtin(name), "missing builtin {name}");
        }
        assert!(registry.is_builtin("internal.member_2"));
        assert!(registry.is_builtin("count"));
    }

    #[test]
    fn arity_is_enforced() {
        let registry = Registry::with_defaults();
        let err = registry.get("count").unwrap().call(&[]).unwrap_err();
        assert_eq!(err.code, ErrorCode::EvalTypeError);
    }

    #[test]
    fn custom_builtins_can_be_registered() {
        let mut registry = Registry::with_defaults();
        registry.register("answer", Arity::Exact(0), |_| Ok(Value::int(42)));
        assert_eq!(registry.get("answer").unwrap().call(&[]).unwrap(), Value::int(42));
    }
}
