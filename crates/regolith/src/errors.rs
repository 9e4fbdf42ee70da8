//! Error taxonomy.
//!
//! Every failure the compiler or the VM can produce is a
//! `(code, message, location)` triple. Compile-time failures accumulate in
//! an [`ErrorSeq`] that stops the pass pipeline; evaluation failures abort
//! the current plan and are collected the same way. `Undefined` is not an
//! error and never appears here.

use std::fmt;

use serde::Serialize;
use strum::{Display, EnumString, IntoStaticStr};

use crate::location::Location;

/// Result alias for operations that surface policy errors.
pub type PolicyResult<T> = Result<T, ErrorSeq>;

/// Stable error codes, rendered in output exactly as their serialized form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize)]
pub enum ErrorCode {
    /// Syntax error or well-formedness violation at parse or early pass.
    #[strum(serialize = "rego_parse_error")]
    #[serde(rename = "rego_parse_error")]
    ParseError,
    /// Unknown identifier, malformed rule, illegal placement.
    #[strum(serialize = "rego_compile_error")]
    #[serde(rename = "rego_compile_error")]
    CompileError,
    /// Built-in argument type mismatch, arithmetic on non-numbers, at compile time.
    #[strum(serialize = "rego_type_error")]
    #[serde(rename = "rego_type_error")]
    TypeError,
    /// Cycle in the rule/function dependency graph.
    #[strum(serialize = "rego_recursion_error")]
    #[serde(rename = "rego_recursion_error")]
    RecursionError,
    /// Multiple outputs for a complete rule or function, object-key conflict,
    /// incompatible merge.
    #[strum(serialize = "eval_conflict_error")]
    #[serde(rename = "eval_conflict_error")]
    EvalConflictError,
    /// Runtime type mismatch.
    #[strum(serialize = "eval_type_error")]
    #[serde(rename = "eval_type_error")]
    EvalTypeError,
    /// Strict-mode built-in failure.
    #[strum(serialize = "eval_builtin_error")]
    #[serde(rename = "eval_builtin_error")]
    EvalBuiltinError,
}

/// A resolved error position. Decoupled from live source buffers so
/// diagnostics survive bundle serialization.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorLocation {
    pub file: String,
    pub row: usize,
    pub col: usize,
}

impl From<&Location> for ErrorLocation {
    fn from(loc: &Location) -> Self {
        let (row, col) = loc.row_col();
        Self {
            file: loc.origin().to_owned(),
            row,
            col,
        }
    }
}

impl fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.row, self.col)
    }
}

/// A single diagnostic.
#[derive(Debug, Clone)]
pub struct PolicyError {
    pub code: ErrorCode,
    pub message: String,
    pub location: Option<ErrorLocation>,
}

impl PolicyError {
    pub fn new(code: ErrorCode, message: impl Into<String>, location: Option<ErrorLocation>) -> Self {
        Self {
            code,
            message: message.into(),
            location,
        }
    }

    /// A diagnostic anchored at a source span.
    pub fn at(code: ErrorCode, message: impl Into<String>, loc: &Location) -> Self {
        Self::new(code, message, Some(ErrorLocation::from(loc)))
    }
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{}: {} ({})", self.code, self.message, loc),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

/// An ordered sequence of diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ErrorSeq {
    pub errors: Vec<PolicyError>,
}

impl ErrorSeq {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(error: PolicyError) -> Self {
        Self { errors: vec![error] }
    }

    pub fn push(&mut self, error: PolicyError) {
        self.errors.push(error);
    }

    pub fn extend(&mut self, other: Self) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// The `{"errors": [...]}` failure shape.
    pub fn to_json(&self) -> serde_json::Value {
        let errors: Vec<serde_json::Value> = self
            .errors
            .iter()
            .map(|e| {
                let mut obj = serde_json::Map::new();
                obj.insert("code".into(), serde_json::json!(e.code.to_string()));
                obj.insert("message".into(), serde_json::json!(e.message));
                if let Some(loc) = &e.location {
                    obj.insert(
                        "location".into(),
                        serde_json::json!({
                            "file": loc.file,
                            "row": loc.row,
                            "col": loc.col,
                        }),
                    );
                }
                serde_json::Value::Object(obj)
            })
            .collect();
        serde_json::json!({ "errors": errors })
    }
}

impl fmt::Display for ErrorSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl From<PolicyError> for ErrorSeq {
    fn from(error: PolicyError) -> Self {
        Self::of(error)
    }
}

/// Public error type for the interpreter surface.
#[derive(Debug, thiserror::Error)]
pub enum RegoError {
    /// Compilation failed; the sequence holds parse/compile/type diagnostics.
    #[error("compilation failed:\n{0}")]
    Compile(ErrorSeq),
    /// Evaluation failed; the sequence holds eval diagnostics.
    #[error("evaluation failed:\n{0}")]
    Eval(ErrorSeq),
    /// A file could not be read or written.
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// JSON input could not be parsed.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    /// A bundle could not be encoded or decoded.
    #[error("invalid bundle: {0}")]
    Bundle(String),
}

impl RegoError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_strings_are_stable() {
        assert_eq!(ErrorCode::ParseError.to_string(), "rego_parse_error");
        assert_eq!(ErrorCode::EvalConflictError.to_string(), "eval_conflict_error");
        assert_eq!(ErrorCode::RecursionError.to_string(), "rego_recursion_error");
    }

    #[test]
    fn error_seq_json_shape() {
        let mut seq = ErrorSeq::new();
        seq.push(PolicyError::new(ErrorCode::EvalTypeError, "set - number", None));
        let json = seq.to_json();
        assert_eq!(json["errors"][0]["code"], "eval_type_error");
        assert_eq!(json["errors"][0]["message"], "set - number");
    }
}
