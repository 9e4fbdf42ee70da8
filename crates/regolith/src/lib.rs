//! A Rego policy compiler and bundle virtual machine.
//!
//! Policies compile through an ordered pipeline of term-rewriting passes
//! into a linear bundle of plans, functions, blocks and statements; a
//! frame-based VM evaluates the bundle against a base document and an
//! input value. Bundles are self-contained and serializable, so a policy
//! compiled once can be persisted and re-evaluated against new inputs
//! without re-parsing.
//!
//! The entry point is [`Interpreter`]:
//!
//! ```
//! use regolith::Interpreter;
//!
//! let mut rego = Interpreter::new();
//! rego.add_module("hello.rego", "package hello\n\ngreeting := \"world\"\n");
//! let results = rego.raw_query("data.hello.greeting").unwrap();
//! assert_eq!(
//!     results.first_expression(),
//!     Some(&regolith::Value::string("world"))
//! );
//! ```

mod ast;
mod builtins;
mod bundle;
mod errors;
mod interpreter;
mod location;
mod parse;
mod passes;
mod results;
mod rewrite;
mod value;
mod vm;
mod wf;

pub use crate::builtins::{Arity, BuiltIn, BuiltinError, BuiltinResult, Registry};
pub use crate::bundle::{Block, Bundle, Function, Operand, Plan, Statement, Stmt};
pub use crate::errors::{ErrorCode, ErrorLocation, ErrorSeq, PolicyError, RegoError};
pub use crate::interpreter::Interpreter;
pub use crate::location::{Location, Source};
pub use crate::results::{QueryResult, QueryResults};
pub use crate::value::{insert_into_object, merge_objects, merge_sets, Value, ValueType};
pub use crate::vm::VirtualMachine;
