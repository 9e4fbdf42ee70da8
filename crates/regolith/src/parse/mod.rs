//! Rego source parsing.
//!
//! The lexer and recursive-descent parser produce the structured surface
//! AST (AST₀) that the pass pipeline consumes. The grammar itself is an
//! interface-level collaborator: the pipeline only relies on the parser's
//! output satisfying the parse-stage well-formedness table.

mod lexer;
mod parser;

pub use lexer::{Lexer, Token, TokenKind};
pub use parser::Parser;
