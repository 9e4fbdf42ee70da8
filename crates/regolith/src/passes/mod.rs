//! The compiler pass pipeline.
//!
//! Ordered term-rewriting passes lower parsed modules through the
//! intermediate forms and finally emit the bundle. The [`Compiler`] is the
//! pass context: the AST arena plus everything the pipeline accumulates
//! (the merged base document, the constant pool, the rule tree, and the
//! bundle under construction).

mod arithmetic;
mod data;
mod enums;
mod functions;
mod query;
mod refs;
mod surface;
mod unify;

use std::collections::BTreeMap;
use std::path::PathBuf;

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::ast::{Ast, Kind, NodeId};
use crate::bundle::{Bundle, IrBuilder};
use crate::errors::{ErrorCode, ErrorSeq, PolicyError};
use crate::location::Source;
use crate::parse::Parser;
use crate::rewrite::{HasAst, Pass};
use crate::value::Value;

/// One named rule group in the virtual document tree: every definition of
/// `path.name`, in module order.
#[derive(Debug, Default)]
pub struct RuleGroup {
    pub rules: Vec<NodeId>,
    pub defaults: Vec<NodeId>,
}

/// The virtual document: package paths to rule groups.
#[derive(Debug, Default)]
pub struct RuleTree {
    pub children: BTreeMap<String, RuleTree>,
    pub rules: BTreeMap<String, RuleGroup>,
}

impl RuleTree {
    /// Descends to the package node at `path`, creating it as needed.
    pub fn descend(&mut self, path: &[String]) -> &mut Self {
        let mut node = self;
        for segment in path {
            node = node.children.entry(segment.clone()).or_default();
        }
        node
    }

    /// The package node at `path`, if present.
    pub fn at(&self, path: &[&str]) -> Option<&Self> {
        let mut node = self;
        for segment in path {
            node = node.children.get(*segment)?;
        }
        Some(node)
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.rules.is_empty()
    }
}

/// Pass pipeline context.
pub struct Compiler {
    pub ast: Ast,
    /// The `Rego` root (set by `input_data`).
    pub root: NodeId,
    /// Parsed module nodes, before rooting.
    pub modules: Vec<NodeId>,
    /// Parsed ad-hoc query, if any.
    pub query: Option<NodeId>,
    /// Data documents awaiting `merge_data`.
    pub data_docs: Vec<Value>,
    /// The merged base document.
    pub data: Value,
    /// Constant pool for `DataTerm` nodes.
    pub constants: Vec<Value>,
    pub builder: IrBuilder,
    pub rule_tree: RuleTree,
    /// Names of registered built-ins, for call resolution.
    pub builtin_names: AHashSet<String>,
    pub entrypoints: Vec<String>,
    /// Module name -> source text, carried into the bundle.
    pub sources: IndexMap<String, String>,
    pub query_plan: Option<u32>,
    pub wf_checks: bool,
    pub debug_dir: Option<PathBuf>,
}

impl HasAst for Compiler {
    fn ast(&self) -> &Ast {
        &self.ast
    }
    fn ast_mut(&mut self) -> &mut Ast {
        &mut self.ast
    }
}

impl Compiler {
    pub fn new(builtin_names: AHashSet<String>) -> Self {
        let mut ast = Ast::new();
        let root = ast.node(Kind::Rego, crate::location::Location::synthetic());
        Self {
            ast,
            root,
            modules: Vec::new(),
            query: None,
            data_docs: Vec::new(),
            data: Value::Object(IndexMap::new()),
            constants: Vec::new(),
            builder: IrBuilder::new(),
            rule_tree: RuleTree::default(),
            builtin_names,
            entrypoints: Vec::new(),
            sources: IndexMap::new(),
            query_plan: None,
            wf_checks: false,
            debug_dir: None,
        }
    }

    pub fn add_module(&mut self, name: &str, text: &str) -> Result<(), PolicyError> {
        let source = Source::new(name, text);
        let module = Parser::parse_module(&mut self.ast, source)?;
        self.modules.push(module);
        self.sources.insert(name.to_owned(), text.to_owned());
        Ok(())
    }

    pub fn set_query(&mut self, text: &str) -> Result<(), PolicyError> {
        let source = Source::new("<query>", text);
        let query = Parser::parse_query(&mut self.ast, source)?;
        self.query = Some(query);
        Ok(())
    }

    pub fn add_data(&mut self, doc: Value) {
        self.data_docs.push(doc);
    }

    /// Runs the whole pipeline and finishes the bundle.
    pub fn compile(mut self) -> Result<Bundle, ErrorSeq> {
        let pipeline = passes();
        let check_wf = self.wf_checks;
        for (index, pass) in pipeline.iter().enumerate() {
            let root = self.root;
            pass.run(&mut self, root, check_wf)?;
            self.dump_ast(index, pass.name);
        }

        let Self {
            data,
            sources,
            builder,
            query_plan,
            ..
        } = self;
        Ok(builder.finish(data, sources, query_plan))
    }

    fn dump_ast(&self, index: usize, name: &str) {
        let Some(dir) = &self.debug_dir else { return };
        let rendered = self.ast.pretty(self.root);
        let path = dir.join(format!("{index:02}_{name}.ast"));
        if let Err(error) = std::fs::create_dir_all(dir).and_then(|()| std::fs::write(&path, rendered)) {
            log::warn!("cannot write debug ast {}: {error}", path.display());
        }
    }

    // --- helpers shared across passes -------------------------------------

    /// The dotted package path of the module containing `node`.
    pub fn module_path(&self, node: NodeId) -> Option<String> {
        let module = self.ast.ancestor_of_kind(node, Kind::Module)?;
        Some(self.ast.text(module).to_owned())
    }

    /// Flattens a `Ref` of plain dot segments to `head.a.b`; `None` when
    /// any argument is a bracket.
    pub fn flatten_ref(&self, reference: NodeId) -> Option<String> {
        let head = self.ast.child(self.ast.child(reference, 0), 0);
        if self.ast.kind(head) != Kind::Var {
            return None;
        }
        let mut out = self.ast.text(head).to_owned();
        let argseq = self.ast.child(reference, 1);
        for &arg in self.ast.children(argseq) {
            if self.ast.kind(arg) != Kind::RefArgDot {
                return None;
            }
            out.push('.');
            out.push_str(self.ast.text(self.ast.child(arg, 0)));
        }
        Some(out)
    }

    /// Evaluates a constant expression to a value; `None` when any part is
    /// not a literal.
    pub fn eval_const(&self, expr: NodeId) -> Option<Value> {
        let node = match self.ast.kind(expr) {
            Kind::Expr | Kind::Term | Kind::Scalar => self.ast.child(expr, 0),
            _ => expr,
        };
        match self.ast.kind(node) {
            Kind::Expr | Kind::Term | Kind::Scalar => self.eval_const(node),
            Kind::Int => self.ast.text(node).parse().ok().map(Value::Int),
            Kind::Float => self.ast.text(node).parse().ok().map(Value::Float),
            Kind::JSONString => Some(Value::string(self.ast.text(node))),
            Kind::True => Some(Value::Bool(true)),
            Kind::False => Some(Value::Bool(false)),
            Kind::Null => Some(Value::Null),
            Kind::Array => {
                let mut items = Vec::new();
                for &child in self.ast.children(node) {
                    items.push(self.eval_const(child)?);
                }
                Some(Value::Array(items))
            }
            Kind::Set => {
                let mut items = std::collections::BTreeSet::new();
                for &child in self.ast.children(node) {
                    items.insert(self.eval_const(child)?);
                }
                Some(Value::Set(items))
            }
            Kind::Object => {
                let mut items = IndexMap::new();
                for &item in self.ast.children(node) {
                    let key = self.eval_const(self.ast.child(item, 0))?;
                    let value = self.eval_const(self.ast.child(item, 1))?;
                    items.insert(key, value);
                }
                Some(Value::Object(items))
            }
            Kind::UnaryExpr => match self.eval_const(self.ast.child(node, 0))? {
                Value::Int(i) => Some(Value::Int(-i)),
                Value::Float(f) => Some(Value::Float(-f)),
                _ => None,
            },
            Kind::DataTerm => {
                let index: usize = self.ast.text(node).parse().ok()?;
                self.constants.get(index).cloned()
            }
            _ => None,
        }
    }

    pub fn compile_error(&self, node: NodeId, message: impl Into<String>) -> PolicyError {
        PolicyError::at(ErrorCode::CompileError, message, self.ast.loc(node))
    }
}

/// The ordered pass pipeline.
fn passes() -> Vec<Pass<Compiler>> {
    vec![
        surface::input_data(),
        surface::modules(),
        surface::imports(),
        surface::keywords(),
        surface::lists(),
        surface::ifs(),
        surface::elses(),
        surface::rules(),
        surface::build_calls(),
        surface::membership(),
        surface::build_refs(),
        surface::structure(),
        surface::strings(),
        data::merge_data(),
        data::lift_refheads(),
        data::symbols(),
        data::replace_argvals(),
        data::lift_query(),
        data::expand_imports(),
        data::constants(),
        enums::explicit_enums(),
        enums::body_locals(),
        enums::value_locals(),
        enums::compr(),
        refs::absolute_refs(),
        refs::merge_modules(),
        refs::skips(),
        arithmetic::unary(),
        arithmetic::multiply_divide(),
        arithmetic::add_subtract(),
        arithmetic::comparison(),
        arithmetic::assign(),
        refs::simple_refs(),
        enums::implicit_enums(),
        enums::enum_locals(),
        arithmetic::init(),
        arithmetic::rulebody(),
        arithmetic::lift_to_rule(),
        functions::functions(),
        unify::unify(),
        query::query(),
    ]
}

/// Parses a JSON document into a value, requiring an object root.
pub fn parse_data_json(text: &str) -> Result<Value, PolicyError> {
    let json: serde_json::Value = serde_json::from_str(text).map_err(|e| {
        PolicyError::new(ErrorCode::ParseError, format!("invalid data document: {e}"), None)
    })?;
    let value = Value::from_json(&json);
    if !matches!(value, Value::Object(_)) {
        return Err(PolicyError::new(
            ErrorCode::ParseError,
            "data documents must be objects",
            None,
        ));
    }
    Ok(value)
}

/// Parses a Rego term (used for term-form input) into a constant value.
pub fn parse_input_term(text: &str) -> Result<Value, PolicyError> {
    let mut ast = Ast::new();
    let source = Source::new("<input>", text);
    let expr = Parser::parse_term_expr(&mut ast, source)?;
    let probe = Compiler {
        ast,
        ..Compiler::new(AHashSet::new())
    };
    probe.eval_const(expr).ok_or_else(|| {
        PolicyError::new(ErrorCode::ParseError, "input term must be a constant", None)
    })
}
