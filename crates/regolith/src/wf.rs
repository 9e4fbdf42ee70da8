//! Well-formedness relations.
//!
//! A WF table maps each node kind to the allowed shape of its child
//! sequence, expressed in a tiny pattern DSL (`one / opt / many / some`
//! over kind sets). Every pass declares the table its output satisfies;
//! the pass engine validates against it when WF checks are enabled.
//! Unlisted kinds are unconstrained.

use ahash::AHashMap;

use crate::ast::{Ast, Kind, NodeId};
use crate::errors::{ErrorCode, ErrorSeq, PolicyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rep {
    One,
    Opt,
    Many,
    Some,
}

#[derive(Debug, Clone)]
struct ChildPat {
    kinds: Vec<Kind>,
    rep: Rep,
}

#[derive(Debug, Clone)]
enum Shape {
    Leaf,
    Seq(Vec<ChildPat>),
}

/// A well-formedness table.
#[derive(Debug, Clone, Default)]
pub struct Wf {
    rules: AHashMap<Kind, Shape>,
}

/// Exactly one child from `kinds`.
pub fn one(kinds: &[Kind]) -> (Vec<Kind>, u8) {
    (kinds.to_vec(), 0)
}

/// Zero or one child from `kinds`.
pub fn opt(kinds: &[Kind]) -> (Vec<Kind>, u8) {
    (kinds.to_vec(), 1)
}

/// Zero or more children from `kinds`.
pub fn many(kinds: &[Kind]) -> (Vec<Kind>, u8) {
    (kinds.to_vec(), 2)
}

/// One or more children from `kinds`.
pub fn some(kinds: &[Kind]) -> (Vec<Kind>, u8) {
    (kinds.to_vec(), 3)
}

impl Wf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `kind` a leaf (no children allowed).
    pub fn leaf(mut self, kind: Kind) -> Self {
        self.rules.insert(kind, Shape::Leaf);
        self
    }

    /// Declares the child sequence pattern for `kind`.
    pub fn rule(mut self, kind: Kind, pats: Vec<(Vec<Kind>, u8)>) -> Self {
        let pats = pats
            .into_iter()
            .map(|(kinds, rep)| ChildPat {
                kinds,
                rep: match rep {
                    0 => Rep::One,
                    1 => Rep::Opt,
                    2 => Rep::Many,
                    _ => Rep::Some,
                },
            })
            .collect();
        self.rules.insert(kind, Shape::Seq(pats));
        self
    }

    /// Removes a kind's constraint (used when a pass retires a shape).
    pub fn drop_rule(mut self, kind: Kind) -> Self {
        self.rules.remove(&kind);
        self
    }

    /// Validates the subtree under `root`, collecting one diagnostic per
    /// violating node.
    pub fn check(&self, ast: &Ast, root: NodeId) -> ErrorSeq {
        let mut errors = ErrorSeq::new();
        for node in ast.walk(root) {
            if let Some(shape) = self.rules.get(&ast.kind(node)) {
                if let Err(message) = match_shape(ast, node, shape) {
                    errors.push(PolicyError::at(ErrorCode::ParseError, message, ast.loc(node)));
                }
            }
        }
        errors
    }
}

fn match_shape(ast: &Ast, node: NodeId, shape: &Shape) -> Result<(), String> {
    let children = ast.children(node);
    let pats = match shape {
        Shape::Leaf => {
            if children.is_empty() {
                return Ok(());
            }
            return Err(format!("{} must not have children", ast.kind(node)));
        }
        Shape::Seq(pats) => pats,
    };

    let mut pos = 0;
    for pat in pats {
        let matches = |i: usize| i < children.len() && pat.kinds.contains(&ast.kind(children[i]));
        match pat.rep {
            Rep::One => {
                if !matches(pos) {
                    return Err(shape_error(ast, node, pos, &pat.kinds));
                }
                pos += 1;
            }
            Rep::Opt => {
                if matches(pos) {
                    pos += 1;
                }
            }
            Rep::Many => {
                while matches(pos) {
                    pos += 1;
                }
            }
            Rep::Some => {
                if !matches(pos) {
                    return Err(shape_error(ast, node, pos, &pat.kinds));
                }
                while matches(pos) {
                    pos += 1;
                }
            }
        }
    }
    if pos != children.len() {
        return Err(format!(
            "{} has unexpected child {} at position {pos}",
            ast.kind(node),
            ast.kind(children[pos]),
        ));
    }
    Ok(())
}

fn shape_error(ast: &Ast, node: NodeId, pos: usize, expected: &[Kind]) -> String {
    let got = ast
        .try_child(node, pos)
        .map_or_else(|| "end of children".to_owned(), |c| ast.kind(c).to_string());
    let expected: Vec<String> = expected.iter().map(ToString::to_string).collect();
    format!(
        "{} child {pos}: expected one of [{}], got {got}",
        ast.kind(node),
        expected.join(", "),
    )
}

// --- stage tables ---------------------------------------------------------

const EXPR_INNER: &[Kind] = &[
    Kind::Term,
    Kind::Infix,
    Kind::UnaryExpr,
    Kind::ExprCall,
    Kind::Membership,
    Kind::ArithInfix,
    Kind::BoolInfix,
    Kind::BinInfix,
    Kind::AssignInfix,
    Kind::DataTerm,
];

const TERM_INNER: &[Kind] = &[
    Kind::Scalar,
    Kind::Var,
    Kind::Ref,
    Kind::Array,
    Kind::Object,
    Kind::Set,
    Kind::ArrayCompr,
    Kind::SetCompr,
    Kind::ObjectCompr,
];

const SCALAR_INNER: &[Kind] = &[
    Kind::Int,
    Kind::Float,
    Kind::JSONString,
    Kind::RawString,
    Kind::True,
    Kind::False,
    Kind::Null,
    Kind::Undefined,
];

const OP_KINDS: &[Kind] = &[
    Kind::Add,
    Kind::Subtract,
    Kind::Multiply,
    Kind::Divide,
    Kind::Modulo,
    Kind::Equals,
    Kind::NotEquals,
    Kind::LessThan,
    Kind::GreaterThan,
    Kind::LessThanOrEquals,
    Kind::GreaterThanOrEquals,
    Kind::And,
    Kind::Or,
    Kind::Assign,
    Kind::Unify,
    Kind::InOp,
];

const LITERAL_INNER: &[Kind] = &[Kind::Expr, Kind::NotExpr, Kind::SomeDecl];

/// WF for the parser's output (AST₀).
pub fn wf_parse() -> Wf {
    Wf::new()
        .rule(Kind::Rego, vec![opt(&[Kind::Query]), one(&[Kind::Policy])])
        .rule(
            Kind::Module,
            vec![one(&[Kind::Package]), one(&[Kind::ImportSeq]), one(&[Kind::Policy])],
        )
        .rule(Kind::Package, vec![one(&[Kind::Ref])])
        .rule(Kind::ImportSeq, vec![many(&[Kind::Import])])
        .rule(Kind::Import, vec![one(&[Kind::Ref])])
        .rule(
            Kind::Rule,
            vec![one(&[Kind::RuleRef]), one(&[Kind::RuleHead]), one(&[Kind::RuleBodySeq])],
        )
        .rule(Kind::DefaultRule, vec![one(&[Kind::RuleRef]), one(&[Kind::Expr])])
        .rule(Kind::RuleRef, vec![some(&[Kind::Var, Kind::JSONString])])
        .rule(
            Kind::RuleHead,
            vec![one(&[
                Kind::RuleHeadComp,
                Kind::RuleHeadFunc,
                Kind::RuleHeadSet,
                Kind::RuleHeadObj,
            ])],
        )
        .rule(Kind::RuleHeadComp, vec![one(&[Kind::Expr])])
        .rule(Kind::RuleHeadFunc, vec![one(&[Kind::RuleArgs]), one(&[Kind::Expr])])
        .rule(Kind::RuleHeadSet, vec![one(&[Kind::Expr])])
        .rule(Kind::RuleHeadObj, vec![one(&[Kind::Expr]), one(&[Kind::Expr])])
        .rule(Kind::RuleArgs, vec![many(&[Kind::Term, Kind::Var])])
        .rule(Kind::RuleBodySeq, vec![many(&[Kind::RuleBody, Kind::Else])])
        .rule(Kind::RuleBody, vec![opt(&[Kind::UnifyBody])])
        .rule(Kind::Else, vec![opt(&[Kind::Expr]), opt(&[Kind::UnifyBody])])
        .rule(Kind::Query, vec![one(&[Kind::UnifyBody])])
        .rule(Kind::UnifyBody, vec![some(&[Kind::Literal])])
        .rule(Kind::Literal, vec![one(LITERAL_INNER), opt(&[Kind::WithSeq])])
        .rule(Kind::NotExpr, vec![one(&[Kind::Expr])])
        .rule(Kind::SomeDecl, vec![one(&[Kind::VarSeq]), opt(&[Kind::Expr])])
        .rule(Kind::VarSeq, vec![some(&[Kind::Var])])
        .rule(Kind::WithSeq, vec![some(&[Kind::With])])
        .rule(Kind::With, vec![one(&[Kind::Ref]), one(&[Kind::Expr])])
        .rule(Kind::Expr, vec![one(EXPR_INNER)])
        .rule(Kind::Infix, vec![one(&[Kind::Expr]), one(OP_KINDS), one(&[Kind::Expr])])
        .rule(Kind::UnaryExpr, vec![one(&[Kind::Expr])])
        .rule(Kind::ExprCall, vec![one(&[Kind::Ref]), one(&[Kind::ExprSeq])])
        .rule(Kind::ExprSeq, vec![many(&[Kind::Expr])])
        .rule(Kind::Term, vec![one(TERM_INNER)])
        .rule(Kind::Scalar, vec![one(SCALAR_INNER)])
        .rule(Kind::Ref, vec![one(&[Kind::RefHead]), one(&[Kind::RefArgSeq])])
        .rule(Kind::RefHead, vec![one(&[Kind::Var, Kind::Term, Kind::ExprCall])])
        .rule(Kind::RefArgSeq, vec![many(&[Kind::RefArgDot, Kind::RefArgBrack])])
        .rule(Kind::RefArgDot, vec![one(&[Kind::Var])])
        .rule(Kind::RefArgBrack, vec![one(&[Kind::Expr])])
        .rule(Kind::Array, vec![many(&[Kind::Expr])])
        .rule(Kind::Set, vec![many(&[Kind::Expr])])
        .rule(Kind::Object, vec![many(&[Kind::ObjectItem])])
        .rule(Kind::ObjectItem, vec![one(&[Kind::Expr]), one(&[Kind::Expr])])
        .rule(Kind::ArrayCompr, vec![one(&[Kind::Expr]), one(&[Kind::UnifyBody])])
        .rule(Kind::SetCompr, vec![one(&[Kind::Expr]), one(&[Kind::UnifyBody])])
        .rule(
            Kind::ObjectCompr,
            vec![one(&[Kind::Expr]), one(&[Kind::Expr]), one(&[Kind::UnifyBody])],
        )
        .rule(Kind::Membership, vec![many(&[Kind::Expr])])
        .leaf(Kind::Var)
        .leaf(Kind::Int)
        .leaf(Kind::Float)
        .leaf(Kind::JSONString)
        .leaf(Kind::RawString)
        .leaf(Kind::True)
        .leaf(Kind::False)
        .leaf(Kind::Null)
        .leaf(Kind::Undefined)
}

/// WF after the surface shaping passes (`lists` … `structure`): raw strings
/// are gone, memberships are ternary, negation and `with` modifiers carry
/// nested bodies, the policy root carries modules.
pub fn wf_structure() -> Wf {
    wf_parse()
        .drop_rule(Kind::RawString)
        .rule(Kind::Policy, vec![many(&[Kind::Module])])
        .rule(
            Kind::Membership,
            vec![one(&[Kind::Expr, Kind::Undefined]), one(&[Kind::Expr]), one(&[Kind::Expr])],
        )
        .rule(Kind::ImportSeq, vec![many(&[Kind::Import, Kind::Keyword])])
        .leaf(Kind::Keyword)
        .rule(
            Kind::UnifyBody,
            vec![some(&[Kind::Literal, Kind::LiteralNot, Kind::LiteralWith])],
        )
        .rule(Kind::Literal, vec![one(&[Kind::Expr, Kind::SomeDecl])])
        .rule(Kind::LiteralNot, vec![one(&[Kind::UnifyBody])])
        .rule(
            Kind::LiteralWith,
            vec![one(&[Kind::Ref]), one(&[Kind::Expr]), one(&[Kind::UnifyBody])],
        )
}

/// WF after `symbols` … `expand_imports`: bodies declare locals and rule
/// heads are classified.
pub fn wf_symbols() -> Wf {
    wf_structure()
        .rule(
            Kind::UnifyBody,
            vec![
                many(&[Kind::Local]),
                many(&[Kind::Literal, Kind::LiteralNot, Kind::LiteralWith, Kind::LiteralEnum]),
            ],
        )
        .leaf(Kind::Local)
        .rule(
            Kind::LiteralEnum,
            vec![one(&[Kind::Var]), one(&[Kind::Var]), one(&[Kind::Expr])],
        )
        .rule(Kind::RuleBody, vec![opt(&[Kind::UnifyBody])])
}

/// WF after the dataflow passes (`constants` … `rulebody`): literals carry
/// unify statements, enumerations and modifiers.
pub fn wf_dataflow() -> Wf {
    wf_symbols()
        .rule(
            Kind::UnifyBody,
            vec![
                many(&[Kind::Local]),
                many(&[
                    Kind::UnifyExpr,
                    Kind::LiteralEnum,
                    Kind::LiteralInit,
                    Kind::LiteralNot,
                    Kind::LiteralWith,
                ]),
            ],
        )
        .rule(Kind::UnifyExpr, vec![one(&[Kind::Var]), one(&[Kind::Expr])])
        .rule(Kind::LiteralInit, vec![one(&[Kind::UnifyExpr])])
        .rule(
            Kind::ArithInfix,
            vec![one(&[Kind::Expr]), one(OP_KINDS), one(&[Kind::Expr])],
        )
        .rule(
            Kind::BoolInfix,
            vec![one(&[Kind::Expr]), one(OP_KINDS), one(&[Kind::Expr])],
        )
        .rule(
            Kind::BinInfix,
            vec![one(&[Kind::Expr]), one(OP_KINDS), one(&[Kind::Expr])],
        )
        .rule(
            Kind::AssignInfix,
            vec![one(&[Kind::Expr]), one(&[Kind::Expr])],
        )
        .leaf(Kind::DataTerm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Location;

    #[test]
    fn leaf_with_children_is_rejected() {
        let mut ast = Ast::new();
        let var = ast.node_with_text(Kind::Var, Location::synthetic(), "x");
        let child = ast.node(Kind::Expr, Location::synthetic());
        ast.push_child(var, child);
        let errors = wf_parse().check(&ast, var);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.errors[0].code, ErrorCode::ParseError);
    }

    #[test]
    fn well_formed_rule_passes() {
        let mut ast = Ast::new();
        let rule = ast.node(Kind::Rule, Location::synthetic());
        let rule_ref = ast.node(Kind::RuleRef, Location::synthetic());
        let name = ast.node_with_text(Kind::Var, Location::synthetic(), "allow");
        ast.push_child(rule_ref, name);
        ast.push_child(rule, rule_ref);
        let head = ast.node(Kind::RuleHead, Location::synthetic());
        let comp = ast.node(Kind::RuleHeadComp, Location::synthetic());
        let expr = ast.node(Kind::Expr, Location::synthetic());
        let term = ast.node(Kind::Term, Location::synthetic());
        let scalar = ast.node(Kind::Scalar, Location::synthetic());
        let val = ast.node_with_text(Kind::True, Location::synthetic(), "true");
        ast.push_child(scalar, val);
        ast.push_child(term, scalar);
        ast.push_child(expr, term);
        ast.push_child(comp, expr);
        ast.push_child(head, comp);
        ast.push_child(rule, head);
        let bodies = ast.node(Kind::RuleBodySeq, Location::synthetic());
        ast.push_child(rule, bodies);
        let errors = wf_parse().check(&ast, rule);
        assert!(errors.is_empty(), "{errors}");
    }

    #[test]
    fn missing_required_child_is_reported() {
        let mut ast = Ast::new();
        let rule = ast.node(Kind::Rule, Location::synthetic());
        let errors = wf_parse().check(&ast, rule);
        assert_eq!(errors.len(), 1);
    }
}
