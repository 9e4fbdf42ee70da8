//! The rewrite engine driving all compiler passes.
//!
//! A pass is `(name, direction, rules, wf_out)`. A rule pairs a [`Matcher`]
//! (data: kind sets, an optional parent constraint, positional child
//! patterns with named captures) with an action that builds a replacement.
//! The engine sweeps the tree in the pass direction and loops to a fixed
//! point: replacements are spliced in place and may expose new matches.
//! Actions may also lift nodes into a named enclosing scope, which is how
//! prelude statements reach their body.

use ahash::AHashMap;

use crate::ast::{Ast, Kind, NodeId};
use crate::errors::{ErrorCode, ErrorSeq, PolicyError};
use crate::wf::Wf;

/// Traversal order for a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    TopDown,
    BottomUp,
}

/// Anything the engine can drive a pass over: the AST plus whatever pass
/// state the pipeline carries.
pub trait HasAst {
    fn ast(&self) -> &Ast;
    fn ast_mut(&mut self) -> &mut Ast;
}

/// Captures bound during a match, keyed by the capture tags in the matcher.
/// Repeated (`rest`) captures bind every remaining child.
#[derive(Debug, Default)]
pub struct Caps {
    bound: AHashMap<&'static str, Vec<NodeId>>,
}

impl Caps {
    /// The single node bound to `tag`.
    pub fn node(&self, tag: &str) -> NodeId {
        self.bound[tag][0]
    }

    /// All nodes bound to `tag`.
    pub fn seq(&self, tag: &str) -> &[NodeId] {
        self.bound.get(tag).map_or(&[], Vec::as_slice)
    }
}

/// Positional child pattern inside a [`Matcher`].
#[derive(Debug, Clone)]
pub struct ChildPat {
    kinds: Vec<Kind>,
    cap: Option<&'static str>,
    rest: bool,
}

/// A tree pattern: node kind, optional parent kind constraint, optional
/// positional child sequence.
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    kinds: Vec<Kind>,
    in_parent: Option<Vec<Kind>>,
    children: Option<Vec<ChildPat>>,
}

impl Matcher {
    pub fn kind(kind: Kind) -> Self {
        Self {
            kinds: vec![kind],
            ..Self::default()
        }
    }

    pub fn kinds(kinds: &[Kind]) -> Self {
        Self {
            kinds: kinds.to_vec(),
            ..Self::default()
        }
    }

    /// Constrains the parent's kind (trieste's `In(..)`).
    pub fn within(mut self, kinds: &[Kind]) -> Self {
        self.in_parent = Some(kinds.to_vec());
        self
    }

    /// Adds a positional child pattern capturing one node.
    pub fn child(mut self, kinds: &[Kind], cap: &'static str) -> Self {
        self.children.get_or_insert_with(Vec::new).push(ChildPat {
            kinds: kinds.to_vec(),
            cap: Some(cap),
            rest: false,
        });
        self
    }

    /// Adds a trailing pattern capturing all remaining children.
    pub fn rest(mut self, kinds: &[Kind], cap: &'static str) -> Self {
        self.children.get_or_insert_with(Vec::new).push(ChildPat {
            kinds: kinds.to_vec(),
            cap: Some(cap),
            rest: true,
        });
        self
    }

    fn matches(&self, ast: &Ast, node: NodeId) -> Option<Caps> {
        if !self.kinds.contains(&ast.kind(node)) {
            return None;
        }
        if let Some(parents) = &self.in_parent {
            let parent = ast.parent(node)?;
            if !parents.contains(&ast.kind(parent)) {
                return None;
            }
        }
        let mut caps = Caps::default();
        if let Some(pats) = &self.children {
            let children = ast.children(node);
            let mut pos = 0;
            for pat in pats {
                if pat.rest {
                    let mut bound = Vec::new();
                    while pos < children.len() {
                        if !pat.kinds.is_empty() && !pat.kinds.contains(&ast.kind(children[pos])) {
                            return None;
                        }
                        bound.push(children[pos]);
                        pos += 1;
                    }
                    if let Some(tag) = pat.cap {
                        caps.bound.insert(tag, bound);
                    }
                } else {
                    if pos >= children.len() {
                        return None;
                    }
                    if !pat.kinds.is_empty() && !pat.kinds.contains(&ast.kind(children[pos])) {
                        return None;
                    }
                    if let Some(tag) = pat.cap {
                        caps.bound.insert(tag, vec![children[pos]]);
                    }
                    pos += 1;
                }
            }
            if pos != children.len() {
                return None;
            }
        }
        Some(caps)
    }
}

/// What an action did to the matched node.
pub enum Rewrite {
    /// Leave the node as is (the rule did not apply after all).
    Keep,
    /// Replace the node.
    Replace(NodeId),
    /// Replace the node with an inline sequence spliced into the parent.
    Seq(Vec<NodeId>),
    /// Replace the node and hoist `lifted` into the nearest enclosing
    /// ancestor of `scope`, just before the subtree containing the match.
    Lift {
        replacement: NodeId,
        scope: Kind,
        lifted: Vec<NodeId>,
    },
}

type Action<C> = Box<dyn Fn(&mut C, NodeId, &Caps) -> Result<Rewrite, PolicyError>>;

/// One rewrite rule.
pub struct Rule<C> {
    matcher: Matcher,
    action: Action<C>,
}

impl<C> Rule<C> {
    pub fn new(
        matcher: Matcher,
        action: impl Fn(&mut C, NodeId, &Caps) -> Result<Rewrite, PolicyError> + 'static,
    ) -> Self {
        Self {
            matcher,
            action: Box::new(action),
        }
    }
}

type Hook<C> = Box<dyn Fn(&mut C, NodeId) -> Result<(), ErrorSeq>>;

/// A compiler pass.
pub struct Pass<C> {
    pub name: &'static str,
    pub direction: Direction,
    rules: Vec<Rule<C>>,
    /// Whole-tree transform run before the rules (trieste's `pre` hook);
    /// carries the passes whose work is not expressible as local rewrites.
    pre: Option<Hook<C>>,
    wf_out: Option<Wf>,
}

/// Sweep limit; a pass that keeps rewriting past this is cyclic.
const MAX_SWEEPS: usize = 10_000;

impl<C: HasAst> Pass<C> {
    pub fn new(name: &'static str, direction: Direction) -> Self {
        Self {
            name,
            direction,
            rules: Vec::new(),
            pre: None,
            wf_out: None,
        }
    }

    pub fn rule(
        mut self,
        matcher: Matcher,
        action: impl Fn(&mut C, NodeId, &Caps) -> Result<Rewrite, PolicyError> + 'static,
    ) -> Self {
        self.rules.push(Rule::new(matcher, action));
        self
    }

    pub fn pre(mut self, hook: impl Fn(&mut C, NodeId) -> Result<(), ErrorSeq> + 'static) -> Self {
        self.pre = Some(Box::new(hook));
        self
    }

    pub fn wf(mut self, wf: Wf) -> Self {
        self.wf_out = Some(wf);
        self
    }

    /// Runs the pass over the tree under `root` to a fixed point, then
    /// validates `wf_out` when `check_wf` is set.
    pub fn run(&self, ctx: &mut C, root: NodeId, check_wf: bool) -> Result<(), ErrorSeq> {
        log::debug!("pass {}", self.name);
        if let Some(pre) = &self.pre {
            pre(ctx, root)?;
        }

        let mut sweeps = 0;
        loop {
            let changed = self.sweep(ctx, root).map_err(ErrorSeq::of)?;
            if !changed {
                break;
            }
            sweeps += 1;
            if sweeps > MAX_SWEEPS {
                return Err(ErrorSeq::of(PolicyError::new(
                    ErrorCode::CompileError,
                    format!("pass {} did not converge", self.name),
                    None,
                )));
            }
        }

        if check_wf {
            if let Some(wf) = &self.wf_out {
                let errors = wf.check(ctx.ast(), root);
                if !errors.is_empty() {
                    return Err(errors);
                }
            }
        }
        Ok(())
    }

    fn sweep(&self, ctx: &mut C, root: NodeId) -> Result<bool, PolicyError> {
        let mut order = ctx.ast().walk(root);
        if self.direction == Direction::BottomUp {
            order.reverse();
        }

        for node in order {
            // the node may have been detached by an earlier rewrite this sweep
            if node != root && ctx.ast().parent(node).is_none() {
                continue;
            }
            for rule in &self.rules {
                let Some(caps) = rule.matcher.matches(ctx.ast(), node) else {
                    continue;
                };
                match (rule.action)(ctx, node, &caps)? {
                    Rewrite::Keep => {}
                    Rewrite::Replace(new) => {
                        ctx.ast_mut().replace(node, new);
                        return Ok(true);
                    }
                    Rewrite::Seq(nodes) => {
                        ctx.ast_mut().replace_with_seq(node, nodes);
                        return Ok(true);
                    }
                    Rewrite::Lift {
                        replacement,
                        scope,
                        lifted,
                    } => {
                        lift_into(ctx.ast_mut(), node, scope, lifted)?;
                        if replacement != node {
                            ctx.ast_mut().replace(node, replacement);
                        }
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }
}

/// Inserts `lifted` into the nearest ancestor of kind `scope`, before the
/// child subtree that contains `from`.
fn lift_into(ast: &mut Ast, from: NodeId, scope: Kind, lifted: Vec<NodeId>) -> Result<(), PolicyError> {
    let mut node = from;
    let mut parent = ast.parent(node);
    while let Some(p) = parent {
        if ast.kind(p) == scope {
            let index = ast.child_index(p, node).unwrap_or(0);
            for (offset, item) in lifted.into_iter().enumerate() {
                ast.insert_child(p, index + offset, item);
            }
            return Ok(());
        }
        node = p;
        parent = ast.parent(node);
    }
    Err(PolicyError::at(
        ErrorCode::CompileError,
        format!("no enclosing {scope} to lift into"),
        ast.loc(from),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Location;

    struct Ctx {
        ast: Ast,
    }

    impl HasAst for Ctx {
        fn ast(&self) -> &Ast {
            &self.ast
        }
        fn ast_mut(&mut self) -> &mut Ast {
            &mut self.ast
        }
    }

    fn loc() -> Location {
        Location::synthetic()
    }

    #[test]
    fn rewrites_to_fixpoint() {
        // RawString -> JSONString everywhere, in one pass
        let mut ctx = Ctx { ast: Ast::new() };
        let root = ctx.ast.node(Kind::ExprSeq, loc());
        for text in ["a", "b"] {
            let raw = ctx.ast.node_with_text(Kind::RawString, loc(), text);
            ctx.ast.push_child(root, raw);
        }
        let pass = Pass::new("strings", Direction::TopDown).rule(Matcher::kind(Kind::RawString), |ctx: &mut Ctx, node, _| {
            let text = ctx.ast.text(node).to_owned();
            let loc = ctx.ast.loc(node).clone();
            let new = ctx.ast.node_with_text(Kind::JSONString, loc, text);
            Ok(Rewrite::Replace(new))
        });
        pass.run(&mut ctx, root, false).unwrap();
        let kinds: Vec<Kind> = ctx.ast.children(root).iter().map(|&c| ctx.ast.kind(c)).collect();
        assert_eq!(kinds, vec![Kind::JSONString, Kind::JSONString]);
    }

    #[test]
    fn seq_rewrites_splice() {
        let mut ctx = Ctx { ast: Ast::new() };
        let root = ctx.ast.node(Kind::ExprSeq, loc());
        let pair = ctx.ast.node(Kind::VarSeq, loc());
        let a = ctx.ast.node_with_text(Kind::Var, loc(), "a");
        let b = ctx.ast.node_with_text(Kind::Var, loc(), "b");
        ctx.ast.push_child(pair, a);
        ctx.ast.push_child(pair, b);
        ctx.ast.push_child(root, pair);

        let pass = Pass::new("flatten", Direction::TopDown).rule(
            Matcher::kind(Kind::VarSeq).rest(&[Kind::Var], "vars"),
            |ctx: &mut Ctx, _, caps| {
                let vars: Vec<NodeId> = caps.seq("vars").to_vec();
                for &v in &vars {
                    ctx.ast.detach(v);
                }
                Ok(Rewrite::Seq(vars))
            },
        );
        pass.run(&mut ctx, root, false).unwrap();
        assert_eq!(ctx.ast.children(root), &[a, b]);
    }

    #[test]
    fn matcher_child_patterns_capture() {
        let mut ctx = Ctx { ast: Ast::new() };
        let infix = ctx.ast.node(Kind::Infix, loc());
        let lhs = ctx.ast.node(Kind::Expr, loc());
        let op = ctx.ast.node(Kind::Add, loc());
        let rhs = ctx.ast.node(Kind::Expr, loc());
        ctx.ast.push_child(infix, lhs);
        ctx.ast.push_child(infix, op);
        ctx.ast.push_child(infix, rhs);

        let matcher = Matcher::kind(Kind::Infix)
            .child(&[Kind::Expr], "lhs")
            .child(&[Kind::Add], "op")
            .child(&[Kind::Expr], "rhs");
        let caps = matcher.matches(&ctx.ast, infix).expect("should match");
        assert_eq!(caps.node("lhs"), lhs);
        assert_eq!(caps.node("rhs"), rhs);

        let wrong = Matcher::kind(Kind::Infix)
            .child(&[Kind::Expr], "lhs")
            .child(&[Kind::Subtract], "op")
            .child(&[Kind::Expr], "rhs");
        assert!(wrong.matches(&ctx.ast, infix).is_none());
    }
}
