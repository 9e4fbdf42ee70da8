//! Reference resolution passes: absolute `data.…` paths, the virtual
//! document tree, static recursion detection, and unresolved-identifier
//! checks.

use crate::ast::{Kind, NodeId};
use crate::errors::{ErrorCode, ErrorSeq, PolicyError};
use crate::rewrite::{Direction, Matcher, Pass, Rewrite};

use super::{Compiler, RuleGroup, RuleTree};

fn rule_binding(ctx: &Compiler, var: NodeId) -> bool {
    ctx.ast
        .lookup(var)
        .iter()
        .any(|&b| matches!(ctx.ast.kind(b), Kind::Rule | Kind::DefaultRule))
}

/// Builds `Ref(data.<pkg>.<name>)` with `extra` arguments appended.
fn absolute_ref(ctx: &mut Compiler, var: NodeId, extra: Vec<NodeId>) -> NodeId {
    let loc = ctx.ast.loc(var).clone();
    let pkg = ctx.module_path(var).unwrap_or_default();
    let name = ctx.ast.text(var).to_owned();

    let head_var = ctx.ast.node_with_text(Kind::Var, loc.clone(), "data");
    let head = ctx.ast.node(Kind::RefHead, loc.clone());
    ctx.ast.push_child(head, head_var);
    let argseq = ctx.ast.node(Kind::RefArgSeq, loc.clone());
    for segment in pkg.split('.').map(str::to_owned).chain(std::iter::once(name)) {
        let seg_var = ctx.ast.node_with_text(Kind::Var, loc.clone(), segment);
        let arg = ctx.ast.node(Kind::RefArgDot, loc.clone());
        ctx.ast.push_child(arg, seg_var);
        ctx.ast.push_child(argseq, arg);
    }
    for arg in extra {
        ctx.ast.push_child(argseq, arg);
    }
    let reference = ctx.ast.node(Kind::Ref, loc);
    ctx.ast.push_child(reference, head);
    ctx.ast.push_child(reference, argseq);
    reference
}

/// Rewrites every reference to a same-module rule into an absolute
/// `data.…` path.
pub fn absolute_refs() -> Pass<Compiler> {
    Pass::new("absolute_refs", Direction::TopDown)
        .rule(Matcher::kind(Kind::Ref), |ctx: &mut Compiler, node, _| {
            let head = ctx.ast.child(node, 0);
            let head_var = ctx.ast.child(head, 0);
            if ctx.ast.kind(head_var) != Kind::Var {
                return Ok(Rewrite::Keep);
            }
            let name = ctx.ast.text(head_var);
            if name == "input" || name == "data" || name.contains('$') {
                return Ok(Rewrite::Keep);
            }
            if !rule_binding(ctx, head_var) {
                return Ok(Rewrite::Keep);
            }
            let argseq = ctx.ast.child(node, 1);
            let extra: Vec<NodeId> = ctx.ast.take_children(argseq);
            let replacement = absolute_ref(ctx, head_var, extra);
            Ok(Rewrite::Replace(replacement))
        })
        .rule(
            Matcher::kind(Kind::Var).within(&[Kind::Term]),
            |ctx: &mut Compiler, node, _| {
                let name = ctx.ast.text(node);
                if name == "input" || name == "data" || name.contains('$') {
                    return Ok(Rewrite::Keep);
                }
                if !rule_binding(ctx, node) {
                    return Ok(Rewrite::Keep);
                }
                let replacement = absolute_ref(ctx, node, Vec::new());
                Ok(Rewrite::Replace(replacement))
            },
        )
}

/// Fuses all modules' rules into the virtual document tree, checking that
/// every group is of one head kind and one arity.
pub fn merge_modules() -> Pass<Compiler> {
    Pass::new("merge_modules", Direction::TopDown).pre(|ctx: &mut Compiler, root| {
        let mut errors = ErrorSeq::new();
        let mut tree = RuleTree::default();

        for node in ctx.ast.walk(root) {
            let kind = ctx.ast.kind(node);
            if !matches!(kind, Kind::Rule | Kind::DefaultRule) {
                continue;
            }
            let path = ctx.ast.text(node).to_owned();
            let segments: Vec<String> = path.split('.').map(str::to_owned).collect();
            let Some((name, pkg)) = segments.split_last() else { continue };
            let package = tree.descend(pkg);
            let group = package.rules.entry(name.clone()).or_insert_with(RuleGroup::default);
            if kind == Kind::DefaultRule {
                group.defaults.push(node);
            } else {
                group.rules.push(node);
            }
        }

        // shape checks per group
        for (path, group) in all_groups(&tree, String::new()) {
            let mut kinds = group
                .rules
                .iter()
                .map(|&rule| head_kind(ctx, rule))
                .collect::<Vec<_>>();
            kinds.dedup();
            if kinds.len() > 1 {
                let rule = group.rules[0];
                errors.push(PolicyError::at(
                    ErrorCode::CompileError,
                    format!("rule {path} has conflicting definition kinds"),
                    ctx.ast.loc(rule),
                ));
            }
            let mut arities: Vec<usize> = group.rules.iter().map(|&rule| rule_arity(ctx, rule)).collect();
            arities.dedup();
            if arities.len() > 1 {
                let rule = group.rules[0];
                errors.push(PolicyError::at(
                    ErrorCode::CompileError,
                    format!("function {path} has conflicting arities"),
                    ctx.ast.loc(rule),
                ));
            }
            if group.rules.is_empty() && !group.defaults.is_empty() {
                // a default needs at least the shape of its group; treat a
                // lone default as a complete rule, which needs no check
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }
        ctx.rule_tree = tree;
        Ok(())
    })
}

fn all_groups(tree: &RuleTree, prefix: String) -> Vec<(String, &RuleGroup)> {
    let mut out = Vec::new();
    for (name, group) in &tree.rules {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        out.push((path, group));
    }
    for (name, child) in &tree.children {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        out.extend(all_groups(child, path));
    }
    out
}

pub(super) fn head_kind(ctx: &Compiler, rule: NodeId) -> Kind {
    let head = ctx.ast.child(rule, 1);
    ctx.ast.kind(ctx.ast.child(head, 0))
}

pub(super) fn rule_arity(ctx: &Compiler, rule: NodeId) -> usize {
    let head = ctx.ast.child(rule, 1);
    let inner = ctx.ast.child(head, 0);
    if ctx.ast.kind(inner) == Kind::RuleHeadFunc {
        ctx.ast.size(ctx.ast.child(inner, 0))
    } else {
        0
    }
}

/// Resolves the longest rule-group prefix of a dotted data path.
pub(super) fn resolve_rule_path<'t>(tree: &'t RuleTree, segments: &[String]) -> Option<(usize, &'t RuleGroup)> {
    let mut node = tree;
    for (index, segment) in segments.iter().enumerate() {
        if let Some(group) = node.rules.get(segment) {
            return Some((index + 1, group));
        }
        match node.children.get(segment) {
            Some(child) => node = child,
            None => return None,
        }
    }
    None
}

/// Static recursion detection over the rule-call graph.
pub fn skips() -> Pass<Compiler> {
    Pass::new("skips", Direction::TopDown).pre(|ctx: &mut Compiler, root| {
        // edges: group path -> referenced group paths
        let mut edges: std::collections::BTreeMap<String, Vec<String>> = std::collections::BTreeMap::new();
        for node in ctx.ast.walk(root) {
            if ctx.ast.kind(node) != Kind::Rule {
                continue;
            }
            let from = ctx.ast.text(node).to_owned();
            let mut deps = Vec::new();
            for inner in ctx.ast.walk(node) {
                if ctx.ast.kind(inner) != Kind::Ref {
                    continue;
                }
                let head_var = ctx.ast.child(ctx.ast.child(inner, 0), 0);
                if ctx.ast.kind(head_var) != Kind::Var || ctx.ast.text(head_var) != "data" {
                    continue;
                }
                let mut segments = Vec::new();
                for &arg in ctx.ast.children(ctx.ast.child(inner, 1)) {
                    if ctx.ast.kind(arg) != Kind::RefArgDot {
                        break;
                    }
                    segments.push(ctx.ast.text(ctx.ast.child(arg, 0)).to_owned());
                }
                if let Some((depth, _)) = resolve_rule_path(&ctx.rule_tree, &segments) {
                    deps.push(segments[..depth].join("."));
                }
            }
            edges.entry(from).or_default().extend(deps);
        }

        // depth-first search with an active path for cycle detection
        let mut done = std::collections::BTreeSet::new();
        for start in edges.keys().cloned().collect::<Vec<_>>() {
            let mut active = Vec::new();
            if let Err(cycle) = visit(&edges, &mut done, &mut active, &start) {
                return Err(ErrorSeq::of(PolicyError::new(
                    ErrorCode::RecursionError,
                    format!("rule {cycle} is recursive"),
                    None,
                )));
            }
        }
        Ok(())
    })
}

fn visit(
    edges: &std::collections::BTreeMap<String, Vec<String>>,
    done: &mut std::collections::BTreeSet<String>,
    active: &mut Vec<String>,
    node: &str,
) -> Result<(), String> {
    if done.contains(node) {
        return Ok(());
    }
    if active.iter().any(|n| n == node) {
        return Err(node.to_owned());
    }
    active.push(node.to_owned());
    if let Some(deps) = edges.get(node) {
        for dep in deps {
            visit(edges, done, active, dep)?;
        }
    }
    active.pop();
    done.insert(node.to_owned());
    Ok(())
}

/// Every remaining plain variable must resolve to something.
pub fn simple_refs() -> Pass<Compiler> {
    Pass::new("simple_refs", Direction::TopDown).rule(
        Matcher::kind(Kind::Var).within(&[Kind::Term, Kind::RefHead]),
        |ctx: &mut Compiler, node, _| {
            let name = ctx.ast.text(node);
            if name == "input" || name == "data" || name == "_" || name.contains('$') {
                return Ok(Rewrite::Keep);
            }
            // callee heads resolve in the functions pass
            if let Some(parent) = ctx.ast.parent(node) {
                if ctx.ast.kind(parent) == Kind::RefHead {
                    let reference = ctx.ast.parent(parent);
                    if let Some(r) = reference {
                        if ctx
                            .ast
                            .parent(r)
                            .is_some_and(|g| ctx.ast.kind(g) == Kind::ExprCall && ctx.ast.child_index(g, r) == Some(0))
                        {
                            return Ok(Rewrite::Keep);
                        }
                    }
                }
            }
            if ctx.ast.lookup(node).is_empty() {
                return Err(ctx.compile_error(node, format!("unresolved identifier: {name}")));
            }
            Ok(Rewrite::Keep)
        },
    )
}
