//! The unifier: per-body dependency analysis.
//!
//! For every `UnifyBody` this pass builds the variable table and the
//! statement list, wires the read/write dependency graph, computes each
//! statement's dependency score (its minimum topological rank), rejects
//! genuine cycles as recursion errors and unsafe variables as compile
//! errors, and finally reorders the statements in score order (ties broken
//! by source order). Emission then realizes the candidate-narrowing
//! semantics operationally: enumeration frames, soft failure, negation and
//! overrides are all VM behavior over the ordered statements.

use ahash::{AHashMap, AHashSet};

use crate::ast::{Kind, NodeId};
use crate::errors::{ErrorCode, ErrorSeq, PolicyError};
use crate::rewrite::{Direction, Pass};
use crate::wf::wf_dataflow;

use super::Compiler;

pub fn unify() -> Pass<Compiler> {
    Pass::new("unify", Direction::TopDown)
        .pre(|ctx: &mut Compiler, root| {
            let bodies: Vec<NodeId> = ctx
                .ast
                .walk(root)
                .into_iter()
                .filter(|&n| ctx.ast.kind(n) == Kind::UnifyBody)
                .collect();
            let mut errors = ErrorSeq::new();
            for body in bodies {
                if let Err(error) = order_body(ctx, body) {
                    errors.push(error);
                }
            }
            if errors.is_empty() {
                Ok(())
            } else {
                Err(errors)
            }
        })
        .wf(wf_dataflow())
}

/// Variables a statement binds, restricted to the given local set.
fn statement_writes(ctx: &Compiler, stmt: NodeId, locals: &AHashSet<String>, out: &mut AHashSet<String>) {
    match ctx.ast.kind(stmt) {
        Kind::UnifyExpr => {
            let name = ctx.ast.text(ctx.ast.child(stmt, 0));
            if locals.contains(name) {
                out.insert(name.to_owned());
            }
        }
        Kind::LiteralInit => statement_writes(ctx, ctx.ast.child(stmt, 0), locals, out),
        Kind::LiteralEnum => {
            for index in 0..2 {
                let name = ctx.ast.text(ctx.ast.child(stmt, index));
                if locals.contains(name) {
                    out.insert(name.to_owned());
                }
            }
        }
        Kind::LiteralWith => {
            // inner statements may bind outer locals
            let body = ctx.ast.child(stmt, 2);
            for &child in ctx.ast.children(body) {
                if ctx.ast.kind(child) != Kind::Local {
                    statement_writes(ctx, child, locals, out);
                }
            }
        }
        _ => {}
    }
}

/// Variables a statement reads, restricted to the given local set.
fn statement_reads(
    ctx: &Compiler,
    stmt: NodeId,
    locals: &AHashSet<String>,
    writes: &AHashSet<String>,
    out: &mut AHashSet<String>,
) {
    for node in ctx.ast.walk(stmt) {
        if ctx.ast.kind(node) != Kind::Var {
            continue;
        }
        // binding positions are not reads
        if let Some(parent) = ctx.ast.parent(node) {
            let is_binding = match ctx.ast.kind(parent) {
                Kind::UnifyExpr => ctx.ast.child_index(parent, node) == Some(0),
                Kind::LiteralEnum => ctx.ast.child_index(parent, node).is_some_and(|i| i < 2),
                _ => false,
            };
            if is_binding {
                continue;
            }
        }
        let name = ctx.ast.text(node);
        if locals.contains(name) && !writes.contains(name) {
            out.insert(name.to_owned());
        }
    }
}

fn order_body(ctx: &mut Compiler, body: NodeId) -> Result<(), PolicyError> {
    let children: Vec<NodeId> = ctx.ast.children(body).to_vec();
    let locals: Vec<NodeId> = children
        .iter()
        .copied()
        .filter(|&c| ctx.ast.kind(c) == Kind::Local)
        .collect();
    let statements: Vec<NodeId> = children
        .iter()
        .copied()
        .filter(|&c| ctx.ast.kind(c) != Kind::Local)
        .collect();

    let local_names: AHashSet<String> = locals.iter().map(|&l| ctx.ast.text(l).to_owned()).collect();

    // per-statement reads and writes
    let mut writes: Vec<AHashSet<String>> = Vec::with_capacity(statements.len());
    let mut reads: Vec<AHashSet<String>> = Vec::with_capacity(statements.len());
    for &stmt in &statements {
        let mut w = AHashSet::new();
        statement_writes(ctx, stmt, &local_names, &mut w);
        let mut r = AHashSet::new();
        statement_reads(ctx, stmt, &local_names, &w, &mut r);
        writes.push(w);
        reads.push(r);
    }

    // writers per variable
    let mut writers: AHashMap<&str, Vec<usize>> = AHashMap::new();
    for (index, w) in writes.iter().enumerate() {
        for name in w {
            writers.entry(name.as_str()).or_default().push(index);
        }
    }

    // unsafe variables: read but never written
    for (index, r) in reads.iter().enumerate() {
        for name in r {
            if !writers.contains_key(name.as_str()) {
                return Err(PolicyError::at(
                    ErrorCode::CompileError,
                    format!("variable {name} is unsafe (never bound)"),
                    ctx.ast.loc(statements[index]),
                ));
            }
        }
    }

    // dependency scores: the minimum rank at which all read variables have
    // a writer already placed
    let count = statements.len();
    let mut score = vec![usize::MAX; count];
    for _round in 0..=count {
        let mut progressed = false;
        for index in 0..count {
            if score[index] != usize::MAX {
                continue;
            }
            let mut rank = 0;
            let mut blocked = false;
            for name in &reads[index] {
                let deps = &writers[name.as_str()];
                // a reader waits for its earliest writer
                let best = deps
                    .iter()
                    .filter(|&&d| d != index)
                    .map(|&d| score[d])
                    .min()
                    .unwrap_or(usize::MAX);
                if best == usize::MAX {
                    blocked = true;
                    break;
                }
                rank = rank.max(best + 1);
            }
            if !blocked {
                score[index] = rank;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    if let Some(index) = score.iter().position(|&s| s == usize::MAX) {
        return Err(PolicyError::at(
            ErrorCode::RecursionError,
            "cyclic dependency between body statements",
            ctx.ast.loc(statements[index]),
        ));
    }

    // stable reorder: locals first, then statements by (score, source order)
    let mut order: Vec<usize> = (0..count).collect();
    order.sort_by_key(|&i| (score[i], i));

    for &child in &children {
        ctx.ast.detach(child);
    }
    for &local in &locals {
        ctx.ast.push_child(body, local);
    }
    for &index in &order {
        ctx.ast.push_child(body, statements[index]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Location;

    fn loc() -> Location {
        Location::synthetic()
    }

    /// Builds `UnifyExpr(<var>, Expr(Term(Var <read>)))`.
    fn unify_stmt(ctx: &mut Compiler, body: NodeId, var: &str, read: Option<&str>) -> NodeId {
        let target = ctx.ast.node_with_text(Kind::Var, loc(), var);
        let stmt = ctx.ast.node(Kind::UnifyExpr, loc());
        ctx.ast.push_child(stmt, target);
        let expr = ctx.ast.node(Kind::Expr, loc());
        if let Some(name) = read {
            let term = ctx.ast.node(Kind::Term, loc());
            let v = ctx.ast.node_with_text(Kind::Var, loc(), name);
            ctx.ast.push_child(term, v);
            ctx.ast.push_child(expr, term);
        } else {
            let term = ctx.ast.node(Kind::Term, loc());
            let scalar = ctx.ast.node(Kind::Scalar, loc());
            let one = ctx.ast.node_with_text(Kind::Int, loc(), "1");
            ctx.ast.push_child(scalar, one);
            ctx.ast.push_child(term, scalar);
            ctx.ast.push_child(expr, term);
        }
        ctx.ast.push_child(stmt, expr);
        ctx.ast.push_child(body, stmt);
        stmt
    }

    fn test_ctx() -> Compiler {
        Compiler::new(ahash::AHashSet::new())
    }

    #[test]
    fn orders_writer_before_reader() {
        let mut ctx = test_ctx();
        let body = ctx.ast.node(Kind::UnifyBody, loc());
        for name in ["x", "y"] {
            let local = ctx.ast.node_with_text(Kind::Local, loc(), name);
            ctx.ast.insert_child(body, 0, local);
        }
        // y := x; x := 1  (reader first in source order)
        let reader = unify_stmt(&mut ctx, body, "y", Some("x"));
        let writer = unify_stmt(&mut ctx, body, "x", None);

        order_body(&mut ctx, body).unwrap();
        let stmts: Vec<NodeId> = ctx
            .ast
            .children(body)
            .iter()
            .copied()
            .filter(|&c| ctx.ast.kind(c) == Kind::UnifyExpr)
            .collect();
        assert_eq!(stmts, vec![writer, reader]);
    }

    #[test]
    fn detects_dependency_cycle() {
        let mut ctx = test_ctx();
        let body = ctx.ast.node(Kind::UnifyBody, loc());
        for name in ["x", "y"] {
            let local = ctx.ast.node_with_text(Kind::Local, loc(), name);
            ctx.ast.insert_child(body, 0, local);
        }
        unify_stmt(&mut ctx, body, "y", Some("x"));
        unify_stmt(&mut ctx, body, "x", Some("y"));

        let err = order_body(&mut ctx, body).unwrap_err();
        assert_eq!(err.code, ErrorCode::RecursionError);
    }

    #[test]
    fn rejects_unsafe_variables() {
        let mut ctx = test_ctx();
        let body = ctx.ast.node(Kind::UnifyBody, loc());
        let local = ctx.ast.node_with_text(Kind::Local, loc(), "ghost");
        ctx.ast.push_child(body, local);
        unify_stmt(&mut ctx, body, "unify$0", Some("ghost"));
        let local2 = ctx.ast.node_with_text(Kind::Local, loc(), "unify$0");
        ctx.ast.insert_child(body, 0, local2);

        let err = order_body(&mut ctx, body).unwrap_err();
        assert_eq!(err.code, ErrorCode::CompileError);
        assert!(err.message.contains("unsafe"));
    }
}
