//! Enumeration and local-variable passes: explicit `some … in` iteration,
//! free-variable locals, comprehension bodies, implicit iteration through
//! unbound index variables, and local cleanup.

use crate::ast::{Kind, NodeId};
use crate::rewrite::{Direction, Matcher, Pass, Rewrite};

use super::Compiler;

/// `some x in S` / `some k, v in S` become enumeration statements.
pub fn explicit_enums() -> Pass<Compiler> {
    Pass::new("explicit_enums", Direction::TopDown).rule(Matcher::kind(Kind::Literal), |ctx: &mut Compiler, node, _| {
        let inner = ctx.ast.child(node, 0);
        if ctx.ast.kind(inner) != Kind::SomeDecl || ctx.ast.size(inner) != 2 {
            return Ok(Rewrite::Keep);
        }
        let loc = ctx.ast.loc(node).clone();
        let vars = ctx.ast.child(inner, 0);
        let seq = ctx.ast.detach(ctx.ast.child(inner, 1));

        let (key_name, value_name) = match ctx.ast.children(vars) {
            [value] => (None, ctx.ast.text(*value).to_owned()),
            [key, value] => (Some(ctx.ast.text(*key).to_owned()), ctx.ast.text(*value).to_owned()),
            _ => return Err(ctx.compile_error(inner, "some declarations take one or two variables")),
        };
        let key_name = match key_name {
            Some(name) => name,
            None => {
                // fresh key local for the value-only form
                let fresh = ctx.ast.fresh("wc");
                let body = ctx
                    .ast
                    .ancestor_of_kind(node, Kind::UnifyBody)
                    .expect("literal outside body");
                let local = ctx.ast.node_with_text(Kind::Local, loc.clone(), fresh.clone());
                ctx.ast.insert_child(body, 0, local);
                fresh
            }
        };

        let key = ctx.ast.node_with_text(Kind::Var, loc.clone(), key_name);
        let value = ctx.ast.node_with_text(Kind::Var, loc.clone(), value_name);
        let enumeration = ctx.ast.node(Kind::LiteralEnum, loc);
        ctx.ast.push_child(enumeration, key);
        ctx.ast.push_child(enumeration, value);
        ctx.ast.push_child(enumeration, seq);
        Ok(Rewrite::Replace(enumeration))
    })
}

/// Whether `var` occurs in a position that references a value (rather than
/// naming a field, a parameter, or an enum binding).
fn is_value_position(ctx: &Compiler, var: NodeId) -> bool {
    let Some(parent) = ctx.ast.parent(var) else { return false };
    match ctx.ast.kind(parent) {
        Kind::Term => true,
        Kind::RefHead => {
            // a callee head is a function name, not a value
            let reference = ctx.ast.parent(parent);
            let grandparent = reference.and_then(|r| ctx.ast.parent(r));
            !matches!(
                (reference, grandparent),
                (Some(r), Some(g))
                    if ctx.ast.kind(g) == Kind::ExprCall && ctx.ast.child_index(g, r) == Some(0)
            )
        }
        _ => false,
    }
}

/// Introduces a `Local` for each free variable of a body: a variable in a
/// value position that no enclosing scope binds. Wildcards become distinct
/// fresh locals.
pub fn body_locals() -> Pass<Compiler> {
    Pass::new("body_locals", Direction::TopDown).pre(|ctx: &mut Compiler, root| {
        let bodies: Vec<NodeId> = ctx
            .ast
            .walk(root)
            .into_iter()
            .filter(|&n| ctx.ast.kind(n) == Kind::UnifyBody)
            .collect();
        for body in bodies {
            declare_free_vars(ctx, body);
        }
        Ok(())
    })
}

/// The body that owns a body's bindings: `with` modifiers wrap a literal
/// of the surrounding body, so their bindings escape upward; `not` bodies
/// and comprehension bodies are closed scopes.
fn home_body(ctx: &Compiler, body: NodeId) -> NodeId {
    let mut home = body;
    while let Some(parent) = ctx.ast.parent(home) {
        if ctx.ast.kind(parent) != Kind::LiteralWith {
            break;
        }
        match ctx.ast.ancestor_of_kind(parent, Kind::UnifyBody) {
            Some(outer) => home = outer,
            None => break,
        }
    }
    home
}

fn declare_free_vars(ctx: &mut Compiler, body: NodeId) {
    let home = home_body(ctx, body);

    // vars directly under this body, not under a nested body
    let mut vars = Vec::new();
    collect_body_vars(ctx, body, &mut vars);

    for var in vars {
        let name = ctx.ast.text(var).to_owned();
        let loc = ctx.ast.loc(var).clone();
        if name == "_" {
            let fresh = ctx.ast.fresh("wc");
            ctx.ast.set_text(var, fresh.clone());
            let local = ctx.ast.node_with_text(Kind::Local, loc, fresh);
            ctx.ast.insert_child(home, 0, local);
            continue;
        }
        if name == "input" || name == "data" || name.contains('$') {
            if name.contains('$') && ctx.ast.lookup(var).is_empty() {
                let local = ctx.ast.node_with_text(Kind::Local, loc, name);
                ctx.ast.insert_child(home, 0, local);
            }
            continue;
        }
        if !is_value_position(ctx, var) {
            continue;
        }
        if ctx.ast.lookup(var).is_empty() {
            let local = ctx.ast.node_with_text(Kind::Local, loc, name);
            ctx.ast.insert_child(home, 0, local);
        }
    }
}

fn collect_body_vars(ctx: &Compiler, node: NodeId, out: &mut Vec<NodeId>) {
    for &child in ctx.ast.children(node) {
        match ctx.ast.kind(child) {
            // nested bodies and comprehensions own their variables
            Kind::UnifyBody | Kind::ArrayCompr | Kind::SetCompr | Kind::ObjectCompr => {}
            Kind::Var => out.push(child),
            _ => collect_body_vars(ctx, child, out),
        }
    }
}

/// Declares locals for comprehension head variables that nothing else
/// binds; their home is the comprehension's own body.
pub fn value_locals() -> Pass<Compiler> {
    Pass::new("value_locals", Direction::TopDown).pre(|ctx: &mut Compiler, root| {
        let comprs: Vec<NodeId> = ctx
            .ast
            .walk(root)
            .into_iter()
            .filter(|&n| {
                matches!(
                    ctx.ast.kind(n),
                    Kind::ArrayCompr | Kind::SetCompr | Kind::ObjectCompr
                )
            })
            .collect();
        for compr in comprs {
            let body = match ctx.ast.kind(compr) {
                Kind::ObjectCompr => ctx.ast.child(compr, 2),
                _ => ctx.ast.child(compr, 1),
            };
            let heads: Vec<NodeId> = ctx
                .ast
                .children(compr)
                .iter()
                .copied()
                .filter(|&c| ctx.ast.kind(c) == Kind::Expr)
                .collect();
            for head in heads {
                let mut vars = Vec::new();
                collect_expr_vars(ctx, head, &mut vars);
                for var in vars {
                    let name = ctx.ast.text(var).to_owned();
                    if name == "input" || name == "data" || name == "_" {
                        continue;
                    }
                    if !is_value_position(ctx, var) {
                        continue;
                    }
                    if !ctx.ast.lookup(var).is_empty() {
                        continue;
                    }
                    if !ctx.ast.lookdown(body, &name).is_empty() {
                        continue;
                    }
                    let loc = ctx.ast.loc(var).clone();
                    let local = ctx.ast.node_with_text(Kind::Local, loc, name);
                    ctx.ast.insert_child(body, 0, local);
                }
            }
        }
        Ok(())
    })
}

fn collect_expr_vars(ctx: &Compiler, node: NodeId, out: &mut Vec<NodeId>) {
    for &child in ctx.ast.children(node) {
        if ctx.ast.kind(child) == Kind::UnifyBody {
            continue;
        }
        if ctx.ast.kind(child) == Kind::Var {
            out.push(child);
        } else {
            collect_expr_vars(ctx, child, out);
        }
    }
}

/// Comprehension bodies must be well-formed unify bodies.
pub fn compr() -> Pass<Compiler> {
    Pass::new("compr", Direction::TopDown).rule(
        Matcher::kinds(&[Kind::ArrayCompr, Kind::SetCompr, Kind::ObjectCompr]),
        |ctx: &mut Compiler, node, _| {
            let body = match ctx.ast.kind(node) {
                Kind::ObjectCompr => ctx.ast.child(node, 2),
                _ => ctx.ast.child(node, 1),
            };
            let has_statement = ctx
                .ast
                .children(body)
                .iter()
                .any(|&c| ctx.ast.kind(c) != Kind::Local);
            if !has_statement {
                return Err(ctx.compile_error(node, "comprehension has an empty body"));
            }
            Ok(Rewrite::Keep)
        },
    )
}

/// Whether `name` is written by any statement under `scope`.
pub(super) fn is_written(ctx: &Compiler, scope: NodeId, name: &str) -> bool {
    for node in ctx.ast.walk(scope) {
        match ctx.ast.kind(node) {
            Kind::UnifyExpr => {
                if ctx.ast.text(ctx.ast.child(node, 0)) == name {
                    return true;
                }
            }
            Kind::LiteralEnum => {
                if ctx.ast.text(ctx.ast.child(node, 0)) == name
                    || ctx.ast.text(ctx.ast.child(node, 1)) == name
                {
                    return true;
                }
            }
            Kind::AssignInfix => {
                let mut vars = Vec::new();
                collect_expr_vars(ctx, ctx.ast.child(node, 0), &mut vars);
                if vars.iter().any(|&v| ctx.ast.text(v) == name) {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

/// `xs[i]` with unbound local `i` iterates: the reference becomes an
/// enumeration statement plus a lookup on the bound item.
pub fn implicit_enums() -> Pass<Compiler> {
    Pass::new("implicit_enums", Direction::TopDown).rule(Matcher::kind(Kind::Ref), |ctx: &mut Compiler, node, _| {
        let Some(body) = ctx.ast.ancestor_of_kind(node, Kind::UnifyBody) else {
            return Ok(Rewrite::Keep);
        };
        let argseq = ctx.ast.child(node, 1);
        let args: Vec<NodeId> = ctx.ast.children(argseq).to_vec();

        let mut split = None;
        for (index, &arg) in args.iter().enumerate() {
            if ctx.ast.kind(arg) != Kind::RefArgBrack {
                continue;
            }
            let mut inner = ctx.ast.child(arg, 0);
            while matches!(ctx.ast.kind(inner), Kind::Expr | Kind::Term) {
                if ctx.ast.size(inner) == 0 {
                    break;
                }
                inner = ctx.ast.child(inner, 0);
            }
            if ctx.ast.kind(inner) != Kind::Var {
                continue;
            }
            let bindings = ctx.ast.lookup(inner);
            let is_local = bindings.iter().any(|&b| ctx.ast.kind(b) == Kind::Local);
            if !is_local {
                continue;
            }
            let name = ctx.ast.text(inner).to_owned();
            // the local's own body decides boundness
            let local = bindings[0];
            let local_body = ctx.ast.parent(local).unwrap_or(body);
            if is_written(ctx, local_body, &name) {
                continue;
            }
            split = Some((index, name));
            break;
        }

        let Some((index, key_name)) = split else {
            return Ok(Rewrite::Keep);
        };

        let loc = ctx.ast.loc(node).clone();
        let item_name = ctx.ast.fresh("enum");

        // the collection: the ref up to the enumerating bracket
        let head = ctx.ast.detach(ctx.ast.child(node, 0));
        let prefix_args = ctx.ast.node(Kind::RefArgSeq, loc.clone());
        for &arg in &args[..index] {
            let detached = ctx.ast.detach(arg);
            ctx.ast.push_child(prefix_args, detached);
        }
        let collection_ref = ctx.ast.node(Kind::Ref, loc.clone());
        ctx.ast.push_child(collection_ref, head);
        ctx.ast.push_child(collection_ref, prefix_args);
        let collection_term = ctx.ast.node(Kind::Term, loc.clone());
        ctx.ast.push_child(collection_term, collection_ref);
        let collection = ctx.ast.node(Kind::Expr, loc.clone());
        ctx.ast.push_child(collection, collection_term);

        let key = ctx.ast.node_with_text(Kind::Var, loc.clone(), key_name);
        let item = ctx.ast.node_with_text(Kind::Var, loc.clone(), item_name.clone());
        let enumeration = ctx.ast.node(Kind::LiteralEnum, loc.clone());
        ctx.ast.push_child(enumeration, key);
        ctx.ast.push_child(enumeration, item);
        ctx.ast.push_child(enumeration, collection);

        let local = ctx
            .ast
            .node_with_text(Kind::Local, loc.clone(), item_name.clone());
        ctx.ast.insert_child(body, 0, local);

        // the rest of the ref roots at the bound item
        let item_var = ctx.ast.node_with_text(Kind::Var, loc.clone(), item_name);
        let replacement = if args.len() > index + 1 {
            let new_head = ctx.ast.node(Kind::RefHead, loc.clone());
            ctx.ast.push_child(new_head, item_var);
            let rest_args = ctx.ast.node(Kind::RefArgSeq, loc.clone());
            for &arg in &args[index + 1..] {
                let detached = ctx.ast.detach(arg);
                ctx.ast.push_child(rest_args, detached);
            }
            let rest_ref = ctx.ast.node(Kind::Ref, loc);
            ctx.ast.push_child(rest_ref, new_head);
            ctx.ast.push_child(rest_ref, rest_args);
            rest_ref
        } else {
            item_var
        };

        Ok(Rewrite::Lift {
            replacement,
            scope: Kind::UnifyBody,
            lifted: vec![enumeration],
        })
    })
}

/// Drops locals no statement references.
pub fn enum_locals() -> Pass<Compiler> {
    Pass::new("enum_locals", Direction::BottomUp).pre(|ctx: &mut Compiler, root| {
        let bodies: Vec<NodeId> = ctx
            .ast
            .walk(root)
            .into_iter()
            .filter(|&n| ctx.ast.kind(n) == Kind::UnifyBody)
            .collect();
        for body in bodies {
            let locals: Vec<NodeId> = ctx
                .ast
                .children(body)
                .iter()
                .copied()
                .filter(|&c| ctx.ast.kind(c) == Kind::Local)
                .collect();
            for local in locals {
                let name = ctx.ast.text(local).to_owned();
                let referenced = ctx.ast.walk(body).into_iter().any(|n| {
                    n != local && ctx.ast.kind(n) == Kind::Var && ctx.ast.text(n) == name
                });
                let referenced_from_head = referenced
                    || ctx
                        .ast
                        .ancestor_of_kind(body, Kind::Rule)
                        .is_some_and(|rule| {
                            ctx.ast.walk(rule).into_iter().any(|n| {
                                ctx.ast.kind(n) == Kind::Var && ctx.ast.text(n) == name
                            })
                        });
                if !referenced_from_head {
                    ctx.ast.detach(local);
                }
            }
        }
        Ok(())
    })
}
