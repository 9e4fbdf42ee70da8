//! Document and symbol passes: base-document merging, rule naming, local
//! introduction for declared variables, argument-pattern replacement and
//! constant folding.

use crate::ast::{Kind, NodeId};
use crate::errors::{ErrorCode, ErrorSeq, PolicyError};
use crate::rewrite::{Direction, Matcher, Pass, Rewrite};
use crate::value::merge_objects;
use crate::wf::wf_symbols;

use super::Compiler;

/// Merges all data documents into one base-document tree.
pub fn merge_data() -> Pass<Compiler> {
    Pass::new("merge_data", Direction::TopDown).pre(|ctx: &mut Compiler, _| {
        let docs = std::mem::take(&mut ctx.data_docs);
        for doc in docs {
            match merge_objects(&ctx.data, &doc) {
                Ok(merged) => ctx.data = merged,
                Err(_) => {
                    return Err(ErrorSeq::of(PolicyError::new(
                        ErrorCode::CompileError,
                        "data documents conflict",
                        None,
                    )));
                }
            }
        }
        Ok(())
    })
}

/// Hoists complex reference heads (`[1,2,3][i]`) to temporaries so every
/// reference in a body starts from a variable.
pub fn lift_refheads() -> Pass<Compiler> {
    Pass::new("lift_refheads", Direction::TopDown).rule(Matcher::kind(Kind::Ref), |ctx: &mut Compiler, node, _| {
        let head = ctx.ast.child(node, 0);
        let inner = ctx.ast.child(head, 0);
        if ctx.ast.kind(inner) != Kind::Term {
            return Ok(Rewrite::Keep);
        }
        let complex = matches!(
            ctx.ast.kind(ctx.ast.child(inner, 0)),
            Kind::Array | Kind::Object | Kind::Set | Kind::ArrayCompr | Kind::SetCompr | Kind::ObjectCompr
        );
        if !complex {
            return Ok(Rewrite::Keep);
        }
        if ctx.ast.ancestor_of_kind(node, Kind::UnifyBody).is_none() {
            // head handled inline by emission outside bodies
            return Ok(Rewrite::Keep);
        }

        let loc = ctx.ast.loc(node).clone();
        let name = ctx.ast.fresh("refhead");

        // refhead$n := <term>
        let lhs_var = ctx.ast.node_with_text(Kind::Var, loc.clone(), name.clone());
        let lhs_term = ctx.ast.node(Kind::Term, loc.clone());
        ctx.ast.push_child(lhs_term, lhs_var);
        let lhs = ctx.ast.node(Kind::Expr, loc.clone());
        ctx.ast.push_child(lhs, lhs_term);
        let op = ctx.ast.node(Kind::Assign, loc.clone());
        let term = ctx.ast.detach(inner);
        let rhs = ctx.ast.node(Kind::Expr, loc.clone());
        ctx.ast.push_child(rhs, term);
        let infix = ctx.ast.node(Kind::Infix, loc.clone());
        ctx.ast.push_child(infix, lhs);
        ctx.ast.push_child(infix, op);
        ctx.ast.push_child(infix, rhs);
        let expr = ctx.ast.node(Kind::Expr, loc.clone());
        ctx.ast.push_child(expr, infix);
        let literal = ctx.ast.node(Kind::Literal, loc.clone());
        ctx.ast.push_child(literal, expr);

        // the ref keeps its args, rooted at the temporary
        let new_head_var = ctx.ast.node_with_text(Kind::Var, loc.clone(), name);
        let new_head = ctx.ast.node(Kind::RefHead, loc.clone());
        ctx.ast.push_child(new_head, new_head_var);
        let argseq = ctx.ast.detach(ctx.ast.child(node, 1));
        let replacement = ctx.ast.node(Kind::Ref, loc);
        ctx.ast.push_child(replacement, new_head);
        ctx.ast.push_child(replacement, argseq);

        Ok(Rewrite::Lift {
            replacement,
            scope: Kind::UnifyBody,
            lifted: vec![literal],
        })
    })
}

/// Names every rule with its full dotted path, freshens parameter
/// wildcards, and turns `some` declarations into body locals.
pub fn symbols() -> Pass<Compiler> {
    Pass::new("symbols", Direction::TopDown).pre(|ctx: &mut Compiler, root| {
        // rule paths
        for node in ctx.ast.walk(root) {
            if !matches!(ctx.ast.kind(node), Kind::Rule | Kind::DefaultRule) {
                continue;
            }
            let Some(pkg) = ctx.module_path(node) else { continue };
            let rule_ref = ctx.ast.child(node, 0);
            let mut path = pkg;
            for &segment in ctx.ast.children(rule_ref) {
                path.push('.');
                path.push_str(ctx.ast.text(segment));
            }
            ctx.ast.set_text(node, path);
        }

        // parameter wildcards become distinct fresh names
        for node in ctx.ast.walk(root) {
            if ctx.ast.kind(node) == Kind::RuleArgs {
                for &param in ctx.ast.children(node).to_vec().iter() {
                    if ctx.ast.kind(param) == Kind::Var && ctx.ast.text(param) == "_" {
                        let fresh = ctx.ast.fresh("wc");
                        ctx.ast.set_text(param, fresh);
                    }
                }
            }
        }

        // `some x, y` declares locals and disappears; `some x in S` declares
        // its locals and stays for the enumeration pass
        let mut decls = Vec::new();
        for node in ctx.ast.walk(root) {
            if ctx.ast.kind(node) == Kind::SomeDecl {
                decls.push(node);
            }
        }
        for decl in decls {
            let literal = ctx.ast.parent(decl).expect("some-decl outside literal");
            let body = ctx
                .ast
                .ancestor_of_kind(literal, Kind::UnifyBody)
                .expect("some-decl outside body");
            let vars = ctx.ast.child(decl, 0);
            for &var in ctx.ast.children(vars).to_vec().iter() {
                let name = ctx.ast.text(var).to_owned();
                let loc = ctx.ast.loc(var).clone();
                let local = ctx.ast.node_with_text(Kind::Local, loc, name);
                ctx.ast.insert_child(body, 0, local);
            }
            if ctx.ast.size(decl) == 1 {
                // pure declaration
                ctx.ast.detach(literal);
            }
        }
        Ok(())
    })
}

/// Function parameters that are value patterns become fresh parameters
/// checked by an equality literal at the front of each body.
pub fn replace_argvals() -> Pass<Compiler> {
    Pass::new("replace_argvals", Direction::TopDown).pre(|ctx: &mut Compiler, root| {
        let mut heads = Vec::new();
        for node in ctx.ast.walk(root) {
            if ctx.ast.kind(node) == Kind::RuleHeadFunc {
                heads.push(node);
            }
        }
        for head in heads {
            let args = ctx.ast.child(head, 0);
            let params: Vec<NodeId> = ctx.ast.children(args).to_vec();
            for param in params {
                if ctx.ast.kind(param) == Kind::Var {
                    continue;
                }
                let loc = ctx.ast.loc(param).clone();
                let name = ctx.ast.fresh("argval");

                let fresh = ctx.ast.node_with_text(Kind::Var, loc.clone(), name.clone());
                ctx.ast.replace(param, fresh);

                // argval$n = <pattern>
                let lhs_var = ctx.ast.node_with_text(Kind::Var, loc.clone(), name);
                let lhs_term = ctx.ast.node(Kind::Term, loc.clone());
                ctx.ast.push_child(lhs_term, lhs_var);
                let lhs = ctx.ast.node(Kind::Expr, loc.clone());
                ctx.ast.push_child(lhs, lhs_term);
                let op = ctx.ast.node(Kind::Unify, loc.clone());
                let rhs = ctx.ast.node(Kind::Expr, loc.clone());
                ctx.ast.push_child(rhs, param);
                let infix = ctx.ast.node(Kind::Infix, loc.clone());
                ctx.ast.push_child(infix, lhs);
                ctx.ast.push_child(infix, op);
                ctx.ast.push_child(infix, rhs);
                let expr = ctx.ast.node(Kind::Expr, loc.clone());
                ctx.ast.push_child(expr, infix);
                let literal = ctx.ast.node(Kind::Literal, loc.clone());
                ctx.ast.push_child(literal, expr);

                let rule = ctx.ast.ancestor_of_kind(head, Kind::Rule).expect("head outside rule");
                let body = ensure_first_body(ctx, rule);
                let insert_at = ctx
                    .ast
                    .children(body)
                    .iter()
                    .position(|&c| ctx.ast.kind(c) != Kind::Local)
                    .unwrap_or(ctx.ast.size(body));
                ctx.ast.insert_child(body, insert_at, literal);
            }
        }
        Ok(())
    })
}

/// The first body of a rule, created empty when the definition is
/// bodiless.
pub(super) fn ensure_first_body(ctx: &mut Compiler, rule: NodeId) -> NodeId {
    let bodies = ctx.ast.child(rule, 2);
    let first = ctx.ast.child(bodies, 0);
    if let Some(body) = ctx.ast.child_of_kind(first, Kind::UnifyBody) {
        return body;
    }
    let loc = ctx.ast.loc(rule).clone();
    let body = ctx.ast.node(Kind::UnifyBody, loc);
    ctx.ast.push_child(first, body);
    body
}

/// Keeps the pipeline's view of the ad-hoc query in sync with the tree.
pub fn lift_query() -> Pass<Compiler> {
    Pass::new("lift_query", Direction::TopDown).pre(|ctx: &mut Compiler, root| {
        ctx.query = ctx.ast.child_of_kind(root, Kind::Query);
        Ok(())
    })
}

/// Replaces import-bound variables by their imported path.
pub fn expand_imports() -> Pass<Compiler> {
    Pass::new("expand_imports", Direction::TopDown)
        .rule(Matcher::kind(Kind::Ref), |ctx: &mut Compiler, node, _| {
            let head = ctx.ast.child(node, 0);
            let head_var = ctx.ast.child(head, 0);
            if ctx.ast.kind(head_var) != Kind::Var {
                return Ok(Rewrite::Keep);
            }
            let Some(import) = find_import(ctx, head_var) else {
                return Ok(Rewrite::Keep);
            };
            let import_ref = ctx.ast.child(import, 0);
            let new_ref = ctx.ast.clone_subtree(import_ref);
            let new_argseq = ctx.ast.child(new_ref, 1);
            let old_argseq = ctx.ast.child(node, 1);
            for &arg in ctx.ast.children(old_argseq).to_vec().iter() {
                let detached = ctx.ast.detach(arg);
                ctx.ast.push_child(new_argseq, detached);
            }
            Ok(Rewrite::Replace(new_ref))
        })
        .rule(
            Matcher::kind(Kind::Var).within(&[Kind::Term]),
            |ctx: &mut Compiler, node, _| {
                let Some(import) = find_import(ctx, node) else {
                    return Ok(Rewrite::Keep);
                };
                let import_ref = ctx.ast.child(import, 0);
                let new_ref = ctx.ast.clone_subtree(import_ref);
                Ok(Rewrite::Replace(new_ref))
            },
        )
}

fn find_import(ctx: &Compiler, var: NodeId) -> Option<NodeId> {
    let bindings = ctx.ast.lookup(var);
    bindings.into_iter().find(|&b| ctx.ast.kind(b) == Kind::Import)
}

/// Constant rule values fold into the constant pool; every other head
/// expression moves into its body as a `value` local so enumeration and
/// dependency ordering see it.
pub fn constants() -> Pass<Compiler> {
    Pass::new("constants", Direction::TopDown)
        .pre(|ctx: &mut Compiler, root| {
            let mut rules = Vec::new();
            for node in ctx.ast.walk(root) {
                if ctx.ast.kind(node) == Kind::Rule {
                    rules.push(node);
                }
            }
            for rule in rules {
                let head = ctx.ast.child(rule, 1);
                let head_inner = ctx.ast.child(head, 0);
                let exprs: Vec<NodeId> = match ctx.ast.kind(head_inner) {
                    Kind::RuleHeadComp => vec![ctx.ast.child(head_inner, 0)],
                    Kind::RuleHeadFunc => vec![ctx.ast.child(head_inner, 1)],
                    Kind::RuleHeadSet => vec![ctx.ast.child(head_inner, 0)],
                    Kind::RuleHeadObj => vec![ctx.ast.child(head_inner, 0), ctx.ast.child(head_inner, 1)],
                    _ => vec![],
                };
                for expr in exprs {
                    fold_or_lower(ctx, rule, expr);
                }

                // else values move into their own bodies
                let bodies = ctx.ast.child(rule, 2);
                for &branch in ctx.ast.children(bodies).to_vec().iter() {
                    if ctx.ast.kind(branch) != Kind::Else {
                        continue;
                    }
                    let value = ctx.ast.child(branch, 0);
                    if ctx.ast.kind(value) != Kind::Expr {
                        continue;
                    }
                    if ctx.eval_const(value).is_some() {
                        continue;
                    }
                    let body = match ctx.ast.child_of_kind(branch, Kind::UnifyBody) {
                        Some(body) => body,
                        None => {
                            let loc = ctx.ast.loc(branch).clone();
                            let body = ctx.ast.node(Kind::UnifyBody, loc);
                            ctx.ast.push_child(branch, body);
                            body
                        }
                    };
                    lower_into_body(ctx, value, body);
                }
            }
            Ok(())
        })
        .wf(wf_symbols())
}

/// Folds a constant head expression into a `DataTerm`, or moves a dynamic
/// one into the rule body as `value$n := expr`.
fn fold_or_lower(ctx: &mut Compiler, rule: NodeId, expr: NodeId) {
    if let Some(value) = ctx.eval_const(expr) {
        let index = ctx.constants.len();
        ctx.constants.push(value);
        let loc = ctx.ast.loc(expr).clone();
        let inner = ctx.ast.child(expr, 0);
        let data_term = ctx.ast.node_with_text(Kind::DataTerm, loc, index.to_string());
        ctx.ast.replace(inner, data_term);
        return;
    }
    let body = ensure_first_body(ctx, rule);
    lower_into_body(ctx, expr, body);
}

/// Appends `value$n := <expr>` to `body` and rewrites the head expression
/// to the fresh variable.
fn lower_into_body(ctx: &mut Compiler, expr: NodeId, body: NodeId) {
    let loc = ctx.ast.loc(expr).clone();
    let name = ctx.ast.fresh("value");

    let inner = ctx.ast.child(expr, 0);
    let moved = ctx.ast.detach(inner);
    let rhs = ctx.ast.node(Kind::Expr, loc.clone());
    ctx.ast.push_child(rhs, moved);

    let lhs_var = ctx.ast.node_with_text(Kind::Var, loc.clone(), name.clone());
    let lhs_term = ctx.ast.node(Kind::Term, loc.clone());
    ctx.ast.push_child(lhs_term, lhs_var);
    let lhs = ctx.ast.node(Kind::Expr, loc.clone());
    ctx.ast.push_child(lhs, lhs_term);
    let op = ctx.ast.node(Kind::Assign, loc.clone());
    let infix = ctx.ast.node(Kind::Infix, loc.clone());
    ctx.ast.push_child(infix, lhs);
    ctx.ast.push_child(infix, op);
    ctx.ast.push_child(infix, rhs);
    let assign_expr = ctx.ast.node(Kind::Expr, loc.clone());
    ctx.ast.push_child(assign_expr, infix);
    let literal = ctx.ast.node(Kind::Literal, loc.clone());
    ctx.ast.push_child(literal, assign_expr);
    ctx.ast.push_child(body, literal);

    // the head now names the body-computed value
    let head_var = ctx.ast.node_with_text(Kind::Var, loc.clone(), name);
    let head_term = ctx.ast.node(Kind::Term, loc);
    ctx.ast.push_child(head_term, head_var);
    ctx.ast.push_child(expr, head_term);
}
