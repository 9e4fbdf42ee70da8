//! Expression lowering passes: infix folding, assignment/unification
//! normalization, initializer marking and body canonicalization.

use crate::ast::{Kind, NodeId};
use crate::rewrite::{Direction, Matcher, Pass, Rewrite};

use super::Compiler;

/// Unary minus on a literal folds into a negative literal; anything else
/// becomes `0 - x`.
pub fn unary() -> Pass<Compiler> {
    Pass::new("unary", Direction::BottomUp).rule(Matcher::kind(Kind::UnaryExpr), |ctx: &mut Compiler, node, _| {
        let operand = ctx.ast.child(node, 0);
        // peel to the scalar if the operand is a plain number literal
        let mut inner = operand;
        while matches!(ctx.ast.kind(inner), Kind::Expr | Kind::Term | Kind::Scalar) && ctx.ast.size(inner) > 0 {
            inner = ctx.ast.child(inner, 0);
        }
        if matches!(ctx.ast.kind(inner), Kind::Int | Kind::Float) {
            let text = ctx.ast.text(inner);
            let negated = match text.strip_prefix('-') {
                Some(positive) => positive.to_owned(),
                None => format!("-{text}"),
            };
            ctx.ast.set_text(inner, negated);
            let term = ctx.ast.child(operand, 0);
            let term = ctx.ast.detach(term);
            return Ok(Rewrite::Replace(term));
        }

        // 0 - x
        let loc = ctx.ast.loc(node).clone();
        let zero_leaf = ctx.ast.node_with_text(Kind::Int, loc.clone(), "0");
        let zero_scalar = ctx.ast.node(Kind::Scalar, loc.clone());
        ctx.ast.push_child(zero_scalar, zero_leaf);
        let zero_term = ctx.ast.node(Kind::Term, loc.clone());
        ctx.ast.push_child(zero_term, zero_scalar);
        let zero = ctx.ast.node(Kind::Expr, loc.clone());
        ctx.ast.push_child(zero, zero_term);
        let op = ctx.ast.node(Kind::Subtract, loc.clone());
        let operand = ctx.ast.detach(operand);
        let infix = ctx.ast.node(Kind::Infix, loc);
        ctx.ast.push_child(infix, zero);
        ctx.ast.push_child(infix, op);
        ctx.ast.push_child(infix, operand);
        Ok(Rewrite::Replace(infix))
    })
}

/// Adds a rule folding `Infix` nodes with the given operators into
/// `target`.
fn with_fold(pass: Pass<Compiler>, target: Kind, ops: &'static [Kind]) -> Pass<Compiler> {
    pass.rule(Matcher::kind(Kind::Infix), move |ctx: &mut Compiler, node, _| {
        let op = ctx.ast.child(node, 1);
        if !ops.contains(&ctx.ast.kind(op)) {
            return Ok(Rewrite::Keep);
        }
        let loc = ctx.ast.loc(node).clone();
        let children = ctx.ast.take_children(node);
        let folded = ctx.ast.node(target, loc);
        for child in children {
            ctx.ast.push_child(folded, child);
        }
        Ok(Rewrite::Replace(folded))
    })
}

/// `* / %` fold into arithmetic infix nodes.
pub fn multiply_divide() -> Pass<Compiler> {
    with_fold(
        Pass::new("multiply_divide", Direction::BottomUp),
        Kind::ArithInfix,
        &[Kind::Multiply, Kind::Divide, Kind::Modulo],
    )
}

/// `+ -` fold into arithmetic infix nodes, `& |` into binary (set) infix
/// nodes; `-` keeps its set-difference overload at evaluation time.
pub fn add_subtract() -> Pass<Compiler> {
    let pass = with_fold(
        Pass::new("add_subtract", Direction::BottomUp),
        Kind::ArithInfix,
        &[Kind::Add, Kind::Subtract],
    );
    with_fold(pass, Kind::BinInfix, &[Kind::And, Kind::Or])
}

/// Comparisons fold into boolean infix nodes.
pub fn comparison() -> Pass<Compiler> {
    with_fold(
        Pass::new("comparison", Direction::BottomUp),
        Kind::BoolInfix,
        &[
            Kind::Equals,
            Kind::NotEquals,
            Kind::LessThan,
            Kind::GreaterThan,
            Kind::LessThanOrEquals,
            Kind::GreaterThanOrEquals,
        ],
    )
}

fn var_name_of(ctx: &Compiler, expr: NodeId) -> Option<String> {
    let mut inner = expr;
    while matches!(ctx.ast.kind(inner), Kind::Expr | Kind::Term) && ctx.ast.size(inner) > 0 {
        inner = ctx.ast.child(inner, 0);
    }
    if ctx.ast.kind(inner) == Kind::Var {
        Some(ctx.ast.text(inner).to_owned())
    } else {
        None
    }
}

fn is_local_var(ctx: &Compiler, expr: NodeId) -> Option<NodeId> {
    let mut inner = expr;
    while matches!(ctx.ast.kind(inner), Kind::Expr | Kind::Term) && ctx.ast.size(inner) > 0 {
        inner = ctx.ast.child(inner, 0);
    }
    if ctx.ast.kind(inner) != Kind::Var {
        return None;
    }
    let bindings = ctx.ast.lookup(inner);
    bindings
        .iter()
        .any(|&b| ctx.ast.kind(b) == Kind::Local)
        .then_some(inner)
}

fn is_pattern(ctx: &Compiler, expr: NodeId) -> bool {
    let mut inner = expr;
    while matches!(ctx.ast.kind(inner), Kind::Expr | Kind::Term) && ctx.ast.size(inner) > 0 {
        inner = ctx.ast.child(inner, 0);
    }
    ctx.ast.kind(inner) == Kind::Array
}

/// `x := e`, `x = e`, `e = x` and `pattern = e` normalize to unification
/// statements; ground `=` ground becomes an equality assertion.
pub fn assign() -> Pass<Compiler> {
    Pass::new("assign", Direction::TopDown).rule(
        Matcher::kind(Kind::Literal).within(&[Kind::UnifyBody]),
        |ctx: &mut Compiler, node, _| {
            let expr = ctx.ast.child(node, 0);
            if ctx.ast.kind(expr) != Kind::Expr {
                return Ok(Rewrite::Keep);
            }
            let inner = ctx.ast.child(expr, 0);
            if ctx.ast.kind(inner) != Kind::Infix {
                return Ok(Rewrite::Keep);
            }
            let op = ctx.ast.child(inner, 1);
            let op_kind = ctx.ast.kind(op);
            if !matches!(op_kind, Kind::Assign | Kind::Unify) {
                return Ok(Rewrite::Keep);
            }

            let loc = ctx.ast.loc(node).clone();
            let lhs = ctx.ast.child(inner, 0);
            let rhs = ctx.ast.child(inner, 2);

            // `:=` declares its left side; `=` unifies whichever side is a
            // local variable, preferring the left
            let target = match op_kind {
                Kind::Assign => match is_local_var(ctx, lhs) {
                    Some(var) => Some((var, rhs)),
                    None => {
                        if !is_pattern(ctx, lhs) && var_name_of(ctx, lhs).is_some() {
                            return Err(ctx.compile_error(lhs, "cannot reassign a rule or parameter"));
                        }
                        None
                    }
                },
                _ => is_local_var(ctx, lhs)
                    .map(|var| (var, rhs))
                    .or_else(|| is_local_var(ctx, rhs).map(|var| (var, lhs))),
            };

            if let Some((var, value_side)) = target {
                let name = ctx.ast.text(var).to_owned();
                let target_var = ctx.ast.node_with_text(Kind::Var, loc.clone(), name);
                let value = ctx.ast.detach(value_side);
                let unify = ctx.ast.node(Kind::UnifyExpr, loc);
                ctx.ast.push_child(unify, target_var);
                ctx.ast.push_child(unify, value);
                return Ok(Rewrite::Replace(unify));
            }

            if is_pattern(ctx, lhs) || is_pattern(ctx, rhs) {
                let (pattern, value) = if is_pattern(ctx, lhs) { (lhs, rhs) } else { (rhs, lhs) };
                let pattern = ctx.ast.detach(pattern);
                let value = ctx.ast.detach(value);
                let assign = ctx.ast.node(Kind::AssignInfix, loc);
                ctx.ast.push_child(assign, pattern);
                ctx.ast.push_child(assign, value);
                return Ok(Rewrite::Replace(assign));
            }
            if op_kind == Kind::Assign {
                return Err(ctx.compile_error(lhs, "cannot assign to this expression"));
            }

            // ground = ground: an equality assertion
            let lhs = ctx.ast.detach(lhs);
            let rhs = ctx.ast.detach(rhs);
            let eq_op = ctx.ast.node(Kind::Equals, loc.clone());
            let bool_infix = ctx.ast.node(Kind::BoolInfix, loc.clone());
            ctx.ast.push_child(bool_infix, lhs);
            ctx.ast.push_child(bool_infix, eq_op);
            ctx.ast.push_child(bool_infix, rhs);
            let wrapped = ctx.ast.node(Kind::Expr, loc.clone());
            ctx.ast.push_child(wrapped, bool_infix);
            let literal = ctx.ast.node(Kind::Literal, loc);
            ctx.ast.push_child(literal, wrapped);
            Ok(Rewrite::Replace(literal))
        },
    )
}

/// Marks the first write of each variable as its initializer.
pub fn init() -> Pass<Compiler> {
    Pass::new("init", Direction::TopDown).pre(|ctx: &mut Compiler, root| {
        let bodies: Vec<NodeId> = ctx
            .ast
            .walk(root)
            .into_iter()
            .filter(|&n| ctx.ast.kind(n) == Kind::UnifyBody)
            .collect();
        for body in bodies {
            let mut seen = std::collections::BTreeSet::new();
            for &child in ctx.ast.children(body).to_vec().iter() {
                match ctx.ast.kind(child) {
                    Kind::LiteralEnum => {
                        seen.insert(ctx.ast.text(ctx.ast.child(child, 0)).to_owned());
                        seen.insert(ctx.ast.text(ctx.ast.child(child, 1)).to_owned());
                    }
                    Kind::UnifyExpr => {
                        let name = ctx.ast.text(ctx.ast.child(child, 0)).to_owned();
                        if seen.insert(name) {
                            let loc = ctx.ast.loc(child).clone();
                            let index = ctx.ast.child_index(body, child).unwrap_or(0);
                            let detached = ctx.ast.detach(child);
                            let init = ctx.ast.node(Kind::LiteralInit, loc);
                            ctx.ast.push_child(init, detached);
                            ctx.ast.insert_child(body, index, init);
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    })
}

/// Remaining bare expression literals become asserted unification
/// statements; array patterns expand element-wise.
pub fn rulebody() -> Pass<Compiler> {
    Pass::new("rulebody", Direction::TopDown)
        .rule(
            Matcher::kind(Kind::Literal).within(&[Kind::UnifyBody]),
            |ctx: &mut Compiler, node, _| {
                let expr = ctx.ast.child(node, 0);
                if ctx.ast.kind(expr) != Kind::Expr {
                    return Ok(Rewrite::Keep);
                }
                let loc = ctx.ast.loc(node).clone();
                let name = ctx.ast.fresh("unify");
                let body = ctx
                    .ast
                    .ancestor_of_kind(node, Kind::UnifyBody)
                    .expect("literal outside body");
                let local = ctx.ast.node_with_text(Kind::Local, loc.clone(), name.clone());
                ctx.ast.insert_child(body, 0, local);

                let target = ctx.ast.node_with_text(Kind::Var, loc.clone(), name);
                let value = ctx.ast.detach(expr);
                let unify = ctx.ast.node(Kind::UnifyExpr, loc);
                ctx.ast.push_child(unify, target);
                ctx.ast.push_child(unify, value);
                Ok(Rewrite::Replace(unify))
            },
        )
        .rule(
            Matcher::kind(Kind::AssignInfix).within(&[Kind::UnifyBody]),
            |ctx: &mut Compiler, node, _| expand_pattern(ctx, node),
        )
}

/// `[a, b] = rhs` becomes `tmp := rhs; count(tmp) == 2; a = tmp[0]; …`.
fn expand_pattern(ctx: &mut Compiler, node: NodeId) -> Result<Rewrite, crate::errors::PolicyError> {
    let loc = ctx.ast.loc(node).clone();
    let pattern_expr = ctx.ast.child(node, 0);
    let rhs = ctx.ast.child(node, 1);

    let mut pattern = pattern_expr;
    while matches!(ctx.ast.kind(pattern), Kind::Expr | Kind::Term) && ctx.ast.size(pattern) > 0 {
        pattern = ctx.ast.child(pattern, 0);
    }
    if ctx.ast.kind(pattern) != Kind::Array {
        return Err(ctx.compile_error(node, "only array patterns can be destructured"));
    }

    let body = ctx
        .ast
        .ancestor_of_kind(node, Kind::UnifyBody)
        .expect("pattern outside body");

    let tmp = ctx.ast.fresh("pattern");
    let tmp_local = ctx.ast.node_with_text(Kind::Local, loc.clone(), tmp.clone());
    ctx.ast.insert_child(body, 0, tmp_local);

    let mut statements = Vec::new();

    // tmp := rhs
    let tmp_var = ctx.ast.node_with_text(Kind::Var, loc.clone(), tmp.clone());
    let rhs = ctx.ast.detach(rhs);
    let bind = ctx.ast.node(Kind::UnifyExpr, loc.clone());
    ctx.ast.push_child(bind, tmp_var);
    ctx.ast.push_child(bind, rhs);
    statements.push(bind);

    // count(tmp) == n
    let n = ctx.ast.size(pattern);
    let count_check = build_count_check(ctx, &loc, &tmp, n);
    let check_name = ctx.ast.fresh("unify");
    let check_local = ctx.ast.node_with_text(Kind::Local, loc.clone(), check_name.clone());
    ctx.ast.insert_child(body, 0, check_local);
    let check_var = ctx.ast.node_with_text(Kind::Var, loc.clone(), check_name);
    let check = ctx.ast.node(Kind::UnifyExpr, loc.clone());
    ctx.ast.push_child(check, check_var);
    ctx.ast.push_child(check, count_check);
    statements.push(check);

    // element bindings
    let elements: Vec<NodeId> = ctx.ast.children(pattern).to_vec();
    for (index, element) in elements.into_iter().enumerate() {
        let indexed = build_index_ref(ctx, &loc, &tmp, index);
        let element_stmt = match is_local_var(ctx, element) {
            Some(var) => {
                let name = ctx.ast.text(var).to_owned();
                let target = ctx.ast.node_with_text(Kind::Var, loc.clone(), name);
                let unify = ctx.ast.node(Kind::UnifyExpr, loc.clone());
                ctx.ast.push_child(unify, target);
                ctx.ast.push_child(unify, indexed);
                unify
            }
            None => {
                // ground element: assert equality
                let eq_name = ctx.ast.fresh("unify");
                let eq_local = ctx.ast.node_with_text(Kind::Local, loc.clone(), eq_name.clone());
                ctx.ast.insert_child(body, 0, eq_local);
                let element = ctx.ast.detach(element);
                let eq_op = ctx.ast.node(Kind::Equals, loc.clone());
                let bool_infix = ctx.ast.node(Kind::BoolInfix, loc.clone());
                ctx.ast.push_child(bool_infix, element);
                ctx.ast.push_child(bool_infix, eq_op);
                ctx.ast.push_child(bool_infix, indexed);
                let wrapped = ctx.ast.node(Kind::Expr, loc.clone());
                ctx.ast.push_child(wrapped, bool_infix);
                let target = ctx.ast.node_with_text(Kind::Var, loc.clone(), eq_name);
                let unify = ctx.ast.node(Kind::UnifyExpr, loc.clone());
                ctx.ast.push_child(unify, target);
                ctx.ast.push_child(unify, wrapped);
                unify
            }
        };
        statements.push(element_stmt);
    }

    Ok(Rewrite::Seq(statements))
}

fn build_count_check(ctx: &mut Compiler, loc: &crate::location::Location, tmp: &str, n: usize) -> NodeId {
    let callee_var = ctx.ast.node_with_text(Kind::Var, loc.clone(), "count");
    let callee_head = ctx.ast.node(Kind::RefHead, loc.clone());
    ctx.ast.push_child(callee_head, callee_var);
    let callee_args = ctx.ast.node(Kind::RefArgSeq, loc.clone());
    let callee = ctx.ast.node(Kind::Ref, loc.clone());
    ctx.ast.push_child(callee, callee_head);
    ctx.ast.push_child(callee, callee_args);

    let arg_var = ctx.ast.node_with_text(Kind::Var, loc.clone(), tmp);
    let arg_term = ctx.ast.node(Kind::Term, loc.clone());
    ctx.ast.push_child(arg_term, arg_var);
    let arg = ctx.ast.node(Kind::Expr, loc.clone());
    ctx.ast.push_child(arg, arg_term);
    let args = ctx.ast.node(Kind::ExprSeq, loc.clone());
    ctx.ast.push_child(args, arg);

    let call = ctx.ast.node(Kind::ExprCall, loc.clone());
    ctx.ast.push_child(call, callee);
    ctx.ast.push_child(call, args);
    let call_expr = ctx.ast.node(Kind::Expr, loc.clone());
    ctx.ast.push_child(call_expr, call);

    let n_leaf = ctx.ast.node_with_text(Kind::Int, loc.clone(), n.to_string());
    let n_scalar = ctx.ast.node(Kind::Scalar, loc.clone());
    ctx.ast.push_child(n_scalar, n_leaf);
    let n_term = ctx.ast.node(Kind::Term, loc.clone());
    ctx.ast.push_child(n_term, n_scalar);
    let n_expr = ctx.ast.node(Kind::Expr, loc.clone());
    ctx.ast.push_child(n_expr, n_term);

    let eq_op = ctx.ast.node(Kind::Equals, loc.clone());
    let bool_infix = ctx.ast.node(Kind::BoolInfix, loc.clone());
    ctx.ast.push_child(bool_infix, call_expr);
    ctx.ast.push_child(bool_infix, eq_op);
    ctx.ast.push_child(bool_infix, n_expr);
    let wrapped = ctx.ast.node(Kind::Expr, loc.clone());
    ctx.ast.push_child(wrapped, bool_infix);
    wrapped
}

fn build_index_ref(ctx: &mut Compiler, loc: &crate::location::Location, tmp: &str, index: usize) -> NodeId {
    let head_var = ctx.ast.node_with_text(Kind::Var, loc.clone(), tmp);
    let head = ctx.ast.node(Kind::RefHead, loc.clone());
    ctx.ast.push_child(head, head_var);

    let idx_leaf = ctx.ast.node_with_text(Kind::Int, loc.clone(), index.to_string());
    let idx_scalar = ctx.ast.node(Kind::Scalar, loc.clone());
    ctx.ast.push_child(idx_scalar, idx_leaf);
    let idx_term = ctx.ast.node(Kind::Term, loc.clone());
    ctx.ast.push_child(idx_term, idx_scalar);
    let idx_expr = ctx.ast.node(Kind::Expr, loc.clone());
    ctx.ast.push_child(idx_expr, idx_term);
    let brack = ctx.ast.node(Kind::RefArgBrack, loc.clone());
    ctx.ast.push_child(brack, idx_expr);
    let argseq = ctx.ast.node(Kind::RefArgSeq, loc.clone());
    ctx.ast.push_child(argseq, brack);

    let reference = ctx.ast.node(Kind::Ref, loc.clone());
    ctx.ast.push_child(reference, head);
    ctx.ast.push_child(reference, argseq);
    let term = ctx.ast.node(Kind::Term, loc.clone());
    ctx.ast.push_child(term, reference);
    let expr = ctx.ast.node(Kind::Expr, loc.clone());
    ctx.ast.push_child(expr, term);
    expr
}

/// Nested bodies may only appear where the pipeline placed them.
pub fn lift_to_rule() -> Pass<Compiler> {
    Pass::new("lift_to_rule", Direction::TopDown).rule(Matcher::kind(Kind::UnifyBody), |ctx: &mut Compiler, node, _| {
        let Some(parent) = ctx.ast.parent(node) else {
            return Ok(Rewrite::Keep);
        };
        let allowed = matches!(
            ctx.ast.kind(parent),
            Kind::RuleBody
                | Kind::Else
                | Kind::Query
                | Kind::LiteralNot
                | Kind::LiteralWith
                | Kind::ArrayCompr
                | Kind::SetCompr
                | Kind::ObjectCompr
        );
        if allowed {
            Ok(Rewrite::Keep)
        } else {
            Err(ctx.compile_error(node, "a rule body cannot appear here"))
        }
    })
}
