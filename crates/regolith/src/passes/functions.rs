//! Call resolution: membership desugars to its internal built-ins, and
//! every call target resolves to a built-in name or a compiled function
//! name with a checked arity.

use crate::ast::{Kind, NodeId};
use crate::errors::{ErrorCode, PolicyError};
use crate::rewrite::{Direction, Matcher, Pass, Rewrite};

use super::refs::{resolve_rule_path, rule_arity};
use super::Compiler;

pub fn functions() -> Pass<Compiler> {
    Pass::new("functions", Direction::BottomUp)
        .rule(Matcher::kind(Kind::Membership), |ctx: &mut Compiler, node, _| {
            let loc = ctx.ast.loc(node).clone();
            let children = ctx.ast.take_children(node);
            let &[key, item, seq] = children.as_slice() else {
                return Err(ctx.compile_error(node, "malformed membership"));
            };

            let binary = ctx.ast.kind(key) == Kind::Undefined;
            let name = if binary { "internal.member_2" } else { "internal.member_3" };

            let callee = build_callee(ctx, &loc, name);
            let args = ctx.ast.node(Kind::ExprSeq, loc.clone());
            if !binary {
                ctx.ast.push_child(args, key);
            }
            ctx.ast.push_child(args, item);
            ctx.ast.push_child(args, seq);

            let call = ctx.ast.node_with_text(Kind::ExprCall, loc, name);
            ctx.ast.push_child(call, callee);
            ctx.ast.push_child(call, args);
            Ok(Rewrite::Replace(call))
        })
        .rule(Matcher::kind(Kind::ExprCall), |ctx: &mut Compiler, node, _| {
            if !ctx.ast.text(node).is_empty() {
                // already resolved
                return Ok(Rewrite::Keep);
            }
            let callee = ctx.ast.child(node, 0);
            let args = ctx.ast.child(node, 1);
            let Some(name) = ctx.flatten_ref(callee) else {
                return Err(ctx.compile_error(callee, "invalid call target"));
            };

            if ctx.builtin_names.contains(&name) {
                ctx.ast.set_text(node, name);
                return Ok(Rewrite::Keep);
            }

            if let Some(path) = name.strip_prefix("data.") {
                let segments: Vec<String> = path.split('.').map(str::to_owned).collect();
                match resolve_rule_path(&ctx.rule_tree, &segments) {
                    Some((depth, group)) if depth == segments.len() && !group.rules.is_empty() => {
                        let rule = group.rules[0];
                        let arity = rule_arity(ctx, rule);
                        if super::refs::head_kind(ctx, rule) != Kind::RuleHeadFunc {
                            return Err(ctx.compile_error(callee, format!("{path} is not a function")));
                        }
                        if arity != ctx.ast.size(args) {
                            return Err(PolicyError::at(
                                ErrorCode::TypeError,
                                format!(
                                    "function {path} expects {arity} arguments, got {}",
                                    ctx.ast.size(args)
                                ),
                                ctx.ast.loc(node),
                            ));
                        }
                        ctx.ast.set_text(node, format!("g0.{path}"));
                        return Ok(Rewrite::Keep);
                    }
                    _ => {
                        return Err(ctx.compile_error(callee, format!("unknown function: {path}")));
                    }
                }
            }

            Err(ctx.compile_error(callee, format!("unknown function: {name}")))
        })
}

fn build_callee(ctx: &mut Compiler, loc: &crate::location::Location, name: &str) -> NodeId {
    let mut segments = name.split('.');
    let head_name = segments.next().unwrap_or(name);
    let head_var = ctx.ast.node_with_text(Kind::Var, loc.clone(), head_name);
    let head = ctx.ast.node(Kind::RefHead, loc.clone());
    ctx.ast.push_child(head, head_var);
    let argseq = ctx.ast.node(Kind::RefArgSeq, loc.clone());
    for segment in segments {
        let var = ctx.ast.node_with_text(Kind::Var, loc.clone(), segment);
        let arg = ctx.ast.node(Kind::RefArgDot, loc.clone());
        ctx.ast.push_child(arg, var);
        ctx.ast.push_child(argseq, arg);
    }
    let callee = ctx.ast.node(Kind::Ref, loc.clone());
    ctx.ast.push_child(callee, head);
    ctx.ast.push_child(callee, argseq);
    callee
}
