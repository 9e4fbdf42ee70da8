//! IR emission: rule groups become bundle functions, the ad-hoc query and
//! the entrypoints become plans.
//!
//! Expressions lower to statements through the builder; references resolve
//! statically against the rule tree (base-document lookups become `Dot`
//! chains, rule hits become `Call`s, package references materialize the
//! merged document). Enumerations nest everything that follows them inside
//! their `Scan` block, so each iteration re-evaluates the dependent
//! statements and the terminal action.

use ahash::{AHashMap, AHashSet};

use crate::ast::{Kind, NodeId};
use crate::bundle::{Block, Function, LocalId, Operand, Plan, Statement, Stmt, StmtLoc};
use crate::errors::{ErrorCode, ErrorSeq, PolicyError};
use crate::rewrite::{Direction, Pass};
use crate::value::Value;

use super::refs::head_kind;
use super::{Compiler, RuleTree};

pub fn query() -> Pass<Compiler> {
    Pass::new("query", Direction::TopDown).pre(|ctx: &mut Compiler, _| {
        emit_all(ctx).map_err(ErrorSeq::of)
    })
}

/// Per-branch variable environment: name -> frame slot, plus the set of
/// names already bound at the current emission point.
#[derive(Debug, Clone, Default)]
struct Env {
    slots: AHashMap<String, LocalId>,
    bound: AHashSet<String>,
}

impl Env {
    fn slot(&self, name: &str) -> Option<LocalId> {
        self.slots.get(name).copied()
    }

    fn define(&mut self, ctx: &mut Compiler, name: &str) -> LocalId {
        if let Some(slot) = self.slots.get(name) {
            return *slot;
        }
        let slot = ctx.builder.alloc_local();
        self.slots.insert(name.to_owned(), slot);
        slot
    }
}

/// The action emitted into the innermost block once a branch's statements
/// have all run.
enum Terminal {
    None,
    /// Complete rules and functions: bind the result once; optionally set
    /// a per-definition marker for else chains.
    AssignOnce {
        value: NodeId,
        result: LocalId,
        done: Option<LocalId>,
    },
    /// Partial set rules and set comprehensions.
    SetAdd { item: NodeId, set: LocalId },
    /// Array comprehensions.
    Append { item: NodeId, array: LocalId },
    /// Partial object rules and object comprehensions.
    Insert {
        key: NodeId,
        value: NodeId,
        object: LocalId,
        once: bool,
    },
    /// The ad-hoc query: build the result frame and add it to the result
    /// set.
    QueryFrame {
        entries: Vec<ExprEntry>,
        bindings: Vec<String>,
    },
}

/// What one query literal contributes to the `expressions` array.
enum ExprEntry {
    /// The value of a bare expression literal, held in a temporary.
    Var(String),
    /// Assignments and modifiers evaluate to `true`.
    True,
}

fn emit_all(ctx: &mut Compiler) -> Result<(), PolicyError> {
    // functions for every rule group, in deterministic path order
    let groups = collect_groups(&ctx.rule_tree, Vec::new());
    for (path, rules, defaults) in groups {
        emit_rule_group(ctx, &path, &rules, &defaults)?;
    }

    if let Some(query) = ctx.query {
        emit_query_plan(ctx, query)?;
    }

    for entrypoint in ctx.entrypoints.clone() {
        emit_entrypoint(ctx, &entrypoint)?;
    }
    Ok(())
}

fn collect_groups(tree: &RuleTree, prefix: Vec<String>) -> Vec<(Vec<String>, Vec<NodeId>, Vec<NodeId>)> {
    let mut out = Vec::new();
    for (name, group) in &tree.rules {
        let mut path = prefix.clone();
        path.push(name.clone());
        out.push((path, group.rules.clone(), group.defaults.clone()));
    }
    for (name, child) in &tree.children {
        let mut path = prefix.clone();
        path.push(name.clone());
        out.extend(collect_groups(child, path));
    }
    out
}

fn stmt_loc(ctx: &mut Compiler, node: NodeId) -> StmtLoc {
    let loc = ctx.ast.loc(node).clone();
    ctx.builder.stmt_loc(&loc)
}

// --- rule groups ----------------------------------------------------------

fn emit_rule_group(
    ctx: &mut Compiler,
    path: &[String],
    rules: &[NodeId],
    defaults: &[NodeId],
) -> Result<(), PolicyError> {
    let name = format!("g0.{}", path.join("."));
    let kind = rules.first().map_or(Kind::RuleHeadComp, |&r| head_kind(ctx, r));
    let result = ctx.builder.alloc_local();

    // parameter slots, shared across definitions by position
    let mut parameters = vec![0, 1];
    let arity = rules.first().map_or(0, |&r| super::refs::rule_arity(ctx, r));
    for _ in 0..arity {
        parameters.push(ctx.builder.alloc_local());
    }

    let mut blocks = Vec::new();

    match kind {
        Kind::RuleHeadSet => {
            let mut init = Block::new();
            init.push(Statement::new(Stmt::MakeSet { target: result }));
            blocks.push(init);
        }
        Kind::RuleHeadObj => {
            let mut init = Block::new();
            init.push(Statement::new(Stmt::MakeObject { target: result }));
            blocks.push(init);
        }
        _ => {}
    }

    for &rule in rules {
        emit_rule_definition(ctx, rule, kind, result, &parameters, &mut blocks)?;
    }

    // defaults fill in when nothing fired
    if let Some(&default_rule) = defaults.first() {
        let value_expr = ctx.ast.child(default_rule, 1);
        let value = ctx
            .eval_const(value_expr)
            .ok_or_else(|| ctx.compile_error(value_expr, "default rule values must be constants"))?;
        let mut block = Block::new();
        block.push(Statement::new(Stmt::IsUndefined { source: result }));
        let op = emit_const(ctx, &mut block, &value);
        block.push(Statement::new(Stmt::AssignVar {
            source: op,
            target: result,
        }));
        blocks.push(block);
    }

    let mut last = Block::new();
    if matches!(kind, Kind::RuleHeadComp | Kind::RuleHeadFunc) {
        last.push(Statement::new(Stmt::IsDefined { source: result }));
    }
    last.push(Statement::new(Stmt::ReturnLocal { source: result }));
    blocks.push(last);

    let arity_u32 = u32::try_from(parameters.len()).unwrap_or(u32::MAX);
    ctx.builder.add_function(Function {
        name,
        parameters,
        arity: arity_u32,
        result,
        cacheable: true,
        blocks,
    });
    Ok(())
}

fn emit_rule_definition(
    ctx: &mut Compiler,
    rule: NodeId,
    kind: Kind,
    result: LocalId,
    parameters: &[LocalId],
    blocks: &mut Vec<Block>,
) -> Result<(), PolicyError> {
    let head = ctx.ast.child(rule, 1);
    let head_inner = ctx.ast.child(head, 0);
    let bodies = ctx.ast.child(rule, 2);
    let branches: Vec<NodeId> = ctx.ast.children(bodies).to_vec();

    // else chains gate on a per-definition marker
    let has_else = branches.iter().any(|&b| ctx.ast.kind(b) == Kind::Else);
    if has_else && matches!(kind, Kind::RuleHeadSet | Kind::RuleHeadObj) {
        return Err(ctx.compile_error(rule, "else is not allowed on partial rules"));
    }
    let done = has_else.then(|| ctx.builder.alloc_local());

    for (index, &branch) in branches.iter().enumerate() {
        let mut env = Env::default();
        // parameters bind by position
        if kind == Kind::RuleHeadFunc {
            let args = ctx.ast.child(head_inner, 0);
            for (position, &param) in ctx.ast.children(args).to_vec().iter().enumerate() {
                let name = ctx.ast.text(param).to_owned();
                env.slots.insert(name.clone(), parameters[position + 2]);
                env.bound.insert(name);
            }
        }

        let body = ctx.ast.child_of_kind(branch, Kind::UnifyBody);
        let mut block = Block::new();

        if let Some(done) = done {
            if index == 0 {
                block.push(Statement::new(Stmt::ResetLocal { target: done }));
            } else {
                block.push(Statement::new(Stmt::IsUndefined { source: done }));
            }
        }

        let terminal = match kind {
            Kind::RuleHeadComp | Kind::RuleHeadFunc => {
                let value = if ctx.ast.kind(branch) == Kind::Else {
                    ctx.ast.child(branch, 0)
                } else if kind == Kind::RuleHeadFunc {
                    ctx.ast.child(head_inner, 1)
                } else {
                    ctx.ast.child(head_inner, 0)
                };
                Terminal::AssignOnce { value, result, done }
            }
            Kind::RuleHeadSet => Terminal::SetAdd {
                item: ctx.ast.child(head_inner, 0),
                set: result,
            },
            Kind::RuleHeadObj => Terminal::Insert {
                key: ctx.ast.child(head_inner, 0),
                value: ctx.ast.child(head_inner, 1),
                object: result,
                once: true,
            },
            _ => Terminal::None,
        };

        emit_body(ctx, &mut block, body, &mut env, &terminal)?;
        blocks.push(block);
    }
    Ok(())
}

// --- bodies ---------------------------------------------------------------

fn emit_body(
    ctx: &mut Compiler,
    block: &mut Block,
    body: Option<NodeId>,
    env: &mut Env,
    terminal: &Terminal,
) -> Result<(), PolicyError> {
    let statements = match body {
        Some(body) => {
            for &child in ctx.ast.children(body).to_vec().iter() {
                if ctx.ast.kind(child) == Kind::Local {
                    let name = ctx.ast.text(child).to_owned();
                    env.define(ctx, &name);
                }
            }
            ctx.ast
                .children(body)
                .iter()
                .copied()
                .filter(|&c| ctx.ast.kind(c) != Kind::Local)
                .collect()
        }
        None => Vec::new(),
    };
    emit_statements(ctx, block, &statements, env, terminal)
}

fn emit_statements(
    ctx: &mut Compiler,
    block: &mut Block,
    statements: &[NodeId],
    env: &mut Env,
    terminal: &Terminal,
) -> Result<(), PolicyError> {
    let Some((&stmt, rest)) = statements.split_first() else {
        return emit_terminal(ctx, block, env, terminal);
    };

    match ctx.ast.kind(stmt) {
        Kind::LiteralInit => {
            let inner = ctx.ast.child(stmt, 0);
            emit_unify(ctx, block, env, inner, true)?;
            emit_statements(ctx, block, rest, env, terminal)
        }
        Kind::UnifyExpr => {
            emit_unify(ctx, block, env, stmt, false)?;
            emit_statements(ctx, block, rest, env, terminal)
        }
        Kind::LiteralEnum => {
            let key_name = ctx.ast.text(ctx.ast.child(stmt, 0)).to_owned();
            let value_name = ctx.ast.text(ctx.ast.child(stmt, 1)).to_owned();
            let seq = ctx.ast.child(stmt, 2);
            let seq_op = emit_expr(ctx, block, env, seq)?;
            let source = as_local(ctx, block, seq_op);

            let key = env.define(ctx, &key_name);
            let value = env.define(ctx, &value_name);
            env.bound.insert(key_name);
            env.bound.insert(value_name);

            // everything that follows runs once per element
            let mut inner = Block::new();
            emit_statements(ctx, &mut inner, rest, env, terminal)?;
            block.push(Statement::at(
                Stmt::Scan {
                    source,
                    key,
                    value,
                    block: inner,
                },
                stmt_loc(ctx, stmt),
            ));
            Ok(())
        }
        Kind::LiteralNot => {
            let body = ctx.ast.child(stmt, 0);
            let mut inner = Block::new();
            emit_body(ctx, &mut inner, Some(body), env, &Terminal::None)?;
            block.push(Statement::at(Stmt::Not { block: inner }, stmt_loc(ctx, stmt)));
            emit_statements(ctx, block, rest, env, terminal)
        }
        Kind::LiteralWith => {
            let target_ref = ctx.ast.child(stmt, 0);
            let value = ctx.ast.child(stmt, 1);
            let body = ctx.ast.child(stmt, 2);

            let (target, path) = with_target(ctx, target_ref)?;
            let value_op = emit_expr(ctx, block, env, value)?;

            let mut inner = Block::new();
            emit_body(ctx, &mut inner, Some(body), env, &Terminal::None)?;
            block.push(Statement::at(
                Stmt::With {
                    target,
                    path,
                    value: value_op,
                    block: inner,
                },
                stmt_loc(ctx, stmt),
            ));
            emit_statements(ctx, block, rest, env, terminal)
        }
        other => Err(ctx.compile_error(stmt, format!("unexpected statement {other}"))),
    }
}

/// Resolves a `with` target to a frame slot and an override path.
fn with_target(ctx: &mut Compiler, target_ref: NodeId) -> Result<(LocalId, Vec<u32>), PolicyError> {
    let head = ctx.ast.child(ctx.ast.child(target_ref, 0), 0);
    let root = ctx.ast.text(head);
    let target = match root {
        "input" => 0,
        "data" => 1,
        _ => {
            return Err(ctx.compile_error(target_ref, "with overrides only input and data paths"));
        }
    };
    let mut segments = Vec::new();
    let mut names = Vec::new();
    for &arg in ctx.ast.children(ctx.ast.child(target_ref, 1)).to_vec().iter() {
        if ctx.ast.kind(arg) != Kind::RefArgDot {
            return Err(ctx.compile_error(target_ref, "with paths must be plain references"));
        }
        let name = ctx.ast.text(ctx.ast.child(arg, 0)).to_owned();
        segments.push(ctx.builder.intern(&name));
        names.push(name);
    }
    if target == 1 && super::refs::resolve_rule_path(&ctx.rule_tree, &names).is_some() {
        return Err(ctx.compile_error(target_ref, "cannot override virtual documents with with"));
    }
    Ok((target, segments))
}

fn emit_unify(
    ctx: &mut Compiler,
    block: &mut Block,
    env: &mut Env,
    unify_expr: NodeId,
    is_init: bool,
) -> Result<(), PolicyError> {
    let var = ctx.ast.child(unify_expr, 0);
    let name = ctx.ast.text(var).to_owned();
    let expr = ctx.ast.child(unify_expr, 1);
    let op = emit_expr(ctx, block, env, expr)?;
    let slot = env.define(ctx, &name);
    let loc = stmt_loc(ctx, unify_expr);

    if name.starts_with("unify$") {
        // bare expression literal: bind and assert not-false
        block.push(Statement::at(Stmt::AssignVar { source: op, target: slot }, loc));
        block.push(Statement::at(
            Stmt::NotEqual {
                a: Operand::Local(slot),
                b: Operand::Bool(false),
            },
            loc,
        ));
        env.bound.insert(name);
        return Ok(());
    }

    if is_init || !env.bound.contains(&name) {
        block.push(Statement::at(Stmt::AssignVar { source: op, target: slot }, loc));
        env.bound.insert(name);
    } else {
        // already bound: unification degrades to an equality check
        block.push(Statement::at(
            Stmt::Equal {
                a: Operand::Local(slot),
                b: op,
            },
            loc,
        ));
    }
    Ok(())
}

fn emit_terminal(ctx: &mut Compiler, block: &mut Block, env: &mut Env, terminal: &Terminal) -> Result<(), PolicyError> {
    match terminal {
        Terminal::None => Ok(()),
        Terminal::AssignOnce { value, result, done } => {
            let op = emit_expr(ctx, block, env, *value)?;
            block.push(Statement::at(
                Stmt::AssignVarOnce {
                    source: op,
                    target: *result,
                },
                stmt_loc(ctx, *value),
            ));
            if let Some(done) = done {
                block.push(Statement::new(Stmt::AssignVar {
                    source: Operand::Bool(true),
                    target: *done,
                }));
            }
            Ok(())
        }
        Terminal::SetAdd { item, set } => {
            let op = emit_expr(ctx, block, env, *item)?;
            block.push(Statement::at(Stmt::SetAdd { value: op, set: *set }, stmt_loc(ctx, *item)));
            Ok(())
        }
        Terminal::Append { item, array } => {
            let op = emit_expr(ctx, block, env, *item)?;
            block.push(Statement::at(
                Stmt::ArrayAppend {
                    value: op,
                    array: *array,
                },
                stmt_loc(ctx, *item),
            ));
            Ok(())
        }
        Terminal::Insert {
            key,
            value,
            object,
            once,
        } => {
            let key_op = emit_expr(ctx, block, env, *key)?;
            let value_op = emit_expr(ctx, block, env, *value)?;
            let stmt = if *once {
                Stmt::ObjectInsertOnce {
                    key: key_op,
                    value: value_op,
                    target: *object,
                }
            } else {
                Stmt::ObjectInsert {
                    key: key_op,
                    value: value_op,
                    target: *object,
                }
            };
            block.push(Statement::at(stmt, stmt_loc(ctx, *key)));
            Ok(())
        }
        Terminal::QueryFrame { entries, bindings } => {
            let expressions = ctx.builder.alloc_local();
            block.push(Statement::new(Stmt::MakeArray {
                capacity: u32::try_from(entries.len()).unwrap_or(0),
                target: expressions,
            }));
            for entry in entries {
                let op = match entry {
                    ExprEntry::True => Operand::Bool(true),
                    ExprEntry::Var(name) => {
                        let slot = env
                            .slot(name)
                            .ok_or_else(|| PolicyError::new(ErrorCode::CompileError, "missing query temporary", None))?;
                        Operand::Local(slot)
                    }
                };
                block.push(Statement::new(Stmt::ArrayAppend {
                    value: op,
                    array: expressions,
                }));
            }

            let bindings_obj = ctx.builder.alloc_local();
            block.push(Statement::new(Stmt::MakeObject { target: bindings_obj }));
            for name in bindings {
                let Some(slot) = env.slot(name) else { continue };
                let key = ctx.builder.intern(name);
                block.push(Statement::new(Stmt::ObjectInsert {
                    key: Operand::String(key),
                    value: Operand::Local(slot),
                    target: bindings_obj,
                }));
            }

            let frame = ctx.builder.alloc_local();
            block.push(Statement::new(Stmt::MakeObject { target: frame }));
            let expressions_key = ctx.builder.intern("expressions");
            block.push(Statement::new(Stmt::ObjectInsert {
                key: Operand::String(expressions_key),
                value: Operand::Local(expressions),
                target: frame,
            }));
            let bindings_key = ctx.builder.intern("bindings");
            block.push(Statement::new(Stmt::ObjectInsert {
                key: Operand::String(bindings_key),
                value: Operand::Local(bindings_obj),
                target: frame,
            }));
            block.push(Statement::new(Stmt::ResultSetAdd { source: frame }));
            Ok(())
        }
    }
}

// --- expressions ----------------------------------------------------------

/// Materializes an operand into a local slot when needed.
fn as_local(ctx: &mut Compiler, block: &mut Block, op: Operand) -> LocalId {
    if let Operand::Local(slot) = op {
        return slot;
    }
    let slot = ctx.builder.alloc_local();
    block.push(Statement::new(Stmt::AssignVar { source: op, target: slot }));
    slot
}

fn emit_expr(ctx: &mut Compiler, block: &mut Block, env: &mut Env, expr: NodeId) -> Result<Operand, PolicyError> {
    let inner = match ctx.ast.kind(expr) {
        Kind::Expr => ctx.ast.child(expr, 0),
        _ => expr,
    };
    match ctx.ast.kind(inner) {
        Kind::Term => {
            let child = ctx.ast.child(inner, 0);
            emit_term(ctx, block, env, child)
        }
        Kind::DataTerm => {
            let index: usize = ctx
                .ast
                .text(inner)
                .parse()
                .map_err(|_| ctx.compile_error(inner, "invalid constant index"))?;
            let value = ctx.constants[index].clone();
            Ok(emit_const(ctx, block, &value))
        }
        Kind::ArithInfix | Kind::BoolInfix | Kind::BinInfix => {
            let (lhs_node, rhs_node) = (ctx.ast.child(inner, 0), ctx.ast.child(inner, 2));
            let lhs = emit_expr(ctx, block, env, lhs_node)?;
            let rhs = emit_expr(ctx, block, env, rhs_node)?;
            let op = ctx.ast.kind(ctx.ast.child(inner, 1));
            let name = match op {
                Kind::Add => "plus",
                Kind::Subtract => "minus",
                Kind::Multiply => "mul",
                Kind::Divide => "div",
                Kind::Modulo => "rem",
                Kind::Equals => "equal",
                Kind::NotEquals => "neq",
                Kind::LessThan => "lt",
                Kind::GreaterThan => "gt",
                Kind::LessThanOrEquals => "lte",
                Kind::GreaterThanOrEquals => "gte",
                Kind::And => "and",
                Kind::Or => "or",
                other => {
                    return Err(ctx.compile_error(inner, format!("unexpected operator {other}")));
                }
            };
            let func = ctx.builder.intern(name);
            let target = ctx.builder.alloc_local();
            block.push(Statement::at(
                Stmt::Call {
                    func,
                    args: smallvec::smallvec![lhs, rhs],
                    target,
                },
                stmt_loc(ctx, inner),
            ));
            Ok(Operand::Local(target))
        }
        Kind::ExprCall => emit_call(ctx, block, env, inner),
        other => Err(ctx.compile_error(inner, format!("cannot emit expression {other}"))),
    }
}

fn emit_call(ctx: &mut Compiler, block: &mut Block, env: &mut Env, call: NodeId) -> Result<Operand, PolicyError> {
    let name = ctx.ast.text(call).to_owned();
    if name.is_empty() {
        return Err(ctx.compile_error(call, "unresolved call"));
    }
    let args_node = ctx.ast.child(call, 1);
    let mut args = crate::bundle::Operands::new();
    if name.starts_with("g0.") {
        args.push(Operand::Local(0));
        args.push(Operand::Local(1));
    }
    for &arg in ctx.ast.children(args_node).to_vec().iter() {
        args.push(emit_expr(ctx, block, env, arg)?);
    }
    let func = ctx.builder.intern(&name);
    let target = ctx.builder.alloc_local();
    block.push(Statement::at(Stmt::Call { func, args, target }, stmt_loc(ctx, call)));
    Ok(Operand::Local(target))
}

fn emit_term(ctx: &mut Compiler, block: &mut Block, env: &mut Env, term: NodeId) -> Result<Operand, PolicyError> {
    match ctx.ast.kind(term) {
        Kind::Scalar => {
            let scalar = ctx.ast.child(term, 0);
            emit_scalar(ctx, block, scalar)
        }
        Kind::Var => emit_var(ctx, block, env, term),
        Kind::Ref => emit_ref(ctx, block, env, term),
        Kind::Array => {
            let target = ctx.builder.alloc_local();
            let items: Vec<NodeId> = ctx.ast.children(term).to_vec();
            block.push(Statement::new(Stmt::MakeArray {
                capacity: u32::try_from(items.len()).unwrap_or(0),
                target,
            }));
            for item in items {
                let op = emit_expr(ctx, block, env, item)?;
                block.push(Statement::new(Stmt::ArrayAppend { value: op, array: target }));
            }
            Ok(Operand::Local(target))
        }
        Kind::Set => {
            let target = ctx.builder.alloc_local();
            block.push(Statement::new(Stmt::MakeSet { target }));
            for &item in ctx.ast.children(term).to_vec().iter() {
                let op = emit_expr(ctx, block, env, item)?;
                block.push(Statement::new(Stmt::SetAdd { value: op, set: target }));
            }
            Ok(Operand::Local(target))
        }
        Kind::Object => {
            let target = ctx.builder.alloc_local();
            block.push(Statement::new(Stmt::MakeObject { target }));
            for &item in ctx.ast.children(term).to_vec().iter() {
                let (key_node, value_node) = (ctx.ast.child(item, 0), ctx.ast.child(item, 1));
                let key = emit_expr(ctx, block, env, key_node)?;
                let value = emit_expr(ctx, block, env, value_node)?;
                block.push(Statement::new(Stmt::ObjectInsert {
                    key,
                    value,
                    target,
                }));
            }
            Ok(Operand::Local(target))
        }
        Kind::ArrayCompr => {
            let target = ctx.builder.alloc_local();
            block.push(Statement::new(Stmt::MakeArray { capacity: 1, target }));
            let head = ctx.ast.child(term, 0);
            let body = ctx.ast.child(term, 1);
            emit_compr(ctx, block, env, body, Terminal::Append { item: head, array: target })?;
            Ok(Operand::Local(target))
        }
        Kind::SetCompr => {
            let target = ctx.builder.alloc_local();
            block.push(Statement::new(Stmt::MakeSet { target }));
            let head = ctx.ast.child(term, 0);
            let body = ctx.ast.child(term, 1);
            emit_compr(ctx, block, env, body, Terminal::SetAdd { item: head, set: target })?;
            Ok(Operand::Local(target))
        }
        Kind::ObjectCompr => {
            let target = ctx.builder.alloc_local();
            block.push(Statement::new(Stmt::MakeObject { target }));
            let key = ctx.ast.child(term, 0);
            let value = ctx.ast.child(term, 1);
            let body = ctx.ast.child(term, 2);
            emit_compr(
                ctx,
                block,
                env,
                body,
                Terminal::Insert {
                    key,
                    value,
                    object: target,
                    once: true,
                },
            )?;
            Ok(Operand::Local(target))
        }
        other => Err(ctx.compile_error(term, format!("cannot emit term {other}"))),
    }
}

/// Comprehensions compile inline: their body runs in a nested block whose
/// failure leaves the collection empty rather than undefined.
fn emit_compr(
    ctx: &mut Compiler,
    block: &mut Block,
    env: &Env,
    body: NodeId,
    terminal: Terminal,
) -> Result<(), PolicyError> {
    // a child environment: outer bindings visible, inner locals private
    let mut inner_env = env.clone();
    let mut inner = Block::new();
    emit_body(ctx, &mut inner, Some(body), &mut inner_env, &terminal)?;
    block.push(Statement::new(Stmt::Block { blocks: vec![inner] }));
    Ok(())
}

fn emit_scalar(ctx: &mut Compiler, block: &mut Block, scalar: NodeId) -> Result<Operand, PolicyError> {
    match ctx.ast.kind(scalar) {
        Kind::Int | Kind::Float => {
            let index = ctx.builder.intern(ctx.ast.text(scalar).to_owned().as_str());
            let target = ctx.builder.alloc_local();
            block.push(Statement::new(Stmt::MakeNumberRef { index, target }));
            Ok(Operand::Local(target))
        }
        Kind::JSONString => {
            let index = ctx.builder.intern(ctx.ast.text(scalar).to_owned().as_str());
            Ok(Operand::String(index))
        }
        Kind::True => Ok(Operand::Bool(true)),
        Kind::False => Ok(Operand::Bool(false)),
        Kind::Null => {
            let target = ctx.builder.alloc_local();
            block.push(Statement::new(Stmt::MakeNull { target }));
            Ok(Operand::Local(target))
        }
        other => Err(ctx.compile_error(scalar, format!("cannot emit scalar {other}"))),
    }
}

/// Emits a constant value as statements.
fn emit_const(ctx: &mut Compiler, block: &mut Block, value: &Value) -> Operand {
    match value {
        Value::Undefined => Operand::None,
        Value::Bool(b) => Operand::Bool(*b),
        Value::String(s) => {
            let index = ctx.builder.intern(s);
            Operand::String(index)
        }
        Value::Null => {
            let target = ctx.builder.alloc_local();
            block.push(Statement::new(Stmt::MakeNull { target }));
            Operand::Local(target)
        }
        Value::Int(i) => {
            let index = ctx.builder.intern(&i.to_string());
            let target = ctx.builder.alloc_local();
            block.push(Statement::new(Stmt::MakeNumberRef { index, target }));
            Operand::Local(target)
        }
        Value::Float(f) => {
            let mut buffer = ryu::Buffer::new();
            let index = ctx.builder.intern(buffer.format(*f));
            let target = ctx.builder.alloc_local();
            block.push(Statement::new(Stmt::MakeNumberRef { index, target }));
            Operand::Local(target)
        }
        Value::Array(items) => {
            let target = ctx.builder.alloc_local();
            block.push(Statement::new(Stmt::MakeArray {
                capacity: u32::try_from(items.len()).unwrap_or(0),
                target,
            }));
            for item in items {
                let op = emit_const(ctx, block, item);
                block.push(Statement::new(Stmt::ArrayAppend { value: op, array: target }));
            }
            Operand::Local(target)
        }
        Value::Set(items) => {
            let target = ctx.builder.alloc_local();
            block.push(Statement::new(Stmt::MakeSet { target }));
            for item in items {
                let op = emit_const(ctx, block, item);
                block.push(Statement::new(Stmt::SetAdd { value: op, set: target }));
            }
            Operand::Local(target)
        }
        Value::Object(items) => {
            let target = ctx.builder.alloc_local();
            block.push(Statement::new(Stmt::MakeObject { target }));
            for (key, value) in items {
                let key_op = emit_const(ctx, block, key);
                let value_op = emit_const(ctx, block, value);
                block.push(Statement::new(Stmt::ObjectInsert {
                    key: key_op,
                    value: value_op,
                    target,
                }));
            }
            Operand::Local(target)
        }
    }
}

fn emit_var(ctx: &mut Compiler, block: &mut Block, env: &mut Env, var: NodeId) -> Result<Operand, PolicyError> {
    let name = ctx.ast.text(var).to_owned();
    match name.as_str() {
        "input" => Ok(Operand::Local(0)),
        "data" => {
            let slot = materialize_package(ctx, block, &[])?;
            Ok(Operand::Local(slot))
        }
        _ => match env.slot(&name) {
            Some(slot) => Ok(Operand::Local(slot)),
            None => Err(ctx.compile_error(var, format!("unbound variable: {name}"))),
        },
    }
}

fn emit_ref(ctx: &mut Compiler, block: &mut Block, env: &mut Env, reference: NodeId) -> Result<Operand, PolicyError> {
    let head = ctx.ast.child(ctx.ast.child(reference, 0), 0);
    let args: Vec<NodeId> = ctx.ast.children(ctx.ast.child(reference, 1)).to_vec();

    match ctx.ast.kind(head) {
        Kind::Var if ctx.ast.text(head) == "data" => emit_data_ref(ctx, block, env, reference, &args),
        Kind::Var => {
            let start = emit_var(ctx, block, env, head)?;
            emit_dot_chain(ctx, block, env, start, &args)
        }
        Kind::ExprCall => {
            let start = emit_call(ctx, block, env, head)?;
            emit_dot_chain(ctx, block, env, start, &args)
        }
        Kind::Term => {
            let head_term = ctx.ast.child(head, 0);
            let start = emit_term(ctx, block, env, head_term)?;
            emit_dot_chain(ctx, block, env, start, &args)
        }
        other => Err(ctx.compile_error(head, format!("invalid reference head {other}"))),
    }
}

/// Static resolution of a `data.…` reference against the rule tree: rule
/// hits become calls, package prefixes materialize, anything else is a
/// base-document lookup.
/// How a `data.…` reference resolves against the rule tree.
enum DataPlan {
    /// The path hits a rule after `consumed` arguments.
    Rule { rule_path: Vec<String>, consumed: usize },
    /// The path ends (or turns dynamic) inside package space.
    Materialize { path: Vec<String>, consumed: usize },
    /// The path leaves the virtual document: a base-document lookup.
    Base,
}

fn plan_data_ref(ctx: &Compiler, args: &[NodeId]) -> DataPlan {
    let mut path: Vec<String> = Vec::new();
    let mut node = &ctx.rule_tree;
    for (index, &arg) in args.iter().enumerate() {
        if ctx.ast.kind(arg) != Kind::RefArgDot {
            // dynamic lookup inside package space
            return DataPlan::Materialize { path, consumed: index };
        }
        let segment = ctx.ast.text(ctx.ast.child(arg, 0)).to_owned();
        if node.rules.contains_key(&segment) {
            let mut rule_path = path;
            rule_path.push(segment);
            return DataPlan::Rule {
                rule_path,
                consumed: index + 1,
            };
        }
        match node.children.get(&segment) {
            Some(child) => {
                node = child;
                path.push(segment);
            }
            None => return DataPlan::Base,
        }
    }
    let consumed = path.len();
    DataPlan::Materialize { path, consumed }
}

fn emit_data_ref(
    ctx: &mut Compiler,
    block: &mut Block,
    env: &mut Env,
    reference: NodeId,
    args: &[NodeId],
) -> Result<Operand, PolicyError> {
    match plan_data_ref(ctx, args) {
        DataPlan::Rule { rule_path, consumed } => {
            let name = format!("g0.{}", rule_path.join("."));
            let func = ctx.builder.intern(&name);
            let target = ctx.builder.alloc_local();
            block.push(Statement::at(
                Stmt::Call {
                    func,
                    args: smallvec::smallvec![Operand::Local(0), Operand::Local(1)],
                    target,
                },
                stmt_loc(ctx, reference),
            ));
            emit_dot_chain(ctx, block, env, Operand::Local(target), &args[consumed..])
        }
        DataPlan::Materialize { path, consumed } => {
            let slot = materialize_package(ctx, block, &path)?;
            emit_dot_chain(ctx, block, env, Operand::Local(slot), &args[consumed..])
        }
        DataPlan::Base => emit_dot_chain(ctx, block, env, Operand::Local(1), args),
    }
}

fn materialize_package(ctx: &mut Compiler, block: &mut Block, path: &[String]) -> Result<LocalId, PolicyError> {
    let object = ctx.builder.alloc_local();
    block.push(Statement::new(Stmt::MakeObject { target: object }));

    let Some(node) = ctx.rule_tree.at(&path.iter().map(String::as_str).collect::<Vec<_>>()) else {
        return Ok(object);
    };

    // rules (functions are not part of the document)
    let rule_entries: Vec<(String, bool)> = node
        .rules
        .iter()
        .map(|(name, group)| {
            let is_function = group
                .rules
                .first()
                .is_some_and(|&r| head_kind(ctx, r) == Kind::RuleHeadFunc);
            (name.clone(), is_function)
        })
        .collect();
    let subpackages: Vec<String> = node.children.keys().cloned().collect();

    for (name, is_function) in rule_entries {
        if is_function {
            continue;
        }
        let mut rule_path = path.to_vec();
        rule_path.push(name.clone());
        let func = ctx.builder.intern(&format!("g0.{}", rule_path.join(".")));
        let value = ctx.builder.alloc_local();
        let key = ctx.builder.intern(&name);

        let mut inner = Block::new();
        inner.push(Statement::new(Stmt::Call {
            func,
            args: smallvec::smallvec![Operand::Local(0), Operand::Local(1)],
            target: value,
        }));
        inner.push(Statement::new(Stmt::ObjectInsert {
            key: Operand::String(key),
            value: Operand::Local(value),
            target: object,
        }));
        block.push(Statement::new(Stmt::Block { blocks: vec![inner] }));
    }

    for name in subpackages {
        let mut sub_path = path.to_vec();
        sub_path.push(name.clone());
        let value = materialize_package(ctx, block, &sub_path)?;
        let key = ctx.builder.intern(&name);
        block.push(Statement::new(Stmt::ObjectInsert {
            key: Operand::String(key),
            value: Operand::Local(value),
            target: object,
        }));
    }

    // merge the base document at this path underneath the virtual values
    let mut inner = Block::new();
    let mut base: Operand = Operand::Local(1);
    for segment in path {
        let key = ctx.builder.intern(segment);
        let target = ctx.builder.alloc_local();
        inner.push(Statement::new(Stmt::Dot {
            source: base,
            key: Operand::String(key),
            target,
        }));
        base = Operand::Local(target);
    }
    let base_slot = match base {
        Operand::Local(slot) => slot,
        _ => unreachable!("base chain always yields a local"),
    };
    inner.push(Statement::new(Stmt::ObjectMerge {
        a: base_slot,
        b: object,
        target: object,
    }));
    block.push(Statement::new(Stmt::Block { blocks: vec![inner] }));

    Ok(object)
}

fn emit_dot_chain(
    ctx: &mut Compiler,
    block: &mut Block,
    env: &mut Env,
    start: Operand,
    args: &[NodeId],
) -> Result<Operand, PolicyError> {
    let mut current = start;
    for &arg in args {
        let key = match ctx.ast.kind(arg) {
            Kind::RefArgDot => {
                let name = ctx.ast.text(ctx.ast.child(arg, 0)).to_owned();
                Operand::String(ctx.builder.intern(&name))
            }
            _ => {
                let index_expr = ctx.ast.child(arg, 0);
                emit_expr(ctx, block, env, index_expr)?
            }
        };
        let target = ctx.builder.alloc_local();
        block.push(Statement::at(
            Stmt::Dot {
                source: current,
                key,
                target,
            },
            stmt_loc(ctx, arg),
        ));
        current = Operand::Local(target);
    }
    Ok(current)
}

// --- plans ----------------------------------------------------------------

/// Collects the expression entries of a query body, recursing through
/// `with` modifiers.
fn query_entries(ctx: &Compiler, body: NodeId, entries: &mut Vec<ExprEntry>) {
    for &child in ctx.ast.children(body) {
        match ctx.ast.kind(child) {
            Kind::UnifyExpr | Kind::LiteralInit => {
                let unify = if ctx.ast.kind(child) == Kind::LiteralInit {
                    ctx.ast.child(child, 0)
                } else {
                    child
                };
                let name = ctx.ast.text(ctx.ast.child(unify, 0));
                if name.starts_with("unify$") {
                    entries.push(ExprEntry::Var(name.to_owned()));
                } else {
                    entries.push(ExprEntry::True);
                }
            }
            Kind::LiteralNot => entries.push(ExprEntry::True),
            Kind::LiteralWith => query_entries(ctx, ctx.ast.child(child, 2), entries),
            _ => {}
        }
    }
}

fn emit_query_plan(ctx: &mut Compiler, query: NodeId) -> Result<(), PolicyError> {
    let body = ctx.ast.child(query, 0);

    let mut entries = Vec::new();
    query_entries(ctx, body, &mut entries);

    let bindings: Vec<String> = ctx
        .ast
        .children(body)
        .iter()
        .copied()
        .filter(|&c| ctx.ast.kind(c) == Kind::Local)
        .map(|c| ctx.ast.text(c).to_owned())
        .filter(|name| !name.contains('$'))
        .collect();

    let mut env = Env::default();
    let mut block = Block::new();
    emit_body(
        ctx,
        &mut block,
        Some(body),
        &mut env,
        &Terminal::QueryFrame { entries, bindings },
    )?;

    let index = ctx.builder.add_plan(Plan {
        name: "query".into(),
        blocks: vec![block],
    });
    ctx.query_plan = Some(index);
    Ok(())
}

fn emit_entrypoint(ctx: &mut Compiler, entrypoint: &str) -> Result<(), PolicyError> {
    let segments: Vec<String> = entrypoint.split('/').map(str::to_owned).collect();
    let resolved = super::refs::resolve_rule_path(&ctx.rule_tree, &segments);
    let valid = matches!(resolved, Some((depth, _)) if depth == segments.len());
    if !valid {
        return Err(PolicyError::new(
            ErrorCode::CompileError,
            format!("unknown entrypoint: {entrypoint}"),
            None,
        ));
    }

    let func = ctx.builder.intern(&format!("g0.{}", segments.join(".")));
    let value = ctx.builder.alloc_local();
    let frame = ctx.builder.alloc_local();
    let result_key = ctx.builder.intern("result");

    let mut block = Block::new();
    block.push(Statement::new(Stmt::Call {
        func,
        args: smallvec::smallvec![Operand::Local(0), Operand::Local(1)],
        target: value,
    }));
    block.push(Statement::new(Stmt::MakeObject { target: frame }));
    block.push(Statement::new(Stmt::ObjectInsert {
        key: Operand::String(result_key),
        value: Operand::Local(value),
        target: frame,
    }));
    block.push(Statement::new(Stmt::ResultSetAdd { source: frame }));

    ctx.builder.add_plan(Plan {
        name: entrypoint.to_owned(),
        blocks: vec![block],
    });
    Ok(())
}
