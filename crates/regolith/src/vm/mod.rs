//! The bundle virtual machine.
//!
//! A frame-based interpreter over compiled [`Bundle`] IR. Evaluation is
//! synchronous and deterministic: one flat frame of locals (slot 0 =
//! input, slot 1 = data), a call stack used only for recursion detection
//! and error wording, a function cache keyed by argument canonical keys,
//! and a result set accumulated by `ResultSetAdd`.
//!
//! `Undefined` is the quiet-failure signal: it aborts the current block
//! without aborting outer blocks and never becomes an error. Errors abort
//! the whole plan and are collected into the error sequence.

use ahash::AHashMap;
use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::builtins::Registry;
use crate::bundle::{Block, Bundle, Function, LocalId, Operand, Statement, Stmt, StmtLoc};
use crate::errors::{ErrorCode, ErrorLocation, ErrorSeq, PolicyError};
use crate::value::{insert_into_object, merge_objects, Value};

/// Control signal returned by statement execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Continue,
    Undefined,
    Return,
    Break,
    Error,
}

/// Mutable evaluation state; one per evaluation, never shared.
#[derive(Debug)]
struct State {
    frame: Vec<Option<Value>>,
    /// (function name, arity) for every active call.
    call_stack: Vec<(String, u32)>,
    /// Memoized function results, keyed by name and argument canonical
    /// keys. Never read or written while inside `with`.
    function_cache: AHashMap<(String, Vec<String>), Value>,
    with_depth: u32,
    break_count: u32,
    result_set: Vec<Value>,
    errors: ErrorSeq,
}

impl State {
    fn new(input: Value, data: Value, local_count: u32) -> Self {
        let mut state = Self {
            frame: vec![None; local_count as usize],
            call_stack: Vec::new(),
            function_cache: AHashMap::new(),
            with_depth: 0,
            break_count: 0,
            result_set: Vec::new(),
            errors: ErrorSeq::new(),
        };
        state.write_local(0, input);
        state.write_local(1, data);
        state
    }

    fn read_local(&self, slot: LocalId) -> Value {
        match &self.frame[slot as usize] {
            Some(value) => value.clone(),
            None => Value::Undefined,
        }
    }

    fn is_defined(&self, slot: LocalId) -> bool {
        self.frame[slot as usize].is_some()
    }

    /// Writing `Undefined` resets the slot.
    fn write_local(&mut self, slot: LocalId, value: Value) {
        log::trace!("frame[{slot}] <- {}", value.to_key());
        if value.is_undefined() {
            self.frame[slot as usize] = None;
        } else {
            self.frame[slot as usize] = Some(value);
        }
    }

    fn reset_local(&mut self, slot: LocalId) {
        self.frame[slot as usize] = None;
    }

    fn in_call_stack(&self, name: &str) -> bool {
        self.call_stack.iter().any(|(n, _)| n == name)
    }

    /// Conflict wording depends on whether the innermost call is a
    /// complete rule (arity 2: input and data only) or a user function.
    fn multiple_output_error(&mut self, loc: Option<ErrorLocation>) {
        let message = match self.call_stack.last() {
            Some((_, arity)) if *arity > 2 => "functions must not produce multiple outputs for same inputs",
            _ => "complete rules must not produce multiple outputs",
        };
        self.errors.push(PolicyError::new(ErrorCode::EvalConflictError, message, loc));
    }
}

/// The executor. Holds only immutable references; evaluation state lives
/// in a per-run [`State`].
pub struct VirtualMachine<'a> {
    bundle: &'a Bundle,
    builtins: &'a Registry,
    strict_builtin_errors: bool,
}

impl<'a> VirtualMachine<'a> {
    pub fn new(bundle: &'a Bundle, builtins: &'a Registry) -> Self {
        Self {
            bundle,
            builtins,
            strict_builtin_errors: false,
        }
    }

    pub fn strict_builtin_errors(mut self, strict: bool) -> Self {
        self.strict_builtin_errors = strict;
        self
    }

    /// Runs the ad-hoc query plan, returning the raw result frames.
    pub fn run_query(&self, input: &Value) -> Result<Vec<Value>, ErrorSeq> {
        let Some(index) = self.bundle.query_plan else {
            return Err(ErrorSeq::of(PolicyError::new(
                ErrorCode::CompileError,
                "bundle has no query plan",
                None,
            )));
        };
        let plan = &self.bundle.plans[index as usize];
        self.run_plan_with(plan, input)
    }

    /// Runs a named entrypoint plan.
    pub fn run_entrypoint(&self, entrypoint: &str, input: &Value) -> Result<Vec<Value>, ErrorSeq> {
        let Some(plan) = self.bundle.find_plan(entrypoint) else {
            return Err(ErrorSeq::of(PolicyError::new(
                ErrorCode::CompileError,
                format!("plan not found for entrypoint: {entrypoint}"),
                None,
            )));
        };
        self.run_plan_with(plan, input)
    }

    fn run_plan_with(&self, plan: &crate::bundle::Plan, input: &Value) -> Result<Vec<Value>, ErrorSeq> {
        log::debug!("plan {}: input {}", plan.name, input.to_key());
        let mut state = State::new(input.clone(), self.bundle.data.clone(), self.bundle.local_count);
        for block in &plan.blocks {
            if self.run_block(&mut state, block) != Signal::Continue {
                break;
            }
        }
        if state.errors.is_empty() {
            Ok(state.result_set)
        } else {
            Err(state.errors)
        }
    }

    fn error_loc(&self, loc: Option<StmtLoc>) -> Option<ErrorLocation> {
        loc.map(|l| ErrorLocation {
            file: self.bundle.string(l.file).to_owned(),
            row: l.row as usize,
            col: l.col as usize,
        })
    }

    fn unpack_operand(&self, state: &State, operand: Operand) -> Value {
        match operand {
            Operand::Local(slot) => state.read_local(slot),
            Operand::String(id) => Value::string(self.bundle.string(id)),
            Operand::Value(v) => Value::int(v),
            Operand::Bool(b) => Value::Bool(b),
            Operand::Index(i) => Value::int(i64::from(i)),
            Operand::None => Value::Undefined,
        }
    }

    fn run_block(&self, state: &mut State, block: &Block) -> Signal {
        for (index, statement) in block.0.iter().enumerate() {
            let signal = self.run_stmt(state, index, statement);
            match signal {
                Signal::Continue => {}
                Signal::Undefined | Signal::Return | Signal::Error => return signal,
                Signal::Break => {
                    state.break_count -= 1;
                    if state.break_count > 0 {
                        return Signal::Break;
                    }
                    // unwinding stops here; the enclosing construct continues
                    return Signal::Continue;
                }
            }
        }
        Signal::Continue
    }

    #[expect(clippy::too_many_lines, reason = "one arm per statement kind")]
    fn run_stmt(&self, state: &mut State, index: usize, statement: &Statement) -> Signal {
        log::debug!("{index:02}  {}", statement.stmt.name());
        match &statement.stmt {
            Stmt::MakeObject { target } => {
                state.write_local(*target, Value::Object(indexmap::IndexMap::new()));
            }
            Stmt::MakeArray { capacity, target } => {
                state.write_local(*target, Value::Array(Vec::with_capacity(*capacity as usize)));
            }
            Stmt::MakeSet { target } => {
                state.write_local(*target, Value::Set(std::collections::BTreeSet::new()));
            }
            Stmt::MakeNull { target } => {
                state.write_local(*target, Value::Null);
            }
            Stmt::MakeNumberInt { value, target } | Stmt::AssignInt { value, target } => {
                state.write_local(*target, Value::int(*value));
            }
            Stmt::MakeNumberRef { index, target } => {
                let text = self.bundle.string(*index);
                let number = match text.parse::<BigInt>() {
                    Ok(i) => Value::Int(i),
                    Err(_) => match text.parse::<f64>() {
                        Ok(f) => Value::Float(f),
                        Err(_) => {
                            state.errors.push(PolicyError::new(
                                ErrorCode::EvalTypeError,
                                format!("invalid number literal: {text}"),
                                self.error_loc(statement.loc),
                            ));
                            return Signal::Error;
                        }
                    },
                };
                state.write_local(*target, number);
            }
            Stmt::AssignVar { source, target } => {
                let value = self.unpack_operand(state, *source);
                state.write_local(*target, value);
            }
            Stmt::AssignVarOnce { source, target } => {
                let value = self.unpack_operand(state, *source);
                if value.is_undefined() {
                    return Signal::Continue;
                }
                if state.is_defined(*target) {
                    if state.read_local(*target) == value {
                        return Signal::Continue;
                    }
                    let loc = self.error_loc(statement.loc);
                    state.multiple_output_error(loc);
                    return Signal::Error;
                }
                state.write_local(*target, value);
            }
            Stmt::ResetLocal { target } => state.reset_local(*target),
            Stmt::IsDefined { source } => {
                if !state.is_defined(*source) {
                    return Signal::Undefined;
                }
            }
            Stmt::IsUndefined { source } => {
                if state.is_defined(*source) {
                    return Signal::Undefined;
                }
            }
            Stmt::IsObject { source } => {
                if !matches!(self.unpack_operand(state, *source), Value::Object(_)) {
                    return Signal::Undefined;
                }
            }
            Stmt::IsArray { source } => {
                if !matches!(self.unpack_operand(state, *source), Value::Array(_)) {
                    return Signal::Undefined;
                }
            }
            Stmt::IsSet { source } => {
                if !matches!(self.unpack_operand(state, *source), Value::Set(_)) {
                    return Signal::Undefined;
                }
            }
            Stmt::Not { block } => {
                let signal = self.run_block(state, block);
                if signal == Signal::Error {
                    return Signal::Error;
                }
                if signal != Signal::Undefined {
                    return Signal::Undefined;
                }
            }
            Stmt::Block { blocks } => {
                for block in blocks {
                    match self.run_block(state, block) {
                        Signal::Continue | Signal::Undefined => {}
                        signal => return signal,
                    }
                }
            }
            Stmt::Len { source, target } => {
                let value = self.unpack_operand(state, *source);
                let len = match &value {
                    Value::Array(items) => items.len(),
                    Value::Set(items) => items.len(),
                    Value::Object(items) => items.len(),
                    Value::String(s) => s.chars().count(),
                    _ => return Signal::Undefined,
                };
                state.write_local(*target, Value::Int(BigInt::from(len)));
            }
            Stmt::Dot { source, key, target } => {
                let source = self.unpack_operand(state, *source);
                let key = self.unpack_operand(state, *key);
                match dot(&source, &key) {
                    Some(value) => state.write_local(*target, value),
                    None => {
                        log::trace!("dot miss: {} . {}", source.type_name(), key.to_key());
                        return Signal::Undefined;
                    }
                }
            }
            Stmt::ObjectInsert { key, value, target } | Stmt::ObjectInsertOnce { key, value, target } => {
                let once = matches!(statement.stmt, Stmt::ObjectInsertOnce { .. });
                let key = self.unpack_operand(state, *key);
                let value = self.unpack_operand(state, *value);
                if key.is_undefined() || value.is_undefined() {
                    return Signal::Undefined;
                }
                match &mut state.frame[*target as usize] {
                    Some(Value::Object(items)) => {
                        if insert_into_object(items, key, value, once).is_err() {
                            let loc = self.error_loc(statement.loc);
                            state.errors.push(PolicyError::new(
                                ErrorCode::EvalConflictError,
                                "object keys must be unique",
                                loc,
                            ));
                            return Signal::Error;
                        }
                    }
                    Some(_) => {
                        let loc = self.error_loc(statement.loc);
                        state.errors.push(PolicyError::new(
                            ErrorCode::EvalTypeError,
                            "cannot insert into a non-object value",
                            loc,
                        ));
                        return Signal::Error;
                    }
                    None => {}
                }
            }
            Stmt::ObjectMerge { a, b, target } => {
                let lhs = state.read_local(*a);
                let rhs = state.read_local(*b);
                let merged = match (lhs.is_undefined(), rhs.is_undefined()) {
                    (true, true) => return Signal::Undefined,
                    (true, false) => Ok(rhs),
                    (false, true) => Ok(lhs),
                    (false, false) => merge_objects(&lhs, &rhs),
                };
                match merged {
                    Ok(value) => state.write_local(*target, value),
                    Err(mut error) => {
                        error.location = self.error_loc(statement.loc);
                        state.errors.push(error);
                        return Signal::Error;
                    }
                }
            }
            Stmt::ArrayAppend { value, array } => {
                let value = self.unpack_operand(state, *value);
                if value.is_undefined() {
                    return Signal::Undefined;
                }
                if let Some(Value::Array(items)) = &mut state.frame[*array as usize] {
                    items.push(value);
                }
            }
            Stmt::SetAdd { value, set } => {
                let value = self.unpack_operand(state, *value);
                if value.is_undefined() {
                    return Signal::Undefined;
                }
                if let Some(Value::Set(items)) = &mut state.frame[*set as usize] {
                    items.insert(value);
                }
            }
            Stmt::ReturnLocal { .. } => return Signal::Return,
            Stmt::ResultSetAdd { source } => {
                if state.is_defined(*source) {
                    let value = state.read_local(*source);
                    state.result_set.push(value);
                }
            }
            Stmt::Equal { a, b } => {
                let a = self.unpack_operand(state, *a);
                let b = self.unpack_operand(state, *b);
                if a.is_undefined() || b.is_undefined() {
                    return Signal::Undefined;
                }
                if !a.equal_promoting(&b) {
                    return Signal::Undefined;
                }
            }
            Stmt::NotEqual { a, b } => {
                let a = self.unpack_operand(state, *a);
                let b = self.unpack_operand(state, *b);
                if a.is_falsy() && b.is_falsy() {
                    return Signal::Undefined;
                }
                if a.equal_promoting(&b) {
                    return Signal::Undefined;
                }
            }
            Stmt::Call { func, args, target } => {
                let name = self.bundle.string(*func).to_owned();
                return self.run_call(state, &name, args, *target, statement.loc);
            }
            Stmt::CallDynamic { path, args, target } => {
                return self.run_call_dynamic(state, path, args, *target, statement.loc);
            }
            Stmt::Scan { source, key, value, block } => {
                return self.run_scan(state, *source, *key, *value, block);
            }
            Stmt::With {
                target,
                path,
                value,
                block,
            } => {
                return self.run_with(state, *target, path, *value, block);
            }
            Stmt::Break { levels } => {
                state.break_count += levels;
                return Signal::Break;
            }
            Stmt::Nop => {}
        }
        Signal::Continue
    }

    fn run_call(
        &self,
        state: &mut State,
        name: &str,
        args: &[Operand],
        target: LocalId,
        loc: Option<StmtLoc>,
    ) -> Signal {
        if state.in_call_stack(name) {
            state.errors.push(PolicyError::new(
                ErrorCode::RecursionError,
                format!("recursion detected in rule body: {}", display_name(name)),
                self.error_loc(loc),
            ));
            return Signal::Error;
        }

        if let Some(builtin) = self.builtins.get(name) {
            let mut values = Vec::with_capacity(args.len());
            for &arg in args {
                let value = self.unpack_operand(state, arg);
                if value.is_undefined() {
                    return Signal::Undefined;
                }
                values.push(value);
            }
            return match builtin.call(&values) {
                Ok(Value::Undefined) => Signal::Undefined,
                Ok(value) => {
                    state.write_local(target, value);
                    Signal::Continue
                }
                Err(error) => {
                    if error.strict_only && !self.strict_builtin_errors {
                        return Signal::Undefined;
                    }
                    state
                        .errors
                        .push(PolicyError::new(error.code, error.message, self.error_loc(loc)));
                    Signal::Error
                }
            };
        }

        let Some(function) = self.bundle.find_function(name) else {
            state.errors.push(PolicyError::new(
                ErrorCode::EvalTypeError,
                format!("function not found: {name}"),
                self.error_loc(loc),
            ));
            return Signal::Error;
        };

        // arguments beyond input and data
        let mut arg_values = Vec::new();
        for &arg in args.iter().skip(2) {
            let value = self.unpack_operand(state, arg);
            if value.is_undefined() {
                return Signal::Undefined;
            }
            arg_values.push(value);
        }

        let cache_key = (
            function.name.clone(),
            arg_values.iter().map(Value::to_key).collect::<Vec<_>>(),
        );
        if state.with_depth == 0 && function.cacheable {
            if let Some(cached) = state.function_cache.get(&cache_key) {
                log::trace!("cache hit: {name}");
                state.write_local(target, cached.clone());
                return Signal::Continue;
            }
        }

        for (slot, value) in function.parameters.iter().skip(2).zip(arg_values) {
            state.write_local(*slot, value);
        }

        state.call_stack.push((name.to_owned(), function.arity));
        let signal = self.run_function_blocks(state, function);
        state.call_stack.pop();

        match signal {
            Signal::Return => {
                let value = state.read_local(function.result);
                if state.with_depth == 0 && function.cacheable && !value.is_undefined() {
                    state.function_cache.insert(cache_key, value.clone());
                }
                state.write_local(target, value);
                Signal::Continue
            }
            Signal::Error | Signal::Break => signal,
            _ => Signal::Undefined,
        }
    }

    fn run_function_blocks(&self, state: &mut State, function: &Function) -> Signal {
        let mut signal = Signal::Undefined;
        for block in &function.blocks {
            signal = self.run_block(state, block);
            match signal {
                Signal::Return | Signal::Break | Signal::Error => break,
                _ => {}
            }
        }
        signal
    }

    fn run_call_dynamic(
        &self,
        state: &mut State,
        path: &[Operand],
        args: &[Operand],
        target: LocalId,
        loc: Option<StmtLoc>,
    ) -> Signal {
        let mut name = String::from("g0");
        let mut func: Option<String> = None;
        let mut valid_index = 0;
        let mut segments = Vec::with_capacity(path.len());
        for (i, &op) in path.iter().enumerate() {
            let segment = self.unpack_operand(state, op);
            let Value::String(segment) = segment else {
                return Signal::Undefined;
            };
            name.push('.');
            name.push_str(&segment);
            segments.push(segment);
            if self.bundle.is_function(&name) {
                log::trace!("dynamic path: {name}");
                func = Some(name.clone());
                valid_index = i;
            }
        }

        let Some(func) = func else {
            return Signal::Undefined;
        };

        let signal = self.run_call(state, &func, args, target, loc);
        if valid_index == path.len() - 1 || signal != Signal::Continue {
            return signal;
        }

        // apply the remaining path segments to the call result
        let mut value = state.read_local(target);
        for segment in &segments[valid_index + 1..] {
            match dot(&value, &Value::string(segment.clone())) {
                Some(next) => value = next,
                None => return Signal::Undefined,
            }
        }
        state.write_local(target, value);
        Signal::Continue
    }

    fn run_scan(&self, state: &mut State, source: LocalId, key: LocalId, value: LocalId, block: &Block) -> Signal {
        let items: Vec<(Value, Value)> = match state.read_local(source) {
            Value::Object(entries) => entries.into_iter().collect(),
            Value::Array(entries) => entries
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Value::Int(BigInt::from(i)), v))
                .collect(),
            // canonical key order
            Value::Set(entries) => entries.into_iter().map(|v| (v.clone(), v)).collect(),
            other => {
                log::trace!("non-iterable scan domain: {}", other.type_name());
                return Signal::Undefined;
            }
        };

        for (k, v) in items {
            state.write_local(key, k);
            state.write_local(value, v);
            match self.run_block(state, block) {
                // hard exits propagate out of the scan
                signal @ (Signal::Error | Signal::Break | Signal::Return) => return signal,
                _ => {}
            }
        }
        Signal::Continue
    }

    fn run_with(&self, state: &mut State, target: LocalId, path: &[u32], value: Operand, block: &Block) -> Signal {
        state.with_depth += 1;
        let value = self.unpack_operand(state, value);
        let old = state.frame[target as usize].clone();

        if path.is_empty() {
            state.write_local(target, value);
        } else {
            let mut source = match &old {
                Some(v) => v.clone(),
                None => Value::Object(indexmap::IndexMap::new()),
            };
            let segments: Vec<&str> = path.iter().map(|&id| self.bundle.string(id)).collect();
            set_path(&mut source, &segments, value);
            state.write_local(target, source);
        }

        let signal = self.run_block(state, block);

        // restore on every exit path, including errors
        state.frame[target as usize] = old;
        state.with_depth -= 1;
        signal
    }
}

fn display_name(name: &str) -> &str {
    name.strip_prefix("g0.").unwrap_or(name)
}

/// `Dot`: object lookup by key, set membership, array indexing. A miss is
/// undefined, never an error.
fn dot(source: &Value, key: &Value) -> Option<Value> {
    match source {
        Value::Object(items) => items
            .get(key)
            .cloned()
            .or_else(|| items.iter().find(|(k, _)| k.equal_promoting(key)).map(|(_, v)| v.clone())),
        Value::Set(items) => {
            if items.contains(key) {
                Some(key.clone())
            } else {
                items.iter().find(|v| v.equal_promoting(key)).cloned()
            }
        }
        Value::Array(items) => {
            let index = match key {
                Value::Int(i) => i.to_usize()?,
                Value::Float(f) if f.fract() == 0.0 && *f >= 0.0 => {
                    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "integral and non-negative")]
                    let i = *f as usize;
                    i
                }
                _ => return None,
            };
            items.get(index).cloned()
        }
        _ => None,
    }
}

/// Builds the copy-on-write overlay for `With`: walks `path`, creating
/// intermediate objects as needed, and sets the final key to `value`.
fn set_path(target: &mut Value, path: &[&str], value: Value) {
    if !matches!(target, Value::Object(_)) {
        *target = Value::Object(indexmap::IndexMap::new());
    }
    let Value::Object(items) = target else { unreachable!() };
    let key = Value::string(path[0]);
    if path.len() == 1 {
        items.insert(key, value);
        return;
    }
    let entry = items.entry(key).or_insert_with(|| Value::Object(indexmap::IndexMap::new()));
    set_path(entry, &path[1..], value);
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::bundle::Plan;

    /// A bundle with one plan made of the given blocks and an empty data
    /// document.
    fn plan_bundle(strings: Vec<&str>, local_count: u32, blocks: Vec<Block>) -> Bundle {
        let mut builder = crate::bundle::IrBuilder::new();
        for s in strings {
            builder.intern(s);
        }
        while builder.local_count() < local_count {
            builder.alloc_local();
        }
        let index = builder.add_plan(Plan {
            name: "test".into(),
            blocks,
        });
        builder.finish(Value::Object(IndexMap::new()), IndexMap::new(), Some(index))
    }

    fn stmts(items: Vec<Stmt>) -> Block {
        Block(items.into_iter().map(Statement::new).collect())
    }

    fn run(bundle: &Bundle) -> Result<Vec<Value>, ErrorSeq> {
        let builtins = Registry::with_defaults();
        VirtualMachine::new(bundle, &builtins).run_query(&Value::Undefined)
    }

    #[test]
    fn assign_var_once_conflicts() {
        let bundle = plan_bundle(
            vec![],
            3,
            vec![stmts(vec![
                Stmt::AssignVarOnce {
                    source: Operand::Value(1),
                    target: 2,
                },
                Stmt::AssignVarOnce {
                    source: Operand::Value(2),
                    target: 2,
                },
            ])],
        );
        let errors = run(&bundle).unwrap_err();
        assert_eq!(errors.errors[0].code, ErrorCode::EvalConflictError);
        assert!(errors.errors[0].message.contains("complete rules"));
    }

    #[test]
    fn assign_var_once_accepts_equal_rebind() {
        let bundle = plan_bundle(
            vec![],
            3,
            vec![stmts(vec![
                Stmt::AssignVarOnce {
                    source: Operand::Value(7),
                    target: 2,
                },
                Stmt::AssignVarOnce {
                    source: Operand::Value(7),
                    target: 2,
                },
                Stmt::ResultSetAdd { source: 2 },
            ])],
        );
        assert_eq!(run(&bundle).unwrap(), vec![Value::int(7)]);
    }

    #[test]
    fn undefined_prunes_without_result() {
        // reading an unset local through Dot fails the block quietly
        let bundle = plan_bundle(
            vec!["missing"],
            4,
            vec![stmts(vec![
                Stmt::Dot {
                    source: Operand::Local(2),
                    key: Operand::String(0),
                    target: 3,
                },
                Stmt::ResultSetAdd { source: 3 },
            ])],
        );
        assert_eq!(run(&bundle).unwrap(), Vec::<Value>::new());
    }

    #[test]
    fn scan_iterates_sets_in_canonical_order() {
        // build {10, 9, "a"}, scan into an array
        let mut make = Block::new();
        make.push(Statement::new(Stmt::MakeSet { target: 2 }));
        for op in [Operand::Value(10), Operand::Value(9)] {
            make.push(Statement::new(Stmt::SetAdd { value: op, set: 2 }));
        }
        make.push(Statement::new(Stmt::SetAdd {
            value: Operand::String(0),
            set: 2,
        }));
        make.push(Statement::new(Stmt::MakeArray { capacity: 3, target: 3 }));
        make.push(Statement::new(Stmt::Scan {
            source: 2,
            key: 4,
            value: 5,
            block: stmts(vec![Stmt::ArrayAppend {
                value: Operand::Local(5),
                array: 3,
            }]),
        }));
        make.push(Statement::new(Stmt::ResultSetAdd { source: 3 }));

        let bundle = plan_bundle(vec!["a"], 6, vec![make]);
        let results = run(&bundle).unwrap();
        assert_eq!(
            results,
            vec![Value::Array(vec![Value::int(9), Value::int(10), Value::string("a")])]
        );
    }

    #[test]
    fn with_overlay_restores_on_exit() {
        // override input.x for the nested block, then observe the original
        let mut block = Block::new();
        block.push(Statement::new(Stmt::With {
            target: 0,
            path: vec![0],
            value: Operand::Value(41),
            block: stmts(vec![
                Stmt::Dot {
                    source: Operand::Local(0),
                    key: Operand::String(0),
                    target: 2,
                },
                Stmt::ResultSetAdd { source: 2 },
            ]),
        }));
        // after the with, input is back to undefined: the dot fails
        block.push(Statement::new(Stmt::Dot {
            source: Operand::Local(0),
            key: Operand::String(0),
            target: 3,
        }));
        block.push(Statement::new(Stmt::ResultSetAdd { source: 3 }));

        let bundle = plan_bundle(vec!["x"], 4, vec![block]);
        assert_eq!(run(&bundle).unwrap(), vec![Value::int(41)]);
    }

    #[test]
    fn not_inverts_undefined() {
        let bundle = plan_bundle(
            vec![],
            3,
            vec![stmts(vec![
                Stmt::Not {
                    block: stmts(vec![Stmt::IsDefined { source: 2 }]),
                },
                Stmt::AssignVar {
                    source: Operand::Bool(true),
                    target: 2,
                },
                Stmt::ResultSetAdd { source: 2 },
            ])],
        );
        assert_eq!(run(&bundle).unwrap(), vec![Value::Bool(true)]);
    }

    #[test]
    fn break_unwinds_nested_blocks() {
        // Break(2) unwinds out of both nested blocks; the statement after
        // the outer Block still runs.
        let inner = stmts(vec![
            Stmt::Break { levels: 2 },
            Stmt::AssignVar {
                source: Operand::Value(1),
                target: 2,
            },
        ]);
        let outer = Stmt::Block {
            blocks: vec![Block(vec![Statement::new(Stmt::Block { blocks: vec![inner] })])],
        };
        let bundle = plan_bundle(
            vec![],
            3,
            vec![stmts(vec![
                outer,
                Stmt::AssignVarOnce {
                    source: Operand::Value(9),
                    target: 2,
                },
                Stmt::ResultSetAdd { source: 2 },
            ])],
        );
        assert_eq!(run(&bundle).unwrap(), vec![Value::int(9)]);
    }
}
