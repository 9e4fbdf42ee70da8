//! End-to-end query evaluation tests.
//!
//! Each scenario compiles one or more modules, evaluates a query against
//! an input, and checks the projected expressions and bindings.

use pretty_assertions::assert_eq;
use regolith::{ErrorCode, Interpreter, RegoError, Value};

fn eval(modules: &[(&str, &str)], input_json: Option<&str>, query: &str) -> regolith::QueryResults {
    let mut interpreter = Interpreter::new();
    for (name, contents) in modules {
        interpreter.add_module(name, contents);
    }
    if let Some(json) = input_json {
        interpreter.set_input_json(json).unwrap();
    }
    interpreter.raw_query(query).unwrap()
}

fn eval_err(modules: &[(&str, &str)], input_json: Option<&str>, query: &str) -> regolith::ErrorSeq {
    let mut interpreter = Interpreter::new();
    for (name, contents) in modules {
        interpreter.add_module(name, contents);
    }
    if let Some(json) = input_json {
        interpreter.set_input_json(json).unwrap();
    }
    match interpreter.raw_query(query) {
        Err(RegoError::Eval(errors)) => errors,
        other => panic!("expected an evaluation error, got {other:?}"),
    }
}

fn int(v: i64) -> Value {
    Value::int(v)
}

fn string(v: &str) -> Value {
    Value::string(v)
}

fn array(items: Vec<Value>) -> Value {
    Value::Array(items)
}

fn set(items: Vec<Value>) -> Value {
    Value::Set(items.into_iter().collect())
}

fn object(items: Vec<(&str, Value)>) -> Value {
    Value::Object(items.into_iter().map(|(k, v)| (string(k), v)).collect())
}

// =============================================================================
// 1. Object navigation
// =============================================================================

const OBJECTS: &str = r#"package objects

index := 1
names := ["prod", "smoke1", "dev"]
sites := [{"name": "prod"}, {"name": names[index]}, {"name": "dev"}]
"#;

#[test]
fn object_navigation_binds_query_variable() {
    let results = eval(
        &[("objects.rego", OBJECTS)],
        Some(r#"{"b": "20"}"#),
        "[data.objects.sites[1], input.b] = x",
    );
    assert_eq!(
        results.binding("x"),
        Some(&array(vec![object(vec![("name", string("smoke1"))]), string("20")]))
    );
}

#[test]
fn array_index_out_of_bounds_is_undefined() {
    let results = eval(&[("objects.rego", OBJECTS)], None, "data.objects.sites[9]");
    assert!(results.is_empty());
}

#[test]
fn package_reference_materializes_the_document() {
    let results = eval(&[("objects.rego", OBJECTS)], None, "x := data.objects");
    let Some(Value::Object(entries)) = results.binding("x") else {
        panic!("expected the package document");
    };
    assert_eq!(entries.get(&string("index")), Some(&int(1)));
    assert!(entries.contains_key(&string("names")));
    assert!(entries.contains_key(&string("sites")));
}

#[test]
fn rule_references_evaluate_directly() {
    let results = eval(&[("objects.rego", OBJECTS)], None, "data.objects.index");
    assert_eq!(results.first_expression(), Some(&int(1)));
}

// =============================================================================
// 2. Comprehensions and membership
// =============================================================================

const COMPREHENSION: &str = r"package p

xs := [1, 2, 3, 4]
evens := [x | x := xs[_]; x % 2 == 0]
has_two := 2 in evens
";

#[test]
fn comprehension_filters_elements() {
    let results = eval(&[("p.rego", COMPREHENSION)], None, "data.p.evens");
    assert_eq!(results.first_expression(), Some(&array(vec![int(2), int(4)])));
}

#[test]
fn membership_over_comprehension_result() {
    let results = eval(&[("p.rego", COMPREHENSION)], None, "data.p.has_two");
    assert_eq!(results.first_expression(), Some(&Value::Bool(true)));
}

#[test]
fn set_comprehension_deduplicates() {
    let module = r"package s

parities := {x % 2 | x := [1, 2, 3, 4, 5][_]}
";
    let results = eval(&[("s.rego", module)], None, "data.s.parities");
    assert_eq!(results.first_expression(), Some(&set(vec![int(0), int(1)])));
}

#[test]
fn object_comprehension_builds_entries() {
    let module = r#"package oc

squares := {x: x * x | some x in [1, 2, 3]}
"#;
    let results = eval(&[("oc.rego", module)], None, "data.oc.squares");
    let Some(Value::Object(entries)) = results.first_expression() else {
        panic!("expected an object");
    };
    assert_eq!(entries.get(&int(2)), Some(&int(4)));
    assert_eq!(entries.len(), 3);
}

// =============================================================================
// 3. Conflicts
// =============================================================================

#[test]
fn complete_rule_conflict_is_an_error() {
    let module = "package c\n\nr := 1\nr := 2\n";
    let errors = eval_err(&[("c.rego", module)], None, "data.c.r");
    assert_eq!(errors.errors[0].code, ErrorCode::EvalConflictError);
    assert!(errors.errors[0]
        .message
        .contains("complete rules must not produce multiple outputs"));
}

#[test]
fn agreeing_definitions_do_not_conflict() {
    let module = "package c\n\nr := 1\nr := 1\n";
    let results = eval(&[("c.rego", module)], None, "data.c.r");
    assert_eq!(results.first_expression(), Some(&int(1)));
}

// =============================================================================
// 4. Negation as failure
// =============================================================================

const NEGATION: &str = r#"package n

allow { not denied }
denied { input.user == "mallory" }
"#;

#[test]
fn negation_succeeds_when_target_is_undefined() {
    let results = eval(&[("n.rego", NEGATION)], Some(r#"{"user": "alice"}"#), "data.n.allow");
    assert_eq!(results.first_expression(), Some(&Value::Bool(true)));
}

#[test]
fn negation_fails_when_target_holds() {
    let results = eval(&[("n.rego", NEGATION)], Some(r#"{"user": "mallory"}"#), "data.n.allow");
    assert!(results.is_empty());
    assert_eq!(results.to_json(), serde_json::json!({ "result": [] }));
}

// =============================================================================
// 5. `with` overrides
// =============================================================================

const WITH: &str = "package w\n\nf := input.x + 1\n";

#[test]
fn with_overrides_input_for_the_literal() {
    let results = eval(&[("w.rego", WITH)], None, r#"data.w.f with input as {"x": 41}"#);
    assert_eq!(results.first_expression(), Some(&int(42)));
}

#[test]
fn without_the_override_the_rule_is_undefined() {
    let results = eval(&[("w.rego", WITH)], None, "data.w.f");
    assert!(results.is_empty());
}

#[test]
fn with_does_not_poison_the_function_cache() {
    let module = "package cacheable\n\nv := input.x\n";
    let results = eval(
        &[("cacheable.rego", module)],
        Some(r#"{"x": 1}"#),
        r#"a := data.cacheable.v; b := data.cacheable.v with input as {"x": 2}; c := data.cacheable.v"#,
    );
    assert_eq!(results.binding("a"), Some(&int(1)));
    assert_eq!(results.binding("b"), Some(&int(2)));
    assert_eq!(results.binding("c"), Some(&int(1)));
}

#[test]
fn with_overrides_nested_input_paths() {
    let module = "package deep\n\nv := input.a.b\n";
    let results = eval(&[("deep.rego", module)], Some(r#"{"a": {"b": 1, "keep": 2}}"#), r#"data.deep.v with input.a.b as 9"#);
    assert_eq!(results.first_expression(), Some(&int(9)));
}

// =============================================================================
// 6. Set algebra
// =============================================================================

#[test]
fn set_algebra_binds_all_three() {
    let results = eval(
        &[],
        None,
        "{1,2,3} - {2} = s; {1,2} | {2,3} = u; {1,2} & {2,3} = i",
    );
    assert_eq!(results.binding("s"), Some(&set(vec![int(1), int(3)])));
    assert_eq!(results.binding("u"), Some(&set(vec![int(1), int(2), int(3)])));
    assert_eq!(results.binding("i"), Some(&set(vec![int(2)])));
}

#[test]
fn set_minus_number_is_a_type_error() {
    let errors = eval_err(&[], None, "x := {1, 2} - 1");
    assert_eq!(errors.errors[0].code, ErrorCode::EvalTypeError);
}

// =============================================================================
// Functions, defaults and else chains
// =============================================================================

#[test]
fn function_rules_apply_arguments() {
    let module = "package f\n\ndouble(x) := x * 2\ncompose(a, b) := double(a) + b\n";
    let results = eval(&[("f.rego", module)], None, "data.f.compose(3, 1)");
    assert_eq!(results.first_expression(), Some(&int(7)));
}

#[test]
fn default_applies_when_no_body_fires() {
    let module = r#"package d

default verdict := "none"
verdict := "high" { input.score > 10 }
"#;
    let low = eval(&[("d.rego", module)], Some(r#"{"score": 1}"#), "data.d.verdict");
    assert_eq!(low.first_expression(), Some(&string("none")));
    let high = eval(&[("d.rego", module)], Some(r#"{"score": 11}"#), "data.d.verdict");
    assert_eq!(high.first_expression(), Some(&string("high")));
}

#[test]
fn else_chain_takes_the_first_matching_branch() {
    let module = r#"package e

tier := "gold" { input.points > 100 } else := "silver" { input.points > 10 } else := "bronze"
"#;
    let cases = [(200, "gold"), (50, "silver"), (1, "bronze")];
    for (points, expected) in cases {
        let results = eval(
            &[("e.rego", module)],
            Some(&format!(r#"{{"points": {points}}}"#)),
            "data.e.tier",
        );
        assert_eq!(results.first_expression(), Some(&string(expected)), "points={points}");
    }
}

#[test]
fn partial_set_rules_accumulate() {
    let module = r#"package ps

deny contains "a" { input.a }
deny contains "b" { input.b }
"#;
    let results = eval(&[("ps.rego", module)], Some(r#"{"a": true, "b": true}"#), "data.ps.deny");
    assert_eq!(results.first_expression(), Some(&set(vec![string("a"), string("b")])));

    let one = eval(&[("ps.rego", module)], Some(r#"{"a": true}"#), "data.ps.deny");
    assert_eq!(one.first_expression(), Some(&set(vec![string("a")])));
}

#[test]
fn partial_object_rules_insert_entries() {
    let module = r#"package po

labels[k] := v { some k, v in input.pairs }
"#;
    let results = eval(
        &[("po.rego", module)],
        Some(r#"{"pairs": {"x": 1, "y": 2}}"#),
        "data.po.labels",
    );
    assert_eq!(
        results.first_expression(),
        Some(&object(vec![("x", int(1)), ("y", int(2))]))
    );
}

#[test]
fn partial_object_key_conflict_is_an_error() {
    let module = r#"package poc

labels["k"] := 1 { true }
labels["k"] := 2 { true }
"#;
    let errors = eval_err(&[("poc.rego", module)], None, "data.poc.labels");
    assert_eq!(errors.errors[0].code, ErrorCode::EvalConflictError);
    assert!(errors.errors[0].message.contains("object keys must be unique"));
}

// =============================================================================
// Iteration order and enumeration
// =============================================================================

#[test]
fn query_enumeration_yields_one_result_per_element() {
    let module = "package it\n\nxs := [10, 20]\n";
    let results = eval(&[("it.rego", module)], None, "x := data.it.xs[_]");
    let values: Vec<&Value> = results.results.iter().filter_map(|r| r.bindings.get("x")).collect();
    assert_eq!(values, vec![&int(10), &int(20)]);
}

#[test]
fn sets_scan_in_canonical_order() {
    let module = "package so\n\nordered := [x | some x in {3, 1, 2}]\n";
    let results = eval(&[("so.rego", module)], None, "data.so.ordered");
    assert_eq!(
        results.first_expression(),
        Some(&array(vec![int(1), int(2), int(3)]))
    );
}

#[test]
fn objects_scan_in_insertion_order() {
    let module = "package oo\n\nkeys := [k | some k, _ in input.obj]\n";
    let results = eval(
        &[("oo.rego", module)],
        Some(r#"{"obj": {"b": 1, "a": 2}}"#),
        "data.oo.keys",
    );
    assert_eq!(results.first_expression(), Some(&array(vec![string("b"), string("a")])));
}

#[test]
fn some_key_value_iterates_arrays_with_indexes() {
    let module = "package kv\n\npairs := [[i, v] | some i, v in [\"a\", \"b\"]]\n";
    let results = eval(&[("kv.rego", module)], None, "data.kv.pairs");
    assert_eq!(
        results.first_expression(),
        Some(&array(vec![
            array(vec![int(0), string("a")]),
            array(vec![int(1), string("b")]),
        ]))
    );
}

// =============================================================================
// Data documents
// =============================================================================

#[test]
fn base_and_virtual_documents_merge() {
    let module = "package mix\n\nvirtual := 1\n";
    let mut interpreter = Interpreter::new();
    interpreter.add_module("mix.rego", module);
    interpreter.add_data_json(r#"{"mix": {"base": 2}, "other": 3}"#).unwrap();
    let results = interpreter.raw_query("[data.mix.virtual, data.mix.base, data.other] = x").unwrap();
    assert_eq!(results.binding("x"), Some(&array(vec![int(1), int(2), int(3)])));
}

#[test]
fn undefined_base_lookup_prunes_quietly() {
    let mut interpreter = Interpreter::new();
    interpreter.add_data_json(r#"{"known": 1}"#).unwrap();
    let results = interpreter.raw_query("data.unknown.path").unwrap();
    assert!(results.is_empty());
}

#[test]
fn input_term_form_accepts_sets() {
    let module = "package t\n\nhas_a { \"a\" in input }\n";
    let mut interpreter = Interpreter::new();
    interpreter.add_module("t.rego", module);
    interpreter.set_input_term(r#"{"a", "b"}"#).unwrap();
    let results = interpreter.raw_query("data.t.has_a").unwrap();
    assert_eq!(results.first_expression(), Some(&Value::Bool(true)));
}

// =============================================================================
// Determinism and idempotency
// =============================================================================

#[test]
fn repeated_evaluation_is_idempotent() {
    let mut interpreter = Interpreter::new();
    interpreter.add_module("p.rego", COMPREHENSION);
    let first = interpreter.raw_query("data.p.evens").unwrap();
    let second = interpreter.raw_query("data.p.evens").unwrap();
    assert_eq!(first, second);
}

#[test]
fn arithmetic_follows_rego_numerics() {
    let results = eval(&[], None, "a := 7 / 2; b := 4 / 2; c := 7 % 3; d := -3 + 1");
    assert_eq!(results.binding("a"), Some(&Value::Float(3.5)));
    assert_eq!(results.binding("b"), Some(&int(2)));
    assert_eq!(results.binding("c"), Some(&int(1)));
    assert_eq!(results.binding("d"), Some(&int(-2)));
}

#[test]
fn divide_by_zero_is_reported() {
    let errors = eval_err(&[], None, "x := 1 / 0");
    assert_eq!(errors.errors[0].code, ErrorCode::EvalTypeError);
    assert!(errors.errors[0].message.contains("divide by zero"));
}

#[test]
fn builtin_aggregates_work_end_to_end() {
    let results = eval(&[], None, r#"c := count([1, 2, 3]); s := sum([1, 2, 3]); m := max([3, 1, 2])"#);
    assert_eq!(results.binding("c"), Some(&int(3)));
    assert_eq!(results.binding("s"), Some(&int(6)));
    assert_eq!(results.binding("m"), Some(&int(3)));
}

// =============================================================================
// Array destructuring
// =============================================================================

#[test]
fn array_patterns_destructure() {
    let module = "package ap\n\npair := [1, \"two\"]\n";
    let results = eval(&[("ap.rego", module)], None, "[a, b] = data.ap.pair");
    assert_eq!(results.binding("a"), Some(&int(1)));
    assert_eq!(results.binding("b"), Some(&string("two")));
}
