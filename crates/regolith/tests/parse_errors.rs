//! Parse- and compile-time error reporting.

use regolith::{ErrorCode, Interpreter, RegoError};

fn compile_errors(modules: &[(&str, &str)], query: &str) -> regolith::ErrorSeq {
    let mut interpreter = Interpreter::new();
    for (name, contents) in modules {
        interpreter.add_module(name, contents);
    }
    match interpreter.raw_query(query) {
        Err(RegoError::Compile(errors)) => errors,
        other => panic!("expected a compile error, got {other:?}"),
    }
}

#[test]
fn syntax_errors_carry_location() {
    let errors = compile_errors(&[("bad.rego", "package p\nx := := 1\n")], "data.p.x");
    assert_eq!(errors.errors[0].code, ErrorCode::ParseError);
    let location = errors.errors[0].location.as_ref().unwrap();
    assert_eq!(location.file, "bad.rego");
    assert_eq!(location.row, 2);
}

#[test]
fn unterminated_strings_are_rejected() {
    let errors = compile_errors(&[("bad.rego", "package p\nx := \"oops")], "data.p.x");
    assert_eq!(errors.errors[0].code, ErrorCode::ParseError);
    assert!(errors.errors[0].message.contains("unterminated"));
}

#[test]
fn unknown_functions_are_compile_errors() {
    let errors = compile_errors(&[("p.rego", "package p\nx := no_such_fn(1)\n")], "data.p.x");
    assert_eq!(errors.errors[0].code, ErrorCode::CompileError);
    assert!(errors.errors[0].message.contains("unknown function"));
}

#[test]
fn function_arity_is_checked() {
    let module = "package p\n\nf(x) := x\ny := f(1, 2)\n";
    let errors = compile_errors(&[("p.rego", module)], "data.p.y");
    assert_eq!(errors.errors[0].code, ErrorCode::TypeError);
    assert!(errors.errors[0].message.contains("expects 1 arguments"));
}

#[test]
fn unresolved_identifiers_are_reported() {
    let errors = compile_errors(&[("p.rego", "package p\nx := y_undefined + 1\n")], "data.p.x");
    assert_eq!(errors.errors[0].code, ErrorCode::CompileError);
}

#[test]
fn static_recursion_is_a_recursion_error() {
    let module = "package r\n\na := b\nb := a\n";
    let errors = compile_errors(&[("r.rego", module)], "data.r.a");
    assert_eq!(errors.errors[0].code, ErrorCode::RecursionError);
    assert!(errors.errors[0].message.contains("recursive"));
}

#[test]
fn conflicting_rule_kinds_are_rejected() {
    let module = "package k\n\nr := 1\nr contains 2 { true }\n";
    let errors = compile_errors(&[("k.rego", module)], "data.k.r");
    assert_eq!(errors.errors[0].code, ErrorCode::CompileError);
    assert!(errors.errors[0].message.contains("conflicting"));
}

#[test]
fn every_is_outside_the_accepted_subset() {
    let module = "package e\n\nq { every x in [1] { x > 0 } }\n";
    let errors = compile_errors(&[("e.rego", module)], "data.e.q");
    assert_eq!(errors.errors[0].code, ErrorCode::CompileError);
    assert!(errors.errors[0].message.contains("every"));
}

#[test]
fn default_values_must_be_constant() {
    let module = "package d\n\ndefault x := input.y\n";
    let errors = compile_errors(&[("d.rego", module)], "data.d.x");
    assert_eq!(errors.errors[0].code, ErrorCode::CompileError);
    assert!(errors.errors[0].message.contains("constant"));
}

#[test]
fn duplicate_object_keys_are_rejected_at_compile_time() {
    let module = "package o\n\nx := {\"k\": 1, \"k\": 2}\n";
    let errors = compile_errors(&[("o.rego", module)], "data.o.x");
    assert_eq!(errors.errors[0].code, ErrorCode::CompileError);
    assert!(errors.errors[0].message.contains("unique"));
}

#[test]
fn invalid_data_documents_are_rejected() {
    let mut interpreter = Interpreter::new();
    let error = interpreter.add_data_json("[1, 2, 3]").unwrap_err();
    assert!(matches!(error, RegoError::Compile(_)));
}
