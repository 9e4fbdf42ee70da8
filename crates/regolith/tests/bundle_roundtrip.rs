//! Bundle persistence tests: directory and binary round trips preserve
//! query answers, and building is deterministic.

use pretty_assertions::assert_eq;
use regolith::{Bundle, Interpreter, Value};

const MODULE: &str = r#"package policy

default allow := false
allow { input.role == "admin" }
threshold := 10
above { input.score > threshold }
"#;

fn interpreter() -> Interpreter {
    let mut interpreter = Interpreter::new();
    interpreter.add_module("policy.rego", MODULE);
    interpreter.add_data_json(r#"{"config": {"region": "eu"}}"#).unwrap();
    interpreter.set_query("data.policy.allow");
    interpreter
}

fn temp_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("regolith-test-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[test]
fn directory_round_trip_preserves_answers() {
    let dir = temp_dir("dir");
    let interpreter = interpreter();
    let built = interpreter.save_bundle(&dir).expect("save should succeed");
    let loaded = Interpreter::load_bundle(&dir).expect("load should succeed");

    let mut evaluator = Interpreter::new();
    evaluator.set_input_json(r#"{"role": "admin"}"#).unwrap();
    let from_built = evaluator.query_bundle(&built).unwrap();
    let from_loaded = evaluator.query_bundle(&loaded).unwrap();
    assert_eq!(from_built, from_loaded);
    assert_eq!(from_loaded.first_expression(), Some(&Value::Bool(true)));

    // a different input against the same loaded bundle, no re-parse
    evaluator.set_input_json(r#"{"role": "guest"}"#).unwrap();
    let denied = evaluator.query_bundle(&loaded).unwrap();
    assert_eq!(denied.first_expression(), Some(&Value::Bool(false)));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn directory_form_keeps_module_sources() {
    let dir = temp_dir("sources");
    interpreter().save_bundle(&dir).expect("save should succeed");
    let source = std::fs::read_to_string(dir.join("policy.rego")).unwrap();
    assert_eq!(source, MODULE);
    assert!(dir.join("plan.json").exists());
    assert!(dir.join("data.json").exists());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn binary_round_trip_is_identity() {
    let bundle = interpreter().build().unwrap();
    let bytes = bundle.to_bytes().unwrap();
    let loaded = Bundle::from_bytes(&bytes).unwrap();
    // load-then-save reproduces the same bytes
    assert_eq!(loaded.to_bytes().unwrap(), bytes);

    let mut evaluator = Interpreter::new();
    evaluator.set_input_json(r#"{"role": "admin"}"#).unwrap();
    let results = evaluator.query_bundle(&loaded).unwrap();
    assert_eq!(results.first_expression(), Some(&Value::Bool(true)));
}

#[test]
fn building_twice_is_deterministic() {
    let a = interpreter().build().unwrap();
    let b = interpreter().build().unwrap();
    assert_eq!(a.plan_json().unwrap(), b.plan_json().unwrap());
    assert_eq!(a.data_json().unwrap(), b.data_json().unwrap());
}

#[test]
fn entrypoints_survive_round_trips() {
    let mut interpreter = Interpreter::new();
    interpreter.add_module("policy.rego", MODULE);
    interpreter.add_entrypoint("policy/allow");
    let bundle = interpreter.build().unwrap();

    let bytes = bundle.to_bytes().unwrap();
    let loaded = Bundle::from_bytes(&bytes).unwrap();

    let mut evaluator = Interpreter::new();
    evaluator.set_input_json(r#"{"role": "admin"}"#).unwrap();
    let results = evaluator.query_bundle_entrypoint(&loaded, "policy/allow").unwrap();
    assert_eq!(results.first_expression(), Some(&Value::Bool(true)));
}

#[test]
fn bundle_data_survives_round_trips() {
    let bundle = interpreter().build().unwrap();
    let bytes = bundle.to_bytes().unwrap();
    let loaded = Bundle::from_bytes(&bytes).unwrap();

    let mut evaluator = Interpreter::new();
    let results = evaluator.query_bundle(&loaded);
    // the saved query plan still runs; data is intact
    assert!(results.is_ok());
    assert_eq!(loaded.data, bundle.data);
}
