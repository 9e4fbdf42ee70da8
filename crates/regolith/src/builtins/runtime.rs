//! Runtime introspection.
//!
//! `opa.runtime()` exposes the engine version and `os.environ` to
//! policies. Nothing here affects evaluation semantics.

use indexmap::IndexMap;

use super::{Arity, Registry};
use crate::value::Value;

pub(super) fn register(registry: &mut Registry) {
    registry.register("opa.runtime", Arity::Exact(0), |_| {
        let mut env = IndexMap::new();
        let mut vars: Vec<(String, String)> = std::env::vars().collect();
        vars.sort();
        for (key, value) in vars {
            env.insert(Value::String(key), Value::String(value));
        }
        let mut object = IndexMap::new();
        object.insert(Value::string("env"), Value::Object(env));
        object.insert(Value::string("version"), Value::string(env!("CARGO_PKG_VERSION")));
        Ok(Value::Object(object))
    });
}
