//! Result projection.
//!
//! The VM accumulates raw result frames; this module shapes them into the
//! typed query-result structures and the public JSON form
//! `{"result": [{"expressions": [...], "bindings": {...}}, ...]}`.

use indexmap::IndexMap;

use crate::errors::RegoError;
use crate::value::Value;

/// One result frame: the values of the query expressions plus the
/// variable bindings that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub expressions: Vec<Value>,
    pub bindings: IndexMap<String, Value>,
}

/// All result frames of one evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResults {
    pub results: Vec<QueryResult>,
}

impl QueryResults {
    /// Projects ad-hoc query frames: each frame is an object with
    /// `"expressions"` and `"bindings"` entries. Frames whose expression
    /// list is empty are dropped.
    pub fn from_query_frames(frames: Vec<Value>) -> Result<Self, RegoError> {
        let mut results = Vec::with_capacity(frames.len());
        for frame in frames {
            let Value::Object(entries) = frame else {
                return Err(RegoError::Bundle("invalid result frame".into()));
            };
            let expressions = match entries.get(&Value::string("expressions")) {
                Some(Value::Array(items)) => items.clone(),
                _ => return Err(RegoError::Bundle("result frame without expressions".into())),
            };
            if expressions.is_empty() {
                continue;
            }
            let mut bindings = IndexMap::new();
            if let Some(Value::Object(items)) = entries.get(&Value::string("bindings")) {
                for (key, value) in items {
                    let Value::String(name) = key else {
                        return Err(RegoError::Bundle("non-string binding name".into()));
                    };
                    bindings.insert(name.clone(), value.clone());
                }
            }
            results.push(QueryResult { expressions, bindings });
        }
        Ok(Self { results })
    }

    /// Projects entrypoint frames: each frame is an object whose
    /// `"result"` entry becomes the single expression.
    pub fn from_entrypoint_frames(frames: Vec<Value>) -> Result<Self, RegoError> {
        let mut results = Vec::with_capacity(frames.len());
        for frame in frames {
            let Value::Object(entries) = frame else {
                return Err(RegoError::Bundle("invalid result frame".into()));
            };
            let Some(value) = entries.get(&Value::string("result")) else {
                return Err(RegoError::Bundle("result frame without result".into()));
            };
            results.push(QueryResult {
                expressions: vec![value.clone()],
                bindings: IndexMap::new(),
            });
        }
        Ok(Self { results })
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// The first expression of the first result, the common single-value
    /// case.
    pub fn first_expression(&self) -> Option<&Value> {
        self.results.first().and_then(|r| r.expressions.first())
    }

    /// The binding of `name` in the first result.
    pub fn binding(&self, name: &str) -> Option<&Value> {
        self.results.first().and_then(|r| r.bindings.get(name))
    }

    /// The `{"result": [...]}` output shape.
    pub fn to_json(&self) -> serde_json::Value {
        let results: Vec<serde_json::Value> = self
            .results
            .iter()
            .map(|r| {
                let expressions: Vec<serde_json::Value> = r.expressions.iter().map(Value::to_json).collect();
                let mut obj = serde_json::Map::new();
                obj.insert("expressions".into(), serde_json::Value::Array(expressions));
                if !r.bindings.is_empty() {
                    let mut bindings = serde_json::Map::new();
                    for (name, value) in &r.bindings {
                        bindings.insert(name.clone(), value.to_json());
                    }
                    obj.insert("bindings".into(), serde_json::Value::Object(bindings));
                }
                serde_json::Value::Object(obj)
            })
            .collect();
        serde_json::json!({ "result": results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(expressions: Vec<Value>, bindings: Vec<(&str, Value)>) -> Value {
        let mut entries = IndexMap::new();
        entries.insert(Value::string("expressions"), Value::Array(expressions));
        let mut b = IndexMap::new();
        for (name, value) in bindings {
            b.insert(Value::string(name), value);
        }
        entries.insert(Value::string("bindings"), Value::Object(b));
        Value::Object(entries)
    }

    #[test]
    fn query_frames_project() {
        let results = QueryResults::from_query_frames(vec![frame(
            vec![Value::Bool(true)],
            vec![("x", Value::int(1))],
        )])
        .unwrap();
        assert_eq!(results.first_expression(), Some(&Value::Bool(true)));
        assert_eq!(results.binding("x"), Some(&Value::int(1)));
        let json = results.to_json();
        assert_eq!(json["result"][0]["expressions"][0], serde_json::json!(true));
        assert_eq!(json["result"][0]["bindings"]["x"], serde_json::json!(1));
    }

    #[test]
    fn empty_expression_frames_are_dropped() {
        let results = QueryResults::from_query_frames(vec![frame(vec![], vec![])]).unwrap();
        assert!(results.is_empty());
        assert_eq!(results.to_json(), serde_json::json!({ "result": [] }));
    }
}
