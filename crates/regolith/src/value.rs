//! The value algebra.
//!
//! [`Value`] is the single runtime representation shared by the compiler
//! (constant folding, merged base documents) and the VM (frame locals,
//! results). Values are plain trees: arrays keep insertion order, objects
//! keep insertion order (`IndexMap`), and sets iterate in canonical key
//! order (`BTreeSet` with the canonical `Ord`).
//!
//! Equality is structural and distinguishes `1` from `1.0`; the `Equal`
//! statement applies mixed-numeric promotion separately via
//! [`Value::equal_promoting`].

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorCode, PolicyError};

/// A Rego value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// The quiet-failure signal; prunes the current branch, never an error.
    Undefined,
    Null,
    Bool(bool),
    /// Arbitrary-precision integer.
    Int(BigInt),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    /// Members iterate in canonical key order.
    Set(BTreeSet<Value>),
    /// Entries iterate in insertion order.
    Object(IndexMap<Value, Value>),
}

/// Coarse value classification, used by `unwrap` and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Array,
    Set,
    Object,
}

impl Value {
    pub fn int(v: i64) -> Self {
        Self::Int(BigInt::from(v))
    }

    pub fn string(v: impl Into<String>) -> Self {
        Self::String(v.into())
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Undefined => ValueType::Undefined,
            Self::Null => ValueType::Null,
            Self::Bool(_) => ValueType::Boolean,
            Self::Int(_) | Self::Float(_) => ValueType::Number,
            Self::String(_) => ValueType::String,
            Self::Array(_) => ValueType::Array,
            Self::Set(_) => ValueType::Set,
            Self::Object(_) => ValueType::Object,
        }
    }

    /// Returns `self` when its type is one of `types`.
    pub fn unwrap(&self, types: &[ValueType]) -> Option<&Self> {
        types.contains(&self.value_type()).then_some(self)
    }

    /// The human-readable type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        self.type_name_opt(false)
    }

    /// Like [`Value::type_name`], optionally distinguishing integer from
    /// floating-point numbers.
    pub fn type_name_opt(&self, specify_number: bool) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => {
                if specify_number {
                    "integer number"
                } else {
                    "number"
                }
            }
            Self::Float(_) => {
                if specify_number {
                    "floating-point number"
                } else {
                    "number"
                }
            }
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Set(_) => "set",
            Self::Object(_) => "object",
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Everything except `false` and `Undefined` is truthy.
    pub fn is_truthy(&self) -> bool {
        !self.is_falsy()
    }

    pub fn is_falsy(&self) -> bool {
        matches!(self, Self::Bool(false) | Self::Undefined)
    }

    /// Canonical key: a total, deterministic string rendering. Set and
    /// object members are ordered canonically, so the key is stable under
    /// member reordering.
    pub fn to_key(&self) -> String {
        let mut buf = String::new();
        self.write_key(&mut buf);
        buf
    }

    fn write_key(&self, buf: &mut String) {
        match self {
            Self::Undefined => buf.push_str("undefined"),
            Self::Null => buf.push_str("null"),
            Self::Bool(true) => buf.push_str("true"),
            Self::Bool(false) => buf.push_str("false"),
            Self::Int(i) => {
                let _ = write!(buf, "{i}");
            }
            Self::Float(f) => {
                let mut ryu_buf = ryu::Buffer::new();
                buf.push_str(ryu_buf.format(*f));
            }
            Self::String(s) => {
                // serde_json performs the quoting and escaping
                let _ = write!(buf, "{}", serde_json::Value::String(s.clone()));
            }
            Self::Array(items) => {
                buf.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        buf.push(',');
                    }
                    item.write_key(buf);
                }
                buf.push(']');
            }
            Self::Set(items) => {
                buf.push('<');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        buf.push(',');
                    }
                    item.write_key(buf);
                }
                buf.push('>');
            }
            Self::Object(items) => {
                let mut keys: Vec<&Self> = items.keys().collect();
                keys.sort();
                buf.push('{');
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        buf.push(',');
                    }
                    key.write_key(buf);
                    buf.push(':');
                    items[*key].write_key(buf);
                }
                buf.push('}');
            }
        }
    }

    /// Equality with mixed-numeric promotion: `1 == 1.0` holds here, while
    /// structural equality (`PartialEq`) distinguishes them.
    pub fn equal_promoting(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => {
                a.to_f64().is_some_and(|a| a == *b)
            }
            (Self::Array(a), Self::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equal_promoting(y))
            }
            _ => self == other,
        }
    }

    /// Converts to the JSON data model. Sets render as arrays in canonical
    /// order; `Undefined` renders as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Undefined | Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => match i.to_i64() {
                Some(v) => serde_json::Value::from(v),
                None => i
                    .to_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map_or(serde_json::Value::Null, serde_json::Value::Number),
            },
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Set(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(items) => {
                let mut map = serde_json::Map::new();
                for (k, v) in items {
                    let key = match k {
                        Self::String(s) => s.clone(),
                        other => other.to_key(),
                    };
                    map.insert(key, v.to_json());
                }
                serde_json::Value::Object(map)
            }
        }
    }

    /// Converts from the JSON data model. Whole numbers become `Int`,
    /// everything else `Float`; object entry order is preserved.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(BigInt::from(i))
                } else if let Some(u) = n.as_u64() {
                    Self::Int(BigInt::from(u))
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => Self::Array(items.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(items) => {
                let mut map = IndexMap::new();
                for (k, v) in items {
                    map.insert(Self::String(k.clone()), Self::from_json(v));
                }
                Self::Object(map)
            }
        }
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Undefined => 0,
        Value::Null => 1,
        Value::Bool(_) => 2,
        Value::Int(_) | Value::Float(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Set(_) => 6,
        Value::Object(_) => 7,
    }
}

/// Numeric comparison with promotion; ties between equal Int and Float
/// values put the Int first so the order stays total alongside structural
/// equality.
fn num_cmp(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
        (Value::Int(x), Value::Float(y)) => {
            let xf = x.to_f64().unwrap_or(f64::INFINITY * x.signum().to_f64().unwrap_or(1.0));
            xf.total_cmp(y).then(Ordering::Less)
        }
        (Value::Float(x), Value::Int(y)) => {
            let yf = y.to_f64().unwrap_or(f64::INFINITY * y.signum().to_f64().unwrap_or(1.0));
            x.total_cmp(&yf).then(Ordering::Greater)
        }
        _ => unreachable!("num_cmp on non-numbers"),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    /// The canonical total order:
    /// `Undefined < Null < false < true < Number < String < Array < Set < Object`,
    /// numbers compared numerically with Int-before-Float ties.
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = type_rank(self).cmp(&type_rank(other));
        if rank != Ordering::Equal {
            return rank;
        }

        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => num_cmp(self, other),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Array(a), Self::Array(b)) => a.cmp(b),
            (Self::Set(a), Self::Set(b)) => a.cmp(b),
            (Self::Object(a), Self::Object(b)) => {
                let mut a_entries: Vec<(&Self, &Self)> = a.iter().collect();
                let mut b_entries: Vec<(&Self, &Self)> = b.iter().collect();
                a_entries.sort_by(|x, y| x.0.cmp(y.0));
                b_entries.sort_by(|x, y| x.0.cmp(y.0));
                a_entries.cmp(&b_entries)
            }
            _ => unreachable!("equal ranks imply equal kinds"),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Undefined | Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::String(s) => s.hash(state),
            Self::Array(items) => {
                for item in items {
                    item.hash(state);
                }
            }
            Self::Set(items) => {
                for item in items {
                    item.hash(state);
                }
            }
            Self::Object(items) => {
                // order-independent: combine entry hashes commutatively
                let mut acc: u64 = 0;
                for (k, v) in items {
                    let mut h = ahash::AHasher::default();
                    k.hash(&mut h);
                    v.hash(&mut h);
                    acc = acc.wrapping_add(h.finish());
                }
                acc.hash(state);
            }
        }
    }
}

fn conflict(message: &str) -> PolicyError {
    PolicyError::new(ErrorCode::EvalConflictError, message, None)
}

/// Union of two objects (recursive, conflicting leaves are errors) or two
/// sets. Mixing objects with sets, or merging scalars, is a conflict.
pub fn merge_objects(a: &Value, b: &Value) -> Result<Value, PolicyError> {
    match (a, b) {
        (Value::Set(x), Value::Set(y)) => Ok(Value::Set(merge_sets(x, y))),
        (Value::Object(x), Value::Object(y)) => {
            let mut merged = x.clone();
            for (key, value) in y {
                match merged.get(key) {
                    Some(existing) => {
                        let combined = merge_objects(existing, value)?;
                        merged.insert(key.clone(), combined);
                    }
                    None => {
                        merged.insert(key.clone(), value.clone());
                    }
                }
            }
            Ok(Value::Object(merged))
        }
        (Value::Object(_) | Value::Set(_), _) | (_, Value::Object(_) | Value::Set(_)) => {
            Err(conflict("conflicting values for rule"))
        }
        _ => {
            if a == b {
                Ok(a.clone())
            } else {
                Err(conflict("conflicting values for rule"))
            }
        }
    }
}

/// Set union.
pub fn merge_sets(a: &BTreeSet<Value>, b: &BTreeSet<Value>) -> BTreeSet<Value> {
    a.union(b).cloned().collect()
}

/// Inserts `(key, value)` into `object`. With `once`, a present key whose
/// value differs is a conflict; an equal value is accepted silently.
pub fn insert_into_object(
    object: &mut IndexMap<Value, Value>,
    key: Value,
    value: Value,
    once: bool,
) -> Result<(), PolicyError> {
    if let Some(existing) = object.get(&key) {
        if once && *existing != value {
            return Err(conflict("object keys must be unique"));
        }
        object.insert(key, value);
        return Ok(());
    }
    object.insert(key, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn set(items: Vec<Value>) -> Value {
        Value::Set(items.into_iter().collect())
    }

    fn obj(items: Vec<(Value, Value)>) -> Value {
        Value::Object(items.into_iter().collect())
    }

    #[test]
    fn canonical_key_scalars() {
        assert_eq!(Value::Null.to_key(), "null");
        assert_eq!(Value::Bool(true).to_key(), "true");
        assert_eq!(Value::int(42).to_key(), "42");
        assert_eq!(Value::Float(1.5).to_key(), "1.5");
        assert_eq!(Value::string("a\"b").to_key(), "\"a\\\"b\"");
        assert_eq!(Value::Undefined.to_key(), "undefined");
    }

    #[test]
    fn canonical_key_distinguishes_int_and_float() {
        assert_eq!(Value::int(1).to_key(), "1");
        assert_eq!(Value::Float(1.0).to_key(), "1.0");
        assert_ne!(Value::int(1), Value::Float(1.0));
        assert!(Value::int(1).equal_promoting(&Value::Float(1.0)));
    }

    #[test]
    fn set_key_is_order_independent() {
        let a = set(vec![Value::int(3), Value::int(1), Value::int(2)]);
        let b = set(vec![Value::int(1), Value::int(2), Value::int(3)]);
        assert_eq!(a.to_key(), "<1,2,3>");
        assert_eq!(a, b);
    }

    #[test]
    fn object_key_sorts_entries() {
        let a = obj(vec![
            (Value::string("b"), Value::int(2)),
            (Value::string("a"), Value::int(1)),
        ]);
        assert_eq!(a.to_key(), "{\"a\":1,\"b\":2}");
    }

    #[test]
    fn total_order_across_kinds() {
        let mut values = vec![
            Value::string("a"),
            Value::Bool(true),
            Value::Null,
            Value::int(0),
            Value::Bool(false),
            Value::Array(vec![]),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Bool(false),
                Value::Bool(true),
                Value::int(0),
                Value::string("a"),
                Value::Array(vec![]),
            ]
        );
    }

    #[test]
    fn numeric_order_promotes() {
        assert!(Value::int(1) < Value::Float(1.5));
        assert!(Value::Float(0.5) < Value::int(1));
        // equal numerics: Int sorts first, keeping the order total
        assert!(Value::int(1) < Value::Float(1.0));
    }

    #[test]
    fn sets_iterate_in_canonical_order() {
        let s = set(vec![Value::string("b"), Value::int(10), Value::int(9)]);
        let Value::Set(members) = &s else { unreachable!() };
        let keys: Vec<String> = members.iter().map(Value::to_key).collect();
        assert_eq!(keys, vec!["9", "10", "\"b\""]);
    }

    #[test]
    fn merge_objects_recursive() {
        let a = obj(vec![(
            Value::string("x"),
            obj(vec![(Value::string("y"), Value::int(1))]),
        )]);
        let b = obj(vec![(
            Value::string("x"),
            obj(vec![(Value::string("z"), Value::int(2))]),
        )]);
        let merged = merge_objects(&a, &b).unwrap();
        assert_eq!(
            merged,
            obj(vec![(
                Value::string("x"),
                obj(vec![
                    (Value::string("y"), Value::int(1)),
                    (Value::string("z"), Value::int(2)),
                ]),
            )])
        );
    }

    #[test]
    fn merge_conflicting_leaves_errors() {
        let a = obj(vec![(Value::string("x"), Value::int(1))]);
        let b = obj(vec![(Value::string("x"), Value::int(2))]);
        let err = merge_objects(&a, &b).unwrap_err();
        assert_eq!(err.code, ErrorCode::EvalConflictError);
    }

    #[test]
    fn merge_object_with_set_errors() {
        let a = obj(vec![]);
        let b = set(vec![]);
        assert!(merge_objects(&a, &b).is_err());
    }

    #[test]
    fn insert_once_conflicts_on_differing_value() {
        let mut object = IndexMap::new();
        insert_into_object(&mut object, Value::string("k"), Value::int(1), true).unwrap();
        insert_into_object(&mut object, Value::string("k"), Value::int(1), true).unwrap();
        let err = insert_into_object(&mut object, Value::string("k"), Value::int(2), true).unwrap_err();
        assert_eq!(err.code, ErrorCode::EvalConflictError);
    }

    #[test]
    fn json_round_trip_preserves_object_order() {
        let json: serde_json::Value = serde_json::from_str(r#"{"b": 1, "a": [2, 3.5]}"#).unwrap();
        let value = Value::from_json(&json);
        assert_eq!(serde_json::to_string(&value.to_json()).unwrap(), r#"{"b":1,"a":[2,3.5]}"#);
    }

    #[test]
    fn truthiness() {
        assert!(Value::Null.is_truthy());
        assert!(Value::int(0).is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
        assert!(Value::Bool(false).is_falsy());
        assert!(Value::Undefined.is_falsy());
    }
}
