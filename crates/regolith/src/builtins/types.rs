//! Type predicates and conversions.

use num_bigint::BigInt;
use num_traits::Zero;

use super::{Arity, BuiltinError, BuiltinResult, Registry};
use crate::value::{Value, ValueType};

pub(super) fn register(registry: &mut Registry) {
    let checks: &[(&str, ValueType)] = &[
        ("is_number", ValueType::Number),
        ("is_string", ValueType::String),
        ("is_boolean", ValueType::Boolean),
        ("is_array", ValueType::Array),
        ("is_set", ValueType::Set),
        ("is_object", ValueType::Object),
        ("is_null", ValueType::Null),
    ];
    for &(name, ty) in checks {
        registry.register(name, Arity::Exact(1), move |args| {
            Ok(Value::Bool(args[0].value_type() == ty))
        });
    }

    registry.register("type_name", Arity::Exact(1), |args| {
        Ok(Value::string(args[0].type_name()))
    });

    registry.register("to_number", Arity::Exact(1), |args| to_number(&args[0]));
}

fn to_number(value: &Value) -> BuiltinResult {
    match value {
        Value::Int(_) | Value::Float(_) => Ok(value.clone()),
        Value::Null => Ok(Value::Int(BigInt::zero())),
        Value::Bool(b) => Ok(Value::int(i64::from(*b))),
        Value::String(s) => {
            if let Ok(i) = s.parse::<BigInt>() {
                Ok(Value::Int(i))
            } else if let Ok(f) = s.parse::<f64>() {
                Ok(Value::Float(f))
            } else {
                Err(BuiltinError::soft(format!("to_number: invalid number \"{s}\"")))
            }
        }
        other => Err(BuiltinError::operand(
            "to_number",
            0,
            "one of {null, boolean, number, string}",
            other,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_number_parses() {
        assert_eq!(to_number(&Value::string("42")).unwrap(), Value::int(42));
        assert_eq!(to_number(&Value::string("1.5")).unwrap(), Value::Float(1.5));
        assert_eq!(to_number(&Value::Null).unwrap(), Value::int(0));
        let err = to_number(&Value::string("nope")).unwrap_err();
        assert!(err.strict_only);
    }
}
