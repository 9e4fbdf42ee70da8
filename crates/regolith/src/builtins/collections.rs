//! Array, object and set helpers.

use num_traits::ToPrimitive;

use super::{Arity, BuiltinError, BuiltinResult, Registry};
use crate::value::Value;

pub(super) fn register(registry: &mut Registry) {
    registry.register("array.concat", Arity::Exact(2), |args| {
        match (&args[0], &args[1]) {
            (Value::Array(a), Value::Array(b)) => {
                let mut out = a.clone();
                out.extend(b.iter().cloned());
                Ok(Value::Array(out))
            }
            (Value::Array(_), other) => Err(BuiltinError::operand("array.concat", 1, "array", other)),
            (other, _) => Err(BuiltinError::operand("array.concat", 0, "array", other)),
        }
    });
    registry.register("array.slice", Arity::Exact(3), |args| slice(args));
    registry.register("object.get", Arity::Exact(3), |args| match &args[0] {
        Value::Object(items) => Ok(items.get(&args[1]).cloned().unwrap_or_else(|| args[2].clone())),
        other => Err(BuiltinError::operand("object.get", 0, "object", other)),
    });
    registry.register("object.keys", Arity::Exact(1), |args| match &args[0] {
        Value::Object(items) => Ok(Value::Set(items.keys().cloned().collect())),
        other => Err(BuiltinError::operand("object.keys", 0, "object", other)),
    });
    registry.register("intersection", Arity::Exact(2), |args| {
        binary_set_op("intersection", args, true)
    });
    registry.register("union", Arity::Exact(2), |args| binary_set_op("union", args, false));
}

/// `array.slice(arr, start, stop)` with index clamping.
fn slice(args: &[Value]) -> BuiltinResult {
    let Value::Array(items) = &args[0] else {
        return Err(BuiltinError::operand("array.slice", 0, "array", &args[0]));
    };
    let index = |arg: &Value, pos: usize| -> Result<i64, BuiltinError> {
        match arg {
            Value::Int(i) => Ok(i.to_i64().unwrap_or(i64::MAX)),
            other => Err(BuiltinError::operand("array.slice", pos, "integer number", other)),
        }
    };
    let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
    let start = index(&args[1], 1)?.clamp(0, len);
    let stop = index(&args[2], 2)?.clamp(start, len);
    #[expect(clippy::cast_sign_loss, reason = "clamped to non-negative above")]
    let range = start as usize..stop as usize;
    Ok(Value::Array(items[range].to_vec()))
}

fn binary_set_op(func: &str, args: &[Value], intersect: bool) -> BuiltinResult {
    match (&args[0], &args[1]) {
        (Value::Set(a), Value::Set(b)) => Ok(Value::Set(if intersect {
            a.intersection(b).cloned().collect()
        } else {
            a.union(b).cloned().collect()
        })),
        (Value::Set(_), other) => Err(BuiltinError::operand(func, 1, "set", other)),
        (other, _) => Err(BuiltinError::operand(func, 0, "set", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_clamps() {
        let arr = Value::Array(vec![Value::int(1), Value::int(2), Value::int(3)]);
        assert_eq!(
            slice(&[arr.clone(), Value::int(1), Value::int(10)]).unwrap(),
            Value::Array(vec![Value::int(2), Value::int(3)])
        );
        assert_eq!(
            slice(&[arr, Value::int(-5), Value::int(1)]).unwrap(),
            Value::Array(vec![Value::int(1)])
        );
    }
}
