//! Numeric built-ins.

use num_bigint::BigInt;
use num_traits::Signed;

use super::{Arity, BuiltinError, BuiltinResult, Registry};
use crate::value::Value;

pub(super) fn register(registry: &mut Registry) {
    registry.register("abs", Arity::Exact(1), |args| match &args[0] {
        Value::Int(i) => Ok(Value::Int(i.abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(BuiltinError::operand("abs", 0, "number", other)),
    });
    registry.register("ceil", Arity::Exact(1), |args| rounding("ceil", &args[0]));
    registry.register("floor", Arity::Exact(1), |args| rounding("floor", &args[0]));
    registry.register("round", Arity::Exact(1), |args| rounding("round", &args[0]));
}

fn rounding(func: &str, value: &Value) -> BuiltinResult {
    match value {
        Value::Int(i) => Ok(Value::Int(i.clone())),
        Value::Float(f) => {
            let rounded = match func {
                "ceil" => f.ceil(),
                "floor" => f.floor(),
                _ => f.round(),
            };
            // rounded floats are whole; report them as integers
            if rounded.is_finite() && rounded.abs() < 9.0e18 {
                #[expect(clippy::cast_possible_truncation, reason = "range-checked above")]
                let whole = rounded as i64;
                Ok(Value::Int(BigInt::from(whole)))
            } else {
                Ok(Value::Float(rounded))
            }
        }
        other => Err(BuiltinError::operand(func, 0, "number", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_returns_integers() {
        assert_eq!(rounding("ceil", &Value::Float(1.2)).unwrap(), Value::int(2));
        assert_eq!(rounding("floor", &Value::Float(1.8)).unwrap(), Value::int(1));
        assert_eq!(rounding("round", &Value::Float(1.5)).unwrap(), Value::int(2));
        assert_eq!(rounding("round", &Value::int(-3)).unwrap(), Value::int(-3));
    }
}
