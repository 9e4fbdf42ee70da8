//! Aggregate built-ins over collections.

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use super::{Arity, BuiltinError, BuiltinResult, Registry};
use crate::value::Value;

pub(super) fn register(registry: &mut Registry) {
    registry.register("count", Arity::Exact(1), |args| count(&args[0]));
    registry.register("sum", Arity::Exact(1), |args| fold("sum", &args[0]));
    registry.register("product", Arity::Exact(1), |args| fold("product", &args[0]));
    registry.register("max", Arity::Exact(1), |args| extreme(&args[0], true));
    registry.register("min", Arity::Exact(1), |args| extreme(&args[0], false));
}

fn count(value: &Value) -> BuiltinResult {
    let n = match value {
        Value::Array(items) => items.len(),
        Value::Set(items) => items.len(),
        Value::Object(items) => items.len(),
        Value::String(s) => s.chars().count(),
        other => {
            return Err(BuiltinError::operand(
                "count",
                0,
                "one of {array, object, set, string}",
                other,
            ));
        }
    };
    Ok(Value::Int(BigInt::from(n)))
}

fn items_of<'a>(func: &str, value: &'a Value) -> Result<Vec<&'a Value>, BuiltinError> {
    match value {
        Value::Array(items) => Ok(items.iter().collect()),
        Value::Set(items) => Ok(items.iter().collect()),
        other => Err(BuiltinError::operand(func, 0, "one of {array, set}", other)),
    }
}

fn fold(func: &str, value: &Value) -> BuiltinResult {
    let items = items_of(func, value)?;
    let mut int_acc = if func == "sum" {
        BigInt::zero()
    } else {
        BigInt::from(1)
    };
    let mut float_acc: Option<f64> = None;
    for item in items {
        match item {
            Value::Int(i) => match &mut float_acc {
                Some(acc) => {
                    let f = i.to_f64().unwrap_or(f64::INFINITY);
                    *acc = if func == "sum" { *acc + f } else { *acc * f };
                }
                None => {
                    int_acc = if func == "sum" { int_acc + i } else { int_acc * i };
                }
            },
            Value::Float(f) => {
                let base = float_acc.unwrap_or_else(|| int_acc.to_f64().unwrap_or(f64::INFINITY));
                float_acc = Some(if func == "sum" { base + f } else { base * f });
            }
            other => return Err(BuiltinError::operand(func, 0, "collection of numbers", other)),
        }
    }
    Ok(match float_acc {
        Some(f) => Value::Float(f),
        None => Value::Int(int_acc),
    })
}

/// `max`/`min` over the canonical total order; empty input is undefined.
fn extreme(value: &Value, want_max: bool) -> BuiltinResult {
    let items = items_of(if want_max { "max" } else { "min" }, value)?;
    let Some(&first) = items.first() else {
        return Ok(Value::Undefined);
    };
    let mut best: &Value = first;
    for &item in items.iter().skip(1) {
        let better = if want_max { item > best } else { item < best };
        if better {
            best = item;
        }
    }
    Ok(best.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(items: Vec<i64>) -> Value {
        Value::Array(items.into_iter().map(Value::int).collect())
    }

    #[test]
    fn count_strings_by_chars() {
        assert_eq!(count(&Value::string("héllo")).unwrap(), Value::int(5));
    }

    #[test]
    fn sum_and_product() {
        assert_eq!(fold("sum", &array(vec![1, 2, 3])).unwrap(), Value::int(6));
        assert_eq!(fold("product", &array(vec![2, 3, 4])).unwrap(), Value::int(24));
        assert_eq!(
            fold("sum", &Value::Array(vec![Value::int(1), Value::Float(0.5)])).unwrap(),
            Value::Float(1.5)
        );
    }

    #[test]
    fn max_of_empty_is_undefined() {
        assert_eq!(extreme(&array(vec![]), true).unwrap(), Value::Undefined);
        assert_eq!(extreme(&array(vec![3, 1, 2]), true).unwrap(), Value::int(3));
        assert_eq!(extreme(&array(vec![3, 1, 2]), false).unwrap(), Value::int(1));
    }
}
