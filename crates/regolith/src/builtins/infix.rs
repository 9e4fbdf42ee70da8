//! Infix operator carriers.
//!
//! The arithmetic passes lower `+ - * / %` to `plus/minus/mul/div/rem`,
//! comparisons to `lt/gt/lte/gte/equal/neq`, and the set algebra overloads
//! of `& | -` to `and/or/minus`. The membership pass lowers `in` to
//! `internal.member_2` / `internal.member_3`.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{ToPrimitive, Zero};

use super::{Arity, BuiltinError, BuiltinResult, Registry};
use crate::value::Value;

pub(super) fn register(registry: &mut Registry) {
    registry.register("plus", Arity::Exact(2), |args| arith("plus", args));
    registry.register("minus", Arity::Exact(2), |args| minus(args));
    registry.register("mul", Arity::Exact(2), |args| arith("mul", args));
    registry.register("div", Arity::Exact(2), |args| arith("div", args));
    registry.register("rem", Arity::Exact(2), |args| rem(args));
    registry.register("equal", Arity::Exact(2), |args| {
        Ok(Value::Bool(args[0].equal_promoting(&args[1])))
    });
    registry.register("neq", Arity::Exact(2), |args| {
        Ok(Value::Bool(!args[0].equal_promoting(&args[1])))
    });
    registry.register("lt", Arity::Exact(2), |args| compare("lt", args, Ordering::is_lt));
    registry.register("gt", Arity::Exact(2), |args| compare("gt", args, Ordering::is_gt));
    registry.register("lte", Arity::Exact(2), |args| compare("lte", args, Ordering::is_le));
    registry.register("gte", Arity::Exact(2), |args| compare("gte", args, Ordering::is_ge));
    registry.register("and", Arity::Exact(2), |args| set_op("and", args));
    registry.register("or", Arity::Exact(2), |args| set_op("or", args));
    registry.register("internal.member_2", Arity::Exact(2), |args| member_2(args));
    registry.register("internal.member_3", Arity::Exact(3), |args| member_3(args));
}

enum Num {
    Int(BigInt),
    Float(f64),
}

fn as_num(func: &str, index: usize, value: &Value) -> Result<Num, BuiltinError> {
    match value {
        Value::Int(i) => Ok(Num::Int(i.clone())),
        Value::Float(f) => Ok(Num::Float(*f)),
        other => Err(BuiltinError::operand(func, index, "number", other)),
    }
}

fn arith(func: &str, args: &[Value]) -> BuiltinResult {
    let lhs = as_num(func, 0, &args[0])?;
    let rhs = as_num(func, 1, &args[1])?;
    match (lhs, rhs) {
        (Num::Int(a), Num::Int(b)) => int_arith(func, &a, &b),
        (a, b) => {
            let a = match a {
                Num::Int(i) => i.to_f64().unwrap_or(f64::INFINITY),
                Num::Float(f) => f,
            };
            let b = match b {
                Num::Int(i) => i.to_f64().unwrap_or(f64::INFINITY),
                Num::Float(f) => f,
            };
            float_arith(func, a, b)
        }
    }
}

fn int_arith(func: &str, a: &BigInt, b: &BigInt) -> BuiltinResult {
    match func {
        "plus" => Ok(Value::Int(a + b)),
        "minus" => Ok(Value::Int(a - b)),
        "mul" => Ok(Value::Int(a * b)),
        "div" => {
            if b.is_zero() {
                return Err(BuiltinError::type_error("divide by zero"));
            }
            let (quotient, remainder) = a.div_rem(b);
            if remainder.is_zero() {
                Ok(Value::Int(quotient))
            } else {
                let a = a.to_f64().unwrap_or(f64::INFINITY);
                let b = b.to_f64().unwrap_or(f64::INFINITY);
                Ok(Value::Float(a / b))
            }
        }
        _ => unreachable!("int_arith on {func}"),
    }
}

fn float_arith(func: &str, a: f64, b: f64) -> BuiltinResult {
    match func {
        "plus" => Ok(Value::Float(a + b)),
        "minus" => Ok(Value::Float(a - b)),
        "mul" => Ok(Value::Float(a * b)),
        "div" => {
            if b == 0.0 {
                return Err(BuiltinError::type_error("divide by zero"));
            }
            Ok(Value::Float(a / b))
        }
        _ => unreachable!("float_arith on {func}"),
    }
}

/// `-` is numeric subtraction or set difference, chosen by operand kinds.
fn minus(args: &[Value]) -> BuiltinResult {
    match (&args[0], &args[1]) {
        (Value::Set(a), Value::Set(b)) => Ok(Value::Set(a.difference(b).cloned().collect())),
        (Value::Set(_), other) | (other, Value::Set(_)) => Err(BuiltinError::type_error(format!(
            "operands must both be sets but got set and {}",
            other.type_name()
        ))),
        _ => arith("minus", args),
    }
}

fn rem(args: &[Value]) -> BuiltinResult {
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => {
            if b.is_zero() {
                return Err(BuiltinError::type_error("modulo by zero"));
            }
            Ok(Value::Int(a % b))
        }
        (Value::Float(_), _) | (_, Value::Float(_)) => Err(BuiltinError::type_error(
            "modulo on floating-point number",
        )),
        (a, b) => {
            let got = if matches!(a, Value::Int(_)) { b } else { a };
            Err(BuiltinError::operand("rem", 0, "number", got))
        }
    }
}

fn compare(func: &str, args: &[Value], accept: impl Fn(Ordering) -> bool) -> BuiltinResult {
    let ordering = match (&args[0], &args[1]) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            if args[0].equal_promoting(&args[1]) {
                Ordering::Equal
            } else {
                args[0].cmp(&args[1])
            }
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Null, Value::Null) => Ordering::Equal,
        (a, b) => {
            return Err(BuiltinError::type_error(format!(
                "{func}: values of type {} and {} cannot be compared",
                a.type_name(),
                b.type_name()
            )));
        }
    };
    Ok(Value::Bool(accept(ordering)))
}

/// `&` and `|` are set intersection and union.
fn set_op(func: &str, args: &[Value]) -> BuiltinResult {
    match (&args[0], &args[1]) {
        (Value::Set(a), Value::Set(b)) => Ok(Value::Set(if func == "and" {
            a.intersection(b).cloned().collect()
        } else {
            a.union(b).cloned().collect()
        })),
        (a, b) => {
            let got = if matches!(a, Value::Set(_)) { b } else { a };
            Err(BuiltinError::operand(func, 0, "set", got))
        }
    }
}

/// `x in collection`.
fn member_2(args: &[Value]) -> BuiltinResult {
    let item = &args[0];
    let found = match &args[1] {
        Value::Array(items) => items.iter().any(|v| v.equal_promoting(item)),
        Value::Set(items) => items.contains(item) || items.iter().any(|v| v.equal_promoting(item)),
        Value::Object(items) => items.values().any(|v| v.equal_promoting(item)),
        _ => false,
    };
    Ok(Value::Bool(found))
}

/// `key, value in collection`.
fn member_3(args: &[Value]) -> BuiltinResult {
    let key = &args[0];
    let item = &args[1];
    let found = match &args[2] {
        Value::Array(items) => match key {
            Value::Int(i) => i
                .to_usize()
                .and_then(|i| items.get(i))
                .is_some_and(|v| v.equal_promoting(item)),
            _ => false,
        },
        Value::Object(items) => items.get(key).is_some_and(|v| v.equal_promoting(item)),
        Value::Set(items) => key.equal_promoting(item) && items.contains(item),
        _ => false,
    };
    Ok(Value::Bool(found))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn call(registry: &Registry, name: &str, args: &[Value]) -> BuiltinResult {
        registry.get(name).unwrap().call(args)
    }

    fn set(items: Vec<i64>) -> Value {
        Value::Set(items.into_iter().map(Value::int).collect())
    }

    #[test]
    fn integer_division_stays_exact() {
        let registry = Registry::with_defaults();
        assert_eq!(call(&registry, "div", &[Value::int(4), Value::int(2)]).unwrap(), Value::int(2));
        assert_eq!(
            call(&registry, "div", &[Value::int(3), Value::int(2)]).unwrap(),
            Value::Float(1.5)
        );
    }

    #[test]
    fn divide_by_zero_is_a_type_error() {
        let registry = Registry::with_defaults();
        let err = call(&registry, "div", &[Value::int(1), Value::int(0)]).unwrap_err();
        assert!(!err.strict_only);
        assert_eq!(err.message, "divide by zero");
    }

    #[test]
    fn minus_is_set_difference_on_sets() {
        let registry = Registry::with_defaults();
        assert_eq!(
            call(&registry, "minus", &[set(vec![1, 2, 3]), set(vec![2])]).unwrap(),
            set(vec![1, 3])
        );
    }

    #[test]
    fn minus_rejects_set_and_number() {
        let registry = Registry::with_defaults();
        let err = call(&registry, "minus", &[set(vec![1]), Value::int(1)]).unwrap_err();
        assert!(err.message.contains("set"));
    }

    #[test]
    fn set_algebra() {
        let registry = Registry::with_defaults();
        assert_eq!(
            call(&registry, "or", &[set(vec![1, 2]), set(vec![2, 3])]).unwrap(),
            set(vec![1, 2, 3])
        );
        assert_eq!(
            call(&registry, "and", &[set(vec![1, 2]), set(vec![2, 3])]).unwrap(),
            set(vec![2])
        );
    }

    #[test]
    fn modulo_needs_integers() {
        let registry = Registry::with_defaults();
        assert_eq!(call(&registry, "rem", &[Value::int(5), Value::int(2)]).unwrap(), Value::int(1));
        assert!(call(&registry, "rem", &[Value::Float(5.0), Value::int(2)]).is_err());
        assert!(call(&registry, "rem", &[Value::int(5), Value::int(0)]).is_err());
    }

    #[test]
    fn comparison_promotes_numerics() {
        let registry = Registry::with_defaults();
        assert_eq!(
            call(&registry, "lt", &[Value::int(1), Value::Float(1.5)]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            call(&registry, "gte", &[Value::Float(1.0), Value::int(1)]).unwrap(),
            Value::Bool(true)
        );
        assert!(call(&registry, "lt", &[Value::int(1), Value::string("a")]).is_err());
    }

    #[test]
    fn membership() {
        let registry = Registry::with_defaults();
        let xs = Value::Array(vec![Value::int(2), Value::int(4)]);
        assert_eq!(
            call(&registry, "internal.member_2", &[Value::int(2), xs.clone()]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            call(&registry, "internal.member_3", &[Value::int(1), Value::int(4), xs]).unwrap(),
            Value::Bool(true)
        );
    }
}
