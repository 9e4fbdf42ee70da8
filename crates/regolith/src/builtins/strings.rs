//! String built-ins.

use std::fmt::Write as _;

use super::{Arity, BuiltinError, BuiltinResult, Registry};
use crate::value::Value;

pub(super) fn register(registry: &mut Registry) {
    registry.register("concat", Arity::Exact(2), |args| concat(args));
    registry.register("contains", Arity::Exact(2), |args| {
        let (s, sub) = two_strings("contains", args)?;
        Ok(Value::Bool(s.contains(sub)))
    });
    registry.register("startswith", Arity::Exact(2), |args| {
        let (s, prefix) = two_strings("startswith", args)?;
        Ok(Value::Bool(s.starts_with(prefix)))
    });
    registry.register("endswith", Arity::Exact(2), |args| {
        let (s, suffix) = two_strings("endswith", args)?;
        Ok(Value::Bool(s.ends_with(suffix)))
    });
    registry.register("lower", Arity::Exact(1), |args| {
        Ok(Value::String(one_string("lower", args)?.to_lowercase()))
    });
    registry.register("upper", Arity::Exact(1), |args| {
        Ok(Value::String(one_string("upper", args)?.to_uppercase()))
    });
    registry.register("split", Arity::Exact(2), |args| {
        let (s, delim) = two_strings("split", args)?;
        Ok(Value::Array(
            s.split(delim).map(|part| Value::string(part)).collect(),
        ))
    });
    registry.register("trim", Arity::Exact(2), |args| {
        let (s, cutset) = two_strings("trim", args)?;
        let chars: Vec<char> = cutset.chars().collect();
        Ok(Value::string(s.trim_matches(|c| chars.contains(&c))))
    });
    registry.register("replace", Arity::Exact(3), |args| {
        let s = one_string("replace", args)?;
        let (Value::String(old), Value::String(new)) = (&args[1], &args[2]) else {
            return Err(BuiltinError::operand("replace", 1, "string", &args[1]));
        };
        Ok(Value::String(s.replace(old.as_str(), new)))
    });
    registry.register("sprintf", Arity::Exact(2), |args| sprintf(args));
}

fn one_string<'a>(func: &str, args: &'a [Value]) -> Result<&'a str, BuiltinError> {
    match &args[0] {
        Value::String(s) => Ok(s),
        other => Err(BuiltinError::operand(func, 0, "string", other)),
    }
}

fn two_strings<'a>(func: &str, args: &'a [Value]) -> Result<(&'a str, &'a str), BuiltinError> {
    match (&args[0], &args[1]) {
        (Value::String(a), Value::String(b)) => Ok((a, b)),
        (Value::String(_), other) => Err(BuiltinError::operand(func, 1, "string", other)),
        (other, _) => Err(BuiltinError::operand(func, 0, "string", other)),
    }
}

/// `concat(delimiter, collection-of-strings)`.
fn concat(args: &[Value]) -> BuiltinResult {
    let delim = one_string("concat", args)?;
    let parts: Vec<&Value> = match &args[1] {
        Value::Array(items) => items.iter().collect(),
        Value::Set(items) => items.iter().collect(),
        other => return Err(BuiltinError::operand("concat", 1, "one of {array, set}", other)),
    };
    let mut out = String::new();
    for (i, part) in parts.iter().enumerate() {
        let Value::String(s) = part else {
            return Err(BuiltinError::operand("concat", 1, "collection of strings", part));
        };
        if i > 0 {
            out.push_str(delim);
        }
        out.push_str(s);
    }
    Ok(Value::String(out))
}

/// Minimal verb set: `%v` (any value), `%d`, `%s`, `%f`, `%%`.
fn sprintf(args: &[Value]) -> BuiltinResult {
    let format = one_string("sprintf", args)?;
    let Value::Array(values) = &args[1] else {
        return Err(BuiltinError::operand("sprintf", 1, "array", &args[1]));
    };

    let mut out = String::new();
    let mut next = 0;
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let Some(verb) = chars.next() else {
            return Err(BuiltinError::soft("sprintf: trailing %"));
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        let Some(value) = values.get(next) else {
            return Err(BuiltinError::soft(format!("sprintf: missing argument for %{verb}")));
        };
        next += 1;
        match (verb, value) {
            ('d', Value::Int(i)) => {
                let _ = write!(out, "{i}");
            }
            ('f', Value::Float(f)) => {
                let _ = write!(out, "{f:.6}");
            }
            ('s', Value::String(s)) => out.push_str(s),
            ('v', Value::String(s)) => out.push_str(s),
            ('v' | 'd' | 'f' | 's', v) => out.push_str(&v.to_key()),
            _ => return Err(BuiltinError::soft(format!("sprintf: unsupported verb %{verb}"))),
        }
    }
    Ok(Value::String(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_joins() {
        let arr = Value::Array(vec![Value::string("a"), Value::string("b")]);
        assert_eq!(
            concat(&[Value::string("/"), arr]).unwrap(),
            Value::string("a/b")
        );
    }

    #[test]
    fn sprintf_verbs() {
        let out = sprintf(&[
            Value::string("%s=%d (%v)"),
            Value::Array(vec![Value::string("n"), Value::int(3), Value::Bool(true)]),
        ])
        .unwrap();
        assert_eq!(out, Value::string("n=3 (true)"));
    }
}
