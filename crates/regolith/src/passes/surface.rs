//! Surface shaping passes: rooting, module normalization, keyword imports,
//! literal canonicalization and string decoding.

use crate::ast::{Kind, NodeId};
use crate::errors::{ErrorCode, ErrorSeq, PolicyError};
use crate::rewrite::{Direction, Matcher, Pass, Rewrite};
use crate::wf::{wf_parse, wf_structure};

use super::Compiler;

/// Wraps the parsed modules and query under the `Rego` root.
pub fn input_data() -> Pass<Compiler> {
    Pass::new("input_data", Direction::TopDown)
        .pre(|ctx: &mut Compiler, root| {
            if ctx.ast.size(root) > 0 {
                return Ok(());
            }
            if let Some(query) = ctx.query {
                ctx.ast.push_child(root, query);
            }
            let loc = ctx.ast.loc(root).clone();
            let policy = ctx.ast.node(Kind::Policy, loc);
            for module in ctx.modules.clone() {
                ctx.ast.push_child(policy, module);
            }
            ctx.ast.push_child(root, policy);
            Ok(())
        })
        .wf(wf_parse())
}

/// Resolves each module's package clause to a dotted path, stored as the
/// module's payload.
pub fn modules() -> Pass<Compiler> {
    Pass::new("modules", Direction::TopDown).pre(|ctx: &mut Compiler, _| {
        let mut errors = ErrorSeq::new();
        for module in ctx.modules.clone() {
            let package = ctx.ast.child(module, 0);
            let reference = ctx.ast.child(package, 0);
            let mut segments = vec![ctx.ast.text(ctx.ast.child(ctx.ast.child(reference, 0), 0)).to_owned()];
            let argseq = ctx.ast.child(reference, 1);
            for &arg in ctx.ast.children(argseq) {
                match ctx.ast.kind(arg) {
                    Kind::RefArgDot => segments.push(ctx.ast.text(ctx.ast.child(arg, 0)).to_owned()),
                    _ => {
                        // bracket path segments must be strings
                        let inner = ctx.ast.child(arg, 0);
                        match string_of(ctx, inner) {
                            Some(text) => segments.push(text),
                            None => {
                                errors.push(ctx.compile_error(arg, "package paths must be strings"));
                            }
                        }
                    }
                }
            }
            if segments.first().map(String::as_str) == Some("data") {
                errors.push(ctx.compile_error(package, "package must not be rooted at data"));
            }
            ctx.ast.set_text(module, segments.join("."));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    })
}

fn string_of(ctx: &Compiler, node: NodeId) -> Option<String> {
    let mut current = node;
    loop {
        match ctx.ast.kind(current) {
            Kind::Expr | Kind::Term | Kind::Scalar => current = ctx.ast.child(current, 0),
            Kind::JSONString => return Some(ctx.ast.text(current).to_owned()),
            _ => return None,
        }
    }
}

/// Expands `future.keywords` and `rego.v1` imports into keyword bindings.
pub fn imports() -> Pass<Compiler> {
    Pass::new("imports", Direction::TopDown).rule(Matcher::kind(Kind::Import), |ctx: &mut Compiler, node, _| {
        let reference = ctx.ast.child(node, 0);
        let Some(path) = ctx.flatten_ref(reference) else {
            return Ok(Rewrite::Keep);
        };
        let keyword = if path == "future.keywords" || path == "rego.v1" {
            Some("*".to_owned())
        } else {
            path.strip_prefix("future.keywords.").map(str::to_owned)
        };
        match keyword {
            Some(word) => {
                let loc = ctx.ast.loc(node).clone();
                let binding = ctx.ast.node_with_text(Kind::Keyword, loc, word);
                Ok(Rewrite::Replace(binding))
            }
            None => Ok(Rewrite::Keep),
        }
    })
}

/// Validates keyword bindings.
pub fn keywords() -> Pass<Compiler> {
    Pass::new("keywords", Direction::TopDown).rule(Matcher::kind(Kind::Keyword), |ctx: &mut Compiler, node, _| {
        let word = ctx.ast.text(node);
        if matches!(word, "*" | "if" | "in" | "contains" | "every") {
            Ok(Rewrite::Keep)
        } else {
            Err(ctx.compile_error(node, format!("unknown keyword import: {word}")))
        }
    })
}

/// Collection shape checks: constant object literals must not repeat keys.
pub fn lists() -> Pass<Compiler> {
    Pass::new("lists", Direction::BottomUp).rule(Matcher::kind(Kind::Object), |ctx: &mut Compiler, node, _| {
        let mut seen = std::collections::BTreeSet::new();
        for &item in ctx.ast.children(node) {
            let key = ctx.ast.child(item, 0);
            if let Some(value) = ctx.eval_const(key) {
                if !seen.insert(value.to_key()) {
                    return Err(PolicyError::at(
                        ErrorCode::CompileError,
                        "object keys must be unique",
                        ctx.ast.loc(key),
                    ));
                }
            }
        }
        Ok(Rewrite::Keep)
    })
}

/// Default-rule values must be constants.
pub fn ifs() -> Pass<Compiler> {
    Pass::new("ifs", Direction::TopDown).rule(Matcher::kind(Kind::DefaultRule), |ctx: &mut Compiler, node, _| {
        let value = ctx.ast.child(node, 1);
        if ctx.eval_const(value).is_none() {
            return Err(ctx.compile_error(value, "default rule values must be constants"));
        }
        Ok(Rewrite::Keep)
    })
}

/// `else` branches without a value produce `true`.
pub fn elses() -> Pass<Compiler> {
    Pass::new("elses", Direction::TopDown).rule(
        Matcher::kind(Kind::Else).child(&[Kind::UnifyBody], "body"),
        |ctx: &mut Compiler, node, _| {
            let loc = ctx.ast.loc(node).clone();
            let leaf = ctx.ast.node_with_text(Kind::True, loc.clone(), "true");
            let scalar = ctx.ast.node(Kind::Scalar, loc.clone());
            ctx.ast.push_child(scalar, leaf);
            let term = ctx.ast.node(Kind::Term, loc.clone());
            ctx.ast.push_child(term, scalar);
            let expr = ctx.ast.node(Kind::Expr, loc);
            ctx.ast.push_child(expr, term);
            ctx.ast.insert_child(node, 0, expr);
            Ok(Rewrite::Keep)
        },
    )
}

/// Rule-shape checks: duplicate function parameters are rejected.
pub fn rules() -> Pass<Compiler> {
    Pass::new("rules", Direction::TopDown).rule(Matcher::kind(Kind::RuleArgs), |ctx: &mut Compiler, node, _| {
        let mut seen = std::collections::BTreeSet::new();
        for &param in ctx.ast.children(node) {
            if ctx.ast.kind(param) == Kind::Var && ctx.ast.text(param) != "_" {
                if !seen.insert(ctx.ast.text(param).to_owned()) {
                    return Err(ctx.compile_error(param, "duplicate function parameter"));
                }
            }
        }
        Ok(Rewrite::Keep)
    })
}

/// Call targets must be plain dotted references.
pub fn build_calls() -> Pass<Compiler> {
    Pass::new("build_calls", Direction::TopDown).rule(Matcher::kind(Kind::ExprCall), |ctx: &mut Compiler, node, _| {
        let callee = ctx.ast.child(node, 0);
        if ctx.ast.kind(callee) == Kind::Ref && ctx.flatten_ref(callee).is_none() {
            return Err(ctx.compile_error(callee, "invalid call target"));
        }
        Ok(Rewrite::Keep)
    })
}

/// Desugars `x in S` into ternary membership.
pub fn membership() -> Pass<Compiler> {
    Pass::new("membership", Direction::BottomUp).rule(
        Matcher::kind(Kind::Infix)
            .child(&[Kind::Expr], "item")
            .child(&[Kind::InOp], "op")
            .child(&[Kind::Expr], "seq"),
        |ctx: &mut Compiler, node, caps| {
            let loc = ctx.ast.loc(node).clone();
            let item = ctx.ast.detach(caps.node("item"));
            let seq = ctx.ast.detach(caps.node("seq"));
            let key = ctx.ast.node_with_text(Kind::Undefined, loc.clone(), "undefined");
            let membership = ctx.ast.node(Kind::Membership, loc);
            ctx.ast.push_child(membership, key);
            ctx.ast.push_child(membership, item);
            ctx.ast.push_child(membership, seq);
            Ok(Rewrite::Replace(membership))
        },
    )
}

/// Canonicalizes string-keyed bracket args into dot args.
pub fn build_refs() -> Pass<Compiler> {
    Pass::new("build_refs", Direction::BottomUp).rule(Matcher::kind(Kind::RefArgBrack), |ctx: &mut Compiler, node, _| {
        let inner = ctx.ast.child(node, 0);
        let Some(text) = string_of(ctx, inner) else {
            return Ok(Rewrite::Keep);
        };
        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Ok(Rewrite::Keep);
        }
        let loc = ctx.ast.loc(node).clone();
        let var = ctx.ast.node_with_text(Kind::Var, loc.clone(), text);
        let dot = ctx.ast.node(Kind::RefArgDot, loc);
        ctx.ast.push_child(dot, var);
        Ok(Rewrite::Replace(dot))
    })
}

/// Canonical literal form: negation and `with` modifiers become nested
/// bodies.
pub fn structure() -> Pass<Compiler> {
    Pass::new("structure", Direction::TopDown)
        .rule(
            Matcher::kind(Kind::Literal)
                .child(&[], "inner")
                .child(&[Kind::WithSeq], "withs"),
            |ctx: &mut Compiler, node, caps| {
                let loc = ctx.ast.loc(node).clone();
                let inner = ctx.ast.detach(caps.node("inner"));
                let withs: Vec<NodeId> = ctx.ast.take_children(caps.node("withs"));

                let literal = ctx.ast.node(Kind::Literal, loc.clone());
                ctx.ast.push_child(literal, inner);
                let mut current = literal;
                // the first modifier ends up outermost
                for &with in withs.iter().rev() {
                    let target = ctx.ast.detach(ctx.ast.child(with, 0));
                    let value = ctx.ast.detach(ctx.ast.child(with, 1));
                    let body = ctx.ast.node(Kind::UnifyBody, loc.clone());
                    ctx.ast.push_child(body, current);
                    let wrapped = ctx.ast.node(Kind::LiteralWith, loc.clone());
                    ctx.ast.push_child(wrapped, target);
                    ctx.ast.push_child(wrapped, value);
                    ctx.ast.push_child(wrapped, body);
                    current = wrapped;
                }
                Ok(Rewrite::Replace(current))
            },
        )
        .rule(
            Matcher::kind(Kind::Literal).child(&[Kind::NotExpr], "not"),
            |ctx: &mut Compiler, node, caps| {
                let loc = ctx.ast.loc(node).clone();
                let expr = ctx.ast.detach(ctx.ast.child(caps.node("not"), 0));
                let literal = ctx.ast.node(Kind::Literal, loc.clone());
                ctx.ast.push_child(literal, expr);
                let body = ctx.ast.node(Kind::UnifyBody, loc.clone());
                ctx.ast.push_child(body, literal);
                let not = ctx.ast.node(Kind::LiteralNot, loc);
                ctx.ast.push_child(not, body);
                Ok(Rewrite::Replace(not))
            },
        )
        .wf(wf_structure())
}

/// Decodes string literals: raw strings become plain strings, escape
/// sequences are resolved.
pub fn strings() -> Pass<Compiler> {
    Pass::new("strings", Direction::TopDown).pre(|ctx: &mut Compiler, root| {
        let mut errors = ErrorSeq::new();
        for node in ctx.ast.walk(root) {
            match ctx.ast.kind(node) {
                Kind::RawString => {
                    ctx.ast.set_kind(node, Kind::JSONString);
                }
                Kind::JSONString => {
                    let text = ctx.ast.text(node).to_owned();
                    match unescape(&text) {
                        Ok(decoded) => ctx.ast.set_text(node, decoded),
                        Err(message) => {
                            errors.push(PolicyError::at(ErrorCode::ParseError, message, ctx.ast.loc(node)));
                        }
                    }
                }
                _ => {}
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    })
}

fn unescape(text: &str) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                if hex.len() != 4 {
                    return Err("truncated \\u escape".into());
                }
                let code = u32::from_str_radix(&hex, 16).map_err(|_| format!("invalid \\u escape: {hex}"))?;
                let c = char::from_u32(code).ok_or_else(|| format!("invalid code point: {hex}"))?;
                out.push(c);
            }
            Some(other) => return Err(format!("unknown escape sequence: \\{other}")),
            None => return Err("trailing backslash in string".into()),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescape_handles_common_escapes() {
        assert_eq!(unescape(r#"a\"b\n"#).unwrap(), "a\"b\n");
        assert_eq!(unescape(r"A").unwrap(), "A");
        assert!(unescape(r"\q").is_err());
    }
}
