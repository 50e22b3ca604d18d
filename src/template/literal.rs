//! Literal coercion of raw argument text.
//!
//! Function arguments arrive as source text (`1`, `12.3`, `"abc"`, `$var`);
//! this turns each one into its narrowest scalar. It never fails: anything
//! that is not a well-formed literal stays a string.

use crate::value::Value;

/// Convert a raw token into an int, float, bool, null or string.
///
/// Variable and function tokens (`$var`, `${f()}`) are returned unchanged.
pub fn coerce(raw: &str) -> Value {
    let text = raw.trim();

    if text.starts_with('$') {
        return Value::String(text.to_string());
    }

    if let Some(n) = parse_int(text) {
        return Value::Int(n);
    }

    if let Some(f) = parse_float(text) {
        return Value::Float(f);
    }

    match text {
        "true" | "True" => return Value::Bool(true),
        "false" | "False" => return Value::Bool(false),
        "null" | "None" => return Value::Null,
        _ => {}
    }

    if let Some(s) = parse_quoted(text) {
        return Value::String(s);
    }

    if let Some(v) = parse_bracketed(text) {
        return v;
    }

    Value::String(text.to_string())
}

fn parse_int(text: &str) -> Option<i64> {
    let digits = text.strip_prefix(['+', '-']).unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // zero-padded ids like 00123 are not int literals
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    text.parse::<i64>().ok()
}

/// Only plain decimal/exponent text counts; `inf` and `nan` stay strings.
fn parse_float(text: &str) -> Option<f64> {
    let body = text.strip_prefix(['+', '-']).unwrap_or(text);
    if !body.bytes().any(|b| b.is_ascii_digit())
        || !body.bytes().any(|b| matches!(b, b'.' | b'e' | b'E'))
    {
        return None;
    }
    if !body
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return None;
    }
    text.parse::<f64>().ok()
}

fn parse_quoted(text: &str) -> Option<String> {
    let quote = text.chars().next()?;
    if !matches!(quote, '"' | '\'') || text.len() < 2 || !text.ends_with(quote) {
        return None;
    }
    let inner = &text[1..text.len() - 1];

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == quote {
            // unescaped quote in the middle: not a single literal
            return None;
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Some(out)
}

fn parse_bracketed(text: &str) -> Option<Value> {
    let bracketed = (text.starts_with('[') && text.ends_with(']'))
        || (text.starts_with('{') && text.ends_with('}'));
    if !bracketed {
        return None;
    }
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .map(Value::from)
}
