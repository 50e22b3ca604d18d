//! Resolution: rewriting template tokens into concrete values.
//!
//! `resolve` walks a value tree and evaluates every `${func(args)}` token and
//! then every `$var` token it finds in string content. A token that is the
//! whole string keeps the native type of its value; a token embedded in
//! surrounding text is spliced in as display text.

use regex::{Captures, Regex};

use super::call::parse_function;
use super::extract::{FUNCTION_RE, VARIABLE_RE};
use crate::error::Result;
use crate::scope::BindingScope;
use crate::value::{Map, Value};

/// Resolve every template token in `content` against `scope`.
///
/// Scalars pass through unchanged; sequences and mappings are resolved
/// element-wise, mapping keys included, keeping insertion order.
///
/// # Errors
/// `VariableNotFound` / `FunctionNotFound` for names missing from the whole
/// scope chain, `Params` for malformed call text.
pub fn resolve(content: &Value, scope: &BindingScope) -> Result<Value> {
    match content {
        Value::String(s) => resolve_str(s, scope),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve(item, scope))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Map(map) => {
            let mut resolved = Map::with_capacity(map.len());
            for (key, value) in map {
                let key = resolve_str(key, scope)?.to_text();
                resolved.insert(key, resolve(value, scope)?);
            }
            Ok(Value::Map(resolved))
        }
        other => Ok(other.clone()),
    }
}

/// Resolve one string: function tokens first, then variable tokens.
pub fn resolve_str(content: &str, scope: &BindingScope) -> Result<Value> {
    if !content.contains('$') {
        return Ok(Value::string(content));
    }

    match eval_functions(content, scope)? {
        Value::String(s) => eval_variables(&s, scope),
        native => Ok(native),
    }
}

/// Evaluate function tokens only, leaving `$var` text outside calls alone.
///
/// Hook entries are pure calls; this keeps stray `$` text in them literal.
pub fn eval_functions_only(content: &Value, scope: &BindingScope) -> Result<Value> {
    match content {
        Value::String(s) => eval_functions(s, scope),
        Value::Array(items) => items
            .iter()
            .map(|item| eval_functions_only(item, scope))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Map(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), eval_functions_only(value, scope)?);
            }
            Ok(Value::Map(out))
        }
        other => Ok(other.clone()),
    }
}

fn eval_functions(content: &str, scope: &BindingScope) -> Result<Value> {
    splice(&FUNCTION_RE, content, |caps| {
        let call = parse_function(&caps[1])?;

        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            args.push(resolve(arg, scope)?);
        }
        let mut kwargs = Map::with_capacity(call.kwargs.len());
        for (key, value) in &call.kwargs {
            kwargs.insert(key.clone(), resolve(value, scope)?);
        }

        let func = scope.get_function(&call.name)?;
        tracing::trace!(call = %call, "calling function");
        func.call(&args, &kwargs)
    })
}

fn eval_variables(content: &str, scope: &BindingScope) -> Result<Value> {
    splice(&VARIABLE_RE, content, |caps| scope.get_variable(&caps[1]))
}

/// Replace each match of `re` in `content` with the value `eval` produces.
///
/// Each occurrence is evaluated on its own, so a name repeated in one
/// string is substituted at every position. A match spanning the whole
/// string returns the value itself.
fn splice<F>(re: &Regex, content: &str, mut eval: F) -> Result<Value>
where
    F: FnMut(&Captures) -> Result<Value>,
{
    let mut out = String::with_capacity(content.len());
    let mut last = 0;

    for caps in re.captures_iter(content) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let value = eval(&caps)?;
        if whole.start() == 0 && whole.end() == content.len() {
            return Ok(value);
        }
        out.push_str(&content[last..whole.start()]);
        out.push_str(&value.to_text());
        last = whole.end();
    }

    if last == 0 {
        return Ok(Value::string(content));
    }
    out.push_str(&content[last..]);
    Ok(Value::String(out))
}

/// Replace `$name` tokens using a fixed mapping, without any scope.
///
/// Tokens whose names are not in `mapping` are left as they are. Used to
/// rename formal parameters to actual arguments through a definition body.
pub fn substitute_tokens(content: &Value, mapping: &Map) -> Value {
    match content {
        Value::String(s) => substitute_str(s, mapping),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_tokens(item, mapping))
                .collect(),
        ),
        Value::Map(map) => Value::Map(
            map.iter()
                .map(|(key, value)| {
                    (
                        substitute_str(key, mapping).to_text(),
                        substitute_tokens(value, mapping),
                    )
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute_str(content: &str, mapping: &Map) -> Value {
    if mapping.is_empty() || !content.contains('$') {
        return Value::string(content);
    }

    if let Some(caps) = VARIABLE_RE.captures(content) {
        if caps[0].len() == content.len() {
            if let Some(actual) = mapping.get(&caps[1]) {
                return actual.clone();
            }
        }
    }

    let replaced = VARIABLE_RE.replace_all(content, |caps: &Captures| match mapping.get(&caps[1]) {
        Some(actual) => actual.to_text(),
        None => caps[0].to_string(),
    });
    Value::String(replaced.into_owned())
}
