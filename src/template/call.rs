//! Function-call parsing: `name(arg, arg, key=value)`.

use regex::Regex;

use super::literal::coerce;
use crate::error::{AteError, Result};
use crate::value::{Map, Value};

lazy_static::lazy_static! {
    static ref CALL_RE: Regex = Regex::new(r"(?s)^\s*([A-Za-z0-9_]+)\((.*)\)\s*$").unwrap();
    static ref KWARG_KEY_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// A parsed call: callee name, positional args and keyword args.
///
/// Arguments may still hold unresolved `$variable` text; they are resolved
/// in context right before the call is made.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<Value>,
    pub kwargs: Map,
}

impl std::fmt::Display for FunctionCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts: Vec<String> = self.args.iter().map(Value::to_text).collect();
        parts.extend(self.kwargs.iter().map(|(k, v)| format!("{}={}", k, v.to_text())));
        write!(f, "{}({})", self.name, parts.join(", "))
    }
}

/// Parse `name(args)` call text into a [`FunctionCall`].
///
/// ```text
/// func()               => func, [], {}
/// func(1, 2)           => func, [1, 2], {}
/// func(1, 2, a=3, b=4) => func, [1, 2], {a: 3, b: 4}
/// func($var)           => func, ["$var"], {}
/// ```
pub fn parse_function(call_text: &str) -> Result<FunctionCall> {
    let caps = CALL_RE
        .captures(call_text)
        .ok_or_else(|| AteError::params(format!("invalid function call: {}", call_text)))?;

    let name = caps[1].to_string();
    let mut call = FunctionCall {
        name,
        args: Vec::new(),
        kwargs: Map::new(),
    };

    let arg_text = caps[2].trim();
    if arg_text.is_empty() {
        return Ok(call);
    }

    for token in split_top_level(arg_text) {
        let token = token.trim();
        if token.is_empty() {
            return Err(AteError::params(format!(
                "empty argument in function call: {}",
                call_text
            )));
        }
        match split_kwarg(token) {
            Some((key, value)) => {
                call.kwargs.insert(key.to_string(), coerce(value));
            }
            None => call.args.push(coerce(token)),
        }
    }

    Ok(call)
}

/// Split on commas that are not inside quotes or brackets.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// `key=value` at top level, where key is an identifier.
fn split_kwarg(token: &str) -> Option<(&str, &str)> {
    let (key, value) = token.split_once('=')?;
    let key = key.trim();
    if value.starts_with('=') || !KWARG_KEY_RE.is_match(key) {
        return None;
    }
    Some((key, value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map;

    #[test]
    fn test_parse_function_no_args() {
        let call = parse_function("func()").unwrap();
        assert_eq!(call.name, "func");
        assert!(call.args.is_empty());
        assert!(call.kwargs.is_empty());
    }

    #[test]
    fn test_parse_function_mixed_args() {
        let call = parse_function("func(1, 2, a=3, b=4)").unwrap();
        assert_eq!(call.name, "func");
        assert_eq!(call.args, vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(call.kwargs, map! { "a" => 3, "b" => 4 });
    }

    #[test]
    fn test_parse_function_keeps_variable_tokens() {
        let call = parse_function("gen_md5($TOKEN, $data, $random)").unwrap();
        assert_eq!(
            call.args,
            vec![
                Value::string("$TOKEN"),
                Value::string("$data"),
                Value::string("$random")
            ]
        );
    }

    #[test]
    fn test_parse_function_quoted_commas() {
        let call = parse_function("join('a,b', [1, 2], sep=\",\")").unwrap();
        assert_eq!(call.args[0], Value::string("a,b"));
        assert_eq!(call.args[1], Value::Array(vec![1.into(), 2.into()]));
        assert_eq!(call.kwargs.get("sep"), Some(&Value::string(",")));
    }

    #[test]
    fn test_parse_function_rejects_malformed() {
        assert!(parse_function("not a call").unwrap_err().is_params_error());
        assert!(parse_function("func(1,,2)").is_err());
    }

    #[test]
    fn test_display_round_trips_text() {
        let call = parse_function("get_user($uid, limit=5)").unwrap();
        assert_eq!(call.to_string(), "get_user($uid, limit=5)");
    }
}
