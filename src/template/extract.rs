//! Token extraction: `$name` variables and `${name(args)}` function calls.

use regex::Regex;

use crate::value::Value;

lazy_static::lazy_static! {
    pub(crate) static ref VARIABLE_RE: Regex = Regex::new(r"\$([A-Za-z0-9_]+)").unwrap();
    pub(crate) static ref FUNCTION_RE: Regex =
        Regex::new(r"\$\{([A-Za-z0-9_]+\([^{}]*\))\}").unwrap();
}

/// All variable names referenced in `content`, left to right.
///
/// Duplicates are kept: `/$u/x/$u` yields `["u", "u"]`. Non-string content
/// has no variables.
pub fn extract_variables(content: &Value) -> Vec<String> {
    match content {
        Value::String(s) => extract_variables_str(s),
        _ => Vec::new(),
    }
}

pub fn extract_variables_str(content: &str) -> Vec<String> {
    VARIABLE_RE
        .captures_iter(content)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// All function-call tokens in `content`, as their inner `name(args)` text.
pub fn extract_functions(content: &Value) -> Vec<String> {
    match content {
        Value::String(s) => extract_functions_str(s),
        _ => Vec::new(),
    }
}

pub fn extract_functions_str(content: &str) -> Vec<String> {
    FUNCTION_RE
        .captures_iter(content)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Whether a string contains anything the resolver would act on.
pub fn has_tokens(content: &str) -> bool {
    content.contains('$') && (VARIABLE_RE.is_match(content) || FUNCTION_RE.is_match(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(s: &str) -> Vec<String> {
        extract_variables(&Value::string(s))
    }

    #[test]
    fn test_extract_variables() {
        assert_eq!(vars("$var"), vec!["var"]);
        assert_eq!(vars("$var123"), vec!["var123"]);
        assert_eq!(vars("$var_name"), vec!["var_name"]);
        assert!(vars("var").is_empty());
        assert_eq!(vars("a$var"), vec!["var"]);
        assert_eq!(vars("$v ar"), vec!["v"]);
        assert!(vars(" ").is_empty());
        assert_eq!(vars("$abc*"), vec!["abc"]);
        assert!(vars("${func()}").is_empty());
        assert!(vars("${func(1,2)}").is_empty());
        assert_eq!(
            vars("${gen_md5($TOKEN, $data, $random)}"),
            vec!["TOKEN", "data", "random"]
        );
    }

    #[test]
    fn test_extract_variables_keeps_duplicates() {
        assert_eq!(
            vars("/users/$u/training/$d?userId=$u&data=$d"),
            vec!["u", "d", "u", "d"]
        );
    }

    #[test]
    fn test_extract_variables_non_string() {
        assert!(extract_variables(&Value::Int(5)).is_empty());
        assert!(extract_variables(&Value::Null).is_empty());
    }

    #[test]
    fn test_extract_functions() {
        let funcs = |s: &str| extract_functions(&Value::string(s));
        assert_eq!(funcs("${func()}"), vec!["func()"]);
        assert_eq!(funcs("${func(5)}"), vec!["func(5)"]);
        assert_eq!(funcs("${func(a=1, b=2)}"), vec!["func(a=1, b=2)"]);
        assert_eq!(
            funcs("/api/1000?_t=${get_timestamp()}"),
            vec!["get_timestamp()"]
        );
        assert_eq!(
            funcs("/api/${add(1, 2)}?_t=${get_timestamp()}"),
            vec!["add(1, 2)", "get_timestamp()"]
        );
        assert_eq!(
            funcs("abc${gen_md5($TOKEN, $data, $random)}xyz"),
            vec!["gen_md5($TOKEN, $data, $random)"]
        );
        assert!(funcs("$var").is_empty());
    }

    #[test]
    fn test_has_tokens() {
        assert!(has_tokens("a$b"));
        assert!(has_tokens("${f()}"));
        assert!(!has_tokens("plain"));
        assert!(!has_tokens("$ alone"));
    }
}
