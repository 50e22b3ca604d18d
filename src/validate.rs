//! Queries over response-shaped data and the comparator table.

use regex::Regex;
use serde::Serialize;

use crate::error::{AteError, Result};
use crate::value::{Map, Value};

/// Walk `data` along `path`, split on `delimiter`.
///
/// A segment indexes a sequence (or a string's characters) when it is an
/// integer. Delimiters at either end of the path are ignored; an empty path
/// yields `Null`.
///
/// # Errors
/// `ParseResponse` for a missing key, an out-of-range index, a step into a
/// scalar, or an empty string root.
pub fn query(data: &Value, path: &str, delimiter: &str) -> Result<Value> {
    let trimmed = if delimiter.is_empty() {
        path
    } else {
        path.trim_matches(|c: char| delimiter.contains(c))
    };
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    if matches!(data, Value::String(s) if s.is_empty()) {
        return Err(AteError::bad_query(path, "response content is empty"));
    }

    let segments: Vec<&str> = if delimiter.is_empty() {
        vec![trimmed]
    } else {
        trimmed.split(delimiter).collect()
    };

    let mut node = data.clone();
    for segment in segments {
        node = step_into(&node, segment).map_err(|message| AteError::bad_query(path, message))?;
    }
    Ok(node)
}

fn step_into(node: &Value, segment: &str) -> std::result::Result<Value, String> {
    match node {
        Value::Map(map) => map
            .get(segment)
            .cloned()
            .ok_or_else(|| format!("key '{}' not found", segment)),
        Value::Array(items) => {
            let index = parse_index(segment, items.len())?;
            Ok(items[index].clone())
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let index = parse_index(segment, chars.len())?;
            Ok(Value::String(chars[index].to_string()))
        }
        other => Err(format!(
            "cannot look up '{}' in {} value",
            segment,
            other.type_name()
        )),
    }
}

/// A negative index counts from the end: `-1` is the last element.
fn parse_index(segment: &str, len: usize) -> std::result::Result<usize, String> {
    let raw = segment
        .parse::<i64>()
        .map_err(|_| format!("'{}' is not a valid index", segment))?;
    let index = if raw < 0 { len as i64 + raw } else { raw };
    if index < 0 || index >= len as i64 {
        return Err(format!("index {} out of range (len {})", raw, len));
    }
    Ok(index as usize)
}

/// Canonical comparator names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equals,
    StringEquals,
    NotEquals,
    LessThan,
    LessOrEquals,
    GreaterThan,
    GreaterOrEquals,
    LengthEquals,
    LengthGreaterThan,
    LengthGreaterOrEquals,
    LengthLessThan,
    LengthLessOrEquals,
    StringLength,
    Contains,
    ContainedBy,
    RegexMatch,
    RegexSearch,
    StartsWith,
    EndsWith,
}

impl Comparator {
    /// Look up a comparator by name or alias.
    pub fn parse(name: &str) -> Result<Self> {
        let op = match name.trim() {
            "eq" | "equals" | "==" | "is" => Comparator::Equals,
            "str_eq" | "string_equals" => Comparator::StringEquals,
            "ne" | "not_equals" | "!=" => Comparator::NotEquals,
            "lt" | "less_than" | "<" => Comparator::LessThan,
            "le" | "less_than_or_equals" | "<=" => Comparator::LessOrEquals,
            "gt" | "greater_than" | ">" => Comparator::GreaterThan,
            "ge" | "greater_than_or_equals" | ">=" => Comparator::GreaterOrEquals,
            "len_eq" | "length_equal" | "length_equals" | "count_eq" => Comparator::LengthEquals,
            "len_gt" | "count_gt" | "length_greater_than" | "count_greater_than" => {
                Comparator::LengthGreaterThan
            }
            "len_ge" | "count_ge" | "length_greater_than_or_equals"
            | "count_greater_than_or_equals" => Comparator::LengthGreaterOrEquals,
            "len_lt" | "count_lt" | "length_less_than" | "count_less_than" => {
                Comparator::LengthLessThan
            }
            "len_le" | "count_le" | "length_less_than_or_equals" | "count_less_than_or_equals" => {
                Comparator::LengthLessOrEquals
            }
            "str_len" | "string_length" => Comparator::StringLength,
            "contains" => Comparator::Contains,
            "contained_by" => Comparator::ContainedBy,
            "regex" | "regex_match" => Comparator::RegexMatch,
            "regex_search" => Comparator::RegexSearch,
            "startswith" | "starts_with" => Comparator::StartsWith,
            "endswith" | "ends_with" => Comparator::EndsWith,
            other => {
                return Err(AteError::params(format!("unsupported comparator: {}", other)));
            }
        };
        Ok(op)
    }
}

/// Compare `actual` against `expected` with the named comparator.
///
/// ```text
/// match_expected(1, 1, "eq")            => true
/// match_expected("abc", 3, "len_eq")    => true
/// match_expected(12345, 45, "endswith") => true
/// ```
///
/// Values that cannot be compared (ordering a string against a number,
/// the length of an int) give `Ok(false)`.
///
/// # Errors
/// `Params` for an unknown comparator or an invalid regex.
pub fn match_expected(actual: &Value, expected: &Value, comparator: &str) -> Result<bool> {
    let op = Comparator::parse(comparator)?;
    compare(op, actual, expected)
}

fn compare(op: Comparator, actual: &Value, expected: &Value) -> Result<bool> {
    let passed = match op {
        Comparator::Equals => actual.loose_eq(expected),
        Comparator::StringEquals => actual.to_text() == expected.to_text(),
        Comparator::NotEquals => !actual.loose_eq(expected),
        Comparator::LessThan => order(actual, expected).map_or(false, |o| o.is_lt()),
        Comparator::LessOrEquals => order(actual, expected).map_or(false, |o| o.is_le()),
        Comparator::GreaterThan => order(actual, expected).map_or(false, |o| o.is_gt()),
        Comparator::GreaterOrEquals => order(actual, expected).map_or(false, |o| o.is_ge()),
        Comparator::LengthEquals => length_cmp(length(actual), expected, |a, e| a == e),
        Comparator::LengthGreaterThan => length_cmp(length(actual), expected, |a, e| a > e),
        Comparator::LengthGreaterOrEquals => length_cmp(length(actual), expected, |a, e| a >= e),
        Comparator::LengthLessThan => length_cmp(length(actual), expected, |a, e| a < e),
        Comparator::LengthLessOrEquals => length_cmp(length(actual), expected, |a, e| a <= e),
        Comparator::StringLength => {
            let len = (!actual.is_null()).then(|| actual.to_text().chars().count());
            length_cmp(len, expected, |a, e| a == e)
        }
        Comparator::Contains => contains(actual, expected),
        Comparator::ContainedBy => contains(expected, actual),
        Comparator::RegexMatch => regex_check(actual, expected, true)?,
        Comparator::RegexSearch => regex_check(actual, expected, false)?,
        Comparator::StartsWith => scalar_text(actual)
            .zip(scalar_text(expected))
            .map_or(false, |(a, e)| a.starts_with(&e)),
        Comparator::EndsWith => scalar_text(actual)
            .zip(scalar_text(expected))
            .map_or(false, |(a, e)| a.ends_with(&e)),
    };
    Ok(passed)
}

fn order(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        Value::Map(map) => Some(map.len()),
        _ => None,
    }
}

fn length_cmp(len: Option<usize>, expected: &Value, cmp: impl Fn(i64, i64) -> bool) -> bool {
    let expected = match expected {
        Value::String(s) => s.trim().parse::<i64>().ok(),
        other => other.as_i64(),
    };
    match (len, expected) {
        (Some(len), Some(expected)) => cmp(len as i64, expected),
        _ => false,
    }
}

fn contains(container: &Value, item: &Value) -> bool {
    match container {
        Value::String(s) => scalar_text(item).map_or(false, |t| s.contains(&t)),
        Value::Array(items) => items.iter().any(|x| x.loose_eq(item)),
        Value::Map(map) => item.as_str().map_or(false, |k| map.contains_key(k)),
        _ => false,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(_) | Value::Int(_) | Value::Float(_) | Value::Bool(_) => {
            Some(value.to_text())
        }
        _ => None,
    }
}

fn regex_check(actual: &Value, pattern: &Value, anchored: bool) -> Result<bool> {
    let Some(pattern) = pattern.as_str() else {
        return Ok(false);
    };
    let source = if anchored {
        format!("^(?:{})", pattern)
    } else {
        pattern.to_string()
    };
    let re = Regex::new(&source)
        .map_err(|e| AteError::params(format!("invalid regex '{}': {}", pattern, e)))?;
    Ok(scalar_text(actual).map_or(false, |text| re.is_match(&text)))
}

/// One validation rule: compare the value at `check` with `expected`.
#[derive(Debug, Clone, PartialEq)]
pub struct Validator {
    /// Query path into the response, or a template
    pub check: Value,
    pub comparator: String,
    pub expected: Value,
}

impl Validator {
    /// Parse either form:
    ///
    /// ```yaml
    /// - eq: [status_code, 200]
    /// - {check: status_code, comparator: eq, expect: 200}
    /// ```
    pub fn from_value(raw: &Value) -> Result<Self> {
        let Value::Map(map) = raw else {
            return Err(AteError::params(format!(
                "validator must be a mapping, got {}",
                raw.type_name()
            )));
        };

        if let Some(check) = map.get("check") {
            let comparator = map
                .get("comparator")
                .map(Value::to_text)
                .unwrap_or_else(|| "eq".to_string());
            Comparator::parse(&comparator)?;
            let expected = map
                .get("expect")
                .or_else(|| map.get("expected"))
                .cloned()
                .unwrap_or_default();
            return Ok(Validator {
                check: check.clone(),
                comparator,
                expected,
            });
        }

        if map.len() != 1 {
            return Err(AteError::params(format!(
                "validator must have one comparator key: {}",
                raw
            )));
        }
        let Some((comparator, args)) = map.iter().next() else {
            return Err(AteError::params("empty validator"));
        };
        Comparator::parse(comparator)?;
        match args.as_array().map(Vec::as_slice) {
            Some([check, expected]) => Ok(Validator {
                check: check.clone(),
                comparator: comparator.clone(),
                expected: expected.clone(),
            }),
            _ => Err(AteError::params(format!(
                "validator '{}' needs [check, expected], got {}",
                comparator, args
            ))),
        }
    }

    pub fn parse_list(raw: &Value) -> Result<Vec<Self>> {
        match raw {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => items.iter().map(Validator::from_value).collect(),
            other => Ok(vec![Validator::from_value(other)?]),
        }
    }

    /// Compare an already-resolved `actual` and `expected`.
    pub fn evaluate(&self, actual: Value, expected: Value) -> Result<ValidatorResult> {
        let passed = match_expected(&actual, &expected, &self.comparator)?;
        Ok(ValidatorResult {
            check: self.check.to_text(),
            comparator: self.comparator.clone(),
            expected,
            actual,
            passed,
        })
    }
}

/// Outcome of one validator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatorResult {
    pub check: String,
    pub comparator: String,
    pub expected: Value,
    pub actual: Value,
    pub passed: bool,
}

impl ValidatorResult {
    /// Human readable mismatch description
    pub fn describe(&self) -> String {
        format!(
            "{} {} {} (actual: {})",
            self.check,
            self.comparator,
            self.expected.to_text(),
            self.actual.to_text()
        )
    }
}

/// Bind the value at `query_path` to `var_name`.
#[derive(Debug, Clone, PartialEq)]
pub struct Extractor {
    pub var_name: String,
    pub query_path: String,
}

impl Extractor {
    /// Parse `[{name: path}, ...]` or `{name: path, ...}`.
    pub fn parse_list(raw: &Value) -> Result<Vec<Self>> {
        match raw {
            Value::Null => Ok(Vec::new()),
            Value::Map(map) => Ok(Self::from_map(map)),
            Value::Array(items) => {
                let mut extractors = Vec::new();
                for item in items {
                    let Value::Map(map) = item else {
                        return Err(AteError::params(format!(
                            "extract entries must be mappings, got {}",
                            item.type_name()
                        )));
                    };
                    extractors.extend(Self::from_map(map));
                }
                Ok(extractors)
            }
            other => Err(AteError::params(format!(
                "extract must be a mapping or list, got {}",
                other.type_name()
            ))),
        }
    }

    fn from_map(map: &Map) -> Vec<Self> {
        map.iter()
            .map(|(name, path)| Extractor {
                var_name: name.clone(),
                query_path: path.to_text(),
            })
            .collect()
    }
}
