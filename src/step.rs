//! Test steps: one request with its variables, extraction and validation.
//!
//! ```yaml
//! - test:
//!     name: get user $uid
//!     times: 2
//!     variables:
//!       - uid: 1000
//!     request:
//!       url: /api/users/$uid
//!       method: GET
//!     extract:
//!       - user_name: content.name
//!     validate:
//!       - eq: [status_code, 200]
//!       - {check: content.id, comparator: eq, expect: $uid}
//!     setup_hooks:
//!       - ${sleep_ms(10)}
//! ```

use crate::error::{AteError, Result};
use crate::validate::{Extractor, Validator};
use crate::value::{Map, Value};

/// A fully expanded step, ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub name: String,
    pub variables: Map,
    pub request: Value,
    pub extract: Vec<Extractor>,
    pub validators: Vec<Validator>,
    pub setup_hooks: Vec<Value>,
    pub teardown_hooks: Vec<Value>,
    pub times: u32,
}

impl Step {
    /// Parse a step mapping. Reference keys must already be expanded.
    pub fn from_value(raw: &Value) -> Result<Step> {
        let Value::Map(fields) = raw else {
            return Err(AteError::params(format!(
                "step must be a mapping, got {}",
                raw.type_name()
            )));
        };

        let name = fields.get("name").map(Value::to_text).unwrap_or_default();

        let variables = match fields.get("variables") {
            Some(v) => parse_variables(v)?,
            None => Map::new(),
        };

        let mut validators = Vec::new();
        for key in ["validate", "validators"] {
            if let Some(list) = fields.get(key) {
                validators.extend(Validator::parse_list(list)?);
            }
        }

        let extract = match fields.get("extract") {
            Some(v) => Extractor::parse_list(v)?,
            None => Vec::new(),
        };

        Ok(Step {
            name,
            variables,
            request: fields.get("request").cloned().unwrap_or_default(),
            extract,
            validators,
            setup_hooks: hooks(fields.get("setup_hooks")),
            teardown_hooks: hooks(fields.get("teardown_hooks")),
            times: parse_times(fields.get("times"))?,
        })
    }
}

/// Parse a `variables` block into a mapping.
///
/// Accepts a mapping, or a list of single-key mappings where later entries
/// overwrite earlier ones:
///
/// ```yaml
/// variables:
///   - user_agent: iOS/10.3
///   - os_platform: ios
/// ```
pub fn parse_variables(block: &Value) -> Result<Map> {
    match block {
        Value::Null => Ok(Map::new()),
        Value::Map(map) => Ok(map.clone()),
        Value::Array(items) => {
            let mut variables = Map::new();
            for item in items {
                let Value::Map(entry) = item else {
                    return Err(AteError::params(format!(
                        "variables list entries must be mappings, got {}",
                        item.type_name()
                    )));
                };
                for (name, value) in entry {
                    variables.insert(name.clone(), value.clone());
                }
            }
            Ok(variables)
        }
        other => Err(AteError::params(format!(
            "variables must be a mapping or list, got {}",
            other.type_name()
        ))),
    }
}

fn hooks(block: Option<&Value>) -> Vec<Value> {
    match block {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(single) => vec![single.clone()],
    }
}

fn parse_times(times: Option<&Value>) -> Result<u32> {
    let n = match times {
        None | Some(Value::Null) => return Ok(1),
        Some(Value::Int(n)) => *n,
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| AteError::params(format!("times must be an integer, got '{}'", s)))?,
        Some(other) => {
            return Err(AteError::params(format!(
                "times must be an integer, got {}",
                other.type_name()
            )))
        }
    };
    u32::try_from(n)
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| AteError::params(format!("times must be positive, got {}", n)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_full_step() {
        let step = Step::from_value(&yaml(
            r#"
name: get user
times: 2
variables:
  - uid: 1000
  - token: abc
request:
  url: /api/users/$uid
  method: GET
extract:
  - user_name: content.name
validate:
  - eq: [status_code, 200]
  - {check: content.id, comparator: eq, expect: $uid}
setup_hooks:
  - ${sleep_ms(1)}
"#,
        ))
        .unwrap();

        assert_eq!(step.name, "get user");
        assert_eq!(step.times, 2);
        assert_eq!(step.variables, map! { "uid" => 1000, "token" => "abc" });
        assert_eq!(step.extract.len(), 1);
        assert_eq!(step.validators.len(), 2);
        assert_eq!(step.setup_hooks, vec![Value::string("${sleep_ms(1)}")]);
        assert!(step.teardown_hooks.is_empty());
    }

    #[test]
    fn test_defaults() {
        let step = Step::from_value(&yaml("name: bare")).unwrap();
        assert_eq!(step.times, 1);
        assert!(step.request.is_null());
        assert!(step.variables.is_empty());
    }

    #[test]
    fn test_times_must_be_positive() {
        for bad in ["times: 0", "times: -1", "times: many", "times: [1]"] {
            let err = Step::from_value(&yaml(bad)).unwrap_err();
            assert!(err.is_params_error(), "{}", bad);
        }
    }

    #[test]
    fn test_parse_variables_shapes() {
        assert_eq!(
            parse_variables(&yaml("{a: 1, b: 2}")).unwrap(),
            map! { "a" => 1, "b" => 2 }
        );
        assert_eq!(
            parse_variables(&yaml("[{a: 1}, {a: 3}]")).unwrap(),
            map! { "a" => 3 }
        );
        assert!(parse_variables(&yaml("[1, 2]")).is_err());
        assert!(parse_variables(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_step_must_be_mapping() {
        assert!(Step::from_value(&Value::string("get_user()")).is_err());
    }
}
