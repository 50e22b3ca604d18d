//! Registered functions callable from `${name(args)}` tokens.
//!
//! Every function takes `(args, kwargs)` and returns a [`Value`]. Test files
//! and shared modules bind them by name (optionally under an alias); the
//! defaults cover the usual signing and data-generation helpers.

use hmac::{Hmac, Mac};
use indexmap::IndexMap;
use md5::Md5;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AteError, Result};
use crate::scope::Callable;
use crate::value::{Map, Value};

/// Key used by `get_sign`
pub const SIGN_KEY: &str = "DebugTalk";

/// Table of named functions available to test files.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: IndexMap<String, Callable>,
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        FunctionRegistry::default()
    }

    /// A registry holding the default helper functions.
    pub fn with_builtins() -> Self {
        let mut registry = FunctionRegistry::new();

        // gen_random_string(n) -> String - n random ascii letters and digits
        registry.register("gen_random_string", |args, kwargs| {
            let len = int_arg(args, kwargs, 0, "str_len")?.unwrap_or(8);
            if len < 0 {
                return Err(AteError::params("gen_random_string() length must be >= 0"));
            }
            let s: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(len as usize)
                .map(char::from)
                .collect();
            Ok(Value::String(s))
        });

        // gen_md5(*args) -> String - md5 of the joined arguments
        registry.register("gen_md5", |args, _| {
            let mut hasher = Md5::new();
            hasher.update(join_args(args).as_bytes());
            Ok(Value::String(hex::encode(hasher.finalize())))
        });

        // sha256(*args) -> String
        registry.register("sha256", |args, _| {
            let mut hasher = Sha256::new();
            hasher.update(join_args(args).as_bytes());
            Ok(Value::String(hex::encode(hasher.finalize())))
        });

        // get_sign(*args) -> String - HMAC-SHA1 of the joined arguments
        registry.register("get_sign", |args, _| {
            type HmacSha1 = Hmac<Sha1>;
            let mut mac = HmacSha1::new_from_slice(SIGN_KEY.as_bytes())
                .map_err(|e| AteError::params(format!("HMAC error: {}", e)))?;
            mac.update(join_args(args).as_bytes());
            Ok(Value::String(hex::encode(mac.finalize().into_bytes())))
        });

        // hmac_sha256(key, *args) -> String
        registry.register("hmac_sha256", |args, _| {
            let (key, rest) = args
                .split_first()
                .ok_or_else(|| AteError::params("hmac_sha256() requires a key"))?;
            type HmacSha256 = Hmac<Sha256>;
            let mut mac = HmacSha256::new_from_slice(key.to_text().as_bytes())
                .map_err(|e| AteError::params(format!("HMAC error: {}", e)))?;
            mac.update(join_args(rest).as_bytes());
            Ok(Value::String(hex::encode(mac.finalize().into_bytes())))
        });

        // get_timestamp(len=13) -> String - current time, first `len` digits
        registry.register("get_timestamp", |args, kwargs| {
            let len = int_arg(args, kwargs, 0, "str_len")?.unwrap_or(13);
            if !(1..=16).contains(&len) {
                return Err(AteError::params(format!(
                    "get_timestamp() length must be 1-16, got {}",
                    len
                )));
            }
            let micros = chrono::Utc::now().timestamp_micros().to_string();
            Ok(Value::String(micros.chars().take(len as usize).collect()))
        });

        // uuid4() -> String
        registry.register("uuid4", |_, _| Ok(Value::String(Uuid::new_v4().to_string())));

        // ENV(name) -> String - process environment variable
        registry.register("ENV", |args, _| {
            let name = args
                .first()
                .map(Value::to_text)
                .ok_or_else(|| AteError::params("ENV() requires a variable name"))?;
            std::env::var(&name)
                .map(Value::String)
                .map_err(|_| AteError::VariableNotFound(name))
        });

        // sleep_ms(n) - pause, for setup/teardown hooks
        registry.register("sleep_ms", |args, kwargs| {
            let ms = int_arg(args, kwargs, 0, "ms")?.unwrap_or(0).max(0);
            std::thread::sleep(std::time::Duration::from_millis(ms as u64));
            Ok(Value::Null)
        });

        registry
    }

    /// Register (or replace) a function under `name`.
    pub fn register<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&[Value], &Map) -> Result<Value> + Send + Sync + 'static,
    {
        self.functions
            .insert(name.to_string(), Callable::new(name, func));
    }

    pub fn get(&self, name: &str) -> Option<&Callable> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// The function registered as `target`, bound under `alias`.
    pub fn alias(&self, alias: &str, target: &str) -> Result<Callable> {
        self.get(target)
            .map(|func| func.renamed(alias))
            .ok_or_else(|| AteError::FunctionNotFound(target.to_string()))
    }

    /// Bind a `functions:` block: every alias resolved to its callable.
    pub fn bind(&self, aliases: &IndexMap<String, String>) -> Result<IndexMap<String, Callable>> {
        aliases
            .iter()
            .map(|(alias, target)| Ok((alias.clone(), self.alias(alias, target)?)))
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

/// Parse a `functions:` block into alias -> registered name.
///
/// ```yaml
/// functions:            # mapping form
///   sign: get_sign
/// functions:            # list form, each name bound as itself
///   - gen_md5
/// ```
pub fn parse_function_aliases(block: &Value) -> Result<IndexMap<String, String>> {
    match block {
        Value::Null => Ok(IndexMap::new()),
        Value::Map(map) => map
            .iter()
            .map(|(alias, target)| match target {
                Value::String(name) => Ok((alias.clone(), name.clone())),
                Value::Null => Ok((alias.clone(), alias.clone())),
                other => Err(AteError::params(format!(
                    "function alias '{}' must name a function, got {}",
                    alias,
                    other.type_name()
                ))),
            })
            .collect(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(name) => Ok((name.clone(), name.clone())),
                other => Err(AteError::params(format!(
                    "function list entries must be names, got {}",
                    other.type_name()
                ))),
            })
            .collect(),
        other => Err(AteError::params(format!(
            "functions block must be a mapping or list, got {}",
            other.type_name()
        ))),
    }
}

fn join_args(args: &[Value]) -> String {
    args.iter().map(Value::to_text).collect()
}

/// Integer argument by position, or by keyword.
fn int_arg(args: &[Value], kwargs: &Map, pos: usize, key: &str) -> Result<Option<i64>> {
    let Some(value) = args.get(pos).or_else(|| kwargs.get(key)) else {
        return Ok(None);
    };
    match value {
        Value::Int(n) => Ok(Some(*n)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| AteError::params(format!("expected an integer for {}, got '{}'", key, s))),
        other => Err(AteError::params(format!(
            "expected an integer for {}, got {}",
            key,
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> Result<Value> {
        FunctionRegistry::with_builtins()
            .get(name)
            .unwrap()
            .call(args, &Map::new())
    }

    #[test]
    fn test_gen_md5_joins_args() {
        assert_eq!(
            call("gen_md5", &["a".into(), "bc".into()]).unwrap(),
            Value::string("900150983cd24fb0d6963f7d28e17f72")
        );
    }

    #[test]
    fn test_sha256() {
        assert_eq!(
            call("sha256", &["hello".into()]).unwrap(),
            Value::string("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
    }

    #[test]
    fn test_get_sign_is_hex_sha1() {
        let sign = call("get_sign", &["iOS".into(), "10.3".into(), 12345.into()]).unwrap();
        let text = sign.as_str().unwrap();
        assert_eq!(text.len(), 40);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit()));
        // deterministic for the same input
        assert_eq!(
            sign,
            call("get_sign", &["iOS10.3".into(), "12345".into()]).unwrap()
        );
    }

    #[test]
    fn test_gen_random_string_length() {
        let s = call("gen_random_string", &[5.into()]).unwrap();
        assert_eq!(s.as_str().unwrap().len(), 5);
        assert!(call("gen_random_string", &[Value::Bool(true)]).is_err());
    }

    #[test]
    fn test_get_timestamp_length() {
        assert_eq!(call("get_timestamp", &[]).unwrap().as_str().unwrap().len(), 13);
        assert_eq!(call("get_timestamp", &[10.into()]).unwrap().as_str().unwrap().len(), 10);
        assert!(call("get_timestamp", &[17.into()]).unwrap_err().is_params_error());
    }

    #[test]
    fn test_env_lookup() {
        std::env::set_var("ATE_BUILTINS_TEST_VAR", "on");
        assert_eq!(
            call("ENV", &["ATE_BUILTINS_TEST_VAR".into()]).unwrap(),
            Value::string("on")
        );
        assert!(matches!(
            call("ENV", &["ATE_BUILTINS_UNSET_VAR".into()]),
            Err(AteError::VariableNotFound(_))
        ));
    }

    #[test]
    fn test_alias_and_parse() {
        let registry = FunctionRegistry::with_builtins();
        let aliases = parse_function_aliases(&Value::Map(crate::map! { "md5" => "gen_md5" })).unwrap();
        let bound = registry.bind(&aliases).unwrap();
        assert_eq!(bound["md5"].name(), "md5");

        let list = parse_function_aliases(&Value::Array(vec!["uuid4".into()])).unwrap();
        assert_eq!(list["uuid4"], "uuid4");

        assert!(matches!(
            registry.alias("x", "func_not_exist"),
            Err(AteError::FunctionNotFound(_))
        ));
        assert!(parse_function_aliases(&Value::Int(1)).is_err());
    }
}
