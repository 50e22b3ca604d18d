//! `.env` file loading.
//!
//! Each non-empty, non-comment line is `KEY=VALUE` (or `KEY: VALUE`). Loaded
//! entries are exported to the process environment, where `$KEY` lookups
//! and `${ENV(KEY)}` calls find them.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;

use crate::error::{AteError, Result};

/// Parse `.env` content into ordered key/value pairs.
pub fn parse_dot_env(content: &str) -> Result<IndexMap<String, String>> {
    let mut vars = IndexMap::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        // Skip comments and empty lines
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let Some((key, value)) = line.split_once('=').or_else(|| line.split_once(':')) else {
            return Err(AteError::params(format!(
                ".env line {} is not KEY=VALUE: {}",
                lineno + 1,
                line
            )));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(AteError::params(format!(".env line {} has no key", lineno + 1)));
        }
        vars.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    Ok(vars)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Load a `.env` file and export its entries to the process environment.
///
/// Returns the loaded entries.
pub fn load_dot_env(path: &Path) -> Result<IndexMap<String, String>> {
    let content =
        fs::read_to_string(path).map_err(|e| AteError::load(path.display().to_string(), e))?;
    let vars = parse_dot_env(&content)?;
    for (key, value) in &vars {
        std::env::set_var(key, value);
    }
    tracing::debug!(path = %path.display(), count = vars.len(), "loaded .env");
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dot_env() {
        let vars = parse_dot_env(
            "# comment\nUserName=debugtalk\n\nPASSWORD = \"p@ss=word\"\nexport BASE_URL: http://127.0.0.1:5000\n",
        )
        .unwrap();
        assert_eq!(vars["UserName"], "debugtalk");
        assert_eq!(vars["PASSWORD"], "p@ss=word");
        assert_eq!(vars["BASE_URL"], "http://127.0.0.1:5000");
    }

    #[test]
    fn test_parse_dot_env_rejects_garbage() {
        assert!(parse_dot_env("just words").is_err());
        assert!(parse_dot_env("=value").is_err());
    }

    #[test]
    fn test_load_dot_env_exports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "ATE_ENV_TEST_TOKEN=abc123\n").unwrap();
        load_dot_env(&path).unwrap();
        assert_eq!(std::env::var("ATE_ENV_TEST_TOKEN").unwrap(), "abc123");
        assert!(load_dot_env(&dir.path().join("missing.env")).is_err());
    }
}
