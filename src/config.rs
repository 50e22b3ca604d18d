//! Project configuration, read from an optional `ate.toml` at the project root.
//!
//! ```toml
//! api_dir = "tests/api"
//! suite_dir = "tests/suite"
//! module_file = "debugtalk.yml"
//! dot_env = ".env"
//! base_url = "http://127.0.0.1:5000"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AteError, Result};

pub const CONFIG_FILE: &str = "ate.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    /// Directory holding `api:` definitions
    pub api_dir: PathBuf,
    /// Directory holding suite and testcase definitions
    pub suite_dir: PathBuf,
    /// Shared module file name searched in each directory
    pub module_file: String,
    pub dot_env: PathBuf,
    /// Prefix for relative request urls
    pub base_url: Option<String>,
    #[serde(skip)]
    pub root: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        ProjectConfig {
            api_dir: PathBuf::from("tests/api"),
            suite_dir: PathBuf::from("tests/suite"),
            module_file: "debugtalk.yml".to_string(),
            dot_env: PathBuf::from(".env"),
            base_url: None,
            root: PathBuf::from("."),
        }
    }
}

impl ProjectConfig {
    /// Load `<root>/ate.toml` when present, defaults otherwise.
    ///
    /// Relative directories are resolved against `root`.
    pub fn discover(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        let mut config = if path.is_file() {
            let content =
                fs::read_to_string(&path).map_err(|e| AteError::load(path.display().to_string(), e))?;
            toml::from_str::<ProjectConfig>(&content)
                .map_err(|e| AteError::load(path.display().to_string(), e))?
        } else {
            ProjectConfig::default()
        };

        config.root = root.to_path_buf();
        config.api_dir = root.join(&config.api_dir);
        config.suite_dir = root.join(&config.suite_dir);
        config.dot_env = root.join(&config.dot_env);
        Ok(config)
    }
}
