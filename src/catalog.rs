//! Definition catalog: reusable api, suite and testcase definitions.
//!
//! Definitions are declared with a call signature in their `def` field and
//! referenced by name from test steps:
//!
//! ```yaml
//! # tests/api/user.yml
//! - api:
//!     def: get_user($uid, $token)
//!     request:
//!       url: /api/users/$uid
//!       headers: {token: $token}
//! ```
//!
//! The catalog is an explicit object rather than process state. It is
//! populated by scanning the api and suite directories, and repopulated on a
//! lookup miss. Entries are only ever added or overwritten.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use walkdir::WalkDir;

use crate::error::{AteError, Result};
use crate::loader::{self, DocumentShape};
use crate::template::extract::VARIABLE_RE;
use crate::template::parse_function;
use crate::value::{Map, Value};

/// What a definition expands into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionKind {
    /// A single request step
    Api,
    /// A list-shaped test file with a `def`
    Suite,
    /// A `{config, teststeps}` document with a `def`
    Testcase,
}

impl DefinitionKind {
    /// The step key that references this kind
    pub fn key(&self) -> &'static str {
        match self {
            DefinitionKind::Api => "api",
            DefinitionKind::Suite => "suite",
            DefinitionKind::Testcase => "testcase",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "api" => Some(DefinitionKind::Api),
            "suite" => Some(DefinitionKind::Suite),
            "testcase" => Some(DefinitionKind::Testcase),
            _ => None,
        }
    }

    fn not_found(&self, name: &str) -> AteError {
        match self {
            DefinitionKind::Api => AteError::ApiNotFound(name.to_string()),
            DefinitionKind::Suite | DefinitionKind::Testcase => {
                AteError::SuiteNotFound(name.to_string())
            }
        }
    }
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A named, parameterized template.
///
/// For `Api` the body is the step mapping without its `def`. For `Suite`
/// and `Testcase` it is `{config: ..., teststeps: [...]}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub kind: DefinitionKind,
    pub name: String,
    /// Formal parameter names, without the `$`
    pub formal_params: Vec<String>,
    pub body: Value,
}

impl Definition {
    /// Build a definition from its declared signature, e.g. `get_user($uid)`.
    pub fn from_signature(kind: DefinitionKind, signature: &str, body: Value) -> Result<Self> {
        let call = parse_function(signature)?;
        if !call.kwargs.is_empty() {
            return Err(AteError::params(format!(
                "definition '{}' cannot declare keyword parameters",
                signature
            )));
        }

        let mut formal_params = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            formal_params.push(formal_name(arg).ok_or_else(|| {
                AteError::params(format!(
                    "formal parameter '{}' in '{}' must be a $name token",
                    arg.to_text(),
                    signature
                ))
            })?);
        }

        Ok(Definition {
            kind,
            name: call.name,
            formal_params,
            body,
        })
    }
}

fn formal_name(arg: &Value) -> Option<String> {
    let text = arg.as_str()?;
    let caps = VARIABLE_RE.captures(text)?;
    (caps[0].len() == text.len()).then(|| caps[1].to_string())
}

type Key = (DefinitionKind, String);

/// Lazily populated store of definitions, keyed by kind and name.
#[derive(Debug, Default)]
pub struct DefinitionCatalog {
    api_dir: Option<PathBuf>,
    suite_dir: Option<PathBuf>,
    entries: Mutex<HashMap<Key, Arc<Definition>>>,
}

impl DefinitionCatalog {
    pub fn new(api_dir: impl Into<PathBuf>, suite_dir: impl Into<PathBuf>) -> Self {
        DefinitionCatalog {
            api_dir: Some(api_dir.into()),
            suite_dir: Some(suite_dir.into()),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// A catalog with no directories; only `insert` adds entries.
    pub fn empty() -> Self {
        DefinitionCatalog::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Key, Arc<Definition>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Scan both directories, adding or overwriting definitions by name.
    ///
    /// Returns the number of definitions found in this scan. Missing
    /// directories are skipped.
    pub fn populate(&self) -> Result<usize> {
        let mut found = Vec::new();

        if let Some(dir) = &self.api_dir {
            for path in definition_files(dir) {
                found.extend(load_api_file(&path)?);
            }
        }
        if let Some(dir) = &self.suite_dir {
            for path in definition_files(dir) {
                found.extend(load_suite_file(&path)?);
            }
        }

        let count = found.len();
        let mut entries = self.lock();
        for def in found {
            entries.insert((def.kind, def.name.clone()), Arc::new(def));
        }
        tracing::debug!(found = count, total = entries.len(), "populated definition catalog");
        Ok(count)
    }

    /// Add or overwrite one definition.
    pub fn insert(&self, def: Definition) {
        self.lock().insert((def.kind, def.name.clone()), Arc::new(def));
    }

    /// Fetch a definition, rescanning once if it is not known yet.
    ///
    /// # Errors
    /// `ApiNotFound` for apis, `SuiteNotFound` for suites and testcases.
    pub fn get(&self, kind: DefinitionKind, name: &str) -> Result<Arc<Definition>> {
        if let Some(def) = self.lookup(kind, name) {
            return Ok(def);
        }

        self.populate()?;
        self.lookup(kind, name).ok_or_else(|| kind.not_found(name))
    }

    fn lookup(&self, kind: DefinitionKind, name: &str) -> Option<Arc<Definition>> {
        self.lock().get(&(kind, name.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn definition_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| loader::is_data_file(path))
        .collect();
    files.sort();
    files
}

/// Every `api:` block with a `def` in one file.
fn load_api_file(path: &Path) -> Result<Vec<Definition>> {
    let content = loader::load_file(path)?;
    let items: Vec<&Value> = match &content {
        Value::Array(items) => items.iter().collect(),
        Value::Map(_) => vec![&content],
        _ => Vec::new(),
    };

    let mut defs = Vec::new();
    for item in items {
        let Some(Value::Map(block)) = item.get("api") else {
            continue;
        };
        let Some(signature) = block.get("def").and_then(Value::as_str) else {
            tracing::warn!(path = %path.display(), "api block without def skipped");
            continue;
        };

        let mut body = block.clone();
        body.shift_remove("def");
        let def = Definition::from_signature(DefinitionKind::Api, signature, Value::Map(body))
            .map_err(|e| AteError::load(path.display().to_string(), e))?;
        defs.push(def);
    }
    Ok(defs)
}

/// A suite-directory file declaring `config.def`, if it does.
fn load_suite_file(path: &Path) -> Result<Option<Definition>> {
    let content = loader::load_file(path)?;
    let Some(doc) = loader::parse_document(&content, path)? else {
        return Ok(None);
    };
    let Some(signature) = doc.config.get("def").and_then(Value::as_str) else {
        return Ok(None);
    };

    let kind = match doc.shape {
        DocumentShape::ItemList => DefinitionKind::Suite,
        DocumentShape::TestSteps => DefinitionKind::Testcase,
    };

    let mut body = Map::new();
    body.insert("config".to_string(), doc.config.clone());
    body.insert("teststeps".to_string(), Value::Array(doc.steps));

    Definition::from_signature(kind, signature, Value::Map(body))
        .map(Some)
        .map_err(|e| AteError::load(path.display().to_string(), e))
}
