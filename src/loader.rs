//! Test file loading: YAML/JSON documents into testsets.
//!
//! Two layouts are accepted. A list of `config` / `test` items:
//!
//! ```yaml
//! - config:
//!     name: smoke
//!     variables: {uid: 1000}
//! - test:
//!     name: get user
//!     api: get_user($uid)
//! ```
//!
//! or a mapping with `config` and `teststeps`:
//!
//! ```yaml
//! config: {name: smoke}
//! teststeps:
//!   - name: get user
//!     api: get_user(1000)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{AteError, Result};
use crate::value::{deep_update, Map, Value};

/// Load and parse one `.yml`, `.yaml` or `.json` file.
pub fn load_file(path: &Path) -> Result<Value> {
    let display = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|e| AteError::load(&display, e))?;
    if content.trim().is_empty() {
        return Ok(Value::Null);
    }

    match extension(path).as_deref() {
        Some("yml") | Some("yaml") => {
            serde_yaml::from_str(&content).map_err(|e| AteError::load(&display, e))
        }
        Some("json") => serde_json::from_str(&content).map_err(|e| AteError::load(&display, e)),
        _ => Err(AteError::params(format!(
            "unsupported file type (expected .yml, .yaml or .json): {}",
            display
        ))),
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Whether `path` has a data file extension
pub fn is_data_file(path: &Path) -> bool {
    matches!(extension(path).as_deref(), Some("yml" | "yaml" | "json"))
}

/// Which layout a document uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentShape {
    /// `- config: ...` / `- test: ...`
    ItemList,
    /// `{config: ..., teststeps: [...]}`
    TestSteps,
}

/// A test document split into its config block and raw steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub config: Value,
    pub steps: Vec<Value>,
    pub shape: DocumentShape,
}

/// Split loaded content into config and steps.
///
/// Returns `None` for content that is not a test document, such as shared
/// module files or api definition files.
pub fn parse_document(content: &Value, path: &Path) -> Result<Option<Document>> {
    match content {
        Value::Array(items) => {
            let mut config = Map::new();
            let mut steps = Vec::new();
            let mut is_test_document = false;

            for item in items {
                let Value::Map(block) = item else {
                    return Err(AteError::load(
                        path.display().to_string(),
                        format!("expected config/test items, got {}", item.type_name()),
                    ));
                };
                if let Some(c) = block.get("config") {
                    is_test_document = true;
                    if let Value::Map(c) = c {
                        deep_update(&mut config, c);
                    }
                }
                if let Some(test) = block.get("test") {
                    is_test_document = true;
                    steps.push(test.clone());
                }
            }

            Ok(is_test_document.then_some(Document {
                config: Value::Map(config),
                steps,
                shape: DocumentShape::ItemList,
            }))
        }
        Value::Map(map) if map.contains_key("teststeps") || map.contains_key("config") => {
            let steps = match map.get("teststeps") {
                Some(Value::Array(steps)) => steps.clone(),
                None | Some(Value::Null) => Vec::new(),
                Some(other) => {
                    return Err(AteError::load(
                        path.display().to_string(),
                        format!("teststeps must be a list, got {}", other.type_name()),
                    ))
                }
            };
            let config = match map.get("config") {
                Some(Value::Map(c)) => Value::Map(c.clone()),
                _ => Value::Map(Map::new()),
            };
            Ok(Some(Document {
                config,
                steps,
                shape: DocumentShape::TestSteps,
            }))
        }
        _ => Ok(None),
    }
}

/// The `config` blocks declared by a document, in order.
pub fn config_blocks(content: &Value) -> Vec<&Value> {
    match content {
        Value::Array(items) => items.iter().filter_map(|item| item.get("config")).collect(),
        Value::Map(_) => content.get("config").into_iter().collect(),
        _ => Vec::new(),
    }
}

/// One test file ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct Testset {
    pub name: String,
    pub path: PathBuf,
    pub config: Value,
    pub steps: Vec<Value>,
}

impl Testset {
    fn from_document(path: &Path, doc: Document) -> Self {
        let name = doc
            .config
            .get("name")
            .map(Value::to_text)
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_default();
        Testset {
            name,
            path: path.to_path_buf(),
            config: doc.config,
            steps: doc.steps,
        }
    }

    /// Definitions (`config.def`) are only run through references.
    pub fn is_definition(&self) -> bool {
        self.config.get("def").is_some()
    }
}

/// Load every testset under `path`, a file or a directory.
///
/// Directories are walked recursively in path order. Shared module files,
/// definitions and documents without steps are skipped.
pub fn load_testsets(path: &Path, module_file: &str) -> Result<Vec<Testset>> {
    if !path.exists() {
        return Err(AteError::load(path.display().to_string(), "no such file or directory"));
    }

    let files: Vec<PathBuf> = if path.is_dir() {
        let mut files: Vec<PathBuf> = WalkDir::new(path)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|p| is_data_file(p))
            .filter(|p| p.file_name().and_then(|n| n.to_str()) != Some(module_file))
            .collect();
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    let mut testsets = Vec::new();
    for file in files {
        let content = load_file(&file)?;
        let Some(doc) = parse_document(&content, &file)? else {
            continue;
        };
        let testset = Testset::from_document(&file, doc);
        if testset.is_definition() {
            tracing::debug!(path = %file.display(), "skipping definition file");
            continue;
        }
        if testset.steps.is_empty() {
            continue;
        }
        testsets.push(testset);
    }

    tracing::debug!(count = testsets.len(), path = %path.display(), "loaded testsets");
    Ok(testsets)
}
