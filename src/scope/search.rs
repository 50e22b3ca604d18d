//! Upward search for shared definitions.
//!
//! A lookup that misses the scope walks from the test file up through its
//! ancestor directories. The file's own `config` block is checked first,
//! then each directory's shared module file (`debugtalk.yml` by default),
//! stopping at the project root. Every candidate is loaded once and cached
//! by absolute path; a missing file caches as an empty module.
//!
//! ```yaml
//! # tests/debugtalk.yml
//! variables:
//!   SECRET_KEY: DebugTalk
//! functions:
//!   sign: get_sign        # alias -> registered function
//!   gen_md5: gen_md5
//! ```

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;

use super::{BindingScope, Callable};
use crate::builtins::{parse_function_aliases, FunctionRegistry};
use crate::error::{AteError, Result};
use crate::loader;
use crate::step::parse_variables;
use crate::template::resolve;
use crate::value::{Map, Value};

/// Variables and function aliases declared by one candidate file.
#[derive(Debug, Clone, Default)]
pub struct SharedModule {
    pub variables: Map,
    /// alias -> registered function name
    pub functions: IndexMap<String, String>,
}

impl SharedModule {
    /// Load a directory's shared module file.
    pub fn load_module(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(SharedModule::default());
        }
        let content = loader::load_file(path)?;
        Self::from_block(&content)
    }

    /// Load the `config` block declared by a test file.
    pub fn load_test_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(SharedModule::default());
        }
        let content = loader::load_file(path)?;
        let mut module = SharedModule::default();
        for config in loader::config_blocks(&content) {
            let block = Self::from_block(config)?;
            module.variables.extend(block.variables);
            module.functions.extend(block.functions);
        }
        Ok(module)
    }

    fn from_block(block: &Value) -> Result<Self> {
        let variables = match block.get("variables") {
            Some(v) => parse_variables(v)?,
            None => Map::new(),
        };
        let functions = match block.get("functions") {
            Some(f) => parse_function_aliases(f)?,
            None => IndexMap::new(),
        };
        Ok(SharedModule {
            variables,
            functions,
        })
    }
}

/// Lazily loaded, cached chain of shared modules.
#[derive(Debug)]
pub struct ModuleSearch {
    root: Option<PathBuf>,
    module_file: String,
    registry: FunctionRegistry,
    cache: RefCell<HashMap<PathBuf, Rc<SharedModule>>>,
    /// Shared variables already resolved, by (test file, name)
    resolved: RefCell<HashMap<(PathBuf, String), Value>>,
    /// Names currently being resolved
    resolving: RefCell<HashSet<String>>,
}

impl ModuleSearch {
    pub fn new(root: Option<PathBuf>, module_file: impl Into<String>, registry: FunctionRegistry) -> Self {
        ModuleSearch {
            root: root.map(|r| absolute(&r)),
            module_file: module_file.into(),
            registry,
            cache: RefCell::new(HashMap::new()),
            resolved: RefCell::new(HashMap::new()),
            resolving: RefCell::new(HashSet::new()),
        }
    }

    /// Ordered candidate files for `file`: the file itself, then the module
    /// file in each ancestor directory up to the project root.
    pub fn candidates(&self, file: &Path) -> Vec<PathBuf> {
        let file = absolute(file);
        let mut candidates = vec![file.clone()];

        let inside_root = self
            .root
            .as_ref()
            .map(|root| file.starts_with(root))
            .unwrap_or(false);

        for dir in file.ancestors().skip(1) {
            candidates.push(dir.join(&self.module_file));
            if inside_root && Some(dir) == self.root.as_deref() {
                break;
            }
        }
        candidates
    }

    fn module(&self, path: &Path, is_test_file: bool) -> Result<Rc<SharedModule>> {
        if let Some(module) = self.cache.borrow().get(path) {
            return Ok(Rc::clone(module));
        }

        let module = if is_test_file {
            SharedModule::load_test_file(path)?
        } else {
            SharedModule::load_module(path)?
        };
        if !module.variables.is_empty() || !module.functions.is_empty() {
            tracing::debug!(
                path = %path.display(),
                variables = module.variables.len(),
                functions = module.functions.len(),
                "loaded shared module"
            );
        }

        let module = Rc::new(module);
        self.cache
            .borrow_mut()
            .insert(path.to_path_buf(), Rc::clone(&module));
        Ok(module)
    }

    fn modules(&self, file: &Path) -> impl Iterator<Item = Result<Rc<SharedModule>>> + '_ {
        self.candidates(file)
            .into_iter()
            .enumerate()
            .map(move |(i, path)| self.module(&path, i == 0))
    }

    /// First variable named `name` along the candidate chain.
    pub fn find_variable(&self, file: &Path, name: &str) -> Result<Option<Value>> {
        for module in self.modules(file) {
            if let Some(value) = module?.variables.get(name) {
                return Ok(Some(value.clone()));
            }
        }
        Ok(None)
    }

    /// Like [`find_variable`](Self::find_variable), with the value's own
    /// `$var` and `${func()}` tokens resolved against the candidate chain.
    ///
    /// The testset's bindings are not visible here. Each value is resolved
    /// once per test file and reused.
    ///
    /// # Errors
    /// `Params` when a shared variable refers back to itself.
    pub fn resolve_variable(search: &Rc<Self>, file: &Path, name: &str) -> Result<Option<Value>> {
        let key = (absolute(file), name.to_string());
        if let Some(value) = search.resolved.borrow().get(&key) {
            return Ok(Some(value.clone()));
        }
        let Some(raw) = search.find_variable(file, name)? else {
            return Ok(None);
        };

        let entered = search.resolving.borrow_mut().insert(name.to_string());
        if !entered {
            return Err(AteError::params(format!(
                "circular reference in shared variable ${}",
                name
            )));
        }
        let module_scope = BindingScope::with_search(file, Rc::clone(search));
        let value = resolve(&raw, &module_scope);
        search.resolving.borrow_mut().remove(name);

        let value = value?;
        search.resolved.borrow_mut().insert(key, value.clone());
        Ok(Some(value))
    }

    /// First function named `name` along the candidate chain.
    pub fn find_function(&self, file: &Path, name: &str) -> Result<Option<Callable>> {
        for module in self.modules(file) {
            if let Some(target) = module?.functions.get(name) {
                return self.registry.alias(name, target).map(Some);
            }
        }
        Ok(None)
    }

    pub fn cached_len(&self) -> usize {
        self.cache.borrow().len()
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("tests/sub")).unwrap();
        fs::write(
            dir.path().join("tests/debugtalk.yml"),
            "variables:\n  SECRET_KEY: DebugTalk\nfunctions:\n  md5: gen_md5\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("tests/sub/demo.yml"),
            "- config:\n    name: demo\n    variables:\n      - local_var: 7\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_candidates_stop_at_root() {
        let dir = project();
        let search = ModuleSearch::new(
            Some(dir.path().to_path_buf()),
            "debugtalk.yml",
            FunctionRegistry::with_builtins(),
        );
        let file = dir.path().join("tests/sub/demo.yml");
        let candidates = search.candidates(&file);
        assert_eq!(candidates[0], file);
        assert_eq!(candidates[1], dir.path().join("tests/sub/debugtalk.yml"));
        assert_eq!(candidates[2], dir.path().join("tests/debugtalk.yml"));
        assert_eq!(candidates.last().unwrap(), &dir.path().join("debugtalk.yml"));
        assert_eq!(candidates.len(), 4);
    }

    #[test]
    fn test_find_variable_upward() {
        let dir = project();
        let search = ModuleSearch::new(
            Some(dir.path().to_path_buf()),
            "debugtalk.yml",
            FunctionRegistry::with_builtins(),
        );
        let file = dir.path().join("tests/sub/demo.yml");

        assert_eq!(
            search.find_variable(&file, "SECRET_KEY").unwrap(),
            Some(Value::string("DebugTalk"))
        );
        assert_eq!(
            search.find_variable(&file, "local_var").unwrap(),
            Some(Value::Int(7))
        );
        assert_eq!(search.find_variable(&file, "nope").unwrap(), None);
        // every candidate is cached after one full walk
        assert_eq!(search.cached_len(), 4);
    }

    #[test]
    fn test_find_function_alias() {
        let dir = project();
        let search = ModuleSearch::new(
            Some(dir.path().to_path_buf()),
            "debugtalk.yml",
            FunctionRegistry::with_builtins(),
        );
        let file = dir.path().join("tests/sub/demo.yml");
        let md5 = search.find_function(&file, "md5").unwrap().unwrap();
        assert_eq!(
            md5.call(&[Value::string("abc")], &Map::new()).unwrap(),
            Value::string("900150983cd24fb0d6963f7d28e17f72")
        );
        assert!(search.find_function(&file, "func_not_exist").unwrap().is_none());
    }

    #[test]
    fn test_shared_variables_are_resolved() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("tests")).unwrap();
        fs::write(
            dir.path().join("tests/debugtalk.yml"),
            r#"
variables:
  base: abc
  token: "${gen_md5($base)}"
  alias: $base
  loop_a: $loop_b
  loop_b: $loop_a
functions:
  gen_md5: gen_md5
"#,
        )
        .unwrap();
        let search = Rc::new(ModuleSearch::new(
            Some(dir.path().to_path_buf()),
            "debugtalk.yml",
            FunctionRegistry::with_builtins(),
        ));
        let file = dir.path().join("tests/demo.yml");
        let scope = BindingScope::with_search(&file, Rc::clone(&search));

        assert_eq!(
            resolve(&Value::string("$token"), &scope).unwrap(),
            Value::string("900150983cd24fb0d6963f7d28e17f72")
        );
        assert_eq!(
            resolve(&Value::string("x-$alias"), &scope).unwrap(),
            Value::string("x-abc")
        );
        // the raw lookup still sees the declared text
        assert_eq!(
            search.find_variable(&file, "alias").unwrap(),
            Some(Value::string("$base"))
        );

        let err = resolve(&Value::string("$loop_a"), &scope).unwrap_err();
        assert!(err.is_params_error(), "{}", err);
        // a failed cycle leaves nothing half-resolved behind
        assert_eq!(
            resolve(&Value::string("$alias"), &scope).unwrap(),
            Value::string("abc")
        );
    }
}
