//! Binding scopes: where `$variable` and `${function()}` names are looked up.
//!
//! A scope has two levels. The testset level lives for one test file run;
//! the testcase level lives for one step execution and starts as a copy of
//! the testset level. Lookups that miss both levels continue into the
//! project's shared modules (see [`search`]) and finally the process
//! environment.

pub mod search;

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{AteError, Result};
use crate::value::{Map, Value};

pub use search::{ModuleSearch, SharedModule};

/// Signature of every registered function
pub type NativeFn = dyn Fn(&[Value], &Map) -> Result<Value> + Send + Sync;

/// A named, callable function binding.
#[derive(Clone)]
pub struct Callable {
    name: String,
    func: Arc<NativeFn>,
}

impl Callable {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Value], &Map) -> Result<Value> + Send + Sync + 'static,
    {
        Callable {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value], kwargs: &Map) -> Result<Value> {
        (self.func)(args, kwargs)
    }

    /// Same function under another name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Callable {
            name: name.into(),
            func: Arc::clone(&self.func),
        }
    }
}

impl std::fmt::Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<function {}>", self.name)
    }
}

/// Which level a binding is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Testset,
    Testcase,
}

/// Variables and functions bound at one level.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    pub variables: Map,
    pub functions: IndexMap<String, Callable>,
}

/// Two-level store of variable and function bindings.
#[derive(Debug, Default)]
pub struct BindingScope {
    testset: Bindings,
    testcase: Option<Bindings>,
    file_path: Option<PathBuf>,
    search: Option<Rc<ModuleSearch>>,
}

impl BindingScope {
    /// Create a scope with no upward search.
    pub fn new() -> Self {
        BindingScope::default()
    }

    /// Create a scope whose lookups fall back to the shared modules above
    /// `file_path`.
    pub fn with_search(file_path: impl Into<PathBuf>, search: Rc<ModuleSearch>) -> Self {
        BindingScope {
            file_path: Some(file_path.into()),
            search: Some(search),
            ..BindingScope::default()
        }
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Start a testcase frame seeded with a copy of the testset bindings.
    ///
    /// Testset bindings written after this point are not visible in the
    /// frame.
    pub fn begin_testcase(&mut self) {
        self.testcase = Some(self.testset.clone());
    }

    pub fn end_testcase(&mut self) {
        self.testcase = None;
    }

    pub fn in_testcase(&self) -> bool {
        self.testcase.is_some()
    }

    /// Shallow-merge variables into a level; last write wins per key.
    ///
    /// Writing at testcase level without an active frame starts one.
    pub fn bind_variables(&mut self, variables: Map, level: Level) {
        let target = self.level_mut(level);
        for (name, value) in variables {
            target.variables.insert(name, value);
        }
    }

    pub fn bind_variable(&mut self, name: impl Into<String>, value: Value, level: Level) {
        self.level_mut(level).variables.insert(name.into(), value);
    }

    pub fn bind_functions(&mut self, functions: IndexMap<String, Callable>, level: Level) {
        let target = self.level_mut(level);
        for (name, func) in functions {
            target.functions.insert(name, func);
        }
    }

    pub fn bind_function(&mut self, func: Callable, level: Level) {
        self.level_mut(level)
            .functions
            .insert(func.name().to_string(), func);
    }

    fn level_mut(&mut self, level: Level) -> &mut Bindings {
        match level {
            Level::Testset => &mut self.testset,
            Level::Testcase => {
                if self.testcase.is_none() {
                    self.begin_testcase();
                }
                self.testcase.get_or_insert_with(Bindings::default)
            }
        }
    }

    /// The bindings lookups currently see first.
    fn active(&self) -> &Bindings {
        self.testcase.as_ref().unwrap_or(&self.testset)
    }

    /// Look up a variable: active level, shared modules, then environment.
    pub fn get_variable(&self, name: &str) -> Result<Value> {
        if let Some(value) = self.active().variables.get(name) {
            return Ok(value.clone());
        }

        if let (Some(search), Some(path)) = (&self.search, &self.file_path) {
            if let Some(value) = ModuleSearch::resolve_variable(search, path, name)? {
                return Ok(value);
            }
        }

        if let Ok(value) = std::env::var(name) {
            return Ok(Value::String(value));
        }

        Err(AteError::VariableNotFound(name.to_string()))
    }

    /// Look up a function: active level, then shared modules.
    pub fn get_function(&self, name: &str) -> Result<Callable> {
        if let Some(func) = self.active().functions.get(name) {
            return Ok(func.clone());
        }

        if let (Some(search), Some(path)) = (&self.search, &self.file_path) {
            if let Some(func) = search.find_function(path, name)? {
                return Ok(func);
            }
        }

        Err(AteError::FunctionNotFound(name.to_string()))
    }

    pub fn testset_variables(&self) -> &Map {
        &self.testset.variables
    }

    /// Variables visible to the running step (the testset ones outside a step).
    pub fn testcase_variables(&self) -> &Map {
        &self.active().variables
    }
}
