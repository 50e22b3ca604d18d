//! Test execution: drives scopes, references, requests and validation.
//!
//! For each testset a testset-level scope is built from its `config` block.
//! Every step is expanded through the catalog, then run `times` times, each
//! repetition in a fresh testcase frame:
//!
//! 1. bind step variables and run setup hooks
//! 2. resolve and send the request
//! 3. extract into testcase and testset scope
//! 4. resolve and check validators
//! 5. run teardown hooks
//!
//! A resolution error stops the step before anything is sent. A failed
//! validator fails only its step; the testset carries on.

use std::path::Path;
use std::rc::Rc;

use serde::Serialize;

use crate::builtins::{parse_function_aliases, FunctionRegistry};
use crate::catalog::DefinitionCatalog;
use crate::config::ProjectConfig;
use crate::error::{AteError, Result};
use crate::http::{HttpClient, Request, Response};
use crate::loader::{self, Testset};
use crate::reference::expand_step;
use crate::scope::{BindingScope, Level, ModuleSearch};
use crate::step::{parse_variables, Step};
use crate::template::{eval_functions_only, resolve, resolve_str};
use crate::validate::{query, ValidatorResult};
use crate::value::{deep_update, Map, Value};

/// Path delimiter for extract and validate queries
const QUERY_DELIMITER: &str = ".";

/// Outcome of one step repetition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub name: String,
    /// 1-based repetition number
    pub iteration: u32,
    pub passed: bool,
    pub error: Option<String>,
    pub validators: Vec<ValidatorResult>,
}

impl StepResult {
    fn failed(name: impl Into<String>, iteration: u32, error: &AteError) -> Self {
        StepResult {
            name: name.into(),
            iteration,
            passed: false,
            error: Some(error.to_string()),
            validators: Vec::new(),
        }
    }
}

/// Outcome of one test file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestsetResult {
    pub name: String,
    pub path: String,
    pub success: bool,
    /// Set when the config block itself could not be bound
    pub error: Option<String>,
    pub steps: Vec<StepResult>,
    /// Variables named by `config.output`
    pub output: Map,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    pub testsets: usize,
    pub steps: usize,
    pub passed: usize,
    pub failed: usize,
}

/// Outcome of a whole run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub success: bool,
    pub testsets: Vec<TestsetResult>,
    pub stats: Stats,
}

impl Summary {
    fn from_results(testsets: Vec<TestsetResult>) -> Self {
        let mut stats = Stats {
            testsets: testsets.len(),
            ..Stats::default()
        };
        for step in testsets.iter().flat_map(|t| &t.steps) {
            stats.steps += 1;
            if step.passed {
                stats.passed += 1;
            } else {
                stats.failed += 1;
            }
        }
        Summary {
            success: testsets.iter().all(|t| t.success),
            testsets,
            stats,
        }
    }
}

/// Definition problems found by [`Runner::check_path`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    pub name: String,
    pub path: String,
    /// Steps after reference expansion
    pub steps: usize,
    pub errors: Vec<String>,
}

/// Per-testset state that outlives single steps.
struct TestsetContext {
    scope: BindingScope,
    request_defaults: Map,
    base_url: Option<String>,
}

/// Runs testsets against an HTTP client.
pub struct Runner<C: HttpClient> {
    client: C,
    catalog: DefinitionCatalog,
    registry: FunctionRegistry,
    search: Rc<ModuleSearch>,
    module_file: String,
    base_url: Option<String>,
}

impl<C: HttpClient> Runner<C> {
    pub fn new(client: C, config: &ProjectConfig, registry: FunctionRegistry) -> Self {
        let search = ModuleSearch::new(
            Some(config.root.clone()),
            config.module_file.clone(),
            registry.clone(),
        );
        Runner {
            client,
            catalog: DefinitionCatalog::new(&config.api_dir, &config.suite_dir),
            registry,
            search: Rc::new(search),
            module_file: config.module_file.clone(),
            base_url: config.base_url.clone(),
        }
    }

    /// Override the base url prepended to relative request urls.
    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        if base_url.is_some() {
            self.base_url = base_url;
        }
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn catalog(&self) -> &DefinitionCatalog {
        &self.catalog
    }

    /// Run every testset under `path` (a file or directory).
    ///
    /// `overrides` replace same-named config variables in every testset.
    pub fn run_path(&mut self, path: &Path, overrides: &Map) -> Result<Summary> {
        let testsets = loader::load_testsets(path, &self.module_file)?;
        let results = testsets
            .iter()
            .map(|testset| self.run_testset(testset, overrides))
            .collect();
        Ok(Summary::from_results(results))
    }

    /// Run one testset.
    pub fn run_testset(&mut self, testset: &Testset, overrides: &Map) -> TestsetResult {
        tracing::info!(testset = %testset.name, path = %testset.path.display(), "running testset");

        let mut result = TestsetResult {
            name: testset.name.clone(),
            path: testset.path.display().to_string(),
            success: false,
            error: None,
            steps: Vec::new(),
            output: Map::new(),
        };

        let mut ctx = match self.testset_context(testset, overrides) {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::error!(testset = %testset.name, error = %e, "failed to bind config");
                result.error = Some(e.to_string());
                return result;
            }
        };

        if let Ok(name) = resolve_str(&testset.name, &ctx.scope) {
            result.name = name.to_text();
        }

        for raw in &testset.steps {
            let raw_name = raw.get("name").map(Value::to_text).unwrap_or_default();
            let steps = match expand_step(&self.catalog, raw).and_then(|expanded| {
                expanded.iter().map(Step::from_value).collect::<Result<Vec<_>>>()
            }) {
                Ok(steps) => steps,
                Err(e) => {
                    let e = e.in_step(&raw_name);
                    tracing::error!(error = %e, "step not runnable");
                    result.steps.push(StepResult::failed(raw_name, 1, &e));
                    continue;
                }
            };

            for step in &steps {
                for iteration in 1..=step.times {
                    let step_result = self.run_step(step, iteration, &mut ctx);
                    result.steps.push(step_result);
                }
            }
        }

        result.output = collect_output(&testset.config, &ctx.scope);
        result.success = result.steps.iter().all(|s| s.passed);
        tracing::info!(
            testset = %result.name,
            success = result.success,
            steps = result.steps.len(),
            "finished testset"
        );
        result
    }

    fn testset_context(&self, testset: &Testset, overrides: &Map) -> Result<TestsetContext> {
        let mut scope = BindingScope::with_search(testset.path.clone(), Rc::clone(&self.search));
        let config = &testset.config;

        if let Some(block) = config.get("functions") {
            let aliases = parse_function_aliases(block)?;
            scope.bind_functions(self.registry.bind(&aliases)?, Level::Testset);
        }

        if let Some(block) = config.get("variables") {
            for (name, value) in parse_variables(block)? {
                let value = match overrides.get(&name) {
                    Some(value) => value.clone(),
                    None => resolve(&value, &scope)?,
                };
                scope.bind_variable(name, value, Level::Testset);
            }
        }
        scope.bind_variables(overrides.clone(), Level::Testset);

        let mut request_defaults = match config.get("request") {
            Some(Value::Map(request)) => request.clone(),
            _ => Map::new(),
        };
        let base_url = match request_defaults.shift_remove("base_url") {
            Some(url) => Some(resolve(&url, &scope)?.to_text()),
            None => self.base_url.clone(),
        };

        Ok(TestsetContext {
            scope,
            request_defaults,
            base_url,
        })
    }

    fn run_step(&mut self, step: &Step, iteration: u32, ctx: &mut TestsetContext) -> StepResult {
        ctx.scope.begin_testcase();
        let outcome = self.execute_step(step, ctx);
        ctx.scope.end_testcase();

        let (name, outcome) = outcome;
        tracing::debug!(step = %name, iteration, "step finished");
        match outcome {
            Ok(validators) => {
                let failed: Vec<String> = validators
                    .iter()
                    .filter(|v| !v.passed)
                    .map(ValidatorResult::describe)
                    .collect();
                let error = (!failed.is_empty())
                    .then(|| AteError::Validation(failed.join("; ")).in_step(&name).to_string());
                StepResult {
                    name,
                    iteration,
                    passed: error.is_none(),
                    error,
                    validators,
                }
            }
            Err(e) => {
                let e = e.in_step(&name);
                tracing::error!(error = %e, "step failed");
                StepResult::failed(name, iteration, &e)
            }
        }
    }

    /// Run one repetition inside an active testcase frame.
    ///
    /// Returns the resolved step name alongside the outcome.
    fn execute_step(
        &mut self,
        step: &Step,
        ctx: &mut TestsetContext,
    ) -> (String, Result<Vec<ValidatorResult>>) {
        for (name, value) in &step.variables {
            match resolve(value, &ctx.scope) {
                Ok(value) => ctx.scope.bind_variable(name.clone(), value, Level::Testcase),
                Err(e) => return (step.name.clone(), Err(e)),
            }
        }

        // a name that cannot be resolved yet keeps its raw text
        let name = resolve_str(&step.name, &ctx.scope)
            .map(|n| n.to_text())
            .unwrap_or_else(|_| step.name.clone());
        tracing::debug!(step = %name, "running step");

        (name, self.perform(step, ctx))
    }

    fn perform(&mut self, step: &Step, ctx: &mut TestsetContext) -> Result<Vec<ValidatorResult>> {
        run_hooks(&step.setup_hooks, &ctx.scope)?;

        let request = build_request(
            step,
            &ctx.request_defaults,
            ctx.base_url.as_deref(),
            &ctx.scope,
        )?;
        let response = self.client.send(&request)?;
        let response_value = response.to_value();

        for extractor in &step.extract {
            let value = query(&response_value, &extractor.query_path, QUERY_DELIMITER)?;
            ctx.scope
                .bind_variable(extractor.var_name.clone(), value.clone(), Level::Testcase);
            ctx.scope
                .bind_variable(extractor.var_name.clone(), value, Level::Testset);
        }

        let mut results = Vec::with_capacity(step.validators.len());
        for validator in &step.validators {
            let actual = match &validator.check {
                Value::String(check) if check.contains('$') => resolve_str(check, &ctx.scope)?,
                check => query(&response_value, &check.to_text(), QUERY_DELIMITER)?,
            };
            let expected = resolve(&validator.expected, &ctx.scope)?;
            results.push(validator.evaluate(actual, expected)?);
        }
        if results.iter().any(|r| !r.passed) {
            log_failure(&request, &response);
        }

        run_hooks(&step.teardown_hooks, &ctx.scope)?;
        Ok(results)
    }

    /// Load and expand every testset under `path` without sending anything.
    pub fn check_path(&self, path: &Path) -> Result<Vec<CheckReport>> {
        let testsets = loader::load_testsets(path, &self.module_file)?;
        let mut reports = Vec::with_capacity(testsets.len());

        for testset in &testsets {
            let mut report = CheckReport {
                name: testset.name.clone(),
                path: testset.path.display().to_string(),
                steps: 0,
                errors: Vec::new(),
            };
            for raw in &testset.steps {
                let raw_name = raw.get("name").map(Value::to_text).unwrap_or_default();
                let checked = expand_step(&self.catalog, raw).and_then(|expanded| {
                    expanded.iter().map(Step::from_value).collect::<Result<Vec<_>>>()
                });
                match checked {
                    Ok(steps) => report.steps += steps.len(),
                    Err(e) => report.errors.push(e.in_step(raw_name).to_string()),
                }
            }
            reports.push(report);
        }
        Ok(reports)
    }
}

fn run_hooks(hooks: &[Value], scope: &BindingScope) -> Result<()> {
    for hook in hooks {
        eval_functions_only(hook, scope)?;
    }
    Ok(())
}

/// Config request defaults merged under the step's request, resolved.
fn build_request(
    step: &Step,
    defaults: &Map,
    base_url: Option<&str>,
    scope: &BindingScope,
) -> Result<Request> {
    let mut request = defaults.clone();
    match &step.request {
        Value::Map(own) => deep_update(&mut request, own),
        Value::Null => {}
        other => {
            return Err(AteError::params(format!(
                "request must be a mapping, got {}",
                other.type_name()
            )))
        }
    }

    let mut resolved = resolve(&Value::Map(request), scope)?;
    if let (Some(base), Some(fields)) = (base_url, resolved.as_map_mut()) {
        if let Some(Value::String(url)) = fields.get("url") {
            let joined = join_url(base, url);
            fields.insert("url".to_string(), Value::String(joined));
        }
    }
    Request::from_value(&resolved)
}

/// Prefix a relative url with `base`; absolute urls are kept.
pub fn join_url(base: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") || base.is_empty() {
        return url.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), url.trim_start_matches('/'))
}

fn log_failure(request: &Request, response: &Response) {
    tracing::error!(
        method = %request.method,
        url = %request.url,
        headers = ?request.headers,
        body = ?request.body,
        "validation failed for request"
    );
    tracing::error!(
        status_code = response.status_code,
        headers = ?response.headers,
        body = %response.text,
        "response"
    );
}

fn collect_output(config: &Value, scope: &BindingScope) -> Map {
    let names: Vec<String> = match config.get("output") {
        Some(Value::Array(names)) => names.iter().map(Value::to_text).collect(),
        Some(Value::String(name)) => vec![name.clone()],
        _ => Vec::new(),
    };

    let mut output = Map::new();
    for name in names {
        match scope.get_variable(&name) {
            Ok(value) => {
                output.insert(name, value);
            }
            Err(e) => tracing::warn!(variable = %name, error = %e, "output variable missing"),
        }
    }
    output
}
