//! ATE - API Test Engine
//!
//! Test suites are described as data (YAML/JSON) rather than code. The engine
//! resolves references between reusable definitions, substitutes `$variable`
//! and `${function(...)}` templates, sends each step's request and validates
//! the response.

pub mod builtins;
pub mod catalog;
pub mod config;
pub mod env;
pub mod error;
pub mod http;
pub mod loader;
pub mod reference;
pub mod runner;
pub mod scope;
pub mod step;
pub mod template;
pub mod validate;
pub mod value;

pub use builtins::FunctionRegistry;
pub use catalog::{Definition, DefinitionCatalog, DefinitionKind};
pub use config::ProjectConfig;
pub use error::{AteError, Result};
pub use http::{HttpClient, ReqwestClient, Request, Response};
pub use reference::{expand_step, resolve_reference, MergePolicy};
pub use runner::{CheckReport, Runner, StepResult, Summary, TestsetResult};
pub use scope::{BindingScope, Callable, Level};
pub use template::{extract_functions, extract_variables, parse_function, resolve, FunctionCall};
pub use validate::{match_expected, query};
pub use value::{Map, Value};
