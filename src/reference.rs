//! Reference resolution: expanding `api:`/`suite:`/`testcase:` calls.
//!
//! A step that references a definition by call expression is replaced by a
//! copy of the definition body with formal parameters renamed to the actual
//! arguments, merged with the step's own fields. Two merge policies exist:
//!
//! - [`MergePolicy::ReferenceCall`] for `api: get_user($uid)` style steps.
//!   Call-site fields replace definition fields wholesale.
//! - [`MergePolicy::OverrideBlock`] for `extends: {api: get_user($uid)}`.
//!   List fields such as `validate` are appended without duplicates and
//!   mappings are merged recursively.

use crate::catalog::{DefinitionCatalog, DefinitionKind};
use crate::error::{AteError, Result};
use crate::step::parse_variables;
use crate::template::{parse_function, substitute_tokens};
use crate::value::{deep_update, Map, Value};

/// Maximum nesting of references within references
const MAX_DEPTH: usize = 32;

/// Key that marks an override block
pub const EXTENDS_KEY: &str = "extends";

/// List fields that an override block extends instead of replacing
const APPEND_FIELDS: &[&str] = &[
    "validate",
    "validators",
    "extract",
    "setup_hooks",
    "teardown_hooks",
];

/// How a call site's fields combine with the referenced definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    ReferenceCall,
    OverrideBlock,
}

/// Resolve one reference into concrete steps.
///
/// `call_site` holds the calling step's own fields, without the reference
/// key. An api reference yields one step; suite and testcase references
/// yield one step per definition step. Cataloged definitions are never
/// modified.
///
/// # Errors
/// `Params` for malformed call text or an argument count that differs from
/// the definition's parameters, `ApiNotFound`/`SuiteNotFound` for unknown
/// names.
pub fn resolve_reference(
    catalog: &DefinitionCatalog,
    kind: DefinitionKind,
    call_expr: &str,
    call_site: &Map,
    policy: MergePolicy,
) -> Result<Vec<Value>> {
    resolve_with_depth(catalog, kind, call_expr, call_site, policy, 0)
}

fn resolve_with_depth(
    catalog: &DefinitionCatalog,
    kind: DefinitionKind,
    call_expr: &str,
    call_site: &Map,
    policy: MergePolicy,
    depth: usize,
) -> Result<Vec<Value>> {
    if depth > MAX_DEPTH {
        return Err(AteError::params(format!(
            "maximum reference depth ({}) exceeded at {}",
            MAX_DEPTH, call_expr
        )));
    }

    let call = parse_function(call_expr)?;
    if !call.kwargs.is_empty() {
        return Err(AteError::params(format!(
            "references take positional arguments only: {}",
            call_expr
        )));
    }

    let def = catalog.get(kind, &call.name)?;
    if call.args.len() != def.formal_params.len() {
        return Err(AteError::params(format!(
            "{} '{}' takes {} argument(s) but {} were given: {}",
            kind,
            def.name,
            def.formal_params.len(),
            call.args.len(),
            call_expr
        )));
    }

    let mut mapping = Map::new();
    for (formal, actual) in def.formal_params.iter().zip(&call.args) {
        if actual.as_str() == Some(format!("${}", formal).as_str()) {
            continue;
        }
        mapping.insert(formal.clone(), actual.clone());
    }
    let body = substitute_tokens(&def.body, &mapping);

    match kind {
        DefinitionKind::Api => {
            let Value::Map(body) = body else {
                return Err(AteError::params(format!("api '{}' body is not a mapping", def.name)));
            };
            Ok(vec![Value::Map(merge(body, call_site, policy))])
        }
        DefinitionKind::Suite | DefinitionKind::Testcase => {
            expand_suite_body(catalog, &body, call_site, policy, depth)
        }
    }
}

/// Turn a substituted suite/testcase body into its steps.
///
/// Definition `config.variables` sit under each step's own variables; the
/// call site's variables override both. Every other call-site field except
/// `name` is merged into each expanded step under `policy`.
fn expand_suite_body(
    catalog: &DefinitionCatalog,
    body: &Value,
    call_site: &Map,
    policy: MergePolicy,
    depth: usize,
) -> Result<Vec<Value>> {
    let config_vars = match body.get("config").and_then(|c| c.get("variables")) {
        Some(v) => parse_variables(v)?,
        None => Map::new(),
    };
    let site_vars = match call_site.get("variables") {
        Some(v) => parse_variables(v)?,
        None => Map::new(),
    };
    let mut site_fields = call_site.clone();
    site_fields.shift_remove("variables");
    site_fields.shift_remove("name");

    let steps = body
        .get("teststeps")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut expanded = Vec::new();
    for step in steps {
        let mut fields = match step {
            Value::Map(fields) => fields,
            other => {
                return Err(AteError::params(format!(
                    "suite steps must be mappings, got {}",
                    other.type_name()
                )))
            }
        };

        let mut variables = config_vars.clone();
        if let Some(own) = fields.get("variables") {
            variables.extend(parse_variables(own)?);
        }
        variables.extend(site_vars.clone());
        if !variables.is_empty() {
            fields.insert("variables".to_string(), Value::Map(variables));
        }

        for step in expand_with_depth(catalog, &Value::Map(fields), depth + 1)? {
            match step {
                Value::Map(step) => expanded.push(Value::Map(merge(step, &site_fields, policy))),
                other => expanded.push(other),
            }
        }
    }
    Ok(expanded)
}

/// Merge a substituted definition body with the call site's fields.
pub fn merge(definition: Map, call_site: &Map, policy: MergePolicy) -> Map {
    let mut merged = definition;
    for (key, value) in call_site {
        match policy {
            MergePolicy::ReferenceCall => {
                merged.insert(key.clone(), value.clone());
            }
            MergePolicy::OverrideBlock => override_field(&mut merged, key, value),
        }
    }
    merged
}

fn override_field(merged: &mut Map, key: &str, value: &Value) {
    let Some(existing) = merged.get_mut(key) else {
        merged.insert(key.to_string(), value.clone());
        return;
    };

    match (existing, value) {
        (Value::Array(items), Value::Array(incoming)) if APPEND_FIELDS.contains(&key) => {
            for entry in incoming {
                if !items.contains(entry) {
                    items.push(entry.clone());
                }
            }
        }
        (existing, incoming) if key == "variables" => {
            match (parse_variables(existing), parse_variables(incoming)) {
                (Ok(mut vars), Ok(overrides)) => {
                    vars.extend(overrides);
                    *existing = Value::Map(vars);
                }
                _ => *existing = incoming.clone(),
            }
        }
        (Value::Map(target), Value::Map(source)) => deep_update(target, source),
        (existing, incoming) => *existing = incoming.clone(),
    }
}

/// Expand a raw step, resolving any reference it carries.
///
/// ```yaml
/// - name: reference call
///   api: get_user($uid)
/// - name: override block
///   extends: {api: get_user($uid)}
///   validate:
///     - eq: [content.success, true]
/// ```
///
/// A step without a reference comes back unchanged.
pub fn expand_step(catalog: &DefinitionCatalog, raw_step: &Value) -> Result<Vec<Value>> {
    expand_with_depth(catalog, raw_step, 0)
}

fn expand_with_depth(catalog: &DefinitionCatalog, raw_step: &Value, depth: usize) -> Result<Vec<Value>> {
    let Value::Map(fields) = raw_step else {
        return Err(AteError::params(format!(
            "step must be a mapping, got {}",
            raw_step.type_name()
        )));
    };

    if let Some(extends) = fields.get(EXTENDS_KEY) {
        let (kind, call_expr) = reference_target(extends).ok_or_else(|| {
            AteError::params(format!(
                "extends must be {{api|suite|testcase: call}}, got {}",
                extends
            ))
        })?;
        let mut call_site = fields.clone();
        call_site.shift_remove(EXTENDS_KEY);
        return resolve_with_depth(
            catalog,
            kind,
            &call_expr,
            &call_site,
            MergePolicy::OverrideBlock,
            depth,
        );
    }

    for kind in [DefinitionKind::Api, DefinitionKind::Suite, DefinitionKind::Testcase] {
        let Some(target) = fields.get(kind.key()) else {
            continue;
        };
        let Some(call_expr) = target.as_str() else {
            return Err(AteError::params(format!(
                "'{}' reference must be a call expression, got {}",
                kind,
                target.type_name()
            )));
        };
        let mut call_site = fields.clone();
        call_site.shift_remove(kind.key());
        return resolve_with_depth(
            catalog,
            kind,
            call_expr,
            &call_site,
            MergePolicy::ReferenceCall,
            depth,
        );
    }

    Ok(vec![raw_step.clone()])
}

fn reference_target(extends: &Value) -> Option<(DefinitionKind, String)> {
    let map = extends.as_map()?;
    map.iter().find_map(|(key, value)| {
        let kind = DefinitionKind::from_key(key)?;
        Some((kind, value.as_str()?.to_string()))
    })
}
