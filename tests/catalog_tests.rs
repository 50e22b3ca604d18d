//! Integration tests for definitions and shared modules
//!
//! Loads the fixture project under tests/data: the api and suite catalogs,
//! reference expansion across both, and the debugtalk.yml upward search.

use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use ate::scope::ModuleSearch;
use ate::{
    expand_step, resolve, resolve_reference, AteError, BindingScope, DefinitionCatalog,
    DefinitionKind, FunctionRegistry, Map, MergePolicy, Value,
};
use pretty_assertions::assert_eq;

fn fixture_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data")
}

fn fixture_catalog() -> DefinitionCatalog {
    let root = fixture_root();
    DefinitionCatalog::new(root.join("api"), root.join("suite"))
}

fn yaml(text: &str) -> Value {
    serde_yaml::from_str(text).unwrap()
}

#[test]
fn test_populate_fixture_catalog() {
    let catalog = fixture_catalog();
    assert_eq!(catalog.populate().unwrap(), 4);
    // rescanning overwrites, never duplicates
    assert_eq!(catalog.populate().unwrap(), 4);
    assert_eq!(catalog.len(), 4);

    let token = catalog.get(DefinitionKind::Api, "get_token").unwrap();
    assert_eq!(
        token.formal_params,
        vec!["user_agent", "device_sn", "os_platform", "app_version"]
    );
    assert!(token.body.get("def").is_none());

    let suite = catalog.get(DefinitionKind::Suite, "create_and_check").unwrap();
    assert_eq!(suite.formal_params, vec!["uid", "token"]);
}

#[test]
fn test_lookup_misses() {
    let catalog = fixture_catalog();
    assert!(matches!(
        catalog.get(DefinitionKind::Api, "delete_user"),
        Err(AteError::ApiNotFound(name)) if name == "delete_user"
    ));
    // a suite is not found under the testcase kind
    assert!(matches!(
        catalog.get(DefinitionKind::Testcase, "create_and_check"),
        Err(AteError::SuiteNotFound(_))
    ));
}

#[test]
fn test_lookup_miss_rescans() {
    let dir = tempfile::tempdir().unwrap();
    let api_dir = dir.path().join("api");
    fs::create_dir_all(&api_dir).unwrap();
    let catalog = DefinitionCatalog::new(&api_dir, dir.path().join("suite"));

    assert!(catalog.get(DefinitionKind::Api, "ping").is_err());

    fs::write(
        api_dir.join("ping.yml"),
        "api:\n  def: ping()\n  request: {url: /ping, method: GET}\n",
    )
    .unwrap();
    let ping = catalog.get(DefinitionKind::Api, "ping").unwrap();
    assert_eq!(ping.formal_params, Vec::<String>::new());
}

#[test]
fn test_suite_reference_expands_nested_apis() {
    let catalog = fixture_catalog();
    let steps = resolve_reference(
        &catalog,
        DefinitionKind::Suite,
        "create_and_check(1001, $token)",
        &Map::new(),
        MergePolicy::ReferenceCall,
    )
    .unwrap();

    assert_eq!(steps.len(), 2);
    let create = &steps[0];
    assert_eq!(create.get("name"), Some(&Value::string("create user 1001")));
    assert_eq!(
        create.get("request").and_then(|r| r.get("url")),
        Some(&Value::string("/api/users/1001"))
    );
    assert_eq!(
        create.get("variables"),
        Some(&yaml("{name: user1001}"))
    );
    assert_eq!(
        create.get("request").and_then(|r| r.get("json")),
        Some(&yaml("{name: $name}"))
    );

    let check = &steps[1];
    assert_eq!(
        check.get("validate"),
        Some(&yaml("[{eq: [status_code, 200]}, {eq: [content.data.name, $name]}]"))
    );
}

#[test]
fn test_expand_step_keeps_plain_steps() {
    let catalog = fixture_catalog();
    let raw = yaml("{name: plain, request: {url: /x, method: GET}}");
    assert_eq!(expand_step(&catalog, &raw).unwrap(), vec![raw]);
}

#[test]
fn test_module_search_from_fixture() {
    let root = fixture_root();
    let search = ModuleSearch::new(
        Some(root.clone()),
        "debugtalk.yml",
        FunctionRegistry::with_builtins(),
    );
    let scope = BindingScope::with_search(root.join("testcases/smoke.yml"), Rc::new(search));

    // config block of the test file itself
    assert_eq!(scope.get_variable("uid").unwrap(), Value::Int(1000));
    // debugtalk.yml one level up
    assert_eq!(
        scope.get_variable("user_agent").unwrap(),
        Value::string("iOS/10.3")
    );

    let digest = resolve(&Value::string("${gen_md5(abc)}"), &scope).unwrap();
    assert_eq!(digest, Value::string("900150983cd24fb0d6963f7d28e17f72"));

    assert!(matches!(
        resolve(&Value::string("${hmac_sha256(k, v)}"), &scope),
        Err(AteError::FunctionNotFound(_))
    ));
}
