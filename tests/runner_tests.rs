//! Integration tests for the runner
//!
//! Runs the fixture project under tests/data against an in-memory server,
//! plus throw-away projects for failure handling.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use ate::http::Body;
use ate::{
    map, AteError, FunctionRegistry, HttpClient, Map, ProjectConfig, Request, Response, Result,
    Runner, Value,
};
use indexmap::IndexMap;
use serde_json::json;

const TOKEN: &str = "baNLX1zhFYP11Seb";
const BASE_URL: &str = "http://127.0.0.1:5000";

/// A tiny user service kept in memory.
#[derive(Default)]
struct MockServer {
    requests: Vec<Request>,
    users: HashMap<String, String>,
}

impl MockServer {
    fn route(&mut self, request: &Request) -> (u16, serde_json::Value) {
        let path = request.url.strip_prefix(BASE_URL).unwrap_or(&request.url);

        if request.method == "POST" && path == "/api/get-token" {
            let signed = matches!(&request.body, Body::Json(body) if body.get("sign").is_some());
            if !signed || !request.headers.contains_key("user-agent") {
                return (400, json!({"success": false}));
            }
            return (200, json!({"success": true, "token": TOKEN}));
        }

        if request.headers.get("token").map(String::as_str) != Some(TOKEN) {
            return (403, json!({"success": false, "msg": "Authorization failed!"}));
        }

        match (request.method.as_str(), path) {
            ("GET", "/api/users") => (200, json!({"success": true, "count": self.users.len()})),
            ("POST", p) if p.starts_with("/api/users/") => {
                let uid = p.trim_start_matches("/api/users/").to_string();
                let name = match &request.body {
                    Body::Json(body) => body.get("name").map(Value::to_text).unwrap_or_default(),
                    _ => String::new(),
                };
                self.users.insert(uid, name);
                (201, json!({"success": true}))
            }
            ("GET", p) if p.starts_with("/api/users/") => {
                let uid = p.trim_start_matches("/api/users/");
                match self.users.get(uid) {
                    Some(name) => (200, json!({"success": true, "data": {"name": name}})),
                    None => (404, json!({"success": false})),
                }
            }
            _ => (404, json!({"success": false})),
        }
    }
}

impl HttpClient for MockServer {
    fn send(&mut self, request: &Request) -> Result<Response> {
        self.requests.push(request.clone());
        let (status, body) = self.route(request);
        let headers = IndexMap::from([(
            "content-type".to_string(),
            "application/json".to_string(),
        )]);
        Ok(Response::new(status, headers, body.to_string(), 1.0, request.url.clone()))
    }
}

fn fixture_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data")
}

fn fixture_runner() -> Runner<MockServer> {
    let config = ProjectConfig::discover(&fixture_root()).unwrap();
    Runner::new(MockServer::default(), &config, FunctionRegistry::with_builtins())
}

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

// ============================================================================
// Fixture project
// ============================================================================

#[test]
fn test_smoke_testset_passes() {
    let mut runner = fixture_runner();
    let summary = runner
        .run_path(&fixture_root().join("testcases/smoke.yml"), &Map::new())
        .unwrap();

    for step in summary.testsets.iter().flat_map(|t| &t.steps) {
        assert!(step.passed, "step '{}' failed: {:?}", step.name, step.error);
    }
    assert!(summary.success);
    assert_eq!(summary.stats.testsets, 1);
    assert_eq!(summary.stats.steps, 6);
    assert_eq!(summary.stats.failed, 0);

    let testset = &summary.testsets[0];
    assert_eq!(testset.name, "smoke 2.8.6");
    assert_eq!(testset.output.get("token"), Some(&Value::string(TOKEN)));
}

#[test]
fn test_step_names_are_resolved() {
    let mut runner = fixture_runner();
    let summary = runner
        .run_path(&fixture_root().join("testcases/smoke.yml"), &Map::new())
        .unwrap();

    let names: Vec<(&str, u32)> = summary.testsets[0]
        .steps
        .iter()
        .map(|s| (s.name.as_str(), s.iteration))
        .collect();
    assert_eq!(
        names,
        vec![
            ("get token", 1),
            ("create user 1000", 1),
            ("create user 1001", 1),
            ("check user 1001", 1),
            ("list users", 1),
            ("list users", 2),
        ]
    );
}

#[test]
fn test_requests_built_from_definitions() {
    let mut runner = fixture_runner();
    runner
        .run_path(&fixture_root().join("testcases/smoke.yml"), &Map::new())
        .unwrap();

    let requests = &runner.client().requests;
    assert_eq!(requests.len(), 6);

    let token_request = &requests[0];
    assert_eq!(token_request.method, "POST");
    assert_eq!(token_request.url, "http://127.0.0.1:5000/api/get-token");
    // module variables, config variables and config request defaults
    assert_eq!(token_request.headers["user-agent"], "iOS/10.3");
    assert_eq!(token_request.headers["device_sn"], "ABCDEF0123456789");
    assert_eq!(token_request.headers["app_version"], "2.8.6");
    assert_eq!(token_request.headers["x-run"], "smoke");
    let Body::Json(body) = &token_request.body else {
        panic!("expected a json body");
    };
    let sign = body.get("sign").unwrap().to_text();
    assert_eq!(sign.len(), 40);
    assert!(sign.chars().all(|c| c.is_ascii_hexdigit()));

    let create = &requests[2];
    assert_eq!(create.url, "http://127.0.0.1:5000/api/users/1001");
    assert_eq!(create.headers["token"], TOKEN);
    assert_eq!(
        create.body,
        Body::Json(Value::Map(map! { "name" => "user1001" }))
    );
}

#[test]
fn test_overrides_replace_config_variables() {
    let mut runner = fixture_runner();
    let overrides = map! { "uid" => 2000, "app_version" => "3.0.0" };
    let summary = runner
        .run_path(&fixture_root().join("testcases/smoke.yml"), &overrides)
        .unwrap();

    assert!(summary.success);
    assert_eq!(summary.testsets[0].name, "smoke 3.0.0");
    let requests = &runner.client().requests;
    assert_eq!(requests[0].headers["app_version"], "3.0.0");
    assert_eq!(requests[1].url, "http://127.0.0.1:5000/api/users/2000");
}

#[test]
fn test_check_reports_definition_errors() {
    let runner = fixture_runner();

    let reports = runner.check_path(&fixture_root().join("testcases")).unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].errors.is_empty(), "{:?}", reports[0].errors);
    assert_eq!(reports[0].steps, 5);

    let reports = runner.check_path(&fixture_root().join("broken")).unwrap();
    assert_eq!(reports.len(), 1);
    let errors = &reports[0].errors;
    assert_eq!(errors.len(), 2);
    assert!(errors[0].contains("missing api"));
    assert!(errors[0].contains("API not found: delete_user"));
    assert!(errors[1].contains("takes 2 argument(s) but 1 were given"));

    assert!(runner.client().requests.is_empty());
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn test_failed_validator_fails_only_its_step() {
    let dir = tempfile::tempdir().unwrap();
    let testset = write(
        dir.path(),
        "tests/testcases/validate.yml",
        r#"
- config:
    name: validation
    request:
      base_url: http://127.0.0.1:5000
- test:
    name: token
    request: {url: /api/get-token, method: POST, headers: {User-Agent: x}, json: {sign: s}}
    extract:
      - token: content.token
    validate:
      - eq: [status_code, 201]
- test:
    name: users
    request: {url: /api/users, method: GET, headers: {token: $token}}
    validate:
      - eq: [status_code, 200]
"#,
    );
    let config = ProjectConfig::discover(dir.path()).unwrap();
    let mut runner = Runner::new(MockServer::default(), &config, FunctionRegistry::new());

    let summary = runner.run_path(&testset, &Map::new()).unwrap();
    assert!(!summary.success);
    assert_eq!(summary.stats.passed, 1);
    assert_eq!(summary.stats.failed, 1);

    let steps = &summary.testsets[0].steps;
    assert!(!steps[0].passed);
    let error = steps[0].error.as_deref().unwrap();
    assert!(error.contains("Step 'token'"), "{}", error);
    assert!(error.contains("status_code eq 201 (actual: 200)"), "{}", error);
    // extraction still happened before validation
    assert!(steps[1].passed);
}

#[test]
fn test_unresolved_variable_sends_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let testset = write(
        dir.path(),
        "tests/testcases/missing.yml",
        r#"
config:
  name: missing variable
teststeps:
  - name: no token
    request: {url: "http://127.0.0.1:5000/api/users", method: GET, headers: {token: $ate_no_such_token}}
  - name: no function
    request: {url: "http://127.0.0.1:5000/api/users?x=${nope(1)}", method: GET}
"#,
    );
    let config = ProjectConfig::discover(dir.path()).unwrap();
    let mut runner = Runner::new(MockServer::default(), &config, FunctionRegistry::new());

    let summary = runner.run_path(&testset, &Map::new()).unwrap();
    let steps = &summary.testsets[0].steps;
    assert!(steps[0]
        .error
        .as_deref()
        .unwrap()
        .contains("Variable not found: ate_no_such_token"));
    assert!(steps[1]
        .error
        .as_deref()
        .unwrap()
        .contains("Function not found: nope"));
    assert!(runner.client().requests.is_empty());
}

#[test]
fn test_extends_appends_validators() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "tests/api/token.yml",
        r#"
- api:
    def: get_token($agent)
    request: {url: /api/get-token, method: POST, headers: {User-Agent: $agent}, json: {sign: s}}
    validate:
      - eq: [status_code, 200]
"#,
    );
    let testset = write(
        dir.path(),
        "tests/testcases/extends.yml",
        r#"
- config:
    name: extends
- test:
    name: token with extra checks
    extends:
      api: get_token(ios)
    validate:
      - len_eq: [content.token, 16]
      - eq: [headers.content-type, application/json]
"#,
    );
    let config = ProjectConfig::discover(dir.path()).unwrap();
    let mut runner = Runner::new(MockServer::default(), &config, FunctionRegistry::new())
        .with_base_url(Some(BASE_URL.to_string()));

    let summary = runner.run_path(&testset, &Map::new()).unwrap();
    assert!(summary.success, "{:?}", summary.testsets[0].steps[0].error);
    assert_eq!(summary.testsets[0].steps[0].validators.len(), 3);
    assert_eq!(runner.client().requests[0].headers["user-agent"], "ios");
}

#[test]
fn test_bad_config_fails_testset() {
    let dir = tempfile::tempdir().unwrap();
    let testset = write(
        dir.path(),
        "tests/testcases/bad.yml",
        r#"
- config:
    name: bad config
    functions:
      sign: no_such_builtin
- test:
    name: never runs
    request: {url: /x, method: GET}
"#,
    );
    let config = ProjectConfig::discover(dir.path()).unwrap();
    let mut runner = Runner::new(MockServer::default(), &config, FunctionRegistry::with_builtins());

    let summary = runner.run_path(&testset, &Map::new()).unwrap();
    let result = &summary.testsets[0];
    assert!(!result.success);
    assert!(result.steps.is_empty());
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("Function not found: no_such_builtin"));
}

#[test]
fn test_missing_path_is_load_error() {
    let mut runner = fixture_runner();
    let err = runner
        .run_path(&fixture_root().join("nope"), &Map::new())
        .unwrap_err();
    assert!(matches!(err, AteError::Load { .. }));
}
