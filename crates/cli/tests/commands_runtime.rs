use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use commission_cli::commands::{config, import, migrate, resolve, validate};
use serde_json::Value;
use tempfile::TempDir;

const CATALOGUE: &str = r#"
[[policies]]
policy_code = "DEFAULT"
name = "Platform default"
policy_type = "default"
status = "active"

[policies.rule]
commission_type = "percentage"
rate = "5"

[[policies]]
policy_code = "LAUNCH"
name = "Launch week"
policy_type = "promotional"
status = "scheduled"
priority = 80

[policies.rule]
commission_type = "percentage"
rate = "12"

[policies.conditions]
valid_from = "2026-03-01T00:00:00Z"
valid_until = "2026-03-07T23:59:59Z"

[policies.usage]
max_usage_total = 1
"#;

const ORDER: &str = r#"{
  "partner_id": "partner-7",
  "product_id": "sku-1",
  "order_amount": "200.00",
  "quantity": 1
}"#;

const DURING_LAUNCH: &str = "2026-03-03T12:00:00Z";

#[test]
fn validate_reports_policy_count_and_checksum() {
    let dir = TempDir::new().expect("tempdir");
    let policies = write(&dir, "policies.toml", CATALOGUE);

    with_env(&[], || {
        let result = validate::run(Some(policies.clone()));
        assert_eq!(result.exit_code, 0, "expected valid catalogue: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "validate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["data"]["policy_count"], 2);
        assert_eq!(payload["data"]["default_policy"], "DEFAULT");
        assert!(payload["data"]["checksum"].as_str().is_some_and(|sum| sum.starts_with("sha256:")));
    });
}

#[test]
fn validate_rejects_catalogue_without_default() {
    let dir = TempDir::new().expect("tempdir");
    let without_default =
        CATALOGUE.replace("policy_type = \"default\"", "policy_type = \"category\"");
    let policies = write(&dir, "policies.toml", &without_default);

    with_env(&[], || {
        let result = validate::run(Some(policies.clone()));
        assert_eq!(result.exit_code, 3);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "policy_configuration");
    });
}

#[test]
fn validate_without_policy_file_is_a_usage_error() {
    with_env(&[], || {
        let result = validate::run(None);
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "missing_argument");
    });
}

#[test]
fn validate_uses_policy_file_from_env() {
    let dir = TempDir::new().expect("tempdir");
    let policies = write(&dir, "policies.toml", CATALOGUE);
    let policies = policies.to_string_lossy().into_owned();

    with_env(&[("COMMISSION_ENGINE_POLICY_FILE", policies.as_str())], || {
        let result = validate::run(None);
        assert_eq!(result.exit_code, 0, "expected env policy file: {}", result.output);
    });
}

#[test]
fn resolve_applies_promotion_inside_its_window() {
    let dir = TempDir::new().expect("tempdir");
    let policies = write(&dir, "policies.toml", CATALOGUE);
    let order = write(&dir, "order.json", ORDER);

    with_env(&[], || {
        let result =
            resolve::run(Some(policies.clone()), order.clone(), Some(DURING_LAUNCH.into()));
        assert_eq!(result.exit_code, 0, "expected resolution: {}", result.output);

        let payload = parse_payload(&result.output);
        let commission = &payload["data"]["result"];
        assert_eq!(commission["applied_policy_codes"][0], "LAUNCH");
        assert_eq!(commission["total_commission"], "24.00");
        assert_eq!(commission["resolution_trace"].as_array().map(Vec::len), Some(2));
    });
}

#[test]
fn resolve_falls_back_to_default_outside_the_window() {
    let dir = TempDir::new().expect("tempdir");
    let policies = write(&dir, "policies.toml", CATALOGUE);
    let order = write(&dir, "order.json", ORDER);

    with_env(&[], || {
        let result = resolve::run(
            Some(policies.clone()),
            order.clone(),
            Some("2026-04-01T00:00:00Z".into()),
        );
        assert_eq!(result.exit_code, 0, "expected resolution: {}", result.output);

        let commission = &parse_payload(&result.output)["data"]["result"];
        assert_eq!(commission["applied_policy_codes"][0], "DEFAULT");
        assert_eq!(commission["total_commission"], "10.00");

        let trace = commission["resolution_trace"].as_array().cloned().unwrap_or_default();
        let launch =
            trace.iter().find(|entry| entry["policy_code"] == "LAUNCH").expect("launch trace");
        assert_eq!(launch["reason"], "inactive-or-expired");
    });
}

#[test]
fn resolve_rejects_negative_order_amount() {
    let dir = TempDir::new().expect("tempdir");
    let policies = write(&dir, "policies.toml", CATALOGUE);
    let order = write(&dir, "order.json", &ORDER.replace("200.00", "-1"));

    with_env(&[], || {
        let result = resolve::run(Some(policies.clone()), order.clone(), None);
        assert_eq!(result.exit_code, 6);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_order");
    });
}

#[test]
fn resolve_rejects_malformed_instant() {
    let dir = TempDir::new().expect("tempdir");
    let policies = write(&dir, "policies.toml", CATALOGUE);
    let order = write(&dir, "order.json", ORDER);

    with_env(&[], || {
        let result = resolve::run(Some(policies.clone()), order.clone(), Some("tomorrow".into()));
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_argument");
    });
}

#[test]
fn sqlite_backend_persists_quota_across_invocations() {
    let dir = TempDir::new().expect("tempdir");
    let policies = write(&dir, "policies.toml", CATALOGUE);
    let order = write(&dir, "order.json", ORDER);
    let database_url = sqlite_url(dir.path());

    with_env(
        &[
            ("COMMISSION_DATABASE_URL", database_url.as_str()),
            ("COMMISSION_ENGINE_USAGE_BACKEND", "sqlite"),
        ],
        || {
            let first =
                resolve::run(Some(policies.clone()), order.clone(), Some(DURING_LAUNCH.into()));
            assert_eq!(first.exit_code, 0, "first resolution: {}", first.output);
            assert_eq!(
                parse_payload(&first.output)["data"]["result"]["applied_policy_codes"][0],
                "LAUNCH"
            );

            let second =
                resolve::run(Some(policies.clone()), order.clone(), Some(DURING_LAUNCH.into()));
            assert_eq!(second.exit_code, 0, "second resolution: {}", second.output);
            let commission = &parse_payload(&second.output)["data"]["result"];
            assert_eq!(commission["applied_policy_codes"][0], "DEFAULT");
            assert_eq!(commission["total_commission"], "10.00");
        },
    );
}

#[test]
fn imported_catalogue_serves_resolution_without_policy_file() {
    let dir = TempDir::new().expect("tempdir");
    let policies = write(&dir, "policies.toml", CATALOGUE);
    let order = write(&dir, "order.json", ORDER);
    let database_url = sqlite_url(dir.path());

    with_env(
        &[
            ("COMMISSION_DATABASE_URL", database_url.as_str()),
            ("COMMISSION_ENGINE_USAGE_BACKEND", "sqlite"),
        ],
        || {
            let imported = import::run(Some(policies.clone()));
            assert_eq!(imported.exit_code, 0, "import: {}", imported.output);
            assert_eq!(parse_payload(&imported.output)["data"]["policy_count"], 2);

            let first = resolve::run(None, order.clone(), Some(DURING_LAUNCH.into()));
            assert_eq!(first.exit_code, 0, "first resolution: {}", first.output);
            assert_eq!(
                parse_payload(&first.output)["data"]["result"]["applied_policy_codes"][0],
                "LAUNCH"
            );

            // The tracker expired LAUNCH in the policy table as well.
            let second = resolve::run(None, order.clone(), Some(DURING_LAUNCH.into()));
            let commission = &parse_payload(&second.output)["data"]["result"];
            assert_eq!(commission["applied_policy_codes"][0], "DEFAULT");
        },
    );
}

#[test]
fn reimport_with_renamed_default_replaces_the_stored_catalogue() {
    let dir = TempDir::new().expect("tempdir");
    let original = write(&dir, "policies.toml", CATALOGUE);
    let renamed = write(&dir, "renamed.toml", &CATALOGUE.replace("\"DEFAULT\"", "\"BASE\""));
    let order = write(&dir, "order.json", ORDER);
    let database_url = sqlite_url(dir.path());

    with_env(
        &[
            ("COMMISSION_DATABASE_URL", database_url.as_str()),
            ("COMMISSION_ENGINE_USAGE_BACKEND", "sqlite"),
        ],
        || {
            let first = import::run(Some(original.clone()));
            assert_eq!(first.exit_code, 0, "first import: {}", first.output);
            let second = import::run(Some(renamed.clone()));
            assert_eq!(second.exit_code, 0, "second import: {}", second.output);

            let result = resolve::run(None, order.clone(), Some("2026-04-01T00:00:00Z".into()));
            assert_eq!(result.exit_code, 0, "resolution from store: {}", result.output);

            let commission = &parse_payload(&result.output)["data"]["result"];
            assert_eq!(commission["applied_policy_codes"][0], "BASE");
            assert_eq!(commission["resolution_trace"].as_array().map(Vec::len), Some(2));
        },
    );
}

#[test]
fn memory_backend_requires_a_policy_file_for_resolve() {
    let dir = TempDir::new().expect("tempdir");
    let order = write(&dir, "order.json", ORDER);

    with_env(&[], || {
        let result = resolve::run(None, order.clone(), None);
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "missing_argument");
    });
}

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("COMMISSION_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_reports_invalid_database_url() {
    with_env(&[("COMMISSION_DATABASE_URL", "postgres://nope")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "config_validation");
    });
}

#[test]
fn config_reports_env_sources() {
    with_env(&[("COMMISSION_ENGINE_USAGE_BACKEND", "sqlite")], || {
        let output = config::run();
        assert!(output.contains(
            "- engine.usage_backend = sqlite (source: env (COMMISSION_ENGINE_USAGE_BACKEND))"
        ));
        assert!(output.contains("- logging.level = info (source: default)"));
    });
}

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write fixture");
    path
}

fn sqlite_url(dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", dir.join("commission.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "COMMISSION_DATABASE_URL",
        "COMMISSION_DATABASE_MAX_CONNECTIONS",
        "COMMISSION_DATABASE_TIMEOUT_SECS",
        "COMMISSION_ENGINE_POLICY_FILE",
        "COMMISSION_ENGINE_USAGE_BACKEND",
        "COMMISSION_LOGGING_LEVEL",
        "COMMISSION_LOGGING_FORMAT",
        "COMMISSION_LOG_LEVEL",
        "COMMISSION_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        match value {
            Some(value) => env::set_var(key, value),
            None => env::remove_var(key),
        }
    }
}
