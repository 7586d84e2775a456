use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use commission_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let policy_file = config
        .engine
        .policy_file
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<unset>".to_string());

    let lines = vec![
        "effective config (source precedence: env > file > default):".to_string(),
        render_line(
            "database.url",
            &config.database.url,
            source("database.url", &["COMMISSION_DATABASE_URL"]),
        ),
        render_line(
            "database.max_connections",
            &config.database.max_connections.to_string(),
            source("database.max_connections", &["COMMISSION_DATABASE_MAX_CONNECTIONS"]),
        ),
        render_line(
            "database.timeout_secs",
            &config.database.timeout_secs.to_string(),
            source("database.timeout_secs", &["COMMISSION_DATABASE_TIMEOUT_SECS"]),
        ),
        render_line(
            "engine.policy_file",
            &policy_file,
            source("engine.policy_file", &["COMMISSION_ENGINE_POLICY_FILE"]),
        ),
        render_line(
            "engine.usage_backend",
            config.engine.usage_backend.as_str(),
            source("engine.usage_backend", &["COMMISSION_ENGINE_USAGE_BACKEND"]),
        ),
        render_line(
            "logging.level",
            &config.logging.level,
            source("logging.level", &["COMMISSION_LOGGING_LEVEL", "COMMISSION_LOG_LEVEL"]),
        ),
        render_line(
            "logging.format",
            &format!("{:?}", config.logging.format).to_ascii_lowercase(),
            source("logging.format", &["COMMISSION_LOGGING_FORMAT", "COMMISSION_LOG_FORMAT"]),
        ),
    ];

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("commission.toml"), PathBuf::from("config/commission.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
