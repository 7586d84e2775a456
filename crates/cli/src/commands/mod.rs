pub mod config;
pub mod import;
pub mod migrate;
pub mod resolve;
pub mod validate;

use std::fs;
use std::path::{Path, PathBuf};

use commission_core::commission::policy_set::{PolicyCatalogue, PolicySet};
use commission_core::config::{AppConfig, LoadOptions};
use commission_db::{connect_with_config, migrations, DbPool};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with(command, message, None)
    }

    pub fn success_with(command: &str, message: impl Into<String>, data: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            concat!(
                "{{\"command\":\"unknown\",\"status\":\"error\",",
                "\"error_class\":\"serialization\",\"message\":\"{}\"}}"
            ),
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Failure as `(error_class, message, exit_code)`, turned into a `CommandResult` by the caller.
pub(crate) type Failure = (&'static str, String, u8);

pub(crate) fn load_config(command: &str) -> Result<AppConfig, CommandResult> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })
}

pub(crate) fn build_runtime(command: &str) -> Result<tokio::runtime::Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

/// Explicit `--policies` path first, then `engine.policy_file`.
pub(crate) fn policy_path(explicit: Option<PathBuf>, config: &AppConfig) -> Option<PathBuf> {
    explicit.or_else(|| config.engine.policy_file.clone())
}

pub(crate) fn read_catalogue(path: &Path) -> Result<PolicyCatalogue, Failure> {
    read_document(path)
}

pub(crate) fn load_policy_file(path: &Path) -> Result<PolicySet, Failure> {
    let catalogue = read_catalogue(path)?;
    PolicySet::try_from(catalogue)
        .map_err(|error| ("policy_configuration", error.to_string(), 3))
}

/// TOML unless the file ends in `.json`.
pub(crate) fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T, Failure> {
    let raw = fs::read_to_string(path).map_err(|error| {
        ("input_file", format!("could not read `{}`: {error}", path.display()), 2)
    })?;

    let is_json = path.extension().is_some_and(|extension| extension == "json");
    let parsed = if is_json {
        serde_json::from_str(&raw).map_err(|error| error.to_string())
    } else {
        toml::from_str(&raw).map_err(|error| error.to_string())
    };
    parsed.map_err(|error| {
        ("input_file", format!("could not parse `{}`: {error}", path.display()), 2)
    })
}

pub(crate) async fn open_database(config: &AppConfig) -> Result<DbPool, Failure> {
    let pool = connect_with_config(&config.database)
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4))?;
    migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string(), 5))?;
    Ok(pool)
}
