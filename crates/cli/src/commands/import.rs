use std::path::PathBuf;

use commission_db::{PolicyRepository, SqlPolicyRepository};
use serde_json::json;
use tracing::info;

use crate::commands::{
    build_runtime, load_config, load_policy_file, open_database, policy_path, CommandResult,
    Failure,
};

const COMMAND: &str = "import";

/// Validates a catalogue and makes it the stored catalogue: policies missing from the file
/// are removed, usage counters are kept. Nothing is written when the catalogue is invalid.
pub fn run(policies: Option<PathBuf>) -> CommandResult {
    let config = match load_config(COMMAND) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let Some(path) = policy_path(policies, &config) else {
        return CommandResult::failure(
            COMMAND,
            "missing_argument",
            "no policy file given (pass --policies or set engine.policy_file)",
            2,
        );
    };

    let set = match load_policy_file(&path) {
        Ok(set) => set,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    };

    let runtime = match build_runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let repository = SqlPolicyRepository::new(pool.clone());
        repository
            .replace_all(set.policies().to_vec())
            .await
            .map_err(|error| ("persistence", error.to_string(), 5))?;
        pool.close().await;
        Ok::<(), Failure>(())
    });

    match result {
        Ok(()) => {
            info!(
                event_name = "commission.cli.import",
                policies = set.policies().len(),
                checksum = %set.checksum(),
                "policy catalogue imported"
            );
            CommandResult::success_with(
                COMMAND,
                format!("imported {} policies", set.policies().len()),
                Some(json!({ "policy_count": set.policies().len(), "checksum": set.checksum() })),
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    }
}
