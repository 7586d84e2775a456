use std::path::PathBuf;

use serde_json::json;
use tracing::info;

use crate::commands::{load_config, load_policy_file, policy_path, CommandResult};

const COMMAND: &str = "validate";

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

    match load_policy_file(&path) {
        Ok(set) => {
            info!(
                event_name = "commission.cli.validate",
                policies = set.policies().len(),
                checksum = %set.checksum(),
                "policy catalogue is valid"
            );
            CommandResult::success_with(
                COMMAND,
                format!("{} policies are valid", set.policies().len()),
                Some(json!({
                    "policy_count": set.policies().len(),
                    "default_policy": set.default_policy().policy_code,
                    "checksum": set.checksum(),
                })),
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    }
}
