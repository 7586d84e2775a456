use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use commission_core::commission::policy_set::PolicySet;
use commission_core::commission::usage::{InMemoryUsageTracker, UsageTracker};
use commission_core::commission::ResolutionEngine;
use commission_core::config::{AppConfig, UsageBackend};
use commission_core::domain::order::OrderContext;
use commission_core::domain::result::CommissionResult;
use commission_core::errors::ApplicationError;
use commission_db::{PolicyRepository, SqlPolicyRepository, SqlUsageTracker};
use serde_json::json;

use crate::commands::{
    build_runtime, load_config, load_policy_file, open_database, policy_path, read_document,
    CommandResult, Failure,
};

const COMMAND: &str = "resolve";

pub fn run(policies: Option<PathBuf>, order: PathBuf, at: Option<String>) -> CommandResult {
    let config = match load_config(COMMAND) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let now = match parse_instant(at.as_deref()) {
        Ok(now) => now,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    };

    let ctx: OrderContext = match read_document(&order) {
        Ok(ctx) => ctx,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    };

    let runtime = match build_runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let policies = policy_path(policies, &config);
    let result = runtime.block_on(resolve_with_backend(&config, policies.as_deref(), &ctx, now));

    match result {
        Ok(result) => CommandResult::success_with(
            COMMAND,
            summary(&result),
            Some(json!({ "evaluated_at": now.to_rfc3339(), "result": result })),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    }
}

async fn resolve_with_backend(
    config: &AppConfig,
    policies: Option<&Path>,
    ctx: &OrderContext,
    now: DateTime<Utc>,
) -> Result<CommissionResult, Failure> {
    match config.engine.usage_backend {
        UsageBackend::Memory => {
            let Some(path) = policies else {
                return Err((
                    "missing_argument",
                    "the memory backend needs a policy file \
                     (pass --policies or set engine.policy_file)"
                        .to_string(),
                    2,
                ));
            };
            let set = load_policy_file(path)?;
            evaluate(ResolutionEngine::new(InMemoryUsageTracker::default()), &set, ctx, now).await
        }
        UsageBackend::Sqlite => {
            let pool = open_database(config).await?;
            let set = match policies {
                Some(path) => load_policy_file(path)?,
                None => {
                    let stored = SqlPolicyRepository::new(pool.clone())
                        .list_all()
                        .await
                        .map_err(|error| ("persistence", error.to_string(), 5))?;
                    PolicySet::load(stored)
                        .map_err(|error| ("policy_configuration", error.to_string(), 3))?
                }
            };
            let outcome =
                evaluate(ResolutionEngine::new(SqlUsageTracker::new(pool.clone())), &set, ctx, now)
                    .await;
            pool.close().await;
            outcome
        }
    }
}

async fn evaluate<T: UsageTracker>(
    engine: ResolutionEngine<T>,
    set: &PolicySet,
    ctx: &OrderContext,
    now: DateTime<Utc>,
) -> Result<CommissionResult, Failure> {
    engine.resolve(set, ctx, now).await.map_err(|error| {
        let exit_code = match error {
            ApplicationError::Configuration(_) => 3,
            ApplicationError::Persistence(_) => 5,
            ApplicationError::InvalidOrder(_) => 6,
        };
        (error.error_class(), error.to_string(), exit_code)
    })
}

fn parse_instant(at: Option<&str>) -> Result<DateTime<Utc>, Failure> {
    match at {
        None => Ok(Utc::now()),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|instant| instant.with_timezone(&Utc))
            .map_err(|error| {
                ("invalid_argument", format!("--at `{raw}` is not RFC 3339: {error}"), 2)
            }),
    }
}

fn summary(result: &CommissionResult) -> String {
    if result.is_zero_commission() {
        return "no policy applied; commission is 0".to_string();
    }
    let applied: Vec<&str> =
        result.applied_policy_codes.iter().map(|code| code.as_str()).collect();
    format!("commission {} from {}", result.total_commission, applied.join(", "))
}
