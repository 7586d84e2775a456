pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use commission_core::config::{AppConfig, LoadOptions, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "commission",
    about = "Commission policy operator CLI",
    long_about = "Validate policy catalogues, resolve commissions for orders, and manage the \
                  usage store.",
    after_help = "Examples:
  commission validate --policies policies.toml
  commission resolve --policies policies.toml --order order.json
  commission config"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Load and validate a policy catalogue without evaluating anything")]
    Validate {
        #[arg(long, help = "Policy catalogue (TOML, or JSON by extension)")]
        policies: Option<PathBuf>,
    },
    #[command(about = "Resolve the commission for one order and print the result with its trace")]
    Resolve {
        #[arg(long, help = "Policy catalogue; the sqlite backend falls back to stored policies")]
        policies: Option<PathBuf>,
        #[arg(long, help = "Order context (JSON, or TOML by extension)")]
        order: PathBuf,
        #[arg(long, help = "Evaluation instant as RFC 3339; defaults to now")]
        at: Option<String>,
    },
    #[command(about = "Validate a policy catalogue and store it in the database")]
    Import {
        #[arg(long, help = "Policy catalogue (TOML, or JSON by extension)")]
        policies: Option<PathBuf>,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    if let Err(error) = init_logging() {
        eprintln!("logging disabled: {error:#}");
    }

    let result = match cli.command {
        Command::Validate { policies } => commands::validate::run(policies),
        Command::Resolve { policies, order, at } => commands::resolve::run(policies, order, at),
        Command::Import { policies } => commands::import::run(policies),
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout carries only the command payload. An invalid config falls
/// back to defaults here; the command itself reports the config error.
fn init_logging() -> anyhow::Result<()> {
    use anyhow::anyhow;
    use tracing::Level;

    let config = AppConfig::load(LoadOptions::default()).unwrap_or_default();
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let installed = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|error| anyhow!("failed to install tracing subscriber: {error}"))
}
