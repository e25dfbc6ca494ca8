use anyhow::Context;
use clap::{Parser, Subcommand};
use reviewdb_migrator::{
    create_registry, read_config, DatabaseConfig, MigrationRunner, MigratorConfig, RetryPolicy,
    RetrySupervisor, ScriptCatalog,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Review DB Migrator - applies versioned schema migrations to the review database
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Connection URL of the target database.
    /// Example: --connectionString "sqlite://review.db?mode=rwc"
    #[arg(
        short = 'c',
        long = "connectionString",
        visible_alias = "conn",
        env = "REVIEWDB_CONNECTION_STRING",
        value_parser = non_blank
    )]
    connection_string: String,

    /// JSON file overriding the ledger table, backoff schedule and paused-server markers
    #[arg(long, env = "REVIEWDB_MIGRATOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Apply all pending migrations (default)
    Up,
    /// Revert applied migrations with a version greater than TARGET
    Down {
        #[arg(long)]
        target: i64,
    },
    /// List registered migrations and whether they are applied
    Status,
}

fn non_blank(value: &str) -> Result<String, String> {
    if value.trim().is_empty() {
        return Err("Connection string is required.".to_string());
    }
    Ok(value.to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to initialize logging: {e}");
    }

    // Parse CLI arguments; exits with usage on failure
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Migration aborted: {e:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => read_config(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?,
        None => MigratorConfig::default(),
    };

    let database = DatabaseConfig::new(args.connection_string, config.ledger_table.clone())?;
    info!(
        dialect = %database.dialect,
        ledger_table = %database.ledger_table,
        "Starting migrator"
    );

    let supervisor = RetrySupervisor::new(RetryPolicy::from_config(&config, database.dialect));
    let runner = MigrationRunner::new(
        database,
        create_registry(),
        Arc::new(ScriptCatalog::embedded()),
    );

    match args.command.unwrap_or(Command::Up) {
        Command::Up => {
            let report = supervisor.run_with_retries(|| runner.migrate_up()).await?;
            info!(
                versions = ?report.versions,
                "Migrations completed successfully. If there were no migrations to run, then there will be no other output."
            );
        }
        Command::Down { target } => {
            let report = supervisor
                .run_with_retries(|| runner.migrate_down(target))
                .await?;
            info!(target, versions = ?report.versions, "Rollback completed successfully");
        }
        Command::Status => {
            let statuses = supervisor.run_with_retries(|| runner.status()).await?;
            for status in statuses {
                match status.applied_at_utc {
                    Some(applied_at) => info!(
                        version = status.version,
                        description = %status.description,
                        applied_at = %applied_at.to_rfc3339(),
                        "Applied"
                    ),
                    None => info!(
                        version = status.version,
                        description = %status.description,
                        "Pending"
                    ),
                }
            }
        }
    }

    Ok(())
}
