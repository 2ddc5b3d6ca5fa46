//! Billing Engine - Operator Binary
//!
//! # Usage
//!
//! ```bash
//! billing-engine migrate
//! billing-engine summary --business <id> --project <id>
//! ENGINE_LOG_FORMAT=json billing-engine backfill-legacy-payments --business <id>
//! ```
//!
//! Configuration comes from `ENGINE_*` environment variables; see
//! `interface_cli::config`.

use anyhow::{Context, Result};
use clap::Parser;

use infra_db::{create_pool, run_migrations};
use interface_cli::cli::{execute, Cli, Command};
use interface_cli::config::EngineConfig;
use interface_cli::{build_service, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load().context("loading configuration")?;
    telemetry::init_tracing(&config.log_level, config.log_format).context("installing tracing subscriber")?;

    let settings = config.billing_settings()?;
    tracing::info!(
        command = ?cli.command,
        timezone = settings.timezone.name(),
        horizon = settings.default_horizon_months,
        "Starting billing engine"
    );

    let pool = create_pool(config.database_config())
        .await
        .context("connecting to database")?;

    if let Command::Migrate = cli.command {
        run_migrations(&pool).await.context("applying migrations")?;
        return Ok(());
    }

    let service = build_service(pool, settings);
    let mut stdout = std::io::stdout().lock();
    execute(&cli.command, &service, &mut stdout).await
}
