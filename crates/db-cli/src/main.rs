use clap::Parser;
use error::CliError;
use shutdown::{ExitCode, ShutdownCoordinator};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod error;
mod logging;
mod shutdown;

/// Reference embedder for the streaming database execution engine:
/// loads a database config, opens one connection, then idles until a
/// shutdown signal arrives.
#[derive(Parser)]
#[command(name = "db-cli", version, about = "Reference embedder for the streaming database execution engine")]
struct Cli {
    /// Path to the YAML database configuration file.
    #[arg(long)]
    config: String,

    /// Environment variable prefix used for the config overlay (spec.md §6).
    #[arg(long, default_value = "SERVICE")]
    env_prefix: String,

    /// Emit journald-native PRIORITY=/MESSAGE= field blocks instead of
    /// plain text.
    #[arg(long)]
    journald: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.journald);

    let exit_code = match run(cli).await {
        Ok(()) => ExitCode::Success,
        Err(CliError::ShutdownRequested) => {
            info!("shutdown requested, exiting gracefully");
            ExitCode::ShutdownRequested
        }
        Err(err) => {
            error!(error = %err, "fatal startup failure");
            ExitCode::GeneralError
        }
    };

    std::process::exit(exit_code.as_i32());
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config: db_config::DatabaseConfig = db_config::load(&cli.config, &cli.env_prefix)?;
    config.validate()?;
    info!(uri = %config.database_uri(), "connecting to database");

    let password = config.resolved_password()?.unwrap_or_default();
    let cancel = CancellationToken::new();
    let coordinator = ShutdownCoordinator::new(cancel.clone());
    coordinator.register_handlers();

    match config.db_type {
        db_config::DbType::Mysql => {
            let url = format!(
                "mysql://{}:{}@{}:{}/{}",
                config.user,
                password,
                config.host,
                config.port(),
                config.database
            );
            let _executor = db_exec::MySqlExecutor::connect(&url, config.options.wsrep_sync_wait)?;
            info!("MySQL connection pool established");
        }
        db_config::DbType::Pgsql => {
            let url = format!(
                "postgres://{}:{}@{}:{}/{}",
                config.user,
                password,
                config.host,
                config.port(),
                config.database
            );
            let _executor = db_exec::PostgresExecutor::connect(&url).await?;
            info!("PostgreSQL connection established");
        }
    }

    cancel.cancelled().await;
    if coordinator.is_shutdown_requested() {
        return Err(CliError::ShutdownRequested);
    }
    Ok(())
}
