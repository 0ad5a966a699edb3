use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] db_config::ConfigError),

    #[error("database error: {0}")]
    Exec(#[from] db_exec::ExecError),

    #[error("shutdown requested")]
    ShutdownRequested,
}
