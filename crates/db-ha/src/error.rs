use thiserror::Error;

#[derive(Debug, Error)]
pub enum HaError {
    #[error(transparent)]
    Exec(#[from] db_exec::ExecError),
}
