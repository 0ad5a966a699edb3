pub mod connector;
pub mod error;
pub mod executor;
pub mod mysql;
pub mod params;
pub mod pipeline;
pub mod postgres;
pub mod retry;

pub use connector::{Dial, RetryingConnector, DEFAULT_CONNECT_TIMEOUT};
pub use error::ExecError;
pub use executor::SqlExecutor;
pub use mysql::MySqlExecutor;
pub use pipeline::{BulkExecutor, PipelineError, StreamOptions, SuccessCallback};
pub use postgres::PostgresExecutor;
