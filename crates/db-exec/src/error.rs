use thiserror::Error;

/// The error surface of a single statement execution, wrapped with
/// enough context (table, offending SQL text) that every DB error
/// path is diagnosable without re-deriving it from a backtrace
/// (spec.md §7 "a helper `CantPerformQuery(err, query)` is used").
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{source} (query: {query})")]
    Query {
        query: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("connection attempt failed: {0}")]
    Connect(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("on-init-conn hook failed: {0}")]
    InitConn(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("success callback failed, aborting pipeline: {0}")]
    Callback(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("query construction failed: {0}")]
    Model(#[from] db_model::ModelError),
}

impl ExecError {
    /// Wraps a driver error with the query text that triggered it.
    pub fn cant_perform_query(
        err: impl std::error::Error + Send + Sync + 'static,
        query: impl Into<String>,
    ) -> Self {
        ExecError::Query {
            query: query.into(),
            source: Box::new(err),
        }
    }
}
