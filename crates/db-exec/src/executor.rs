use crate::error::ExecError;
use async_trait::async_trait;
use db_model::Value;
use std::collections::HashMap;

/// The execution surface the bulk pipeline (C7) drives. A dialect
/// adapter (`mysql`/`postgres`) implements this once per driver; the
/// pipeline itself never touches `mysql_async`/`tokio-postgres`
/// directly.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Executes `sql` (containing `:name` tokens) once per row in
    /// `rows`, returning the total affected-row count. Used by the
    /// insert-shaped streamed operations, where every row binds the
    /// same named-parameter statement.
    async fn named_exec_batch(
        &self,
        sql: &str,
        rows: &[HashMap<String, Value>],
    ) -> Result<u64, ExecError>;

    /// Prepares `sql` once, executes it once per row in its own
    /// transaction, then commits (spec.md §4.7 `UpdateStreamed`).
    async fn named_exec_transaction(
        &self,
        sql: &str,
        rows: &[HashMap<String, Value>],
    ) -> Result<u64, ExecError>;

    /// Executes `sql` (containing positional `?` tokens) once, with
    /// `params` bound in order (spec.md §4.7 `DeleteStreamed`).
    async fn positional_exec(&self, sql: &str, params: &[Value]) -> Result<u64, ExecError>;

    /// Executes `sql` (an `EXISTS`/`SELECT 1 ...`-shaped named-parameter
    /// query) and reports whether it returned a row. The one read
    /// primitive this crate exposes, added for `db-ha`'s responsibility
    /// claim (spec.md §4.9 step 2: "query whether any *other* instance
    /// ... holds responsible"), not a general row-returning query API
    /// (spec.md Non-goals exclude a general query builder/ORM).
    async fn named_query_exists(&self, sql: &str, params: &HashMap<String, Value>) -> Result<bool, ExecError>;
}
