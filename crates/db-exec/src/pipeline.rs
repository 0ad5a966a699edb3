use crate::error::ExecError;
use crate::executor::SqlExecutor;
use crate::retry as classify;
use db_chunk::{NeverSplit, SemaphoreRegistry, SplitOnDupId, SplitPolicy, bulk};
use db_model::{Columns, Entity, ModelError, Rendered, RowValues, Value, column_map_for};
use db_query::SqlDialect;
use db_retry::{Exponential, RetryOutcome, RetrySettings, default_backoff, with_backoff};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Mirrors `spec.md`'s note that a callback error "aborts the whole
/// pipeline" alongside the two error families a streamed operation can
/// otherwise fail with.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Fires at most once per entity, in batch order, after the batch
/// containing it has committed. A callback error aborts the pipeline.
pub type SuccessCallback<E> = Box<dyn Fn(&E) -> Result<(), ExecError> + Send + Sync>;

/// Per-operation knobs a caller layers over the entity's own column
/// map (spec.md §3 StatementDescriptor: explicit table, column
/// allow/exclude lists, WHERE fragment, key columns for upsert).
pub struct StreamOptions<'a, E> {
    pub table_override: Option<&'a str>,
    pub columns: Option<&'a [&'a str]>,
    pub exclude_columns: &'a [&'a str],
    pub key_columns: &'a [&'a str],
    pub upsert_columns: Option<&'a [&'a str]>,
    pub constraint_name: Option<&'a str>,
    pub where_fragment: Option<&'a str>,
    on_success: Vec<SuccessCallback<E>>,
}

impl<'a, E> Default for StreamOptions<'a, E> {
    fn default() -> Self {
        Self {
            table_override: None,
            columns: None,
            exclude_columns: &[],
            key_columns: &[],
            upsert_columns: None,
            constraint_name: None,
            where_fragment: None,
            on_success: Vec::new(),
        }
    }
}

impl<'a, E> StreamOptions<'a, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: &'a str) -> Self {
        self.table_override = Some(table);
        self
    }

    pub fn with_key_columns(mut self, key_columns: &'a [&'a str]) -> Self {
        self.key_columns = key_columns;
        self
    }

    pub fn with_upsert_columns(mut self, columns: &'a [&'a str]) -> Self {
        self.upsert_columns = Some(columns);
        self
    }

    pub fn with_where(mut self, fragment: &'a str) -> Self {
        self.where_fragment = Some(fragment);
        self
    }

    pub fn on_success(mut self, cb: impl Fn(&E) -> Result<(), ExecError> + Send + Sync + 'static) -> Self {
        self.on_success.push(Box::new(cb));
        self
    }
}

/// One policy value standing in for whichever of `NeverSplit` /
/// `SplitOnDupId` a streamed insert variant wants, so every insert
/// path can share a single chunker setup.
enum BatchPolicy {
    Never(NeverSplit),
    DupId(SplitOnDupId),
}

impl<T: Entity> SplitPolicy<T> for BatchPolicy {
    fn should_split(&mut self, item: &T) -> bool {
        match self {
            BatchPolicy::Never(p) => p.should_split(item),
            BatchPolicy::DupId(p) => p.should_split(item),
        }
    }
}

/// The end-to-end streamed write pipeline (C7): stream -> chunk ->
/// per-table-semaphore-gated retry-wrapped execution -> success
/// callbacks. One instance is shared across every streamed call
/// against a single database handle.
pub struct BulkExecutor<X: SqlExecutor> {
    executor: Arc<X>,
    dialect: SqlDialect,
    semaphores: Arc<SemaphoreRegistry>,
    max_placeholders_per_statement: usize,
    max_rows_per_transaction: usize,
    backoff: Exponential,
    progress_interval: Duration,
}

impl<X: SqlExecutor + 'static> BulkExecutor<X> {
    pub fn new(executor: Arc<X>, dialect: SqlDialect, max_connections_per_table: usize) -> Self {
        Self {
            executor,
            dialect,
            semaphores: Arc::new(SemaphoreRegistry::new(max_connections_per_table)),
            max_placeholders_per_statement: 2000,
            max_rows_per_transaction: 1000,
            backoff: default_backoff(),
            progress_interval: Duration::from_secs(5),
        }
    }

    pub fn with_max_placeholders_per_statement(mut self, n: usize) -> Self {
        self.max_placeholders_per_statement = n.max(1);
        self
    }

    pub fn with_max_rows_per_transaction(mut self, n: usize) -> Self {
        self.max_rows_per_transaction = n.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Exponential) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Plain insert: `NeverSplit`, no conflict handling.
    pub async fn insert_streamed<E>(
        &self,
        cancel: &CancellationToken,
        in_rx: mpsc::Receiver<E>,
        opts: StreamOptions<'_, E>,
    ) -> Result<u64, PipelineError>
    where
        E: Entity + Columns + RowValues + Send + 'static,
    {
        self.run_insert_shaped(cancel, in_rx, opts, false, |dialect, table, columns, _opts, _first| {
            db_query::render_insert(dialect, table, columns)
        })
        .await
    }

    /// Insert with a no-op conflict handler: `SplitOnDupId` so a
    /// single statement never binds the same key twice.
    pub async fn insert_ignore_streamed<E>(
        &self,
        cancel: &CancellationToken,
        in_rx: mpsc::Receiver<E>,
        opts: StreamOptions<'_, E>,
    ) -> Result<u64, PipelineError>
    where
        E: Entity + Columns + RowValues + Send + 'static,
    {
        self.run_insert_shaped(cancel, in_rx, opts, true, |dialect, table, columns, opts, first| {
            let constraint_name = opts.constraint_name.or_else(|| first.constraint_name());
            db_query::render_insert_ignore(dialect, table, columns, constraint_name)
        })
        .await
    }

    /// Insert with conflict resolution that updates non-key columns
    /// (or the caller's explicit `upsert_columns`, which is
    /// authoritative over both the auto-derived set and the entity's
    /// own [`Entity::upsert_columns`] capability).
    pub async fn upsert_streamed<E>(
        &self,
        cancel: &CancellationToken,
        in_rx: mpsc::Receiver<E>,
        opts: StreamOptions<'_, E>,
    ) -> Result<u64, PipelineError>
    where
        E: Entity + Columns + RowValues + Send + 'static,
    {
        self.run_insert_shaped(cancel, in_rx, opts, true, |dialect, table, columns, opts, first| {
            let constraint_name = opts.constraint_name.or_else(|| first.constraint_name());
            let upsert_columns = opts.upsert_columns.or_else(|| first.upsert_columns());
            db_query::render_upsert(dialect, table, columns, opts.key_columns, upsert_columns, constraint_name)
        })
        .await
    }

    async fn run_insert_shaped<E, F>(
        &self,
        cancel: &CancellationToken,
        mut in_rx: mpsc::Receiver<E>,
        opts: StreamOptions<'_, E>,
        use_dup_id_policy: bool,
        render: F,
    ) -> Result<u64, PipelineError>
    where
        E: Entity + Columns + RowValues + Send + 'static,
        F: Fn(SqlDialect, &str, &[&str], &StreamOptions<'_, E>, &E) -> Result<Rendered, ModelError>,
    {
        let Some(first) = in_rx.recv().await else {
            return Ok(0);
        };

        let table = opts
            .table_override
            .map(str::to_string)
            .unwrap_or_else(|| first.table_name());
        let column_map = column_map_for::<E>();
        let rendered_columns = column_map.rendered_columns(opts.columns, opts.exclude_columns);
        let rendered = render(self.dialect, &table, &rendered_columns, &opts, &first)?;
        let placeholders_per_row = rendered_columns.len().max(1);
        let cap = (self.max_placeholders_per_statement / placeholders_per_row).max(1);
        let callbacks = Arc::new(opts.on_success);

        let (relay_tx, relay_rx) = mpsc::channel::<E>(cap.max(1));
        tokio::spawn(async move {
            if relay_tx.send(first).await.is_err() {
                return;
            }
            while let Some(item) = in_rx.recv().await {
                if relay_tx.send(item).await.is_err() {
                    return;
                }
            }
        });

        let batches = bulk(cancel.clone(), relay_rx, cap, move || {
            if use_dup_id_policy {
                BatchPolicy::DupId(SplitOnDupId::new())
            } else {
                BatchPolicy::Never(NeverSplit)
            }
        });

        self.drive_rows(cancel, &table, &rendered.sql, batches, callbacks, ExecKind::Batch)
            .await
    }

    /// Size by `MaxRowsPerTransaction`; each batch runs in its own
    /// transaction that prepares the statement once and executes it
    /// per row, then commits.
    pub async fn update_streamed<E>(
        &self,
        cancel: &CancellationToken,
        mut in_rx: mpsc::Receiver<E>,
        opts: StreamOptions<'_, E>,
    ) -> Result<u64, PipelineError>
    where
        E: Entity + Columns + RowValues + Send + 'static,
    {
        let Some(first) = in_rx.recv().await else {
            return Ok(0);
        };

        let table = opts
            .table_override
            .map(str::to_string)
            .unwrap_or_else(|| first.table_name());
        let column_map = column_map_for::<E>();
        let rendered_columns = column_map.rendered_columns(opts.columns, opts.exclude_columns);
        let rendered = db_query::render_update(self.dialect, &table, &rendered_columns, opts.where_fragment)?;
        let cap = self.max_rows_per_transaction;
        let callbacks = Arc::new(opts.on_success);

        let (relay_tx, relay_rx) = mpsc::channel::<E>(cap.max(1));
        tokio::spawn(async move {
            if relay_tx.send(first).await.is_err() {
                return;
            }
            while let Some(item) = in_rx.recv().await {
                if relay_tx.send(item).await.is_err() {
                    return;
                }
            }
        });

        let batches = bulk(cancel.clone(), relay_rx, cap, NeverSplit::default);
        self.drive_rows(cancel, &table, &rendered.sql, batches, callbacks, ExecKind::Transaction)
            .await
    }

    /// Consumes arbitrary identifier values; sized by
    /// `MaxPlaceholdersPerStatement`. Batches fan out across the
    /// table's semaphore the same way the insert-shaped and `UPDATE`
    /// paths do; each batch renders its own `IN (...)` clause sized to
    /// that batch, so the statement is built inside the spawned task
    /// rather than once up front.
    pub async fn delete_streamed(
        &self,
        cancel: &CancellationToken,
        table: &str,
        column: &str,
        in_rx: mpsc::Receiver<Value>,
    ) -> Result<u64, PipelineError> {
        let cap = self.max_placeholders_per_statement.max(1);
        let mut batches = bulk(cancel.clone(), in_rx, cap, NeverSplit::default);

        let mut join_set: JoinSet<Result<u64, PipelineError>> = JoinSet::new();
        let mut progress = Progress::new(table, self.progress_interval);
        let mut first_error: Option<PipelineError> = None;
        let mut batches_closed = false;

        loop {
            if batches_closed && join_set.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                Some(joined) = join_set.join_next(), if !join_set.is_empty() => {
                    match joined.expect("delete batch task panicked") {
                        Ok(affected) => progress.record(affected),
                        Err(err) => {
                            if first_error.is_none() {
                                cancel.cancel();
                                first_error = Some(err);
                            }
                        }
                    }
                }

                maybe_ids = batches.recv(), if !batches_closed && first_error.is_none() => {
                    match maybe_ids {
                        Some(ids) => {
                            let rendered = match db_query::render_delete(self.dialect, table, column, ids.len()) {
                                Ok(r) => r,
                                Err(err) => {
                                    cancel.cancel();
                                    first_error = Some(PipelineError::from(err));
                                    continue;
                                }
                            };
                            let executor = self.executor.clone();
                            let semaphores = self.semaphores.clone();
                            let backoff = self.backoff;
                            let table_owned = table.to_string();
                            let sql = rendered.sql;
                            let task_cancel = cancel.clone();

                            join_set.spawn(async move {
                                let permit = semaphores
                                    .semaphore_for(&table_owned)
                                    .acquire_owned()
                                    .await
                                    .expect("semaphore never closed");
                                let outcome = with_backoff(
                                    &task_cancel,
                                    || {
                                        let executor = executor.clone();
                                        let sql = sql.clone();
                                        let params = ids.clone();
                                        async move { executor.positional_exec(&sql, &params).await }
                                    },
                                    classify::retryable,
                                    &backoff,
                                    retry_settings(&table_owned),
                                )
                                .await;
                                drop(permit);

                                outcome.map_err(flatten_retry).map_err(PipelineError::from)
                            });
                        }
                        None => batches_closed = true,
                    }
                }
            }
        }

        progress.finish();
        match first_error {
            Some(err) => Err(err),
            None => Ok(progress.total),
        }
    }

    /// Fans batches out across the table's semaphore: each batch is
    /// spawned as its own task as soon as the chunker produces it, so
    /// up to `MaxConnectionsPerTable` batches genuinely execute in
    /// parallel rather than the pipeline awaiting one at a time
    /// (spec.md §5: "up to MaxConnectionsPerTable batches run in
    /// parallel"). The first sibling error cancels the rest and is
    /// returned once every in-flight task has drained.
    async fn drive_rows<E>(
        &self,
        cancel: &CancellationToken,
        table: &str,
        sql: &str,
        mut batches: mpsc::Receiver<Vec<E>>,
        callbacks: Arc<Vec<SuccessCallback<E>>>,
        kind: ExecKind,
    ) -> Result<u64, PipelineError>
    where
        E: RowValues + Send + 'static,
    {
        let mut join_set: JoinSet<Result<u64, PipelineError>> = JoinSet::new();
        let mut progress = Progress::new(table, self.progress_interval);
        let mut first_error: Option<PipelineError> = None;
        let mut batches_closed = false;

        loop {
            if batches_closed && join_set.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                Some(joined) = join_set.join_next(), if !join_set.is_empty() => {
                    match joined.expect("batch task panicked") {
                        Ok(affected) => progress.record(affected),
                        Err(err) => {
                            if first_error.is_none() {
                                cancel.cancel();
                                first_error = Some(err);
                            }
                        }
                    }
                }

                maybe_batch = batches.recv(), if !batches_closed && first_error.is_none() => {
                    match maybe_batch {
                        Some(batch) => {
                            let executor = self.executor.clone();
                            let semaphores = self.semaphores.clone();
                            let backoff = self.backoff;
                            let table_owned = table.to_string();
                            let sql_owned = sql.to_string();
                            let task_cancel = cancel.clone();
                            let callbacks = callbacks.clone();

                            join_set.spawn(async move {
                                let rows: Vec<HashMap<String, Value>> =
                                    batch.iter().map(RowValues::row_values).collect();
                                let permit = semaphores
                                    .semaphore_for(&table_owned)
                                    .acquire_owned()
                                    .await
                                    .expect("semaphore never closed");
                                let outcome = with_backoff(
                                    &task_cancel,
                                    || {
                                        let executor = executor.clone();
                                        let sql = sql_owned.clone();
                                        let rows = rows.clone();
                                        async move {
                                            match kind {
                                                ExecKind::Batch => executor.named_exec_batch(&sql, &rows).await,
                                                ExecKind::Transaction => {
                                                    executor.named_exec_transaction(&sql, &rows).await
                                                }
                                            }
                                        }
                                    },
                                    classify::retryable,
                                    &backoff,
                                    retry_settings(&table_owned),
                                )
                                .await;
                                drop(permit);

                                let affected = outcome.map_err(flatten_retry)?;
                                for entity in &batch {
                                    for cb in callbacks.iter() {
                                        cb(entity).map_err(PipelineError::from)?;
                                    }
                                }
                                Ok(affected)
                            });
                        }
                        None => batches_closed = true,
                    }
                }
            }
        }

        progress.finish();
        match first_error {
            Some(err) => Err(err),
            None => Ok(progress.total),
        }
    }
}

/// Which `SqlExecutor` method a fanned-out batch task calls; both
/// variants bind the same named-parameter rows, differing only in
/// whether the driver wraps the single exec in a transaction (spec.md
/// §4.7 `UpdateStreamed`: "prepares the named statement once and
/// executes per row, then commits").
#[derive(Debug, Clone, Copy)]
enum ExecKind {
    Batch,
    Transaction,
}

/// First retryable failure logs at warn level; every retry after that
/// logs at debug (spec.md §5 scenario: one warning-level log, one
/// debug-level retry log, before committing on the third attempt).
fn retry_settings(table: &str) -> RetrySettings<ExecError> {
    let table = table.to_string();
    RetrySettings::new().on_retry(move |err, attempt| {
        if attempt <= 1 {
            warn!(table = %table, attempt, error = %err, "retryable error writing batch");
        } else {
            debug!(table = %table, attempt, error = %err, "retrying batch write");
        }
    })
}

fn flatten_retry(outcome: RetryOutcome<ExecError>) -> ExecError {
    match outcome {
        RetryOutcome::NotRetryable(e) | RetryOutcome::PolicyExhausted(e) | RetryOutcome::Cancelled(e) => e,
    }
}

struct Progress {
    table: String,
    total: u64,
    since_last_log: u64,
    started_at: Instant,
    last_logged_at: Instant,
    interval: Duration,
}

impl Progress {
    fn new(table: &str, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            table: table.to_string(),
            total: 0,
            since_last_log: 0,
            started_at: now,
            last_logged_at: now,
            interval,
        }
    }

    fn record(&mut self, affected: u64) {
        self.total += affected;
        self.since_last_log += affected;
        if self.last_logged_at.elapsed() >= self.interval {
            debug!(
                table = %self.table,
                total_rows = self.total,
                delta_rows = self.since_last_log,
                "bulk executor progress"
            );
            self.since_last_log = 0;
            self.last_logged_at = Instant::now();
        }
    }

    fn finish(&self) {
        let duration = self.started_at.elapsed();
        let rows_per_sec = self.total as f64 / duration.as_secs_f64().max(f64::EPSILON);
        info!(
            table = %self.table,
            total_rows = self.total,
            duration_ms = duration.as_millis(),
            rows_per_sec = %format!("{:.2}", rows_per_sec),
            "bulk executor finished"
        );
    }
}
