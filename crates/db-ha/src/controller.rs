use crate::error::HaError;
use chrono::{DateTime, Utc};
use db_exec::SqlExecutor;
use db_model::{Identifier, Value};
use db_query::{SqlDialect, render_insert_ignore, render_upsert};
use db_retry::{Exponential, RetryOutcome, RetrySettings, with_backoff};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A single tick of the upstream heartbeat source this controller
/// reacts to (spec.md §4.9: "fed a heartbeat timestamp per tick").
#[derive(Debug, Clone)]
pub struct Heartbeat {
    pub timestamp: DateTime<Utc>,
}

/// Edge-triggered responsibility transitions. Only fired when the
/// responsibility bit actually flips, never on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Takeover,
    Handover,
}

/// C9: drives the `responsible` bit for one running instance against
/// a shared instance table, claiming or releasing it as heartbeats
/// arrive (spec.md §4.9). Writes go through the same [`SqlExecutor`]
/// the bulk pipeline (C7) uses, per spec.md §9.
pub struct HaController<X: SqlExecutor> {
    executor: Arc<X>,
    dialect: SqlDialect,
    instance_table: String,
    environment_table: String,
    environment_id: Vec<u8>,
    endpoint_id: Vec<u8>,
    instance_id: Identifier,
    timeout: Duration,
    backoff: Exponential,
    responsible: AtomicBool,
}

impl<X: SqlExecutor + 'static> HaController<X> {
    /// Mints a fresh 16-byte instance identifier for this process
    /// (spec.md §4.9: "a fresh instance identifier per process, not
    /// one recovered from a prior run").
    pub fn new(
        executor: Arc<X>,
        dialect: SqlDialect,
        instance_table: impl Into<String>,
        environment_table: impl Into<String>,
        environment_id: Vec<u8>,
        endpoint_id: Vec<u8>,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            dialect,
            instance_table: instance_table.into(),
            environment_table: environment_table.into(),
            environment_id,
            endpoint_id,
            instance_id: Identifier::new(Uuid::new_v4().as_bytes().to_vec()),
            timeout,
            backoff: Exponential::new(Duration::from_millis(100), Duration::from_secs(3))
                .expect("100ms..3s is a valid backoff range"),
            responsible: AtomicBool::new(false),
        }
    }

    pub fn instance_id(&self) -> &Identifier {
        &self.instance_id
    }

    pub fn is_responsible(&self) -> bool {
        self.responsible.load(Ordering::SeqCst)
    }

    /// Drives the heartbeat loop until `cancel` fires or `heartbeats`
    /// closes, emitting edge-triggered signals on `signal_tx`. Spawns
    /// the one-shot stale-peer purge alongside it.
    pub async fn run(
        self: Arc<Self>,
        cancel: CancellationToken,
        mut heartbeats: mpsc::Receiver<Heartbeat>,
        signal_tx: mpsc::Sender<Signal>,
    ) {
        let purge_handle = {
            let this = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { this.purge_stale_peers_after_timeout(cancel).await })
        };

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                hb = heartbeats.recv() => {
                    match hb {
                        Some(hb) => {
                            if let Err(err) = self.handle_heartbeat(&cancel, hb, &signal_tx).await {
                                warn!(error = %err, "HA heartbeat processing failed");
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        purge_handle.abort();
    }

    async fn handle_heartbeat(
        &self,
        cancel: &CancellationToken,
        hb: Heartbeat,
        signal_tx: &mpsc::Sender<Signal>,
    ) -> Result<(), HaError> {
        let now = Utc::now();
        let cutoff = now - to_chrono(self.timeout);

        // Step 1: drop stale or implausibly-future heartbeats. A stale
        // tick means our own responsibility, if held, has lapsed. The bit
        // only flips once the handover signal is actually delivered (or
        // the context is already done) — never before.
        if hb.timestamp < cutoff || hb.timestamp > now + chrono::Duration::seconds(1) {
            if self.responsible.load(Ordering::SeqCst) {
                let delivered = signal_tx.send(Signal::Handover).await.is_ok();
                if delivered || cancel.is_cancelled() {
                    self.responsible.store(false, Ordering::SeqCst);
                }
            }
            return Ok(());
        }

        let outcome = with_backoff(
            cancel,
            || self.claim_and_upsert(hb.timestamp, cutoff),
            db_exec::retry::is_deadlock_or_serialization,
            &self.backoff,
            retry_settings(),
        )
        .await;

        let claims = outcome.map_err(flatten)?;
        let was_responsible = self.responsible.load(Ordering::SeqCst);

        if claims && !was_responsible {
            let delivered = signal_tx.send(Signal::Takeover).await.is_ok();
            if delivered || cancel.is_cancelled() {
                self.responsible.store(true, Ordering::SeqCst);
            }
        } else if !claims && was_responsible {
            let delivered = signal_tx.send(Signal::Handover).await.is_ok();
            if delivered || cancel.is_cancelled() {
                self.responsible.store(false, Ordering::SeqCst);
            }
        } else {
            self.responsible.store(claims, Ordering::SeqCst);
        }

        Ok(())
    }

    /// Steps 2-3: claim responsibility if no other live instance holds
    /// it, then upsert this instance's own row with the new heartbeat
    /// and the resulting `responsible` bit. On takeover, insert-ignore
    /// the environment row so a fresh environment is visible before any
    /// dependent writes land (spec.md §4.9 step 3).
    async fn claim_and_upsert(
        &self,
        heartbeat: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, db_exec::ExecError> {
        let mut exists_params = HashMap::new();
        exists_params.insert("environment_id".to_string(), Value::Bytes(self.environment_id.clone()));
        exists_params.insert("instance_id".to_string(), Value::Bytes(self.instance_id.as_bytes().to_vec()));
        exists_params.insert("cutoff".to_string(), Value::Timestamp(cutoff));

        let exists_sql = format!(
            "SELECT 1 FROM {} WHERE {}=:environment_id AND {}<>:instance_id AND {}='y' AND {}>:cutoff",
            self.dialect.quote_identifier(&self.instance_table),
            self.dialect.quote_identifier("environment_id"),
            self.dialect.quote_identifier("id"),
            self.dialect.quote_identifier("responsible"),
            self.dialect.quote_identifier("heartbeat"),
        );
        let other_holds_it = self.executor.named_query_exists(&exists_sql, &exists_params).await?;
        let claims = !other_holds_it;

        let columns = ["id", "environment_id", "endpoint_id", "heartbeat", "responsible"];
        let rendered = render_upsert(self.dialect, &self.instance_table, &columns, &["id"], None, None)?;

        let mut row = HashMap::new();
        row.insert("id".to_string(), Value::Bytes(self.instance_id.as_bytes().to_vec()));
        row.insert("environment_id".to_string(), Value::Bytes(self.environment_id.clone()));
        row.insert("endpoint_id".to_string(), Value::Bytes(self.endpoint_id.clone()));
        row.insert("heartbeat".to_string(), Value::Timestamp(heartbeat));
        row.insert(
            "responsible".to_string(),
            Value::String(if claims { "y" } else { "n" }.to_string()),
        );
        self.executor.named_exec_batch(&rendered.sql, &[row]).await?;

        if claims {
            let env_rendered = render_insert_ignore(self.dialect, &self.environment_table, &["id"], None)?;
            let mut env_row = HashMap::new();
            env_row.insert("id".to_string(), Value::Bytes(self.environment_id.clone()));
            self.executor.named_exec_batch(&env_rendered.sql, &[env_row]).await?;
        }

        Ok(claims)
    }

    /// Once, `timeout` after startup: delete rows for this
    /// environment/endpoint whose heartbeat has already gone stale,
    /// clearing out crashed instances that never got to say goodbye
    /// (spec.md §4.9: "a separate one-shot task purges stale peer
    /// rows").
    async fn purge_stale_peers_after_timeout(self: Arc<Self>, cancel: CancellationToken) {
        tokio::select! {
            _ = tokio::time::sleep(self.timeout) => {}
            _ = cancel.cancelled() => return,
        }

        let cutoff = Utc::now() - to_chrono(self.timeout);
        let mut params = HashMap::new();
        params.insert("environment_id".to_string(), Value::Bytes(self.environment_id.clone()));
        params.insert("endpoint_id".to_string(), Value::Bytes(self.endpoint_id.clone()));
        params.insert("cutoff".to_string(), Value::Timestamp(cutoff));

        let sql = format!(
            "DELETE FROM {} WHERE {}=:environment_id AND {}=:endpoint_id AND {}<:cutoff",
            self.dialect.quote_identifier(&self.instance_table),
            self.dialect.quote_identifier("environment_id"),
            self.dialect.quote_identifier("endpoint_id"),
            self.dialect.quote_identifier("heartbeat"),
        );
        if let Err(err) = self.executor.named_exec_batch(&sql, &[params]).await {
            warn!(error = %err, "stale HA peer purge failed");
        }
    }

    /// Removes this instance's own row. Callers invoke this after
    /// cancelling and draining [`Self::run`], so a clean shutdown never
    /// leaves a row for the purge task to find later.
    pub async fn close(&self) -> Result<(), HaError> {
        let mut params = HashMap::new();
        params.insert("id".to_string(), Value::Bytes(self.instance_id.as_bytes().to_vec()));
        let sql = format!(
            "DELETE FROM {} WHERE {}=:id",
            self.dialect.quote_identifier(&self.instance_table),
            self.dialect.quote_identifier("id"),
        );
        self.executor.named_exec_batch(&sql, &[params]).await?;
        Ok(())
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}

fn retry_settings() -> RetrySettings<db_exec::ExecError> {
    RetrySettings::new().on_retry(|err, attempt| {
        if attempt <= 3 {
            debug!(attempt, error = %err, "HA claim transaction deadlocked, retrying");
        } else {
            info!(attempt, error = %err, "HA claim transaction still deadlocking after 3 retries");
        }
    })
}

fn flatten(outcome: RetryOutcome<db_exec::ExecError>) -> HaError {
    match outcome {
        RetryOutcome::NotRetryable(e) | RetryOutcome::PolicyExhausted(e) | RetryOutcome::Cancelled(e) => e.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU64;

    struct FakeExecutor {
        other_responsible: AtomicBool,
        batches: Mutex<Vec<String>>,
        affected: AtomicU64,
    }

    impl FakeExecutor {
        fn new(other_responsible: bool) -> Self {
            Self {
                other_responsible: AtomicBool::new(other_responsible),
                batches: Mutex::new(Vec::new()),
                affected: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl SqlExecutor for FakeExecutor {
        async fn named_exec_batch(
            &self,
            sql: &str,
            _rows: &[HashMap<String, Value>],
        ) -> Result<u64, db_exec::ExecError> {
            self.batches.lock().unwrap().push(sql.to_string());
            Ok(self.affected.fetch_add(1, Ordering::SeqCst))
        }

        async fn named_exec_transaction(
            &self,
            sql: &str,
            rows: &[HashMap<String, Value>],
        ) -> Result<u64, db_exec::ExecError> {
            self.named_exec_batch(sql, rows).await
        }

        async fn positional_exec(&self, _sql: &str, _params: &[Value]) -> Result<u64, db_exec::ExecError> {
            Ok(0)
        }

        async fn named_query_exists(
            &self,
            _sql: &str,
            _params: &HashMap<String, Value>,
        ) -> Result<bool, db_exec::ExecError> {
            Ok(self.other_responsible.load(Ordering::SeqCst))
        }
    }

    fn controller(other_responsible: bool) -> HaController<FakeExecutor> {
        HaController::new(
            Arc::new(FakeExecutor::new(other_responsible)),
            SqlDialect::Postgres,
            "icingadb_instance",
            "icingadb_environment",
            vec![1, 2, 3],
            vec![4, 5, 6],
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn claims_responsibility_when_no_other_instance_holds_it() {
        let controller = controller(false);
        let claims = controller.claim_and_upsert(Utc::now(), Utc::now()).await.unwrap();
        assert!(claims);
    }

    #[tokio::test]
    async fn defers_when_another_instance_already_holds_it() {
        let controller = controller(true);
        let claims = controller.claim_and_upsert(Utc::now(), Utc::now()).await.unwrap();
        assert!(!claims);
    }

    #[tokio::test]
    async fn stale_heartbeat_triggers_handover_signal_when_previously_responsible() {
        let controller = Arc::new(controller(false));
        controller.responsible.store(true, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        let (signal_tx, mut signal_rx) = mpsc::channel(4);
        let stale = Heartbeat {
            timestamp: Utc::now() - chrono::Duration::hours(1),
        };

        controller.handle_heartbeat(&cancel, stale, &signal_tx).await.unwrap();

        assert!(!controller.is_responsible());
        assert_eq!(signal_rx.recv().await, Some(Signal::Handover));
    }

    #[tokio::test]
    async fn fresh_heartbeat_with_no_rival_triggers_takeover_signal() {
        let controller = Arc::new(controller(false));
        let cancel = CancellationToken::new();
        let (signal_tx, mut signal_rx) = mpsc::channel(4);
        let fresh = Heartbeat { timestamp: Utc::now() };

        controller.handle_heartbeat(&cancel, fresh, &signal_tx).await.unwrap();

        assert!(controller.is_responsible());
        assert_eq!(signal_rx.recv().await, Some(Signal::Takeover));
    }
}
