use crate::connector::{Dial, RetryingConnector};
use crate::error::ExecError;
use crate::executor::SqlExecutor;
use crate::params::{order_values, positionalize_dollar};
use async_trait::async_trait;
use db_model::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A PostgreSQL executor. Holds the live [`Client`] behind an
/// `RwLock` so [`Self::reconnect`] can swap in a fresh connection
/// without callers needing to re-acquire a handle (mirrors the
/// teacher's `Arc<RwLock<Client>>` adapter shape).
pub struct PostgresExecutor {
    conn_str: String,
    client: RwLock<Client>,
}

impl PostgresExecutor {
    pub async fn connect(conn_str: impl Into<String>) -> Result<Self, ExecError> {
        let conn_str = conn_str.into();
        let client = dial(&conn_str).await?;
        Ok(Self {
            conn_str,
            client: RwLock::new(client),
        })
    }

    /// Re-dials under the retry engine (C5) and swaps the new client
    /// in. Callers invoke this from a reconnect-on-error loop; normal
    /// statement execution never calls it directly.
    pub async fn reconnect(&self, cancel: &CancellationToken) -> Result<(), ExecError> {
        let connector = RetryingConnector::new(PgDialer {
            conn_str: self.conn_str.clone(),
        });
        let fresh = connector.connect(cancel).await.map_err(|outcome| match outcome {
            db_retry::RetryOutcome::NotRetryable(e)
            | db_retry::RetryOutcome::PolicyExhausted(e)
            | db_retry::RetryOutcome::Cancelled(e) => e,
        })?;
        *self.client.write().await = fresh;
        Ok(())
    }
}

struct PgDialer {
    conn_str: String,
}

#[async_trait]
impl Dial for PgDialer {
    type Conn = Client;

    async fn dial(&self) -> Result<Client, ExecError> {
        dial(&self.conn_str).await
    }
}

async fn dial(conn_str: &str) -> Result<Client, ExecError> {
    // TLS is layered on by `db-config` when the configured database
    // URI asks for it; plain `NoTls` here matches the direct-connect
    // path the bulk executor also uses against a local/trusted socket.
    let (client, connection) = tokio_postgres::connect(conn_str, NoTls)
        .await
        .map_err(|e| ExecError::Connect(Box::new(e)))?;

    tokio::spawn(async move {
        if let Err(err) = connection.await {
            warn!(error = %err, "postgres connection task exited");
        }
    });

    Ok(client)
}

#[async_trait]
impl SqlExecutor for PostgresExecutor {
    async fn named_exec_batch(&self, sql: &str, rows: &[HashMap<String, Value>]) -> Result<u64, ExecError> {
        let (positional_sql, names) = positionalize_dollar(sql);
        let client = self.client.read().await;

        let mut affected = 0u64;
        for row in rows {
            let values = order_values(&names, row);
            let refs: Vec<&(dyn ToSql + Sync)> = values.iter().map(as_to_sql).collect();
            let n = client
                .execute(&positional_sql, &refs)
                .await
                .map_err(|e| ExecError::cant_perform_query(e, &positional_sql))?;
            affected += n;
        }
        Ok(affected)
    }

    async fn named_exec_transaction(&self, sql: &str, rows: &[HashMap<String, Value>]) -> Result<u64, ExecError> {
        let (positional_sql, names) = positionalize_dollar(sql);
        let mut client = self.client.write().await;
        let tx = client
            .transaction()
            .await
            .map_err(|e| ExecError::cant_perform_query(e, &positional_sql))?;
        let stmt = tx
            .prepare(&positional_sql)
            .await
            .map_err(|e| ExecError::cant_perform_query(e, &positional_sql))?;

        let mut affected = 0u64;
        for row in rows {
            let values = order_values(&names, row);
            let refs: Vec<&(dyn ToSql + Sync)> = values.iter().map(as_to_sql).collect();
            let n = tx
                .execute(&stmt, &refs)
                .await
                .map_err(|e| ExecError::cant_perform_query(e, &positional_sql))?;
            affected += n;
        }

        tx.commit()
            .await
            .map_err(|e| ExecError::cant_perform_query(e, &positional_sql))?;
        Ok(affected)
    }

    async fn positional_exec(&self, sql: &str, params: &[Value]) -> Result<u64, ExecError> {
        let client = self.client.read().await;
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(as_to_sql).collect();
        client
            .execute(sql, &refs)
            .await
            .map_err(|e| ExecError::cant_perform_query(e, sql))
    }

    async fn named_query_exists(&self, sql: &str, params: &HashMap<String, Value>) -> Result<bool, ExecError> {
        let (positional_sql, names) = positionalize_dollar(sql);
        let values = order_values(&names, params);
        let refs: Vec<&(dyn ToSql + Sync)> = values.iter().map(as_to_sql).collect();
        let client = self.client.read().await;
        let row = client
            .query_opt(&positional_sql, &refs)
            .await
            .map_err(|e| ExecError::cant_perform_query(e, &positional_sql))?;
        Ok(row.is_some())
    }
}

/// Borrows `value` as a `tokio-postgres` bind parameter. `Value` is
/// dialect-neutral (`db-model::Value`), so every arm picks the
/// `ToSql` impl the underlying variant already carries.
fn as_to_sql(value: &Value) -> &(dyn ToSql + Sync) {
    match value {
        Value::Int(v) => v,
        Value::Uint(v) => v,
        Value::Float(v) => v,
        Value::String(v) => v,
        Value::Boolean(v) => v,
        Value::Bytes(v) => v,
        Value::Uuid(v) => v,
        Value::Date(v) => v,
        Value::Timestamp(v) => v,
        Value::TimestampNaive(v) => v,
        Value::Json(v) => v,
        Value::Null => &NULL_SENTINEL,
    }
}

/// `ToSql` needs a concrete, typed value even for NULL; `Option<i32>`
/// is PostgreSQL's untyped-null-compatible placeholder (the driver
/// negotiates the real column type server-side for untyped params).
const NULL_SENTINEL: Option<i32> = None;
