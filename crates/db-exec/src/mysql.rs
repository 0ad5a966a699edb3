use crate::connector::{Dial, ERR_UNKNOWN_SYSTEM_VARIABLE};
use crate::error::ExecError;
use crate::executor::SqlExecutor;
use crate::params::{order_values, positionalize};
use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use db_model::Value;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, Params, Pool, Value as MySqlValue};
use std::collections::HashMap;
use tracing::debug;

/// A MySQL/MariaDB executor. One [`Pool`] per database handle; the
/// per-table concurrency cap is enforced upstream by
/// `db-chunk::SemaphoreRegistry`, not by the pool's own connection
/// limit.
pub struct MySqlExecutor {
    pool: Pool,
    wsrep_sync_wait: Option<u8>,
}

impl MySqlExecutor {
    pub fn connect(url: &str, wsrep_sync_wait: Option<u8>) -> Result<Self, ExecError> {
        let opts = Opts::from_url(url).map_err(|e| ExecError::Connect(Box::new(e)))?;
        Ok(Self {
            pool: Pool::new(opts),
            wsrep_sync_wait,
        })
    }
}

/// [`Dial`] impl used by `db-exec::connector::RetryingConnector` to
/// hand out fresh, session-initialized connections from the pool.
pub struct MySqlDialer<'a>(pub &'a MySqlExecutor);

#[async_trait]
impl Dial for MySqlDialer<'_> {
    type Conn = Conn;

    async fn dial(&self) -> Result<Conn, ExecError> {
        self.0
            .pool
            .get_conn()
            .await
            .map_err(|e| ExecError::Connect(Box::new(e)))
    }

    /// `SET SESSION wsrep_sync_wait=<n>`, with MySQL error 1193
    /// ("unknown system variable") swallowed so single-node MySQL
    /// without Galera/wsrep still connects (spec.md §4.5, §6).
    async fn init_conn(&self, conn: &mut Conn) -> Result<(), ExecError> {
        let Some(n) = self.0.wsrep_sync_wait else {
            return Ok(());
        };
        match conn.query_drop(format!("SET SESSION wsrep_sync_wait={n}")).await {
            Ok(()) => Ok(()),
            Err(mysql_async::Error::Server(ref server_err)) if server_err.code == ERR_UNKNOWN_SYSTEM_VARIABLE => {
                debug!("wsrep_sync_wait not recognized by this server, ignoring");
                Ok(())
            }
            Err(e) => Err(ExecError::InitConn(Box::new(e))),
        }
    }
}

#[async_trait]
impl SqlExecutor for MySqlExecutor {
    async fn named_exec_batch(&self, sql: &str, rows: &[HashMap<String, Value>]) -> Result<u64, ExecError> {
        let (positional_sql, names) = positionalize(sql);
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| ExecError::cant_perform_query(e, sql))?;

        let mut affected = 0u64;
        for row in rows {
            let values = order_values(&names, row);
            let params = to_mysql_params(&values);
            conn.exec_drop(&positional_sql, params)
                .await
                .map_err(|e| ExecError::cant_perform_query(e, &positional_sql))?;
            affected += conn.affected_rows();
        }
        Ok(affected)
    }

    async fn named_exec_transaction(&self, sql: &str, rows: &[HashMap<String, Value>]) -> Result<u64, ExecError> {
        let (positional_sql, names) = positionalize(sql);
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| ExecError::cant_perform_query(e, sql))?;
        let mut tx = conn
            .start_transaction(mysql_async::TxOpts::default())
            .await
            .map_err(|e| ExecError::cant_perform_query(e, &positional_sql))?;

        let mut affected = 0u64;
        for row in rows {
            let values = order_values(&names, row);
            let params = to_mysql_params(&values);
            tx.exec_drop(&positional_sql, params)
                .await
                .map_err(|e| ExecError::cant_perform_query(e, &positional_sql))?;
            affected += tx.affected_rows();
        }

        tx.commit()
            .await
            .map_err(|e| ExecError::cant_perform_query(e, &positional_sql))?;
        Ok(affected)
    }

    async fn positional_exec(&self, sql: &str, params: &[Value]) -> Result<u64, ExecError> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| ExecError::cant_perform_query(e, sql))?;
        conn.exec_drop(sql, to_mysql_params(params))
            .await
            .map_err(|e| ExecError::cant_perform_query(e, sql))?;
        Ok(conn.affected_rows())
    }

    async fn named_query_exists(&self, sql: &str, params: &HashMap<String, Value>) -> Result<bool, ExecError> {
        let (positional_sql, names) = positionalize(sql);
        let values = order_values(&names, params);
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| ExecError::cant_perform_query(e, sql))?;
        let row: Option<mysql_async::Row> = conn
            .exec_first(&positional_sql, to_mysql_params(&values))
            .await
            .map_err(|e| ExecError::cant_perform_query(e, &positional_sql))?;
        Ok(row.is_some())
    }
}

fn to_mysql_params(values: &[Value]) -> Params {
    Params::Positional(values.iter().map(to_mysql_value).collect())
}

fn to_mysql_value(value: &Value) -> MySqlValue {
    match value {
        Value::Int(i) => MySqlValue::Int(*i),
        Value::Uint(u) => MySqlValue::UInt(*u),
        Value::Float(f) => MySqlValue::Double(*f),
        Value::String(s) => MySqlValue::Bytes(s.clone().into_bytes()),
        Value::Boolean(b) => MySqlValue::Int(if *b { 1 } else { 0 }),
        Value::Bytes(b) => MySqlValue::Bytes(b.clone()),
        Value::Uuid(u) => MySqlValue::Bytes(u.as_bytes().to_vec()),
        Value::Date(d) => MySqlValue::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        Value::Timestamp(ts) => {
            let naive = ts.naive_utc();
            MySqlValue::Date(
                naive.year() as u16,
                naive.month() as u8,
                naive.day() as u8,
                naive.hour() as u8,
                naive.minute() as u8,
                naive.second() as u8,
                naive.and_utc().timestamp_subsec_micros(),
            )
        }
        Value::TimestampNaive(naive) => MySqlValue::Date(
            naive.year() as u16,
            naive.month() as u8,
            naive.day() as u8,
            naive.hour() as u8,
            naive.minute() as u8,
            naive.second() as u8,
            0,
        ),
        Value::Json(j) => MySqlValue::Bytes(j.to_string().into_bytes()),
        Value::Null => MySqlValue::NULL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_scalar_values() {
        assert!(matches!(to_mysql_value(&Value::Int(5)), MySqlValue::Int(5)));
        assert!(matches!(to_mysql_value(&Value::Null), MySqlValue::NULL));
        assert!(matches!(to_mysql_value(&Value::Boolean(true)), MySqlValue::Int(1)));
    }
}
