use crate::error::RedisStreamError;
use crate::retry::{flatten, retryable};
use db_retry::{RetrySettings, default_backoff, with_backoff};
use redis::aio::ConnectionManager;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Iterates a hash with `HSCAN` windows of `hscan_count`, deduplicating
/// fields (`HSCAN` may repeat a field across pages within one cursor
/// pass), emitting pairs on the returned channel until the cursor
/// returns to 0 or `cancel` fires.
pub fn hyield(
    cancel: CancellationToken,
    conn: ConnectionManager,
    key: impl Into<String>,
    hscan_count: usize,
) -> mpsc::Receiver<(String, String)> {
    let key = key.into();
    let hscan_count = hscan_count.max(1);
    let (tx, rx) = mpsc::channel(128);

    tokio::spawn(async move {
        let mut seen = HashSet::new();
        let mut cursor: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                debug!(key = %key, "hyield cancelled");
                return;
            }

            let page = with_backoff(
                &cancel,
                || {
                    let mut conn = conn.clone();
                    let key = key.clone();
                    async move {
                        redis::cmd("HSCAN")
                            .arg(&key)
                            .arg(cursor)
                            .arg("COUNT")
                            .arg(hscan_count)
                            .query_async::<(u64, Vec<String>)>(&mut conn)
                            .await
                            .map_err(RedisStreamError::from)
                    }
                },
                retryable,
                &default_backoff(),
                RetrySettings::new(),
            )
            .await;

            let (next_cursor, flat) = match page {
                Ok(v) => v,
                Err(outcome) => {
                    warn!(key = %key, error = %flatten(outcome), "HSCAN failed, stopping hyield");
                    return;
                }
            };

            for pair in flat.chunks(2) {
                let [field, value] = pair else { continue };
                if seen.insert(field.clone()) && tx.send((field.clone(), value.clone())).await.is_err() {
                    return;
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                return;
            }
        }
    });

    rx
}

/// Shards `fields` into windows of `hmget_count`, running up to
/// `max_hmget_connections` concurrent `HMGET`s, emitting received
/// pairs and warning on fields that came back missing or non-string.
pub fn hmyield(
    cancel: CancellationToken,
    conn: ConnectionManager,
    key: impl Into<String>,
    fields: Vec<String>,
    hmget_count: usize,
    max_hmget_connections: usize,
) -> mpsc::Receiver<(String, String)> {
    let key = key.into();
    let hmget_count = hmget_count.max(1);
    let semaphore = Arc::new(Semaphore::new(max_hmget_connections.max(1)));
    let (tx, rx) = mpsc::channel(128);

    tokio::spawn(async move {
        let windows: Vec<Vec<String>> = fields.chunks(hmget_count).map(<[String]>::to_vec).collect();
        let mut tasks = JoinSet::new();

        for window in windows {
            if cancel.is_cancelled() {
                break;
            }
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let conn = conn.clone();
            let key = key.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let result = with_backoff(
                    &cancel,
                    || {
                        let mut conn = conn.clone();
                        let key = key.clone();
                        let window = window.clone();
                        async move {
                            redis::cmd("HMGET")
                                .arg(&key)
                                .arg(&window)
                                .query_async::<Vec<Option<String>>>(&mut conn)
                                .await
                                .map_err(RedisStreamError::from)
                        }
                    },
                    retryable,
                    &default_backoff(),
                    RetrySettings::new(),
                )
                .await;

                match result {
                    Ok(values) => {
                        for (field, value) in window.iter().zip(values) {
                            match value {
                                Some(v) => {
                                    if tx.send((field.clone(), v)).await.is_err() {
                                        return;
                                    }
                                }
                                None => warn!(key = %key, field = %field, "HMGET field missing or not a string"),
                            }
                        }
                    }
                    Err(outcome) => {
                        warn!(key = %key, error = %flatten(outcome), "HMGET window failed");
                    }
                }
            });
        }

        while tasks.join_next().await.is_some() {}
    });

    rx
}

/// Blocks on `XREAD` with `BLOCK = block_timeout` (must be > 0 so the
/// driver actually honors cancellation rather than polling forever),
/// retrying on a `nil` reply or a retryable error. Returns the context
/// error (`RedisStreamError::Cancelled`), not the driver's own
/// timeout, when `cancel` fires before data arrives.
pub async fn xread_until_result(
    cancel: &CancellationToken,
    conn: &ConnectionManager,
    stream_key: &str,
    last_id: &str,
    block_timeout: Duration,
    count: Option<usize>,
) -> Result<redis::streams::StreamReadReply, RedisStreamError> {
    let block_ms = block_timeout.as_millis().max(1) as usize;

    loop {
        let mut cmd = redis::cmd("XREAD");
        cmd.arg("BLOCK").arg(block_ms);
        if let Some(n) = count {
            cmd.arg("COUNT").arg(n);
        }
        cmd.arg("STREAMS").arg(stream_key).arg(last_id);

        let mut conn = conn.clone();
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                return Err(RedisStreamError::Cancelled);
            }

            result = cmd.query_async::<Option<redis::streams::StreamReadReply>>(&mut conn) => {
                match result {
                    Ok(Some(reply)) => return Ok(reply),
                    Ok(None) => continue,
                    Err(e) => {
                        let err = RedisStreamError::from(e);
                        if retryable(&err) {
                            debug!(stream = %stream_key, error = %err, "XREAD error, retrying");
                            continue;
                        }
                        return Err(err);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_ms_is_never_zero() {
        let zero = Duration::ZERO;
        assert_eq!(zero.as_millis().max(1), 1);
    }
}
