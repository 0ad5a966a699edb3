use crate::error::ExecError;
use async_trait::async_trait;
use db_retry::{Exponential, RetryOutcome, RetrySettings, default_backoff, with_backoff};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// The first connection attempt honors this timeout (spec.md §4.5);
/// every reconnection after the first success retries forever.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// MySQL error 1193: "Unknown system variable" — swallowed during
/// session init so a single-node MySQL (no wsrep/Galera) still
/// connects (spec.md §4.5, §6).
pub const ERR_UNKNOWN_SYSTEM_VARIABLE: u16 = 1193;

/// A driver-level dial function plus its optional per-connection init
/// hook, one impl per dialect (`mysql`/`postgres`).
#[async_trait]
pub trait Dial: Send + Sync {
    type Conn: Send;

    async fn dial(&self) -> Result<Self::Conn, ExecError>;

    /// Runs once per freshly dialed connection, before it's handed
    /// back to the caller. The default no-ops; MySQL overrides it to
    /// set `wsrep_sync_wait`.
    async fn init_conn(&self, _conn: &mut Self::Conn) -> Result<(), ExecError> {
        Ok(())
    }
}

/// Wraps a [`Dial`] impl with retryable reconnection (C5). The first
/// successful connection flips an internal flag; subsequent reconnect
/// attempts then retry forever instead of honoring
/// [`DEFAULT_CONNECT_TIMEOUT`].
pub struct RetryingConnector<D: Dial> {
    dialer: D,
    backoff: Exponential,
    ever_connected: AtomicBool,
}

impl<D: Dial> RetryingConnector<D> {
    pub fn new(dialer: D) -> Self {
        Self {
            dialer,
            backoff: default_backoff(),
            ever_connected: AtomicBool::new(false),
        }
    }

    pub fn with_backoff(mut self, backoff: Exponential) -> Self {
        self.backoff = backoff;
        self
    }

    /// Dials (and retries) a new connection. On an `init_conn`
    /// failure, the fresh connection is dropped and the whole attempt
    /// sequence retries (spec.md §4.5: "if `OnInitConn` fails, close
    /// the connection and retry").
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<D::Conn, RetryOutcome<ExecError>> {
        let first = !self.ever_connected.load(Ordering::SeqCst);
        let mut settings: RetrySettings<ExecError> = RetrySettings::new();
        if first {
            settings = settings.with_timeout(DEFAULT_CONNECT_TIMEOUT);
        }

        let result = with_backoff(
            cancel,
            || async {
                let mut conn = self.dialer.dial().await?;
                if let Err(err) = self.dialer.init_conn(&mut conn).await {
                    warn!(error = %err, "on-init-conn hook failed, dropping connection and retrying");
                    drop(conn);
                    return Err(err);
                }
                Ok(conn)
            },
            |_err: &ExecError| true,
            &self.backoff,
            settings,
        )
        .await;

        if result.is_ok() {
            self.ever_connected.store(true, Ordering::SeqCst);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    struct CountingDialer {
        dials: Arc<AtomicU32>,
        inits: Arc<AtomicU32>,
        fail_first_init: bool,
    }

    #[async_trait]
    impl Dial for CountingDialer {
        type Conn = u32;

        async fn dial(&self) -> Result<u32, ExecError> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }

        async fn init_conn(&self, conn: &mut u32) -> Result<(), ExecError> {
            let n = self.inits.fetch_add(1, Ordering::SeqCst);
            if self.fail_first_init && n == 0 {
                Err(ExecError::InitConn(Box::new(std::io::Error::other("boom"))))
            } else {
                *conn = 42;
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt_without_init_failure() {
        let connector = RetryingConnector::new(CountingDialer {
            dials: Arc::new(AtomicU32::new(0)),
            inits: Arc::new(AtomicU32::new(0)),
            fail_first_init: false,
        });
        let cancel = CancellationToken::new();
        let conn = connector.connect(&cancel).await.unwrap();
        assert_eq!(conn, 42);
    }

    #[tokio::test]
    async fn init_hook_failure_retries_the_dial() {
        let dials = Arc::new(AtomicU32::new(0));
        let connector = RetryingConnector::new(CountingDialer {
            dials: dials.clone(),
            inits: Arc::new(AtomicU32::new(0)),
            fail_first_init: true,
        })
        .with_backoff(Exponential::new(Duration::from_millis(1), Duration::from_millis(5)).unwrap());

        let cancel = CancellationToken::new();
        let conn = connector.connect(&cancel).await.unwrap();
        assert_eq!(conn, 42);
        assert_eq!(dials.load(Ordering::SeqCst), 2);
    }
}
