use crate::connector::ERR_UNKNOWN_SYSTEM_VARIABLE;
use crate::error::ExecError;
use db_retry::is_retryable_io;
use mysql_async::Error as MySqlDriverError;
use tokio_postgres::error::SqlState;

const RETRYABLE_MYSQL_CODES: [u16; 6] = [1205, 1213, 2002, 2003, 2006, 2013];

fn mysql_code_is_deadlock_or_serialization(code: u16, state: &str) -> bool {
    code == 1205 || code == 1213 || state == "40001"
}

fn mysql_code_is_retryable(code: u16, state: &str) -> bool {
    RETRYABLE_MYSQL_CODES.contains(&code) || state == "40001" || code == ERR_UNKNOWN_SYSTEM_VARIABLE
}

fn pg_code_is_deadlock_or_serialization(code: Option<&SqlState>) -> bool {
    matches!(code, Some(&SqlState::T_R_SERIALIZATION_FAILURE) | Some(&SqlState::T_R_DEADLOCK_DETECTED))
}

/// MySQL deadlock (1213) and lock-wait-timeout (1205); PostgreSQL
/// serialization-failure and deadlock SQLSTATEs. Spec.md §4.2: "first
/// three retries at debug, further at info" is the caller's job
/// (`db-exec::pipeline`, `db-ha::controller`), not this classifier's.
pub fn is_deadlock_or_serialization(err: &ExecError) -> bool {
    match err {
        ExecError::Query { source, .. } => {
            if let Some(MySqlDriverError::Server(server_err)) = source.downcast_ref::<MySqlDriverError>() {
                return mysql_code_is_deadlock_or_serialization(server_err.code, server_err.state.as_str());
            }
            if let Some(pg_err) = source.downcast_ref::<tokio_postgres::Error>() {
                return pg_code_is_deadlock_or_serialization(pg_err.code());
            }
            false
        }
        _ => false,
    }
}

/// `Retryable(err)` (spec.md §4.2): DNS/refused/reset/host-down/
/// net-down/EPIPE/EOF/driver-bad-connection, every MySQL/PostgreSQL
/// protocol error, and deadlock/serialization codes.
pub fn retryable(err: &ExecError) -> bool {
    match err {
        ExecError::Connect(_) => true,
        ExecError::InitConn(_) => true,
        ExecError::Callback(_) => false,
        ExecError::Query { source, .. } => {
            if let Some(io_err) = source.downcast_ref::<std::io::Error>() {
                return is_retryable_io(io_err);
            }
            if let Some(mysql_err) = source.downcast_ref::<MySqlDriverError>() {
                return is_retryable_mysql_error(mysql_err);
            }
            if let Some(pg_err) = source.downcast_ref::<tokio_postgres::Error>() {
                return is_retryable_pg_error(pg_err);
            }
            false
        }
    }
}

fn is_retryable_mysql_error(err: &MySqlDriverError) -> bool {
    use MySqlDriverError::*;
    match err {
        Io(_) | Driver(_) | Other(_) => true,
        Server(server_err) => mysql_code_is_retryable(server_err.code, server_err.state.as_str()),
        _ => false,
    }
}

fn is_retryable_pg_error(err: &tokio_postgres::Error) -> bool {
    if err.is_closed() {
        return true;
    }
    matches!(
        err.code(),
        Some(&SqlState::T_R_SERIALIZATION_FAILURE)
            | Some(&SqlState::T_R_DEADLOCK_DETECTED)
            | Some(&SqlState::CONNECTION_FAILURE)
            | Some(&SqlState::CONNECTION_DOES_NOT_EXIST)
            | Some(&SqlState::CONNECTION_EXCEPTION)
            | Some(&SqlState::ADMIN_SHUTDOWN)
            | Some(&SqlState::CRASH_SHUTDOWN)
            | Some(&SqlState::CANNOT_CONNECT_NOW)
            | Some(&SqlState::TOO_MANY_CONNECTIONS)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_err(source: impl std::error::Error + Send + Sync + 'static) -> ExecError {
        ExecError::cant_perform_query(source, "SELECT 1")
    }

    #[test]
    fn generic_io_errors_use_the_shared_classifier() {
        let err = query_err(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(retryable(&err));
    }

    #[test]
    fn connect_and_init_conn_failures_are_retryable() {
        assert!(retryable(&ExecError::Connect(Box::new(std::io::Error::other("x")))));
        assert!(retryable(&ExecError::InitConn(Box::new(std::io::Error::other("x")))));
    }

    #[test]
    fn callback_errors_are_never_retryable() {
        assert!(!retryable(&ExecError::Callback(Box::new(std::io::Error::other("x")))));
    }
}
