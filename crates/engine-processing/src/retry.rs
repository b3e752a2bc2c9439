use connectors::error::{ConnectorError, DbError};
use engine_core::retry::RetryDisposition;
use mysql_async::Error as MySqlError;
use tokio_postgres::{Error as PgError, error::SqlState};

pub fn classify_db_error(err: &DbError) -> RetryDisposition {
    match err {
        DbError::Io(_) => RetryDisposition::Retry,
        DbError::MySql(mysql_err) => classify_mysql_error(mysql_err),
        DbError::Postgres(pg_err) => classify_pg_error(pg_err),
        DbError::Connector(conn_err) => classify_connector_error(conn_err),
        DbError::TableNotFound(_) => RetryDisposition::Stop,
        DbError::InvalidMetadata { .. } => RetryDisposition::Stop,
        DbError::Conversion { .. } => RetryDisposition::Stop,
    }
}

fn classify_connector_error(err: &ConnectorError) -> RetryDisposition {
    match err {
        ConnectorError::MySql(mysql_err) => classify_mysql_error(mysql_err),
        ConnectorError::Connection(pg_err) => classify_pg_error(pg_err),
        ConnectorError::TlsConfig(_) => RetryDisposition::Retry,
        ConnectorError::InvalidUrl(_)
        | ConnectorError::UnknownDataSource(_)
        | ConnectorError::UnsupportedDatabase(_) => RetryDisposition::Stop,
    }
}

fn classify_pg_error(err: &PgError) -> RetryDisposition {
    if err.is_closed() {
        return RetryDisposition::Retry;
    }

    if let Some(code) = err.code()
        && is_retryable_pg_code(code)
    {
        return RetryDisposition::Retry;
    }

    RetryDisposition::Stop
}

fn is_retryable_pg_code(code: &SqlState) -> bool {
    matches!(
        *code,
        SqlState::T_R_SERIALIZATION_FAILURE
            | SqlState::T_R_DEADLOCK_DETECTED
            | SqlState::LOCK_NOT_AVAILABLE
            | SqlState::TOO_MANY_CONNECTIONS
            | SqlState::ADMIN_SHUTDOWN
            | SqlState::CRASH_SHUTDOWN
            | SqlState::CANNOT_CONNECT_NOW
            | SqlState::CONNECTION_FAILURE
            | SqlState::CONNECTION_DOES_NOT_EXIST
            | SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION
            | SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION
            | SqlState::CONNECTION_EXCEPTION
            | SqlState::QUERY_CANCELED
    )
}

fn classify_mysql_error(err: &MySqlError) -> RetryDisposition {
    match err {
        MySqlError::Io(_) | MySqlError::Driver(_) => RetryDisposition::Retry,
        MySqlError::Server(server_err) => {
            if is_retryable_mysql_server_error(server_err.code, server_err.state.as_str()) {
                RetryDisposition::Retry
            } else {
                RetryDisposition::Stop
            }
        }
        _ => RetryDisposition::Stop,
    }
}

/// Lock wait timeout, deadlock, connection loss and "too many connections".
fn is_retryable_mysql_server_error(code: u16, state: &str) -> bool {
    const RETRYABLE_CODES: [u16; 8] = [1205, 1213, 2002, 2003, 2006, 2013, 1040, 1042];
    if RETRYABLE_CODES.contains(&code) {
        return true;
    }

    matches!(state, "40001" | "HYT00" | "08S01")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_is_transient_and_schema_problems_are_not() {
        let io = DbError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert_eq!(classify_db_error(&io), RetryDisposition::Retry);
        assert_eq!(
            classify_db_error(&DbError::TableNotFound("t_order".into())),
            RetryDisposition::Stop
        );
        assert_eq!(
            classify_db_error(&DbError::Connector(ConnectorError::UnknownDataSource(
                "ds_9".into()
            ))),
            RetryDisposition::Stop
        );
    }

    #[test]
    fn mysql_deadlock_codes_are_retryable() {
        assert!(is_retryable_mysql_server_error(1213, "40001"));
        assert!(is_retryable_mysql_server_error(1062, "40001"));
        assert!(!is_retryable_mysql_server_error(1062, "23000"));
    }
}
