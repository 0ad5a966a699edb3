use crate::error::ConfigError;
use serde::Deserialize;

/// `type ∈ {mysql,pgsql}` (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    Mysql,
    Pgsql,
}

impl DbType {
    pub fn default_port(self) -> u16 {
        match self {
            DbType::Mysql => 3306,
            DbType::Pgsql => 5432,
        }
    }
}

/// `options.{max_connections|max_connections_per_table|
/// max_placeholders_per_statement|max_rows_per_transaction|
/// wsrep_sync_wait}` (spec.md §6).
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseOptions {
    #[serde(default = "default_max_connections")]
    pub max_connections: i64,
    #[serde(default = "default_max_connections_per_table")]
    pub max_connections_per_table: usize,
    #[serde(default = "default_max_placeholders_per_statement")]
    pub max_placeholders_per_statement: usize,
    #[serde(default = "default_max_rows_per_transaction")]
    pub max_rows_per_transaction: usize,
    pub wsrep_sync_wait: Option<u8>,
}

fn default_max_connections() -> i64 {
    16
}
fn default_max_connections_per_table() -> usize {
    8
}
fn default_max_placeholders_per_statement() -> usize {
    2000
}
fn default_max_rows_per_transaction() -> usize {
    1000
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_connections_per_table: default_max_connections_per_table(),
            max_placeholders_per_statement: default_max_placeholders_per_statement(),
            max_rows_per_transaction: default_max_rows_per_transaction(),
            wsrep_sync_wait: None,
        }
    }
}

/// The database config struct the YAML/env loader (spec.md §6)
/// populates; one per configured database handle.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub db_type: DbType,
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    pub password_file: Option<String>,
    #[serde(default)]
    pub tls: bool,
    pub cert: Option<String>,
    pub key: Option<String>,
    pub ca: Option<String>,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default)]
    pub options: DatabaseOptions,
}

impl DatabaseConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.db_type.default_port())
    }

    /// A `password_file` on disk wins over an inline `password` when
    /// both are configured.
    pub fn resolved_password(&self) -> Result<Option<String>, ConfigError> {
        match &self.password_file {
            Some(path) => Ok(Some(read_trimmed(path)?)),
            None => Ok(self.password.clone()),
        }
    }

    /// spec.md §6 validation constraints scoped to the database config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.options.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be non-zero".into()));
        }
        for (name, value) in [
            ("max_connections_per_table", self.options.max_connections_per_table),
            ("max_placeholders_per_statement", self.options.max_placeholders_per_statement),
            ("max_rows_per_transaction", self.options.max_rows_per_transaction),
        ] {
            if value < 1 {
                return Err(ConfigError::Invalid(format!("{name} must be >= 1")));
            }
        }
        if let Some(n) = self.options.wsrep_sync_wait {
            if n > 15 {
                return Err(ConfigError::Invalid("wsrep_sync_wait must be in [0,15]".into()));
            }
        }
        if !self.user.is_empty() && self.resolved_password()?.is_none() {
            return Err(ConfigError::Invalid("password must be set when user is set".into()));
        }
        Ok(())
    }

    /// `type[+tls]://user@host[:port]/database`, the informational
    /// logging form (spec.md §6). Unix sockets render host as
    /// `(/path)` for MySQL, `(/path/.s.PGSQL.<port>)` for PostgreSQL.
    pub fn database_uri(&self) -> String {
        let scheme = match self.db_type {
            DbType::Mysql => "mysql",
            DbType::Pgsql => "pgsql",
        };
        let scheme = if self.tls { format!("{scheme}+tls") } else { scheme.to_string() };

        let host = if self.host.starts_with('/') {
            match self.db_type {
                DbType::Mysql => format!("({})", self.host),
                DbType::Pgsql => format!("({}/.s.PGSQL.{})", self.host, self.port()),
            }
        } else {
            format!("{}:{}", self.host, self.port())
        };

        format!("{scheme}://{}@{host}/{}", self.user, self.database)
    }
}

fn read_trimmed(path: &str) -> Result<String, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents.trim_end_matches(['\n', '\r']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> DatabaseConfig {
        DatabaseConfig {
            db_type: DbType::Mysql,
            host: "db.example".into(),
            port: None,
            database: "icingadb".into(),
            user: "icinga".into(),
            password: Some("secret".into()),
            password_file: None,
            tls: false,
            cert: None,
            key: None,
            ca: None,
            insecure: false,
            options: DatabaseOptions::default(),
        }
    }

    #[test]
    fn uri_uses_default_port_when_unset() {
        assert_eq!(base().database_uri(), "mysql://icinga@db.example:3306/icingadb");
    }

    #[test]
    fn uri_marks_tls_scheme() {
        let mut cfg = base();
        cfg.tls = true;
        assert_eq!(cfg.database_uri(), "mysql+tls://icinga@db.example:3306/icingadb");
    }

    #[test]
    fn unix_socket_host_renders_pgsql_with_socket_suffix() {
        let mut cfg = base();
        cfg.db_type = DbType::Pgsql;
        cfg.host = "/var/run/postgresql".into();
        assert_eq!(
            cfg.database_uri(),
            "pgsql://icinga@(/var/run/postgresql/.s.PGSQL.5432)/icingadb"
        );
    }

    #[test]
    fn validate_rejects_zero_max_connections() {
        let mut cfg = base();
        cfg.options.max_connections = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_wsrep_sync_wait_out_of_range() {
        let mut cfg = base();
        cfg.options.wsrep_sync_wait = Some(16);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_requires_password_when_user_set() {
        let mut cfg = base();
        cfg.password = None;
        assert!(cfg.validate().is_err());
    }
}
