use crate::error::ConfigError;
use native_tls::{Certificate, Identity, TlsConnector};
use std::path::Path;

/// `cert`/`key`/`ca` accept either inline PEM text or a path to a file
/// containing it (spec.md §6).
fn read_pem(value: &str) -> Result<Vec<u8>, ConfigError> {
    if value.trim_start().starts_with("-----BEGIN") {
        Ok(value.as_bytes().to_vec())
    } else if Path::new(value).is_file() {
        Ok(std::fs::read(value)?)
    } else {
        Err(ConfigError::Invalid(format!(
            "{value} is neither inline PEM text nor an existing file"
        )))
    }
}

/// Assembles a [`TlsConnector`] from a config's inline TLS fields.
/// `insecure` skips both hostname and certificate verification.
pub fn build_tls_connector(
    cert: Option<&str>,
    key: Option<&str>,
    ca: Option<&str>,
    insecure: bool,
) -> Result<TlsConnector, ConfigError> {
    let mut builder = TlsConnector::builder();

    if let (Some(cert), Some(key)) = (cert, key) {
        let cert_pem = read_pem(cert)?;
        let key_pem = read_pem(key)?;
        let identity = Identity::from_pkcs8(&cert_pem, &key_pem)
            .map_err(|e| ConfigError::Invalid(format!("invalid client cert/key: {e}")))?;
        builder.identity(identity);
    }

    if let Some(ca) = ca {
        let ca_pem = read_pem(ca)?;
        let ca_cert =
            Certificate::from_pem(&ca_pem).map_err(|e| ConfigError::Invalid(format!("invalid CA certificate: {e}")))?;
        builder.add_root_certificate(ca_cert);
    }

    if insecure {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    }

    builder
        .build()
        .map_err(|e| ConfigError::Invalid(format!("failed to build TLS connector: {e}")))
}

/// Wraps the connector for `tokio-postgres`, matching the teacher's
/// `postgres_native_tls::MakeTlsConnector` usage
/// (`crates/connectors/src/sql/postgres/utils.rs`).
pub fn postgres_tls_connector(
    cert: Option<&str>,
    key: Option<&str>,
    ca: Option<&str>,
    insecure: bool,
) -> Result<postgres_native_tls::MakeTlsConnector, ConfigError> {
    let connector = build_tls_connector(cert, key, ca, insecure)?;
    Ok(postgres_native_tls::MakeTlsConnector::new(connector))
}
