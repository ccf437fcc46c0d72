use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{pin_mut, TryStreamExt};
use postgres_native_tls::MakeTlsConnector;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::{Client, NoTls, Socket};
use tracing::{debug, error};

use super::config::ConnectionConfig;
use super::connection::{Connection, IsolationLevel};
use super::query::{decode_pg_row, BackendError, QueryMetadata, Row};
use super::url::{Backend, SslMode};
use crate::ast::dialect::{Dialect, POSTGRES};
use crate::error::{Error, Result};
use crate::value::postgres::param_type;
use crate::value::Value;

const BACKEND: &str = "postgres";

/// PostgreSQL connection over a `tokio_postgres` client.
pub struct PgConnection {
    client: Client,
    label: String,
}

impl PgConnection {
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let client = create_client(config).await?;
        Ok(Self::from_client(client, config.display_string()))
    }

    pub fn from_client(client: Client, label: impl Into<String>) -> Self {
        Self {
            client,
            label: label.into(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn batch(&self, sql: &str) -> Result<()> {
        debug!(sql, "postgres batch");
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| BackendError::from_pg_error(&e, sql).into())
    }
}

fn typed_params(params: &[Value]) -> Vec<(&(dyn ToSql + Sync), Type)> {
    params
        .iter()
        .map(|v| (v as &(dyn ToSql + Sync), param_type(v)))
        .collect()
}

fn begin_statement(isolation: IsolationLevel) -> String {
    match isolation.sql() {
        Some(level) => format!("BEGIN ISOLATION LEVEL {level}"),
        None => "BEGIN".to_string(),
    }
}

#[async_trait]
impl Connection for PgConnection {
    fn label(&self) -> &str {
        &self.label
    }

    fn dialect(&self) -> Option<&'static Dialect> {
        Some(&POSTGRES)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let rows = self
            .client
            .query_typed(sql, &typed_params(params))
            .await
            .map_err(|e| BackendError::from_pg_error(&e, sql))?;
        let mut columns = None;
        rows.iter().map(|row| decode_pg_row(row, &mut columns)).collect()
    }

    async fn execute_streaming(
        &self,
        sql: &str,
        params: &[Value],
        on_row: &mut (dyn FnMut(Row) -> Result<()> + Send),
    ) -> Result<QueryMetadata> {
        let started = Instant::now();
        let stream = self
            .client
            .query_typed_raw(sql, typed_params(params))
            .await
            .map_err(|e| BackendError::from_pg_error(&e, sql))?;
        pin_mut!(stream);

        let mut metadata = QueryMetadata::default();
        let mut columns = None;
        while let Some(row) = stream
            .try_next()
            .await
            .map_err(|e| BackendError::from_pg_error(&e, sql))?
        {
            on_row(decode_pg_row(&row, &mut columns)?)?;
            metadata.row_count += 1;
        }

        metadata.affected_rows = stream.rows_affected();
        metadata.columns = columns.map(|names| names.to_vec()).unwrap_or_default();
        metadata.execution_time = started.elapsed();
        Ok(metadata)
    }

    async fn begin(&self, isolation: IsolationLevel) -> Result<()> {
        self.batch(&begin_statement(isolation)).await
    }

    async fn commit(&self) -> Result<()> {
        self.batch("COMMIT").await
    }

    async fn rollback(&self) -> Result<()> {
        self.batch("ROLLBACK").await
    }

    async fn savepoint(&self, name: &str) -> Result<()> {
        self.batch(&format!("SAVEPOINT {}", POSTGRES.quote_identifier(name)))
            .await
    }

    async fn release_savepoint(&self, name: &str) -> Result<()> {
        self.batch(&format!("RELEASE SAVEPOINT {}", POSTGRES.quote_identifier(name)))
            .await
    }

    async fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        self.batch(&format!("ROLLBACK TO SAVEPOINT {}", POSTGRES.quote_identifier(name)))
            .await
    }
}

/// Open a client for `config`. The driver's connection task is spawned
/// onto the current runtime.
pub async fn create_client(config: &ConnectionConfig) -> Result<Client> {
    let url = config.parsed_url()?;
    if url.backend != Backend::Postgres {
        return Err(Error::InvalidConfiguration(format!(
            "{} is not a PostgreSQL connection",
            config.name
        )));
    }
    let conn_string = config.connection_string()?;
    let timeout = config.connect_timeout();

    match url.ssl_mode {
        SslMode::Disable => connect_with(&conn_string, timeout, NoTls).await,
        // certificate verification depends on settings
        SslMode::Prefer | SslMode::Require => {
            connect_with(&conn_string, timeout, build_tls_connector(config, false)?).await
        }
        SslMode::VerifyCa | SslMode::VerifyFull => {
            connect_with(&conn_string, timeout, build_tls_connector(config, true)?).await
        }
    }
}

async fn connect_with<T>(conn_string: &str, timeout: Duration, tls: T) -> Result<Client>
where
    T: MakeTlsConnect<Socket> + Send + 'static,
    T::Stream: Send + 'static,
    T::TlsConnect: Send,
    <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    let (client, connection) = with_timeout(timeout, tokio_postgres::connect(conn_string, tls)).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("connection error: {}", e);
        }
    });
    Ok(client)
}

async fn with_timeout<T>(
    timeout: Duration,
    connect: impl std::future::Future<Output = std::result::Result<T, tokio_postgres::Error>>,
) -> Result<T> {
    tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| {
            BackendError::connection(
                BACKEND,
                format!("connection timed out after {}s", timeout.as_secs()),
            )
        })?
        .map_err(|e| BackendError::from_pg_error(&e, "").into())
}

/// Build a TLS connector.
///
/// `strict_verify` is set for the verifying modes; invalid certificates are
/// then never accepted, whatever the configuration says.
fn build_tls_connector(config: &ConnectionConfig, strict_verify: bool) -> Result<MakeTlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();

    if config.accept_invalid_certs && !strict_verify {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    } else if let Some(ca_path) = &config.ca_cert_path {
        let pem = std::fs::read(ca_path).map_err(|e| {
            Error::InvalidConfiguration(format!("failed to read CA certificate file {ca_path}: {e}"))
        })?;
        add_ca_certificates(&mut builder, &pem)?;
    }
    // otherwise the system trust store applies

    let connector = builder
        .build()
        .map_err(|e| Error::InvalidConfiguration(format!("failed to build TLS connector: {e}")))?;
    Ok(MakeTlsConnector::new(connector))
}

fn add_ca_certificates(builder: &mut native_tls::TlsConnectorBuilder, pem: &[u8]) -> Result<()> {
    let certs = parse_pem_certificates(pem)?;
    for der in certs {
        let cert = native_tls::Certificate::from_der(&der)
            .map_err(|e| Error::InvalidConfiguration(format!("failed to parse certificate: {e}")))?;
        builder.add_root_certificate(cert);
    }
    Ok(())
}

/// DER bodies of every `CERTIFICATE` block in a PEM bundle.
fn parse_pem_certificates(pem: &[u8]) -> Result<Vec<Vec<u8>>> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    let text = std::str::from_utf8(pem)
        .map_err(|_| Error::InvalidConfiguration("CA certificate file is not valid UTF-8".into()))?;

    let mut certs = Vec::new();
    let mut current = String::new();
    let mut in_cert = false;
    for line in text.lines() {
        if line.contains("-----BEGIN CERTIFICATE-----") {
            in_cert = true;
            current.clear();
        } else if line.contains("-----END CERTIFICATE-----") {
            in_cert = false;
            if !current.is_empty() {
                let der = STANDARD.decode(&current).map_err(|e| {
                    Error::InvalidConfiguration(format!("failed to decode certificate base64: {e}"))
                })?;
                certs.push(der);
            }
        } else if in_cert {
            current.push_str(line.trim());
        }
    }

    if certs.is_empty() {
        return Err(Error::InvalidConfiguration(
            "no valid certificates found in PEM data".into(),
        ));
    }
    Ok(certs)
}
