use anyhow::{Context, Result as AnyResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::connection::IsolationLevel;
use super::transaction::{RetryPolicy, TransactionOptions};
use super::url::{Backend, ConnectionUrl, SslMode};
use crate::error::{Error, Result};

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    pub name: String,
    pub url: String,
    /// Overrides the password in the URL. Never written to disk.
    #[serde(skip_serializing, default)]
    pub password: String,
    #[serde(default)]
    pub isolation: IsolationLevel,
    /// Re-run transactions that fail with a serialization conflict.
    #[serde(default)]
    pub retry_on_conflict: bool,
    /// Cap on attempts when retrying; unbounded when absent.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Accept invalid/self-signed certificates. Use with caution.
    /// Ignored by the verifying TLS modes.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Optional path to a custom CA certificate file (PEM format).
    /// If not set, the system trust store is used.
    #[serde(default)]
    pub ca_cert_path: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: String::from("Local PostgreSQL"),
            url: String::from("postgres://postgres@localhost:5432/postgres"),
            password: String::new(),
            isolation: IsolationLevel::default(),
            retry_on_conflict: false,
            max_attempts: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            accept_invalid_certs: false,
            ca_cert_path: None,
        }
    }
}

impl ConnectionConfig {
    /// Config for `url` with default settings. The URL is validated here.
    pub fn from_url(name: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        let config = Self {
            name: name.into(),
            url: url.into(),
            ..Self::default()
        };
        config.parsed_url()?;
        Ok(config)
    }

    pub fn parsed_url(&self) -> Result<ConnectionUrl> {
        ConnectionUrl::parse(&self.url)
    }

    /// Password to send: the configured one, then the URL's, then
    /// `PGPASSWORD` for PostgreSQL.
    pub fn effective_password(&self, url: &ConnectionUrl) -> Option<String> {
        if !self.password.is_empty() {
            return Some(self.password.clone());
        }
        if let Some(password) = &url.password {
            return Some(password.clone());
        }
        match url.backend {
            Backend::Postgres => std::env::var("PGPASSWORD").ok(),
            _ => None,
        }
    }

    /// libpq key/value connection string for a PostgreSQL URL.
    pub fn connection_string(&self) -> Result<String> {
        let url = self.parsed_url()?;
        if url.backend != Backend::Postgres {
            return Err(Error::InvalidConfiguration(format!(
                "{} is a {} URL, not PostgreSQL",
                self.name, url.backend
            )));
        }
        // certificate checks for the verifying modes happen in the TLS
        // connector; the driver itself only knows disable/prefer/require
        let sslmode = match url.ssl_mode {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => "require",
        };
        let host = url.primary_host();
        let mut parts = vec![
            format!("host={}", quote_conn_value(&host.name)),
            format!("port={}", host.port),
        ];
        if let Some(database) = &url.database {
            parts.push(format!("dbname={}", quote_conn_value(database)));
        }
        if let Some(user) = &url.username {
            parts.push(format!("user={}", quote_conn_value(user)));
        }
        if let Some(password) = self.effective_password(&url) {
            parts.push(format!("password={}", quote_conn_value(&password)));
        }
        if let Some(app) = url.options.get("application_name") {
            parts.push(format!("application_name={}", quote_conn_value(app)));
        }
        parts.push(format!("sslmode={sslmode}"));
        parts.push(format!("connect_timeout={}", self.connect_timeout_secs));
        Ok(parts.join(" "))
    }

    /// `name (user@host:port/db)` without the password.
    pub fn display_string(&self) -> String {
        match self.parsed_url() {
            Ok(url) => format!("{} ({})", self.name, url.redacted()),
            Err(_) => self.name.clone(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn transaction_options(&self) -> TransactionOptions {
        TransactionOptions {
            isolation: self.isolation,
            retry: if self.retry_on_conflict {
                RetryPolicy::OnConflict {
                    max_attempts: self.max_attempts,
                }
            } else {
                RetryPolicy::Never
            },
        }
    }
}

/// Quote a value for use in a libpq key=value connection string.
/// Wraps in single quotes and escapes backslashes and single quotes.
fn quote_conn_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

/// Saved connections file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connection: Option<String>,
}

impl Settings {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dbkit")
            .join("connections.toml")
    }

    /// Load settings from `path`. A missing file is an empty configuration.
    pub fn load(path: &Path) -> AnyResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let settings: Settings =
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
        for config in &settings.connections {
            config
                .parsed_url()
                .with_context(|| format!("Connection {:?} has an invalid URL", config.name))?;
        }
        Ok(settings)
    }

    pub fn load_default() -> AnyResult<Self> {
        Self::load(&Self::default_path())
    }

    pub fn save(&self, path: &Path) -> AnyResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections.iter().find(|c| c.name == name)
    }

    /// Insert or replace the connection with the same name.
    pub fn upsert(&mut self, config: ConnectionConfig) {
        match self.connections.iter_mut().find(|c| c.name == config.name) {
            Some(existing) => *existing = config,
            None => self.connections.push(config),
        }
    }
}
