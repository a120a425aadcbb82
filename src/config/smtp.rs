//! SMTP relay configuration.

use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;

use crate::errors::{MailError, MailResult};
use crate::transport::smtp::AuthMethod;

/// Default SMTP port (submission with STARTTLS).
pub const DEFAULT_PORT: u16 = 587;

/// Default timeout for connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// TLS mode for SMTP connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// No TLS (insecure, not recommended).
    None,
    /// Opportunistic STARTTLS (default).
    #[default]
    StartTls,
    /// Required STARTTLS (fail if not supported).
    StartTlsRequired,
    /// Implicit TLS (port 465).
    Implicit,
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// How long a send waits for a free connection.
    #[serde(default = "default_acquire_timeout", with = "seconds")]
    pub acquire_timeout: Duration,
}

fn default_max_connections() -> usize {
    5
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            acquire_timeout: default_acquire_timeout(),
        }
    }
}

/// SMTP relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// TLS mode.
    #[serde(default)]
    pub tls: TlsMode,
    /// Accept invalid certificates. Test servers only.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Authentication username.
    #[serde(default)]
    pub username: Option<String>,
    /// Authentication password or OAuth2 token.
    #[serde(default)]
    pub password: Option<SecretString>,
    /// Preferred authentication method.
    #[serde(default)]
    pub auth_method: Option<AuthMethod>,
    /// Connect timeout.
    #[serde(default = "default_connect_timeout", with = "seconds")]
    pub connect_timeout: Duration,
    /// Command timeout.
    #[serde(default = "default_command_timeout", with = "seconds")]
    pub command_timeout: Duration,
    /// Client identifier for EHLO.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Connection pooling; every send opens its own connection when unset.
    #[serde(default)]
    pub pool: Option<PoolConfig>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_command_timeout() -> Duration {
    DEFAULT_COMMAND_TIMEOUT
}

impl SmtpConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> SmtpConfigBuilder {
        SmtpConfigBuilder::default()
    }

    /// Reads `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME` and `SMTP_PASSWORD`.
    pub fn from_env() -> MailResult<Self> {
        let host = std::env::var("SMTP_HOST")
            .map_err(|_| MailError::configuration("SMTP_HOST environment variable not set"))?;
        let mut builder = Self::builder().host(host);

        if let Ok(port) = std::env::var("SMTP_PORT") {
            let port = port
                .parse()
                .map_err(|_| MailError::configuration(format!("Invalid SMTP_PORT: {}", port)))?;
            builder = builder.port(port);
        }
        if let Ok(username) = std::env::var("SMTP_USERNAME") {
            builder = builder.username(username);
        }
        if let Ok(password) = std::env::var("SMTP_PASSWORD") {
            builder = builder.password(password);
        }

        builder.build()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> MailResult<()> {
        if self.host.is_empty() {
            return Err(MailError::configuration("SMTP host is required"));
        }
        if self.port == 0 {
            return Err(MailError::configuration("SMTP port must be non-zero"));
        }
        if let Some(pool) = &self.pool {
            if pool.max_connections == 0 {
                return Err(MailError::configuration("max_connections must be positive"));
            }
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(MailError::configuration("SMTP password set without a username"));
        }
        Ok(())
    }

    /// Returns the full server address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns true if authentication is configured.
    pub fn has_auth(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Returns the client identifier for EHLO.
    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or("localhost")
    }

    /// Returns a copy with every `Some` field of `runtime` applied.
    pub fn merged_with(&self, runtime: &SmtpRuntimeConfig) -> Self {
        let mut merged = self.clone();
        if let Some(host) = &runtime.host {
            merged.host = host.clone();
        }
        if let Some(port) = runtime.port {
            merged.port = port;
        }
        if let Some(tls) = runtime.tls {
            merged.tls = tls;
        }
        if let Some(username) = &runtime.username {
            merged.username = Some(username.clone());
        }
        if let Some(password) = &runtime.password {
            merged.password = Some(password.clone());
        }
        if let Some(method) = runtime.auth_method {
            merged.auth_method = Some(method);
        }
        if let Some(client_id) = &runtime.client_id {
            merged.client_id = Some(client_id.clone());
        }
        merged
    }
}

/// Per-send SMTP overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmtpRuntimeConfig {
    /// Host override.
    #[serde(default)]
    pub host: Option<String>,
    /// Port override.
    #[serde(default)]
    pub port: Option<u16>,
    /// TLS mode override.
    #[serde(default)]
    pub tls: Option<TlsMode>,
    /// Username override.
    #[serde(default)]
    pub username: Option<String>,
    /// Password override.
    #[serde(default)]
    pub password: Option<SecretString>,
    /// Auth method override.
    #[serde(default)]
    pub auth_method: Option<AuthMethod>,
    /// EHLO identifier override.
    #[serde(default)]
    pub client_id: Option<String>,
}

impl SmtpRuntimeConfig {
    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        self.host.is_none()
            && self.port.is_none()
            && self.tls.is_none()
            && self.username.is_none()
            && self.password.is_none()
            && self.auth_method.is_none()
            && self.client_id.is_none()
    }
}

/// Builder for SMTP configuration.
#[derive(Debug, Default)]
pub struct SmtpConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    tls: TlsMode,
    accept_invalid_certs: bool,
    username: Option<String>,
    password: Option<SecretString>,
    auth_method: Option<AuthMethod>,
    connect_timeout: Option<Duration>,
    command_timeout: Option<Duration>,
    client_id: Option<String>,
    pool: Option<PoolConfig>,
}

impl SmtpConfigBuilder {
    /// Sets the server host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the server port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets username and password.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Sets the username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Sets the preferred auth method.
    pub fn auth_method(mut self, method: AuthMethod) -> Self {
        self.auth_method = Some(method);
        self
    }

    /// Sets the TLS mode.
    pub fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.tls = mode;
        self
    }

    /// Disables TLS.
    pub fn no_tls(mut self) -> Self {
        self.tls = TlsMode::None;
        self
    }

    /// Accepts invalid server certificates.
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Sets the EHLO identifier.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Enables connection pooling.
    pub fn pool(mut self, config: PoolConfig) -> Self {
        self.pool = Some(config);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> MailResult<SmtpConfig> {
        let config = SmtpConfig {
            host: self
                .host
                .ok_or_else(|| MailError::configuration("SMTP host is required"))?,
            port: self.port.unwrap_or(DEFAULT_PORT),
            tls: self.tls,
            accept_invalid_certs: self.accept_invalid_certs,
            username: self.username,
            password: self.password,
            auth_method: self.auth_method,
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            command_timeout: self.command_timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT),
            client_id: self.client_id,
            pool: self.pool,
        };

        config.validate()?;
        Ok(config)
    }
}

/// Durations as whole seconds.
mod seconds {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
