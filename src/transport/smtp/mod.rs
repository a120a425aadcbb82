//! SMTP relay transport.
//!
//! Renders the message to MIME, then runs one mail transaction against the
//! configured relay. With a [`PoolConfig`](crate::config::PoolConfig)
//! connections are kept open in a deadpool pool and recycled with NOOP;
//! without one every send opens and closes its own session.

mod auth;
mod connection;
mod protocol;

pub use auth::AuthMethod;
pub use protocol::{EsmtpCapabilities, SmtpResponse};

use async_trait::async_trait;
use deadpool::managed::{self, Metrics, Object, PoolError, RecycleError, RecycleResult};
use deadpool::Runtime;
use serde_json::json;
use std::fmt;
use tracing::{debug, info};

use self::connection::{Delivery, SmtpConnection};
use super::{Transport, TransportKind};
use crate::config::{PoolConfig, RuntimeConfig, SendOptions, SmtpConfig};
use crate::errors::{MailError, MailResult, SmtpError, SmtpErrorKind};
use crate::mime::PreparedMessage;
use crate::types::{MailResponse, Message};

pub(crate) type SmtpResult<T> = Result<T, SmtpError>;

/// Opens and health-checks pooled sessions.
#[derive(Debug)]
struct ConnectionManager {
    config: SmtpConfig,
}

#[async_trait]
impl managed::Manager for ConnectionManager {
    type Type = SmtpConnection;
    type Error = SmtpError;

    async fn create(&self) -> Result<SmtpConnection, SmtpError> {
        SmtpConnection::connect(&self.config).await
    }

    async fn recycle(&self, conn: &mut SmtpConnection, _: &Metrics) -> RecycleResult<SmtpError> {
        conn.noop().await.map_err(RecycleError::Backend)
    }
}

type ConnectionPool = managed::Pool<ConnectionManager>;

fn build_pool(config: &SmtpConfig, pool: &PoolConfig) -> MailResult<ConnectionPool> {
    managed::Pool::builder(ConnectionManager {
        config: config.clone(),
    })
    .max_size(pool.max_connections)
    .wait_timeout(Some(pool.acquire_timeout))
    .runtime(Runtime::Tokio1)
    .build()
    .map_err(|e| MailError::configuration(format!("Failed to create SMTP pool: {}", e)))
}

fn pool_error(error: PoolError<SmtpError>) -> SmtpError {
    match error {
        PoolError::Backend(e) => e,
        PoolError::Timeout(_) => SmtpError::new(
            SmtpErrorKind::Timeout,
            "Timed out waiting for a pooled SMTP connection",
        ),
        other => SmtpError::new(
            SmtpErrorKind::ConnectionReset,
            format!("SMTP pool unavailable: {}", other),
        ),
    }
}

/// SMTP relay transport.
pub struct SmtpTransport {
    config: SmtpConfig,
    pool: Option<ConnectionPool>,
}

impl fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpTransport")
            .field("config", &self.config)
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl SmtpTransport {
    /// Creates a transport. No connection is opened until the first send.
    pub fn new(config: SmtpConfig) -> MailResult<Self> {
        config.validate()?;
        let pool = match &config.pool {
            Some(pool_config) => Some(build_pool(&config, pool_config)?),
            None => None,
        };
        Ok(Self { config, pool })
    }

    /// Base configuration.
    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    /// Opens a session (greeting, TLS, AUTH) and closes it again.
    pub async fn verify(&self) -> MailResult<()> {
        let conn = SmtpConnection::connect(&self.config)
            .await
            .map_err(|e| MailError::transport(TransportKind::Smtp, "SMTP connection check failed", e))?;
        info!(
            host = %self.config.host,
            tls = conn.is_tls(),
            starttls = conn.capabilities().starttls,
            "smtp relay reachable"
        );
        conn.quit().await;
        Ok(())
    }

    /// Returns the merged config for a runtime override, or `None` to use
    /// the base config (and the pool).
    fn effective_config(&self, runtime: Option<&RuntimeConfig>) -> MailResult<Option<SmtpConfig>> {
        match runtime {
            None => Ok(None),
            Some(RuntimeConfig::Smtp(overrides)) if overrides.is_empty() => Ok(None),
            Some(RuntimeConfig::Smtp(overrides)) => {
                let merged = self.config.merged_with(overrides);
                merged.validate()?;
                Ok(Some(merged))
            }
            Some(other) => Err(other.mismatch(TransportKind::Smtp)),
        }
    }

    async fn deliver(
        &self,
        overrides: Option<SmtpConfig>,
        from: &str,
        recipients: &[String],
        data: &[u8],
    ) -> SmtpResult<Delivery> {
        if let (None, Some(pool)) = (&overrides, &self.pool) {
            let mut conn = pool.get().await.map_err(pool_error)?;
            return match conn.send_mail(from, recipients, data).await {
                Ok(delivery) => Ok(delivery),
                Err(e) => {
                    // Never hand a session in an unknown state back to the pool.
                    drop(Object::take(conn));
                    Err(e)
                }
            };
        }

        let config = overrides.as_ref().unwrap_or(&self.config);
        let mut conn = SmtpConnection::connect(config).await?;
        let result = conn.send_mail(from, recipients, data).await;
        conn.quit().await;
        result
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Smtp
    }

    async fn send(&self, message: &Message, options: SendOptions) -> MailResult<MailResponse> {
        let overrides = self.effective_config(options.runtime.as_ref())?;
        if !options.provider_options.is_empty() {
            debug!("provider options are not used by the smtp transport");
        }

        let prepared = PreparedMessage::prepare(message)?;
        let envelope = prepared.envelope();
        let data = prepared.to_mime()?;
        debug!(envelope = ?envelope, size = data.len(), "smtp mail envelope");

        let delivery = self
            .deliver(overrides, &envelope.from, &envelope.to, &data)
            .await
            .map_err(|e| MailError::send_failed(TransportKind::Smtp, e))?;

        let raw = json!({
            "accepted": delivery.accepted,
            "rejected": delivery.rejected,
            "response": delivery.response,
        });
        Ok(MailResponse::new(prepared.message_id(), envelope, raw))
    }

    async fn close(&self) -> MailResult<()> {
        if let Some(pool) = &self.pool {
            pool.close();
        }
        Ok(())
    }
}
