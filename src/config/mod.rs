//! Configuration for transports and mailers.
//!
//! Provides:
//! - Base configuration per transport kind, supplied at construction
//! - Runtime configuration per send, shallow-merged over the base
//! - [`SendOptions`] carrying runtime overrides and provider options
//! - Serde-tagged [`TransportConfig`] so mailer definitions can be
//!   deserialized
//! - [`MailerConfig`] and [`define_config`], the mailer definition entry point

mod mailers;
mod providers;
mod smtp;

pub use mailers::{define_config, MailerConfig, MailersDefinition, ResolvedMailerConfig};
pub use providers::{
    BrevoConfig, BrevoRuntimeConfig, ResendConfig, ResendRuntimeConfig, ResendTag,
    SparkPostConfig, SparkPostRuntimeConfig, BREVO_BASE_URL, RESEND_BASE_URL,
    SPARKPOST_BASE_URL,
};
pub use smtp::{
    PoolConfig, SmtpConfig, SmtpConfigBuilder, SmtpRuntimeConfig, TlsMode,
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT,
};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::errors::{MailError, MailResult};
use crate::transport::TransportKind;

/// Per-send configuration override, tagged by transport kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum RuntimeConfig {
    /// SMTP overrides.
    Smtp(SmtpRuntimeConfig),
    /// SparkPost overrides.
    SparkPost(SparkPostRuntimeConfig),
    /// Resend overrides.
    Resend(ResendRuntimeConfig),
    /// Brevo overrides.
    Brevo(BrevoRuntimeConfig),
}

impl RuntimeConfig {
    /// Transport kind this override belongs to.
    pub fn kind(&self) -> TransportKind {
        match self {
            RuntimeConfig::Smtp(_) => TransportKind::Smtp,
            RuntimeConfig::SparkPost(_) => TransportKind::SparkPost,
            RuntimeConfig::Resend(_) => TransportKind::Resend,
            RuntimeConfig::Brevo(_) => TransportKind::Brevo,
        }
    }

    /// Error for an override handed to a transport of another kind.
    pub(crate) fn mismatch(&self, transport: TransportKind) -> MailError {
        MailError::configuration(format!(
            "{} runtime config cannot be used with the {} transport",
            self.kind(),
            transport
        ))
    }
}

impl From<SmtpRuntimeConfig> for RuntimeConfig {
    fn from(config: SmtpRuntimeConfig) -> Self {
        RuntimeConfig::Smtp(config)
    }
}

impl From<SparkPostRuntimeConfig> for RuntimeConfig {
    fn from(config: SparkPostRuntimeConfig) -> Self {
        RuntimeConfig::SparkPost(config)
    }
}

impl From<ResendRuntimeConfig> for RuntimeConfig {
    fn from(config: ResendRuntimeConfig) -> Self {
        RuntimeConfig::Resend(config)
    }
}

impl From<BrevoRuntimeConfig> for RuntimeConfig {
    fn from(config: BrevoRuntimeConfig) -> Self {
        RuntimeConfig::Brevo(config)
    }
}

/// Options for a single send.
///
/// `provider_options` are copied verbatim into the provider request and are
/// never interpreted by the transport.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Runtime configuration override.
    pub runtime: Option<RuntimeConfig>,
    /// Opaque provider options.
    pub provider_options: Map<String, Value>,
}

impl SendOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the runtime override.
    pub fn runtime(mut self, runtime: impl Into<RuntimeConfig>) -> Self {
        self.runtime = Some(runtime.into());
        self
    }

    /// Adds one provider option.
    pub fn provider_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.provider_options.insert(key.into(), value.into());
        self
    }

    /// Replaces all provider options.
    pub fn provider_options(mut self, options: Map<String, Value>) -> Self {
        self.provider_options = options;
        self
    }
}

/// Base configuration of a built-in transport, tagged by kind.
///
/// ```rust
/// use integrations_mail::config::TransportConfig;
///
/// let config: TransportConfig = serde_json::from_str(
///     r#"{"transport": "sparkpost", "key": "abc"}"#,
/// ).unwrap();
/// assert_eq!(config.kind().to_string(), "sparkpost");
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum TransportConfig {
    /// SMTP relay.
    Smtp(SmtpConfig),
    /// SparkPost HTTP API.
    SparkPost(SparkPostConfig),
    /// Resend HTTP API.
    Resend(ResendConfig),
    /// Brevo HTTP API.
    Brevo(BrevoConfig),
}

impl TransportConfig {
    /// Transport kind of this configuration.
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Smtp(_) => TransportKind::Smtp,
            TransportConfig::SparkPost(_) => TransportKind::SparkPost,
            TransportConfig::Resend(_) => TransportKind::Resend,
            TransportConfig::Brevo(_) => TransportKind::Brevo,
        }
    }

    /// Validates the inner configuration.
    pub fn validate(&self) -> MailResult<()> {
        match self {
            TransportConfig::Smtp(config) => config.validate(),
            TransportConfig::SparkPost(config) => config.validate(),
            TransportConfig::Resend(config) => config.validate(),
            TransportConfig::Brevo(config) => config.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_config_deserializes_by_tag() {
        let runtime: RuntimeConfig = serde_json::from_value(serde_json::json!({
            "transport": "sparkpost",
            "open_tracking": false
        }))
        .unwrap();

        assert_eq!(runtime.kind(), TransportKind::SparkPost);
        match runtime {
            RuntimeConfig::SparkPost(config) => assert_eq!(config.open_tracking, Some(false)),
            other => panic!("unexpected runtime config: {:?}", other),
        }
    }

    #[test]
    fn test_runtime_mismatch_is_configuration_error() {
        let runtime = RuntimeConfig::from(ResendRuntimeConfig::default());
        let err = runtime.mismatch(TransportKind::SparkPost);
        assert!(err.is_configuration());
        assert!(err.to_string().contains("resend runtime config"));
    }

    #[test]
    fn test_transport_config_by_tag() {
        let config: TransportConfig = serde_json::from_value(serde_json::json!({
            "transport": "smtp",
            "host": "smtp.example.com",
            "port": 2525
        }))
        .unwrap();
        assert_eq!(config.kind(), TransportKind::Smtp);
        assert!(config.validate().is_ok());

        let unknown = serde_json::from_value::<TransportConfig>(serde_json::json!({
            "transport": "carrier-pigeon"
        }));
        assert!(unknown.is_err());
    }

    #[test]
    fn test_send_options_builder() {
        let options = SendOptions::new()
            .runtime(SparkPostRuntimeConfig::default())
            .provider_option("campaign_id", "welcome");

        assert_eq!(options.runtime.unwrap().kind(), TransportKind::SparkPost);
        assert_eq!(options.provider_options["campaign_id"], "welcome");
    }
}
