//! Transport kinds by identifier.

use futures::future;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{
    BrevoTransport, ResendTransport, SmtpTransport, SparkPostTransport, TransportFactory,
};
use crate::config::TransportConfig;
use crate::errors::{MailError, MailResult};
use crate::provider::ConfigProvider;

type Builder = dyn Fn(Value) -> MailResult<TransportFactory> + Send + Sync;

/// Maps a kind identifier and a JSON configuration to a transport factory.
///
/// ```rust
/// use integrations_mail::transport::TransportRegistry;
///
/// let registry = TransportRegistry::with_defaults();
/// let factory = registry
///     .build("resend", serde_json::json!({"key": "re_123"}))
///     .unwrap();
/// assert_eq!(factory.create().unwrap().kind().to_string(), "resend");
/// ```
#[derive(Clone, Default)]
pub struct TransportRegistry {
    builders: HashMap<String, Arc<Builder>>,
}

impl TransportRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with `smtp`, `sparkpost`, `resend` and `brevo`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register("smtp", |value| factory(TransportConfig::Smtp(typed("smtp", value)?)))
            .register("sparkpost", |value| {
                factory(TransportConfig::SparkPost(typed("sparkpost", value)?))
            })
            .register("resend", |value| {
                factory(TransportConfig::Resend(typed("resend", value)?))
            })
            .register("brevo", |value| factory(TransportConfig::Brevo(typed("brevo", value)?)));
        registry
    }

    /// Registers or replaces the builder for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, builder: F) -> &mut Self
    where
        F: Fn(Value) -> MailResult<TransportFactory> + Send + Sync + 'static,
    {
        self.builders.insert(kind.into(), Arc::new(builder));
        self
    }

    /// Returns true if `kind` is registered.
    pub fn contains(&self, kind: &str) -> bool {
        self.builders.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Builds a factory for `kind` from `config`.
    pub fn build(&self, kind: &str, config: Value) -> MailResult<TransportFactory> {
        let builder = self.builders.get(kind).ok_or_else(|| {
            MailError::configuration(format!("Unknown transport kind \"{}\"", kind))
        })?;
        builder(config)
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

fn typed<T: DeserializeOwned>(kind: &str, value: Value) -> MailResult<T> {
    serde_json::from_value(value)
        .map_err(|e| MailError::configuration(format!("Invalid {} configuration: {}", kind, e)))
}

/// Validates `config` and wraps the matching constructor in a factory.
pub fn factory(config: TransportConfig) -> MailResult<TransportFactory> {
    config.validate()?;
    Ok(match config {
        TransportConfig::Smtp(config) => {
            TransportFactory::new(move || SmtpTransport::new(config.clone()))
        }
        TransportConfig::SparkPost(config) => {
            TransportFactory::new(move || SparkPostTransport::new(config.clone()))
        }
        TransportConfig::Resend(config) => {
            TransportFactory::new(move || ResendTransport::new(config.clone()))
        }
        TransportConfig::Brevo(config) => {
            TransportFactory::new(move || BrevoTransport::new(config.clone()))
        }
    })
}

/// Provider of a factory for `config`. Validation runs on resolution.
pub fn provider_for<C: 'static>(config: TransportConfig) -> ConfigProvider<C, TransportFactory> {
    ConfigProvider::create(move |_: &C| future::ready(factory(config.clone())))
}

/// Providers for the built-in transports, ready to drop into a
/// [`MailerConfig`](crate::config::MailerConfig).
///
/// ```rust
/// use integrations_mail::config::{MailerConfig, SparkPostConfig};
/// use integrations_mail::transport::transports;
///
/// let config: MailerConfig = MailerConfig::new()
///     .default_mailer("marketing")
///     .mailer("marketing", transports::sparkpost(SparkPostConfig::new("key")));
/// assert!(config.mailers["marketing"].is_provider());
/// ```
pub mod transports {
    use super::provider_for;
    use crate::config::{BrevoConfig, ResendConfig, SmtpConfig, SparkPostConfig, TransportConfig};
    use crate::provider::ConfigProvider;
    use crate::transport::TransportFactory;

    /// SMTP relay.
    pub fn smtp<C: 'static>(config: SmtpConfig) -> ConfigProvider<C, TransportFactory> {
        provider_for(TransportConfig::Smtp(config))
    }

    /// SparkPost HTTP API.
    pub fn sparkpost<C: 'static>(config: SparkPostConfig) -> ConfigProvider<C, TransportFactory> {
        provider_for(TransportConfig::SparkPost(config))
    }

    /// Resend HTTP API.
    pub fn resend<C: 'static>(config: ResendConfig) -> ConfigProvider<C, TransportFactory> {
        provider_for(TransportConfig::Resend(config))
    }

    /// Brevo HTTP API.
    pub fn brevo<C: 'static>(config: BrevoConfig) -> ConfigProvider<C, TransportFactory> {
        provider_for(TransportConfig::Brevo(config))
    }
}
