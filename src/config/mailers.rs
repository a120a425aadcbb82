//! Mailer definitions.

use futures::future::BoxFuture;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::config::TransportConfig;
use crate::errors::MailResult;
use crate::provider::{ConfigProvider, ConfigValue};
use crate::transport::{registry, TransportFactory};
use crate::types::AddressEntry;

/// Mailer definition: named transport factories, each given directly or
/// through a provider resolved against a context of type `C`.
pub struct MailerConfig<C = ()> {
    /// Mailer used when a send names none.
    pub default: Option<String>,
    /// Mailers by name.
    pub mailers: BTreeMap<String, ConfigValue<C, TransportFactory>>,
    /// Sender applied to messages without one.
    pub from: Option<AddressEntry>,
    /// Reply-to applied to messages without one.
    pub reply_to: Option<AddressEntry>,
}

impl<C> MailerConfig<C> {
    /// Creates an empty definition.
    pub fn new() -> Self {
        Self {
            default: None,
            mailers: BTreeMap::new(),
            from: None,
            reply_to: None,
        }
    }

    /// Sets the default mailer name.
    pub fn default_mailer(mut self, name: impl Into<String>) -> Self {
        self.default = Some(name.into());
        self
    }

    /// Adds a mailer backed by a factory or a provider of one.
    pub fn mailer(
        mut self,
        name: impl Into<String>,
        factory: impl Into<ConfigValue<C, TransportFactory>>,
    ) -> Self {
        self.mailers.insert(name.into(), factory.into());
        self
    }

    /// Sets the global sender.
    pub fn from(mut self, address: impl Into<AddressEntry>) -> Self {
        self.from = Some(address.into());
        self
    }

    /// Sets the global reply-to.
    pub fn reply_to(mut self, address: impl Into<AddressEntry>) -> Self {
        self.reply_to = Some(address.into());
        self
    }
}

impl<C> Default for MailerConfig<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Clone for MailerConfig<C> {
    fn clone(&self) -> Self {
        Self {
            default: self.default.clone(),
            mailers: self.mailers.clone(),
            from: self.from.clone(),
            reply_to: self.reply_to.clone(),
        }
    }
}

impl<C> fmt::Debug for MailerConfig<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailerConfig")
            .field("default", &self.default)
            .field("mailers", &self.mailers.keys().collect::<Vec<_>>())
            .field("from", &self.from)
            .field("reply_to", &self.reply_to)
            .finish()
    }
}

impl<C: 'static> From<MailersDefinition> for MailerConfig<C> {
    fn from(definition: MailersDefinition) -> Self {
        let mailers = definition
            .mailers
            .into_iter()
            .map(|(name, config)| (name, ConfigValue::Provider(registry::provider_for(config))))
            .collect();
        Self {
            default: definition.default,
            mailers,
            from: definition.from,
            reply_to: definition.reply_to,
        }
    }
}

/// Serializable mailer definition for the built-in transports.
///
/// ```rust
/// use integrations_mail::config::MailersDefinition;
///
/// let definition: MailersDefinition = serde_json::from_str(r#"{
///     "default": "marketing",
///     "from": {"address": "news@example.com", "name": "News"},
///     "mailers": {
///         "marketing": {"transport": "sparkpost", "key": "abc"},
///         "relay": {"transport": "smtp", "host": "smtp.example.com"}
///     }
/// }"#).unwrap();
/// assert_eq!(definition.mailers.len(), 2);
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct MailersDefinition {
    /// Default mailer name.
    #[serde(default)]
    pub default: Option<String>,
    /// Global sender.
    #[serde(default)]
    pub from: Option<AddressEntry>,
    /// Global reply-to.
    #[serde(default, alias = "replyTo")]
    pub reply_to: Option<AddressEntry>,
    /// Transport configuration per mailer name.
    pub mailers: BTreeMap<String, TransportConfig>,
}

/// Mailer definition with every provider resolved.
#[derive(Clone)]
pub struct ResolvedMailerConfig {
    /// Default mailer name.
    pub default: Option<String>,
    /// Transport factories by name.
    pub mailers: BTreeMap<String, TransportFactory>,
    /// Global sender.
    pub from: Option<AddressEntry>,
    /// Global reply-to.
    pub reply_to: Option<AddressEntry>,
}

impl fmt::Debug for ResolvedMailerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedMailerConfig")
            .field("default", &self.default)
            .field("mailers", &self.mailers.keys().collect::<Vec<_>>())
            .field("from", &self.from)
            .field("reply_to", &self.reply_to)
            .finish()
    }
}

/// Turns a mailer definition into a provider of the resolved definition.
///
/// Plain factories are kept as they are; providers are resolved in name
/// order against the context handed to the returned provider.
pub fn define_config<C: 'static>(config: MailerConfig<C>) -> ConfigProvider<C, ResolvedMailerConfig> {
    ConfigProvider::create(move |ctx: &C| {
        let MailerConfig {
            default,
            mailers,
            from,
            reply_to,
        } = config.clone();

        let pending: Vec<(String, BoxFuture<'static, MailResult<TransportFactory>>)> = mailers
            .into_iter()
            .map(|(name, value)| (name, value.into_resolved(ctx)))
            .collect();

        async move {
            let mut resolved = BTreeMap::new();
            for (name, factory) in pending {
                resolved.insert(name, factory.await?);
            }
            Ok(ResolvedMailerConfig {
                default,
                mailers: resolved,
                from,
                reply_to,
            })
        }
    })
}
