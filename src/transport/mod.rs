//! Transport contract and the built-in transports.
//!
//! Every delivery backend implements [`Transport`]: it takes a [`Message`]
//! plus per-send [`SendOptions`], performs the network call, and returns a
//! normalized [`MailResponse`]. Every failure comes back through the same
//! `Err` channel as a [`MailError`](crate::errors::MailError).

mod brevo;
mod http;
pub mod registry;
mod resend;
pub mod smtp;
mod sparkpost;

pub use brevo::BrevoTransport;
pub use http::HttpClient;
pub use registry::{transports, TransportRegistry};
pub use resend::ResendTransport;
pub use smtp::SmtpTransport;
pub use sparkpost::SparkPostTransport;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::config::SendOptions;
use crate::errors::MailResult;
use crate::provider::ConfigValue;
use crate::types::{MailResponse, Message};

/// Transport kind identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// SMTP relay.
    Smtp,
    /// SparkPost HTTP API.
    SparkPost,
    /// Resend HTTP API.
    Resend,
    /// Brevo HTTP API.
    Brevo,
    /// A transport registered by the application.
    Custom(&'static str),
}

impl TransportKind {
    /// Registry identifier of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Smtp => "smtp",
            TransportKind::SparkPost => "sparkpost",
            TransportKind::Resend => "resend",
            TransportKind::Brevo => "brevo",
            TransportKind::Custom(name) => *name,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A delivery backend.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Kind of this transport.
    fn kind(&self) -> TransportKind;

    /// Sends `message`. Runtime overrides in `options` apply to this call
    /// only and never change the stored base configuration.
    async fn send(&self, message: &Message, options: SendOptions) -> MailResult<MailResponse>;

    /// Releases held resources such as pooled connections.
    async fn close(&self) -> MailResult<()> {
        Ok(())
    }
}

type FactoryFn = dyn Fn() -> MailResult<Arc<dyn Transport>> + Send + Sync;

/// Produces transport instances for a mailer.
#[derive(Clone)]
pub struct TransportFactory(Arc<FactoryFn>);

impl TransportFactory {
    /// Wraps a constructor.
    pub fn new<F, T>(constructor: F) -> Self
    where
        F: Fn() -> MailResult<T> + Send + Sync + 'static,
        T: Transport + 'static,
    {
        Self(Arc::new(move || {
            constructor().map(|transport| Arc::new(transport) as Arc<dyn Transport>)
        }))
    }

    /// Factory handing out the same pre-built instance.
    pub fn shared(transport: Arc<dyn Transport>) -> Self {
        Self(Arc::new(move || Ok(Arc::clone(&transport))))
    }

    /// Builds a transport instance.
    pub fn create(&self) -> MailResult<Arc<dyn Transport>> {
        (self.0)()
    }
}

impl fmt::Debug for TransportFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportFactory").finish_non_exhaustive()
    }
}

impl<C> From<TransportFactory> for ConfigValue<C, TransportFactory> {
    fn from(factory: TransportFactory) -> Self {
        ConfigValue::Value(factory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockTransport;

    #[test]
    fn test_kind_display() {
        assert_eq!(TransportKind::Smtp.to_string(), "smtp");
        assert_eq!(TransportKind::SparkPost.to_string(), "sparkpost");
        assert_eq!(TransportKind::Resend.to_string(), "resend");
        assert_eq!(TransportKind::Brevo.to_string(), "brevo");
        assert_eq!(TransportKind::Custom("memory").to_string(), "memory");
    }

    #[test]
    fn test_factory_builds_new_instances() {
        let factory = MockTransport::factory();
        let a = factory.create().unwrap();
        let b = factory.create().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_shared_factory_reuses_instance() {
        let transport: Arc<dyn Transport> = Arc::new(MockTransport::new());
        let factory = TransportFactory::shared(Arc::clone(&transport));
        assert!(Arc::ptr_eq(&factory.create().unwrap(), &transport));
    }
}
