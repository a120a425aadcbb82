//! Named mailers and the send entry point.
//!
//! Each mailer starts out *configured* (a factory), becomes *active* on
//! first use (one cached instance), and becomes *closed* after
//! [`MailManager::close`]. There is no way back from closed.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use crate::config::{define_config, MailerConfig, ResolvedMailerConfig, SendOptions};
use crate::errors::{MailError, MailResult};
use crate::observability::{MailEvents, MailMetrics, NoopEvents};
use crate::transport::{Transport, TransportFactory};
use crate::types::{AddressEntry, MailResponse, Message};

enum MailerSlot {
    Configured(TransportFactory),
    Active(Arc<dyn Transport>),
    Closed,
}

/// Owns the named mailers and routes sends to them.
pub struct MailManager {
    default: Option<String>,
    slots: BTreeMap<String, Mutex<MailerSlot>>,
    from: Option<AddressEntry>,
    reply_to: Option<AddressEntry>,
    events: Arc<dyn MailEvents>,
    metrics: MailMetrics,
}

impl fmt::Debug for MailManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailManager")
            .field("default", &self.default)
            .field("mailers", &self.mailers())
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}

fn lock(slot: &Mutex<MailerSlot>) -> MutexGuard<'_, MailerSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MailManager {
    /// Creates a manager over resolved mailers, with no-op hooks.
    pub fn new(config: ResolvedMailerConfig) -> Self {
        let slots = config
            .mailers
            .into_iter()
            .map(|(name, factory)| (name, Mutex::new(MailerSlot::Configured(factory))))
            .collect();
        Self {
            default: config.default,
            slots,
            from: config.from,
            reply_to: config.reply_to,
            events: Arc::new(NoopEvents),
            metrics: MailMetrics::new(),
        }
    }

    /// Resolves `config` against `ctx` and builds a manager from it.
    pub async fn bootstrap<C: 'static>(config: MailerConfig<C>, ctx: &C) -> MailResult<Self> {
        let resolved = define_config(config).resolve(ctx).await?;
        Ok(Self::new(resolved))
    }

    /// Replaces the send hooks.
    pub fn with_events(mut self, events: Arc<dyn MailEvents>) -> Self {
        self.events = events;
        self
    }

    /// Name of the default mailer.
    pub fn default_mailer(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// Every configured mailer name, sorted.
    pub fn mailers(&self) -> Vec<&str> {
        self.slots.keys().map(String::as_str).collect()
    }

    /// Returns true if `name` has a live transport instance.
    pub fn is_active(&self, name: &str) -> bool {
        self.slots
            .get(name)
            .map(|slot| matches!(*lock(slot), MailerSlot::Active(_)))
            .unwrap_or(false)
    }

    /// Send counters.
    pub fn metrics(&self) -> &MailMetrics {
        &self.metrics
    }

    fn mailer_name<'a>(&'a self, name: Option<&'a str>) -> MailResult<&'a str> {
        name.or(self.default.as_deref())
            .ok_or_else(|| MailError::configuration("No mailer name given and no default mailer configured"))
    }

    fn slot(&self, name: &str) -> MailResult<&Mutex<MailerSlot>> {
        self.slots.get(name).ok_or_else(|| {
            MailError::configuration(format!("Unknown mailer \"{}\"", name))
        })
    }

    /// Returns the transport for `name`, or for the default mailer.
    ///
    /// The first call for a name builds the transport; later calls return
    /// the same instance.
    pub fn use_mailer(&self, name: Option<&str>) -> MailResult<Arc<dyn Transport>> {
        let name = self.mailer_name(name)?;
        let mut slot = lock(self.slot(name)?);

        let transport = match &*slot {
            MailerSlot::Active(transport) => return Ok(Arc::clone(transport)),
            MailerSlot::Closed => {
                return Err(MailError::configuration(format!(
                    "Mailer \"{}\" has been closed",
                    name
                )))
            }
            MailerSlot::Configured(factory) => factory.create()?,
        };

        info!(mailer = name, transport = %transport.kind(), "mailer instantiated");
        self.metrics.record_instantiated();
        *slot = MailerSlot::Active(Arc::clone(&transport));
        Ok(transport)
    }

    /// Sends `message` through `name` (or the default mailer).
    pub async fn send(&self, message: &Message, name: Option<&str>) -> MailResult<MailResponse> {
        self.send_with(message, name, SendOptions::default()).await
    }

    /// Sends with runtime overrides and provider options.
    ///
    /// Errors from the transport are returned unchanged.
    pub async fn send_with(
        &self,
        message: &Message,
        name: Option<&str>,
        options: SendOptions,
    ) -> MailResult<MailResponse> {
        let name = self.mailer_name(name)?;
        let transport = self.use_mailer(Some(name))?;
        let message = self.apply_defaults(message);

        self.events.sending(name, &message).await;
        match transport.send(&message, options).await {
            Ok(response) => {
                self.metrics.record_sent();
                self.events.sent(name, &message, &response).await;
                Ok(response)
            }
            Err(error) => {
                self.metrics.record_failed();
                warn!(mailer = name, error = %error, "send failed");
                self.events.failed(name, &message, &error).await;
                Err(error)
            }
        }
    }

    fn apply_defaults<'m>(&self, message: &'m Message) -> Cow<'m, Message> {
        let needs_from = message.from.is_none() && self.from.is_some();
        let needs_reply_to = message.reply_to.is_none() && self.reply_to.is_some();
        if !needs_from && !needs_reply_to {
            return Cow::Borrowed(message);
        }

        let mut message = message.clone();
        if needs_from {
            message.from = self.from.clone();
        }
        if needs_reply_to {
            message.reply_to = self.reply_to.clone();
        }
        Cow::Owned(message)
    }

    /// Closes the active transport of `name` (or the default mailer).
    ///
    /// A mailer that was never used is left untouched.
    pub async fn close(&self, name: Option<&str>) -> MailResult<()> {
        let name = self.mailer_name(name)?;
        let transport = {
            let mut slot = lock(self.slot(name)?);
            match std::mem::replace(&mut *slot, MailerSlot::Closed) {
                MailerSlot::Active(transport) => transport,
                other => {
                    *slot = other;
                    return Ok(());
                }
            }
        };

        info!(mailer = name, "closing mailer");
        transport.close().await
    }

    /// Closes every active mailer. The first error is returned after all
    /// mailers were attempted.
    pub async fn close_all(&self) -> MailResult<()> {
        let mut first_error = None;
        for name in self.slots.keys() {
            if let Err(e) = self.close(Some(name)).await {
                warn!(mailer = %name, error = %e, "close failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Builds a manager from `config` using a unit context and no-op hooks.
///
/// ```rust
/// use integrations_mail::config::MailerConfig;
/// use integrations_mail::mocks::{sample_message, MockTransport};
/// use integrations_mail::generate_mailer;
///
/// # tokio_test::block_on(async {
/// let manager = generate_mailer(
///     MailerConfig::new()
///         .default_mailer("primary")
///         .mailer("primary", MockTransport::factory()),
/// )
/// .await
/// .unwrap();
///
/// let response = manager.send(&sample_message(), None).await.unwrap();
/// assert_eq!(response.envelope.from, "sender@example.com");
/// # });
/// ```
pub async fn generate_mailer(config: MailerConfig<()>) -> MailResult<MailManager> {
    MailManager::bootstrap(config, &()).await
}
