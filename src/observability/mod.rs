//! Send hooks and counters.
//!
//! [`MailEvents`] is the observer the manager calls around every send. It
//! never changes the outcome of a send; [`NoopEvents`] is substitutable
//! for any implementation.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

use crate::errors::MailError;
use crate::types::{MailResponse, Message};

/// Observer invoked by the manager around sends.
///
/// `sending` completes before the transport is called; `sent` or `failed`
/// completes once the outcome is known and before it is returned.
#[async_trait]
pub trait MailEvents: Send + Sync {
    /// Before a message is handed to the mailer.
    async fn sending(&self, _mailer: &str, _message: &Message) {}

    /// After the mailer accepted the message.
    async fn sent(&self, _mailer: &str, _message: &Message, _response: &MailResponse) {}

    /// After the mailer failed.
    async fn failed(&self, _mailer: &str, _message: &Message, _error: &MailError) {}
}

/// Observer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvents;

#[async_trait]
impl MailEvents for NoopEvents {}

/// Observer emitting a structured `tracing` event per hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

#[async_trait]
impl MailEvents for TracingEvents {
    async fn sending(&self, mailer: &str, message: &Message) {
        info!(mailer, subject = %message.subject, "sending email");
    }

    async fn sent(&self, mailer: &str, _message: &Message, response: &MailResponse) {
        info!(
            mailer,
            message_id = %response.message_id,
            recipients = response.envelope.to.len(),
            "email sent"
        );
    }

    async fn failed(&self, mailer: &str, _message: &Message, error: &MailError) {
        warn!(mailer, error = %error, "email failed");
    }
}

/// Manager counters.
#[derive(Debug, Default)]
pub struct MailMetrics {
    sent: AtomicU64,
    failed: AtomicU64,
    instantiated: AtomicU64,
}

impl MailMetrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful send.
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed send.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a transport instantiation.
    pub fn record_instantiated(&self) {
        self.instantiated.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the current values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            instantiated: self.instantiated.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`MailMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Successful sends.
    pub sent: u64,
    /// Failed sends.
    pub failed: u64,
    /// Transports instantiated.
    pub instantiated: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_snapshot() {
        let metrics = MailMetrics::new();
        metrics.record_sent();
        metrics.record_sent();
        metrics.record_failed();
        metrics.record_instantiated();

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                sent: 2,
                failed: 1,
                instantiated: 1
            }
        );
    }

    #[tokio::test]
    async fn test_default_hooks_are_inert() {
        let message = Message::default();
        NoopEvents.sending("primary", &message).await;
        TracingEvents.failed("primary", &message, &MailError::configuration("x")).await;
    }
}
