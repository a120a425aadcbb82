//! Test doubles.
//!
//! [`MockTransport`] records what it is asked to send and can be told to
//! fail. Clones share their recordings, so a test can keep one handle and
//! give another to a manager.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::config::SendOptions;
use crate::errors::{MailError, MailResult};
use crate::mime::PreparedMessage;
use crate::transport::{Transport, TransportFactory, TransportKind};
use crate::types::{MailResponse, Message};

/// Kind reported by [`MockTransport`].
pub const MOCK_KIND: TransportKind = TransportKind::Custom("mock");

/// Cause attached to failures produced by [`MockTransport`].
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct MockFailure(pub String);

/// One recorded send.
#[derive(Debug, Clone)]
pub struct SentMail {
    /// Message as received.
    pub message: Message,
    /// Options as received.
    pub options: SendOptions,
}

#[derive(Debug, Default)]
struct MockState {
    sent: Mutex<Vec<SentMail>>,
    failure: Mutex<Option<String>>,
    closed: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory transport.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    /// Creates a transport that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport whose sends fail with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        let transport = Self::new();
        transport.set_failure(Some(reason.into()));
        transport
    }

    /// Makes subsequent sends fail with `reason`, or succeed with `None`.
    pub fn set_failure(&self, reason: Option<String>) {
        *lock(&self.state.failure) = reason;
    }

    /// Recorded sends, oldest first.
    pub fn sent(&self) -> Vec<SentMail> {
        lock(&self.state.sent).clone()
    }

    /// Number of recorded sends.
    pub fn sent_count(&self) -> usize {
        lock(&self.state.sent).len()
    }

    /// Number of `close` calls.
    pub fn close_count(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Factory building a fresh transport on every call.
    pub fn factory() -> TransportFactory {
        TransportFactory::new(|| Ok(MockTransport::new()))
    }

    /// Factory always handing out a clone of `self`.
    pub fn shared_factory(&self) -> TransportFactory {
        TransportFactory::shared(Arc::new(self.clone()))
    }

    /// Factory that counts how often it builds.
    pub fn counting_factory() -> (TransportFactory, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let factory = TransportFactory::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(MockTransport::new())
        });
        (factory, count)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        MOCK_KIND
    }

    async fn send(&self, message: &Message, options: SendOptions) -> MailResult<MailResponse> {
        let position = {
            let mut sent = lock(&self.state.sent);
            sent.push(SentMail {
                message: message.clone(),
                options,
            });
            sent.len()
        };

        if let Some(reason) = lock(&self.state.failure).clone() {
            return Err(MailError::send_failed(MOCK_KIND, MockFailure(reason)));
        }

        let prepared = PreparedMessage::prepare(message)?;
        Ok(MailResponse::new(
            prepared.message_id(),
            prepared.envelope(),
            json!({ "position": position }),
        ))
    }

    async fn close(&self) -> MailResult<()> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A valid message with one recipient per role.
pub fn sample_message() -> Message {
    let mut message = Message::new();
    message
        .from("sender@example.com")
        .to("t1@example.com")
        .cc("c1@example.com")
        .bcc("b1@example.com")
        .subject("Hello")
        .text("Hello from the test suite");
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_responds() {
        let transport = MockTransport::new();
        let response = transport
            .send(&sample_message(), SendOptions::new().provider_option("k", "v"))
            .await
            .unwrap();

        assert_eq!(
            response.envelope.to,
            vec!["t1@example.com", "c1@example.com", "b1@example.com"]
        );
        assert_eq!(response.raw["position"], 1);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message.subject, "Hello");
        assert_eq!(sent[0].options.provider_options["k"], "v");
    }

    #[tokio::test]
    async fn test_failing_transport() {
        let transport = MockTransport::failing("relay down");
        let err = transport.send(&sample_message(), SendOptions::new()).await.unwrap_err();

        assert!(err.is_transport());
        assert_eq!(err.transport_kind(), Some(MOCK_KIND));
        assert_eq!(err.cause().unwrap().to_string(), "relay down");
        assert_eq!(transport.sent_count(), 1);
    }

    #[test]
    fn test_counting_factory() {
        let (factory, count) = MockTransport::counting_factory();
        factory.create().unwrap();
        factory.create().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
