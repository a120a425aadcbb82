//! Tests for the mail manager.

use async_trait::async_trait;
use integrations_mail::config::{MailerConfig, SendOptions, SparkPostRuntimeConfig};
use integrations_mail::errors::MailError;
use integrations_mail::mocks::{sample_message, MockFailure, MockTransport, MOCK_KIND};
use integrations_mail::{
    define_config, generate_mailer, ConfigProvider, MailEvents, MailManager, MailResponse,
    Message, TransportFactory,
};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RecordingEvents {
    calls: Mutex<Vec<String>>,
}

impl RecordingEvents {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailEvents for RecordingEvents {
    async fn sending(&self, mailer: &str, message: &Message) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("sending:{}:{}", mailer, message.subject));
    }

    async fn sent(&self, mailer: &str, _message: &Message, response: &MailResponse) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("sent:{}:{}", mailer, response.envelope.to.len()));
    }

    async fn failed(&self, mailer: &str, _message: &Message, error: &MailError) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("failed:{}:{}", mailer, error.is_transport()));
    }
}

async fn manager_with(primary: &MockTransport) -> MailManager {
    generate_mailer(
        MailerConfig::new()
            .default_mailer("primary")
            .mailer("primary", primary.shared_factory())
            .mailer("backup", MockTransport::factory()),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_use_returns_cached_instance() {
    let manager = manager_with(&MockTransport::new()).await;

    let first = manager.use_mailer(Some("backup")).unwrap();
    let second = manager.use_mailer(Some("backup")).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.kind(), MOCK_KIND);
}

#[tokio::test]
async fn test_unknown_mailer_is_configuration_error() {
    let primary = MockTransport::new();
    let manager = manager_with(&primary).await;

    let err = manager.send(&sample_message(), Some("doesNotExist")).await.unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(primary.sent_count(), 0);
}

#[tokio::test]
async fn test_send_uses_default_and_forwards_options() {
    let primary = MockTransport::new();
    let manager = manager_with(&primary).await;

    let options = SendOptions::new()
        .runtime(SparkPostRuntimeConfig::default())
        .provider_option("campaign_id", "welcome");
    let response = manager
        .send_with(&sample_message(), None, options)
        .await
        .unwrap();

    assert_eq!(response.envelope.to.len(), 3);
    let sent = primary.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].options.runtime.is_some());
    assert_eq!(sent[0].options.provider_options["campaign_id"], "welcome");
    assert_eq!(manager.metrics().snapshot().sent, 1);
}

#[tokio::test]
async fn test_transport_failure_propagates_unchanged() {
    let primary = MockTransport::failing("connection refused");
    let manager = manager_with(&primary).await;

    let err = manager.send(&sample_message(), Some("primary")).await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(err.transport_kind(), Some(MOCK_KIND));
    let cause = err.cause().unwrap().downcast_ref::<MockFailure>().unwrap();
    assert_eq!(cause.0, "connection refused");
    assert_eq!(manager.metrics().snapshot().failed, 1);
}

#[tokio::test]
async fn test_hooks_wrap_send_in_order() {
    let events = Arc::new(RecordingEvents::default());
    let primary = MockTransport::new();
    let manager = manager_with(&primary).await.with_events(events.clone());

    manager.send(&sample_message(), None).await.unwrap();
    primary.set_failure(Some("down".to_string()));
    manager.send(&sample_message(), None).await.unwrap_err();

    assert_eq!(
        events.calls(),
        vec![
            "sending:primary:Hello",
            "sent:primary:3",
            "sending:primary:Hello",
            "failed:primary:true",
        ]
    );
}

#[tokio::test]
async fn test_close_forwards_to_active_transports_only() {
    let primary = MockTransport::new();
    let manager = manager_with(&primary).await;

    manager.close_all().await.unwrap();
    assert_eq!(primary.close_count(), 0);

    manager.send(&sample_message(), None).await.unwrap();
    manager.close(None).await.unwrap();
    assert_eq!(primary.close_count(), 1);

    let err = manager.send(&sample_message(), None).await.unwrap_err();
    assert!(err.is_configuration());

    manager.close(None).await.unwrap();
    assert_eq!(primary.close_count(), 1);
}

#[tokio::test]
async fn test_providers_resolve_against_context() {
    struct AppContext {
        region: String,
    }

    let seen = Arc::new(Mutex::new(None));
    let recorder = Arc::clone(&seen);
    let deferred = ConfigProvider::create(move |ctx: &AppContext| {
        *recorder.lock().unwrap() = Some(ctx.region.clone());
        async { Ok::<_, MailError>(MockTransport::factory()) }
    });

    let config = MailerConfig::<AppContext>::new()
        .default_mailer("regional")
        .mailer("regional", deferred);
    let ctx = AppContext {
        region: "eu-west-1".to_string(),
    };

    let resolved = define_config(config).resolve(&ctx).await.unwrap();
    assert_eq!(seen.lock().unwrap().as_deref(), Some("eu-west-1"));

    let factory: &TransportFactory = &resolved.mailers["regional"];
    assert!(factory.create().is_ok());

    let manager = MailManager::new(resolved);
    assert_eq!(manager.default_mailer(), Some("regional"));
    manager.send(&sample_message(), None).await.unwrap();
}
