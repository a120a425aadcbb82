//! SparkPost transport.
//!
//! Posts the full MIME document to the `/transmissions` endpoint as
//! `content.email_rfc822`, with the recipient list flattened To, Cc, Bcc.

use async_trait::async_trait;
use reqwest::header::{HeaderName, AUTHORIZATION};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::http::{decode_reply, endpoint, secret_header, with_provider_options, HttpClient};
use super::{Transport, TransportKind};
use crate::config::{RuntimeConfig, SendOptions, SparkPostConfig};
use crate::errors::{MailError, MailResult};
use crate::mime::{strip_angle_brackets, PreparedMessage};
use crate::types::{AddressEntry, MailResponse, Message};

/// Transmission options; unset fields are left out of the request body.
#[derive(Debug, Default, Serialize)]
struct TransmissionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    initial_open: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    open_tracking: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    click_tracking: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transactional: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sandbox: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skip_suppression: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip_pool: Option<String>,
}

impl From<&SparkPostConfig> for TransmissionOptions {
    fn from(config: &SparkPostConfig) -> Self {
        Self {
            start_time: config.start_time.map(|t| t.to_rfc3339()),
            initial_open: config.initial_open,
            open_tracking: config.open_tracking,
            click_tracking: config.click_tracking,
            transactional: config.transactional,
            sandbox: config.sandbox,
            skip_suppression: config.skip_suppression,
            ip_pool: config.ip_pool.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SparkPostAddress<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SparkPostRecipient<'a> {
    address: SparkPostAddress<'a>,
}

impl<'a> From<&'a AddressEntry> for SparkPostRecipient<'a> {
    fn from(entry: &'a AddressEntry) -> Self {
        Self {
            address: SparkPostAddress {
                email: &entry.address,
                name: entry.name.as_deref(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct Content {
    email_rfc822: String,
}

#[derive(Debug, Serialize)]
struct Transmission<'a> {
    options: TransmissionOptions,
    recipients: Vec<SparkPostRecipient<'a>>,
    content: Content,
}

#[derive(Debug, Deserialize)]
struct TransmissionReply {
    results: Map<String, Value>,
}

/// SparkPost HTTP API transport.
#[derive(Debug)]
pub struct SparkPostTransport {
    config: SparkPostConfig,
    http: HttpClient,
}

impl SparkPostTransport {
    /// Creates a transport.
    pub fn new(config: SparkPostConfig) -> MailResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            http: HttpClient::new()?,
        })
    }

    /// Creates a transport that uses `http` for requests.
    pub fn with_http_client(config: SparkPostConfig, http: HttpClient) -> MailResult<Self> {
        config.validate()?;
        Ok(Self { config, http })
    }

    /// Base configuration.
    pub fn config(&self) -> &SparkPostConfig {
        &self.config
    }

    fn effective_config(&self, runtime: Option<&RuntimeConfig>) -> MailResult<SparkPostConfig> {
        match runtime {
            None => Ok(self.config.clone()),
            Some(RuntimeConfig::SparkPost(overrides)) => Ok(self.config.merged_with(overrides)),
            Some(other) => Err(other.mismatch(TransportKind::SparkPost)),
        }
    }
}

#[async_trait]
impl Transport for SparkPostTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::SparkPost
    }

    async fn send(&self, message: &Message, options: SendOptions) -> MailResult<MailResponse> {
        let config = self.effective_config(options.runtime.as_ref())?;
        let prepared = PreparedMessage::prepare(message)?;

        let url = endpoint(&config.base_url, "/transmissions");
        let transmission_options = TransmissionOptions::from(&config);
        let envelope = prepared.envelope();
        let recipients: Vec<SparkPostRecipient<'_>> =
            prepared.recipients().map(SparkPostRecipient::from).collect();

        debug!(url = %url, "sparkpost mail url");
        debug!(options = ?transmission_options, "sparkpost mail options");
        debug!(envelope = ?envelope, "sparkpost mail envelope");
        debug!(recipients = ?recipients, "sparkpost mail recipients");

        let mime = String::from_utf8(prepared.to_mime()?)
            .map_err(|e| MailError::serialization(format!("MIME document is not UTF-8: {}", e)))?;
        let payload = Transmission {
            options: transmission_options,
            recipients,
            content: Content { email_rfc822: mime },
        };
        let payload =
            with_provider_options(TransportKind::SparkPost, &payload, options.provider_options)?;

        let headers: [(HeaderName, _); 1] = [(
            AUTHORIZATION,
            secret_header(TransportKind::SparkPost, config.key.expose_secret())?,
        )];
        let body = self
            .http
            .post_json(TransportKind::SparkPost, &url, &headers, &payload)
            .await?;

        let reply: TransmissionReply = decode_reply(TransportKind::SparkPost, body)?;
        let results = reply.results;
        let message_id = results
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(|id| strip_angle_brackets(id).to_string())
            .unwrap_or_else(|| prepared.message_id().to_string());

        Ok(MailResponse::new(message_id, envelope, Value::Object(results)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResendRuntimeConfig, SparkPostRuntimeConfig};
    use crate::mocks::sample_message;

    #[test]
    fn test_options_omit_unset_fields() {
        let mut config = SparkPostConfig::new("key");
        config.open_tracking = Some(false);
        config.ip_pool = Some("transactional".to_string());

        let options = serde_json::to_value(TransmissionOptions::from(&config)).unwrap();
        assert_eq!(
            options,
            serde_json::json!({"open_tracking": false, "ip_pool": "transactional"})
        );
    }

    #[test]
    fn test_recipient_shape() {
        let named = AddressEntry::with_name("a@x.com", "A");
        let bare = AddressEntry::new("b@x.com");
        let value = serde_json::to_value(vec![
            SparkPostRecipient::from(&named),
            SparkPostRecipient::from(&bare),
        ])
        .unwrap();

        assert_eq!(
            value,
            serde_json::json!([
                {"address": {"email": "a@x.com", "name": "A"}},
                {"address": {"email": "b@x.com"}}
            ])
        );
    }

    #[test]
    fn test_runtime_override_of_other_kind_is_rejected() {
        let transport = SparkPostTransport::new(SparkPostConfig::new("key")).unwrap();
        let err = transport
            .effective_config(Some(&RuntimeConfig::Resend(ResendRuntimeConfig::default())))
            .unwrap_err();
        assert!(err.is_configuration());

        let merged = transport
            .effective_config(Some(&RuntimeConfig::SparkPost(SparkPostRuntimeConfig {
                sandbox: Some(true),
                ..Default::default()
            })))
            .unwrap();
        assert_eq!(merged.sandbox, Some(true));
        assert_eq!(transport.config().sandbox, None);
    }

    #[tokio::test]
    async fn test_missing_sender_fails_before_io() {
        let transport = SparkPostTransport::new(
            SparkPostConfig::new("key").with_base_url("http://127.0.0.1:9"),
        )
        .unwrap();
        let mut message = sample_message();
        message.from = None;

        let err = transport.send(&message, SendOptions::new()).await.unwrap_err();
        assert!(err.is_serialization());
    }
}
