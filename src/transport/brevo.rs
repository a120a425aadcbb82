//! Brevo transport.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::HeaderName;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

use super::http::{decode_reply, endpoint, secret_header, with_provider_options, HttpClient};
use super::{Transport, TransportKind};
use crate::config::{BrevoConfig, RuntimeConfig, SendOptions};
use crate::errors::MailResult;
use crate::mime::{strip_angle_brackets, PreparedMessage};
use crate::types::{AddressEntry, MailResponse, Message};

#[derive(Debug, Serialize)]
struct BrevoAddress<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

impl<'a> From<&'a AddressEntry> for BrevoAddress<'a> {
    fn from(entry: &'a AddressEntry) -> Self {
        Self {
            email: &entry.address,
            name: entry.name.as_deref().filter(|n| !n.is_empty()),
        }
    }
}

#[derive(Debug, Serialize)]
struct BrevoAttachment<'a> {
    name: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoEmail<'a> {
    sender: BrevoAddress<'a>,
    to: Vec<BrevoAddress<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cc: Vec<BrevoAddress<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    bcc: Vec<BrevoAddress<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<BrevoAddress<'a>>,
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    html_content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text_content: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachment: Vec<BrevoAttachment<'a>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<&'a str, &'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scheduled_at: Option<String>,
}

/// Brevo HTTP API transport.
#[derive(Debug)]
pub struct BrevoTransport {
    config: BrevoConfig,
    http: HttpClient,
}

impl BrevoTransport {
    /// Creates a transport.
    pub fn new(config: BrevoConfig) -> MailResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            http: HttpClient::new()?,
        })
    }

    /// Creates a transport that uses `http` for requests.
    pub fn with_http_client(config: BrevoConfig, http: HttpClient) -> MailResult<Self> {
        config.validate()?;
        Ok(Self { config, http })
    }

    /// Base configuration.
    pub fn config(&self) -> &BrevoConfig {
        &self.config
    }

    fn effective_config(&self, runtime: Option<&RuntimeConfig>) -> MailResult<BrevoConfig> {
        match runtime {
            None => Ok(self.config.clone()),
            Some(RuntimeConfig::Brevo(overrides)) => Ok(self.config.merged_with(overrides)),
            Some(other) => Err(other.mismatch(TransportKind::Brevo)),
        }
    }

    fn build_email<'a>(
        prepared: &'a PreparedMessage<'a>,
        config: &BrevoConfig,
    ) -> BrevoEmail<'a> {
        let message = prepared.message();
        BrevoEmail {
            sender: prepared.from().into(),
            to: prepared.to().iter().map(BrevoAddress::from).collect(),
            cc: prepared.cc().iter().map(BrevoAddress::from).collect(),
            bcc: prepared.bcc().iter().map(BrevoAddress::from).collect(),
            reply_to: message.reply_to.as_ref().map(BrevoAddress::from),
            subject: &message.subject,
            html_content: message.html.as_deref(),
            text_content: message.text.as_deref(),
            attachment: message
                .attachments
                .iter()
                .map(|a| BrevoAttachment {
                    name: &a.filename,
                    content: BASE64.encode(&a.data),
                })
                .collect(),
            headers: message.headers.iter().collect(),
            tags: config.tags.clone(),
            scheduled_at: config.scheduled_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[async_trait]
impl Transport for BrevoTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Brevo
    }

    async fn send(&self, message: &Message, options: SendOptions) -> MailResult<MailResponse> {
        let config = self.effective_config(options.runtime.as_ref())?;
        let prepared = PreparedMessage::prepare(message)?;

        let url = endpoint(&config.base_url, "/smtp/email");
        let envelope = prepared.envelope();
        debug!(url = %url, "brevo mail url");
        debug!(envelope = ?envelope, "brevo mail envelope");

        let email = with_provider_options(
            TransportKind::Brevo,
            &Self::build_email(&prepared, &config),
            options.provider_options,
        )?;
        let api_key = secret_header(TransportKind::Brevo, config.key.expose_secret())?;
        let body = self
            .http
            .post_json(
                TransportKind::Brevo,
                &url,
                &[(HeaderName::from_static("api-key"), api_key)],
                &email,
            )
            .await?;

        let body: Map<String, Value> = decode_reply(TransportKind::Brevo, body)?;
        let message_id = body
            .get("messageId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(|id| strip_angle_brackets(id).to_string())
            .unwrap_or_else(|| prepared.message_id().to_string());

        Ok(MailResponse::new(message_id, envelope, Value::Object(body)))
    }
}
