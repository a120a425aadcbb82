//! Resend transport.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::AUTHORIZATION;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

use super::http::{decode_reply, endpoint, secret_header, with_provider_options, HttpClient};
use super::{Transport, TransportKind};
use crate::config::{ResendConfig, ResendTag, RuntimeConfig, SendOptions};
use crate::errors::MailResult;
use crate::mime::{strip_angle_brackets, PreparedMessage};
use crate::types::{AddressEntry, MailResponse, Message};

#[derive(Debug, Serialize)]
struct ResendAttachment<'a> {
    filename: &'a str,
    content: String,
    content_type: &'a str,
}

#[derive(Debug, Serialize)]
struct ResendEmail<'a> {
    from: String,
    to: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cc: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    bcc: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<String>,
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<&'a str, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<ResendAttachment<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<ResendTag>>,
}

fn header_list(entries: &[AddressEntry]) -> Vec<String> {
    entries.iter().map(AddressEntry::to_header).collect()
}

/// Resend HTTP API transport.
#[derive(Debug)]
pub struct ResendTransport {
    config: ResendConfig,
    http: HttpClient,
}

impl ResendTransport {
    /// Creates a transport.
    pub fn new(config: ResendConfig) -> MailResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            http: HttpClient::new()?,
        })
    }

    /// Creates a transport that uses `http` for requests.
    pub fn with_http_client(config: ResendConfig, http: HttpClient) -> MailResult<Self> {
        config.validate()?;
        Ok(Self { config, http })
    }

    /// Base configuration.
    pub fn config(&self) -> &ResendConfig {
        &self.config
    }

    fn effective_config(&self, runtime: Option<&RuntimeConfig>) -> MailResult<ResendConfig> {
        match runtime {
            None => Ok(self.config.clone()),
            Some(RuntimeConfig::Resend(overrides)) => Ok(self.config.merged_with(overrides)),
            Some(other) => Err(other.mismatch(TransportKind::Resend)),
        }
    }

    fn build_email<'a>(
        prepared: &'a PreparedMessage<'a>,
        config: &ResendConfig,
    ) -> ResendEmail<'a> {
        let message = prepared.message();
        let mut headers: BTreeMap<&str, String> = message
            .headers
            .iter()
            .map(|(name, value)| (name, value.to_string()))
            .collect();
        if let Some(in_reply_to) = &message.in_reply_to {
            headers.insert("In-Reply-To", format!("<{}>", strip_angle_brackets(in_reply_to)));
        }
        if !message.references.is_empty() {
            let refs: Vec<String> = message
                .references
                .iter()
                .map(|r| format!("<{}>", strip_angle_brackets(r)))
                .collect();
            headers.insert("References", refs.join(" "));
        }

        ResendEmail {
            from: prepared.from().to_header(),
            to: header_list(prepared.to()),
            cc: header_list(prepared.cc()),
            bcc: header_list(prepared.bcc()),
            reply_to: message.reply_to.as_ref().map(AddressEntry::to_header),
            subject: &message.subject,
            html: message.html.as_deref(),
            text: message.text.as_deref(),
            headers,
            attachments: message
                .attachments
                .iter()
                .map(|a| ResendAttachment {
                    filename: &a.filename,
                    content: BASE64.encode(&a.data),
                    content_type: &a.content_type,
                })
                .collect(),
            tags: config.tags.clone(),
        }
    }
}

#[async_trait]
impl Transport for ResendTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Resend
    }

    async fn send(&self, message: &Message, options: SendOptions) -> MailResult<MailResponse> {
        let config = self.effective_config(options.runtime.as_ref())?;
        let prepared = PreparedMessage::prepare(message)?;

        let url = endpoint(&config.base_url, "/emails");
        let envelope = prepared.envelope();
        debug!(url = %url, "resend mail url");
        debug!(envelope = ?envelope, "resend mail envelope");

        let email = with_provider_options(
            TransportKind::Resend,
            &Self::build_email(&prepared, &config),
            options.provider_options,
        )?;
        let authorization = secret_header(
            TransportKind::Resend,
            &format!("Bearer {}", config.key.expose_secret()),
        )?;
        let body = self
            .http
            .post_json(TransportKind::Resend, &url, &[(AUTHORIZATION, authorization)], &email)
            .await?;

        let body: Map<String, Value> = decode_reply(TransportKind::Resend, body)?;
        let message_id = body
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(|id| strip_angle_brackets(id).to_string())
            .unwrap_or_else(|| prepared.message_id().to_string());

        Ok(MailResponse::new(message_id, envelope, Value::Object(body)))
    }
}
