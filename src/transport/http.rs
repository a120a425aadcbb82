//! HTTP plumbing shared by the provider transports.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use crate::errors::{MailError, MailResult, ProviderError};
use crate::transport::TransportKind;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON-over-HTTP client used by the provider transports.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a client with the default timeouts.
    pub fn new() -> MailResult<Self> {
        Self::with_timeouts(DEFAULT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Creates a client with custom timeouts.
    pub fn with_timeouts(timeout: Duration, connect_timeout: Duration) -> MailResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()
            .map_err(|e| {
                MailError::configuration(format!("Failed to create HTTP client: {}", e))
            })?;
        Ok(Self { client })
    }

    /// Wraps an existing reqwest client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// POSTs `body` as JSON and decodes the JSON reply.
    ///
    /// Network failures, non-2xx replies and undecodable bodies all become a
    /// transport error for `kind`.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        kind: TransportKind,
        url: &str,
        headers: &[(HeaderName, HeaderValue)],
        body: &B,
    ) -> MailResult<Value> {
        let mut header_map = HeaderMap::new();
        header_map.insert(ACCEPT, HeaderValue::from_static("application/json"));
        header_map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in headers {
            header_map.insert(name.clone(), value.clone());
        }

        let response = self
            .client
            .post(url)
            .headers(header_map)
            .json(body)
            .send()
            .await
            .map_err(|e| MailError::send_failed(kind, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| MailError::send_failed(kind, e))?;
        debug!(transport = %kind, status = status.as_u16(), "provider responded");

        if !status.is_success() {
            return Err(MailError::send_failed(
                kind,
                ProviderError::new(status.as_u16(), text),
            ));
        }

        serde_json::from_str(&text).map_err(|e| MailError::send_failed(kind, e))
    }
}

/// Header value from a secret, rejecting values with control characters.
pub(crate) fn secret_header(kind: TransportKind, value: &str) -> MailResult<HeaderValue> {
    let mut header = HeaderValue::from_str(value).map_err(|_| {
        MailError::configuration(format!("{} API key is not a valid header value", kind))
    })?;
    header.set_sensitive(true);
    Ok(header)
}

/// Decodes a 2xx reply into the shape the provider documents. A body of any
/// other shape is a transport error, never a partial success.
pub(crate) fn decode_reply<T: DeserializeOwned>(kind: TransportKind, body: Value) -> MailResult<T> {
    serde_json::from_value(body).map_err(|e| MailError::send_failed(kind, e))
}

/// Serializes `payload` and adds the caller's provider options as extra
/// top-level keys. A key the payload already sets is rejected.
pub(crate) fn with_provider_options<P: Serialize>(
    kind: TransportKind,
    payload: &P,
    provider_options: Map<String, Value>,
) -> MailResult<Value> {
    let mut body = match serde_json::to_value(payload) {
        Ok(Value::Object(body)) => body,
        Ok(_) => {
            return Err(MailError::serialization(format!(
                "{} payload is not a JSON object",
                kind
            )))
        }
        Err(e) => return Err(MailError::serialization(e.to_string())),
    };

    for (key, value) in provider_options {
        if body.contains_key(&key) {
            return Err(MailError::configuration(format!(
                "Provider option {:?} collides with a {} request field",
                key, kind
            )));
        }
        body.insert(key, value);
    }
    Ok(Value::Object(body))
}

/// Joins `base_url` without its trailing slash and `path`.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}
