//! HTTP provider configuration.
//!
//! Each provider has a base config supplied at construction and a runtime
//! config whose set fields replace the base fields for one send.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::{MailError, MailResult};

/// Default SparkPost API base URL.
pub const SPARKPOST_BASE_URL: &str = "https://api.sparkpost.com/api/v1";

/// Default Resend API base URL.
pub const RESEND_BASE_URL: &str = "https://api.resend.com";

/// Default Brevo API base URL.
pub const BREVO_BASE_URL: &str = "https://api.brevo.com/v3";

fn env_key(name: &str) -> MailResult<SecretString> {
    std::env::var(name)
        .map(SecretString::new)
        .map_err(|_| MailError::configuration(format!("{} environment variable not set", name)))
}

fn env_base_url(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn require_key(provider: &str, key: &SecretString) -> MailResult<()> {
    use secrecy::ExposeSecret;
    if key.expose_secret().is_empty() {
        return Err(MailError::configuration(format!("{} API key is required", provider)));
    }
    Ok(())
}

fn require_base_url(provider: &str, base_url: &str) -> MailResult<()> {
    let url = url::Url::parse(base_url).map_err(|e| {
        MailError::configuration(format!("{} base URL {:?} is invalid: {}", provider, base_url, e))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(MailError::configuration(format!(
            "{} base URL must use http or https",
            provider
        )));
    }
    Ok(())
}

fn default_sparkpost_base_url() -> String {
    SPARKPOST_BASE_URL.to_string()
}

fn default_resend_base_url() -> String {
    RESEND_BASE_URL.to_string()
}

fn default_brevo_base_url() -> String {
    BREVO_BASE_URL.to_string()
}

/// SparkPost configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SparkPostConfig {
    /// API key, sent verbatim as the `Authorization` header.
    pub key: SecretString,
    /// API base URL.
    #[serde(default = "default_sparkpost_base_url", alias = "baseUrl")]
    pub base_url: String,
    /// Scheduled delivery time.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// Track opens with a pixel at the top of the body.
    #[serde(default)]
    pub initial_open: Option<bool>,
    /// Enable open tracking.
    #[serde(default)]
    pub open_tracking: Option<bool>,
    /// Enable click tracking.
    #[serde(default)]
    pub click_tracking: Option<bool>,
    /// Mark as transactional.
    #[serde(default)]
    pub transactional: Option<bool>,
    /// Use the sandbox sending domain.
    #[serde(default)]
    pub sandbox: Option<bool>,
    /// Ignore the suppression list.
    #[serde(default)]
    pub skip_suppression: Option<bool>,
    /// Dedicated IP pool.
    #[serde(default)]
    pub ip_pool: Option<String>,
}

impl SparkPostConfig {
    /// Creates a config with the default base URL.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: SecretString::new(key.into()),
            base_url: default_sparkpost_base_url(),
            start_time: None,
            initial_open: None,
            open_tracking: None,
            click_tracking: None,
            transactional: None,
            sandbox: None,
            skip_suppression: None,
            ip_pool: None,
        }
    }

    /// Reads `SPARKPOST_API_KEY` and optionally `SPARKPOST_BASE_URL`.
    pub fn from_env() -> MailResult<Self> {
        let mut config = Self::new(String::new());
        config.key = env_key("SPARKPOST_API_KEY")?;
        config.base_url = env_base_url("SPARKPOST_BASE_URL", SPARKPOST_BASE_URL);
        Ok(config)
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> MailResult<()> {
        require_key("SparkPost", &self.key)?;
        require_base_url("SparkPost", &self.base_url)
    }

    /// Returns a copy with every `Some` field of `runtime` applied.
    pub fn merged_with(&self, runtime: &SparkPostRuntimeConfig) -> Self {
        let mut merged = self.clone();
        if let Some(key) = &runtime.key {
            merged.key = key.clone();
        }
        if let Some(base_url) = &runtime.base_url {
            merged.base_url = base_url.clone();
        }
        merged.start_time = runtime.start_time.or(merged.start_time);
        merged.initial_open = runtime.initial_open.or(merged.initial_open);
        merged.open_tracking = runtime.open_tracking.or(merged.open_tracking);
        merged.click_tracking = runtime.click_tracking.or(merged.click_tracking);
        merged.transactional = runtime.transactional.or(merged.transactional);
        merged.sandbox = runtime.sandbox.or(merged.sandbox);
        merged.skip_suppression = runtime.skip_suppression.or(merged.skip_suppression);
        if let Some(ip_pool) = &runtime.ip_pool {
            merged.ip_pool = Some(ip_pool.clone());
        }
        merged
    }
}

/// Per-send SparkPost overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SparkPostRuntimeConfig {
    /// API key override.
    #[serde(default)]
    pub key: Option<SecretString>,
    /// Base URL override.
    #[serde(default, alias = "baseUrl")]
    pub base_url: Option<String>,
    /// Scheduled delivery time.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// Initial open tracking.
    #[serde(default)]
    pub initial_open: Option<bool>,
    /// Open tracking.
    #[serde(default)]
    pub open_tracking: Option<bool>,
    /// Click tracking.
    #[serde(default)]
    pub click_tracking: Option<bool>,
    /// Transactional flag.
    #[serde(default)]
    pub transactional: Option<bool>,
    /// Sandbox flag.
    #[serde(default)]
    pub sandbox: Option<bool>,
    /// Skip suppression flag.
    #[serde(default)]
    pub skip_suppression: Option<bool>,
    /// IP pool.
    #[serde(default)]
    pub ip_pool: Option<String>,
}

/// Tag attached to a Resend email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResendTag {
    /// Tag name.
    pub name: String,
    /// Tag value.
    pub value: String,
}

impl ResendTag {
    /// Creates a tag.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Resend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ResendConfig {
    /// API key, sent as a bearer token.
    pub key: SecretString,
    /// API base URL.
    #[serde(default = "default_resend_base_url", alias = "baseUrl")]
    pub base_url: String,
    /// Tags attached to every email.
    #[serde(default)]
    pub tags: Option<Vec<ResendTag>>,
}

impl ResendConfig {
    /// Creates a config with the default base URL.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: SecretString::new(key.into()),
            base_url: default_resend_base_url(),
            tags: None,
        }
    }

    /// Reads `RESEND_API_KEY` and optionally `RESEND_BASE_URL`.
    pub fn from_env() -> MailResult<Self> {
        Ok(Self {
            key: env_key("RESEND_API_KEY")?,
            base_url: env_base_url("RESEND_BASE_URL", RESEND_BASE_URL),
            tags: None,
        })
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> MailResult<()> {
        require_key("Resend", &self.key)?;
        require_base_url("Resend", &self.base_url)
    }

    /// Returns a copy with every `Some` field of `runtime` applied. Tags are
    /// replaced whole.
    pub fn merged_with(&self, runtime: &ResendRuntimeConfig) -> Self {
        let mut merged = self.clone();
        if let Some(key) = &runtime.key {
            merged.key = key.clone();
        }
        if let Some(base_url) = &runtime.base_url {
            merged.base_url = base_url.clone();
        }
        if let Some(tags) = &runtime.tags {
            merged.tags = Some(tags.clone());
        }
        merged
    }
}

/// Per-send Resend overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResendRuntimeConfig {
    /// API key override.
    #[serde(default)]
    pub key: Option<SecretString>,
    /// Base URL override.
    #[serde(default, alias = "baseUrl")]
    pub base_url: Option<String>,
    /// Tags override.
    #[serde(default)]
    pub tags: Option<Vec<ResendTag>>,
}

/// Brevo configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BrevoConfig {
    /// API key, sent in the `api-key` header.
    pub key: SecretString,
    /// API base URL.
    #[serde(default = "default_brevo_base_url", alias = "baseUrl")]
    pub base_url: String,
    /// Tags attached to every email.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Scheduled delivery time.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl BrevoConfig {
    /// Creates a config with the default base URL.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: SecretString::new(key.into()),
            base_url: default_brevo_base_url(),
            tags: None,
            scheduled_at: None,
        }
    }

    /// Reads `BREVO_API_KEY` and optionally `BREVO_BASE_URL`.
    pub fn from_env() -> MailResult<Self> {
        Ok(Self {
            key: env_key("BREVO_API_KEY")?,
            base_url: env_base_url("BREVO_BASE_URL", BREVO_BASE_URL),
            tags: None,
            scheduled_at: None,
        })
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> MailResult<()> {
        require_key("Brevo", &self.key)?;
        require_base_url("Brevo", &self.base_url)
    }

    /// Returns a copy with every `Some` field of `runtime` applied.
    pub fn merged_with(&self, runtime: &BrevoRuntimeConfig) -> Self {
        let mut merged = self.clone();
        if let Some(key) = &runtime.key {
            merged.key = key.clone();
        }
        if let Some(base_url) = &runtime.base_url {
            merged.base_url = base_url.clone();
        }
        if let Some(tags) = &runtime.tags {
            merged.tags = Some(tags.clone());
        }
        merged.scheduled_at = runtime.scheduled_at.or(merged.scheduled_at);
        merged
    }
}

/// Per-send Brevo overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrevoRuntimeConfig {
    /// API key override.
    #[serde(default)]
    pub key: Option<SecretString>,
    /// Base URL override.
    #[serde(default, alias = "baseUrl")]
    pub base_url: Option<String>,
    /// Tags override.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Scheduled delivery time override.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_default_base_urls() {
        assert_eq!(SparkPostConfig::new("k").base_url, SPARKPOST_BASE_URL);
        assert_eq!(ResendConfig::new("k").base_url, RESEND_BASE_URL);
        assert_eq!(BrevoConfig::new("k").base_url, BREVO_BASE_URL);
    }

    #[test]
    fn test_empty_key_is_rejected() {
        assert!(SparkPostConfig::new("").validate().unwrap_err().is_configuration());
        assert!(ResendConfig::new("").validate().is_err());
        assert!(BrevoConfig::new("key").validate().is_ok());
    }

    #[test]
    fn test_sparkpost_merge() {
        let mut base = SparkPostConfig::new("base-key");
        base.open_tracking = Some(true);
        base.ip_pool = Some("pool-a".to_string());

        let runtime = SparkPostRuntimeConfig {
            key: Some(SecretString::new("runtime-key".to_string())),
            click_tracking: Some(false),
            ..Default::default()
        };
        let merged = base.merged_with(&runtime);

        assert_eq!(merged.key.expose_secret(), "runtime-key");
        assert_eq!(merged.open_tracking, Some(true));
        assert_eq!(merged.click_tracking, Some(false));
        assert_eq!(merged.ip_pool.as_deref(), Some("pool-a"));
        assert_eq!(base.key.expose_secret(), "base-key");
        assert_eq!(base.click_tracking, None);
    }

    #[test]
    fn test_resend_tags_replaced_whole() {
        let mut base = ResendConfig::new("k");
        base.tags = Some(vec![ResendTag::new("a", "1"), ResendTag::new("b", "2")]);

        let runtime = ResendRuntimeConfig {
            tags: Some(vec![ResendTag::new("c", "3")]),
            ..Default::default()
        };
        let merged = base.merged_with(&runtime);
        assert_eq!(merged.tags, Some(vec![ResendTag::new("c", "3")]));
    }

    #[test]
    fn test_base_url_validation() {
        assert!(SparkPostConfig::new("k").validate().is_ok());
        assert!(ResendConfig::new("k")
            .with_base_url("not a url")
            .validate()
            .unwrap_err()
            .is_configuration());
        assert!(BrevoConfig::new("k")
            .with_base_url("ftp://files.example.com")
            .validate()
            .is_err());
    }

    #[test]
    fn test_deserialize_camel_case_base_url() {
        let config: BrevoConfig = serde_json::from_value(serde_json::json!({
            "key": "abc",
            "baseUrl": "http://localhost:9000"
        }))
        .unwrap();
        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.key.expose_secret(), "abc");
    }
}
