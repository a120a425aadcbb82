//! SMTP AUTH mechanisms.
//!
//! - PLAIN (RFC 4616)
//! - LOGIN
//! - CRAM-MD5 (RFC 2195)
//! - XOAUTH2, where the password carries the access token

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use md5::Md5;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

use super::SmtpResult;
use crate::errors::{SmtpError, SmtpErrorKind};

/// Authentication mechanisms understood by the relay client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// PLAIN authentication.
    Plain,
    /// LOGIN authentication.
    Login,
    /// CRAM-MD5 challenge-response.
    CramMd5,
    /// XOAUTH2 bearer token. Only used when configured explicitly.
    #[serde(rename = "xoauth2")]
    XOAuth2,
}

impl AuthMethod {
    /// Returns the SMTP AUTH mechanism name.
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            AuthMethod::Plain => "PLAIN",
            AuthMethod::Login => "LOGIN",
            AuthMethod::CramMd5 => "CRAM-MD5",
            AuthMethod::XOAuth2 => "XOAUTH2",
        }
    }

    /// Priority for automatic selection (higher is better).
    fn priority(&self) -> u8 {
        match self {
            AuthMethod::CramMd5 => 3,
            AuthMethod::Plain => 2,
            AuthMethod::Login => 1,
            AuthMethod::XOAuth2 => 0,
        }
    }

    /// Parses an advertised mechanism.
    pub fn from_capability(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(AuthMethod::Plain),
            "LOGIN" => Some(AuthMethod::Login),
            "CRAM-MD5" => Some(AuthMethod::CramMd5),
            "XOAUTH2" => Some(AuthMethod::XOAuth2),
            _ => None,
        }
    }

    /// Returns true if the mechanism sends the secret in the clear.
    pub fn sends_plaintext(&self) -> bool {
        matches!(self, AuthMethod::Plain | AuthMethod::Login | AuthMethod::XOAuth2)
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mechanism_name())
    }
}

/// Picks the mechanism to use against a server offering `offered`.
///
/// A configured `preferred` method must be offered. Otherwise the best of
/// CRAM-MD5, PLAIN and LOGIN wins. Cleartext mechanisms are skipped unless
/// `plaintext_allowed`.
pub(crate) fn select_method(
    offered: &HashSet<AuthMethod>,
    preferred: Option<AuthMethod>,
    plaintext_allowed: bool,
) -> SmtpResult<AuthMethod> {
    if let Some(method) = preferred {
        if !offered.contains(&method) {
            return Err(SmtpError::new(
                SmtpErrorKind::AuthMethodNotSupported,
                format!("Server does not offer AUTH {}", method),
            ));
        }
        if method.sends_plaintext() && !plaintext_allowed {
            return Err(SmtpError::new(
                SmtpErrorKind::AuthMethodNotSupported,
                format!("AUTH {} requires TLS", method),
            ));
        }
        return Ok(method);
    }

    offered
        .iter()
        .copied()
        .filter(|m| *m != AuthMethod::XOAuth2)
        .filter(|m| plaintext_allowed || !m.sends_plaintext())
        .max_by_key(AuthMethod::priority)
        .ok_or_else(|| {
            SmtpError::new(
                SmtpErrorKind::AuthMethodNotSupported,
                "No compatible authentication method available",
            )
        })
}

/// Builds the base64 payloads of each mechanism.
pub(crate) struct Authenticator;

impl Authenticator {
    /// `\0username\0password`.
    pub(crate) fn plain_initial_response(username: &str, password: &SecretString) -> String {
        BASE64.encode(format!("\0{}\0{}", username, password.expose_secret()))
    }

    pub(crate) fn login_username(username: &str) -> String {
        BASE64.encode(username)
    }

    pub(crate) fn login_password(password: &SecretString) -> String {
        BASE64.encode(password.expose_secret())
    }

    /// `username hex(hmac_md5(password, challenge))`.
    pub(crate) fn cram_md5_response(
        challenge: &str,
        username: &str,
        password: &SecretString,
    ) -> SmtpResult<String> {
        let challenge = BASE64.decode(challenge.trim()).map_err(|e| {
            SmtpError::new(SmtpErrorKind::InvalidResponse, "Invalid CRAM-MD5 challenge")
                .with_cause(e)
        })?;

        let mut mac = Hmac::<Md5>::new_from_slice(password.expose_secret().as_bytes())
            .map_err(|_| SmtpError::new(SmtpErrorKind::CredentialsInvalid, "Invalid HMAC key"))?;
        mac.update(&challenge);
        let digest: String = mac
            .finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();

        Ok(BASE64.encode(format!("{} {}", username, digest)))
    }

    /// `user=username\x01auth=Bearer token\x01\x01`.
    pub(crate) fn xoauth2_initial_response(username: &str, access_token: &SecretString) -> String {
        BASE64.encode(format!(
            "user={}\x01auth=Bearer {}\x01\x01",
            username,
            access_token.expose_secret()
        ))
    }
}
