//! Error types for mail dispatch.
//!
//! Every failure surfaces as one of three [`MailError`] variants:
//! - configuration problems detected before any I/O,
//! - serialization problems with the message itself,
//! - transport failures while talking to the relay or provider.
//!
//! Transport failures always keep the underlying cause reachable through
//! [`std::error::Error::source`].

use std::fmt;
use thiserror::Error;

use crate::transport::TransportKind;

/// Boxed error used as the cause of transport failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for mail operations.
pub type MailResult<T> = Result<T, MailError>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum MailError {
    /// Unknown or closed mailer, missing base configuration, or a runtime
    /// override that does not belong to the transport.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// Network, authentication or provider rejection while sending.
    #[error("{message}")]
    Transport {
        /// Transport kind that failed.
        transport: TransportKind,
        /// Transport-specific description.
        message: String,
        /// Original cause.
        #[source]
        source: BoxError,
    },

    /// The message could not be turned into a wire payload.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the problem.
        message: String,
    },
}

impl MailError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Wraps `cause` in a transport error for `transport`.
    pub fn transport<E>(transport: TransportKind, message: impl Into<String>, cause: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Transport {
            transport,
            message: message.into(),
            source: cause.into(),
        }
    }

    /// Wraps `cause` using the standard "Unable to send email" message.
    pub fn send_failed<E>(transport: TransportKind, cause: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::transport(
            transport,
            format!("Unable to send email using the {} transport", transport),
            cause,
        )
    }

    /// Returns true for configuration errors.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Returns true for transport errors.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Returns true for serialization errors.
    pub fn is_serialization(&self) -> bool {
        matches!(self, Self::Serialization { .. })
    }

    /// Returns the failing transport kind, if this is a transport error.
    pub fn transport_kind(&self) -> Option<TransportKind> {
        match self {
            Self::Transport { transport, .. } => Some(*transport),
            _ => None,
        }
    }

    /// Returns the original cause of a transport error.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Transport { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Non-success reply from an HTTP provider.
#[derive(Debug, Clone, Error)]
#[error("Provider responded with HTTP {status}: {body}")]
pub struct ProviderError {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: String,
}

impl ProviderError {
    /// Creates a provider error.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// SMTP failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmtpErrorKind {
    /// Connection could not be established.
    ConnectionRefused,
    /// Connect, read or write timed out.
    Timeout,
    /// Server closed or reset the connection.
    ConnectionReset,
    /// TLS negotiation failed.
    TlsHandshakeFailed,
    /// STARTTLS required but not offered.
    StarttlsNotSupported,
    /// Credentials rejected.
    CredentialsInvalid,
    /// No mutually supported auth mechanism.
    AuthMethodNotSupported,
    /// Malformed reply.
    InvalidResponse,
    /// Server is shutting down (421).
    ServerShutdown,
    /// Sender refused.
    SenderRejected,
    /// Every recipient refused.
    RecipientsRejected,
    /// Message exceeds the size limit.
    MessageTooLarge,
    /// Any other negative reply.
    UnexpectedResponse,
}

impl SmtpErrorKind {
    /// Returns true if this error kind is typically transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SmtpErrorKind::Timeout | SmtpErrorKind::ConnectionReset | SmtpErrorKind::ServerShutdown
        )
    }
}

impl fmt::Display for SmtpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpErrorKind::ConnectionRefused => write!(f, "Connection refused"),
            SmtpErrorKind::Timeout => write!(f, "Timed out"),
            SmtpErrorKind::ConnectionReset => write!(f, "Connection reset"),
            SmtpErrorKind::TlsHandshakeFailed => write!(f, "TLS handshake failed"),
            SmtpErrorKind::StarttlsNotSupported => write!(f, "STARTTLS not supported"),
            SmtpErrorKind::CredentialsInvalid => write!(f, "Invalid credentials"),
            SmtpErrorKind::AuthMethodNotSupported => write!(f, "Auth method not supported"),
            SmtpErrorKind::InvalidResponse => write!(f, "Invalid server response"),
            SmtpErrorKind::ServerShutdown => write!(f, "Server shutting down"),
            SmtpErrorKind::SenderRejected => write!(f, "Sender rejected"),
            SmtpErrorKind::RecipientsRejected => write!(f, "All recipients rejected"),
            SmtpErrorKind::MessageTooLarge => write!(f, "Message too large"),
            SmtpErrorKind::UnexpectedResponse => write!(f, "Unexpected response"),
        }
    }
}

/// Enhanced SMTP status code (RFC 3463).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedStatusCode {
    /// Class (2=success, 4=temporary, 5=permanent).
    pub class: u8,
    /// Subject.
    pub subject: u16,
    /// Detail.
    pub detail: u16,
}

impl EnhancedStatusCode {
    /// Parses a code such as `5.1.1`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let code = Self {
            class: parts.next()?.parse().ok()?,
            subject: parts.next()?.parse().ok()?,
            detail: parts.next()?.parse().ok()?,
        };
        if parts.next().is_some() || !(2..=5).contains(&code.class) {
            return None;
        }
        Some(code)
    }
}

impl fmt::Display for EnhancedStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// Failure while relaying through an SMTP server.
#[derive(Error, Debug)]
pub struct SmtpError {
    kind: SmtpErrorKind,
    message: String,
    smtp_code: Option<u16>,
    enhanced_code: Option<EnhancedStatusCode>,
    #[source]
    cause: Option<BoxError>,
}

impl SmtpError {
    /// Creates a new SMTP error.
    pub fn new(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            enhanced_code: None,
            cause: None,
        }
    }

    /// Sets the enhanced status code.
    pub fn with_enhanced_code(mut self, code: EnhancedStatusCode) -> Self {
        self.enhanced_code = Some(code);
        self
    }

    /// Reclassifies the error, keeping codes and cause.
    pub fn with_kind(mut self, kind: SmtpErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Creates an error from a negative server reply.
    pub fn from_reply(code: u16, message: impl Into<String>) -> Self {
        let kind = match code {
            421 => SmtpErrorKind::ServerShutdown,
            530 | 535 => SmtpErrorKind::CredentialsInvalid,
            552 => SmtpErrorKind::MessageTooLarge,
            553 => SmtpErrorKind::SenderRejected,
            500..=504 => SmtpErrorKind::InvalidResponse,
            _ => SmtpErrorKind::UnexpectedResponse,
        };
        let mut err = Self::new(kind, message);
        err.smtp_code = Some(code);
        err
    }

    /// Returns the error kind.
    pub fn kind(&self) -> SmtpErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP reply code if the server answered.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Returns the enhanced status code if the server sent one.
    pub fn enhanced_code(&self) -> Option<&EnhancedStatusCode> {
        self.enhanced_code.as_ref()
    }

    /// Returns true if the failure looks transient. Informational only.
    pub fn is_retryable(&self) -> bool {
        if let Some(code) = self.smtp_code {
            return matches!(code, 421 | 450 | 451 | 452);
        }
        self.kind.is_retryable()
    }
}

impl fmt::Display for SmtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        if let Some(enhanced) = &self.enhanced_code {
            write!(f, " [{}]", enhanced)?;
        }
        Ok(())
    }
}
