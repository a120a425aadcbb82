//! # Mail Integration Library
//!
//! Provider-agnostic email dispatch:
//! - One [`Transport`] contract for an SMTP relay and HTTP-API providers
//!   (SparkPost, Resend, Brevo)
//! - Recipient normalization and RFC 5322 / MIME rendering
//! - Named, lazily instantiated mailers behind a [`MailManager`]
//! - Deferred configuration through [`ConfigProvider`]
//! - Send hooks and counters for observability
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_mail::config::{MailerConfig, SmtpConfig, SparkPostConfig};
//! use integrations_mail::transport::transports;
//! use integrations_mail::{generate_mailer, Message};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let relay = SmtpConfig::builder()
//!         .host("smtp.example.com")
//!         .credentials("user@example.com", "password")
//!         .build()?;
//!
//!     let manager = generate_mailer(
//!         MailerConfig::new()
//!             .default_mailer("transactional")
//!             .mailer("transactional", transports::smtp(relay))
//!             .mailer("marketing", transports::sparkpost(SparkPostConfig::from_env()?))
//!             .from(("noreply@example.com", "Example")),
//!     )
//!     .await?;
//!
//!     let mut message = Message::new();
//!     message
//!         .to("recipient@example.com")
//!         .subject("Hello from Rust!")
//!         .text("This is a test email.");
//!
//!     let response = manager.send(&message, None).await?;
//!     println!("Message sent with ID: {}", response.message_id);
//!
//!     manager.close_all().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Message handling
pub mod mime;
pub mod recipients;

// Deferred configuration
pub mod provider;

// Transport layer
pub mod transport;

// Mailers
pub mod manager;

// Observability
pub mod observability;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use config::{
    define_config, MailerConfig, ResolvedMailerConfig, RuntimeConfig, SendOptions,
    TransportConfig,
};
pub use errors::{MailError, MailResult};
pub use manager::{generate_mailer, MailManager};
pub use observability::{MailEvents, MailMetrics, NoopEvents, TracingEvents};
pub use provider::{resolve, ConfigProvider, ConfigValue};
pub use transport::{Transport, TransportFactory, TransportKind};
pub use types::{
    AddressEntry, Attachment, Envelope, Headers, MailResponse, Message, Recipient, RecipientInput,
};
