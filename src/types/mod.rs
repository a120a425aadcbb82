//! Core types for mail dispatch.
//!
//! This module provides:
//! - Address entries and the recipient input shapes callers may use
//! - The [`Message`] model mutated by callers before a send
//! - Attachments and case-insensitive headers
//! - The normalized [`MailResponse`] every transport returns

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::errors::{MailError, MailResult};

/// Email address with optional display name.
///
/// Two entries are equal when their addresses are equal; the name is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressEntry {
    /// Email address (e.g., "john@example.com").
    pub address: String,
    /// Display name (e.g., "John Doe").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AddressEntry {
    /// Creates an entry with just an address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    /// Creates an entry with an address and display name.
    pub fn with_name(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: Some(name.into()),
        }
    }

    /// Formats the entry for SMTP MAIL FROM/RCPT TO commands.
    pub fn to_smtp(&self) -> String {
        format!("<{}>", self.address)
    }

    /// Formats the entry for message headers.
    pub fn to_header(&self) -> String {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => {
                if name.contains(|c: char| !c.is_alphanumeric() && c != ' ') {
                    format!("\"{}\" <{}>", name.replace('"', "\\\""), self.address)
                } else {
                    format!("{} <{}>", name, self.address)
                }
            }
            _ => self.address.clone(),
        }
    }

    /// Checks the address the way RFC 5321 limits it.
    pub fn validate(&self) -> MailResult<()> {
        let address = self.address.as_str();
        if address.is_empty() {
            return Err(MailError::serialization("Email address cannot be empty"));
        }
        if address.len() > 254 {
            return Err(MailError::serialization(format!(
                "Email address too long (max 254 characters): {}",
                address
            )));
        }
        if address.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(MailError::serialization(format!(
                "Email address cannot contain whitespace or control characters: {:?}",
                address
            )));
        }

        let (local, domain) = match address.split_once('@') {
            Some(parts) if !parts.1.contains('@') => parts,
            _ => {
                return Err(MailError::serialization(format!(
                    "Email address must contain exactly one @: {}",
                    address
                )))
            }
        };

        if local.is_empty() || local.len() > 64 {
            return Err(MailError::serialization(format!(
                "Local part must be 1-64 characters: {}",
                address
            )));
        }
        if domain.is_empty() {
            return Err(MailError::serialization(format!(
                "Domain cannot be empty: {}",
                address
            )));
        }

        Ok(())
    }
}

impl PartialEq for AddressEntry {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for AddressEntry {}

impl Hash for AddressEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for AddressEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_header())
    }
}

impl From<&str> for AddressEntry {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for AddressEntry {
    fn from(address: String) -> Self {
        Self::new(address)
    }
}

impl From<(&str, &str)> for AddressEntry {
    fn from((address, name): (&str, &str)) -> Self {
        Self::with_name(address, name)
    }
}

/// A single recipient exactly as the caller supplied it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Recipient {
    /// Bare address string.
    Address(String),
    /// `{address, name?}` object.
    Entry(AddressEntry),
}

impl From<&str> for Recipient {
    fn from(address: &str) -> Self {
        Recipient::Address(address.to_string())
    }
}

impl From<String> for Recipient {
    fn from(address: String) -> Self {
        Recipient::Address(address)
    }
}

impl From<AddressEntry> for Recipient {
    fn from(entry: AddressEntry) -> Self {
        Recipient::Entry(entry)
    }
}

impl From<(&str, &str)> for Recipient {
    fn from(pair: (&str, &str)) -> Self {
        Recipient::Entry(pair.into())
    }
}

/// Recipient input: one recipient or an ordered list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecipientInput {
    /// A single string or object.
    One(Recipient),
    /// An ordered list mixing strings and objects.
    Many(Vec<Recipient>),
}

impl RecipientInput {
    /// Returns the recipients in input order.
    pub fn into_vec(self) -> Vec<Recipient> {
        match self {
            RecipientInput::One(recipient) => vec![recipient],
            RecipientInput::Many(recipients) => recipients,
        }
    }
}

macro_rules! recipient_input_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for RecipientInput {
                fn from(recipient: $ty) -> Self {
                    RecipientInput::One(recipient.into())
                }
            }

            impl From<Vec<$ty>> for RecipientInput {
                fn from(recipients: Vec<$ty>) -> Self {
                    RecipientInput::Many(recipients.into_iter().map(Into::into).collect())
                }
            }
        )*
    };
}

recipient_input_from!(&str, String, AddressEntry, (&str, &str));

impl From<Recipient> for RecipientInput {
    fn from(recipient: Recipient) -> Self {
        RecipientInput::One(recipient)
    }
}

impl From<Vec<Recipient>> for RecipientInput {
    fn from(recipients: Vec<Recipient>) -> Self {
        RecipientInput::Many(recipients)
    }
}

/// Content disposition for attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentDisposition {
    /// Regular attachment.
    #[default]
    Attachment,
    /// Inline content referenced by content id.
    Inline,
}

impl fmt::Display for ContentDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentDisposition::Attachment => write!(f, "attachment"),
            ContentDisposition::Inline => write!(f, "inline"),
        }
    }
}

/// Binary attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Filename.
    pub filename: String,
    /// MIME content type.
    pub content_type: String,
    /// Binary content, base64 in serialized form.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    /// Content disposition.
    #[serde(default)]
    pub disposition: ContentDisposition,
    /// Content id for inline parts (used in HTML as `cid:...`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

impl Attachment {
    /// Creates a new attachment.
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data,
            disposition: ContentDisposition::Attachment,
            content_id: None,
        }
    }

    /// Creates an attachment with the content type guessed from the filename.
    pub fn from_file(filename: impl Into<String>, data: Vec<u8>) -> Self {
        let filename = filename.into();
        let content_type = mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .to_string();
        Self::new(filename, content_type, data)
    }

    /// Marks the attachment inline under `content_id`.
    pub fn inline(mut self, content_id: impl Into<String>) -> Self {
        self.disposition = ContentDisposition::Inline;
        self.content_id = Some(content_id.into());
        self
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Free-form message headers with case-insensitive names.
///
/// Insertion order is kept; setting an existing name replaces its value in
/// place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Creates an empty header set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to `value`, replacing any existing value for that name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    /// Returns the value for `name`, ignoring case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes `name`, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self.0.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))?;
        Some(self.0.remove(index).1)
    }

    /// Iterates over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Returns the number of headers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no header is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An email message.
///
/// Built by the caller through the chained setters, then handed to a
/// transport which only reads it.
///
/// ```rust
/// use integrations_mail::Message;
///
/// let mut message = Message::new();
/// message
///     .from("sender@example.com")
///     .to(vec!["a@example.com", "b@example.com"])
///     .cc(("c@example.com", "Carol"))
///     .subject("Hello")
///     .text("Hi there");
///
/// assert_eq!(message.to.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Sender address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<AddressEntry>,
    /// Primary recipients.
    #[serde(default)]
    pub to: Vec<Recipient>,
    /// CC recipients.
    #[serde(default)]
    pub cc: Vec<Recipient>,
    /// BCC recipients.
    #[serde(default)]
    pub bcc: Vec<Recipient>,
    /// Reply-to address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<AddressEntry>,
    /// Subject line.
    #[serde(default)]
    pub subject: String,
    /// Plain text body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// HTML body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    /// Attachments in order.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Additional headers.
    #[serde(default)]
    pub headers: Headers,
    /// Explicit message id, generated at build time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// In-Reply-To message id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    /// References message ids.
    #[serde(default)]
    pub references: Vec<String>,
}

impl Message {
    /// Creates an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sender.
    pub fn from(&mut self, address: impl Into<AddressEntry>) -> &mut Self {
        self.from = Some(address.into());
        self
    }

    /// Appends primary recipients.
    pub fn to(&mut self, recipients: impl Into<RecipientInput>) -> &mut Self {
        self.to.extend(recipients.into().into_vec());
        self
    }

    /// Appends CC recipients.
    pub fn cc(&mut self, recipients: impl Into<RecipientInput>) -> &mut Self {
        self.cc.extend(recipients.into().into_vec());
        self
    }

    /// Appends BCC recipients.
    pub fn bcc(&mut self, recipients: impl Into<RecipientInput>) -> &mut Self {
        self.bcc.extend(recipients.into().into_vec());
        self
    }

    /// Sets the reply-to address.
    pub fn reply_to(&mut self, address: impl Into<AddressEntry>) -> &mut Self {
        self.reply_to = Some(address.into());
        self
    }

    /// Sets the subject.
    pub fn subject(&mut self, subject: impl Into<String>) -> &mut Self {
        self.subject = subject.into();
        self
    }

    /// Sets the plain text body.
    pub fn text(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(text.into());
        self
    }

    /// Sets the HTML body.
    pub fn html(&mut self, html: impl Into<String>) -> &mut Self {
        self.html = Some(html.into());
        self
    }

    /// Appends an attachment.
    pub fn attach(&mut self, attachment: Attachment) -> &mut Self {
        self.attachments.push(attachment);
        self
    }

    /// Sets a header, replacing any value under the same name.
    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the message id.
    pub fn message_id(&mut self, id: impl Into<String>) -> &mut Self {
        self.message_id = Some(id.into());
        self
    }

    /// Sets the In-Reply-To header.
    pub fn in_reply_to(&mut self, id: impl Into<String>) -> &mut Self {
        self.in_reply_to = Some(id.into());
        self
    }

    /// Adds a reference.
    pub fn reference(&mut self, id: impl Into<String>) -> &mut Self {
        self.references.push(id.into());
        self
    }

    /// Returns true if any To/Cc/Bcc recipient is set.
    pub fn has_recipients(&self) -> bool {
        !(self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty())
    }
}

/// SMTP-style envelope of a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender address.
    pub from: String,
    /// Every recipient address, To then Cc then Bcc.
    pub to: Vec<String>,
}

/// Normalized result of a send, whichever transport handled it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailResponse {
    /// Transport-agnostic message id.
    pub message_id: String,
    /// Envelope the message was sent with.
    pub envelope: Envelope,
    /// Provider-specific payload, opaque to the manager.
    pub raw: serde_json::Value,
}

impl MailResponse {
    /// Creates a response.
    pub fn new(message_id: impl Into<String>, envelope: Envelope, raw: serde_json::Value) -> Self {
        Self {
            message_id: message_id.into(),
            envelope,
            raw,
        }
    }

    /// Decodes the raw payload into a provider-specific type.
    pub fn raw_as<T: serde::de::DeserializeOwned>(&self) -> MailResult<T> {
        serde_json::from_value(self.raw.clone()).map_err(|e| {
            MailError::serialization(format!("Unable to decode provider payload: {}", e))
        })
    }
}
