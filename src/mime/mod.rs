//! Message preparation and RFC 5322 encoding.
//!
//! [`PreparedMessage`] is the validated, normalized view of a [`Message`]
//! every transport works from: sender, recipients, envelope and message id
//! are fixed before any network I/O happens. [`PreparedMessage::to_mime`]
//! renders the full MIME document used for SMTP relaying and for providers
//! that accept raw RFC 822 content.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::errors::{MailError, MailResult};
use crate::recipients::normalize_all;
use crate::types::{AddressEntry, Attachment, ContentDisposition, Envelope, Message};

/// MIME content types.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ContentType {
    TextPlain,
    TextHtml,
    MultipartAlternative(String),
    MultipartMixed(String),
    MultipartRelated(String),
}

impl ContentType {
    fn header_value(&self) -> String {
        match self {
            ContentType::TextPlain => "text/plain; charset=utf-8".to_string(),
            ContentType::TextHtml => "text/html; charset=utf-8".to_string(),
            ContentType::MultipartAlternative(boundary) => {
                format!("multipart/alternative; boundary=\"{}\"", boundary)
            }
            ContentType::MultipartMixed(boundary) => {
                format!("multipart/mixed; boundary=\"{}\"", boundary)
            }
            ContentType::MultipartRelated(boundary) => {
                format!("multipart/related; boundary=\"{}\"", boundary)
            }
        }
    }
}

/// A message validated and normalized for sending.
#[derive(Debug, Clone)]
pub struct PreparedMessage<'a> {
    message: &'a Message,
    from: AddressEntry,
    reply_to: Option<AddressEntry>,
    to: Vec<AddressEntry>,
    cc: Vec<AddressEntry>,
    bcc: Vec<AddressEntry>,
    message_id: String,
    date: DateTime<Utc>,
}

impl<'a> PreparedMessage<'a> {
    /// Validates `message` and fixes its sender, recipients and message id.
    ///
    /// Fails with a serialization error when the sender is missing, no
    /// recipient is set, or an address is malformed.
    pub fn prepare(message: &'a Message) -> MailResult<Self> {
        let from = message
            .from
            .clone()
            .ok_or_else(|| MailError::serialization("Message sender (from) is missing"))?;
        from.validate()?;

        if !message.has_recipients() {
            return Err(MailError::serialization(
                "Message must have at least one recipient",
            ));
        }

        let to = normalize_all(&message.to);
        let cc = normalize_all(&message.cc);
        let bcc = normalize_all(&message.bcc);
        for entry in to.iter().chain(&cc).chain(&bcc) {
            entry.validate()?;
        }
        if let Some(reply_to) = &message.reply_to {
            reply_to.validate()?;
        }

        let date = Utc::now();
        let message_id = match message.message_id.as_deref() {
            Some(id) => strip_angle_brackets(id).to_string(),
            None => generate_message_id(&from, &date),
        };

        Ok(Self {
            message,
            from,
            reply_to: message.reply_to.clone(),
            to,
            cc,
            bcc,
            message_id,
            date,
        })
    }

    /// The source message.
    pub fn message(&self) -> &Message {
        self.message
    }

    /// Normalized sender.
    pub fn from(&self) -> &AddressEntry {
        &self.from
    }

    /// Normalized To recipients.
    pub fn to(&self) -> &[AddressEntry] {
        &self.to
    }

    /// Normalized Cc recipients.
    pub fn cc(&self) -> &[AddressEntry] {
        &self.cc
    }

    /// Normalized Bcc recipients.
    pub fn bcc(&self) -> &[AddressEntry] {
        &self.bcc
    }

    /// Every recipient: To, then Cc, then Bcc, duplicates kept.
    pub fn recipients(&self) -> impl Iterator<Item = &AddressEntry> {
        self.to.iter().chain(&self.cc).chain(&self.bcc)
    }

    /// Message id without angle brackets.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Envelope: sender address plus every recipient address, first
    /// occurrence wins.
    pub fn envelope(&self) -> Envelope {
        let mut seen = HashSet::new();
        let to = self
            .recipients()
            .filter(|entry| seen.insert(entry.address.as_str()))
            .map(|entry| entry.address.clone())
            .collect();
        Envelope {
            from: self.from.address.clone(),
            to,
        }
    }

    /// Renders the message as an RFC 5322 document. Bcc is never written.
    pub fn to_mime(&self) -> MailResult<Vec<u8>> {
        let message = self.message;
        let mut output = Vec::new();

        write_header(&mut output, "Date", &self.date.format("%a, %d %b %Y %H:%M:%S %z").to_string())?;
        write_header(&mut output, "From", &header_address(&self.from))?;
        if !self.to.is_empty() {
            write_header(&mut output, "To", &address_list(&self.to))?;
        }
        if !self.cc.is_empty() {
            write_header(&mut output, "Cc", &address_list(&self.cc))?;
        }
        if let Some(reply_to) = &self.reply_to {
            write_header(&mut output, "Reply-To", &header_address(reply_to))?;
        }
        write_header(&mut output, "Subject", &encode_header(&message.subject))?;
        write_header(&mut output, "Message-ID", &format!("<{}>", self.message_id))?;
        if let Some(in_reply_to) = &message.in_reply_to {
            write_header(&mut output, "In-Reply-To", &format!("<{}>", strip_angle_brackets(in_reply_to)))?;
        }
        if !message.references.is_empty() {
            let refs: Vec<String> = message
                .references
                .iter()
                .map(|r| format!("<{}>", strip_angle_brackets(r)))
                .collect();
            write_header(&mut output, "References", &refs.join(" "))?;
        }
        for (name, value) in message.headers.iter() {
            write_header(&mut output, name, &encode_header(value))?;
        }
        write_header(&mut output, "MIME-Version", "1.0")?;

        let (inline, attached): (Vec<&Attachment>, Vec<&Attachment>) = message
            .attachments
            .iter()
            .partition(|a| a.disposition == ContentDisposition::Inline);

        if attached.is_empty() {
            write_related(&mut output, message, &inline)?;
        } else {
            let boundary = generate_boundary();
            write_header(&mut output, "Content-Type", &ContentType::MultipartMixed(boundary.clone()).header_value())?;
            output.extend_from_slice(b"\r\n");

            open_part(&mut output, &boundary);
            write_related(&mut output, message, &inline)?;
            for attachment in attached {
                open_part(&mut output, &boundary);
                write_attachment(&mut output, attachment)?;
            }
            close_parts(&mut output, &boundary);
        }

        Ok(output)
    }
}

/// Strips one leading `<` and one trailing `>`.
pub fn strip_angle_brackets(id: &str) -> &str {
    let id = id.strip_prefix('<').unwrap_or(id);
    id.strip_suffix('>').unwrap_or(id)
}

/// Prepares DATA content: dot-stuffing, CRLF ending and the final `.` line.
pub fn dot_stuff(encoded: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(encoded.len() + 100);
    let mut at_line_start = true;

    for &byte in encoded {
        if at_line_start && byte == b'.' {
            output.push(b'.');
        }
        output.push(byte);
        at_line_start = byte == b'\n';
    }

    if !output.ends_with(b"\r\n") {
        if output.ends_with(b"\n") {
            output.pop();
        }
        output.extend_from_slice(b"\r\n");
    }
    output.extend_from_slice(b".\r\n");
    output
}

fn generate_message_id(from: &AddressEntry, date: &DateTime<Utc>) -> String {
    let domain = from
        .address
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .unwrap_or("localhost");
    format!("{}.{}@{}", Uuid::new_v4(), date.timestamp(), domain)
}

fn generate_boundary() -> String {
    format!("----=_Part_{}", Uuid::new_v4().simple())
}

/// Header form of an address; non-ASCII display names are RFC 2047 encoded.
fn header_address(entry: &AddressEntry) -> String {
    match entry.name.as_deref() {
        Some(name) if !name.is_ascii() => format!("{} <{}>", encode_header(name), entry.address),
        _ => entry.to_header(),
    }
}

fn address_list(entries: &[AddressEntry]) -> String {
    entries
        .iter()
        .map(header_address)
        .collect::<Vec<_>>()
        .join(", ")
}

fn write_header(output: &mut Vec<u8>, name: &str, value: &str) -> MailResult<()> {
    if name.is_empty() || name.chars().any(|c| c.is_control() || c == ':' || c == ' ') {
        return Err(MailError::serialization(format!("Invalid header name: {:?}", name)));
    }
    if value.contains(['\r', '\n']) {
        return Err(MailError::serialization(format!(
            "Header {} contains a line break",
            name
        )));
    }

    let header = format!("{}: {}", name, value);
    output.extend_from_slice(fold_header(&header).as_bytes());
    output.extend_from_slice(b"\r\n");
    Ok(())
}

/// Folds a header line at whitespace once it passes 78 characters.
fn fold_header(header: &str) -> String {
    if header.len() <= 78 {
        return header.to_string();
    }

    let mut result = String::new();
    let mut line = String::new();
    for word in header.split(' ') {
        if line.is_empty() {
            line.push_str(word);
        } else if line.len() + 1 + word.len() <= 76 {
            line.push(' ');
            line.push_str(word);
        } else {
            result.push_str(&line);
            result.push_str("\r\n ");
            line = word.to_string();
        }
    }
    result.push_str(&line);
    result
}

/// Input bytes per encoded-word; keeps each word within 64 characters.
const ENCODED_WORD_BYTES: usize = 39;

/// RFC 2047 B-encoding for anything outside printable ASCII. Long values
/// become several space-separated encoded-words, split on char boundaries.
fn encode_header(value: &str) -> String {
    if value.chars().all(|c| c.is_ascii() && !c.is_control()) {
        return value.to_string();
    }

    let mut words = Vec::new();
    let mut start = 0;
    for (index, c) in value.char_indices() {
        if index + c.len_utf8() - start > ENCODED_WORD_BYTES {
            words.push(encoded_word(&value[start..index]));
            start = index;
        }
    }
    words.push(encoded_word(&value[start..]));
    words.join(" ")
}

fn encoded_word(chunk: &str) -> String {
    format!("=?UTF-8?B?{}?=", BASE64.encode(chunk.as_bytes()))
}

fn open_part(output: &mut Vec<u8>, boundary: &str) {
    output.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
}

fn close_parts(output: &mut Vec<u8>, boundary: &str) {
    output.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
}

fn write_related(output: &mut Vec<u8>, message: &Message, inline: &[&Attachment]) -> MailResult<()> {
    if inline.is_empty() {
        return write_body(output, message);
    }

    let boundary = generate_boundary();
    write_header(output, "Content-Type", &ContentType::MultipartRelated(boundary.clone()).header_value())?;
    output.extend_from_slice(b"\r\n");

    open_part(output, &boundary);
    write_body(output, message)?;
    for attachment in inline {
        open_part(output, &boundary);
        write_attachment(output, attachment)?;
    }
    close_parts(output, &boundary);
    Ok(())
}

fn write_body(output: &mut Vec<u8>, message: &Message) -> MailResult<()> {
    match (&message.text, &message.html) {
        (Some(text), Some(html)) => {
            let boundary = generate_boundary();
            write_header(output, "Content-Type", &ContentType::MultipartAlternative(boundary.clone()).header_value())?;
            output.extend_from_slice(b"\r\n");

            open_part(output, &boundary);
            write_text_part(output, ContentType::TextPlain, text)?;
            open_part(output, &boundary);
            write_text_part(output, ContentType::TextHtml, html)?;
            close_parts(output, &boundary);
            Ok(())
        }
        (None, Some(html)) => write_text_part(output, ContentType::TextHtml, html),
        (Some(text), None) => write_text_part(output, ContentType::TextPlain, text),
        (None, None) => write_text_part(output, ContentType::TextPlain, ""),
    }
}

fn write_text_part(output: &mut Vec<u8>, content_type: ContentType, body: &str) -> MailResult<()> {
    write_header(output, "Content-Type", &content_type.header_value())?;
    write_header(output, "Content-Transfer-Encoding", "quoted-printable")?;
    output.extend_from_slice(b"\r\n");
    output.extend_from_slice(&quoted_printable::encode(body.as_bytes()));
    output.extend_from_slice(b"\r\n");
    Ok(())
}

fn write_attachment(output: &mut Vec<u8>, attachment: &Attachment) -> MailResult<()> {
    let filename = attachment.filename.replace('"', "");
    write_header(output, "Content-Type", &format!("{}; name=\"{}\"", attachment.content_type, filename))?;
    write_header(output, "Content-Transfer-Encoding", "base64")?;
    write_header(output, "Content-Disposition", &format!("{}; filename=\"{}\"", attachment.disposition, filename))?;
    if let Some(content_id) = &attachment.content_id {
        write_header(output, "Content-ID", &format!("<{}>", strip_angle_brackets(content_id)))?;
    }
    output.extend_from_slice(b"\r\n");

    let encoded = BASE64.encode(&attachment.data);
    for chunk in encoded.as_bytes().chunks(76) {
        output.extend_from_slice(chunk);
        output.extend_from_slice(b"\r\n");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AddressEntry;

    fn sample() -> Message {
        let mut message = Message::new();
        message
            .from("sender@example.com")
            .to(vec!["t1@example.com", "shared@example.com"])
            .cc("shared@example.com")
            .bcc("hidden@example.com")
            .subject("Test Subject")
            .text("Hello World!");
        message
    }

    #[test]
    fn test_prepare_requires_sender() {
        let mut message = Message::new();
        message.to("a@example.com");
        let err = PreparedMessage::prepare(&message).unwrap_err();
        assert!(err.is_serialization());
    }

    #[test]
    fn test_prepare_requires_recipient() {
        let mut message = Message::new();
        message.from("sender@example.com");
        assert!(PreparedMessage::prepare(&message).unwrap_err().is_serialization());
    }

    #[test]
    fn test_prepare_rejects_malformed_address() {
        let mut message = sample();
        message.to("not-an-address");
        assert!(PreparedMessage::prepare(&message).unwrap_err().is_serialization());
    }

    #[test]
    fn test_envelope_dedupes_in_order() {
        let message = sample();
        let prepared = PreparedMessage::prepare(&message).unwrap();
        let envelope = prepared.envelope();

        assert_eq!(envelope.from, "sender@example.com");
        assert_eq!(
            envelope.to,
            vec!["t1@example.com", "shared@example.com", "hidden@example.com"]
        );
        assert_eq!(prepared.recipients().count(), 4);
    }

    #[test]
    fn test_explicit_message_id_is_unwrapped() {
        let mut message = sample();
        message.message_id("<abc@example.com>");
        let prepared = PreparedMessage::prepare(&message).unwrap();
        assert_eq!(prepared.message_id(), "abc@example.com");
    }

    #[test]
    fn test_generated_message_id_uses_sender_domain() {
        let message = sample();
        let prepared = PreparedMessage::prepare(&message).unwrap();
        assert!(prepared.message_id().ends_with("@example.com"));
    }

    #[test]
    fn test_simple_mime() {
        let message = sample();
        let prepared = PreparedMessage::prepare(&message).unwrap();
        let content = String::from_utf8(prepared.to_mime().unwrap()).unwrap();

        assert!(content.contains("From: sender@example.com\r\n"));
        assert!(content.contains("To: t1@example.com, shared@example.com\r\n"));
        assert!(content.contains("Cc: shared@example.com\r\n"));
        assert!(content.contains("Subject: Test Subject\r\n"));
        assert!(content.contains("MIME-Version: 1.0\r\n"));
        assert!(content.contains(&format!("Message-ID: <{}>", prepared.message_id())));
        assert!(!content.contains("hidden@example.com"));
    }

    #[test]
    fn test_mime_structure_with_attachments() {
        let mut message = sample();
        message
            .html("<p>Hi <img src=\"cid:logo\"></p>")
            .attach(Attachment::new("logo.png", "image/png", vec![1, 2, 3]).inline("logo"))
            .attach(Attachment::from_file("report.pdf", vec![4, 5, 6]));

        let prepared = PreparedMessage::prepare(&message).unwrap();
        let content = String::from_utf8(prepared.to_mime().unwrap()).unwrap();

        assert!(content.contains("multipart/mixed"));
        assert!(content.contains("multipart/related"));
        assert!(content.contains("multipart/alternative"));
        assert!(content.contains("Content-ID: <logo>"));
        assert!(content.contains("Content-Disposition: inline; filename=\"logo.png\""));
        assert!(content.contains("Content-Type: application/pdf; name=\"report.pdf\""));
    }

    #[test]
    fn test_non_ascii_subject_is_encoded() {
        let mut message = sample();
        message.subject("Héllo");
        let prepared = PreparedMessage::prepare(&message).unwrap();
        let content = String::from_utf8(prepared.to_mime().unwrap()).unwrap();
        assert!(content.contains("Subject: =?UTF-8?B?"));
    }

    fn header_block(prepared: &PreparedMessage<'_>) -> String {
        let content = String::from_utf8(prepared.to_mime().unwrap()).unwrap();
        let end = content.find("\r\n\r\n").unwrap();
        content[..end].to_string()
    }

    fn decode_words(value: &str) -> String {
        let mut bytes = Vec::new();
        for word in value.split(' ') {
            assert!(word.len() <= 75, "encoded-word too long: {}", word);
            let payload = word
                .strip_prefix("=?UTF-8?B?")
                .and_then(|w| w.strip_suffix("?="))
                .unwrap();
            bytes.extend(BASE64.decode(payload).unwrap());
        }
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_long_non_ascii_subject_is_split_into_words() {
        let subject = "é".repeat(60);
        let mut message = sample();
        message.subject(subject.as_str());
        let prepared = PreparedMessage::prepare(&message).unwrap();

        let headers = header_block(&prepared);
        assert!(headers.split("\r\n").all(|line| line.len() <= 78));

        let unfolded = headers.replace("\r\n ", " ");
        let value = unfolded
            .split("\r\n")
            .find_map(|line| line.strip_prefix("Subject: "))
            .unwrap();
        assert!(value.split(' ').count() > 1);
        assert_eq!(decode_words(value), subject);
    }

    #[test]
    fn test_non_ascii_display_names_are_encoded() {
        let mut message = Message::new();
        message
            .from(("sender@example.com", "José Müller"))
            .to(("a@example.com", "Zoë, Q"))
            .cc(("c@example.com", "Plain Name"))
            .subject("Hi")
            .text("Hello World!");
        let prepared = PreparedMessage::prepare(&message).unwrap();

        let headers = header_block(&prepared);
        assert!(headers.is_ascii());
        assert!(headers.contains(&format!(
            "From: =?UTF-8?B?{}?= <sender@example.com>",
            BASE64.encode("José Müller")
        )));
        assert!(headers.contains(&format!(
            "To: =?UTF-8?B?{}?= <a@example.com>",
            BASE64.encode("Zoë, Q")
        )));
        assert!(headers.contains("Cc: Plain Name <c@example.com>"));
    }

    #[test]
    fn test_header_injection_is_rejected() {
        let mut message = sample();
        message.header("X-Bad", "value\r\nBcc: evil@example.com");
        let prepared = PreparedMessage::prepare(&message).unwrap();
        assert!(prepared.to_mime().unwrap_err().is_serialization());
    }

    #[test]
    fn test_dot_stuffing() {
        let output = dot_stuff(b"Hello\r\n.World\r\n..Test\r\n");
        let output = String::from_utf8_lossy(&output);
        assert!(output.contains("\r\n..World"));
        assert!(output.contains("\r\n...Test"));
        assert!(output.ends_with("\r\n.\r\n"));
    }

    #[test]
    fn test_strip_angle_brackets() {
        assert_eq!(strip_angle_brackets("<id@x>"), "id@x");
        assert_eq!(strip_angle_brackets("id@x"), "id@x");
        assert_eq!(strip_angle_brackets("<<id@x>>"), "<id@x>");
    }

    #[test]
    fn test_reply_to_header() {
        let mut message = sample();
        message.reply_to(AddressEntry::with_name("support@example.com", "Support"));
        let prepared = PreparedMessage::prepare(&message).unwrap();
        let content = String::from_utf8(prepared.to_mime().unwrap()).unwrap();
        assert!(content.contains("Reply-To: Support <support@example.com>\r\n"));
    }
}
