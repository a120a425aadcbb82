//! SMTP commands, replies and EHLO capabilities (RFC 5321).

use std::collections::HashSet;
use std::fmt;

use super::auth::AuthMethod;
use super::SmtpResult;
use crate::errors::{EnhancedStatusCode, SmtpError, SmtpErrorKind};

/// Commands issued by the relay client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    StartTls,
    Auth {
        mechanism: &'static str,
        initial_response: Option<String>,
    },
    /// A bare continuation line inside an AUTH exchange.
    AuthResponse(String),
    MailFrom {
        address: String,
        smtputf8: bool,
    },
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Quit,
}

impl SmtpCommand {
    /// Formats the command without the trailing CRLF.
    pub(crate) fn to_smtp_string(&self) -> String {
        match self {
            SmtpCommand::Ehlo(domain) => format!("EHLO {}", domain),
            SmtpCommand::Helo(domain) => format!("HELO {}", domain),
            SmtpCommand::StartTls => "STARTTLS".to_string(),
            SmtpCommand::Auth {
                mechanism,
                initial_response: Some(response),
            } => format!("AUTH {} {}", mechanism, response),
            SmtpCommand::Auth { mechanism, .. } => format!("AUTH {}", mechanism),
            SmtpCommand::AuthResponse(line) => line.clone(),
            SmtpCommand::MailFrom { address, smtputf8 } => {
                let mut cmd = format!("MAIL FROM:<{}>", address);
                if *smtputf8 {
                    cmd.push_str(" SMTPUTF8");
                }
                cmd
            }
            SmtpCommand::RcptTo(address) => format!("RCPT TO:<{}>", address),
            SmtpCommand::Data => "DATA".to_string(),
            SmtpCommand::Rset => "RSET".to_string(),
            SmtpCommand::Noop => "NOOP".to_string(),
            SmtpCommand::Quit => "QUIT".to_string(),
        }
    }

    /// Text safe to write to logs. Credentials are masked.
    pub(crate) fn log_string(&self) -> String {
        match self {
            SmtpCommand::Auth { mechanism, .. } => format!("AUTH {} ***", mechanism),
            SmtpCommand::AuthResponse(_) => "***".to_string(),
            other => other.to_smtp_string(),
        }
    }
}

/// A complete, possibly multiline, server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpResponse {
    /// Status code (e.g., 250, 354, 550).
    pub code: u16,
    /// Enhanced status code from the first line, if any.
    pub enhanced_code: Option<EnhancedStatusCode>,
    /// Reply text, one entry per line.
    pub lines: Vec<String>,
}

impl SmtpResponse {
    /// Parses a reply from its raw lines.
    pub fn parse(raw: &[String]) -> SmtpResult<Self> {
        let first = raw
            .first()
            .ok_or_else(|| SmtpError::new(SmtpErrorKind::InvalidResponse, "Empty response"))?;
        let code = parse_code(first)?;

        let mut lines = Vec::with_capacity(raw.len());
        let mut enhanced_code = None;
        for (i, line) in raw.iter().enumerate() {
            if parse_code(line)? != code {
                return Err(SmtpError::new(
                    SmtpErrorKind::InvalidResponse,
                    "Inconsistent status codes in multiline response",
                ));
            }
            let text = line.get(4..).unwrap_or("");
            if i == 0 {
                if let Some((esc, rest)) = split_enhanced_code(text) {
                    enhanced_code = Some(esc);
                    lines.push(rest.to_string());
                    continue;
                }
            }
            lines.push(text.to_string());
        }

        Ok(Self {
            code,
            enhanced_code,
            lines,
        })
    }

    /// Returns true for 2xx replies.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Returns true for 3xx replies.
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Returns the first line of text.
    pub fn first_line(&self) -> &str {
        self.lines.first().map(String::as_str).unwrap_or("")
    }

    /// Returns all lines joined with newlines.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Converts a negative reply into an error.
    pub fn to_error(&self) -> SmtpError {
        let err = SmtpError::from_reply(self.code, self.text());
        match &self.enhanced_code {
            Some(enhanced) => err.with_enhanced_code(enhanced.clone()),
            None => err,
        }
    }

    /// Returns `self` if the code matches, the reply as an error otherwise.
    pub(crate) fn expect_code(self, code: u16) -> SmtpResult<Self> {
        if self.code == code {
            Ok(self)
        } else {
            Err(self.to_error())
        }
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.first_line())
    }
}

fn parse_code(line: &str) -> SmtpResult<u16> {
    line.get(..3)
        .and_then(|code| code.parse().ok())
        .filter(|code| (200..600).contains(code))
        .ok_or_else(|| {
            SmtpError::new(
                SmtpErrorKind::InvalidResponse,
                format!("Invalid status line: {}", line),
            )
        })
}

fn split_enhanced_code(text: &str) -> Option<(EnhancedStatusCode, &str)> {
    let (candidate, rest) = text.split_once(' ').unwrap_or((text, ""));
    EnhancedStatusCode::parse(candidate).map(|code| (code, rest.trim()))
}

/// Returns true when `line` continues a multiline reply (`250-...`).
pub(crate) fn is_continuation(line: &str) -> bool {
    line.as_bytes().get(3) == Some(&b'-')
}

/// Extensions advertised in the EHLO reply.
#[derive(Debug, Clone, Default)]
pub struct EsmtpCapabilities {
    /// Maximum message size.
    pub size: Option<usize>,
    /// Advertised authentication mechanisms.
    pub auth_mechanisms: HashSet<AuthMethod>,
    /// STARTTLS offered.
    pub starttls: bool,
    /// 8BITMIME offered.
    pub eight_bit_mime: bool,
    /// PIPELINING offered.
    pub pipelining: bool,
    /// SMTPUTF8 offered.
    pub smtputf8: bool,
}

impl EsmtpCapabilities {
    /// Parses the EHLO reply. The first line is the server greeting.
    pub fn from_ehlo_response(response: &SmtpResponse) -> Self {
        let mut caps = Self::default();

        for line in response.lines.iter().skip(1) {
            let line = line.trim().to_uppercase();
            let (keyword, params) = line.split_once(' ').unwrap_or((line.as_str(), ""));

            match keyword {
                "SIZE" => caps.size = params.trim().parse().ok(),
                "AUTH" => caps.auth_mechanisms.extend(
                    params.split_whitespace().filter_map(AuthMethod::from_capability),
                ),
                "STARTTLS" => caps.starttls = true,
                "8BITMIME" => caps.eight_bit_mime = true,
                "PIPELINING" => caps.pipelining = true,
                "SMTPUTF8" => caps.smtputf8 = true,
                _ => {}
            }
        }

        caps
    }
}

/// Reply codes used by the client.
pub(crate) mod codes {
    pub const SERVICE_READY: u16 = 220;
    pub const AUTH_SUCCESS: u16 = 235;
    pub const OK: u16 = 250;
    pub const AUTH_CONTINUE: u16 = 334;
    pub const START_MAIL_INPUT: u16 = 354;
}
