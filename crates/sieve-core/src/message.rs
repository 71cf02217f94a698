use crate::error::{Result, SieveError};
use mailparse::{MailAddr, ParsedMail};
use serde::Serialize;
use std::fmt;

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A parsed `local@domain` mail address.
///
/// Two addresses are the same recipient when their local parts are equal and
/// their domains are equal ignoring case.
#[derive(Debug, Clone, Serialize)]
pub struct Address {
    pub local_part: String,
    pub domain: String,
}

impl Address {
    /// Parse either a bare address or a `Display Name <addr>` form.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| SieveError::InvalidAddress {
            address: crate::sanitize::sanitize(raw, 128),
            reason: reason.to_string(),
        };

        let list = mailparse::addrparse(raw).map_err(|e| invalid(&e.to_string()))?;
        let addr = match list.iter().collect::<Vec<_>>().as_slice() {
            [MailAddr::Single(info)] => info.addr.clone(),
            [MailAddr::Group(_)] => return Err(invalid("group syntax is not allowed")),
            [] => return Err(invalid("empty address")),
            _ => return Err(invalid("expected a single address")),
        };

        let Some((local, domain)) = addr.rsplit_once('@') else {
            return Err(invalid("missing domain"));
        };
        if local.is_empty() {
            return Err(invalid("empty local part"));
        }
        if domain.is_empty() || domain.starts_with('.') || domain.ends_with('.') {
            return Err(invalid("invalid domain"));
        }
        if addr.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(invalid("invalid characters"));
        }

        Ok(Self {
            local_part: local.to_string(),
            domain: domain.to_string(),
        })
    }

    /// Identity used for duplicate detection.
    pub fn key(&self) -> (String, String) {
        (self.local_part.clone(), self.domain.to_ascii_lowercase())
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.local_part == other.local_part && self.domain.eq_ignore_ascii_case(&other.domain)
    }
}

impl Eq for Address {}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

// ---------------------------------------------------------------------------
// MessageData
// ---------------------------------------------------------------------------

/// The message being filtered, with its envelope.
#[derive(Debug, Clone)]
pub struct MessageData {
    raw: Vec<u8>,
    headers: Vec<(String, String)>,
    text: String,
    pub envelope_sender: Option<String>,
    pub envelope_recipient: Option<String>,
}

impl MessageData {
    pub fn parse(
        raw: impl Into<Vec<u8>>,
        envelope_sender: Option<&str>,
        envelope_recipient: Option<&str>,
    ) -> Result<Self> {
        let raw = raw.into();
        let (headers, text) = {
            let parsed = mailparse::parse_mail(&raw)?;
            let headers = parsed
                .headers
                .iter()
                .map(|h| (h.get_key(), h.get_value()))
                .collect();
            (headers, first_text_part(&parsed).unwrap_or_default())
        };
        Ok(Self {
            raw,
            headers,
            text,
            envelope_sender: envelope_sender.map(str::to_owned),
            envelope_recipient: envelope_recipient.map(str::to_owned),
        })
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// First value of header `name`, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn subject(&self) -> Option<&str> {
        self.header("Subject")
    }

    pub fn from(&self) -> Option<&str> {
        self.header("From")
    }

    pub fn message_id(&self) -> Option<&str> {
        self.header("Message-ID")
    }

    /// Decoded body of the first `text/plain` part.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// True if any `Auto-Submitted` header has a value other than `no`.
    pub fn is_auto_submitted(&self) -> bool {
        self.header_all("Auto-Submitted")
            .any(|v| !v.trim().eq_ignore_ascii_case("no"))
    }
}

fn first_text_part(mail: &ParsedMail<'_>) -> Option<String> {
    if mail.subparts.is_empty() {
        let is_text = mail.ctype.mimetype.eq_ignore_ascii_case("text/plain");
        return if is_text { mail.get_body().ok() } else { None };
    }
    mail.subparts.iter().find_map(first_text_part)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "From: Alice <alice@example.org>\r\n\
                          To: bob@example.com\r\n\
                          Subject: Lunch\r\n\
                          Message-ID: <1234@example.org>\r\n\
                          \r\n\
                          Meet at noon?\r\n";

    #[test]
    fn parses_headers_and_body() {
        let msg = MessageData::parse(SIMPLE, Some("alice@example.org"), None).unwrap();
        assert_eq!(msg.subject(), Some("Lunch"));
        assert_eq!(msg.from(), Some("Alice <alice@example.org>"));
        assert_eq!(msg.message_id(), Some("<1234@example.org>"));
        assert_eq!(msg.header("subject"), Some("Lunch"));
        assert!(msg.text().starts_with("Meet at noon?"));
        assert_eq!(msg.envelope_sender.as_deref(), Some("alice@example.org"));
        assert!(!msg.is_auto_submitted());
    }

    #[test]
    fn multipart_uses_first_plain_part() {
        let raw = "Subject: multi\r\n\
                   MIME-Version: 1.0\r\n\
                   Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
                   \r\n\
                   --b1\r\n\
                   Content-Type: text/html\r\n\
                   \r\n\
                   <p>html</p>\r\n\
                   --b1\r\n\
                   Content-Type: text/plain\r\n\
                   \r\n\
                   plain text\r\n\
                   --b1--\r\n";
        let msg = MessageData::parse(raw, None, None).unwrap();
        assert!(msg.text().starts_with("plain text"));
    }

    #[test]
    fn auto_submitted_detection() {
        let no = "Auto-Submitted: no\r\nSubject: x\r\n\r\nbody\r\n";
        let yes = "Auto-Submitted: auto-replied\r\nSubject: x\r\n\r\nbody\r\n";
        assert!(!MessageData::parse(no, None, None).unwrap().is_auto_submitted());
        assert!(MessageData::parse(yes, None, None).unwrap().is_auto_submitted());
    }

    #[test]
    fn address_parse_forms() {
        let bare = Address::parse("bob@Example.COM").unwrap();
        assert_eq!(bare.local_part, "bob");
        assert_eq!(bare.domain, "Example.COM");

        let named = Address::parse("Bob <bob@example.com>").unwrap();
        assert_eq!(named, bare);
        assert_eq!(named.key(), ("bob".to_string(), "example.com".to_string()));
    }

    #[test]
    fn address_local_part_is_case_sensitive() {
        let a = Address::parse("Bob@example.com").unwrap();
        let b = Address::parse("bob@example.com").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn address_rejects_garbage() {
        assert!(Address::parse("not-an-address").is_err());
        assert!(Address::parse("@example.com").is_err());
        assert!(Address::parse("a@b.com, c@d.com").is_err());
        assert!(matches!(
            Address::parse("nobody@"),
            Err(SieveError::InvalidAddress { .. })
        ));
    }
}
