//! Composition of the single-part HTML message sent after DATA.

use std::fmt::Write;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};

/// Longest run of raw bytes put into one RFC 2047 encoded word, keeping each word under 76 chars.
const ENCODED_WORD_BYTES: usize = 45;

/// One transactional email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    /// `From` header shown to the recipient. Falls back to the configured from address. Never
    /// used as the envelope sender.
    pub display_from: Option<String>,
    pub reply_to: Option<String>,
}

impl OutboundMessage {
    #[must_use]
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        html_body: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            html_body: html_body.into(),
            display_from: None,
            reply_to: None,
        }
    }

    #[must_use]
    pub fn from(mut self, display_from: impl Into<String>) -> Self {
        self.display_from = Some(display_from.into());
        self
    }

    #[must_use]
    pub fn reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Builds the bytes that follow `DATA`, up to and including the lone `.` line.
    ///
    /// Headers come in a fixed order: `From`, `To`, `Subject`, `MIME-Version`, `Content-Type`,
    /// `Date` and, only when it differs from `From`, `Reply-To`. Body lines are normalised to CRLF
    /// and dot-stuffed.
    #[must_use]
    pub fn compose(&self, display_from: &str, date: DateTime<Utc>) -> Vec<u8> {
        let mut message = String::with_capacity(self.html_body.len() + 512);

        let _ = write!(message, "From: {}\r\n", encode_mailbox(display_from));
        let _ = write!(message, "To: {}\r\n", encode_mailbox(&self.to));
        let _ = write!(message, "Subject: {}\r\n", encode_text(&self.subject));
        message.push_str("MIME-Version: 1.0\r\n");
        message.push_str("Content-Type: text/html; charset=utf-8\r\n");
        let _ = write!(
            message,
            "Date: {}\r\n",
            date.format("%a, %d %b %Y %H:%M:%S GMT")
        );
        if let Some(reply_to) = self.reply_to.as_deref()
            && reply_to != display_from
        {
            let _ = write!(message, "Reply-To: {}\r\n", encode_mailbox(reply_to));
        }
        message.push_str("\r\n");

        for line in self.html_body.lines() {
            if line.starts_with('.') {
                message.push('.');
            }
            message.push_str(line);
            message.push_str("\r\n");
        }
        message.push_str(".\r\n");

        message.into_bytes()
    }
}

/// Header values are single line; a stray CR or LF would start a new header.
fn header_value(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// RFC 2047 B-encodes non-ASCII text, folding across several encoded words when needed.
fn encode_text(text: &str) -> String {
    let text = header_value(text);
    if text.is_ascii() {
        return text;
    }

    encode_words(&text)
}

/// Encodes the display name of a `Name <address>` mailbox. The address itself is left alone, a
/// non-ASCII address needs SMTPUTF8 which is not negotiated.
fn encode_mailbox(mailbox: &str) -> String {
    let mailbox = header_value(mailbox);
    if mailbox.is_ascii() {
        return mailbox;
    }

    if let Some((name, address)) = mailbox.rsplit_once('<')
        && address.ends_with('>')
    {
        let name = name.trim().trim_matches('"');
        if !name.is_empty() && !name.is_ascii() {
            return format!("{} <{address}", encode_words(name));
        }
    }

    mailbox
}

fn encode_words(text: &str) -> String {
    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (idx, c) in text.char_indices() {
        if idx + c.len_utf8() - start > ENCODED_WORD_BYTES {
            words.push(&text[start..end]);
            start = idx;
        }
        end = idx + c.len_utf8();
    }
    words.push(&text[start..end]);

    words
        .into_iter()
        .map(|word| format!("=?UTF-8?B?{}?=", STANDARD.encode(word)))
        .collect::<Vec<_>>()
        .join("\r\n ")
}
