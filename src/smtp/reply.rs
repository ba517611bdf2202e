//! SMTP reply parsing.
//!
//! A reply is one or more lines sharing the same three digit code. Every line but the last has a `-`
//! after the code, the last has a space (or nothing at all).

use crate::error::{Result, SendError};

/// A single physical reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    /// The SMTP status code (e.g., 220, 250, 550).
    pub code: u16,
    /// Whether this line ends the reply.
    pub is_final: bool,
    /// The text following the code and separator.
    pub text: String,
}

/// A complete, possibly multi-line, SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// All lines joined by newlines.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// Positive completion or intermediate (2xx/3xx). Anything from 400 up is a failure.
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.code >= 200 && self.code < 400
    }

    /// Positive completion (2xx).
    #[must_use]
    pub const fn is_completion(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// Parses a single line, without its line ending.
    ///
    /// # Errors
    ///
    /// [`SendError::UnknownServerReply`] if the line does not start with a three digit code, or the
    /// code is followed by something other than a space or `-`.
    pub fn parse_line(line: &str) -> Result<ReplyLine> {
        let bytes = line.as_bytes();
        if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
            return Err(SendError::UnknownServerReply(line.to_string()));
        }

        let code = u16::from(bytes[0] - b'0') * 100
            + u16::from(bytes[1] - b'0') * 10
            + u16::from(bytes[2] - b'0');
        if !(100..600).contains(&code) {
            return Err(SendError::UnknownServerReply(line.to_string()));
        }

        let is_final = match bytes.get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(_) => return Err(SendError::UnknownServerReply(line.to_string())),
        };

        Ok(ReplyLine {
            code,
            is_final,
            text: line.get(4..).unwrap_or_default().to_string(),
        })
    }

    /// Parses one complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes it occupied, or `None` when the final line has not
    /// arrived yet. Both CRLF and bare LF line endings are accepted.
    ///
    /// # Errors
    ///
    /// [`SendError::UnknownServerReply`] if a complete line is malformed, is not UTF-8, or carries a
    /// different code than the first line of the reply.
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let text = std::str::from_utf8(raw).map_err(|_| {
                SendError::UnknownServerReply(String::from_utf8_lossy(raw).into_owned())
            })?;

            let line = Self::parse_line(text)?;
            match code {
                Some(first) if first != line.code => {
                    return Err(SendError::UnknownServerReply(format!(
                        "status code mismatch in multi-line reply: expected {first}, got {text}"
                    )));
                }
                Some(_) => {}
                None => code = Some(line.code),
            }

            lines.push(line.text);

            if line.is_final {
                return Ok(code.map(|code| (Self::new(code, lines), consumed)));
            }
        }

        Ok(None)
    }
}
