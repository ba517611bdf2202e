//! Service extensions advertised in the EHLO reply.

use core::fmt::{self, Display};

use super::reply::Reply;

/// A single extension keyword from an EHLO reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    /// STARTTLS (RFC 3207).
    Starttls,
    /// AUTH (RFC 4954) with the mechanisms the server offers, upper-cased.
    Auth(Vec<String>),
    /// SIZE (RFC 1870). `0` means no fixed limit.
    Size(usize),
    /// Anything else, kept verbatim.
    Other(String),
}

impl Display for Extension {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starttls => fmt.write_str("STARTTLS"),
            Self::Auth(mechanisms) => write!(fmt, "AUTH {}", mechanisms.join(" ")),
            Self::Size(0) => fmt.write_str("SIZE"),
            Self::Size(max) => write!(fmt, "SIZE {max}"),
            Self::Other(raw) => fmt.write_str(raw),
        }
    }
}

impl Extension {
    fn parse(line: &str) -> Self {
        let mut words = line.split_ascii_whitespace();
        let keyword = words.next().unwrap_or_default().to_ascii_uppercase();

        match keyword.as_str() {
            "STARTTLS" => Self::Starttls,
            "AUTH" => Self::Auth(words.map(str::to_ascii_uppercase).collect()),
            "SIZE" => Self::Size(words.next().and_then(|n| n.parse().ok()).unwrap_or(0)),
            _ => Self::Other(line.to_string()),
        }
    }
}

/// What the server said it supports, as of the latest EHLO.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    extensions: Vec<Extension>,
}

impl Capabilities {
    /// Reads the extensions from an EHLO reply. The first line is the server's greeting, not an
    /// extension.
    #[must_use]
    pub fn from_ehlo(reply: &Reply) -> Self {
        Self {
            extensions: reply
                .lines
                .iter()
                .skip(1)
                .filter(|line| !line.trim().is_empty())
                .map(|line| Extension::parse(line))
                .collect(),
        }
    }

    #[must_use]
    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.extensions.contains(&Extension::Starttls)
    }

    /// Mechanisms from the AUTH line, or `None` if AUTH was not advertised.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Option<&[String]> {
        self.extensions.iter().find_map(|extension| match extension {
            Extension::Auth(mechanisms) => Some(mechanisms.as_slice()),
            _ => None,
        })
    }

    #[must_use]
    pub fn max_size(&self) -> Option<usize> {
        self.extensions.iter().find_map(|extension| match extension {
            Extension::Size(max) if *max > 0 => Some(*max),
            _ => None,
        })
    }
}
