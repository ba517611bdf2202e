//! Error taxonomy for a single send.
//!
//! Every failure is fatal to the send that produced it. The variants mirror the step that failed so a
//! caller can decide whether retrying at a higher level makes sense, and they keep the raw server text
//! so an administrator sees what the server actually said.

use core::fmt;

use thiserror::Error;

/// The kind of failure, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigIncomplete,
    ConnectionFailed,
    Timeout,
    TlsUpgradeFailed,
    AuthenticationFailed,
    SenderRejected,
    RecipientRejected,
    MessageRejected,
    UnknownServerReply,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ConfigIncomplete => "ConfigIncomplete",
            Self::ConnectionFailed => "ConnectionFailed",
            Self::Timeout => "Timeout",
            Self::TlsUpgradeFailed => "TLSUpgradeFailed",
            Self::AuthenticationFailed => "AuthenticationFailed",
            Self::SenderRejected => "SenderRejected",
            Self::RecipientRejected => "RecipientRejected",
            Self::MessageRejected => "MessageRejected",
            Self::UnknownServerReply => "UnknownServerReply",
        })
    }
}

/// A server reply that ended a send, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Reply code, or `None` when the failure was detected before anything was sent.
    pub code: Option<u16>,
    /// Raw reply text with continuation lines joined by newlines.
    pub message: String,
}

impl Rejection {
    #[must_use]
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn local(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{code} {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Errors that can end a send.
#[derive(Debug, Error)]
pub enum SendError {
    /// One or more required configuration fields are missing.
    #[error("SMTP configuration incomplete: {0}")]
    ConfigIncomplete(String),

    /// Could not open the connection, or the server refused the session.
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        message: String,
        server_text: Option<String>,
    },

    /// A read, write or connect did not finish in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// STARTTLS was refused or the handshake failed.
    #[error("TLS upgrade failed: {message}")]
    TlsUpgradeFailed {
        message: String,
        server_text: Option<String>,
    },

    /// AUTH LOGIN was not accepted.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(Rejection),

    /// `MAIL FROM` was refused.
    #[error("Sender rejected: {0}")]
    SenderRejected(Rejection),

    /// `RCPT TO` was refused.
    #[error("Recipient rejected: {0}")]
    RecipientRejected(Rejection),

    /// `DATA` or the message content was refused.
    #[error("Message rejected: {0}")]
    MessageRejected(Rejection),

    /// The server sent something that is not an SMTP reply.
    #[error("Unknown server reply: {0}")]
    UnknownServerReply(String),
}

impl SendError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigIncomplete(_) => ErrorKind::ConfigIncomplete,
            Self::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::TlsUpgradeFailed { .. } => ErrorKind::TlsUpgradeFailed,
            Self::AuthenticationFailed(_) => ErrorKind::AuthenticationFailed,
            Self::SenderRejected(_) => ErrorKind::SenderRejected,
            Self::RecipientRejected(_) => ErrorKind::RecipientRejected,
            Self::MessageRejected(_) => ErrorKind::MessageRejected,
            Self::UnknownServerReply(_) => ErrorKind::UnknownServerReply,
        }
    }

    /// The last raw text the server sent before the failure, if any.
    #[must_use]
    pub fn server_text(&self) -> Option<&str> {
        match self {
            Self::ConnectionFailed { server_text, .. } | Self::TlsUpgradeFailed { server_text, .. } => {
                server_text.as_deref()
            }
            Self::AuthenticationFailed(rejection)
            | Self::SenderRejected(rejection)
            | Self::RecipientRejected(rejection)
            | Self::MessageRejected(rejection) => {
                rejection.code.map(|_| rejection.message.as_str())
            }
            Self::UnknownServerReply(raw) => Some(raw.as_str()),
            Self::ConfigIncomplete(_) | Self::Timeout(_) => None,
        }
    }

    /// Whether the failure was decided at the command level, by a server reply or by a local check
    /// between commands, rather than by a transport, timeout or parse failure.
    ///
    /// Only in that case is the command stream still in sync and a polite `QUIT` worth sending.
    #[must_use]
    pub const fn is_protocol_level(&self) -> bool {
        match self {
            Self::AuthenticationFailed(_)
            | Self::SenderRejected(_)
            | Self::RecipientRejected(_)
            | Self::MessageRejected(_) => true,
            Self::ConnectionFailed { server_text, .. }
            | Self::TlsUpgradeFailed { server_text, .. } => server_text.is_some(),
            Self::ConfigIncomplete(_) | Self::Timeout(_) | Self::UnknownServerReply(_) => false,
        }
    }

    pub(crate) fn connection(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
            server_text: None,
        }
    }

    pub(crate) fn refused(message: impl Into<String>, server_text: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
            server_text: Some(server_text.into()),
        }
    }

    pub(crate) fn tls(message: impl Into<String>) -> Self {
        Self::TlsUpgradeFailed {
            message: message.into(),
            server_text: None,
        }
    }
}

impl From<std::io::Error> for SendError {
    fn from(err: std::io::Error) -> Self {
        Self::connection(err.to_string())
    }
}

/// Specialized `Result` type for sending.
pub type Result<T> = std::result::Result<T, SendError>;
