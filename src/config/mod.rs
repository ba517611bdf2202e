//! SMTP account configuration.
//!
//! The configuration is supplied from outside on every send. Where it comes from is the business of a
//! [`ConfigSource`]; this crate only checks that it is complete before touching the network.

mod source;
mod timeouts;

use core::fmt;

use serde::{Deserialize, Serialize};

pub use source::{ConfigError, ConfigSource, StaticConfig, TomlFile};
pub use timeouts::ClientTimeouts;

use crate::error::{Result, SendError};

/// Everything needed to submit one message through an authenticated SMTP account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Account name. Also used as the envelope sender, since providers reject `MAIL FROM`
    /// addresses that do not belong to the authenticated account.
    pub username: String,
    pub password: String,
    /// Default `From` header when a message does not set its own.
    pub from_address: String,
    /// Upgrade the connection with STARTTLS before authenticating.
    #[serde(default)]
    pub use_tls: bool,

    /// Name announced in EHLO.
    #[serde(default = "default_helo_name")]
    pub helo_name: String,
    /// Skip certificate verification. Only meant for test servers with self-signed certificates.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default)]
    pub timeouts: ClientTimeouts,
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from_address", &self.from_address)
            .field("use_tls", &self.use_tls)
            .field("helo_name", &self.helo_name)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

fn default_helo_name() -> String {
    String::from("localhost")
}

impl SmtpConfig {
    /// Creates a configuration with default EHLO name, certificate checks and timeouts.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        from_address: impl Into<String>,
        use_tls: bool,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            from_address: from_address.into(),
            use_tls,
            helo_name: default_helo_name(),
            accept_invalid_certs: false,
            timeouts: ClientTimeouts::default(),
        }
    }

    /// Checks that every required field is present.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::ConfigIncomplete`] naming each missing field.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("host", self.host.trim().is_empty()),
            ("port", self.port == 0),
            ("username", self.username.is_empty()),
            ("password", self.password.is_empty()),
            ("from_address", self.from_address.trim().is_empty()),
        ]
        .into_iter()
        .filter_map(|(field, absent)| absent.then_some(field))
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SendError::ConfigIncomplete(format!(
                "missing {}",
                missing.join(", ")
            )))
        }
    }

    /// `host:port` as handed to the resolver. IPv6 literals are bracketed.
    #[must_use]
    pub fn server_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
