use std::{io, path::PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use super::SmtpConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// No SMTP configuration has been stored yet.
    #[error("SMTP configuration not found")]
    NotFound,

    #[error("Failed to read SMTP configuration: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid SMTP configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Where the SMTP configuration lives.
///
/// Consulted once per send and never cached, so a changed configuration takes effect on the next
/// message.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Loads the current configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotFound`] when nothing has been configured, or another [`ConfigError`] when
    /// the stored configuration cannot be read.
    async fn load(&self) -> Result<SmtpConfig, ConfigError>;
}

/// A configuration held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticConfig(Option<SmtpConfig>);

impl StaticConfig {
    #[must_use]
    pub const fn new(config: SmtpConfig) -> Self {
        Self(Some(config))
    }

    /// A source with nothing configured.
    #[must_use]
    pub const fn empty() -> Self {
        Self(None)
    }
}

#[async_trait]
impl ConfigSource for StaticConfig {
    async fn load(&self) -> Result<SmtpConfig, ConfigError> {
        self.0.clone().ok_or(ConfigError::NotFound)
    }
}

/// A TOML file holding a single [`SmtpConfig`] table.
#[derive(Debug, Clone)]
pub struct TomlFile {
    path: PathBuf,
}

impl TomlFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigSource for TomlFile {
    async fn load(&self) -> Result<SmtpConfig, ConfigError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(ConfigError::NotFound),
            Err(err) => return Err(err.into()),
        };

        Ok(toml::from_str(&raw)?)
    }
}
