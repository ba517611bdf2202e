//! Entry points for sending one message.

use chrono::Utc;

use crate::{
    config::{ConfigError, ConfigSource, SmtpConfig},
    error::{Rejection, Result, SendError},
    smtp::{Delivery, OutboundMessage, SmtpSession, session::is_envelope_safe},
};

/// Sends `message` through the account described by `config`.
///
/// The configuration and addresses are checked before anything touches the network. Exactly one
/// connection is opened, and it is closed again before this returns, whatever the outcome.
///
/// # Errors
///
/// A [`SendError`] describing the first step that failed. Nothing is retried.
#[tracing::instrument(
    level = "info",
    skip_all,
    fields(server = %config.server_address(), to = %message.to)
)]
pub async fn send_email(config: &SmtpConfig, message: &OutboundMessage) -> Result<Delivery> {
    config.validate()?;

    if !is_envelope_safe(&message.to) {
        return Err(SendError::RecipientRejected(Rejection::local(format!(
            "invalid recipient address {:?}",
            message.to
        ))));
    }
    if !is_envelope_safe(&config.username) {
        return Err(SendError::SenderRejected(Rejection::local(format!(
            "account name {:?} cannot be used as envelope sender",
            config.username
        ))));
    }

    let display_from = message
        .display_from
        .as_deref()
        .filter(|from| !from.trim().is_empty())
        .unwrap_or(&config.from_address);
    let payload = message.compose(display_from, Utc::now());

    SmtpSession::connect(config)
        .await?
        .run(&message.to, &payload)
        .await
}

/// Loads the configuration from `source`, once, and sends `message` with it.
///
/// # Errors
///
/// [`SendError::ConfigIncomplete`] when the source has no usable configuration, otherwise as
/// [`send_email`].
pub async fn send_email_from(
    source: &dyn ConfigSource,
    message: &OutboundMessage,
) -> Result<Delivery> {
    let config = source.load().await.map_err(|err| match err {
        ConfigError::NotFound => {
            SendError::ConfigIncomplete("no SMTP configuration found".to_string())
        }
        other => SendError::ConfigIncomplete(other.to_string()),
    })?;

    send_email(&config, message).await
}
