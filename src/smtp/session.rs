//! The submission state machine for one message over one connection.

use core::fmt;

use super::{auth, channel::CommandChannel, extensions::Capabilities, reply::Reply};
use crate::{
    config::SmtpConfig,
    error::{Rejection, Result, SendError},
};

/// Service ready, also the go-ahead for the TLS handshake.
const SERVICE_READY: u16 = 220;
/// Requested action completed.
const OK: u16 = 250;
/// Start mail input.
const START_MAIL_INPUT: u16 = 354;

/// Where a session is in the submission sequence.
///
/// Each state is only reached once the previous one succeeded. Any failure goes straight to
/// [`State::Closed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Connected,
    Greeted,
    TlsUpgraded,
    ReGreeted,
    Authenticated,
    SenderAccepted,
    RecipientAccepted,
    DataAccepted,
    BodySent,
    Closed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The outcome of a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Text of the final `250` after the message content.
    pub server_reply: String,
    /// Whether the message went over a STARTTLS-upgraded connection.
    pub tls: bool,
}

/// Owns the connection for exactly one message and closes it on every exit path.
pub struct SmtpSession<'a> {
    config: &'a SmtpConfig,
    channel: CommandChannel,
    capabilities: Capabilities,
    state: State,
}

impl<'a> SmtpSession<'a> {
    /// Opens the connection to the configured server.
    ///
    /// # Errors
    ///
    /// [`SendError::ConnectionFailed`] or [`SendError::Timeout`] if the server cannot be reached.
    pub async fn connect(config: &'a SmtpConfig) -> Result<Self> {
        let channel =
            CommandChannel::connect(&config.server_address(), config.timeouts.connect()).await?;

        crate::internal!(level = DEBUG, "Connected to {}", config.server_address());

        Ok(Self {
            config,
            channel,
            capabilities: Capabilities::default(),
            state: State::Connected,
        })
    }

    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Runs the whole sequence for `recipient` and the composed `payload`, then closes the
    /// connection whatever the outcome.
    ///
    /// # Errors
    ///
    /// The error of the step that failed. The connection is closed before returning.
    pub async fn run(mut self, recipient: &str, payload: &[u8]) -> Result<Delivery> {
        let result = self.transact(recipient, payload).await;

        if let Err(err) = &result {
            crate::internal!(
                level = WARN,
                "Send failed after {} ({}): {err}",
                self.state,
                err.kind()
            );
        }

        self.close(result.as_ref().err()).await;
        result
    }

    async fn transact(&mut self, recipient: &str, payload: &[u8]) -> Result<Delivery> {
        self.greet().await?;

        if self.config.use_tls {
            self.start_tls().await?;
            self.regreet().await?;
        }

        self.authenticate().await?;
        self.check_size(payload.len())?;
        self.mail_from().await?;
        self.rcpt_to(recipient).await?;
        self.data().await?;
        self.send_body(payload).await
    }

    /// Connected -> Greeted: reads the 220 banner and sends EHLO.
    async fn greet(&mut self) -> Result<()> {
        let greeting = self
            .channel
            .read_reply(self.config.timeouts.command())
            .await?;
        if greeting.code != SERVICE_READY {
            return Err(SendError::refused(
                format!("server refused the session ({})", greeting.code),
                greeting.message(),
            ));
        }

        self.ehlo().await?;
        self.advance(State::Greeted);
        Ok(())
    }

    /// Greeted -> TlsUpgraded: STARTTLS and the handshake. Never falls back to plaintext.
    async fn start_tls(&mut self) -> Result<()> {
        if !self.capabilities.supports_starttls() {
            crate::internal!(
                level = WARN,
                "{} did not advertise STARTTLS, trying anyway",
                self.config.host
            );
        }

        let timeout = self.config.timeouts.command();
        let reply = self.channel.command("STARTTLS", timeout).await?;
        if reply.code != SERVICE_READY {
            return Err(SendError::TlsUpgradeFailed {
                message: format!("server rejected STARTTLS ({})", reply.code),
                server_text: Some(reply.message()),
            });
        }

        self.channel
            .upgrade(&self.config.host, self.config.accept_invalid_certs, timeout)
            .await?;

        crate::internal!(level = DEBUG, "TLS successfully negotiated via STARTTLS");
        self.advance(State::TlsUpgraded);
        Ok(())
    }

    /// TlsUpgraded -> ReGreeted: capabilities from before the upgrade no longer apply.
    async fn regreet(&mut self) -> Result<()> {
        self.capabilities = Capabilities::default();
        self.ehlo().await?;
        self.advance(State::ReGreeted);
        Ok(())
    }

    async fn ehlo(&mut self) -> Result<()> {
        let command = format!("EHLO {}", self.config.helo_name);
        let reply = self
            .channel
            .command(&command, self.config.timeouts.command())
            .await?;
        if reply.code != OK {
            return Err(SendError::refused(
                format!("server rejected EHLO ({})", reply.code),
                reply.message(),
            ));
        }

        self.capabilities = Capabilities::from_ehlo(&reply);
        Ok(())
    }

    /// -> Authenticated
    async fn authenticate(&mut self) -> Result<()> {
        if let Some(mechanisms) = self.capabilities.auth_mechanisms()
            && !mechanisms.iter().any(|mechanism| mechanism == "LOGIN")
        {
            return Err(SendError::AuthenticationFailed(Rejection::local(format!(
                "server does not offer AUTH LOGIN (offers: {})",
                mechanisms.join(" ")
            ))));
        }

        if !self.channel.is_tls() {
            crate::internal!(
                level = WARN,
                "Sending credentials for {} over an unencrypted connection",
                self.config.username
            );
        }

        auth::authenticate(
            &mut self.channel,
            &self.config.username,
            &self.config.password,
            self.config.timeouts.command(),
        )
        .await?;

        self.advance(State::Authenticated);
        Ok(())
    }

    fn check_size(&self, size: usize) -> Result<()> {
        match self.capabilities.max_size() {
            Some(max) if size > max => Err(SendError::MessageRejected(Rejection::local(format!(
                "message is {size} bytes, server accepts at most {max}"
            )))),
            _ => Ok(()),
        }
    }

    /// Authenticated -> SenderAccepted. The envelope sender is always the account name.
    async fn mail_from(&mut self) -> Result<()> {
        let command = format!("MAIL FROM:<{}>", self.config.username);
        let reply = self
            .channel
            .command(&command, self.config.timeouts.command())
            .await?;
        if !reply.is_positive() {
            return Err(SendError::SenderRejected(rejection(&reply)));
        }

        self.advance(State::SenderAccepted);
        Ok(())
    }

    /// SenderAccepted -> RecipientAccepted
    async fn rcpt_to(&mut self, recipient: &str) -> Result<()> {
        let command = format!("RCPT TO:<{recipient}>");
        let reply = self
            .channel
            .command(&command, self.config.timeouts.command())
            .await?;
        if !reply.is_positive() {
            return Err(SendError::RecipientRejected(rejection(&reply)));
        }

        self.advance(State::RecipientAccepted);
        Ok(())
    }

    /// RecipientAccepted -> DataAccepted
    async fn data(&mut self) -> Result<()> {
        let reply = self
            .channel
            .command("DATA", self.config.timeouts.command())
            .await?;
        if reply.code != START_MAIL_INPUT {
            return Err(SendError::MessageRejected(rejection(&reply)));
        }

        self.advance(State::DataAccepted);
        Ok(())
    }

    /// DataAccepted -> BodySent. Only the final 250 counts as delivered.
    async fn send_body(&mut self, payload: &[u8]) -> Result<Delivery> {
        let reply = self
            .channel
            .send_data(payload, self.config.timeouts.data())
            .await?;
        if reply.code != OK {
            return Err(SendError::MessageRejected(rejection(&reply)));
        }

        self.advance(State::BodySent);
        crate::internal!(level = INFO, "Message accepted: {}", reply.message());

        Ok(Delivery {
            server_reply: reply.message(),
            tls: self.channel.is_tls(),
        })
    }

    /// -> Closed. QUIT is only sent while the command stream is known to be in sync, and its
    /// outcome never changes the result of the send.
    async fn close(&mut self, failure: Option<&SendError>) {
        if failure.is_none_or(SendError::is_protocol_level) && self.channel.is_open() {
            let timeout = self.config.timeouts.quit();
            match self.channel.command("QUIT", timeout).await {
                Ok(reply) if reply.is_completion() => {}
                Ok(reply) => crate::internal!(
                    level = DEBUG,
                    "Server answered QUIT with {} {}",
                    reply.code,
                    reply.message()
                ),
                Err(err) => crate::internal!(level = DEBUG, "QUIT failed: {err}"),
            }
        }

        self.channel.close().await;
        self.advance(State::Closed);
    }

    fn advance(&mut self, next: State) {
        debug_assert!(next > self.state, "{} -> {next}", self.state);
        crate::internal!(level = DEBUG, "{} -> {next}", self.state);
        self.state = next;
    }
}

fn rejection(reply: &Reply) -> Rejection {
    Rejection::new(reply.code, reply.message())
}

/// Whether `address` can go between the angle brackets of `MAIL FROM`/`RCPT TO` as is.
pub(crate) fn is_envelope_safe(address: &str) -> bool {
    !address.trim().is_empty() && !address.chars().any(|c| matches!(c, '\r' | '\n' | '<' | '>'))
}
