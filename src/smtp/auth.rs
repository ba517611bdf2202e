//! AUTH LOGIN (draft-murchison-sasl-login).

use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};

use super::{channel::CommandChannel, reply::Reply};
use crate::error::{Rejection, Result, SendError};

/// Server is waiting for the next base64 line.
const AUTH_CONTINUE: u16 = 334;
/// Authentication succeeded.
const AUTH_SUCCESS: u16 = 235;

/// Runs the AUTH LOGIN exchange.
///
/// Credentials go over the wire as the standard base64 encoding of their UTF-8 bytes, untouched.
///
/// # Errors
///
/// [`SendError::AuthenticationFailed`] carrying the server's reply when any step answers with an
/// unexpected code. Transport failures are passed through unchanged.
pub async fn authenticate(
    channel: &mut CommandChannel,
    username: &str,
    password: &str,
    timeout: Duration,
) -> Result<()> {
    let reply = channel.command("AUTH LOGIN", timeout).await?;
    expect(&reply, AUTH_CONTINUE)?;

    let reply = channel.secret(&STANDARD.encode(username), timeout).await?;
    expect(&reply, AUTH_CONTINUE)?;

    let reply = channel.secret(&STANDARD.encode(password), timeout).await?;
    expect(&reply, AUTH_SUCCESS)?;

    crate::internal!(level = DEBUG, "Authenticated as {username}");
    Ok(())
}

fn expect(reply: &Reply, code: u16) -> Result<()> {
    if reply.code == code {
        Ok(())
    } else {
        Err(SendError::AuthenticationFailed(Rejection::new(
            reply.code,
            reply.message(),
        )))
    }
}
