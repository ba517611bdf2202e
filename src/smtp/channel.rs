//! Line oriented command/reply exchange over one connection.

use std::time::Duration;

use tokio::net::TcpStream;

use super::{connection::Connection, reply::Reply};
use crate::error::{Result, SendError};

/// Initial size of the read buffer for SMTP replies.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer to prevent unbounded growth (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Message content is written in pieces of this size, each with its own timeout.
const WRITE_CHUNK_SIZE: usize = 64 * 1024;

/// Sends command lines and reads back complete replies.
///
/// The channel does not judge replies; that is up to whoever sent the command. Every read is bounded
/// by the timeout passed with the command, and an elapsed timeout is reported as
/// [`SendError::Timeout`] rather than as a rejection.
pub struct CommandChannel {
    connection: Option<Connection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
}

impl CommandChannel {
    /// Opens a TCP connection to `addr`.
    ///
    /// # Errors
    ///
    /// [`SendError::Timeout`] if the connection is not established within `timeout`, otherwise
    /// [`SendError::ConnectionFailed`].
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| SendError::Timeout(format!("connecting to {addr} after {timeout:?}")))?
            .map_err(|e| SendError::connection(format!("failed to connect to {addr}: {e}")))?;

        if let Err(err) = stream.set_nodelay(true) {
            crate::internal!(level = DEBUG, "Unable to set TCP_NODELAY: {err}");
        }

        Ok(Self::from_connection(Connection::Plain(stream)))
    }

    const fn from_connection(connection: Connection) -> Self {
        Self {
            connection: Some(connection),
            buffer: Vec::new(),
            buffer_pos: 0,
        }
    }

    /// Whether the connection has been upgraded with STARTTLS.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_tls)
    }

    /// Whether the connection is still held.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Sends `command` followed by CRLF and reads the reply.
    ///
    /// # Errors
    ///
    /// Fails on write or read errors, on timeout, or on a malformed reply.
    pub async fn command(&mut self, command: &str, timeout: Duration) -> Result<Reply> {
        crate::outgoing!("{command}");
        self.write_line(command, timeout).await?;
        self.read_reply(timeout).await
    }

    /// Like [`CommandChannel::command`], but the line never reaches the logs.
    ///
    /// # Errors
    ///
    /// Fails on write or read errors, on timeout, or on a malformed reply.
    pub async fn secret(&mut self, line: &str, timeout: Duration) -> Result<Reply> {
        crate::outgoing!("<redacted>");
        self.write_line(line, timeout).await?;
        self.read_reply(timeout).await
    }

    /// Writes an already encoded message payload, including its terminating dot line, and reads
    /// the reply to it. `timeout` bounds each chunk written, not the whole payload.
    ///
    /// # Errors
    ///
    /// Fails on write or read errors, on timeout, or on a malformed reply.
    pub async fn send_data(&mut self, payload: &[u8], timeout: Duration) -> Result<Reply> {
        crate::outgoing!("<{} bytes of message content>", payload.len());
        self.write(payload, timeout).await?;
        self.read_reply(timeout).await
    }

    /// Reads one complete reply, waiting for continuation lines until the final line arrives.
    ///
    /// # Errors
    ///
    /// [`SendError::Timeout`] if a single read takes longer than `timeout`,
    /// [`SendError::UnknownServerReply`] for malformed or oversized replies, and
    /// [`SendError::ConnectionFailed`] for I/O errors or a closed connection.
    pub async fn read_reply(&mut self, timeout: Duration) -> Result<Reply> {
        loop {
            if let Some((reply, consumed)) = Reply::parse(&self.buffer[..self.buffer_pos])? {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                crate::incoming!("{} {}", reply.code, reply.message());
                return Ok(reply);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = (self.buffer.len() * 2).max(BUFFER_SIZE);
                if new_size > MAX_BUFFER_SIZE {
                    return Err(SendError::UnknownServerReply(format!(
                        "reply too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or_else(|| SendError::connection("connection already closed"))?;
            let n = tokio::time::timeout(
                timeout,
                connection.read(&mut self.buffer[self.buffer_pos..]),
            )
            .await
            .map_err(|_| SendError::Timeout(format!("no reply from server after {timeout:?}")))??;
            self.buffer_pos += n;
        }
    }

    /// Replaces the plain connection with a TLS session over the same socket.
    ///
    /// Must only be called after the server accepted STARTTLS. Anything the server sent after that
    /// reply arrived in plaintext and cannot be trusted, so it aborts the upgrade.
    ///
    /// # Errors
    ///
    /// [`SendError::TlsUpgradeFailed`] when the handshake fails or unexpected data is buffered,
    /// [`SendError::Timeout`] when the handshake does not finish within `timeout`.
    pub async fn upgrade(
        &mut self,
        domain: &str,
        accept_invalid_certs: bool,
        timeout: Duration,
    ) -> Result<()> {
        if self.buffer_pos != 0 {
            return Err(SendError::tls(format!(
                "server sent {} unexpected bytes after accepting STARTTLS",
                self.buffer_pos
            )));
        }

        let connection = self
            .connection
            .take()
            .ok_or_else(|| SendError::connection("connection already closed"))?;

        let upgraded = tokio::time::timeout(
            timeout,
            connection.upgrade_to_tls(domain, accept_invalid_certs),
        )
        .await
        .map_err(|_| SendError::Timeout(format!("TLS handshake after {timeout:?}")))??;

        self.connection = Some(upgraded);
        Ok(())
    }

    /// Shuts the connection down. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.shutdown().await;
        }
        self.buffer_pos = 0;
    }

    async fn write_line(&mut self, line: &str, timeout: Duration) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + 2);
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(b"\r\n");
        self.write(&data, timeout).await
    }

    async fn write(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| SendError::connection("connection already closed"))?;

        for chunk in data.chunks(WRITE_CHUNK_SIZE) {
            tokio::time::timeout(timeout, connection.write_all(chunk))
                .await
                .map_err(|_| SendError::Timeout(format!("writing to server after {timeout:?}")))??;
        }

        Ok(())
    }
}
