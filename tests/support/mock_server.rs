//! Mock SMTP server for exercising the client end to end.
#![allow(dead_code)] // Test utility module - not all methods used in every test
//!
//! The server can:
//! - Answer each command with a configured reply, including multi-line EHLO
//! - Accept STARTTLS and continue over TLS with a self-signed certificate
//! - Record every line it receives, the raw message content and the byte count
//! - Hang on a given command to provoke client timeouts
//! - Track how many connections were accepted and how many are still open

use std::{
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer},
    },
};

/// SMTP command received by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    StartTls,
    AuthLogin,
    /// A base64 line sent during AUTH LOGIN
    AuthLine(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Raw message content after DATA, as received, without the terminating dot line
    MessageContent(Vec<u8>),
    Quit,
    Other(String),
}

impl SmtpCommand {
    /// Short name used when comparing command sequences.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Ehlo(_) => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::AuthLogin => "AUTH LOGIN",
            Self::AuthLine(_) => "<auth>",
            Self::MailFrom(_) => "MAIL",
            Self::RcptTo(_) => "RCPT",
            Self::Data => "DATA",
            Self::MessageContent(_) => "<content>",
            Self::Quit => "QUIT",
            Self::Other(_) => "<other>",
        }
    }
}

/// Response configuration for SMTP commands
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    pub code: u16,
    pub message: String,
}

impl SmtpResponse {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct EhloResponse {
    code: u16,
    capabilities: Vec<String>,
}

impl EhloResponse {
    fn to_bytes(&self) -> Vec<u8> {
        let mut response = String::new();
        let cap_count = self.capabilities.len();

        for (i, cap) in self.capabilities.iter().enumerate() {
            if i < cap_count - 1 {
                let _ = write!(&mut response, "{}-{}\r\n", self.code, cap);
            } else {
                let _ = write!(&mut response, "{} {}\r\n", self.code, cap);
            }
        }

        response.into_bytes()
    }
}

#[derive(Clone)]
struct MockServerConfig {
    greeting: SmtpResponse,
    ehlo_response: EhloResponse,
    starttls_response: SmtpResponse,
    tls_acceptor: Option<TlsAcceptor>,
    auth_responses: [SmtpResponse; 3],
    mail_from_response: SmtpResponse,
    rcpt_to_response: SmtpResponse,
    data_response: SmtpResponse,
    data_end_response: SmtpResponse,
    quit_response: SmtpResponse,

    // Failure injection
    timeout_on_command: Option<usize>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: SmtpResponse::new(220, "Mock SMTP Server"),
            ehlo_response: EhloResponse {
                code: 250,
                capabilities: vec![
                    "localhost".to_string(),
                    "SIZE 10000000".to_string(),
                    "AUTH LOGIN PLAIN".to_string(),
                ],
            },
            starttls_response: SmtpResponse::new(502, "Command not implemented"),
            tls_acceptor: None,
            auth_responses: [
                SmtpResponse::new(334, "VXNlcm5hbWU6"),
                SmtpResponse::new(334, "UGFzc3dvcmQ6"),
                SmtpResponse::new(235, "2.7.0 Authentication successful"),
            ],
            mail_from_response: SmtpResponse::new(250, "OK"),
            rcpt_to_response: SmtpResponse::new(250, "OK"),
            data_response: SmtpResponse::new(354, "Start mail input; end with <CRLF>.<CRLF>"),
            data_end_response: SmtpResponse::new(250, "OK: Message accepted"),
            quit_response: SmtpResponse::new(221, "Bye"),
            timeout_on_command: None,
        }
    }
}

#[derive(Default)]
struct Counters {
    accepted: AtomicUsize,
    open: AtomicUsize,
    bytes_received: AtomicUsize,
    command_count: AtomicUsize,
}

/// Decrements the open connection count however the handler ends.
struct OpenConnection(Arc<Counters>);

impl OpenConnection {
    fn new(counters: Arc<Counters>) -> Self {
        counters.accepted.fetch_add(1, Ordering::SeqCst);
        counters.open.fetch_add(1, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for OpenConnection {
    fn drop(&mut self) {
        self.0.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// What ended a command loop.
enum Ended {
    Closed,
    StartTls,
}

/// Mock SMTP server for testing
pub struct MockSmtpServer {
    addr: SocketAddr,
    commands_received: Arc<RwLock<Vec<SmtpCommand>>>,
    shutdown: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder::new()
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Get all commands received by the server
    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands_received.read().await.clone()
    }

    /// Command verbs in the order they arrived
    pub async fn verbs(&self) -> Vec<&'static str> {
        self.commands().await.iter().map(SmtpCommand::verb).collect()
    }

    /// The raw content received after DATA, if any
    pub async fn message_content(&self) -> Option<Vec<u8>> {
        self.commands().await.into_iter().find_map(|command| match command {
            SmtpCommand::MessageContent(content) => Some(content),
            _ => None,
        })
    }

    #[must_use]
    pub fn accepted_connections(&self) -> usize {
        self.counters.accepted.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn bytes_received(&self) -> usize {
        self.counters.bytes_received.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn command_count(&self) -> usize {
        self.counters.command_count.load(Ordering::SeqCst)
    }

    /// Waits until every connection handler has finished, or panics after a few seconds.
    pub async fn wait_until_idle(&self) {
        let idle = async {
            while self.open_connections() != 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        timeout(Duration::from_secs(5), idle)
            .await
            .expect("mock server connections never closed");
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn handle_client(
        stream: TcpStream,
        config: Arc<MockServerConfig>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
        counters: Arc<Counters>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let _open = OpenConnection::new(Arc::clone(&counters));

        let mut reader = BufReader::new(stream);
        reader.write_all(&config.greeting.to_bytes()).await?;
        reader.flush().await?;

        let mut local_command_count = 0;
        match Self::serve(&mut reader, &config, &commands, &counters, &mut local_command_count)
            .await?
        {
            Ended::Closed => Ok(()),
            Ended::StartTls => {
                let acceptor = config
                    .tls_acceptor
                    .clone()
                    .ok_or("STARTTLS accepted without a TLS acceptor")?;
                let tls = acceptor.accept(reader.into_inner()).await?;

                let mut reader = BufReader::new(tls);
                Self::serve(&mut reader, &config, &commands, &counters, &mut local_command_count)
                    .await?;
                Ok(())
            }
        }
    }

    /// Runs the command loop until the client quits, hangs up or switches to TLS.
    async fn serve<S>(
        stream: &mut BufReader<S>,
        config: &MockServerConfig,
        commands: &RwLock<Vec<SmtpCommand>>,
        counters: &Counters,
        local_command_count: &mut usize,
    ) -> Result<Ended, Box<dyn std::error::Error + Send + Sync>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut line = String::new();
        let mut auth_step: Option<usize> = None;

        loop {
            line.clear();

            if let Some(timeout_on) = config.timeout_on_command
                && *local_command_count == timeout_on
            {
                // Swallow everything without answering until the client gives up and hangs up.
                let mut rest = Vec::new();
                let _ = timeout(Duration::from_secs(30), async {
                    loop {
                        rest.clear();
                        match stream.read_until(b'\n', &mut rest).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {}
                        }
                    }
                })
                .await;
                return Ok(Ended::Closed);
            }

            let Ok(read_result) = timeout(Duration::from_secs(10), stream.read_line(&mut line)).await
            else {
                return Ok(Ended::Closed);
            };

            let bytes_read = read_result?;
            if bytes_read == 0 {
                return Ok(Ended::Closed);
            }

            counters.bytes_received.fetch_add(bytes_read, Ordering::SeqCst);
            counters.command_count.fetch_add(1, Ordering::SeqCst);
            *local_command_count += 1;

            let cmd_line = line.trim_end_matches(['\r', '\n']).to_string();

            if let Some(step) = auth_step {
                commands.write().await.push(SmtpCommand::AuthLine(cmd_line));
                let response = &config.auth_responses[step + 1];
                auth_step = (response.code == 334 && step + 2 < config.auth_responses.len())
                    .then_some(step + 1);
                stream.write_all(&response.to_bytes()).await?;
                stream.flush().await?;
                continue;
            }

            let (verb, argument) = cmd_line
                .split_once(' ')
                .map_or((cmd_line.as_str(), ""), |(verb, argument)| (verb, argument));

            let (response, smtp_cmd) = match verb.to_ascii_uppercase().as_str() {
                "EHLO" => (
                    config.ehlo_response.to_bytes(),
                    SmtpCommand::Ehlo(argument.to_string()),
                ),
                "STARTTLS" => (config.starttls_response.to_bytes(), SmtpCommand::StartTls),
                "AUTH" if argument.eq_ignore_ascii_case("LOGIN") => {
                    let response = &config.auth_responses[0];
                    if response.code == 334 {
                        auth_step = Some(0);
                    }
                    (response.to_bytes(), SmtpCommand::AuthLogin)
                }
                "MAIL" => (
                    config.mail_from_response.to_bytes(),
                    SmtpCommand::MailFrom(argument.to_string()),
                ),
                "RCPT" => (
                    config.rcpt_to_response.to_bytes(),
                    SmtpCommand::RcptTo(argument.to_string()),
                ),
                "DATA" => (config.data_response.to_bytes(), SmtpCommand::Data),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    stream.write_all(&config.quit_response.to_bytes()).await?;
                    stream.flush().await?;
                    return Ok(Ended::Closed);
                }
                _ => (
                    SmtpResponse::new(500, "Unknown command").to_bytes(),
                    SmtpCommand::Other(cmd_line.clone()),
                ),
            };

            commands.write().await.push(smtp_cmd.clone());
            stream.write_all(&response).await?;
            stream.flush().await?;

            match smtp_cmd {
                SmtpCommand::StartTls if config.starttls_response.code == 220 => {
                    return Ok(Ended::StartTls);
                }
                SmtpCommand::Data if config.data_response.code == 354 => {
                    let content = Self::read_content(stream, counters).await?;
                    commands
                        .write()
                        .await
                        .push(SmtpCommand::MessageContent(content));
                    stream
                        .write_all(&config.data_end_response.to_bytes())
                        .await?;
                    stream.flush().await?;
                }
                _ => {}
            }
        }
    }

    /// Reads message content up to the line holding a single dot.
    async fn read_content<S>(
        stream: &mut BufReader<S>,
        counters: &Counters,
    ) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut content = Vec::new();
        let mut data_line = Vec::new();

        loop {
            data_line.clear();
            let bytes_read = stream.read_until(b'\n', &mut data_line).await?;
            if bytes_read == 0 {
                return Err("connection closed during DATA".into());
            }
            counters.bytes_received.fetch_add(bytes_read, Ordering::SeqCst);

            if data_line == b".\r\n" {
                return Ok(content);
            }

            content.extend_from_slice(&data_line);
        }
    }
}

/// Builder for configuring a `MockSmtpServer`
pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    fn new() -> Self {
        Self {
            config: MockServerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = SmtpResponse::new(code, message);
        self
    }

    /// Set the EHLO response. The first entry is the greeting line, the rest are capabilities.
    #[must_use]
    pub fn with_ehlo_response(mut self, code: u16, capabilities: Vec<String>) -> Self {
        self.config.ehlo_response = EhloResponse { code, capabilities };
        self
    }

    /// Accept STARTTLS and switch to TLS with a freshly generated self-signed certificate.
    ///
    /// # Panics
    ///
    /// If the certificate cannot be generated.
    #[must_use]
    pub fn with_starttls(mut self) -> Self {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
                .expect("generate self-signed certificate");
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        let tls_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert.der().clone()], key)
            .expect("build TLS server config");

        self.config.tls_acceptor = Some(TlsAcceptor::from(Arc::new(tls_config)));
        self.config.starttls_response = SmtpResponse::new(220, "2.0.0 Ready to start TLS");

        let capabilities = &mut self.config.ehlo_response.capabilities;
        if !capabilities.iter().any(|cap| cap == "STARTTLS") {
            capabilities.push("STARTTLS".to_string());
        }
        self
    }

    /// Set the STARTTLS response without enabling TLS.
    #[must_use]
    pub fn with_starttls_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.starttls_response = SmtpResponse::new(code, message);
        self
    }

    /// Set the replies to `AUTH LOGIN`, the username line and the password line.
    #[must_use]
    pub fn with_auth_responses(mut self, responses: [(u16, &str); 3]) -> Self {
        self.config.auth_responses =
            responses.map(|(code, message)| SmtpResponse::new(code, message));
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_response = SmtpResponse::new(code, message);
        self
    }

    /// Set the response after message content (after `<CRLF>.<CRLF>`)
    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_quit_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.quit_response = SmtpResponse::new(code, message);
        self
    }

    /// Stop answering on the Nth command (0-indexed)
    #[must_use]
    pub const fn with_timeout_on_command(mut self, command_index: usize) -> Self {
        self.config.timeout_on_command = Some(command_index);
        self
    }

    /// Build and start the mock SMTP server
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to a port
    pub async fn build(self) -> Result<MockSmtpServer, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let commands_clone = Arc::clone(&commands);
        let shutdown_clone = Arc::clone(&shutdown);
        let counters_clone = Arc::clone(&counters);

        tokio::spawn(async move {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }

                // Accept connection with timeout to allow checking shutdown flag
                let accept_result = timeout(Duration::from_millis(100), listener.accept()).await;

                if let Ok(Ok((stream, _peer))) = accept_result {
                    let config = Arc::clone(&config);
                    let commands = Arc::clone(&commands_clone);
                    let counters = Arc::clone(&counters_clone);

                    tokio::spawn(async move {
                        if let Err(e) =
                            MockSmtpServer::handle_client(stream, config, commands, counters).await
                        {
                            eprintln!("Mock server client error: {e}");
                        }
                    });
                }
            }
        });

        Ok(MockSmtpServer {
            addr,
            commands_received: commands,
            shutdown,
            counters,
        })
    }
}
