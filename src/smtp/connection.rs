//! The byte stream under a command channel, plain or TLS wrapped.

use std::sync::Arc;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    client::TlsStream,
    rustls::{
        self, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};

use crate::error::{Result, SendError};

pub(crate) enum Connection {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Connection {
    pub(crate) const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    pub(crate) async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
            Self::Tls(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }

    /// Reads whatever is available. A closed connection is an error, since the server must never
    /// hang up in the middle of a reply.
    pub(crate) async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(SendError::connection("connection closed by server"));
        }
        Ok(n)
    }

    pub(crate) async fn shutdown(&mut self) {
        let result = match self {
            Self::Plain(stream) => stream.shutdown().await,
            Self::Tls(stream) => stream.shutdown().await,
        };
        if let Err(err) = result {
            crate::internal!(level = DEBUG, "Shutdown after session was not clean: {err}");
        }
    }

    /// Wraps the plain socket in a TLS session. Used right after the server accepted STARTTLS.
    pub(crate) async fn upgrade_to_tls(self, domain: &str, accept_invalid_certs: bool) -> Result<Self> {
        let Self::Plain(stream) = self else {
            return Err(SendError::tls("connection is already TLS"));
        };

        let connector = TlsConnector::from(Arc::new(client_config(accept_invalid_certs)));
        let domain = domain.trim_start_matches('[').trim_end_matches(']');
        let server_name = ServerName::try_from(domain.to_string())
            .map_err(|e| SendError::tls(format!("invalid server name {domain}: {e}")))?;

        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| SendError::tls(format!("handshake with {domain} failed: {e}")))?;

        Ok(Self::Tls(Box::new(tls_stream)))
    }
}

fn client_config(accept_invalid_certs: bool) -> ClientConfig {
    let mut root_store = RootCertStore::empty();

    let certs = rustls_native_certs::load_native_certs();
    let (_, ignored) = root_store.add_parsable_certificates(certs.certs);
    if ignored > 0 {
        crate::internal!(level = WARN, "Ignored {ignored} unparsable native certificates");
    }
    if !certs.errors.is_empty() {
        crate::internal!(
            level = WARN,
            "Some native certificates could not be loaded: {:?}",
            certs.errors
        );
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if accept_invalid_certs {
        crate::internal!(
            level = WARN,
            "SECURITY WARNING: TLS certificate validation is disabled for this connection"
        );
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerifier));
    }

    config
}

/// Accepts any certificate. Only reachable through `accept_invalid_certs`.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}
