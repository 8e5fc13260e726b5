use std::sync::Arc;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::debug;

use super::stream::{open_tcp, split_stream};
use super::{Connector, TransportHalves};
use crate::config::TlsOptions;
use crate::error::TransportError;

/// TLS over TCP, newline-delimited like plain TCP.
pub struct TlsConnector {
    host: String,
    port: u16,
    server_name: ServerName<'static>,
    connector: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    pub fn new(host: &str, port: u16, options: &TlsOptions) -> Result<Self, TransportError> {
        let name = options.server_name.as_deref().unwrap_or(host);
        let server_name = ServerName::try_from(name)
            .map(|parsed| parsed.to_owned())
            .map_err(|_| TransportError::InvalidServerName(name.to_owned()))?;

        let config = client_config(options)?;
        Ok(Self {
            host: host.to_owned(),
            port,
            server_name,
            connector: tokio_rustls::TlsConnector::from(Arc::new(config)),
        })
    }
}

fn client_config(options: &TlsOptions) -> Result<ClientConfig, TransportError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;

    let config = if options.accept_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(config)
}

#[async_trait]
impl Connector for TlsConnector {
    async fn connect(&self) -> Result<TransportHalves, TransportError> {
        let tcp = open_tcp(&self.host, self.port).await?;
        let tls = self.connector.connect(self.server_name.clone(), tcp).await?;
        debug!(transport.host = %self.host, transport.port = self.port, "tls handshake complete");
        Ok(split_stream(tls))
    }

    fn endpoint(&self) -> String {
        format!("tls://{}:{}", self.host, self.port)
    }
}

// ==============================================================================
// Certificate Verification Override
// ==============================================================================

/// Accepts any server certificate while still checking handshake signatures.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
