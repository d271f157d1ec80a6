use super::mock_server::{handle_connection, Behavior};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// Generate a self-signed certificate for 127.0.0.1 and return the server
/// config plus the certificate PEM (which acts as CA since self-signed).
pub fn generate_cert_bundle() -> (ServerConfig, String) {
    let subject_alt_names = vec!["127.0.0.1".to_string(), "localhost".to_string()];
    let cert =
        rcgen::generate_simple_self_signed(subject_alt_names).expect("Failed to generate cert");
    let cert_pem = cert.cert.pem();
    let cert_der: CertificateDer<'static> = cert.cert.der().clone();
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.signing_key.serialize_der()));

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("Failed to select protocol versions")
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .expect("Failed to set certificate");

    (config, cert_pem)
}

/// The HTTP/1.1 mock server behind a rustls acceptor.
pub struct MockHttpsServer {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    port: u16,
    ca_file: PathBuf,
}

impl MockHttpsServer {
    /// Bind to a random port and write the trusted certificate to a temp file.
    pub async fn new() -> std::io::Result<Self> {
        let (config, cert_pem) = generate_cert_bundle();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let ca_file = std::env::temp_dir().join(format!("rtimer-test-ca-{}.pem", port));
        std::fs::write(&ca_file, cert_pem)?;

        Ok(Self {
            listener,
            acceptor: TlsAcceptor::from(Arc::new(config)),
            port,
            ca_file,
        })
    }

    pub fn url(&self) -> String {
        format!("https://127.0.0.1:{}/", self.port)
    }

    /// PEM file to pass as the client's CA bundle.
    pub fn ca_file(&self) -> PathBuf {
        self.ca_file.clone()
    }

    pub fn start(self, behavior: Behavior) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.listener.accept().await {
                    Ok((stream, _)) => {
                        let acceptor = self.acceptor.clone();
                        tokio::spawn(async move {
                            match acceptor.accept(stream).await {
                                Ok(tls) => handle_connection(tls, behavior).await,
                                Err(e) => tracing::error!("TLS accept error: {}", e),
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                        break;
                    }
                }
            }
        })
    }
}
