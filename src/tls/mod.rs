mod verifier;

use crate::error::TransportError;
use crate::http::ClientOptions;
use rustls::crypto::ring::{default_provider, DEFAULT_CIPHER_SUITES};
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;

pub use verifier::TimerCertVerifier;

fn tls_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::Tls(e.to_string())
}

/// Builds the rustls configuration used for `https` connections.
pub fn client_config(options: &ClientOptions) -> Result<ClientConfig, TransportError> {
    let mut root_store = RootCertStore::empty();
    if let Some(file_path) = options.ca_file.as_ref() {
        let f = std::fs::File::open(file_path).map_err(|e| {
            TransportError::Tls(format!("cannot open {}: {}", file_path.display(), e))
        })?;
        let mut rd = std::io::BufReader::new(f);
        for cert in rustls_pemfile::certs(&mut rd) {
            root_store.add(cert.map_err(tls_error)?).map_err(tls_error)?;
        }
    } else {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    };

    let provider = Arc::new(rustls::crypto::CryptoProvider {
        cipher_suites: DEFAULT_CIPHER_SUITES.to_vec(),
        ..default_provider()
    });

    let verifier = TimerCertVerifier::new(options.insecure, provider.clone(), &root_store)
        .map_err(tls_error)?;

    let mut tls_config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(rustls::DEFAULT_VERSIONS)
        .map_err(tls_error)?
        .with_root_certificates(root_store)
        .with_no_client_auth();
    tls_config
        .dangerous()
        .set_certificate_verifier(Arc::new(verifier));
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(tls_config)
}
