use thiserror::Error;

/// Failures observed while driving an exchange.
///
/// The variants carry rendered messages instead of sources so the error can
/// be cloned into every `Error` event that reports it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid uri: {0}")]
    InvalidUri(String),
    #[error("dns lookup failed for {host}: {message}")]
    Dns { host: String, message: String },
    #[error("connect to {addr} failed: {message}")]
    Connect { addr: String, message: String },
    #[error("tls handshake failed: {0}")]
    Tls(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("error while reading response body: {0}")]
    Body(String),
    #[error("request aborted")]
    Aborted,
    #[error("request timed out after {0} ms")]
    TimedOut(u128),
}

impl TransportError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, TransportError::Aborted | TransportError::TimedOut(_))
    }
}

impl From<hyper::Error> for TransportError {
    fn from(e: hyper::Error) -> Self {
        TransportError::Http(e.to_string())
    }
}
