//! A small HTTP/1.1 client that publishes its progress as events.
//!
//! It exists so the timer can be pointed at real network traffic: each step
//! of an exchange (socket assignment, DNS, TCP, TLS, write, response head,
//! body) is reported on the [`ClientRequest`](crate::ClientRequest),
//! [`Socket`](crate::Socket) and [`IncomingMessage`](crate::IncomingMessage)
//! it hands out.

mod client;
pub mod resolver;
mod stream;

use std::path::PathBuf;
use std::time::Duration;

pub use client::{Exchange, HttpClient, HttpResponse};

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Deadline for the whole exchange, body included. On expiry the
    /// request is aborted.
    pub timeout: Option<Duration>,
    /// Accept any server certificate.
    pub insecure: bool,
    /// PEM bundle to trust instead of the bundled web PKI roots.
    pub ca_file: Option<PathBuf>,
    pub user_agent: String,
    /// Return connections to the pool once a response body is consumed.
    pub keep_alive: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            insecure: false,
            ca_file: None,
            user_agent: concat!("rtimer/", env!("CARGO_PKG_VERSION")).to_string(),
            keep_alive: true,
        }
    }
}
