use crate::error::TransportError;
use std::net::{SocketAddr, ToSocketAddrs};

/// Resolves `host` on the blocking pool, logging every address found.
pub async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
    let owned = host.to_string();
    debug!("Resolving DNS for: {}", host);

    let dns_error = |message: String| TransportError::Dns {
        host: host.to_string(),
        message,
    };
    let addresses: Vec<SocketAddr> =
        tokio::task::spawn_blocking(move || (owned.as_str(), port).to_socket_addrs())
            .await
            .map_err(|e| dns_error(e.to_string()))?
            .map_err(|e| dns_error(e.to_string()))?
            .collect();

    if addresses.is_empty() {
        error!("DNS resolution for {} returned no addresses.", host);
        return Err(dns_error("no addresses found".to_string()));
    }

    for (i, addr) in addresses.iter().enumerate() {
        if i == 0 {
            debug!("Resolved IP: {}", addr.ip());
        } else {
            debug!("Resolved IP (alternative): {}", addr.ip());
        }
    }

    Ok(addresses)
}
