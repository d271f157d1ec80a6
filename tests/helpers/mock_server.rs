use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

/// How the mock server answers every request it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum Behavior {
    /// `200 OK` with body "ok": "o" is sent with the head, "k" 200 ms later.
    /// Connections are kept alive.
    SlowBody,
    /// Announces 10 body bytes, sends 2, then closes the connection.
    TruncatedBody,
    /// Reads the request and never answers.
    Silent,
}

/// Delay between the two halves of the `SlowBody` response.
#[allow(dead_code)]
pub const BODY_DELAY: Duration = Duration::from_millis(200);

/// A raw HTTP/1.1 server bound to a random local port.
pub struct MockHttpServer {
    listener: TcpListener,
    port: u16,
}

impl MockHttpServer {
    /// Create a new mock server bound to a random port.
    pub async fn new() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    #[allow(dead_code)]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL using the IP literal, so no DNS lookup takes place.
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }

    /// Start accepting connections in a background task.
    pub fn start(self, behavior: Behavior) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.listener.accept().await {
                    Ok((stream, _)) => {
                        tokio::spawn(handle_connection(stream, behavior));
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

/// Reads one request (head plus `Content-Length` body). Returns `false` once
/// the client has closed the connection.
async fn read_request<S>(stream: &mut S) -> bool
where
    S: AsyncRead + Unpin,
{
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = received.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return false,
            Ok(n) => received.extend_from_slice(&buf[..n]),
        }
    };

    let head = String::from_utf8_lossy(&received[..head_end]).to_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while received.len() < head_end + content_length {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return false,
            Ok(n) => received.extend_from_slice(&buf[..n]),
        }
    }
    true
}

/// Answers requests on an accepted stream, plaintext or TLS.
pub async fn handle_connection<S>(mut stream: S, behavior: Behavior)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while read_request(&mut stream).await {
        match behavior {
            Behavior::SlowBody => {
                let head = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nContent-Type: text/plain\r\n\r\no";
                if stream.write_all(head).await.is_err() || stream.flush().await.is_err() {
                    return;
                }
                tokio::time::sleep(BODY_DELAY).await;
                if stream.write_all(b"k").await.is_err() || stream.flush().await.is_err() {
                    return;
                }
            }
            Behavior::TruncatedBody => {
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nok")
                    .await;
                let _ = stream.flush().await;
                return;
            }
            Behavior::Silent => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                return;
            }
        }
    }
}
