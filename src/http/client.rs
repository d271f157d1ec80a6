use super::resolver::resolve;
use super::stream::{ObservedStream, TrackedBody, UploadTracker};
use super::ClientOptions;
use crate::error::TransportError;
use crate::events::{lock, ClientRequest, IncomingMessage, LookupInfo, Socket};
use bytes::Bytes;
use http::header::{HeaderValue, HOST, USER_AGENT};
use http::uri::{PathAndQuery, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use pki_types::ServerName;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;

trait Io: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

struct Connection {
    socket: Socket,
    sender: http1::SendRequest<TrackedBody>,
    tracker: UploadTracker,
}

type Pool = Arc<Mutex<HashMap<String, Vec<Connection>>>>;

/// An idle connection taken out of the pool for one exchange. It goes back
/// to the pool if the exchange is dropped before using it.
struct Checkout {
    client: HttpClient,
    key: String,
    conn: Option<Connection>,
}

impl Checkout {
    fn take(mut self) -> Option<Connection> {
        self.conn.take()
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            trace!("returning unused connection for {}", self.key);
            self.client.checkin(std::mem::take(&mut self.key), conn);
        }
    }
}

/// Where a request goes, derived from its absolute URI.
#[derive(Debug, Clone)]
struct Target {
    secure: bool,
    host: String,
    port: u16,
    authority: String,
}

impl Target {
    fn parse(uri: &Uri) -> Result<Self, TransportError> {
        let secure = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            Some(other) => {
                return Err(TransportError::InvalidUri(format!(
                    "unsupported scheme '{}'",
                    other
                )))
            }
            None => return Err(TransportError::InvalidUri(format!("{} is not absolute", uri))),
        };
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TransportError::InvalidUri(format!("{} has no host", uri)))?;
        let default_port = if secure { 443 } else { 80 };
        let port = uri.port_u16().unwrap_or(default_port);
        let authority = if port == default_port {
            host.to_string()
        } else {
            format!("{}:{}", host, port)
        };

        Ok(Self {
            secure,
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
            authority,
        })
    }

    fn pool_key(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// HTTP/1.1 client that reports each exchange through a [`ClientRequest`].
///
/// Connections are kept per scheme, host and port and handed to later
/// requests once the previous response body has been consumed.
#[derive(Clone)]
pub struct HttpClient {
    tls: TlsConnector,
    options: Arc<ClientOptions>,
    pool: Pool,
}

impl HttpClient {
    pub fn new(options: ClientOptions) -> Result<Self, TransportError> {
        let config = crate::tls::client_config(&options)?;
        Ok(Self {
            tls: TlsConnector::from(Arc::new(config)),
            options: Arc::new(options),
            pool: Arc::default(),
        })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Prepares an exchange. Nothing touches the network until
    /// [`Exchange::send`] is awaited, but an idle pooled connection to the
    /// same origin is assigned to the request right away. Dropping the
    /// exchange unsent returns that connection to the pool.
    pub fn request(&self, request: Request<Full<Bytes>>) -> Result<Exchange, TransportError> {
        let target = Target::parse(request.uri())?;
        let client_request = ClientRequest::new(request.method().clone(), request.uri().clone());
        let key = target.pool_key();
        let pooled = self.checkout(&key).map(|conn| {
            conn.socket.mark_reused();
            client_request.assign_socket(conn.socket.clone());
            Checkout {
                client: self.clone(),
                key,
                conn: Some(conn),
            }
        });
        Ok(Exchange {
            client: self.clone(),
            request: client_request,
            outgoing: request,
            target,
            pooled,
        })
    }

    pub fn get(&self, url: &str) -> Result<Exchange, TransportError> {
        let request = Request::get(url)
            .body(Full::new(Bytes::new()))
            .map_err(|e| TransportError::InvalidUri(e.to_string()))?;
        self.request(request)
    }

    /// Number of idle connections kept for reuse.
    pub fn idle_connections(&self) -> usize {
        lock(&self.pool).values().map(Vec::len).sum()
    }

    fn checkout(&self, key: &str) -> Option<Connection> {
        let mut pool = lock(&self.pool);
        let idle = pool.get_mut(key)?;
        while let Some(conn) = idle.pop() {
            if !conn.sender.is_closed() {
                return Some(conn);
            }
            trace!("dropping closed connection for {}", key);
        }
        None
    }

    fn checkin(&self, key: String, conn: Connection) {
        if !self.options.keep_alive || conn.sender.is_closed() {
            return;
        }
        debug!("keeping connection to {} alive", key);
        lock(&self.pool).entry(key).or_default().push(conn);
    }

    async fn connect(
        &self,
        request: &ClientRequest,
        target: &Target,
    ) -> Result<Connection, TransportError> {
        let socket = Socket::new(target.secure);
        request.assign_socket(socket.clone());

        let addrs = match target.host.parse::<IpAddr>() {
            Ok(ip) => vec![SocketAddr::new(ip, target.port)],
            Err(_) => {
                let addrs = resolve(&target.host, target.port).await?;
                socket.mark_lookup(LookupInfo {
                    host: target.host.clone(),
                    address: addrs.first().map(SocketAddr::ip),
                });
                addrs
            }
        };

        let tcp = connect_any(&addrs).await?;
        socket.mark_connected(tcp.peer_addr().ok());

        let io: Box<dyn Io> = if target.secure {
            let server_name = ServerName::try_from(target.host.clone())
                .map_err(|e| TransportError::Tls(e.to_string()))?;
            let tls = self
                .tls
                .connect(server_name, tcp)
                .await
                .map_err(|e| TransportError::Tls(e.to_string()))?;
            socket.mark_secure();
            Box::new(tls)
        } else {
            Box::new(tcp)
        };

        let tracker = UploadTracker::default();
        let (sender, conn) =
            http1::handshake(TokioIo::new(ObservedStream::new(io, tracker.clone()))).await?;
        let closing = socket.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("connection error: {:?}", e);
            }
            closing.close();
        });

        Ok(Connection {
            socket,
            sender,
            tracker,
        })
    }

    fn prepare(
        &self,
        request: Request<Full<Bytes>>,
        target: &Target,
    ) -> Result<Request<Full<Bytes>>, TransportError> {
        let (mut parts, body) = request.into_parts();
        let origin = parts
            .uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));
        parts.uri = Uri::from(origin);

        if !parts.headers.contains_key(HOST) {
            let host = HeaderValue::from_str(&target.authority)
                .map_err(|e| TransportError::InvalidUri(e.to_string()))?;
            parts.headers.insert(HOST, host);
        }
        if !parts.headers.contains_key(USER_AGENT) {
            let agent = HeaderValue::from_str(&self.options.user_agent)
                .map_err(|e| TransportError::Http(e.to_string()))?;
            parts.headers.insert(USER_AGENT, agent);
        }

        Ok(Request::from_parts(parts, body))
    }

    async fn execute(
        &self,
        request: &ClientRequest,
        outgoing: Request<Full<Bytes>>,
        target: &Target,
        pooled: Option<Checkout>,
    ) -> Result<(Connection, hyper::Response<Incoming>), TransportError> {
        let mut conn = match pooled.and_then(Checkout::take) {
            Some(conn) => conn,
            None => self.connect(request, target).await?,
        };

        let outgoing = self.prepare(outgoing, target)?;
        debug!(
            "> {} {} {:?}",
            outgoing.method(),
            outgoing.uri(),
            outgoing.version()
        );
        let (parts, body) = outgoing.into_parts();
        let outgoing = Request::from_parts(parts, TrackedBody::new(body, conn.tracker.clone()));

        conn.sender.ready().await?;
        conn.tracker.arm(request.clone());
        let response = conn.sender.send_request(outgoing).await;
        conn.tracker.disarm();
        let response = response?;
        request.mark_finished();
        debug!("< {:?} {}", response.version(), response.status());

        Ok((conn, response))
    }
}

async fn connect_any(addrs: &[SocketAddr]) -> Result<TcpStream, TransportError> {
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    trace!("set_nodelay on {} failed: {}", addr, e);
                }
                return Ok(stream);
            }
            Err(e) => {
                debug!("connect to {} failed: {}", addr, e);
                last_error = Some(TransportError::Connect {
                    addr: addr.to_string(),
                    message: e.to_string(),
                });
            }
        }
    }
    Err(last_error.unwrap_or_else(|| TransportError::Connect {
        addr: String::new(),
        message: "no addresses to connect to".to_string(),
    }))
}

/// A request ready to be sent. Attach a timer to [`Exchange::request`]
/// before calling [`Exchange::send`] to observe every phase.
pub struct Exchange {
    client: HttpClient,
    request: ClientRequest,
    outgoing: Request<Full<Bytes>>,
    target: Target,
    pooled: Option<Checkout>,
}

impl Exchange {
    pub fn request(&self) -> &ClientRequest {
        &self.request
    }

    /// Sends the request and waits for the response head.
    ///
    /// Failures are emitted as `Error` on the request before being
    /// returned. A cancellation through [`ClientRequest::abort`] is not
    /// reported as an error event; an expired timeout aborts the request
    /// and then reports [`TransportError::TimedOut`].
    pub async fn send(self) -> Result<HttpResponse, TransportError> {
        let Exchange {
            client,
            request,
            outgoing,
            target,
            pooled,
        } = self;
        let timeout = client.options.timeout;
        let deadline = timeout.map(|t| Instant::now() + t);
        let cancel = request.cancellation();

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Aborted),
            _ = expire(deadline) => {
                request.abort();
                Err(timed_out(timeout))
            }
            r = client.execute(&request, outgoing, &target, pooled) => r,
        };

        let (conn, response) = match result {
            Ok(ok) => ok,
            Err(e) => {
                if e != TransportError::Aborted {
                    request.fail(e.clone());
                }
                return Err(e);
            }
        };

        let (parts, body) = response.into_parts();
        let message = IncomingMessage::new(parts.status, parts.version, parts.headers);
        request.set_response(message.clone());

        Ok(HttpResponse {
            client,
            request,
            message,
            body,
            conn,
            pool_key: target.pool_key(),
            deadline,
            timeout,
        })
    }
}

fn timed_out(timeout: Option<Duration>) -> TransportError {
    TransportError::TimedOut(timeout.map(|t| t.as_millis()).unwrap_or_default())
}

/// A response whose head has arrived. The body is still on the wire.
pub struct HttpResponse {
    client: HttpClient,
    request: ClientRequest,
    message: IncomingMessage,
    body: Incoming,
    conn: Connection,
    pool_key: String,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
}

impl HttpResponse {
    pub fn message(&self) -> &IncomingMessage {
        &self.message
    }

    pub fn status(&self) -> StatusCode {
        self.message.status()
    }

    /// Reads the whole body.
    ///
    /// Success emits `End` on the message and returns the connection to the
    /// pool. A cut-short download emits `Aborted` (when cancelled or timed
    /// out) and then `Error` on the message.
    pub async fn bytes(self) -> Result<Bytes, TransportError> {
        let HttpResponse {
            client,
            request,
            message,
            body,
            conn,
            pool_key,
            deadline,
            timeout,
        } = self;
        let cancel = request.cancellation();

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Aborted),
            _ = expire(deadline) => {
                request.abort();
                Err(timed_out(timeout))
            }
            r = body.collect() => r
                .map(|collected| collected.to_bytes())
                .map_err(|e| TransportError::Body(e.to_string())),
        };

        match result {
            Ok(bytes) => {
                client.checkin(pool_key, conn);
                message.complete();
                Ok(bytes)
            }
            Err(e) => {
                if e.is_aborted() {
                    message.abort();
                }
                message.fail(e.clone());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_defaults_ports_by_scheme() {
        let plain = Target::parse(&Uri::from_static("http://example.com/a")).unwrap();
        assert!(!plain.secure);
        assert_eq!(plain.port, 80);
        assert_eq!(plain.authority, "example.com");

        let secure = Target::parse(&Uri::from_static("https://example.com:8443/")).unwrap();
        assert!(secure.secure);
        assert_eq!(secure.port, 8443);
        assert_eq!(secure.authority, "example.com:8443");
        assert_eq!(secure.pool_key(), "https://example.com:8443");
    }

    #[test]
    fn target_strips_ipv6_brackets() {
        let target = Target::parse(&Uri::from_static("http://[::1]:8080/")).unwrap();
        assert_eq!(target.host, "::1");
        assert!(target.host.parse::<IpAddr>().is_ok());
    }

    #[test]
    fn target_rejects_relative_and_foreign_uris() {
        assert!(matches!(
            Target::parse(&Uri::from_static("/relative")),
            Err(TransportError::InvalidUri(_))
        ));
        assert!(matches!(
            Target::parse(&Uri::from_static("ftp://example.com/")),
            Err(TransportError::InvalidUri(_))
        ));
    }

    #[test]
    fn prepare_uses_origin_form_and_fills_headers() {
        let client = HttpClient::new(ClientOptions::default()).unwrap();
        let request = Request::get("http://example.com:8080/path?q=1")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let target = Target::parse(request.uri()).unwrap();
        let prepared = client.prepare(request, &target).unwrap();

        assert_eq!(prepared.uri(), "/path?q=1");
        assert_eq!(prepared.headers()[HOST], "example.com:8080");
        assert!(prepared.headers()[USER_AGENT]
            .to_str()
            .unwrap()
            .starts_with("rtimer/"));
    }

    #[test]
    fn prepare_keeps_caller_headers() {
        let client = HttpClient::new(ClientOptions::default()).unwrap();
        let request = Request::get("http://example.com/")
            .header(USER_AGENT, "custom")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let target = Target::parse(request.uri()).unwrap();
        let prepared = client.prepare(request, &target).unwrap();
        assert_eq!(prepared.headers()[USER_AGENT], "custom");
    }

    #[test]
    fn get_rejects_garbage() {
        let client = HttpClient::new(ClientOptions::default()).unwrap();
        assert!(client.get("not a url").is_err());
    }

    #[tokio::test]
    async fn connection_refused_is_emitted_on_the_request() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpClient::new(ClientOptions::default()).unwrap();
        let exchange = client.get(&format!("http://{}/", addr)).unwrap();
        let timings = crate::timer(exchange.request());
        let err = exchange.send().await.err().unwrap();

        assert!(matches!(err, TransportError::Connect { .. }));
        let snapshot = timings.snapshot();
        assert!(snapshot.socket.is_some());
        assert!(snapshot.error.is_some());
        assert!(snapshot.connect.is_none());
    }
}
