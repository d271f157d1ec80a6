use super::{lock, AsEmitter, Event, EventEmitter, LookupInfo, WeakEventEmitter};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct SocketState {
    connecting: bool,
    connected: bool,
    secure: bool,
    reused: bool,
    remote_addr: Option<SocketAddr>,
}

/// A transport connection as seen by its observers.
///
/// State changes are recorded before the matching event is emitted, so a
/// listener (or a late observer) always sees the state the event announces.
#[derive(Debug, Clone)]
pub struct Socket {
    emitter: EventEmitter,
    encrypted: bool,
    state: Arc<Mutex<SocketState>>,
}

impl Socket {
    pub fn new(encrypted: bool) -> Self {
        Self {
            emitter: EventEmitter::new(),
            encrypted,
            state: Arc::new(Mutex::new(SocketState {
                connecting: true,
                connected: false,
                secure: false,
                reused: false,
                remote_addr: None,
            })),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakSocket {
        WeakSocket {
            emitter: self.emitter.downgrade(),
            encrypted: self.encrypted,
            state: self.state.clone(),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn is_connecting(&self) -> bool {
        lock(&self.state).connecting
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    /// Whether the TLS handshake completed. Always `false` for plaintext.
    pub fn is_secure(&self) -> bool {
        lock(&self.state).secure
    }

    pub fn is_reused(&self) -> bool {
        lock(&self.state).reused
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        lock(&self.state).remote_addr
    }

    /// Flags a pooled socket that is being handed to another request.
    pub fn mark_reused(&self) {
        lock(&self.state).reused = true;
    }

    pub fn mark_lookup(&self, info: LookupInfo) {
        trace!("socket {:?}: lookup {:?}", self.emitter.id(), info);
        self.emitter.emit(Event::Lookup(info));
    }

    pub fn mark_connected(&self, remote_addr: Option<SocketAddr>) {
        {
            let mut state = lock(&self.state);
            if state.connected {
                return;
            }
            state.connecting = false;
            state.connected = true;
            state.remote_addr = remote_addr;
        }
        debug!("socket {:?}: connected to {:?}", self.emitter.id(), remote_addr);
        self.emitter.emit(Event::Connect);
    }

    pub fn mark_secure(&self) {
        if !self.encrypted {
            return;
        }
        {
            let mut state = lock(&self.state);
            if state.secure {
                return;
            }
            state.secure = true;
        }
        debug!("socket {:?}: tls handshake complete", self.emitter.id());
        self.emitter.emit(Event::SecureConnect);
    }

    pub fn close(&self) {
        {
            let mut state = lock(&self.state);
            state.connecting = false;
            state.connected = false;
        }
        self.emitter.emit(Event::Close);
    }
}

/// Non-owning handle used by listeners registered on the socket itself.
#[derive(Clone)]
pub(crate) struct WeakSocket {
    emitter: WeakEventEmitter,
    encrypted: bool,
    state: Arc<Mutex<SocketState>>,
}

impl WeakSocket {
    pub(crate) fn upgrade(&self) -> Option<Socket> {
        Some(Socket {
            emitter: self.emitter.upgrade()?,
            encrypted: self.encrypted,
            state: self.state.clone(),
        })
    }
}

impl AsEmitter for Socket {
    fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }
}
