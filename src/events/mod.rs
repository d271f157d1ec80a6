//! The event vocabulary shared by requests, sockets and responses.
//!
//! Rust HTTP stacks do not publish lifecycle events, so every object the
//! timer observes is backed by an [`EventEmitter`]. Whoever drives the I/O
//! (see [`crate::http`]) marks progress on these objects and the emitter
//! fans the transition out to the subscribed listeners.

mod emitter;
mod request;
mod response;
mod socket;

use crate::error::TransportError;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub use emitter::{EmitterId, EventEmitter, ListenerId, WeakEventEmitter};
pub use request::ClientRequest;
pub use response::IncomingMessage;
pub use socket::Socket;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A transport socket was assigned to the request.
    Socket,
    /// DNS resolution for the socket completed.
    Lookup,
    /// The transport became usable for writes.
    Connect,
    /// The TLS handshake completed.
    SecureConnect,
    /// The request was fully flushed to the transport.
    Finish,
    /// Response headers were received.
    Response,
    /// The response body was fully consumed.
    End,
    Error,
    /// The caller cancelled the request.
    Abort,
    /// The response was cut short by a cancellation.
    Aborted,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupInfo {
    pub host: String,
    pub address: Option<IpAddr>,
}

#[derive(Debug, Clone)]
pub enum Event {
    Socket(Socket),
    Lookup(LookupInfo),
    Connect,
    SecureConnect,
    Finish,
    Response(IncomingMessage),
    End,
    Error(TransportError),
    Abort,
    Aborted,
    Close,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Socket(_) => EventKind::Socket,
            Event::Lookup(_) => EventKind::Lookup,
            Event::Connect => EventKind::Connect,
            Event::SecureConnect => EventKind::SecureConnect,
            Event::Finish => EventKind::Finish,
            Event::Response(_) => EventKind::Response,
            Event::End => EventKind::End,
            Event::Error(_) => EventKind::Error,
            Event::Abort => EventKind::Abort,
            Event::Aborted => EventKind::Aborted,
            Event::Close => EventKind::Close,
        }
    }
}

/// Anything whose lifecycle is published through an [`EventEmitter`].
pub trait AsEmitter {
    fn emitter(&self) -> &EventEmitter;
}

impl AsEmitter for EventEmitter {
    fn emitter(&self) -> &EventEmitter {
        self
    }
}

/// A request-like object the timer can attach to.
///
/// The predicates let the timer catch up on transitions that happened
/// before it was attached: a pooled socket that is already assigned, a
/// request that has already been written out, or one already aborted.
pub trait ObservableRequest: AsEmitter {
    fn socket(&self) -> Option<Socket> {
        None
    }

    fn is_write_finished(&self) -> bool {
        false
    }

    fn is_aborted(&self) -> bool {
        false
    }
}

// A bare emitter has no socket and never finishes writing; only the hooks
// that can attach to it will ever fire.
impl ObservableRequest for EventEmitter {}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
