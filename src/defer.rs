//! Normalizes "already connected" and "still connecting" sockets into a
//! single pair of callbacks.

use crate::events::{lock, AsEmitter, EventKind, Socket};
use std::sync::{Arc, Mutex};

/// Runs `f` once, either on the next `kind` event or right away if `ready`
/// already holds.
///
/// The listener is registered before `ready` is checked and the immediate
/// path only runs after winning `remove_listener`, so an event emitted from
/// another thread in between can never trigger `f` twice.
fn once_or_now<F>(socket: &Socket, kind: EventKind, ready: fn(&Socket) -> bool, f: F)
where
    F: FnOnce() + Send + 'static,
{
    let slot = Arc::new(Mutex::new(Some(f)));
    let pending = slot.clone();
    let id = socket.emitter().once(kind, move |_| {
        let f = lock(&pending).take();
        if let Some(f) = f {
            f();
        }
    });
    if ready(socket) && socket.emitter().remove_listener(kind, id) {
        let f = lock(&slot).take();
        if let Some(f) = f {
            f();
        }
    }
}

/// Invokes `connect` exactly once when the socket's transport is usable,
/// and `secure_connect` exactly once after it, only for encrypted sockets.
pub fn defer_to_connect<C, S>(socket: &Socket, connect: C, secure_connect: S)
where
    C: FnOnce() + Send + 'static,
    S: FnOnce() + Send + 'static,
{
    let encrypted = socket.is_encrypted();
    // The connect listener lives on the socket, so it only holds it weakly.
    let tls_socket = socket.downgrade();
    once_or_now(socket, EventKind::Connect, Socket::is_connected, move || {
        connect();
        if !encrypted {
            return;
        }
        if let Some(socket) = tls_socket.upgrade() {
            once_or_now(&socket, EventKind::SecureConnect, Socket::is_secure, secure_connect);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn calls() -> (Arc<Mutex<Vec<&'static str>>>, Arc<Mutex<Vec<&'static str>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (log.clone(), log)
    }

    #[test]
    fn connected_socket_fires_immediately() {
        let socket = Socket::new(false);
        socket.mark_connected(None);
        let (log, sink) = calls();
        let s = sink.clone();
        defer_to_connect(
            &socket,
            move || s.lock().unwrap().push("connect"),
            move || sink.lock().unwrap().push("secure"),
        );
        assert_eq!(*log.lock().unwrap(), vec!["connect"]);
        assert_eq!(socket.emitter().listener_count(EventKind::Connect), 0);
    }

    #[test]
    fn connecting_socket_waits_for_the_event() {
        let socket = Socket::new(false);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        defer_to_connect(
            &socket,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            || {},
        );
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        socket.mark_connected(None);
        socket.mark_connected(None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn encrypted_socket_reports_secure_after_connect() {
        let socket = Socket::new(true);
        let (log, sink) = calls();
        let s = sink.clone();
        defer_to_connect(
            &socket,
            move || s.lock().unwrap().push("connect"),
            move || sink.lock().unwrap().push("secure"),
        );

        socket.mark_connected(None);
        assert_eq!(*log.lock().unwrap(), vec!["connect"]);
        socket.mark_secure();
        assert_eq!(*log.lock().unwrap(), vec!["connect", "secure"]);
    }

    #[test]
    fn already_secured_socket_fires_both_in_order() {
        let socket = Socket::new(true);
        socket.mark_connected(None);
        socket.mark_secure();
        let (log, sink) = calls();
        let s = sink.clone();
        defer_to_connect(
            &socket,
            move || s.lock().unwrap().push("connect"),
            move || sink.lock().unwrap().push("secure"),
        );
        assert_eq!(*log.lock().unwrap(), vec!["connect", "secure"]);
    }

    #[test]
    fn plaintext_socket_never_reports_secure() {
        let socket = Socket::new(false);
        let (log, sink) = calls();
        defer_to_connect(&socket, || {}, move || sink.lock().unwrap().push("secure"));
        socket.mark_connected(None);
        socket.mark_secure();
        assert!(log.lock().unwrap().is_empty());
    }
}
