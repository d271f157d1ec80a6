//! Attaches the timing hooks to a request.
//!
//! Every hook is a one-shot listener prepended ahead of the caller's own
//! listeners, so by the time a caller reacts to `Response` (for example)
//! the matching stamp is already in the ledger. Failures are observed
//! through the error-monitor channel only, which leaves the handled or
//! unhandled status of every error exactly as it would be without us.

use crate::defer::defer_to_connect;
use crate::events::{
    lock, AsEmitter, EmitterId, Event, EventKind, IncomingMessage, ListenerId, ObservableRequest,
    Socket, WeakEventEmitter,
};
use crate::timing::{Ledger, Timings};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};

type SideTable = Arc<Mutex<HashMap<EmitterId, Weak<Mutex<Ledger>>>>>;

/// Instruments requests and remembers which ledger belongs to which
/// request or response.
///
/// The table only holds weak references: an entry stays resolvable while
/// the caller or any pending hook still holds the ledger.
#[derive(Default)]
pub struct Timer {
    attached: SideTable,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide timer behind [`timer`] and [`timings_of`].
    pub fn global() -> &'static Timer {
        static GLOBAL: OnceLock<Timer> = OnceLock::new();
        GLOBAL.get_or_init(Timer::new)
    }

    /// Attaches the hooks and returns the live ledger right away.
    ///
    /// Instrumenting the same request again returns the ledger created the
    /// first time without registering a second set of hooks.
    pub fn instrument<R>(&self, request: &R) -> Timings
    where
        R: ObservableRequest + ?Sized,
    {
        let id = request.emitter().id();
        let timings = {
            let mut attached = lock(&self.attached);
            if let Some(existing) = attached.get(&id).and_then(Timings::upgrade) {
                return existing;
            }
            attached.retain(|_, ledger| ledger.strong_count() > 0);
            let timings = Timings::new();
            attached.insert(id, timings.downgrade());
            timings
        };
        debug!("Instrumenting request {:?}", id);
        self.observe(request, &timings);
        timings
    }

    pub fn timings_of<T>(&self, target: &T) -> Option<Timings>
    where
        T: AsEmitter + ?Sized,
    {
        lock(&self.attached)
            .get(&target.emitter().id())
            .and_then(Timings::upgrade)
    }

    fn observe<R>(&self, request: &R, timings: &Timings)
    where
        R: ObservableRequest + ?Sized,
    {
        let emitter = request.emitter();

        let t = timings.clone();
        emitter.monitor_errors(move |_| t.stamp_error());

        let t = timings.clone();
        let abort_id = emitter.prepend_once(EventKind::Abort, move |_| t.stamp_abort());
        if request.is_aborted() && emitter.remove_listener(EventKind::Abort, abort_id) {
            timings.stamp_abort();
        }

        let t = timings.clone();
        let socket_id = emitter.prepend_once(EventKind::Socket, move |event| {
            if let Event::Socket(socket) = event {
                observe_socket(&t, socket);
            }
        });
        // A pooled socket may have been assigned before we got here.
        if let Some(socket) = request.socket() {
            if emitter.remove_listener(EventKind::Socket, socket_id) {
                observe_socket(timings, &socket);
            }
        }

        let t = timings.clone();
        let finish_id = emitter.prepend_once(EventKind::Finish, move |_| t.finish_upload());
        if request.is_write_finished() && emitter.remove_listener(EventKind::Finish, finish_id) {
            timings.finish_upload();
        }

        let t = timings.clone();
        let attached = self.attached.clone();
        let request_emitter = emitter.downgrade();
        emitter.prepend_once(EventKind::Response, move |event| {
            if let Event::Response(response) = event {
                lock(&attached).insert(response.emitter().id(), t.downgrade());
                observe_response(&t, response, request_emitter, abort_id);
            }
        });
    }
}

fn observe_socket(timings: &Timings, socket: &Socket) {
    timings.stamp_socket(socket.is_encrypted());

    let t = timings.clone();
    let lookup_id = socket
        .emitter()
        .prepend_once(EventKind::Lookup, move |_| t.stamp_lookup());

    let t = timings.clone();
    let lookup_socket = socket.emitter().downgrade();
    let secure = timings.clone();
    defer_to_connect(
        socket,
        move || {
            // No lookup happened (pooled socket or literal address); drop the
            // listener so it does not linger on the socket.
            if t.stamp_connect() {
                if let Some(socket) = lookup_socket.upgrade() {
                    socket.remove_listener(EventKind::Lookup, lookup_id);
                }
            }
        },
        move || secure.stamp_secure_connect(),
    );
}

fn observe_response(
    timings: &Timings,
    response: &IncomingMessage,
    request: WeakEventEmitter,
    abort_id: ListenerId,
) {
    timings.stamp_response();
    let emitter = response.emitter();

    let t = timings.clone();
    emitter.monitor_errors(move |_| t.stamp_error());

    let t = timings.clone();
    let aborted_id = emitter.prepend_once(EventKind::Aborted, move |_| t.stamp_abort());

    let t = timings.clone();
    let response_emitter = emitter.downgrade();
    emitter.prepend_once(EventKind::End, move |_| {
        if let Some(request) = request.upgrade() {
            request.remove_listener(EventKind::Abort, abort_id);
        }
        if let Some(response) = response_emitter.upgrade() {
            response.remove_listener(EventKind::Aborted, aborted_id);
        }
        if !t.stamp_end() {
            trace!("Response ended after the exchange was already finalized");
        }
    });
}

/// Instruments `request` with the global [`Timer`].
pub fn timer<R>(request: &R) -> Timings
where
    R: ObservableRequest + ?Sized,
{
    Timer::global().instrument(request)
}

/// Looks up the ledger of a request or response instrumented through
/// [`timer`].
pub fn timings_of<T>(target: &T) -> Option<Timings>
where
    T: AsEmitter + ?Sized,
{
    Timer::global().timings_of(target)
}
