use super::{lock, Event, EventKind};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

static NEXT_EMITTER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an emitter, shared by all of its clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EmitterId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type OnceFn = Box<dyn FnOnce(&Event) + Send>;
type PersistentFn = Arc<dyn Fn(&Event) + Send + Sync>;

enum Callback {
    Once(OnceFn),
    Persistent(PersistentFn),
}

struct Registered {
    id: ListenerId,
    callback: Callback,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<Registered>>,
    error_monitors: Vec<(ListenerId, OnceFn)>,
}

impl Listeners {
    fn next_id(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }

    fn register(&mut self, kind: EventKind, callback: Callback, prepend: bool) -> ListenerId {
        let id = self.next_id();
        let entry = Registered { id, callback };
        let list = self.by_kind.entry(kind).or_default();
        if prepend {
            list.insert(0, entry);
        } else {
            list.push(entry);
        }
        id
    }
}

/// A cheap-clone publish/subscribe handle.
///
/// Listeners are collected under the lock and invoked after it is
/// released, so a listener may freely subscribe to (or emit on) any
/// emitter, including this one.
#[derive(Clone)]
pub struct EventEmitter {
    id: EmitterId,
    listeners: Arc<Mutex<Listeners>>,
}

/// A non-owning handle, for listeners that must reach back to the emitter
/// they are registered on without keeping it alive.
#[derive(Clone)]
pub struct WeakEventEmitter {
    id: EmitterId,
    listeners: Weak<Mutex<Listeners>>,
}

impl WeakEventEmitter {
    pub fn upgrade(&self) -> Option<EventEmitter> {
        self.listeners.upgrade().map(|listeners| EventEmitter {
            id: self.id,
            listeners,
        })
    }
}

impl EventEmitter {
    pub fn downgrade(&self) -> WeakEventEmitter {
        WeakEventEmitter {
            id: self.id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn new() -> Self {
        Self {
            id: EmitterId(NEXT_EMITTER_ID.fetch_add(1, Ordering::Relaxed)),
            listeners: Arc::default(),
        }
    }

    pub fn id(&self) -> EmitterId {
        self.id
    }

    /// Subscribes a listener that is removed before its first invocation.
    pub fn once<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: FnOnce(&Event) + Send + 'static,
    {
        lock(&self.listeners).register(kind, Callback::Once(Box::new(listener)), false)
    }

    /// Like [`once`](Self::once), but runs ahead of every listener already
    /// registered for `kind`.
    pub fn prepend_once<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: FnOnce(&Event) + Send + 'static,
    {
        lock(&self.listeners).register(kind, Callback::Once(Box::new(listener)), true)
    }

    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        lock(&self.listeners).register(kind, Callback::Persistent(Arc::new(listener)), false)
    }

    /// Taps the error channel without handling it.
    ///
    /// Monitors run before any `Error` listener, fire at most once and are
    /// invisible to [`listener_count`](Self::listener_count): an error seen
    /// only by monitors is still reported as unhandled.
    pub fn monitor_errors<F>(&self, monitor: F) -> ListenerId
    where
        F: FnOnce(&Event) + Send + 'static,
    {
        let mut listeners = lock(&self.listeners);
        let id = listeners.next_id();
        listeners.error_monitors.push((id, Box::new(monitor)));
        id
    }

    /// Returns `true` only if the listener was still registered, which makes
    /// removal usable as an atomic claim against a concurrent `emit`.
    pub fn remove_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        if kind == EventKind::Error {
            if let Some(pos) = listeners.error_monitors.iter().position(|(m, _)| *m == id) {
                let (_, monitor) = listeners.error_monitors.remove(pos);
                drop(monitor);
                return true;
            }
        }
        let Some(list) = listeners.by_kind.get_mut(&kind) else {
            return false;
        };
        match list.iter().position(|entry| entry.id == id) {
            Some(pos) => {
                list.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        lock(&self.listeners)
            .by_kind
            .get(&kind)
            .map_or(0, Vec::len)
    }

    pub fn error_monitor_count(&self) -> usize {
        lock(&self.listeners).error_monitors.len()
    }

    /// Delivers `event` and reports whether a regular listener received it.
    pub fn emit(&self, event: Event) -> bool {
        let kind = event.kind();
        let (monitors, calls) = {
            let mut listeners = lock(&self.listeners);
            let monitors = if kind == EventKind::Error {
                std::mem::take(&mut listeners.error_monitors)
            } else {
                Vec::new()
            };
            let mut calls: Vec<OnceFn> = Vec::new();
            if let Some(list) = listeners.by_kind.get_mut(&kind) {
                let mut kept = Vec::with_capacity(list.len());
                for entry in list.drain(..) {
                    match entry.callback {
                        Callback::Once(f) => calls.push(f),
                        Callback::Persistent(f) => {
                            let shared = f.clone();
                            calls.push(Box::new(move |event: &Event| shared(event)));
                            kept.push(Registered {
                                id: entry.id,
                                callback: Callback::Persistent(f),
                            });
                        }
                    }
                }
                *list = kept;
            }
            (monitors, calls)
        };

        for (_, monitor) in monitors {
            monitor(&event);
        }
        let handled = !calls.is_empty();
        for call in calls {
            call(&event);
        }
        if let (false, Event::Error(error)) = (handled, &event) {
            debug!("Unhandled error event on emitter {:?}: {}", self.id, error);
        }
        handled
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) + Clone) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |tag| sink.lock().unwrap().push(tag))
    }

    #[test]
    fn once_listener_fires_a_single_time() {
        let emitter = EventEmitter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        emitter.once(EventKind::Finish, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(emitter.emit(Event::Finish));
        assert!(!emitter.emit(Event::Finish));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(EventKind::Finish), 0);
    }

    #[test]
    fn prepended_listener_runs_first() {
        let emitter = EventEmitter::new();
        let (log, push) = recorder();
        let p = push.clone();
        emitter.once(EventKind::End, move |_| p("appended"));
        emitter.prepend_once(EventKind::End, move |_| push("prepended"));

        emitter.emit(Event::End);
        assert_eq!(*log.lock().unwrap(), vec!["prepended", "appended"]);
    }

    #[test]
    fn persistent_listener_survives_emits() {
        let emitter = EventEmitter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        emitter.on(EventKind::Close, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(Event::Close);
        emitter.emit(Event::Close);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(emitter.listener_count(EventKind::Close), 1);
    }

    #[test]
    fn remove_listener_claims_exactly_once() {
        let emitter = EventEmitter::new();
        let id = emitter.once(EventKind::Lookup, |_| {});
        assert!(emitter.remove_listener(EventKind::Lookup, id));
        assert!(!emitter.remove_listener(EventKind::Lookup, id));
        assert_eq!(emitter.listener_count(EventKind::Lookup), 0);
    }

    #[test]
    fn removed_error_monitor_never_runs() {
        let emitter = EventEmitter::new();
        let (log, push) = recorder();
        let id = emitter.monitor_errors(move |_| push("monitor"));
        assert!(emitter.remove_listener(EventKind::Error, id));
        assert!(!emitter.remove_listener(EventKind::Error, id));
        assert_eq!(emitter.error_monitor_count(), 0);

        emitter.emit(Event::Error(TransportError::Aborted));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn error_monitor_does_not_handle_the_error() {
        let emitter = EventEmitter::new();
        let (log, push) = recorder();
        emitter.monitor_errors(move |_| push("monitor"));

        assert_eq!(emitter.listener_count(EventKind::Error), 0);
        assert!(!emitter.emit(Event::Error(TransportError::Aborted)));
        assert_eq!(*log.lock().unwrap(), vec!["monitor"]);
        assert_eq!(emitter.error_monitor_count(), 0);
    }

    #[test]
    fn error_monitor_runs_before_prepended_error_listener() {
        let emitter = EventEmitter::new();
        let (log, push) = recorder();
        let p = push.clone();
        emitter.monitor_errors(move |_| p("monitor"));
        emitter.prepend_once(EventKind::Error, move |_| push("listener"));

        assert!(emitter.emit(Event::Error(TransportError::Http("boom".into()))));
        assert_eq!(*log.lock().unwrap(), vec!["monitor", "listener"]);
    }

    #[test]
    fn listener_may_subscribe_during_emit() {
        let emitter = EventEmitter::new();
        let inner = emitter.clone();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        emitter.once(EventKind::Connect, move |_| {
            inner.once(EventKind::Connect, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        emitter.emit(Event::Connect);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        emitter.emit(Event::Connect);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clones_share_identity() {
        let emitter = EventEmitter::new();
        assert_eq!(emitter.id(), emitter.clone().id());
        assert_ne!(emitter.id(), EventEmitter::new().id());
    }
}
