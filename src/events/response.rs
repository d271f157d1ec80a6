use super::{lock, AsEmitter, Event, EventEmitter};
use crate::error::TransportError;
use http::{HeaderMap, StatusCode, Version};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct MessageState {
    complete: bool,
    aborted: bool,
}

/// The head of a received response plus the events of its body.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    emitter: EventEmitter,
    status: StatusCode,
    version: Version,
    headers: Arc<HeaderMap>,
    state: Arc<Mutex<MessageState>>,
}

impl IncomingMessage {
    pub fn new(status: StatusCode, version: Version, headers: HeaderMap) -> Self {
        Self {
            emitter: EventEmitter::new(),
            status,
            version,
            headers: Arc::new(headers),
            state: Arc::default(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn is_complete(&self) -> bool {
        lock(&self.state).complete
    }

    pub fn is_aborted(&self) -> bool {
        lock(&self.state).aborted
    }

    /// Announces that the body was fully consumed. No-op after an abort.
    pub fn complete(&self) {
        {
            let mut state = lock(&self.state);
            if state.complete || state.aborted {
                return;
            }
            state.complete = true;
        }
        self.emitter.emit(Event::End);
    }

    /// Announces that the download was cut short. No-op once complete.
    pub fn abort(&self) {
        {
            let mut state = lock(&self.state);
            if state.complete || state.aborted {
                return;
            }
            state.aborted = true;
        }
        self.emitter.emit(Event::Aborted);
    }

    pub fn fail(&self, error: TransportError) -> bool {
        self.emitter.emit(Event::Error(error))
    }
}

impl AsEmitter for IncomingMessage {
    fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }
}
