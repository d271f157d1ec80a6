use super::{lock, AsEmitter, Event, EventEmitter, IncomingMessage, ObservableRequest, Socket};
use crate::error::TransportError;
use http::{Method, Uri};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct RequestState {
    socket: Option<Socket>,
    write_finished: bool,
    response: Option<IncomingMessage>,
    aborted: bool,
}

/// An outgoing request whose progress is published as events.
///
/// Cloning yields another handle to the same request; `abort` on any clone
/// cancels the exchange driving it.
#[derive(Debug, Clone)]
pub struct ClientRequest {
    emitter: EventEmitter,
    method: Method,
    uri: Uri,
    state: Arc<Mutex<RequestState>>,
    cancel: CancellationToken,
}

impl ClientRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            emitter: EventEmitter::new(),
            method,
            uri,
            state: Arc::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn response(&self) -> Option<IncomingMessage> {
        lock(&self.state).response.clone()
    }

    pub fn is_aborted(&self) -> bool {
        lock(&self.state).aborted
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Attaches the transport. A request only ever gets one socket.
    pub fn assign_socket(&self, socket: Socket) {
        {
            let mut state = lock(&self.state);
            if state.socket.is_some() {
                return;
            }
            state.socket = Some(socket.clone());
        }
        self.emitter.emit(Event::Socket(socket));
    }

    pub fn mark_finished(&self) {
        {
            let mut state = lock(&self.state);
            if state.write_finished {
                return;
            }
            state.write_finished = true;
        }
        trace!("request {:?}: write finished", self.emitter.id());
        self.emitter.emit(Event::Finish);
    }

    pub fn set_response(&self, response: IncomingMessage) {
        {
            let mut state = lock(&self.state);
            if state.response.is_some() {
                return;
            }
            state.response = Some(response.clone());
        }
        self.emitter.emit(Event::Response(response));
    }

    pub fn fail(&self, error: TransportError) -> bool {
        self.emitter.emit(Event::Error(error))
    }

    /// Cancels the request.
    ///
    /// Emits `Abort` on the request the first time it is called and, if a
    /// response is already being downloaded, `Aborted` on that response.
    pub fn abort(&self) {
        let response = {
            let mut state = lock(&self.state);
            if state.aborted {
                return;
            }
            state.aborted = true;
            state.response.clone()
        };
        debug!("request {:?}: aborted", self.emitter.id());
        self.cancel.cancel();
        self.emitter.emit(Event::Abort);
        if let Some(response) = response {
            response.abort();
        }
    }
}

impl AsEmitter for ClientRequest {
    fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }
}

impl ObservableRequest for ClientRequest {
    fn socket(&self) -> Option<Socket> {
        lock(&self.state).socket.clone()
    }

    fn is_write_finished(&self) -> bool {
        lock(&self.state).write_finished
    }

    fn is_aborted(&self) -> bool {
        ClientRequest::is_aborted(self)
    }
}
