//! Phase-by-phase latency of HTTP(S) requests.
//!
//! [`timer`] attaches to a [`ClientRequest`] and returns a live [`Timings`]
//! ledger that fills in as the socket, lookup, connect, TLS, upload,
//! response and download events fire. It never issues or alters the
//! request; the [`http`] module is one way to drive the events from real
//! network I/O.
//!
//! ```no_run
//! # async fn run() -> Result<(), rtimer::TransportError> {
//! use rtimer::http::{ClientOptions, HttpClient};
//!
//! let client = HttpClient::new(ClientOptions::default())?;
//! let exchange = client.get("http://example.com/")?;
//! let timings = rtimer::timer(exchange.request());
//! let response = exchange.send().await?;
//! response.bytes().await?;
//! println!("{}", timings);
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate tracing;

pub mod defer;
pub mod error;
pub mod events;
pub mod http;
pub mod timer;
pub mod timing;
pub mod tls;

pub use error::TransportError;
pub use events::{
    AsEmitter, ClientRequest, Event, EventEmitter, EventKind, IncomingMessage, LookupInfo,
    ObservableRequest, Socket,
};
pub use timer::{timer, timings_of, Timer};
pub use timing::{Phases, Timings, TimingsReport, TimingsSnapshot};
