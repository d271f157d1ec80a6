use crate::events::lock;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_with::{serde_as, DurationMilliSecondsWithFrac};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

/// Durations derived from pairs of ledger stamps.
///
/// A phase stays `None` until both of its endpoints are known.
#[serde_as]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Phases {
    #[serde_as(as = "Option<DurationMilliSecondsWithFrac<f64>>")]
    pub wait: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSecondsWithFrac<f64>>")]
    pub dns: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSecondsWithFrac<f64>>")]
    pub tcp: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSecondsWithFrac<f64>>")]
    pub tls: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSecondsWithFrac<f64>>")]
    pub request: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSecondsWithFrac<f64>>")]
    pub first_byte: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSecondsWithFrac<f64>>")]
    pub download: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSecondsWithFrac<f64>>")]
    pub total: Option<Duration>,
}

/// A point-in-time copy of a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingsSnapshot {
    pub start: Instant,
    pub socket: Option<Instant>,
    pub lookup: Option<Instant>,
    pub connect: Option<Instant>,
    pub secure_connect: Option<Instant>,
    pub upload: Option<Instant>,
    pub response: Option<Instant>,
    pub end: Option<Instant>,
    pub error: Option<Instant>,
    pub abort: Option<Instant>,
    pub phases: Phases,
}

/// Serializable view of a ledger: stamps are offsets from `started_at`.
///
/// Unknown values serialize as `null` rather than being omitted.
#[serde_as]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingsReport {
    pub started_at: DateTime<Utc>,
    #[serde_as(as = "Option<DurationMilliSecondsWithFrac<f64>>")]
    pub socket: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSecondsWithFrac<f64>>")]
    pub lookup: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSecondsWithFrac<f64>>")]
    pub connect: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSecondsWithFrac<f64>>")]
    pub secure_connect: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSecondsWithFrac<f64>>")]
    pub upload: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSecondsWithFrac<f64>>")]
    pub response: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSecondsWithFrac<f64>>")]
    pub end: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSecondsWithFrac<f64>>")]
    pub error: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSecondsWithFrac<f64>>")]
    pub abort: Option<Duration>,
    pub phases: Phases,
}

fn between(from: Option<Instant>, to: Option<Instant>) -> Option<Duration> {
    Some(to?.saturating_duration_since(from?))
}

#[derive(Debug)]
pub(crate) struct Ledger {
    started_at: DateTime<Utc>,
    record: TimingsSnapshot,
    expects_tls: bool,
    upload_pending: bool,
}

impl Ledger {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            record: TimingsSnapshot {
                start: Instant::now(),
                socket: None,
                lookup: None,
                connect: None,
                secure_connect: None,
                upload: None,
                response: None,
                end: None,
                error: None,
                abort: None,
                phases: Phases::default(),
            },
            expects_tls: false,
            upload_pending: false,
        }
    }

    fn transport_ready(&self) -> bool {
        let r = &self.record;
        if r.socket.is_none() {
            return true;
        }
        r.connect.is_some() && (!self.expects_tls || r.secure_connect.is_some())
    }

    fn stamp_upload(&mut self) {
        let r = &mut self.record;
        if r.upload.is_some() {
            return;
        }
        r.upload = Some(Instant::now());
        r.phases.request = between(r.secure_connect.or(r.connect), r.upload);
        self.upload_pending = false;
    }

    fn flush_pending_upload(&mut self) {
        if self.upload_pending && self.transport_ready() {
            self.stamp_upload();
        }
    }
}

/// The live timing ledger of one request.
///
/// Every clone is a handle to the same ledger; hooks keep filling it in
/// while callers read it through [`snapshot`](Self::snapshot).
#[derive(Clone)]
pub struct Timings {
    inner: Arc<Mutex<Ledger>>,
}

impl Timings {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Ledger::new())),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<Mutex<Ledger>> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<Mutex<Ledger>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn snapshot(&self) -> TimingsSnapshot {
        lock(&self.inner).record
    }

    pub fn phases(&self) -> Phases {
        lock(&self.inner).record.phases
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        lock(&self.inner).started_at
    }

    /// Whether both handles point at the same ledger.
    pub fn same_ledger(&self, other: &Timings) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn report(&self) -> TimingsReport {
        let (started_at, r) = {
            let ledger = lock(&self.inner);
            (ledger.started_at, ledger.record)
        };
        let offset = |stamp: Option<Instant>| between(Some(r.start), stamp);
        TimingsReport {
            started_at,
            socket: offset(r.socket),
            lookup: offset(r.lookup),
            connect: offset(r.connect),
            secure_connect: offset(r.secure_connect),
            upload: offset(r.upload),
            response: offset(r.response),
            end: offset(r.end),
            error: offset(r.error),
            abort: offset(r.abort),
            phases: r.phases,
        }
    }

    pub(crate) fn stamp_socket(&self, encrypted: bool) {
        let mut ledger = lock(&self.inner);
        ledger.expects_tls = encrypted;
        let r = &mut ledger.record;
        if r.socket.is_some() {
            return;
        }
        r.socket = Some(Instant::now());
        r.phases.wait = between(Some(r.start), r.socket);
        trace!("timings: socket, wait={:?}", r.phases.wait);
    }

    pub(crate) fn stamp_lookup(&self) {
        let mut ledger = lock(&self.inner);
        let r = &mut ledger.record;
        if r.lookup.is_some() {
            return;
        }
        r.lookup = Some(Instant::now());
        r.phases.dns = between(r.socket, r.lookup);
        trace!("timings: lookup, dns={:?}", r.phases.dns);
    }

    /// Stamps `connect`. Returns `true` when no lookup was observed and
    /// `lookup` was collapsed onto `connect`.
    pub(crate) fn stamp_connect(&self) -> bool {
        let mut ledger = lock(&self.inner);
        let r = &mut ledger.record;
        if r.connect.is_some() {
            return false;
        }
        let now = Instant::now();
        r.connect = Some(now);
        let synthesized = r.lookup.is_none();
        if synthesized {
            r.lookup = r.connect;
            r.phases.dns = between(r.socket, r.lookup);
        }
        r.phases.tcp = between(r.lookup, r.connect);
        trace!("timings: connect, tcp={:?}", r.phases.tcp);
        ledger.flush_pending_upload();
        synthesized
    }

    pub(crate) fn stamp_secure_connect(&self) {
        let mut ledger = lock(&self.inner);
        let r = &mut ledger.record;
        if r.secure_connect.is_some() {
            return;
        }
        r.secure_connect = Some(Instant::now());
        r.phases.tls = between(r.connect, r.secure_connect);
        trace!("timings: secureConnect, tls={:?}", r.phases.tls);
        ledger.flush_pending_upload();
    }

    /// Records that the request was flushed. The stamp waits for the
    /// transport to be ready if the flush was observed ahead of it.
    pub(crate) fn finish_upload(&self) {
        let mut ledger = lock(&self.inner);
        if ledger.transport_ready() {
            ledger.stamp_upload();
            trace!("timings: upload, request={:?}", ledger.record.phases.request);
        } else {
            trace!("timings: upload deferred until the transport is ready");
            ledger.upload_pending = true;
        }
    }

    pub(crate) fn stamp_response(&self) {
        let mut ledger = lock(&self.inner);
        let r = &mut ledger.record;
        if r.response.is_some() {
            return;
        }
        r.response = Some(Instant::now());
        r.phases.first_byte = between(r.upload, r.response);
        trace!("timings: response, firstByte={:?}", r.phases.first_byte);
    }

    /// The normal terminal transition. Skipped entirely when an error or an
    /// abort already finalized `total`.
    pub(crate) fn stamp_end(&self) -> bool {
        let mut ledger = lock(&self.inner);
        let r = &mut ledger.record;
        if r.phases.total.is_some() || r.end.is_some() {
            return false;
        }
        r.end = Some(Instant::now());
        r.phases.download = between(r.response, r.end);
        r.phases.total = between(Some(r.start), r.end);
        trace!("timings: end, total={:?}", r.phases.total);
        true
    }

    pub(crate) fn stamp_error(&self) {
        let mut ledger = lock(&self.inner);
        let r = &mut ledger.record;
        if r.error.is_some() {
            return;
        }
        r.error = Some(Instant::now());
        if r.phases.total.is_none() {
            r.phases.total = between(Some(r.start), r.error);
        }
        trace!("timings: error, total={:?}", r.phases.total);
    }

    /// Aborts only finalize `total` while no response has arrived; past that
    /// point `end` or `error` gives the more accurate terminal stamp.
    pub(crate) fn stamp_abort(&self) {
        let mut ledger = lock(&self.inner);
        let r = &mut ledger.record;
        if r.abort.is_some() {
            return;
        }
        r.abort = Some(Instant::now());
        if r.response.is_none() && r.phases.total.is_none() {
            r.phases.total = between(Some(r.start), r.abort);
        }
        trace!("timings: abort, total={:?}", r.phases.total);
    }
}

impl fmt::Debug for Timings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Timings").field(&self.snapshot()).finish()
    }
}

impl fmt::Display for Timings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.phases(), f)
    }
}

impl fmt::Display for Phases {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\nTime breakdown:")?;

        let rows = [
            ("Socket wait:", self.wait),
            ("DNS lookup:", self.dns),
            ("TCP connect:", self.tcp),
            ("TLS handshake:", self.tls),
            ("Request sent:", self.request),
            ("First byte:", self.first_byte),
            ("Download:", self.download),
            ("Total time:", self.total),
        ];
        for (label, phase) in rows {
            match phase {
                Some(d) => writeln!(f, "  {:<16} {:>10.3} ms", label, d.as_secs_f64() * 1000.0)?,
                None => writeln!(f, "  {:<16} {:>10}", label, "N/A")?,
            }
        }

        Ok(())
    }
}
