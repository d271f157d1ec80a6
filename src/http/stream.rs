// hyper does not say when a request has been written out, so we watch for
// it from both ends: the request body records when it has been drained, and
// the transport reports the first successful flush after that point.

use crate::events::{lock, ClientRequest};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::{Body, Frame, SizeHint};
use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

struct Armed {
    request: ClientRequest,
    body_done: bool,
}

/// Connects the body of the in-flight request to the connection's stream.
#[derive(Clone, Default)]
pub(crate) struct UploadTracker {
    armed: Arc<Mutex<Option<Armed>>>,
}

impl UploadTracker {
    pub(crate) fn arm(&self, request: ClientRequest) {
        *lock(&self.armed) = Some(Armed {
            request,
            body_done: false,
        });
    }

    pub(crate) fn disarm(&self) {
        lock(&self.armed).take();
    }

    fn body_done(&self) {
        if let Some(armed) = lock(&self.armed).as_mut() {
            armed.body_done = true;
        }
    }

    fn flushed(&self) {
        let finished = {
            let mut armed = lock(&self.armed);
            if matches!(armed.as_ref(), Some(a) if a.body_done) {
                armed.take().map(|a| a.request)
            } else {
                None
            }
        };
        if let Some(request) = finished {
            request.mark_finished();
        }
    }
}

pub(crate) struct TrackedBody {
    inner: Full<Bytes>,
    tracker: UploadTracker,
}

impl TrackedBody {
    pub(crate) fn new(inner: Full<Bytes>, tracker: UploadTracker) -> Self {
        Self { inner, tracker }
    }
}

impl Body for TrackedBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        if matches!(polled, Poll::Ready(None)) || this.inner.is_end_stream() {
            this.tracker.body_done();
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        let end = self.inner.is_end_stream();
        if end {
            self.tracker.body_done();
        }
        end
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

pub(crate) struct ObservedStream<T> {
    inner: T,
    tracker: UploadTracker,
}

impl<T> ObservedStream<T> {
    pub(crate) fn new(inner: T, tracker: UploadTracker) -> Self {
        Self { inner, tracker }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> AsyncRead for ObservedStream<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> AsyncWrite for ObservedStream<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let result = Pin::new(&mut self.inner).poll_flush(cx);
        if let Poll::Ready(Ok(())) = result {
            self.tracker.flushed();
        }
        result
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
