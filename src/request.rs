use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use hyper::body::Frame;
use tokio::sync::mpsc;

use crate::proto::sink::Sink;

/// HTTP version of an inbound message. Only 1.0 and 1.1 are accepted on the
/// wire (see `SPEC_FULL.md` §6); the gateway echoes this back verbatim on
/// gateway-generated responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpVersion::Http10 => "1.0",
            HttpVersion::Http11 => "1.1",
        }
    }

    pub fn from_minor(minor: u8) -> Self {
        if minor == 0 {
            HttpVersion::Http10
        } else {
            HttpVersion::Http11
        }
    }
}

/// A lazy sequence of body byte chunks, readable at most once. Fed by the
/// connection protocol machine as it reads further bytes off the socket
/// after `headers_complete`; terminates (yields `None`) on `message_complete`.
pub struct BodyReader(mpsc::UnboundedReceiver<Bytes>);

impl BodyReader {
    pub fn new(rx: mpsc::UnboundedReceiver<Bytes>) -> Self {
        Self(rx)
    }
}

impl Stream for BodyReader {
    type Item = Result<Frame<Bytes>, std::convert::Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.0.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Immutable per-message handle: method, version, headers, URL, a body-byte
/// producer, and a response-sink handle. Constructed exactly once per inbound
/// HTTP message, at `headers_complete`.
pub struct Request {
    method: Bytes,
    version: HttpVersion,
    headers: Vec<(Bytes, Bytes)>,
    url: String,
    body: Option<BodyReader>,
    sink: Arc<Sink>,
}

impl Request {
    pub fn new(
        method: Bytes,
        version: HttpVersion,
        headers: Vec<(Bytes, Bytes)>,
        url: String,
        body: BodyReader,
        sink: Arc<Sink>,
    ) -> Self {
        Self {
            method,
            version,
            headers,
            url,
            body: Some(body),
            sink,
        }
    }

    pub fn method(&self) -> &[u8] {
        &self.method
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn headers(&self) -> &[(Bytes, Bytes)] {
        &self.headers
    }

    /// Case-insensitive header lookup — inbound headers may arrive in any case.
    pub fn header(&self, name: &str) -> Option<&Bytes> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, v)| v)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn sink(&self) -> &Arc<Sink> {
        &self.sink
    }

    /// Take ownership of the body stream. Returns `None` if it was already
    /// taken — the body is readable at most once.
    pub fn take_body(&mut self) -> Option<BodyReader> {
        self.body.take()
    }
}
