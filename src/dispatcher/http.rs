use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::error::GatewayError;
use crate::request::Request;
use crate::resolver::Resolver;

fn empty_body() -> BoxBody<Bytes, hyper::Error> {
    Full::new(Bytes::new()).map_err(|never| match never {}).boxed()
}

/// Proxies one request to whatever upstream the resolver names, streaming
/// the upstream's response straight onto the connection's sink as it
/// arrives. Owns a single pooled `hyper_util` client shared across every
/// request it handles.
pub struct HttpDispatcher {
    resolver: Arc<dyn Resolver>,
    client: Client<HttpConnector, BoxBody<Bytes, hyper::Error>>,
}

impl HttpDispatcher {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self { resolver, client }
    }

    async fn dispatch_inner(&self, mut request: Request) -> Result<Bytes, GatewayError> {
        let upstream_url = self.resolver.resolve(request.url())?;

        let method = hyper::Method::from_bytes(request.method())
            .map_err(|_| GatewayError::bad_request("Invalid HTTP method."))?;

        let uri: hyper::Uri = upstream_url
            .parse()
            .map_err(|_| GatewayError::bad_gateway(format!("Invalid upstream URL: {upstream_url}")))?;

        let mut builder = hyper::Request::builder().method(method).uri(uri);
        for (name, value) in request.headers() {
            builder = builder.header(name.as_ref(), value.as_ref());
        }

        // aiohttp-equivalent behavior in the original: a request is only
        // forwarded with a body if the client sent a Content-Length header.
        // We never chunk-forward an inbound body whose length is unknown.
        let has_content_length = request.header("content-length").is_some();
        let body: BoxBody<Bytes, hyper::Error> = if has_content_length {
            match request.take_body() {
                Some(reader) => StreamBody::new(MapInfallible(reader)).boxed(),
                None => empty_body(),
            }
        } else {
            empty_body()
        };

        let upstream_req = builder
            .body(body)
            .map_err(|e| GatewayError::internal(format!("Failed to build upstream request: {e}")))?;

        let resp = self
            .client
            .request(upstream_req)
            .await
            .map_err(|_| GatewayError::bad_gateway("Unable to reach destination, service unreachable."))?;

        let sink = request.sink().clone();

        let status = resp.status();
        let reason = status.canonical_reason().unwrap_or("");
        let mut status_buf = itoa::Buffer::new();
        let mut head = String::with_capacity(64);
        head.push_str("HTTP/1.1 ");
        head.push_str(status_buf.format(status.as_u16()));
        head.push(' ');
        head.push_str(reason);
        head.push_str("\r\n");
        for (name, value) in resp.headers() {
            head.push_str(name.as_str());
            head.push_str(": ");
            head.push_str(value.to_str().unwrap_or(""));
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        if sink.write_all(head.as_bytes()).await.is_err() {
            sink.close().await;
            return Ok(Bytes::new());
        }

        // Once the head is on the wire the response has started: any error
        // from here on must close the sink itself rather than bubble up, or
        // the connection's task-completion handler would write a second,
        // corrupting response on top of this one (see writer-exclusivity in
        // proto::sink).
        let mut body = resp.into_body();
        loop {
            match body.frame().await {
                Some(Ok(frame)) => {
                    if let Some(chunk) = frame.data_ref() {
                        if sink.write_all(chunk).await.is_err() {
                            sink.close().await;
                            return Ok(Bytes::new());
                        }
                    }
                }
                Some(Err(_)) => {
                    sink.close().await;
                    return Ok(Bytes::new());
                }
                None => break,
            }
        }

        sink.close().await;
        Ok(Bytes::new())
    }
}

impl super::Dispatcher for HttpDispatcher {
    fn dispatch<'a>(
        &'a self,
        request: Request,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, GatewayError>> + Send + 'a>> {
        Box::pin(self.dispatch_inner(request))
    }
}

/// Adapts `BodyReader`'s infallible item type to the `hyper::Error` error
/// type the upstream-facing `BoxBody` expects.
struct MapInfallible<S>(S);

impl<S> futures_util::Stream for MapInfallible<S>
where
    S: futures_util::Stream<Item = Result<Frame<Bytes>, std::convert::Infallible>> + Unpin,
{
    type Item = Result<Frame<Bytes>, hyper::Error>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        match Pin::new(&mut self.0).poll_next(cx) {
            std::task::Poll::Ready(Some(Ok(frame))) => std::task::Poll::Ready(Some(Ok(frame))),
            std::task::Poll::Ready(Some(Err(never))) => match never {},
            std::task::Poll::Ready(None) => std::task::Poll::Ready(None),
            std::task::Poll::Pending => std::task::Poll::Pending,
        }
    }
}
