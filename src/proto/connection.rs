use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::dispatcher::Dispatcher;
use crate::error::GatewayError;
use crate::request::{BodyReader, HttpVersion, Request};

use super::sink::Sink;

const MAX_HEADERS: usize = 64;
const READ_CHUNK: usize = 8192;

/// The states a connection's request cycle moves through. Transitions are
/// implicit in `serve`'s control flow rather than an explicit state field —
/// there is exactly one request per connection (mirroring the original
/// design, which closes the transport once the dispatch task completes), so
/// there is no state to preserve across iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    ParsingHeaders,
    Dispatching,
    Responding,
    Closed,
}

/// Drive one client connection through its full request cycle: read and
/// parse the request line/headers, hand a `Request` to the dispatcher,
/// stream any body bytes concurrently, and write whatever response the
/// dispatch task didn't already stream itself.
///
/// The whole cycle is bounded by `request_timeout`. `tokio::time::timeout`
/// only drops the `handle` future on expiry — it does not cancel the
/// `tokio::spawn`ed dispatch task, which is detached and keeps its own
/// `Arc<Sink>` clone (reachable through the `Request` it was handed) alive
/// independent of anything local to `handle`. So the dispatch task's
/// `AbortHandle` and the connection's `Sink` are both created here, outside
/// the timed future, and are used to explicitly abort the task and force
/// the transport closed on expiry — otherwise a slow upstream could finish
/// and write a full response well past the deadline, violating §4.3/§8
/// ("connection forcibly closed; no response written").
pub async fn serve(
    stream: TcpStream,
    dispatcher: Arc<dyn Dispatcher>,
    request_timeout: Duration,
) {
    let started = Instant::now();
    let (read_half, write_half) = stream.into_split();
    let sink = Arc::new(Sink::new(write_half));
    let dispatch_abort: Arc<Mutex<Option<AbortHandle>>> = Arc::new(Mutex::new(None));

    let outcome = tokio::time::timeout(
        request_timeout,
        handle(read_half, sink.clone(), dispatcher, dispatch_abort.clone()),
    )
    .await;

    let status = match outcome {
        Ok(status) => status,
        Err(_) => {
            if let Some(task) = dispatch_abort.lock().unwrap().take() {
                task.abort();
            }
            sink.close().await;
            "timeout"
        }
    };
    metrics::counter!("gateway_http_requests_total", "status" => status).increment(1);
    metrics::histogram!("gateway_http_request_duration_seconds").record(started.elapsed().as_secs_f64());
    if status == "error" {
        metrics::counter!("gateway_dispatch_errors_total").increment(1);
    }
}

#[allow(unused_assignments)]
async fn handle(
    mut read_half: OwnedReadHalf,
    sink: Arc<Sink>,
    dispatcher: Arc<dyn Dispatcher>,
    dispatch_abort: Arc<Mutex<Option<AbortHandle>>>,
) -> &'static str {
    let mut state = State::Idle;

    state = State::ParsingHeaders;
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let (method, version, headers, url, body_offset) = loop {
        let mut chunk = [0u8; READ_CHUNK];
        let n = match read_half.read(&mut chunk).await {
            Ok(0) => return "peer_closed", // peer closed before a full request arrived
            Ok(n) => n,
            Err(_) => return "read_error",
        };
        buf.extend_from_slice(&chunk[..n]);

        let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut raw_headers);
        match parsed.parse(&buf) {
            Ok(httparse::Status::Complete(offset)) => {
                let method = Bytes::copy_from_slice(parsed.method.unwrap_or("GET").as_bytes());
                let version = HttpVersion::from_minor(parsed.version.unwrap_or(1));
                let url = parsed.path.unwrap_or("/").to_string();
                let headers: Vec<(Bytes, Bytes)> = parsed
                    .headers
                    .iter()
                    .filter(|h| h.name != httparse::EMPTY_HEADER.name)
                    .map(|h| {
                        (
                            Bytes::copy_from_slice(h.name.as_bytes()),
                            Bytes::copy_from_slice(h.value),
                        )
                    })
                    .collect();
                break (method, version, headers, url, offset);
            }
            Ok(httparse::Status::Partial) => continue,
            // A malformed byte stream closes the connection without writing
            // a response (SPEC_FULL.md §4.3 "Parser errors").
            Err(_) => return "malformed",
        }
    };

    let content_length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(b"content-length"))
        .and_then(|(_, value)| std::str::from_utf8(value).ok())
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let (body_tx, body_rx) = mpsc::unbounded_channel();
    let request = Request::new(method, version, headers, url, BodyReader::new(body_rx), sink.clone());

    state = State::Dispatching;
    let dispatch_task = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.dispatch(request).await }
    });
    *dispatch_abort.lock().unwrap() = Some(dispatch_task.abort_handle());

    // Feed whatever body bytes already landed in the header-parse buffer,
    // then keep reading off the socket until `content_length` bytes have
    // been delivered. Runs concurrently with the dispatch task so streaming
    // dispatchers can start forwarding before the whole body has arrived.
    let already_read = buf.len() - body_offset;
    let mut delivered = 0usize;
    if already_read > 0 {
        let take = already_read.min(content_length);
        if take > 0 {
            let _ = body_tx.send(Bytes::copy_from_slice(&buf[body_offset..body_offset + take]));
            delivered += take;
        }
    }
    while delivered < content_length {
        let mut chunk = vec![0u8; READ_CHUNK.min(content_length - delivered)];
        match read_half.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                chunk.truncate(n);
                delivered += n;
                if body_tx.send(Bytes::from(chunk)).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    drop(body_tx);

    state = State::Responding;
    let outcome = match dispatch_task.await {
        // The streaming dispatcher already wrote and closed the sink.
        _ if sink.is_closing() => "success",
        Ok(Ok(content)) => {
            write_default_success(&sink, version, &content).await;
            "success"
        }
        Ok(Err(err)) => {
            write_error_response(&sink, version, &err).await;
            "error"
        }
        Err(_join_err) => {
            write_error_response(&sink, version, &GatewayError::internal("")).await;
            "error"
        }
    };
    state = State::Closed;
    let _ = state;
    outcome
}

async fn write_default_success(sink: &Sink, version: HttpVersion, content: &[u8]) {
    let mut len_buf = itoa::Buffer::new();
    let head = format!(
        "HTTP/{} 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n",
        version.as_str(),
        len_buf.format(content.len())
    );
    if sink.write_all(head.as_bytes()).await.is_ok() {
        let _ = sink.write_all(content).await;
    }
    sink.close().await;
}

async fn write_error_response(sink: &Sink, version: HttpVersion, err: &GatewayError) {
    let status = err.status();
    let message = err.to_string();
    let mut status_buf = itoa::Buffer::new();
    let mut len_buf = itoa::Buffer::new();
    let head = format!(
        "HTTP/{} {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n",
        version.as_str(),
        status_buf.format(status.as_u16()),
        status.canonical_reason().unwrap_or(""),
        len_buf.format(message.len())
    );
    if sink.write_all(head.as_bytes()).await.is_ok() {
        let _ = sink.write_all(message.as_bytes()).await;
    }
    sink.close().await;
}
