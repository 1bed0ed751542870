//! Full end-to-end request-cycle tests: a real `TcpListener` accepting
//! connections, routed through the connection protocol machine and HTTP
//! dispatcher, against an in-process fake upstream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use edge_gateway::dispatcher::{Dispatcher, HttpDispatcher};
use edge_gateway::proto::connection;
use edge_gateway::resolver::InMemoryResolver;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Spawns a fake upstream that replies with a fixed status/body to every
/// connection it accepts, and returns its address.
async fn spawn_fake_upstream(status_line: &'static str, body: &'static str) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let _ = stream.read(&mut buf).await;
                let resp = format!(
                    "{status_line}\r\nContent-Length: {}\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(resp.as_bytes()).await;
            });
        }
    });

    addr
}

async fn spawn_gateway(routes: HashMap<String, String>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let resolver = Arc::new(InMemoryResolver::new(routes));
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(HttpDispatcher::new(resolver));

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => return,
            };
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                connection::serve(stream, dispatcher, Duration::from_secs(5)).await;
            });
        }
    });

    addr
}

async fn send_raw_request(addr: std::net::SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.shutdown().await.ok();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

#[tokio::test]
async fn proxies_a_get_request_to_the_resolved_service() {
    let upstream_addr = spawn_fake_upstream("HTTP/1.1 200 OK", "hello from upstream").await;

    let mut routes = HashMap::new();
    routes.insert("foo".to_string(), format!("http://{upstream_addr}"));
    let gateway_addr = spawn_gateway(routes).await;

    let response = send_raw_request(
        gateway_addr,
        "GET /foo/widgets HTTP/1.1\r\nHost: gateway\r\n\r\n",
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 200 OK"), "got: {response}");
    assert!(response.ends_with("hello from upstream"));
}

#[tokio::test]
async fn unknown_service_returns_bad_gateway() {
    let gateway_addr = spawn_gateway(HashMap::new()).await;

    let response = send_raw_request(
        gateway_addr,
        "GET /nonexistent HTTP/1.1\r\nHost: gateway\r\n\r\n",
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 502"), "got: {response}");
}

#[tokio::test]
async fn malformed_url_returns_not_found() {
    let gateway_addr = spawn_gateway(HashMap::new()).await;

    // A bare "/" has no service segment to route on.
    let response = send_raw_request(gateway_addr, "GET / HTTP/1.1\r\nHost: gateway\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 404"), "got: {response}");
}

#[tokio::test]
async fn post_body_is_forwarded_when_content_length_is_present() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 8192];
        let n = stream.read(&mut buf).await.unwrap();
        let received = String::from_utf8_lossy(&buf[..n]).into_owned();
        let body_ok = received.ends_with("payload=1");
        let resp = if body_ok {
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"
        } else {
            "HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n"
        };
        let _ = stream.write_all(resp.as_bytes()).await;
    });

    let mut routes = HashMap::new();
    routes.insert("foo".to_string(), format!("http://{upstream_addr}"));
    let gateway_addr = spawn_gateway(routes).await;

    let body = "payload=1";
    let request = format!(
        "POST /foo HTTP/1.1\r\nHost: gateway\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    let response = send_raw_request(gateway_addr, &request).await;

    assert!(response.starts_with("HTTP/1.1 200 OK"), "got: {response}");
}

#[tokio::test]
async fn malformed_request_line_closes_silently() {
    let gateway_addr = spawn_gateway(HashMap::new()).await;

    let mut stream = TcpStream::connect(gateway_addr).await.unwrap();
    stream.write_all(b"NOT A REQUEST\r\n\r\n").await.unwrap();
    stream.shutdown().await.ok();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();

    assert!(response.is_empty(), "expected no bytes, got: {response:?}");
}

#[tokio::test]
async fn request_exceeding_timeout_closes_with_no_response() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let resolver = Arc::new(InMemoryResolver::new(HashMap::new()));
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(HttpDispatcher::new(resolver));

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        connection::serve(stream, dispatcher, Duration::from_millis(50)).await;
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    // Send a header line but never complete the request: the server never
    // sees `\r\n\r\n`, so it just keeps waiting for more bytes until the
    // per-request timeout aborts the transport.
    stream.write_all(b"GET /foo HTTP/1.1\r\n").await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();

    assert!(response.is_empty(), "expected no bytes, got: {response:?}");
}

#[tokio::test]
async fn unreachable_upstream_returns_bad_gateway() {
    // Bind and immediately drop to get a guaranteed-closed port.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = listener.local_addr().unwrap();
    drop(listener);

    let mut routes = HashMap::new();
    routes.insert("foo".to_string(), format!("http://{dead_addr}"));
    let gateway_addr = spawn_gateway(routes).await;

    let response = send_raw_request(gateway_addr, "GET /foo HTTP/1.1\r\nHost: gateway\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 502"), "got: {response}");
}
