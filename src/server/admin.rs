use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpStream;

use super::GatewayState;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

fn handle_admin(req: Request<Incoming>, state: GatewayState) -> Result<Response<BoxBody>, hyper::Error> {
    match req.uri().path() {
        "/healthz" => Ok(Response::builder()
            .status(200)
            .body(full_body(r#"{"status":"ok"}"#))
            .unwrap()),

        "/metrics" => {
            let body = state.metrics.render();
            Ok(Response::builder()
                .status(200)
                .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
                .body(full_body(body))
                .unwrap())
        }

        _ => Ok(Response::builder()
            .status(404)
            .body(full_body(r#"{"error":"not found"}"#))
            .unwrap()),
    }
}

/// Serve one admin connection. Uses hyper's own HTTP/1 server loop rather
/// than the hand-rolled connection protocol machine — the admin surface has
/// no request-lifecycle invariants of its own to enforce.
pub async fn serve(stream: TcpStream, state: GatewayState) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);
    let svc = service_fn(move |req: Request<Incoming>| {
        let state = state.clone();
        async move { handle_admin(req, state) }
    });

    auto::Builder::new(TokioExecutor::new())
        .http1()
        .keep_alive(true)
        .serve_connection_with_upgrades(io, svc)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))
}
