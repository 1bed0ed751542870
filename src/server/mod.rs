mod admin;
pub mod bootstrap;
pub mod runtime;
mod state;

pub use state::GatewayState;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use socket2::{Domain, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info};

use crate::proto::connection;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Run the proxy's accept loop.
///
/// `worker_count` accept-loop tasks are spawned, each bound to its own
/// `SO_REUSEPORT` socket on the same address — the kernel fans incoming
/// connections out across them. This replaces the original design's
/// OS-process-per-worker fan-out with task-per-worker on a single
/// multi-threaded runtime (see `SPEC_FULL.md` open questions).
///
/// Shutdown stops all accept loops but must not tear the process down
/// while connections are still streaming: `active_conns` is shared across
/// every worker, and once all accept loops have returned we wait up to
/// `DRAIN_TIMEOUT` for it to reach zero before returning.
pub async fn run_proxy_server(
    listen: &str,
    state: GatewayState,
    shutdown: Arc<Notify>,
    worker_count: usize,
) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let mut workers = Vec::with_capacity(worker_count.max(1));
    let active_conns = Arc::new(AtomicI64::new(0));

    for id in 0..worker_count.max(1) {
        let listener = bind_reuseport(addr)?;
        let state = state.clone();
        let shutdown = shutdown.clone();
        let active_conns = active_conns.clone();
        workers.push(tokio::spawn(async move {
            accept_loop(id, listener, state, shutdown, active_conns).await;
        }));
    }

    info!(addr = %addr, workers = worker_count.max(1), "server: proxy listening");
    for worker in workers {
        let _ = worker.await;
    }

    let active = active_conns.load(Ordering::Relaxed);
    if active > 0 {
        info!("server: proxy: waiting for {} active connections to drain", active);
        let drain = async {
            loop {
                if active_conns.load(Ordering::Relaxed) == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        match tokio::time::timeout(DRAIN_TIMEOUT, drain).await {
            Ok(_) => info!("server: proxy: all connections drained"),
            Err(_) => {
                let remaining = active_conns.load(Ordering::Relaxed);
                info!(
                    "server: proxy: drain timeout ({}s), {} connections still active",
                    DRAIN_TIMEOUT.as_secs(),
                    remaining
                );
            }
        }
    }

    Ok(())
}

fn bind_reuseport(addr: SocketAddr) -> Result<TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    Ok(TcpListener::from_std(socket.into())?)
}

async fn accept_loop(
    worker_id: usize,
    listener: TcpListener,
    state: GatewayState,
    shutdown: Arc<Notify>,
    active_conns: Arc<AtomicI64>,
) {
    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                info!(worker = worker_id, "server: proxy worker stopping");
                return;
            }
        };

        let (stream, peer_addr) = match accepted {
            Ok(v) => {
                metrics::counter!("gateway_connections_total", "status" => "accepted").increment(1);
                v
            }
            Err(e) => {
                error!(worker = worker_id, error = %e, "server: proxy: accept failed");
                metrics::counter!("gateway_connections_total", "status" => "error").increment(1);
                continue;
            }
        };

        metrics::gauge!("gateway_connections_active").increment(1.0);
        active_conns.fetch_add(1, Ordering::Relaxed);
        let dispatcher = state.dispatcher.clone();
        let request_timeout = state.request_timeout;
        let active_conns = active_conns.clone();

        tokio::spawn(async move {
            connection::serve(stream, dispatcher, request_timeout).await;
            metrics::gauge!("gateway_connections_active").decrement(1.0);
            active_conns.fetch_sub(1, Ordering::Relaxed);
            let _ = peer_addr;
        });
    }
}

/// Run the admin server: `/healthz` and `/metrics`, HTTP/1 only, no
/// `SO_REUSEPORT` fan-out (the admin surface carries no meaningful load).
pub async fn run_admin_server(listen: &str, state: GatewayState, shutdown: Arc<Notify>) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "server: admin listening");

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                info!("server: admin stopping");
                return Ok(());
            }
        };
        let (stream, _) = accepted?;
        let state = state.clone();

        tokio::spawn(async move {
            if let Err(e) = admin::serve(stream, state).await {
                error!(error = %e, "server: admin: connection error");
            }
        });
    }
}
