use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::GatewayConfig;
use crate::dispatcher::HttpDispatcher;
use crate::metrics::Metrics;
use crate::resolver::InMemoryResolver;
use crate::server;
use crate::server::GatewayState;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
    pub listen: Option<String>,
    pub admin_listen: Option<String>,
}

/// Gateway lifecycle: init → load config → build state → serve → shutdown.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();

    let mut config = GatewayConfig::load(&args.config_path)?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(admin_listen) = args.admin_listen {
        config.admin_listen = Some(admin_listen);
    }

    let metrics = Metrics::install();
    let resolver = Arc::new(InMemoryResolver::new(config.services.clone()));
    let dispatcher: Arc<dyn crate::dispatcher::Dispatcher> = Arc::new(HttpDispatcher::new(resolver));
    let state = GatewayState::new(
        dispatcher,
        metrics.clone(),
        Duration::from_secs(config.request_timeout_secs),
    );

    let shutdown = Arc::new(Notify::new());

    let proxy_handle = tokio::spawn({
        let listen = config.listen.clone();
        let state = state.clone();
        let shutdown = shutdown.clone();
        let workers = config.workers;
        async move { server::run_proxy_server(&listen, state, shutdown, workers).await }
    });

    let admin_handle = config.admin_listen.clone().map(|admin_listen| {
        tokio::spawn({
            let state = state.clone();
            let shutdown = shutdown.clone();
            async move { server::run_admin_server(&admin_listen, state, shutdown).await }
        })
    });

    tracing::info!(
        listen = %config.listen,
        workers = config.workers,
        "server: gateway started"
    );

    wait_for_shutdown(&shutdown).await;

    if let Err(e) = proxy_handle.await {
        tracing::error!("server: proxy task error: {}", e);
    }
    if let Some(handle) = admin_handle {
        if let Err(e) = handle.await {
            tracing::error!("server: admin task error: {}", e);
        }
    }

    tracing::info!("server: shutdown complete");
    Ok(())
}

fn init_tracing() {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    shutdown.notify_waiters();
}
