use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mhr_pipeline::model::ModelRegistry;
use mhr_pipeline::store::ResultStore;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mhr_api::cache::FrameCache;
use mhr_api::config::ServerConfig;
use mhr_api::state::AppState;
use mhr_api::{engine, router};

/// How many consecutive ports to try when the configured one is taken.
const PORT_SCAN_RANGE: u16 = 100;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mhr_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = Arc::new(ServerConfig::from_env());
    tracing::info!(
        host = %config.host,
        port = config.port,
        output_dir = %config.output_dir.display(),
        backend = %config.model.backend,
        "Loaded server configuration",
    );

    // --- Result store ---
    let store = Arc::new(ResultStore::new(&config.output_dir));
    tokio::fs::create_dir_all(store.root())
        .await
        .expect("Failed to create output directory");

    // --- Job engine ---
    let registry = ModelRegistry::with_defaults();
    let worker_cancel = tokio_util::sync::CancellationToken::new();
    let (jobs, worker_handle) = engine::spawn(
        Arc::clone(&config),
        Arc::clone(&store),
        registry,
        worker_cancel.clone(),
    );
    tracing::info!("Job worker started");

    // --- App state ---
    let state = AppState {
        config: Arc::clone(&config),
        jobs,
        store,
        frame_cache: Arc::new(FrameCache::new(config.frame_cache_cap)),
    };

    // --- Router ---
    let app = router::build_app_router(state, &config);

    // --- Start server ---
    let listener = bind_with_fallback(&config.host, config.port)
        .await
        .expect("Failed to bind to any port in the scan range");
    let addr = listener.local_addr().expect("Listener has no local address");
    tracing::info!(%addr, "Starting server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Stop the job worker. A job already in flight finishes its current
    // await point; there is no mid-frame abort.
    worker_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), worker_handle).await;
    tracing::info!("Job worker stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Bind the configured port, scanning forward for a free one when it is
/// already taken (a second demo instance on the same machine is common).
async fn bind_with_fallback(host: &str, start_port: u16) -> std::io::Result<TcpListener> {
    let ip: std::net::IpAddr = host
        .parse()
        .unwrap_or_else(|e| panic!("Invalid HOST address '{host}': {e}"));

    let mut last_err = None;
    for offset in 0..PORT_SCAN_RANGE {
        let port = match start_port.checked_add(offset) {
            Some(port) => port,
            None => break,
        };
        match TcpListener::bind(SocketAddr::new(ip, port)).await {
            Ok(listener) => {
                if port != start_port {
                    tracing::warn!(
                        configured = start_port,
                        bound = port,
                        "Configured port was taken, bound a fallback",
                    );
                }
                return Ok(listener);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| std::io::Error::other("no port available")))
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
