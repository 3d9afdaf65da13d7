use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::config::{LogFormat, StoreBackend, TurnstileConfig};
use turnstile::http::{router, AppState, HttpServer, StaticUserDirectory};
use turnstile::ratelimit::RateLimiter;
use turnstile::store::{CounterStore, MemoryCounterStore, RedisCounterStore};

#[derive(Parser, Debug)]
#[command(name = "turnstile", version)]
#[command(about = "Rate-limited HTTP service backed by a shared counter store")]
struct Args {
    /// YAML file with settings; environment variables take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding LISTEN_ADDR
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Configuration errors are fatal before anything starts serving.
    let mut config = TurnstileConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }

    init_tracing(config.logging.format);

    info!("Starting Turnstile");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %config.server.listen_addr,
        window_seconds = config.rate_limiting.window_seconds,
        max_requests = config.rate_limiting.max_requests,
        failure_policy = %config.rate_limiting.failure_policy,
        store_backend = ?config.store.backend,
        "Configuration loaded"
    );

    // Build the counter store
    let mut redis = None;
    let store: Arc<dyn CounterStore> = match config.store.backend {
        StoreBackend::Redis => {
            let connected = RedisCounterStore::connect(&config.store).await?;
            redis = Some(connected.clone());
            Arc::new(connected)
        }
        StoreBackend::Memory => {
            let memory = Arc::new(MemoryCounterStore::new());
            spawn_sweeper(memory.clone(), Duration::from_secs(config.rate_limiting.window_seconds));
            memory
        }
    };

    let limiter = Arc::new(RateLimiter::new(
        store,
        config.rate_limiting.limiter_settings(),
    ));
    info!("Rate limiter initialized");

    let state = AppState::new(limiter, Arc::new(StaticUserDirectory::default()));
    let server = HttpServer::new(config.server.listen_addr, router(state));

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    if let Some(redis) = redis {
        redis.close().await;
    }

    info!("Turnstile stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Evict expired counters from the in-process store once per window.
fn spawn_sweeper(store: Arc<MemoryCounterStore>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            store.purge_expired();
        }
    });
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
