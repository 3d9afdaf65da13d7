//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{Result, TurnstileError};

/// HTTP server for the rate-limited API.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Application routes
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server fails.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server stops accepting connections when the provided signal
    /// resolves and returns once in-flight requests have finished.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            TurnstileError::Io(e)
        })?;

        serve_on(listener, self.router, signal).await
    }
}

/// Serve `router` on an already bound listener.
///
/// Peer addresses are attached to every request so the rate-check
/// middleware can key counters by client.
pub async fn serve_on<F>(listener: TcpListener, router: Router, signal: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = %listener.local_addr()?, "Starting HTTP server");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(signal)
    .await
    .map_err(|e| {
        error!(error = %e, "HTTP server failed");
        TurnstileError::Io(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::app;
    use crate::ratelimit::LimiterSettings;
    use crate::store::MemoryCounterStore;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    async fn raw_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_server_shuts_down_on_signal() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let router = app(Arc::new(MemoryCounterStore::new()), LimiterSettings::default());

        let result = HttpServer::new(addr, router).serve_with_shutdown(async {}).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_rate_limits_real_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let settings = LimiterSettings {
            max_requests: 1,
            ..LimiterSettings::default()
        };
        let router = app(Arc::new(MemoryCounterStore::new()), settings);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve_on(listener, router, async move {
            let _ = shutdown_rx.await;
        }));

        let first = raw_get(addr, "/users").await;
        assert!(first.starts_with("HTTP/1.1 200"), "unexpected response: {first}");

        let second = raw_get(addr, "/users").await;
        assert!(second.starts_with("HTTP/1.1 429"), "unexpected response: {second}");
        assert!(second.contains("60 Seconds"));

        shutdown_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
