use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// HTTP server exposing the prober's counters at /metrics and a
/// liveness probe at /healthz.
pub struct MetricsServer {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,
}

impl MetricsServer {
    /// Create a server for the given registry and listen address.
    pub fn new(registry: Registry, addr: &str) -> Self {
        Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
        }
    }

    /// Starts the HTTP server in a background task.
    pub async fn start(&self) -> Result<()> {
        let addr = if self.addr.is_empty() {
            ":9900"
        } else {
            &self.addr
        };

        // A bare ":port" binds on all interfaces.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        // The registry is the only handler state; it is already an Arc
        // internally, so a clone shares the underlying metrics.
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(self.registry.clone());

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("binding metrics listener on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("resolving bound address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "metrics server listening");

            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    cancel.cancelled().await;
                })
                .await;

            if let Err(err) = served {
                tracing::error!(error = %err, "metrics server exited with an error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// Render every registered metric family in the text exposition format.
fn render_metrics(registry: &Registry) -> Result<String> {
    let mut out = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut out)
        .context("encoding metric families")?;

    String::from_utf8(out).context("exposition output is not valid UTF-8")
}

async fn metrics_handler(State(registry): State<Registry>) -> impl IntoResponse {
    match render_metrics(&registry) {
        Ok(body) => (StatusCode::OK, body),
        Err(err) => {
            tracing::error!(error = format!("{err:#}"), "rendering /metrics failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to render metrics".to_string(),
            )
        }
    }
}

async fn healthz_handler() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use prometheus::Counter;

    use super::*;

    #[test]
    fn test_render_metrics_includes_registered_counters() {
        let registry = Registry::new();
        let counter = Counter::new("probeoor_test_counter", "A counter.")
            .expect("counter should build");
        registry
            .register(Box::new(counter.clone()))
            .expect("counter should register");
        counter.inc();

        let body = render_metrics(&registry).expect("rendering should succeed");
        assert!(body.contains("probeoor_test_counter 1"));
    }

    #[tokio::test]
    async fn test_server_start_and_stop() {
        let server = MetricsServer::new(Registry::new(), "127.0.0.1:0");

        server.start().await.expect("server should start");
        server.stop().await.expect("server should stop");
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let server = MetricsServer::new(Registry::new(), "127.0.0.1:0");
        server.stop().await.expect("stop should be a no-op");
    }
}
