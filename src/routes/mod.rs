//! Optional management HTTP surface.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tracing::info;

use crate::app::{StatusSnapshot, WatcherStatus};

/// Mount the management routes
pub fn mount(status: Arc<WatcherStatus>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status_snapshot))
        .with_state(status)
}

/// Serve the management interface until the process exits
pub async fn serve(addr: SocketAddr, status: Arc<WatcherStatus>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Management interface listening on {}", addr);
    axum::serve(listener, mount(status)).await
}

async fn health() -> &'static str {
    "ok"
}

async fn status_snapshot(State(status): State<Arc<WatcherStatus>>) -> Json<StatusSnapshot> {
    Json(status.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn status_endpoint_reports_counters() {
        let status = Arc::new(WatcherStatus::new());
        status.download_started();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = mount(Arc::clone(&status));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let health = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(health, "ok");

        let snapshot: serde_json::Value = reqwest::get(format!("http://{addr}/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(snapshot["downloads_in_flight"], 1);
        assert_eq!(snapshot["cycles_completed"], 0);
    }
}
