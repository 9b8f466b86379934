//! Server execution logic.

use std::sync::Arc;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::domain::Directory;

use super::{
    handler::{gateway_handler, health_check, websocket_handler},
    signal::shutdown_signal,
    state::AppState,
};

/// Build the router: client sockets, relay sockets and the health check.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // WebSocket エンドポイント（クライアント）
        .route("/ws", get(websocket_handler))
        // WebSocket エンドポイント（インスタンス間リレー）
        .route("/gateway", get(gateway_handler))
        // HTTP エンドポイント（Directory のヘルスチェック）
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// IM server instance
///
/// # Example
///
/// ```ignore
/// let server = Server::new(state, directory);
/// server.run(listener).await?;
/// ```
pub struct Server {
    /// AppState（ハンドラが共有する状態）
    state: Arc<AppState>,
    /// Directory（終了時に登録を解除する）
    directory: Arc<dyn Directory>,
}

impl Server {
    pub fn new(state: Arc<AppState>, directory: Arc<dyn Directory>) -> Self {
        Self { state, directory }
    }

    /// Serve on `listener` until SIGINT/SIGTERM.
    ///
    /// Shutdown order: leave the directory, close every local node, then
    /// release the relay connections so `serve` can drain.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails while serving.
    pub async fn run(self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        let app = router(self.state.clone());

        let addr = listener.local_addr()?;
        tracing::info!("IM server listening on {}", addr);
        tracing::info!("Connect to: ws://{}/ws", addr);
        tracing::info!("Press Ctrl+C to shutdown gracefully");

        let state = self.state;
        let directory = self.directory;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                let instance = state.hub.instance();
                if let Err(e) = directory.deregister(&instance.id).await {
                    tracing::error!("Failed to deregister {}: {}", instance.id, e);
                }
                state.hub.shutdown().await;
                state.begin_shutdown();
            })
            .await?;

        tracing::info!("Server shutdown complete");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::ServiceInstance,
        infrastructure::{
            auth::JwtAuthenticator, names::StoreNameResolver, repository::MembershipRepository,
            store::InMemoryMembershipStore,
        },
        ui::state::{ConnectionSettings, RelayAuth},
        usecase::{Hub, HubSettings, ProxyHandle},
    };
    use axum::{body::Body, http::Request};
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_route() {
        // テスト項目: /health が 200 を返す
        // given (前提条件):
        let instance = ServiceInstance::new("hiroba_test", "127.0.0.1", 8080);
        let (relay, _rx) = ProxyHandle::channel(instance.id.clone(), 8);
        let repository = MembershipRepository::new(Arc::new(InMemoryMembershipStore::new()));
        let names = Arc::new(StoreNameResolver::new(repository.clone(), true));
        let hub = Hub::new(
            instance,
            repository,
            names,
            relay,
            HubSettings {
                queue_capacity: 8,
                push_timeout: Duration::from_millis(10),
            },
        )
        .unwrap();
        let state = Arc::new(AppState::new(
            Arc::new(hub),
            Arc::new(JwtAuthenticator::new("secret")),
            ConnectionSettings {
                ping_interval: Duration::from_secs(60),
                write_wait: Duration::from_secs(10),
                max_heartbeat_failures: 2,
                debug_user_id_auth: false,
            },
            RelayAuth {
                key: "key".to_string(),
                secret: "secret".to_string(),
            },
        ));

        // when (操作):
        let response = router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(response.status(), 200);
    }
}
