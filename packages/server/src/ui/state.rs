//! Server state shared by the handlers.

use std::{sync::Arc, time::Duration};

use tokio::sync::watch;

use crate::{domain::Authenticator, usecase::Hub};

/// Per-connection pump settings
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub ping_interval: Duration,
    /// Upper bound for one socket write
    pub write_wait: Duration,
    /// Consecutive ping failures that close the connection
    pub max_heartbeat_failures: u32,
    /// Accept `?user_id=` without a token
    pub debug_user_id_auth: bool,
}

/// Shared secret expected on the relay endpoint as `?<key>=<secret>`.
#[derive(Debug, Clone)]
pub struct RelayAuth {
    pub key: String,
    pub secret: String,
}

/// Shared application state
pub struct AppState {
    /// Hub（ノード・ルーム・ディスパッチャを保持するサービスオブジェクト）
    pub hub: Arc<Hub>,
    /// Authenticator（クライアントのトークン検証）
    pub authenticator: Arc<dyn Authenticator>,
    pub connection: ConnectionSettings,
    pub relay_auth: RelayAuth,
    /// Flipped to `true` once shutdown has started
    shutdown: watch::Sender<bool>,
}

impl AppState {
    pub fn new(
        hub: Arc<Hub>,
        authenticator: Arc<dyn Authenticator>,
        connection: ConnectionSettings,
        relay_auth: RelayAuth,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            hub,
            authenticator,
            connection,
            relay_auth,
            shutdown,
        }
    }

    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Resolves once shutdown has started.
    pub async fn shutting_down(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|down| *down).await;
    }
}
