//! WebSocket を使った PeerConnector 実装
//!
//! 他インスタンスの `/gateway` エンドポイントへ接続します。
//! 受信側からのフレーム（pong や "not authorized" 通知）は読み捨てタスクで
//! ログに出すだけで、ルーティングには使いません。
//!
//! 接続・書き込み・ping はすべて Broadcast Proxy の単一タスク上で実行されるため、
//! それぞれにタイムアウトを設定します。

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{net::TcpStream, task::JoinHandle, time::timeout};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};

use crate::domain::{PeerConnector, PeerLink, RelayError, ServiceInstance};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket relay connector
///
/// `auth_key=auth_secret` がクエリパラメータとして付与されます。
pub struct WebSocketPeerConnector {
    auth_key: String,
    auth_secret: String,
    /// Upper bound for the TCP and WebSocket handshake
    connect_timeout: Duration,
    /// Upper bound for one frame write on an established link
    write_wait: Duration,
}

impl WebSocketPeerConnector {
    pub fn new(auth_key: impl Into<String>, auth_secret: impl Into<String>) -> Self {
        Self {
            auth_key: auth_key.into(),
            auth_secret: auth_secret.into(),
            connect_timeout: Duration::from_secs(5),
            write_wait: Duration::from_secs(10),
        }
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, write_wait: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.write_wait = write_wait;
        self
    }

    fn url(&self, peer: &ServiceInstance) -> String {
        format!(
            "ws://{}/gateway?{}={}",
            peer.authority(),
            self.auth_key,
            self.auth_secret
        )
    }
}

#[async_trait]
impl PeerConnector for WebSocketPeerConnector {
    async fn connect(&self, peer: &ServiceInstance) -> Result<Box<dyn PeerLink>, RelayError> {
        let connect_error = |reason: String| RelayError::Connect {
            peer: peer.id.to_string(),
            reason,
        };
        let (stream, _response) = timeout(self.connect_timeout, connect_async(self.url(peer)))
            .await
            .map_err(|_| connect_error(format!("timed out after {:?}", self.connect_timeout)))?
            .map_err(|e| connect_error(e.to_string()))?;
        tracing::info!("Relay connected to peer {} ({})", peer.id, peer.authority());

        let (sink, stream) = stream.split();
        let reader = drain_incoming(peer.id.to_string(), stream);
        Ok(Box::new(WebSocketPeerLink {
            sink,
            reader,
            write_wait: self.write_wait,
        }))
    }
}

/// Frames coming back on an outbound relay link are only logged.
fn drain_incoming(peer: String, mut stream: SplitStream<WsStream>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    tracing::debug!("Relay peer {} replied: {}", peer, text);
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("Relay peer {} read error: {}", peer, e);
                    break;
                }
            }
        }
    })
}

struct WebSocketPeerLink {
    sink: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
    write_wait: Duration,
}

impl WebSocketPeerLink {
    async fn write(&mut self, message: Message) -> Result<(), RelayError> {
        match timeout(self.write_wait, self.sink.send(message)).await {
            Ok(result) => result.map_err(|e| RelayError::Write(e.to_string())),
            Err(_) => Err(RelayError::Write(format!(
                "timed out after {:?}",
                self.write_wait
            ))),
        }
    }
}

#[async_trait]
impl PeerLink for WebSocketPeerLink {
    async fn send_text(&mut self, frame: String) -> Result<(), RelayError> {
        self.write(Message::Text(frame.into())).await
    }

    async fn ping(&mut self) -> Result<(), RelayError> {
        self.write(Message::Ping(Vec::new().into())).await
    }

    async fn close(&mut self) {
        match timeout(self.write_wait, self.sink.close()).await {
            Ok(Err(e)) => tracing::debug!("Relay link close error: {}", e),
            Err(_) => tracing::debug!("Relay link close timed out"),
            Ok(Ok(())) => {}
        }
        self.reader.abort();
    }
}

impl Drop for WebSocketPeerLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
