//! Client WebSocket handler.
//!
//! After the handshake the connection runs two pumps:
//!
//! - read loop: frames → `Hub::dispatch`; its exit closes the node
//! - write loop: unicast queue → socket, plus the heartbeat ping
//!
//! The third per-node loop (broadcast queue → proxy) is owned by the Hub.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, header::SEC_WEBSOCKET_PROTOCOL},
    response::Response,
};
use futures_util::{
    sink::{Sink, SinkExt},
    stream::{SplitStream, StreamExt},
};
use serde::Deserialize;
use tokio::{sync::mpsc, time::Instant};

use hiroba_shared::time::unix_now;

use crate::{
    domain::{AuthError, Code, Method, Output, RoomId, UserId},
    ui::state::{AppState, ConnectionSettings},
    usecase::{Hub, Node},
};

/// Query parameters for WebSocket connection
#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
    /// Honored only with `debug_user_id_auth`
    pub user_id: Option<u64>,
}

/// First value of `Sec-WebSocket-Protocol`, used as the bearer token.
fn protocol_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn authenticate(
    state: &AppState,
    token: Option<&str>,
    debug_user_id: Option<u64>,
) -> Result<UserId, AuthError> {
    if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
        return state.authenticator.authenticate(token);
    }
    match debug_user_id {
        Some(id) if state.connection.debug_user_id_auth && id != 0 => Ok(UserId(id)),
        _ => Err(AuthError::MissingToken),
    }
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> Response {
    let protocol = protocol_token(&headers);
    let token = protocol.clone().or(query.token);
    let auth = authenticate(&state, token.as_deref(), query.user_id);

    // Browsers drop the connection unless the offered subprotocol is echoed.
    let ws = match protocol {
        Some(protocol) => ws.protocols([protocol]),
        None => ws,
    };

    ws.on_upgrade(move |socket| async move {
        match auth {
            Ok(user_id) => handle_socket(socket, state, user_id).await,
            Err(e) => reject(socket, e).await,
        }
    })
}

/// One auth-error frame, then close.
async fn reject(mut socket: WebSocket, error: AuthError) {
    tracing::warn!("WebSocket handshake rejected: {}", error);
    let out = Output::error("", Method::ServiceNotice, Code::AuthError, "");
    match out.to_client_frame(RoomId::NONE) {
        Ok(frame) => {
            if let Err(e) = socket.send(Message::Text(frame.into())).await {
                tracing::debug!("Failed to send auth error: {}", e);
            }
        }
        Err(e) => tracing::error!("Failed to encode auth error: {}", e),
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: UserId) {
    let (node, unicast) = state.hub.attach(user_id).await;
    let (sender, receiver) = socket.split();

    let write_task = tokio::spawn(write_loop(
        state.hub.clone(),
        node.clone(),
        unicast,
        sender,
        state.connection,
    ));

    read_loop(&state.hub, &node, receiver).await;
    state.hub.close_node(&node).await;

    if let Err(e) = write_task.await {
        tracing::error!("Write loop for user {} panicked: {}", user_id, e);
    }
    tracing::info!("Connection for user {} finished", user_id);
}

/// Runs until the socket dies or the node is closed elsewhere.
async fn read_loop(hub: &Hub, node: &Arc<Node>, mut receiver: SplitStream<WebSocket>) {
    loop {
        let message = tokio::select! {
            _ = node.closed() => break,
            message = receiver.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => hub.dispatch(node, text.as_str()).await,
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => hub.dispatch(node, text).await,
                Err(_) => {
                    tracing::debug!("Ignoring non UTF-8 binary frame from user {}", node.user_id());
                }
            },
            Some(Ok(Message::Close(_))) => {
                tracing::info!("User {} requested close", node.user_id());
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::info!("Read from user {} failed: {}", node.user_id(), e);
                break;
            }
            None => break,
        }
    }
}

async fn write_frame<S>(sender: &mut S, message: Message, write_wait: Duration) -> bool
where
    S: Sink<Message> + Unpin,
{
    matches!(
        tokio::time::timeout(write_wait, sender.send(message)).await,
        Ok(Ok(()))
    )
}

/// Unicast queue → socket, plus heartbeat. Exits when the queue closes, a
/// write fails, or heartbeats are exhausted.
async fn write_loop<S>(
    hub: Arc<Hub>,
    node: Arc<Node>,
    mut unicast: mpsc::Receiver<Output>,
    mut sender: S,
    settings: ConnectionSettings,
) where
    S: Sink<Message> + Unpin,
{
    let period = settings.ping_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            out = unicast.recv() => {
                let Some(out) = out else {
                    write_frame(&mut sender, Message::Close(None), settings.write_wait).await;
                    break;
                };
                let frame = match out.to_client_frame(node.room_id()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!("Failed to encode message for user {}: {}", node.user_id(), e);
                        continue;
                    }
                };
                if !write_frame(&mut sender, Message::Text(frame.into()), settings.write_wait).await {
                    tracing::info!("Write to user {} failed, closing", node.user_id());
                    hub.close_node(&node).await;
                    break;
                }
            }
            _ = ticker.tick() => {
                if write_frame(&mut sender, Message::Ping(Bytes::new()), settings.write_wait).await {
                    node.record_heartbeat(unix_now());
                    continue;
                }
                let failures = node.record_heartbeat_failure();
                tracing::warn!("Heartbeat to user {} failed ({} in a row)", node.user_id(), failures);
                if failures >= settings.max_heartbeat_failures {
                    hub.close_node(&node).await;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{Authenticator, MockNameResolver},
        infrastructure::{
            auth::{JwtAuthenticator, sign_token},
            repository::MembershipRepository,
            store::InMemoryMembershipStore,
        },
        ui::state::RelayAuth,
        usecase::{HubSettings, ProxyHandle},
    };
    use axum::http::HeaderValue;
    use serde_json::json;
    use std::{
        collections::VecDeque,
        pin::Pin,
        sync::Mutex,
        task::{Context, Poll},
    };

    /// Socket whose ping writes succeed or fail in a scripted order.
    /// Pings past the end of the script succeed.
    struct ScriptedSocket {
        pings: VecDeque<bool>,
        sent: Arc<Mutex<Vec<Message>>>,
    }

    impl ScriptedSocket {
        fn new(pings: &[bool]) -> (Self, Arc<Mutex<Vec<Message>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            let socket = Self {
                pings: pings.iter().copied().collect(),
                sent: sent.clone(),
            };
            (socket, sent)
        }
    }

    impl Sink<Message> for ScriptedSocket {
        type Error = String;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(mut self: Pin<&mut Self>, item: Message) -> Result<(), String> {
            if matches!(item, Message::Ping(_)) && !self.pings.pop_front().unwrap_or(true) {
                return Err("ping failed".to_string());
            }
            self.sent.lock().unwrap().push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Ready(Ok(()))
        }
    }

    fn fast_heartbeat() -> ConnectionSettings {
        ConnectionSettings {
            ping_interval: Duration::from_millis(10),
            write_wait: Duration::from_millis(100),
            max_heartbeat_failures: 2,
            debug_user_id_auth: false,
        }
    }

    fn state(debug_user_id_auth: bool) -> AppState {
        let instance = crate::domain::ServiceInstance::new("hiroba_test", "127.0.0.1", 8080);
        let (relay, _rx) = ProxyHandle::channel(instance.id.clone(), 8);
        let hub = Hub::new(
            instance,
            MembershipRepository::new(Arc::new(InMemoryMembershipStore::new())),
            Arc::new(MockNameResolver::new()),
            relay,
            HubSettings {
                queue_capacity: 8,
                push_timeout: Duration::from_millis(10),
            },
        )
        .unwrap();
        let authenticator: Arc<dyn Authenticator> = Arc::new(JwtAuthenticator::new("secret"));
        AppState::new(
            Arc::new(hub),
            authenticator,
            ConnectionSettings {
                ping_interval: Duration::from_secs(60),
                write_wait: Duration::from_secs(10),
                max_heartbeat_failures: 2,
                debug_user_id_auth,
            },
            RelayAuth {
                key: "key".to_string(),
                secret: "s3cret".to_string(),
            },
        )
    }

    #[test]
    fn test_protocol_header_token() {
        // テスト項目: Sec-WebSocket-Protocol の最初の値をトークンとして使う
        let mut headers = HeaderMap::new();
        headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("abc.def.ghi, chat"));
        assert_eq!(protocol_token(&headers), Some("abc.def.ghi".to_string()));
        assert_eq!(protocol_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_authenticate_with_token() {
        // テスト項目: 有効なトークンからユーザー ID が得られる
        let state = state(false);
        let token = sign_token(&json!({"aud": "42", "exp": unix_now() + 60}), b"secret").unwrap();
        assert_eq!(authenticate(&state, Some(&token), None), Ok(UserId(42)));
    }

    #[test]
    fn test_debug_user_id_only_when_enabled() {
        // テスト項目: user_id クエリはデバッグ設定が有効な場合だけ使える
        assert_eq!(
            authenticate(&state(false), None, Some(7)),
            Err(AuthError::MissingToken)
        );
        assert_eq!(authenticate(&state(true), None, Some(7)), Ok(UserId(7)));
        assert_eq!(
            authenticate(&state(true), None, Some(0)),
            Err(AuthError::MissingToken)
        );
    }

    #[tokio::test]
    async fn test_heartbeat_failures_close_node() {
        // テスト項目: ping が連続で上限回数失敗するとノードが閉じられる
        // given (前提条件):
        let state = state(false);
        let (node, unicast) = state.hub.attach(UserId(5)).await;
        let (socket, sent) = ScriptedSocket::new(&[false, false]);

        // when (操作):
        let task = tokio::spawn(write_loop(
            state.hub.clone(),
            node.clone(),
            unicast,
            socket,
            fast_heartbeat(),
        ));
        let finished = tokio::time::timeout(Duration::from_secs(1), task).await;

        // then (期待する結果):
        assert!(matches!(finished, Ok(Ok(()))));
        assert!(node.is_closed());
        assert!(state.hub.nodes().get(UserId(5)).await.is_none());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_successful_ping_resets_heartbeat_failures() {
        // テスト項目: 失敗の間に成功した ping があれば失敗回数がリセットされノードは閉じられない
        // given (前提条件):
        let state = state(false);
        let (node, unicast) = state.hub.attach(UserId(6)).await;
        let (socket, sent) = ScriptedSocket::new(&[false, true, false, true, false]);

        // when (操作):
        let task = tokio::spawn(write_loop(
            state.hub.clone(),
            node.clone(),
            unicast,
            socket,
            fast_heartbeat(),
        ));
        tokio::time::sleep(Duration::from_millis(120)).await;

        // then (期待する結果):
        assert!(!node.is_closed());
        assert!(state.hub.nodes().get(UserId(6)).await.is_some());
        let pings = sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| matches!(m, Message::Ping(_)))
            .count();
        assert!(pings >= 2);

        // ノードを閉じると Close フレームを書いて終了する
        state.hub.close_node(&node).await;
        let finished = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(matches!(finished, Ok(Ok(()))));
        assert!(matches!(sent.lock().unwrap().last(), Some(Message::Close(_))));
    }
}
