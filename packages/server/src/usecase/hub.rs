//! Hub: the service object shared by every connection on this instance.
//!
//! Owns the node table, the room registry, the display-name resolver, the
//! handle to the Broadcast Proxy and the dispatcher. Every component gets
//! the Hub by reference instead of reaching for process-wide globals.

use std::{sync::Arc, time::Duration};

use serde_json::{Value, json};
use tokio::sync::mpsc;

use hiroba_shared::time::{unix_now, unix_to_rfc3339};

use crate::{
    domain::{
        Code, Method, NameResolver, Output, RoomError, RoomId, ServiceInstance, UserId, UserItem,
    },
    infrastructure::repository::MembershipRepository,
};

use super::{
    dispatcher::Dispatcher,
    error::RegisterError,
    node::Node,
    node_registry::NodeRegistry,
    proxy::ProxyHandle,
    room_registry::{Room, RoomRegistry},
};

pub const SIGNED_IN_ELSEWHERE: &str = "account signed in elsewhere";

#[derive(Debug, Clone, Copy)]
pub struct HubSettings {
    pub queue_capacity: usize,
    /// Upper bound for one member's enqueue during a fan-out
    pub push_timeout: Duration,
}

pub struct Hub {
    instance: ServiceInstance,
    nodes: NodeRegistry,
    rooms: RoomRegistry,
    names: Arc<dyn NameResolver>,
    relay: ProxyHandle,
    dispatcher: Dispatcher,
    settings: HubSettings,
}

impl Hub {
    pub fn new(
        instance: ServiceInstance,
        repository: MembershipRepository,
        names: Arc<dyn NameResolver>,
        relay: ProxyHandle,
        settings: HubSettings,
    ) -> Result<Self, RegisterError> {
        Ok(Self {
            instance,
            nodes: NodeRegistry::new(),
            rooms: RoomRegistry::new(repository, settings.push_timeout),
            names,
            relay,
            dispatcher: Dispatcher::standard()?,
            settings,
        })
    }

    pub fn instance(&self) -> &ServiceInstance {
        &self.instance
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub fn names(&self) -> &dyn NameResolver {
        self.names.as_ref()
    }

    /// Register a freshly authenticated user.
    ///
    /// A local node already registered for the user is evicted, and peers are
    /// told to evict theirs. Returns the node and its unicast queue receiver;
    /// the broadcast queue is drained into the proxy by a spawned relay loop.
    pub async fn attach(&self, user_id: UserId) -> (Arc<Node>, mpsc::Receiver<Output>) {
        let (node, queues) = Node::new(
            user_id,
            &self.instance,
            self.settings.queue_capacity,
            unix_now(),
        );
        spawn_relay_loop(user_id, queues.broadcast, self.relay.clone());

        if let Some(previous) = self.nodes.register(node.clone()).await {
            tracing::info!("User {} signed in again, evicting previous connection", user_id);
            self.evict(&previous).await;
        }

        let mut force_offline = Output::success("", Method::ForceOfflineBroadcast, Value::Null);
        force_offline.from_uid = user_id;
        self.relay(force_offline).await;

        tracing::info!("User {} attached to instance {}", user_id, self.instance.id);
        (node, queues.unicast)
    }

    /// Tell `node` it was signed in elsewhere, then close it.
    pub async fn evict(&self, node: &Arc<Node>) {
        let notice = Output::error("", Method::ServiceNotice, Code::AuthError, SIGNED_IN_ELSEWHERE);
        if let Err(e) = node.send_timeout(notice, self.settings.push_timeout).await {
            tracing::debug!("Eviction notice to user {} not queued: {}", node.user_id(), e);
        }
        self.close_node(node).await;
    }

    /// Close `node` exactly once: unregister it, drop its queues and release
    /// its room membership after notifying the room.
    pub async fn close_node(&self, node: &Arc<Node>) {
        if !node.begin_close() {
            return;
        }
        self.nodes.remove_if_same(node).await;
        node.close_queues();

        let room_id = node.room_id();
        if !room_id.is_none() {
            self.leave_and_notify(node, room_id).await;
        }
        tracing::info!(
            "Node for user {} closed (connected since {})",
            node.user_id(),
            unix_to_rfc3339(node.login_at())
        );
    }

    /// Offline notification first (relay plus local room), membership removal
    /// last. Both are skipped for the store when another instance owns the
    /// user's membership record.
    pub async fn leave_and_notify(&self, node: &Arc<Node>, room_id: RoomId) {
        let room = match self.rooms.get_room(room_id).await {
            Ok(room) => room,
            Err(e) => {
                tracing::warn!("Cannot leave room {} for user {}: {}", room_id, node.user_id(), e);
                return;
            }
        };

        // A record rewritten by another instance means the user is online
        // there; only the local room entry goes away.
        let owned = match self.rooms.owns_membership(room_id, node).await {
            Ok(owned) => owned,
            Err(e) => {
                tracing::warn!("Membership owner lookup for user {} failed: {}", node.user_id(), e);
                true
            }
        };
        if owned {
            let name = self.display_name_or_default(node.user_id()).await;
            let item = UserItem {
                id: node.user_id(),
                name: name.clone(),
            };
            let offline =
                self.room_event(Method::Offline, json!(item), node.user_id(), name, room_id);
            self.relay(offline.clone()).await;
            self.rooms.push(&room, &offline, node.user_id()).await;
        }

        if let Err(e) = self.rooms.leave(&room, node).await {
            tracing::warn!("Failed to remove user {} from room {}: {}", node.user_id(), room_id, e);
        }
    }

    /// Join `room`, leaving the node's previous room without notification.
    pub async fn enter_room(
        &self,
        node: &Arc<Node>,
        room: &Arc<Room>,
        display_name: &str,
    ) -> Result<(), RoomError> {
        let current = node.room_id();
        if !current.is_none() && current != room.id() {
            let previous = self.rooms.get_room(current).await?;
            self.rooms.leave(&previous, node).await?;
        }
        self.rooms.join(room, node, display_name).await
    }

    /// Decode and route one client frame.
    pub async fn dispatch(&self, node: &Arc<Node>, frame: &str) {
        self.dispatcher.dispatch(self, node, frame).await;
    }

    /// Route one frame received from a relay peer. Nothing here is relayed again.
    pub async fn dispatch_relay(&self, frame: &str) -> Result<(), serde_json::Error> {
        let out = Output::decode(frame)?;
        if out.from_server == self.instance.id {
            tracing::debug!("Ignoring relay frame that originated here");
            return Ok(());
        }

        match out.method {
            Method::Normal => {
                if let Some(node) = self.nodes.get(out.to_uid).await {
                    self.push_to(&node, out).await;
                }
            }
            Method::CreateRoomNotice => self.push_all(out).await,
            Method::ForceOfflineBroadcast => {
                if let Some(node) = self.nodes.get(out.from_uid).await {
                    tracing::info!(
                        "User {} signed in on {}, evicting local connection",
                        out.from_uid,
                        out.from_server
                    );
                    self.evict(&node).await;
                }
            }
            _ => match self.rooms.get_room(out.room_id).await {
                Ok(room) => {
                    let exclude = out.from_uid;
                    self.rooms.push(&room, &out, exclude).await;
                }
                Err(RoomError::NotFound) => {
                    tracing::debug!("Relay frame for unknown room {} dropped", out.room_id);
                }
                Err(e) => tracing::warn!("Relay frame for room {} dropped: {}", out.room_id, e),
            },
        }
        Ok(())
    }

    /// Queue `out` for the node's client, waiting while the queue is full.
    pub async fn reply(&self, node: &Node, out: Output) {
        if let Err(e) = node.send(out).await {
            tracing::debug!("Reply to user {} dropped: {}", node.user_id(), e);
        }
    }

    /// Bounded enqueue used for traffic that did not originate from `node`.
    pub async fn push_to(&self, node: &Node, out: Output) {
        if let Err(e) = node.send_timeout(out, self.settings.push_timeout).await {
            tracing::warn!("Push to user {} failed: {}", node.user_id(), e);
        }
    }

    /// Deliver `out` to every node on this instance.
    pub async fn push_all(&self, out: Output) {
        for node in self.nodes.all().await {
            self.push_to(&node, out.clone()).await;
        }
    }

    /// Queue `out` on the node's broadcast queue toward the cluster relay.
    pub async fn broadcast_from(&self, node: &Node, out: Output) {
        if let Err(e) = node.broadcast(out).await {
            tracing::debug!("Broadcast from user {} dropped: {}", node.user_id(), e);
        }
    }

    /// Hand `out` straight to the proxy, bypassing node queues.
    pub async fn relay(&self, out: Output) {
        if let Err(e) = self.relay.send(out).await {
            tracing::warn!("Relay to cluster failed: {}", e);
        }
    }

    pub async fn display_name_or_default(&self, user_id: UserId) -> String {
        match self.names.display_name(user_id).await {
            Ok(name) => name,
            Err(e) => {
                tracing::debug!("No display name for user {}: {}", user_id, e);
                String::new()
            }
        }
    }

    /// An event emitted by a user into a room.
    pub fn room_event(
        &self,
        method: Method,
        data: Value,
        from_uid: UserId,
        from_username: String,
        room_id: RoomId,
    ) -> Output {
        let mut out = Output::success("", method, data);
        out.from_uid = from_uid;
        out.from_username = from_username;
        out.room_id = room_id;
        out.from_server = self.instance.id.clone();
        out
    }

    /// Close every local node.
    pub async fn shutdown(&self) {
        let nodes = self.nodes.all().await;
        tracing::info!("Closing {} connection(s)", nodes.len());
        for node in nodes {
            self.close_node(&node).await;
        }
    }
}

/// Broadcast-relay loop: drains one node's broadcast queue into the proxy.
/// Delivery is best-effort; a failed hand-off is logged and dropped.
fn spawn_relay_loop(user_id: UserId, mut broadcast: mpsc::Receiver<Output>, relay: ProxyHandle) {
    tokio::spawn(async move {
        while let Some(out) = broadcast.recv().await {
            if let Err(e) = relay.send(out).await {
                tracing::warn!("Relay from user {} dropped: {}", user_id, e);
            }
        }
        tracing::debug!("Broadcast-relay loop for user {} finished", user_id);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecase::testing::{TestHub, next_relayed};

    #[tokio::test]
    async fn test_second_attach_evicts_first_node() {
        // テスト項目: 同じユーザーが再接続すると古い Node は通知を受けて閉じられる
        // given (前提条件):
        let TestHub { hub, mut relayed, .. } = TestHub::new();
        let (first, mut first_rx) = hub.attach(UserId(7)).await;

        // when (操作):
        let (second, _second_rx) = hub.attach(UserId(7)).await;

        // then (期待する結果):
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(hub.nodes().len().await, 1);
        assert!(Arc::ptr_eq(&hub.nodes().get(UserId(7)).await.unwrap(), &second));

        let notice = first_rx.recv().await.unwrap();
        assert_eq!(notice.code, Code::AuthError);
        assert_eq!(notice.msg, SIGNED_IN_ELSEWHERE);
        assert!(first_rx.recv().await.is_none());

        let force = next_relayed(&mut relayed, Method::ForceOfflineBroadcast).await;
        assert_eq!(force.from_uid, UserId(7));
        assert_eq!(force.from_server, hub.instance().id);
    }

    #[tokio::test]
    async fn test_close_node_is_idempotent() {
        // テスト項目: close を 2 回呼んでもオフライン通知は 1 回だけ
        // given (前提条件):
        let TestHub { hub, mut relayed, .. } = TestHub::new();
        let room = hub.rooms().create(RoomId(1), "Lobby").await.unwrap();
        let (a, _a_rx) = hub.attach(UserId(1)).await;
        let (b, mut b_rx) = hub.attach(UserId(2)).await;
        hub.enter_room(&a, &room, "alice").await.unwrap();
        hub.enter_room(&b, &room, "bob").await.unwrap();

        // when (操作):
        hub.close_node(&a).await;
        hub.close_node(&a).await;

        // then (期待する結果):
        let offline = b_rx.recv().await.unwrap();
        assert_eq!(offline.method, Method::Offline);
        assert_eq!(offline.from_uid, UserId(1));
        assert!(b_rx.try_recv().is_err());

        let relayed_offline = next_relayed(&mut relayed, Method::Offline).await;
        assert_eq!(relayed_offline.room_id, RoomId(1));
        assert!(relayed.try_recv().is_err());

        assert!(hub.nodes().get(UserId(1)).await.is_none());
        assert!(!hub.rooms().repository().is_member(RoomId(1), UserId(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_relay_group_frame_pushes_to_local_room() {
        // テスト項目: 他インスタンスからのグループメッセージはローカルのルームメンバーに届く
        // given (前提条件):
        let TestHub { hub, .. } = TestHub::new();
        let room = hub.rooms().create(RoomId(1), "Lobby").await.unwrap();
        let (b, mut b_rx) = hub.attach(UserId(2)).await;
        hub.enter_room(&b, &room, "bob").await.unwrap();

        // when (操作):
        let frame = r#"{"method":5,"data":"hi","from_uid":9,"room_id":1,"from_server":"hiroba_b"}"#;
        hub.dispatch_relay(frame).await.unwrap();

        // then (期待する結果):
        let out = b_rx.recv().await.unwrap();
        assert_eq!(out.method, Method::Group);
        assert_eq!(out.data, json!("hi"));
        assert_eq!(out.from_uid, UserId(9));
    }

    #[tokio::test]
    async fn test_relay_force_offline_evicts_local_node() {
        // テスト項目: 他インスタンスでのログイン通知でローカルの Node が閉じられる
        // given (前提条件):
        let TestHub { hub, .. } = TestHub::new();
        let (node, mut rx) = hub.attach(UserId(7)).await;

        // when (操作):
        let frame = r#"{"method":103,"from_uid":7,"from_server":"hiroba_b"}"#;
        hub.dispatch_relay(frame).await.unwrap();

        // then (期待する結果):
        assert!(node.is_closed());
        assert_eq!(rx.recv().await.unwrap().msg, SIGNED_IN_ELSEWHERE);
        assert!(hub.nodes().is_empty().await);
    }

    #[tokio::test]
    async fn test_relay_frame_from_self_is_ignored() {
        // テスト項目: 自インスタンス発のリレーフレームは処理しない
        // given (前提条件):
        let TestHub { hub, .. } = TestHub::new();
        let (node, _rx) = hub.attach(UserId(7)).await;
        let frame = format!(
            r#"{{"method":103,"from_uid":7,"from_server":"{}"}}"#,
            hub.instance().id
        );

        // when (操作):
        hub.dispatch_relay(&frame).await.unwrap();

        // then (期待する結果):
        assert!(!node.is_closed());
    }

    #[tokio::test]
    async fn test_relay_normal_and_notice_routing() {
        // テスト項目: 個別メッセージは宛先のみ、ルーム作成通知は全ノードに届く
        // given (前提条件):
        let TestHub { hub, .. } = TestHub::new();
        let (_a, mut a_rx) = hub.attach(UserId(1)).await;
        let (_b, mut b_rx) = hub.attach(UserId(2)).await;

        // when (操作):
        hub.dispatch_relay(r#"{"method":6,"data":"psst","from_uid":9,"to_uid":2,"from_server":"x"}"#)
            .await
            .unwrap();
        hub.dispatch_relay(r#"{"method":9,"data":{"id":9,"name":"Nine"},"from_uid":9,"from_server":"x"}"#)
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(b_rx.recv().await.unwrap().method, Method::Normal);
        assert_eq!(b_rx.recv().await.unwrap().method, Method::CreateRoomNotice);
        assert_eq!(a_rx.recv().await.unwrap().method, Method::CreateRoomNotice);
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_relay_frame_is_an_error() {
        // テスト項目: 不正なリレーフレームはエラーを返す
        let TestHub { hub, .. } = TestHub::new();
        assert!(hub.dispatch_relay("garbage").await.is_err());
    }
}
