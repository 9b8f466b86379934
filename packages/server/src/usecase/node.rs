//! Connection Node
//!
//! 1 クライアント接続につき 1 つ作られるサーバー側の状態です。
//!
//! ## 責務
//!
//! - ユーザー ID・現在のルーム・ハートビート状態の保持
//! - unicast（クライアント宛て）と broadcast（クラスタ宛て）の 2 本の bounded キュー
//! - 一度だけ実行される close の状態管理
//!
//! ソケットの読み書きは UI 層（`ui/handler/websocket.rs`）が担当し、
//! ここではキューの送信側だけを公開します。キューが満杯のとき `send` は
//! 空きができるまで待ちます（バックプレッシャー）。

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::sync::{mpsc, watch};

use crate::domain::{InstanceId, Output, RoomId, ServiceInstance, UserId};

use super::error::NodeError;

/// Receiving halves of a node's queues.
pub struct NodeQueues {
    /// Consumed by the socket write loop
    pub unicast: mpsc::Receiver<Output>,
    /// Consumed by the broadcast-relay loop
    pub broadcast: mpsc::Receiver<Output>,
}

struct Senders {
    unicast: mpsc::Sender<Output>,
    broadcast: mpsc::Sender<Output>,
}

pub struct Node {
    user_id: UserId,
    room_id: AtomicU64,
    instance_id: InstanceId,
    instance_addr: String,
    login_at: i64,
    heartbeat_at: AtomicI64,
    heartbeat_failures: AtomicU32,
    /// `None` once the queues have been closed
    senders: Mutex<Option<Senders>>,
    closed: watch::Sender<bool>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("user_id", &self.user_id)
            .field("room_id", &self.room_id())
            .field("instance_id", &self.instance_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Node {
    /// 新しい Node とそのキューの受信側を作成
    pub fn new(
        user_id: UserId,
        instance: &ServiceInstance,
        queue_capacity: usize,
        login_at: i64,
    ) -> (Arc<Self>, NodeQueues) {
        let (unicast_tx, unicast_rx) = mpsc::channel(queue_capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(queue_capacity);
        let (closed, _) = watch::channel(false);

        let node = Arc::new(Self {
            user_id,
            room_id: AtomicU64::new(RoomId::NONE.value()),
            instance_id: instance.id.clone(),
            instance_addr: instance.authority(),
            login_at,
            heartbeat_at: AtomicI64::new(login_at),
            heartbeat_failures: AtomicU32::new(0),
            senders: Mutex::new(Some(Senders {
                unicast: unicast_tx,
                broadcast: broadcast_tx,
            })),
            closed,
        });

        let queues = NodeQueues {
            unicast: unicast_rx,
            broadcast: broadcast_rx,
        };
        (node, queues)
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn room_id(&self) -> RoomId {
        RoomId(self.room_id.load(Ordering::Acquire))
    }

    pub fn set_room(&self, room_id: RoomId) {
        self.room_id.store(room_id.value(), Ordering::Release);
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// `host:port` of the instance serving this node
    pub fn instance_addr(&self) -> &str {
        &self.instance_addr
    }

    pub fn login_at(&self) -> i64 {
        self.login_at
    }

    pub fn heartbeat_at(&self) -> i64 {
        self.heartbeat_at.load(Ordering::Acquire)
    }

    /// A ping went out successfully.
    pub fn record_heartbeat(&self, now: i64) {
        self.heartbeat_at.store(now, Ordering::Release);
        self.heartbeat_failures.store(0, Ordering::Release);
    }

    /// A ping failed. Returns the consecutive failure count.
    pub fn record_heartbeat_failure(&self) -> u32 {
        self.heartbeat_failures.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Mark the node closed. Only the first caller gets `true`.
    pub fn begin_close(&self) -> bool {
        self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    /// Resolves once the node has been closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives as long as `self`, so this cannot fail while we borrow it.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Drop both queue senders. Receivers see the end of their stream once
    /// in-flight sends complete.
    pub fn close_queues(&self) {
        self.lock_senders().take();
    }

    fn lock_senders(&self) -> std::sync::MutexGuard<'_, Option<Senders>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unicast_sender(&self) -> Result<mpsc::Sender<Output>, NodeError> {
        self.lock_senders()
            .as_ref()
            .map(|s| s.unicast.clone())
            .ok_or(NodeError::Closed)
    }

    fn broadcast_sender(&self) -> Result<mpsc::Sender<Output>, NodeError> {
        self.lock_senders()
            .as_ref()
            .map(|s| s.broadcast.clone())
            .ok_or(NodeError::Closed)
    }

    /// Enqueue onto the unicast queue, waiting while it is full.
    pub async fn send(&self, out: Output) -> Result<(), NodeError> {
        let tx = self.unicast_sender()?;
        tx.send(out).await.map_err(|_| NodeError::Closed)
    }

    /// Enqueue onto the unicast queue, giving up after `timeout`.
    pub async fn send_timeout(&self, out: Output, timeout: Duration) -> Result<(), NodeError> {
        let tx = self.unicast_sender()?;
        tx.send_timeout(out, timeout).await.map_err(|e| match e {
            mpsc::error::SendTimeoutError::Timeout(_) => NodeError::Timeout,
            mpsc::error::SendTimeoutError::Closed(_) => NodeError::Closed,
        })
    }

    /// Enqueue onto the broadcast queue toward the cluster relay.
    pub async fn broadcast(&self, out: Output) -> Result<(), NodeError> {
        let tx = self.broadcast_sender()?;
        tx.send(out).await.map_err(|_| NodeError::Closed)
    }
}
