//! Broadcast Proxy
//!
//! 他の全インスタンスへのリレー接続（フルメッシュ）を保持し、
//! broadcast 対象のメッセージを送信元以外の全ピアへ転送します。
//!
//! ## 設計ノート
//!
//! ピアの接続マップは `run` のタスクだけが触るので、ロックは不要です。
//! 入力は 3 つだけです:
//!
//! - ローカルからの送信メッセージ（`ProxyHandle` 経由）
//! - Directory からのトポロジー変更通知
//! - ping タイマー

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior},
};

use crate::domain::{
    InstanceId, Output, PeerConnector, PeerLink, RelayError, ServiceInstance,
};

/// Producer side of the proxy's outbound channel.
#[derive(Clone)]
pub struct ProxyHandle {
    origin: InstanceId,
    tx: mpsc::Sender<Output>,
}

impl ProxyHandle {
    pub fn channel(origin: InstanceId, capacity: usize) -> (Self, mpsc::Receiver<Output>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { origin, tx }, rx)
    }

    /// Queue `out` for every peer. Unset origins are stamped with this instance.
    pub async fn send(&self, mut out: Output) -> Result<(), RelayError> {
        if out.from_server.as_str().is_empty() {
            out.from_server = self.origin.clone();
        }
        self.tx.send(out).await.map_err(|_| RelayError::Closed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProxySettings {
    pub ping_interval: Duration,
    /// A peer is dropped once its consecutive ping failures exceed this.
    pub max_ping_failures: u32,
}

struct Peer {
    instance: ServiceInstance,
    link: Box<dyn PeerLink>,
    ping_failures: u32,
}

pub struct BroadcastProxy {
    self_id: InstanceId,
    connector: Arc<dyn PeerConnector>,
    settings: ProxySettings,
    peers: HashMap<InstanceId, Peer>,
    /// Last healthy set reported by the directory, self excluded.
    live: HashMap<InstanceId, ServiceInstance>,
}

impl BroadcastProxy {
    pub fn new(
        self_id: InstanceId,
        connector: Arc<dyn PeerConnector>,
        settings: ProxySettings,
    ) -> Self {
        Self {
            self_id,
            connector,
            settings,
            peers: HashMap::new(),
            live: HashMap::new(),
        }
    }

    pub fn peer_ids(&self) -> Vec<InstanceId> {
        let mut ids: Vec<InstanceId> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Proxy write loop. Returns once every `ProxyHandle` has been dropped.
    pub async fn run(
        mut self,
        mut outbound: mpsc::Receiver<Output>,
        mut topology: mpsc::Receiver<Vec<ServiceInstance>>,
    ) {
        let period = self.settings.ping_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut topology_open = true;

        tracing::info!("Broadcast proxy started for instance {}", self.self_id);
        loop {
            tokio::select! {
                message = outbound.recv() => match message {
                    Some(out) => self.forward(&out).await,
                    None => break,
                },
                instances = topology.recv(), if topology_open => match instances {
                    Some(instances) => self.reconcile(instances).await,
                    None => {
                        tracing::warn!("Directory watch ended; keeping current relay peers");
                        topology_open = false;
                    }
                },
                _ = ticker.tick() => self.ping_all().await,
            }
        }

        self.close_all().await;
        tracing::info!("Broadcast proxy stopped");
    }

    /// Write `out` to every peer except its origin. A failed write gets one
    /// reconnect and one retry; a peer whose reconnect fails is removed and
    /// re-opened from the last topology on the next ping tick.
    pub async fn forward(&mut self, out: &Output) {
        let frame = match out.encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to encode relay message: {}", e);
                return;
            }
        };

        let targets: Vec<InstanceId> = self
            .peers
            .keys()
            .filter(|id| **id != out.from_server)
            .cloned()
            .collect();

        for id in targets {
            let Some(peer) = self.peers.get_mut(&id) else {
                continue;
            };
            let Err(e) = peer.link.send_text(frame.clone()).await else {
                continue;
            };
            tracing::warn!("Relay write to {} failed: {}; reconnecting", id, e);
            peer.link.close().await;

            match self.connector.connect(&peer.instance).await {
                Ok(link) => {
                    peer.link = link;
                    peer.ping_failures = 0;
                    if let Err(e) = peer.link.send_text(frame.clone()).await {
                        tracing::warn!("Relay retry to {} failed, dropping message: {}", id, e);
                    }
                }
                Err(e) => {
                    tracing::warn!("Relay reconnect to {} failed, dropping message: {}", id, e);
                    self.peers.remove(&id);
                }
            }
        }
    }

    /// Open links to newly listed instances and drop the ones no longer listed.
    pub async fn reconcile(&mut self, instances: Vec<ServiceInstance>) {
        self.live = instances
            .into_iter()
            .filter(|i| i.id != self.self_id)
            .map(|i| (i.id.clone(), i))
            .collect();

        let stale: Vec<InstanceId> = self
            .peers
            .iter()
            .filter(|(id, peer)| self.live.get(*id).is_none_or(|i| *i != peer.instance))
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            if let Some(mut peer) = self.peers.remove(&id) {
                peer.link.close().await;
                tracing::info!("Relay peer {} removed", id);
            }
        }

        self.connect_missing().await;
    }

    /// Connect every live instance that has no link. Failures are retried on
    /// the next ping tick or topology event.
    async fn connect_missing(&mut self) {
        let missing: Vec<ServiceInstance> = self
            .live
            .iter()
            .filter(|(id, _)| !self.peers.contains_key(*id))
            .map(|(_, instance)| instance.clone())
            .collect();

        for instance in missing {
            match self.connector.connect(&instance).await {
                Ok(link) => {
                    tracing::info!("Relay peer {} added ({})", instance.id, instance.authority());
                    self.peers.insert(
                        instance.id.clone(),
                        Peer {
                            instance,
                            link,
                            ping_failures: 0,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!("Relay connect to {} failed: {}", instance.id, e);
                }
            }
        }
    }

    /// Ping every peer, evict the ones past the failure limit, then re-open
    /// links to live instances that have none.
    pub async fn ping_all(&mut self) {
        let mut dead = Vec::new();
        for (id, peer) in self.peers.iter_mut() {
            match peer.link.ping().await {
                Ok(()) => peer.ping_failures = 0,
                Err(e) => {
                    peer.ping_failures += 1;
                    tracing::warn!(
                        "Relay ping to {} failed ({} in a row): {}",
                        id,
                        peer.ping_failures,
                        e
                    );
                    if peer.ping_failures > self.settings.max_ping_failures {
                        dead.push(id.clone());
                    }
                }
            }
        }
        for id in dead {
            if let Some(mut peer) = self.peers.remove(&id) {
                peer.link.close().await;
                tracing::info!("Relay peer {} removed after repeated ping failures", id);
            }
        }
        self.connect_missing().await;
    }

    async fn close_all(&mut self) {
        for (_, mut peer) in self.peers.drain() {
            peer.link.close().await;
        }
    }
}
