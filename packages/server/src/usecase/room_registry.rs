//! Room Registry
//!
//! ローカルに接続しているメンバーだけを保持する Room のキャッシュです。
//! ルームの存在とメンバーシップの正は MembershipStore にあり、
//! ローカルの Room はいつでもストアから再構築できます。
//!
//! ## ロック
//!
//! - レジストリ全体の Mutex: 同じ ID の Room が 2 つ作られないようにする
//! - Room ごとの join / leave / push ロック: 遅い push が join/leave を塞がない

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::{Mutex, RwLock};

use crate::{
    domain::{Output, RoomError, RoomId, UserId},
    infrastructure::repository::MembershipRepository,
};

use super::node::Node;

pub struct Room {
    id: RoomId,
    name: String,
    members: RwLock<HashMap<UserId, Arc<Node>>>,
    join_lock: Mutex<()>,
    leave_lock: Mutex<()>,
    push_lock: Mutex<()>,
}

impl Room {
    fn new(id: RoomId, name: String) -> Self {
        Self {
            id,
            name,
            members: RwLock::new(HashMap::new()),
            join_lock: Mutex::new(()),
            leave_lock: Mutex::new(()),
            push_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local members only.
    pub async fn member_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.members.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn has_local_member(&self, user_id: UserId) -> bool {
        self.members.read().await.contains_key(&user_id)
    }

    async fn insert_member(&self, node: &Arc<Node>) {
        self.members
            .write()
            .await
            .insert(node.user_id(), node.clone());
    }
}

pub struct RoomRegistry {
    rooms: Mutex<HashMap<RoomId, Arc<Room>>>,
    repository: MembershipRepository,
    push_timeout: Duration,
}

impl RoomRegistry {
    pub fn new(repository: MembershipRepository, push_timeout: Duration) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            repository,
            push_timeout,
        }
    }

    pub fn repository(&self) -> &MembershipRepository {
        &self.repository
    }

    /// Locally materialized room, without consulting the store.
    pub async fn local(&self, room_id: RoomId) -> Option<Arc<Room>> {
        self.rooms.lock().await.get(&room_id).cloned()
    }

    /// ローカルの Room を返す。なければストアを確認して materialize する
    pub async fn get_room(&self, room_id: RoomId) -> Result<Arc<Room>, RoomError> {
        if room_id.is_none() {
            return Err(RoomError::NotFound);
        }

        let mut rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get(&room_id) {
            return Ok(room.clone());
        }

        let name = self
            .repository
            .room_name(room_id)
            .await?
            .ok_or(RoomError::NotFound)?;
        tracing::debug!("Room {} ('{}') rehydrated from store", room_id, name);
        let room = Arc::new(Room::new(room_id, name));
        rooms.insert(room_id, room.clone());
        Ok(room)
    }

    /// クラスタ全体で一度だけルームを作成する
    pub async fn create(&self, room_id: RoomId, name: &str) -> Result<Arc<Room>, RoomError> {
        if !self.repository.create_room(room_id, name).await? {
            return Err(RoomError::AlreadyCreated);
        }
        tracing::info!("Room {} ('{}') created", room_id, name);

        let mut rooms = self.rooms.lock().await;
        let room = rooms
            .entry(room_id)
            .or_insert_with(|| Arc::new(Room::new(room_id, name.to_string())));
        Ok(room.clone())
    }

    pub async fn join(
        &self,
        room: &Arc<Room>,
        node: &Arc<Node>,
        display_name: &str,
    ) -> Result<(), RoomError> {
        let _guard = room.join_lock.lock().await;
        self.repository
            .add_member(room.id, node.user_id(), display_name, node.instance_addr())
            .await?;
        room.insert_member(node).await;
        node.set_room(room.id);
        tracing::debug!("User {} joined room {}", node.user_id(), room.id);
        Ok(())
    }

    /// Whether the store's membership record for the node's user was
    /// written by this node's instance.
    pub async fn owns_membership(&self, room_id: RoomId, node: &Node) -> Result<bool, RoomError> {
        let owner = self
            .repository
            .member_instance(room_id, node.user_id())
            .await?;
        Ok(owner.as_deref() == Some(node.instance_addr()))
    }

    /// Drop the node from the local room. The store record is removed only
    /// while this instance still owns it.
    pub async fn leave(&self, room: &Arc<Room>, node: &Arc<Node>) -> Result<(), RoomError> {
        let _guard = room.leave_lock.lock().await;
        let removed = self
            .repository
            .remove_member(room.id, node.user_id(), node.instance_addr())
            .await?;
        if !removed {
            tracing::debug!(
                "Membership of user {} in room {} is held elsewhere; keeping store record",
                node.user_id(),
                room.id
            );
        }
        {
            let mut members = room.members.write().await;
            if members
                .get(&node.user_id())
                .is_some_and(|current| Arc::ptr_eq(current, node))
            {
                members.remove(&node.user_id());
            }
        }
        if node.room_id() == room.id {
            node.set_room(RoomId::NONE);
        }
        tracing::debug!("User {} left room {}", node.user_id(), room.id);
        Ok(())
    }

    /// Enqueue `out` on every local member except `exclude`.
    ///
    /// A member whose queue is closed or stays full for the push timeout is
    /// skipped. Returns the number of members that received the message.
    pub async fn push(&self, room: &Room, out: &Output, exclude: UserId) -> usize {
        let _guard = room.push_lock.lock().await;
        let targets: Vec<Arc<Node>> = room
            .members
            .read()
            .await
            .iter()
            .filter(|(uid, _)| **uid != exclude)
            .map(|(_, node)| node.clone())
            .collect();

        let mut delivered = 0;
        for node in targets {
            match node.send_timeout(out.clone(), self.push_timeout).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    "Push to user {} in room {} failed: {}",
                    node.user_id(),
                    room.id,
                    e
                ),
            }
        }
        delivered
    }

    /// Whether `node` belongs to `room_id`.
    ///
    /// A node with no current room adopts `room_id` when the store already
    /// lists it as a member, and this instance takes over the record. A node
    /// bound to another room never switches here.
    pub async fn is_in_room(&self, node: &Arc<Node>, room_id: RoomId) -> Result<bool, RoomError> {
        if room_id.is_none() {
            return Ok(false);
        }
        let current = node.room_id();
        if current == room_id {
            return Ok(true);
        }
        if !current.is_none() {
            return Ok(false);
        }

        if !self.repository.is_member(room_id, node.user_id()).await? {
            return Ok(false);
        }
        let room = self.get_room(room_id).await?;
        self.repository
            .set_member_instance(room_id, node.user_id(), node.instance_addr())
            .await?;
        room.insert_member(node).await;
        node.set_room(room_id);
        tracing::debug!("User {} adopted room {} from store", node.user_id(), room_id);
        Ok(true)
    }
}
