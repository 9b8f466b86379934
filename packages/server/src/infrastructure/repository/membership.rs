//! Membership Repository
//!
//! MembershipStore（ハッシュ型 KVS）の上にルーム・メンバーのキー配置を定義します。
//!
//! ```text
//! im:rooms                  room id  => room name     (存在判定)
//! im:room:<id>:members      user id  => display name
//! im:room:<id>:instances    user id  => instance address
//! im:user:names             user id  => display name  (ユーザーサービスが書き込む)
//! ```

use std::sync::Arc;

use crate::domain::{MembershipStore, RoomId, RoomInfo, StoreError, UserId, UserItem};

pub const ROOMS_KEY: &str = "im:rooms";
pub const USER_NAMES_KEY: &str = "im:user:names";

fn members_key(room_id: RoomId) -> String {
    format!("im:room:{}:members", room_id)
}

fn instances_key(room_id: RoomId) -> String {
    format!("im:room:{}:instances", room_id)
}

/// ルーム・メンバーシップの永続化を担当する Repository
#[derive(Clone)]
pub struct MembershipRepository {
    store: Arc<dyn MembershipStore>,
}

impl MembershipRepository {
    pub fn new(store: Arc<dyn MembershipStore>) -> Self {
        Self { store }
    }

    /// ルームをクラスタ全体で一度だけ作成する
    ///
    /// 作成できた場合は `true`、既に存在した場合は `false` を返します。
    pub async fn create_room(&self, room_id: RoomId, name: &str) -> Result<bool, StoreError> {
        self.store
            .hash_set_if_absent(ROOMS_KEY, &room_id.to_string(), name)
            .await
    }

    pub async fn room_exists(&self, room_id: RoomId) -> Result<bool, StoreError> {
        self.store
            .hash_exists(ROOMS_KEY, &room_id.to_string())
            .await
    }

    pub async fn room_name(&self, room_id: RoomId) -> Result<Option<String>, StoreError> {
        self.store.hash_get(ROOMS_KEY, &room_id.to_string()).await
    }

    /// 全ルームを ID 昇順で返す
    pub async fn list_rooms(&self) -> Result<Vec<RoomInfo>, StoreError> {
        let rooms = self.store.hash_get_all(ROOMS_KEY).await?;
        let mut infos: Vec<RoomInfo> = rooms
            .into_iter()
            .filter_map(|(id, name)| match id.parse::<u64>() {
                Ok(id) => Some(RoomInfo {
                    id: RoomId(id),
                    name,
                }),
                Err(_) => {
                    tracing::warn!("Skipping room record with malformed id '{}'", id);
                    None
                }
            })
            .collect();
        infos.sort_by_key(|r| r.id);
        Ok(infos)
    }

    pub async fn add_member(
        &self,
        room_id: RoomId,
        user_id: UserId,
        name: &str,
        instance_addr: &str,
    ) -> Result<(), StoreError> {
        // Owner first: a concurrent guarded remove from the old owner then
        // fails instead of deleting the fresh member record.
        let field = user_id.to_string();
        self.store
            .hash_set(&instances_key(room_id), &field, instance_addr)
            .await?;
        self.store
            .hash_set(&members_key(room_id), &field, name)
            .await
    }

    /// Instance address currently owning the user's membership record.
    pub async fn member_instance(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<String>, StoreError> {
        self.store
            .hash_get(&instances_key(room_id), &user_id.to_string())
            .await
    }

    /// Hand the user's membership record over to `instance_addr`.
    pub async fn set_member_instance(
        &self,
        room_id: RoomId,
        user_id: UserId,
        instance_addr: &str,
    ) -> Result<(), StoreError> {
        self.store
            .hash_set(&instances_key(room_id), &user_id.to_string(), instance_addr)
            .await
    }

    /// Remove the membership record if `instance_addr` still owns it.
    ///
    /// Returns `false` when the record is missing or owned by another instance.
    pub async fn remove_member(
        &self,
        room_id: RoomId,
        user_id: UserId,
        instance_addr: &str,
    ) -> Result<bool, StoreError> {
        self.store
            .hash_delete_if_eq(
                &instances_key(room_id),
                &user_id.to_string(),
                instance_addr,
                &[&members_key(room_id)],
            )
            .await
    }

    pub async fn is_member(&self, room_id: RoomId, user_id: UserId) -> Result<bool, StoreError> {
        self.store
            .hash_exists(&members_key(room_id), &user_id.to_string())
            .await
    }

    /// ルームのメンバー一覧を ID 昇順で返す
    pub async fn members(&self, room_id: RoomId) -> Result<Vec<UserItem>, StoreError> {
        let members = self.store.hash_get_all(&members_key(room_id)).await?;
        let mut items: Vec<UserItem> = members
            .into_iter()
            .filter_map(|(id, name)| {
                id.parse::<u64>()
                    .ok()
                    .filter(|id| *id != 0)
                    .map(|id| UserItem {
                        id: UserId(id),
                        name,
                    })
            })
            .collect();
        items.sort_by_key(|m| m.id);
        Ok(items)
    }

    /// ユーザーサービスが登録した表示名を取得する
    pub async fn user_name(&self, user_id: UserId) -> Result<Option<String>, StoreError> {
        self.store
            .hash_get(USER_NAMES_KEY, &user_id.to_string())
            .await
    }
}
