//! Value objects shared across layers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// User identifier. Unique per connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl UserId {
    pub fn value(self) -> u64 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room identifier. `0` means "no room".
///
/// A room id equals the id of the user who created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl RoomId {
    pub const NONE: RoomId = RoomId(0);

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl From<UserId> for RoomId {
    fn from(user_id: UserId) -> Self {
        RoomId(user_id.0)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one running instance of the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// `<app name>_<uuid>`
    pub fn generate(app_name: &str) -> Self {
        Self(format!("{}_{}", app_name, uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A healthy instance as reported by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstance {
    pub id: InstanceId,
    pub address: String,
    pub port: u16,
}

impl ServiceInstance {
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: InstanceId::new(id),
            address: address.into(),
            port,
        }
    }

    /// `host:port`
    pub fn authority(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_from_creator() {
        // テスト項目: 作成者のユーザー ID がそのままルーム ID になる
        // given (前提条件):
        let creator = UserId(42);

        // when (操作):
        let room_id = RoomId::from(creator);

        // then (期待する結果):
        assert_eq!(room_id, RoomId(42));
        assert!(!room_id.is_none());
        assert!(RoomId::NONE.is_none());
    }

    #[test]
    fn test_instance_id_generate_has_app_prefix() {
        // テスト項目: 生成されたインスタンス ID はアプリ名で始まり、毎回異なる
        // given (前提条件):
        let app = "hiroba";

        // when (操作):
        let a = InstanceId::generate(app);
        let b = InstanceId::generate(app);

        // then (期待する結果):
        assert!(a.as_str().starts_with("hiroba_"));
        assert_ne!(a, b);
    }
}
