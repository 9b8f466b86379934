//! InMemory MembershipStore 実装
//!
//! HashMap をハッシュ型 KVS として使用します。複数インスタンスのテストでは
//! 同じ `Arc<InMemoryMembershipStore>` を共有することで、共有ストアとして振る舞います。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{MembershipStore, StoreError};

/// インメモリ MembershipStore 実装
#[derive(Default)]
pub struct InMemoryMembershipStore {
    /// key => (field => value)
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl InMemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MembershipStore for InMemoryMembershipStore {
    async fn hash_exists(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let hashes = self.hashes.lock().await;
        Ok(hashes.get(key).is_some_and(|h| h.contains_key(field)))
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let hashes = self.hashes.lock().await;
        Ok(hashes.get(key).and_then(|h| h.get(field).cloned()))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut hashes = self.hashes.lock().await;
        hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_set_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        let mut hashes = self.hashes.lock().await;
        let hash = hashes.entry(key.to_string()).or_default();
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let hashes = self.hashes.lock().await;
        Ok(hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let mut hashes = self.hashes.lock().await;
        if let Some(hash) = hashes.get_mut(key) {
            hash.remove(field);
            if hash.is_empty() {
                hashes.remove(key);
            }
        }
        Ok(())
    }

    async fn hash_delete_if_eq(
        &self,
        guard_key: &str,
        field: &str,
        expected: &str,
        others: &[&str],
    ) -> Result<bool, StoreError> {
        let mut hashes = self.hashes.lock().await;
        let owned = hashes
            .get(guard_key)
            .and_then(|h| h.get(field))
            .is_some_and(|value| value == expected);
        if !owned {
            return Ok(false);
        }
        for key in std::iter::once(guard_key).chain(others.iter().copied()) {
            if let Some(hash) = hashes.get_mut(key) {
                hash.remove(field);
                if hash.is_empty() {
                    hashes.remove(key);
                }
            }
        }
        Ok(true)
    }

    async fn delete_key(&self, key: &str) -> Result<(), StoreError> {
        let mut hashes = self.hashes.lock().await;
        hashes.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_if_absent_only_first_call_wins() {
        // テスト項目: 同じフィールドへの set-if-absent は最初の 1 回だけ成功する
        // given (前提条件):
        let store = InMemoryMembershipStore::new();

        // when (操作):
        let first = store.hash_set_if_absent("rooms", "42", "Lobby").await.unwrap();
        let second = store.hash_set_if_absent("rooms", "42", "Other").await.unwrap();

        // then (期待する結果):
        assert!(first);
        assert!(!second);
        assert_eq!(
            store.hash_get("rooms", "42").await.unwrap(),
            Some("Lobby".to_string())
        );
    }

    #[tokio::test]
    async fn test_hash_delete_removes_field() {
        // テスト項目: フィールドを削除すると exists が false になる
        // given (前提条件):
        let store = InMemoryMembershipStore::new();
        store.hash_set("room:1", "7", "bob").await.unwrap();

        // when (操作):
        store.hash_delete("room:1", "7").await.unwrap();

        // then (期待する結果):
        assert!(!store.hash_exists("room:1", "7").await.unwrap());
        assert!(store.hash_get_all("room:1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_noop() {
        // テスト項目: 存在しないキーの削除はエラーにならない（冪等性）
        // given (前提条件):
        let store = InMemoryMembershipStore::new();

        // when (操作):
        let result = store.delete_key("nothing").await;

        // then (期待する結果):
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_delete_if_eq_only_when_guard_matches() {
        // テスト項目: ガードの値が一致するときだけ全ハッシュからフィールドが消える
        // given (前提条件):
        let store = InMemoryMembershipStore::new();
        store.hash_set("room:1:instances", "7", "10.0.0.2:8080").await.unwrap();
        store.hash_set("room:1:members", "7", "bob").await.unwrap();

        // when (操作): 別インスタンスの値では削除できない
        let stale = store
            .hash_delete_if_eq("room:1:instances", "7", "10.0.0.1:8080", &["room:1:members"])
            .await
            .unwrap();

        // then (期待する結果):
        assert!(!stale);
        assert!(store.hash_exists("room:1:members", "7").await.unwrap());

        // when (操作):
        let owned = store
            .hash_delete_if_eq("room:1:instances", "7", "10.0.0.2:8080", &["room:1:members"])
            .await
            .unwrap();

        // then (期待する結果):
        assert!(owned);
        assert!(!store.hash_exists("room:1:members", "7").await.unwrap());
        assert!(!store.hash_exists("room:1:instances", "7").await.unwrap());
    }
}
