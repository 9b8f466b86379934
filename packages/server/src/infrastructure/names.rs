//! Display-name resolution backed by the membership store.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use moka::sync::Cache;

use crate::domain::{NameError, NameResolver, UserId};

use super::repository::MembershipRepository;

pub const DEFAULT_CACHE_CAPACITY: u64 = 1000;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// Looks names up in `im:user:names` and caches hits in a bounded LRU.
///
/// With `anonymous_fallback` a user without a stored name is called
/// `user-<id>` instead of failing the lookup. Fallback names are not cached.
pub struct StoreNameResolver {
    repository: MembershipRepository,
    cache: Cache<UserId, Arc<str>>,
    anonymous_fallback: bool,
}

impl StoreNameResolver {
    pub fn new(repository: MembershipRepository, anonymous_fallback: bool) -> Self {
        Self {
            repository,
            cache: build_cache(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL),
            anonymous_fallback,
        }
    }

    /// Replace the cache bounds. Renamed users show up once `ttl` passes.
    pub fn with_cache(mut self, capacity: u64, ttl: Duration) -> Self {
        self.cache = build_cache(capacity, ttl);
        self
    }
}

fn build_cache(capacity: u64, ttl: Duration) -> Cache<UserId, Arc<str>> {
    Cache::builder()
        .max_capacity(capacity)
        .time_to_live(ttl)
        .build()
}

#[async_trait]
impl NameResolver for StoreNameResolver {
    async fn display_name(&self, user_id: UserId) -> Result<String, NameError> {
        if let Some(name) = self.cache.get(&user_id) {
            return Ok(name.to_string());
        }

        match self.repository.user_name(user_id).await? {
            Some(name) => {
                self.cache.insert(user_id, Arc::from(name.as_str()));
                Ok(name)
            }
            None if self.anonymous_fallback => Ok(format!("user-{}", user_id)),
            None => Err(NameError::Unknown(user_id.value())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::MembershipStore,
        infrastructure::{repository::membership::USER_NAMES_KEY, store::InMemoryMembershipStore},
    };

    #[tokio::test]
    async fn test_resolves_and_caches_stored_name() {
        // テスト項目: 保存された表示名を返し、キャッシュする
        // given (前提条件):
        let store = Arc::new(InMemoryMembershipStore::new());
        store.hash_set(USER_NAMES_KEY, "7", "bob").await.unwrap();
        let resolver = StoreNameResolver::new(MembershipRepository::new(store.clone()), false);

        // when (操作):
        let first = resolver.display_name(UserId(7)).await.unwrap();
        store.hash_delete(USER_NAMES_KEY, "7").await.unwrap();
        let cached = resolver.display_name(UserId(7)).await.unwrap();

        // then (期待する結果):
        assert_eq!(first, "bob");
        assert_eq!(cached, "bob");
    }

    #[tokio::test]
    async fn test_unknown_user_without_fallback_fails() {
        // テスト項目: フォールバック無効時、未登録ユーザーはエラー
        let store = Arc::new(InMemoryMembershipStore::new());
        let resolver = StoreNameResolver::new(MembershipRepository::new(store), false);

        let result = resolver.display_name(UserId(9)).await;

        assert_eq!(result, Err(NameError::Unknown(9)));
    }

    #[tokio::test]
    async fn test_unknown_user_with_fallback_gets_anonymous_name() {
        // テスト項目: フォールバック有効時、未登録ユーザーは user-<id>
        let store = Arc::new(InMemoryMembershipStore::new());
        let resolver = StoreNameResolver::new(MembershipRepository::new(store), true);

        let result = resolver.display_name(UserId(9)).await;

        assert_eq!(result, Ok("user-9".to_string()));
    }

    #[tokio::test]
    async fn test_cache_is_bounded() {
        // テスト項目: キャッシュは容量を超えて増えない
        // given (前提条件):
        let store = Arc::new(InMemoryMembershipStore::new());
        for id in 1..=50 {
            store
                .hash_set(USER_NAMES_KEY, &id.to_string(), &format!("name-{}", id))
                .await
                .unwrap();
        }
        let resolver = StoreNameResolver::new(MembershipRepository::new(store), false)
            .with_cache(10, DEFAULT_CACHE_TTL);

        // when (操作):
        for id in 1..=50 {
            resolver.display_name(UserId(id)).await.unwrap();
        }
        resolver.cache.run_pending_tasks();

        // then (期待する結果):
        assert!(resolver.cache.entry_count() <= 10);
    }

    #[tokio::test]
    async fn test_cached_name_expires_after_ttl() {
        // テスト項目: TTL を過ぎると変更後の表示名が見える
        // given (前提条件):
        let store = Arc::new(InMemoryMembershipStore::new());
        store.hash_set(USER_NAMES_KEY, "7", "bob").await.unwrap();
        let resolver = StoreNameResolver::new(MembershipRepository::new(store.clone()), false)
            .with_cache(100, Duration::from_millis(50));
        assert_eq!(resolver.display_name(UserId(7)).await.unwrap(), "bob");

        // when (操作):
        store.hash_set(USER_NAMES_KEY, "7", "robert").await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        // then (期待する結果):
        assert_eq!(resolver.display_name(UserId(7)).await.unwrap(), "robert");
    }
}
