//! Redis implementation of the membership store.
//!
//! Every instance of the cluster talks to the same Redis; `HSETNX` is the
//! single arbiter of room creation. Guarded deletes run as a Lua script so
//! the compare and the deletes are one atomic step.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::{AsyncCommands, Script, aio::ConnectionManager};

use crate::domain::{MembershipStore, StoreError};

/// KEYS[1] is the guard hash, KEYS[2..] the other hashes.
/// ARGV[1] is the field, ARGV[2] the expected guard value.
const DELETE_IF_EQ: &str = r"
if redis.call('HGET', KEYS[1], ARGV[1]) ~= ARGV[2] then
    return 0
end
for i = 1, #KEYS do
    redis.call('HDEL', KEYS[i], ARGV[1])
end
return 1
";

pub struct RedisMembershipStore {
    conn: ConnectionManager,
    delete_if_eq: Script,
}

fn backend(e: redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl RedisMembershipStore {
    /// Connect to the store at `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(backend)?;
        let conn = client.get_connection_manager().await.map_err(backend)?;
        tracing::info!("Connected to membership store at {}", url);
        Ok(Self {
            conn,
            delete_if_eq: Script::new(DELETE_IF_EQ),
        })
    }
}

#[async_trait]
impl MembershipStore for RedisMembershipStore {
    async fn hash_exists(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        conn.hexists(key, field).await.map_err(backend)
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.hget(key, field).await.map_err(backend)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(key, field, value).await.map_err(backend)?;
        Ok(())
    }

    async fn hash_set_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        conn.hset_nx(key, field, value).await.map_err(backend)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.hgetall(key).await.map_err(backend)
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(key, field).await.map_err(backend)?;
        Ok(())
    }

    async fn hash_delete_if_eq(
        &self,
        guard_key: &str,
        field: &str,
        expected: &str,
        others: &[&str],
    ) -> Result<bool, StoreError> {
        let mut invocation = self.delete_if_eq.prepare_invoke();
        invocation.key(guard_key);
        for key in others {
            invocation.key(*key);
        }
        invocation.arg(field).arg(expected);

        let mut conn = self.conn.clone();
        let deleted: i64 = invocation.invoke_async(&mut conn).await.map_err(backend)?;
        Ok(deleted == 1)
    }

    async fn delete_key(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(backend)?;
        Ok(())
    }
}
