//! Redis-backed `KvStore`, the production implementation (§4.A, §4.B,
//! §4.H all share this connection).

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use vrp_domain::error::{Error, Result};

pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Unavailable(format!("invalid KV store URL: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::Unavailable(format!("KV store connect failed: {e}")))?;
        Ok(Self { conn })
    }
}

fn map_redis_err(e: redis::RedisError) -> Error {
    Error::Unavailable(format!("KV store: {e}"))
}

#[async_trait]
impl crate::KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(map_redis_err)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()> {
        let mut conn = self.conn.clone();
        match ttl_secs {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(key, value, ttl)
                .await
                .map_err(map_redis_err),
            None => conn.set::<_, _, ()>(key, value).await.map_err(map_redis_err),
        }
    }

    async fn incr(&self, key: &str, ttl_secs: u64) -> Result<i64> {
        let mut conn = self.conn.clone();
        let n: i64 = conn.incr(key, 1).await.map_err(map_redis_err)?;
        // Refresh the TTL on every increment so a crash between INCR and
        // EXPIRE cannot leak capacity indefinitely.
        let _: () = conn.expire(key, ttl_secs as i64).await.map_err(map_redis_err)?;
        Ok(n)
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        conn.decr(key, 1).await.map_err(map_redis_err)
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(key, value).await.map_err(map_redis_err)
    }

    async fn list_pop(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.lpop(key, None).await.map_err(map_redis_err)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }
}
