// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Network-backed [`KvStore`] implementation over Redis.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use aibro_core::{AibroError, KvStore};

/// Key-value store backed by a Redis server.
///
/// Holds a multiplexed connection; all operations are non-blocking. Callers
/// wrap this in a [`FallbackStore`](crate::FallbackStore) so an unreachable
/// server degrades to local files instead of failing requests.
#[derive(Clone)]
pub struct RedisStore {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisStore {
    /// Connect to the given Redis URL (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, AibroError> {
        let client = redis::Client::open(url).map_err(|e| AibroError::Store {
            message: format!("invalid redis url {url}"),
            source: Some(Box::new(e)),
        })?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| AibroError::Store {
                message: format!("redis connect failed for {url}"),
                source: Some(Box::new(e)),
            })?;
        tracing::info!(url, "connected to redis");
        Ok(Self { conn })
    }
}

fn store_err(op: &str, e: redis::RedisError) -> AibroError {
    AibroError::Store {
        message: format!("redis {op} failed"),
        source: Some(Box::new(e)),
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AibroError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| store_err("get", e))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), AibroError> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => conn
                .set_ex(key, value, ttl.as_secs().max(1))
                .await
                .map_err(|e| store_err("setex", e)),
            None => conn.set(key, value).await.map_err(|e| store_err("set", e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), AibroError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await.map_err(|e| store_err("del", e))?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), AibroError> {
        let mut conn = self.conn.clone();
        let _: bool = conn
            .expire(key, ttl.as_secs() as i64)
            .await
            .map_err(|e| store_err("expire", e))?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, AibroError> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1i64).await.map_err(|e| store_err("incr", e))
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, AibroError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| store_err("set nx", e))?;
        Ok(reply.is_some())
    }
}
