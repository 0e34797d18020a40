//! Ephemeral KV cache (spec §4.3). Thin wrapper over
//! `redis::aio::ConnectionManager`, used exclusively by the monitoring
//! collector and the notification engine. Failures are logged and treated
//! as cache misses: "loss of the cache must not corrupt task state".

use std::time::Duration;

use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};

use crate::config::CacheConfig;

pub const KEY_METRICS_SYSTEM: &str = "scheduler:metrics:system";
pub const KEY_METRICS_TASKS_HISTORY: &str = "scheduler:metrics:tasks:history";
pub const KEY_NOTIFICATION_HISTORY: &str = "scheduler:notification:history";
pub const KEY_NOTIFICATION_QUEUE: &str = "scheduler:notification:queue";

pub fn notification_key(id: &str) -> String {
    format!("scheduler:notifications:{id}")
}

pub fn cooldown_key(rule_id: &str, alert_type: &str) -> String {
    format!("scheduler:notifications:cooldown:{rule_id}:{alert_type}")
}

#[derive(Clone)]
pub struct KvCache {
    manager: redis::aio::ConnectionManager,
}

impl KvCache {
    pub async fn connect(config: &CacheConfig) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(config.url.clone())?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }

    /// Fetch and deserialize a JSON value. Any failure (connection, missing
    /// key, bad JSON) is logged and treated as a cache miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.manager.clone();
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!("cache: failed to deserialize key {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("cache: GET {} failed, treating as miss: {}", key, e);
                None
            }
        }
    }

    /// Serialize to JSON and set with a TTL. Failures are logged and
    /// swallowed: the cache is never a system of record.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let mut conn = self.manager.clone();
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("cache: failed to serialize value for key {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = conn
            .set_ex::<_, _, ()>(key, raw, ttl.as_secs().max(1))
            .await
        {
            tracing::warn!("cache: SET {} failed (non-fatal): {}", key, e);
        }
    }

    /// Push a JSON value onto the head of a list, trimming it to `cap`
    /// entries (newest-first), e.g. the rolling task-metrics history and
    /// the sent-notification archive.
    pub async fn push_capped<T: Serialize>(&self, key: &str, value: &T, cap: isize) {
        let mut conn = self.manager.clone();
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("cache: failed to serialize list entry for key {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = conn.lpush::<_, _, ()>(key, raw).await {
            tracing::warn!("cache: LPUSH {} failed (non-fatal): {}", key, e);
            return;
        }
        if let Err(e) = conn.ltrim::<_, ()>(key, 0, cap - 1).await {
            tracing::warn!("cache: LTRIM {} failed (non-fatal): {}", key, e);
        }
    }

    /// Atomic existence check used for cooldown keys: `true` if a cooldown
    /// is currently active.
    pub async fn exists(&self, key: &str) -> bool {
        let mut conn = self.manager.clone();
        conn.exists(key).await.unwrap_or_else(|e| {
            tracing::warn!("cache: EXISTS {} failed, assuming no cooldown: {}", key, e);
            false
        })
    }

    /// Set a cooldown marker with the rule's configured TTL.
    pub async fn set_cooldown(&self, key: &str, ttl: Duration) {
        let mut conn = self.manager.clone();
        if let Err(e) = conn
            .set_ex::<_, _, ()>(key, "1", ttl.as_secs().max(1))
            .await
        {
            tracing::warn!("cache: failed to set cooldown {} (non-fatal): {}", key, e);
        }
    }

    /// Cheap liveness probe for the health collector (spec §4.9).
    pub async fn ping(&self) -> bool {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }
}
