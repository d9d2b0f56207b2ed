// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis storage backend for the L2 cache.
//!
//! Each token is a plain string key holding the userid:
//!
//! ```text
//! SET <prefix><token> <userid> EX <ttl>
//! ```
//!
//! Batches go through `MULTI`/`EXEC` so either every key is written or none
//! is. `GET` never touches the TTL.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, pipe};
use crate::record::{UserId, NO_USER};
use super::traits::{check_batch, CacheStore, StorageError};
use crate::resilience::retry::{retry, RetryConfig};

pub struct RedisStore {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "tok:" → "tok:6f96…")
    prefix: String,
    ttl_secs: u64,
    retry: RetryConfig,
}

impl RedisStore {
    /// Connect to `connection_string` with startup-mode retry.
    pub async fn connect(connection_string: &str, ttl_secs: u64, prefix: Option<&str>) -> Result<Self, StorageError> {
        let client = Client::open(connection_string)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        // Fast-fail after a few seconds, don't hang forever
        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))?;

        Ok(Self::from_connection(connection, ttl_secs, prefix))
    }

    /// Wrap a connection manager the host already owns.
    pub fn from_connection(connection: ConnectionManager, ttl_secs: u64, prefix: Option<&str>) -> Self {
        Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
            ttl_secs,
            retry: RetryConfig::query(),
        }
    }

    /// Replace the per-query retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Apply the prefix to a key.
    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    /// Get a clone of the connection manager
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    /// Get the configured prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Seconds left on `token`'s key: -2 if missing, -1 if it has no expiry.
    pub async fn ttl(&self, token: &str) -> Result<i64, StorageError> {
        let mut conn = self.connection.clone();
        let secs: i64 = conn
            .ttl(self.prefixed_key(token))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(secs)
    }

    /// Round-trip latency check.
    pub async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}

/// A stored value that is not a positive integer reads as a miss.
fn parse_userid(raw: Option<String>) -> UserId {
    raw.and_then(|s| s.trim().parse::<UserId>().ok())
        .filter(|id| *id > 0)
        .unwrap_or(NO_USER)
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, token: &str) -> Result<UserId, StorageError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(token);

        let raw: Option<String> = retry("redis_get", &self.retry, || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let data: Option<String> = conn.get(&key).await?;
                Ok(data)
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))?;

        Ok(parse_userid(raw))
    }

    async fn set(&self, tokens: &[String], userids: &[UserId]) -> Result<(), StorageError> {
        check_batch(tokens, userids)?;

        let conn = self.connection.clone();
        let keys: Vec<String> = tokens.iter().map(|t| self.prefixed_key(t)).collect();
        let ttl = self.ttl_secs;

        retry("redis_set_batch", &self.retry, || {
            let mut conn = conn.clone();
            let keys = keys.clone();
            async move {
                let mut p = pipe();
                p.atomic();
                for (key, userid) in keys.iter().zip(userids) {
                    p.cmd("SET").arg(key).arg(*userid).arg("EX").arg(ttl).ignore();
                }
                let _: () = p.query_async(&mut conn).await?;
                Ok(())
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))
    }

    async fn delete(&self, token: &str) -> Result<(), StorageError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(token);

        retry("redis_delete", &self.retry, || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let _: () = conn.del(&key).await?;
                Ok(())
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))
    }
}
