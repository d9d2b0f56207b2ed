// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;

use crate::record::{TokenRecord, UserId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Token '{0}' already exists")]
    Duplicate(String),
    #[error("Malformed token '{0}'")]
    MalformedToken(String),
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),
    #[error("Operation '{0}' timed out")]
    Timeout(String),
}

impl StorageError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Caller mistakes (duplicates, malformed input, bad batches) never are.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Timeout(_))
    }
}

/// Reject batches the remote cache cannot apply atomically.
pub fn check_batch(tokens: &[String], userids: &[UserId]) -> Result<(), StorageError> {
    if tokens.is_empty() {
        return Err(StorageError::InvalidBatch("empty batch".to_string()));
    }
    if tokens.len() != userids.len() {
        return Err(StorageError::InvalidBatch(format!(
            "{} tokens but {} userids",
            tokens.len(),
            userids.len()
        )));
    }
    Ok(())
}

/// L2: shared key/value cache with a per-key TTL.
///
/// A `get` hit never refreshes the TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Userid for `token`, or 0 when absent or expired.
    async fn get(&self, token: &str) -> Result<UserId, StorageError>;

    /// Set every `tokens[i] -> userids[i]` atomically with the configured TTL.
    async fn set(&self, tokens: &[String], userids: &[UserId]) -> Result<(), StorageError>;

    /// Idempotent: deleting an absent key is not an error.
    async fn delete(&self, token: &str) -> Result<(), StorageError>;
}

/// L3: the persistent store of record.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn insert(&self, record: &TokenRecord) -> Result<(), StorageError>;

    /// Move `last_use` forward. A missing row is not an error.
    async fn update_last_use(&self, token: &str, last_use: i64) -> Result<(), StorageError>;

    /// Userid for `token`, or 0 when absent, malformed, or (with `not_before`)
    /// not used since that timestamp.
    async fn lookup(&self, token: &str, not_before: Option<i64>) -> Result<UserId, StorageError>;

    async fn delete(&self, token: &str) -> Result<(), StorageError>;

    async fn list_by_user(&self, userid: UserId) -> Result<Vec<TokenRecord>, StorageError>;

    /// Remove every row with `last_use < cutoff`, returning how many went.
    async fn delete_expired(&self, cutoff: i64) -> Result<u64, StorageError>;
}
