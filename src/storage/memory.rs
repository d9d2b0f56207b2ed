//! In-process implementations of both store traits.
//!
//! Useful for single-process deployments and for exercising the coordinator
//! without Redis or a database.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::record::{TokenRecord, UserId, NO_USER};
use crate::token;
use super::traits::{check_batch, ArchiveStore, CacheStore, StorageError};

/// L2 stand-in: a map with per-key expiry.
pub struct MemoryCacheStore {
    data: DashMap<String, (UserId, Instant)>,
    ttl: Duration,
}

impl MemoryCacheStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            data: DashMap::new(),
            ttl,
        }
    }

    /// Entries not yet expired.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data.iter().filter(|e| e.value().1 > now).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    /// Whether a live entry exists, without reading through `get`.
    #[must_use]
    pub fn contains(&self, token: &str) -> bool {
        self.data
            .get(token)
            .is_some_and(|e| e.value().1 > Instant::now())
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, token: &str) -> Result<UserId, StorageError> {
        let now = Instant::now();
        let hit = self.data.get(token).map(|e| *e.value());
        match hit {
            Some((userid, expires)) if expires > now => Ok(userid),
            Some(_) => {
                self.data.remove_if(token, |_, v| v.1 <= now);
                Ok(NO_USER)
            }
            None => Ok(NO_USER),
        }
    }

    async fn set(&self, tokens: &[String], userids: &[UserId]) -> Result<(), StorageError> {
        check_batch(tokens, userids)?;
        let expires = Instant::now() + self.ttl;
        for (token, userid) in tokens.iter().zip(userids) {
            self.data.insert(token.clone(), (*userid, expires));
        }
        Ok(())
    }

    async fn delete(&self, token: &str) -> Result<(), StorageError> {
        self.data.remove(token);
        Ok(())
    }
}

/// L3 stand-in keyed by canonical token.
#[derive(Default)]
pub struct MemoryArchiveStore {
    data: DashMap<String, TokenRecord>,
}

impl MemoryArchiveStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    /// Full record for `token`, ignoring any horizon.
    #[must_use]
    pub fn record(&self, token: &str) -> Option<TokenRecord> {
        let key = token::canonicalize(token)?;
        self.data.get(&key).map(|r| r.value().clone())
    }

    /// Overwrite `last_use` unconditionally. Lets tests age a record.
    pub fn force_last_use(&self, token: &str, last_use: i64) {
        if let Some(key) = token::canonicalize(token) {
            if let Some(mut r) = self.data.get_mut(&key) {
                r.last_use = last_use;
            }
        }
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchiveStore {
    async fn insert(&self, record: &TokenRecord) -> Result<(), StorageError> {
        let key = token::canonicalize(&record.token)
            .ok_or_else(|| StorageError::MalformedToken(record.token.clone()))?;
        match self.data.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(e) => {
                Err(StorageError::Duplicate(e.key().clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let mut record = record.clone();
                record.token = e.key().clone();
                e.insert(record);
                Ok(())
            }
        }
    }

    async fn update_last_use(&self, token: &str, last_use: i64) -> Result<(), StorageError> {
        let Some(key) = token::canonicalize(token) else {
            return Ok(());
        };
        if let Some(mut r) = self.data.get_mut(&key) {
            r.last_use = r.last_use.max(last_use);
        }
        Ok(())
    }

    async fn lookup(&self, token: &str, not_before: Option<i64>) -> Result<UserId, StorageError> {
        let Some(key) = token::canonicalize(token) else {
            return Ok(NO_USER);
        };
        Ok(self
            .data
            .get(&key)
            .filter(|r| not_before.map_or(true, |nb| r.last_use > nb))
            .map_or(NO_USER, |r| r.userid))
    }

    async fn delete(&self, token: &str) -> Result<(), StorageError> {
        if let Some(key) = token::canonicalize(token) {
            self.data.remove(&key);
        }
        Ok(())
    }

    async fn list_by_user(&self, userid: UserId) -> Result<Vec<TokenRecord>, StorageError> {
        let mut records: Vec<TokenRecord> = self
            .data
            .iter()
            .filter(|r| r.value().userid == userid)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.token.cmp(&b.token)));
        Ok(records)
    }

    async fn delete_expired(&self, cutoff: i64) -> Result<u64, StorageError> {
        let before = self.data.len();
        self.data.retain(|_, r| r.last_use >= cutoff);
        Ok(before.saturating_sub(self.data.len()) as u64)
    }
}
