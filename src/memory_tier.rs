// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! L1: process-memory tier.
//!
//! Maps token to `(userid, last_use)`. Every access takes the exclusive lock
//! of the token's shard because every access writes `last_use`; there is no
//! reader path. With one shard (the default) this is a single coarse lock.
//!
//! The sweep evicts by age only and hands back a snapshot of survivors so
//! the caller can flush them to the slower tiers after the locks are gone.
//!
//! A deleted token leaves a tombstone in its shard until a deadline. Write-back
//! and promotion paths consult it so an in-flight copy cannot bring the token
//! back after the delete.

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;

use parking_lot::Mutex;

use crate::record::{now_secs, UserId, NO_USER};

#[derive(Debug, Clone, Copy)]
struct Entry {
    userid: UserId,
    last_use: i64,
}

/// A token that survived a sweep, captured for write-back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Survivor {
    pub token: String,
    pub userid: UserId,
    pub last_use: i64,
}

/// Result of one sweep pass.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub evicted: usize,
    pub survivors: Vec<Survivor>,
}

#[derive(Default)]
struct Shard {
    live: HashMap<String, Entry>,
    /// Deleted tokens and the second their tombstone lapses
    buried: HashMap<String, i64>,
}

impl Shard {
    fn is_buried(&self, token: &str, now: i64) -> bool {
        self.buried.get(token).is_some_and(|&until| until > now)
    }
}

pub struct MemoryTier {
    shards: Box<[Mutex<Shard>]>,
    hasher: RandomState,
}

impl MemoryTier {
    /// Create a tier with `shards` partitions (at least one).
    #[must_use]
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(Shard::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    #[inline]
    fn shard(&self, token: &str) -> &Mutex<Shard> {
        if self.shards.len() == 1 {
            return &self.shards[0];
        }
        let idx = (self.hasher.hash_one(token) % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    /// Userid for `token` (0 on miss). A hit bumps `last_use` to now.
    pub fn get(&self, token: &str) -> UserId {
        self.get_at(token, now_secs())
    }

    pub fn get_at(&self, token: &str, now: i64) -> UserId {
        let mut shard = self.shard(token).lock();
        match shard.live.get_mut(token) {
            Some(entry) => {
                entry.last_use = entry.last_use.max(now);
                entry.userid
            }
            None => NO_USER,
        }
    }

    /// Insert or overwrite with `last_use = now`. Clears any tombstone.
    pub fn put(&self, token: &str, userid: UserId) {
        self.put_at(token, userid, now_secs());
    }

    pub fn put_at(&self, token: &str, userid: UserId, now: i64) {
        let mut shard = self.shard(token).lock();
        shard.buried.remove(token);
        shard.live.insert(
            token.to_string(),
            Entry {
                userid,
                last_use: now,
            },
        );
    }

    /// Insert a copy read from a slower tier, unless the token is buried.
    ///
    /// Returns `false` when the tombstone refused the insert.
    pub fn promote(&self, token: &str, userid: UserId) -> bool {
        self.promote_at(token, userid, now_secs())
    }

    pub fn promote_at(&self, token: &str, userid: UserId, now: i64) -> bool {
        let mut shard = self.shard(token).lock();
        if shard.is_buried(token, now) {
            return false;
        }
        shard.live.insert(
            token.to_string(),
            Entry {
                userid,
                last_use: now,
            },
        );
        true
    }

    /// Idempotent removal.
    pub fn delete(&self, token: &str) {
        self.shard(token).lock().live.remove(token);
    }

    /// Remove `token` and refuse promotions of it for `hold_secs`.
    pub fn bury(&self, token: &str, hold_secs: u64) {
        self.bury_at(token, hold_secs, now_secs());
    }

    pub fn bury_at(&self, token: &str, hold_secs: u64, now: i64) {
        let until = now.saturating_add(i64::try_from(hold_secs).unwrap_or(i64::MAX));
        let mut shard = self.shard(token).lock();
        shard.live.remove(token);
        shard.buried.insert(token.to_string(), until);
    }

    #[must_use]
    pub fn is_buried(&self, token: &str) -> bool {
        self.shard(token).lock().is_buried(token, now_secs())
    }

    /// Evict entries unused for more than `live_secs` and snapshot the rest.
    /// Lapsed tombstones are dropped on the way.
    pub fn sweep(&self, live_secs: u64) -> SweepOutcome {
        self.sweep_at(live_secs, now_secs())
    }

    pub fn sweep_at(&self, live_secs: u64, now: i64) -> SweepOutcome {
        let cutoff = now.saturating_sub(i64::try_from(live_secs).unwrap_or(i64::MAX));
        let mut outcome = SweepOutcome::default();

        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            shard.buried.retain(|_, until| *until > now);
            let map = &mut shard.live;
            let before = map.len();
            map.retain(|_, e| e.last_use >= cutoff);
            outcome.evicted += before - map.len();
            outcome.survivors.extend(map.iter().map(|(token, e)| Survivor {
                token: token.clone(),
                userid: e.userid,
                last_use: e.last_use,
            }));
        }

        outcome
    }

    /// `last_use` of `token` without touching it.
    #[must_use]
    pub fn last_use(&self, token: &str) -> Option<i64> {
        self.shard(token).lock().live.get(token).map(|e| e.last_use)
    }

    #[must_use]
    pub fn contains(&self, token: &str) -> bool {
        self.shard(token).lock().live.contains_key(token)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().live.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            shard.live.clear();
            shard.buried.clear();
        }
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_miss_returns_sentinel() {
        let tier = MemoryTier::default();
        assert_eq!(tier.get("nope"), NO_USER);
        assert!(tier.is_empty());
    }

    #[test]
    fn test_put_then_get() {
        let tier = MemoryTier::default();
        tier.put("abc", 2);
        assert_eq!(tier.get("abc"), 2);
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn test_get_bumps_last_use() {
        let tier = MemoryTier::default();
        tier.put_at("abc", 2, 100);
        assert_eq!(tier.get_at("abc", 150), 2);
        assert_eq!(tier.last_use("abc"), Some(150));
    }

    #[test]
    fn test_get_never_moves_last_use_back() {
        let tier = MemoryTier::default();
        tier.put_at("abc", 2, 200);
        tier.get_at("abc", 150);
        assert_eq!(tier.last_use("abc"), Some(200));
    }

    #[test]
    fn test_put_overwrites() {
        let tier = MemoryTier::default();
        tier.put_at("abc", 2, 100);
        tier.put_at("abc", 3, 120);
        assert_eq!(tier.get_at("abc", 130), 3);
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let tier = MemoryTier::default();
        tier.put("abc", 2);
        tier.delete("abc");
        tier.delete("abc");
        assert_eq!(tier.get("abc"), NO_USER);
    }

    #[test]
    fn test_sweep_partitions_by_age() {
        let tier = MemoryTier::default();
        tier.put_at("old", 1, 1000);
        tier.put_at("fresh", 2, 1050);
        tier.put_at("edge", 3, 1040);

        let outcome = tier.sweep_at(60, 1100);

        assert_eq!(outcome.evicted, 1);
        assert!(!tier.contains("old"));
        let mut survivors: Vec<_> = outcome.survivors.iter().map(|s| s.token.as_str()).collect();
        survivors.sort_unstable();
        assert_eq!(survivors, vec!["edge", "fresh"]);
        let fresh = outcome.survivors.iter().find(|s| s.token == "fresh").unwrap();
        assert_eq!(fresh.userid, 2);
        assert_eq!(fresh.last_use, 1050);
    }

    #[test]
    fn test_sweep_empty() {
        let tier = MemoryTier::new(4);
        let outcome = tier.sweep(60);
        assert_eq!(outcome.evicted, 0);
        assert!(outcome.survivors.is_empty());
    }

    #[test]
    fn test_sharded_tier_keeps_contract() {
        let tier = MemoryTier::new(8);
        for i in 0..100 {
            tier.put_at(&format!("t{}", i), i + 1, 1000 + i);
        }
        assert_eq!(tier.len(), 100);
        assert_eq!(tier.get_at("t42", 2000), 43);
        assert_eq!(tier.last_use("t42"), Some(2000));

        // Cutoff 1090: only t90..t99 and the bumped t42 survive.
        let outcome = tier.sweep_at(60, 1150);
        assert_eq!(outcome.survivors.len(), 11);
        assert_eq!(outcome.evicted, 89);
        assert!(tier.contains("t42"));
        assert!(tier.contains("t99"));
        assert!(!tier.contains("t0"));
    }

    #[test]
    fn test_buried_token_refuses_promotion() {
        let tier = MemoryTier::new(4);
        tier.put_at("abc", 2, 100);
        tier.bury_at("abc", 300, 100);

        assert!(!tier.contains("abc"));
        assert!(!tier.promote_at("abc", 2, 150));
        assert_eq!(tier.get_at("abc", 150), NO_USER);

        // The hold lapses and the next sweep forgets it
        assert!(tier.promote_at("abc", 2, 400));
        tier.delete("abc");
        tier.sweep_at(60, 401);
        assert!(tier.promote_at("abc", 2, 150));
    }

    #[test]
    fn test_put_clears_tombstone() {
        let tier = MemoryTier::default();
        tier.bury("abc", 300);
        assert!(tier.is_buried("abc"));
        tier.put("abc", 2);
        assert!(!tier.is_buried("abc"));
        assert_eq!(tier.get("abc"), 2);
    }

    #[test]
    fn test_unbounded_live_secs_evicts_nothing() {
        let tier = MemoryTier::default();
        tier.put_at("abc", 2, 0);
        let outcome = tier.sweep_at(u64::MAX, 1_000_000);
        assert_eq!(outcome.evicted, 0);
        assert_eq!(outcome.survivors.len(), 1);
    }

    #[test]
    fn test_clear() {
        let tier = MemoryTier::new(3);
        tier.put("a", 1);
        tier.put("b", 2);
        tier.clear();
        assert!(tier.is_empty());
    }

    #[test]
    fn test_concurrent_access() {
        let tier = Arc::new(MemoryTier::new(4));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let tier = tier.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let token = format!("{}-{}", t, i);
                        tier.put(&token, t + 1);
                        assert_eq!(tier.get(&token), t + 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tier.len(), 400);
    }
}
