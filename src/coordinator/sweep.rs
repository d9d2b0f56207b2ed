//! Background maintenance passes.
//!
//! The L1 sweep evicts idle entries and writes the survivors back: one
//! atomic L2 batch (which also renews their TTL) and one `last_use` update
//! per token in L3. Survivors deleted while the pass runs are left out of,
//! or retracted from, L2. The expiration sweep deletes L3 rows past the
//! horizon.
//!
//! Failures never abort a pass; each is reported on the error channel.

use std::time::Instant;
use tracing::{debug, info, warn};

use crate::memory_tier::SweepOutcome;
use crate::metrics;
use crate::record::now_secs;

use super::{Shared, SweepReport, SweepTask, TokenTiers};

impl Shared {
    pub(super) async fn sweep_l1(&self) -> SweepReport {
        let start = Instant::now();

        // Locks are released before any I/O below
        let SweepOutcome { evicted, survivors } = self.l1.sweep(self.config.l1_live_secs);
        metrics::set_l1_entries(self.l1.len());

        let mut report = SweepReport {
            evicted,
            flushed: survivors.len(),
            errors: 0,
        };

        if !survivors.is_empty() {
            let entries = survivors.iter().map(|s| (s.token.clone(), s.userid)).collect();

            if let Err(e) = self.cache_unless_buried(entries).await {
                warn!(error = %e, count = survivors.len(), "L1 sweep: cache write-back failed");
                self.report(SweepTask::CacheFlush, e);
                report.errors += 1;
            }

            for survivor in survivors.iter().filter(|s| !self.l1.is_buried(&s.token)) {
                let result = self
                    .bounded(
                        "L3",
                        "update_last_use",
                        self.l3.update_last_use(&survivor.token, survivor.last_use),
                    )
                    .await;
                if let Err(e) = result {
                    debug!(token = %survivor.token, error = %e, "L1 sweep: last_use flush failed");
                    self.report(SweepTask::LastUseFlush, e);
                    report.errors += 1;
                }
            }
        }

        metrics::record_l1_sweep(report.evicted, report.flushed, start.elapsed());
        if report.errors > 0 {
            warn!(
                evicted = report.evicted,
                flushed = report.flushed,
                errors = report.errors,
                "L1 sweep finished with errors"
            );
        } else {
            debug!(evicted = report.evicted, flushed = report.flushed, "L1 sweep finished");
        }
        report
    }

    /// Returns the number of rows removed (0 on failure or without a horizon).
    pub(super) async fn sweep_expired(&self) -> u64 {
        let Some(cutoff) = self.config.l3_not_before(now_secs()) else {
            return 0;
        };
        let start = Instant::now();

        match self.bounded("L3", "delete_expired", self.l3.delete_expired(cutoff)).await {
            Ok(deleted) => {
                metrics::record_expiration_sweep(deleted, start.elapsed());
                if deleted > 0 {
                    info!(deleted, cutoff, "Expired tokens removed");
                }
                deleted
            }
            Err(e) => {
                warn!(error = %e, "Expiration sweep failed");
                self.report(SweepTask::Expiration, e);
                0
            }
        }
    }
}

impl TokenTiers {
    /// Run one L1 sweep tick now, independent of the background schedule.
    #[tracing::instrument(skip(self))]
    pub async fn run_l1_sweep(&self) -> SweepReport {
        self.shared.sweep_l1().await
    }

    /// Run one expiration tick now. A no-op returning 0 without a horizon.
    #[tracing::instrument(skip(self))]
    pub async fn run_expiration_sweep(&self) -> u64 {
        self.shared.sweep_expired().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::TierConfig;
    use crate::record::{Metadata, TokenRecord};
    use crate::storage::memory::{MemoryArchiveStore, MemoryCacheStore};
    use crate::storage::traits::{ArchiveStore, CacheStore};
    use crate::token;
    use super::*;

    #[tokio::test]
    async fn test_sweep_flushes_survivors() {
        let l2 = Arc::new(MemoryCacheStore::default());
        let l3 = Arc::new(MemoryArchiveStore::new());
        let (tiers, _rx) = TokenTiers::initialize(l3.clone(), l2.clone(), TierConfig::default()).unwrap();

        let record = TokenRecord::new(token::generate(), 6, Metadata::new(), now_secs() - 30);
        l3.insert(&record).await.unwrap();
        tiers.l1().put(&record.token, 6);

        let report = tiers.run_l1_sweep().await;
        assert_eq!(report, SweepReport { evicted: 0, flushed: 1, errors: 0 });
        assert_eq!(l2.get(&record.token).await.unwrap(), 6);
        assert!(l3.record(&record.token).unwrap().last_use > record.last_use);
    }

    #[tokio::test]
    async fn test_sweep_evicts_idle_entries() {
        let l2 = Arc::new(MemoryCacheStore::default());
        let l3 = Arc::new(MemoryArchiveStore::new());
        let config = TierConfig {
            l1_live_secs: 1,
            l1_sweep_secs: 1,
            ..Default::default()
        };
        let (tiers, _rx) = TokenTiers::initialize(l3, l2.clone(), config).unwrap();

        let token = token::generate();
        tiers.l1().put_at(&token, 6, now_secs() - 10);

        let report = tiers.run_l1_sweep().await;
        assert_eq!(report.evicted, 1);
        assert_eq!(report.flushed, 0);
        assert!(tiers.l1().is_empty());
        // Nothing flushed, so nothing reached L2
        assert!(l2.is_empty());
    }

    #[tokio::test]
    async fn test_flush_of_deleted_token_is_harmless() {
        let l2 = Arc::new(MemoryCacheStore::new(Duration::from_secs(300)));
        let l3 = Arc::new(MemoryArchiveStore::new());
        let (tiers, mut rx) = TokenTiers::initialize(l3.clone(), l2, TierConfig::default()).unwrap();

        tiers.l1().put(&token::generate(), 6);
        let report = tiers.run_l1_sweep().await;
        assert_eq!(report.errors, 0);
        assert!(l3.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_expiration_sweep() {
        let l3 = Arc::new(MemoryArchiveStore::new());
        let config = TierConfig {
            l3_horizon_secs: 100,
            ..Default::default()
        };
        let (tiers, _rx) =
            TokenTiers::initialize(l3.clone(), Arc::new(MemoryCacheStore::default()), config).unwrap();

        let now = now_secs();
        let stale = TokenRecord::new(token::generate(), 1, Metadata::new(), now - 500);
        let fresh = TokenRecord::new(token::generate(), 1, Metadata::new(), now);
        l3.insert(&stale).await.unwrap();
        l3.insert(&fresh).await.unwrap();

        assert_eq!(tiers.run_expiration_sweep().await, 1);
        assert!(l3.record(&stale.token).is_none());
        assert!(l3.record(&fresh.token).is_some());
    }

    #[tokio::test]
    async fn test_expiration_sweep_without_horizon() {
        let l3 = Arc::new(MemoryArchiveStore::new());
        let (tiers, _rx) = TokenTiers::initialize(
            l3.clone(),
            Arc::new(MemoryCacheStore::default()),
            TierConfig::default(),
        )
        .unwrap();

        let ancient = TokenRecord::new(token::generate(), 1, Metadata::new(), 0);
        l3.insert(&ancient).await.unwrap();

        assert_eq!(tiers.run_expiration_sweep().await, 0);
        assert_eq!(l3.len(), 1);
    }
}
