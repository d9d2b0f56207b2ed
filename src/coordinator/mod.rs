// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tier coordinator.
//!
//! [`TokenTiers`] ties the three tiers together:
//! - L1 process memory ([`MemoryTier`]), swept by age
//! - L2 remote cache ([`CacheStore`]), expired by TTL
//! - L3 persistent store ([`ArchiveStore`]), the store of record
//!
//! # Lifecycle
//!
//! ```text
//! Created → Running → ShuttingDown → Stopped
//! ```
//!
//! Request operations do not depend on the lifecycle; [`TokenTiers::start`]
//! only spawns the sweepers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use token_tiers::{TokenTiers, TierConfig, TierState, MemoryArchiveStore, MemoryCacheStore};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (tiers, _errors) = TokenTiers::initialize(
//!     Arc::new(MemoryArchiveStore::new()),
//!     Arc::new(MemoryCacheStore::default()),
//!     TierConfig::default(),
//! )
//! .expect("valid config");
//!
//! assert_eq!(tiers.state(), TierState::Created);
//! tiers.start().expect("runtime available");
//! // ...
//! tiers.shutdown().await;
//! # }
//! ```

mod types;
mod api;
mod sweep;
mod lifecycle;

pub use types::{TierState, IssuedToken, SweepTask, BackgroundError, SweepReport, TierStats};

use std::future::Future;
use std::sync::Arc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::TierConfig;
use crate::error::TierError;
use crate::memory_tier::MemoryTier;
use crate::metrics::{self, LatencyTimer};
use crate::record::UserId;
use crate::storage::traits::{ArchiveStore, CacheStore, StorageError};

/// State shared between request paths and the sweeper tasks.
pub(super) struct Shared {
    pub(super) config: TierConfig,

    /// L1: process memory
    pub(super) l1: MemoryTier,

    /// L2: remote cache
    pub(super) l2: Arc<dyn CacheStore>,

    /// L3: store of record
    pub(super) l3: Arc<dyn ArchiveStore>,

    /// Bounded channel for failures nobody is awaiting
    pub(super) errors: mpsc::Sender<BackgroundError>,
}

/// Three-tier token cache.
///
/// # Thread Safety
///
/// `TokenTiers` is `Send + Sync`; share it behind an `Arc`. L1 locks are
/// never held across an `.await`.
pub struct TokenTiers {
    pub(super) shared: Arc<Shared>,

    /// Lifecycle state (broadcast to watchers)
    pub(super) state: watch::Sender<TierState>,

    /// Lifecycle state receiver (for internal use)
    pub(super) state_rx: watch::Receiver<TierState>,

    /// Flipped to `true` once to stop the sweepers
    pub(super) shutdown_tx: watch::Sender<bool>,

    /// Sweeper handles, joined on shutdown. Also serializes start/shutdown.
    pub(super) sweepers: Mutex<Vec<JoinHandle<()>>>,
}

impl TokenTiers {
    /// Validate `config` and build the coordinator around the given stores.
    ///
    /// Returns the coordinator and the receiving end of the background
    /// error channel. Dropping the receiver is allowed; reports are then
    /// discarded and counted.
    pub fn initialize(
        archive: Arc<dyn ArchiveStore>,
        cache: Arc<dyn CacheStore>,
        config: TierConfig,
    ) -> Result<(Self, mpsc::Receiver<BackgroundError>), TierError> {
        config.validate()?;

        let (errors_tx, errors_rx) = mpsc::channel(config.error_channel_capacity);
        let (state_tx, state_rx) = watch::channel(TierState::Created);
        let (shutdown_tx, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            l1: MemoryTier::new(config.l1_shards),
            l2: cache,
            l3: archive,
            errors: errors_tx,
            config,
        });

        let tiers = Self {
            shared,
            state: state_tx,
            state_rx,
            shutdown_tx,
            sweepers: Mutex::new(Vec::new()),
        };

        Ok((tiers, errors_rx))
    }

    /// Get current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TierState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch lifecycle state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<TierState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn config(&self) -> &TierConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn stats(&self) -> TierStats {
        TierStats {
            l1_entries: self.shared.l1.len(),
            state: self.state(),
        }
    }

    /// The process-memory tier, for inspection.
    #[must_use]
    pub fn l1(&self) -> &MemoryTier {
        &self.shared.l1
    }
}

impl Shared {
    /// Run a remote call under the operation deadline, recording latency
    /// and failures.
    pub(super) async fn bounded<T, F>(
        &self,
        tier: &'static str,
        operation: &'static str,
        fut: F,
    ) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        let _timer = LatencyTimer::new(tier, operation);
        match tokio::time::timeout(self.config.op_timeout(), fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                metrics::record_error(tier, operation, error_type(&e));
                Err(e)
            }
            Err(_) => {
                metrics::record_timeout(tier, operation);
                Err(StorageError::Timeout(format!("{} {}", tier, operation)))
            }
        }
    }

    /// Hand a failure to the error channel without waiting.
    ///
    /// A full or closed channel drops the report.
    pub(super) fn report(&self, task: SweepTask, error: StorageError) {
        match self.errors.try_send(BackgroundError { task, error }) {
            Ok(()) => metrics::record_background_error(task.as_str(), true),
            Err(e) => {
                let dropped = e.into_inner();
                debug!(task = %task, error = %dropped.error, "Background error dropped");
                metrics::record_background_error(task.as_str(), false);
            }
        }
    }
}

impl Shared {
    /// Batch-cache `entries` in L2 without outliving a concurrent delete.
    ///
    /// Buried tokens are left out, and any buried while the write was in
    /// flight are deleted from L2 again. Returns how many were written.
    pub(super) async fn cache_unless_buried(
        &self,
        entries: Vec<(String, UserId)>,
    ) -> Result<usize, StorageError> {
        let (tokens, userids): (Vec<String>, Vec<UserId>) = entries
            .into_iter()
            .filter(|(token, _)| !self.l1.is_buried(token))
            .unzip();
        if tokens.is_empty() {
            return Ok(0);
        }

        self.bounded("L2", "set", self.l2.set(&tokens, &userids)).await?;

        for token in tokens.iter().filter(|t| self.l1.is_buried(t)) {
            debug!(token = %token, "Deleted during cache write, retracting");
            self.bounded("L2", "delete", self.l2.delete(token)).await?;
        }
        Ok(tokens.len())
    }
}

fn error_type(e: &StorageError) -> &'static str {
    match e {
        StorageError::Backend(_) => "backend",
        StorageError::Duplicate(_) => "duplicate",
        StorageError::MalformedToken(_) => "malformed",
        StorageError::InvalidBatch(_) => "invalid_batch",
        StorageError::Timeout(_) => "timeout",
    }
}
