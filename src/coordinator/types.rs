//! Public types for the tier coordinator.

use crate::record::UserId;
use crate::storage::traits::StorageError;

/// Coordinator lifecycle state.
///
/// Request operations work in every state; the state only tracks the
/// background sweepers. Use [`super::TokenTiers::state()`] to check it or
/// [`super::TokenTiers::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierState {
    /// Initialized, sweepers not started
    Created,
    /// Sweepers running
    Running,
    /// Shutdown signalled, waiting for sweepers to finish their tick
    ShuttingDown,
    /// Sweepers joined
    Stopped,
}

impl std::fmt::Display for TierState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Result of [`super::TokenTiers::make_token`].
///
/// The token is valid as soon as this is returned: it is in L3 and L1.
/// If the remote cache write failed, `cache_error` holds why, and lookups
/// from other processes will fall through to L3 until the next sweep
/// writes it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub userid: UserId,
    pub cache_error: Option<StorageError>,
}

impl IssuedToken {
    /// Whether the token also reached the remote cache.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.cache_error.is_none()
    }
}

/// Background work that can fail without a caller to report to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepTask {
    /// L1 sweep writing survivors back to the remote cache
    CacheFlush,
    /// L1 sweep writing survivors' `last_use` to the persistent store
    LastUseFlush,
    /// Persistent-store expiration pass
    Expiration,
    /// Remote-cache promotion after a persistent-store hit
    Promotion,
}

impl SweepTask {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheFlush => "cache_flush",
            Self::LastUseFlush => "last_use_flush",
            Self::Expiration => "expiration",
            Self::Promotion => "promotion",
        }
    }
}

impl std::fmt::Display for SweepTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure from background work, delivered on the error channel
/// returned by [`super::TokenTiers::initialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundError {
    pub task: SweepTask,
    pub error: StorageError,
}

impl std::fmt::Display for BackgroundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.task, self.error)
    }
}

impl std::error::Error for BackgroundError {}

/// Summary of one L1 sweep tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries dropped from L1
    pub evicted: usize,
    /// Survivors written back to the slower tiers
    pub flushed: usize,
    /// Write-back failures reported on the error channel
    pub errors: usize,
}

/// Point-in-time coordinator snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierStats {
    pub l1_entries: usize,
    pub state: TierState,
}
