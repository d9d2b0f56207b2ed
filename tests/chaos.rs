//! Chaos Testing for Token Tiers
//!
//! Failure scenarios driven by **FailingStore wrappers**: precise error
//! injection at specific call counts, plus stores that hang past the
//! operation deadline.
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --nocapture
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::Notify;

use token_tiers::{
    ArchiveStore, CacheStore, MemoryArchiveStore, MemoryCacheStore, Metadata, StorageError,
    SweepTask, TierConfig, TierError, TokenRecord, TokenTiers, UserId, NO_USER,
};
use token_tiers::record::now_secs;
use token_tiers::token;

// =============================================================================
// Failing Store Wrappers - Precise Error Injection
// =============================================================================

/// Shared failure switch: fails on listed call numbers (1-indexed), or on
/// every call while `failing` is set.
struct Injector {
    call_count: AtomicU64,
    fail_on_calls: Vec<u64>,
    failing: AtomicBool,
    error_msg: String,
}

impl Injector {
    fn new(fail_on_calls: Vec<u64>, error_msg: &str) -> Self {
        Self {
            call_count: AtomicU64::new(0),
            fail_on_calls,
            failing: AtomicBool::new(false),
            error_msg: error_msg.to_string(),
        }
    }

    fn maybe_fail(&self) -> Result<(), StorageError> {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.load(Ordering::SeqCst) || self.fail_on_calls.contains(&count) {
            Err(StorageError::Backend(self.error_msg.clone()))
        } else {
            Ok(())
        }
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn calls(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }
}

pub struct FailingCacheStore<S: CacheStore> {
    inner: S,
    injector: Injector,
}

impl<S: CacheStore> FailingCacheStore<S> {
    fn new(inner: S, fail_on_calls: Vec<u64>) -> Self {
        Self {
            inner,
            injector: Injector::new(fail_on_calls, "redis connection refused"),
        }
    }
}

#[async_trait]
impl<S: CacheStore> CacheStore for FailingCacheStore<S> {
    async fn get(&self, token: &str) -> Result<UserId, StorageError> {
        self.injector.maybe_fail()?;
        self.inner.get(token).await
    }

    async fn set(&self, tokens: &[String], userids: &[UserId]) -> Result<(), StorageError> {
        self.injector.maybe_fail()?;
        self.inner.set(tokens, userids).await
    }

    async fn delete(&self, token: &str) -> Result<(), StorageError> {
        self.injector.maybe_fail()?;
        self.inner.delete(token).await
    }
}

pub struct FailingArchiveStore<S: ArchiveStore> {
    inner: S,
    injector: Injector,
}

impl<S: ArchiveStore> FailingArchiveStore<S> {
    fn new(inner: S, fail_on_calls: Vec<u64>) -> Self {
        Self {
            inner,
            injector: Injector::new(fail_on_calls, "mysql gone away"),
        }
    }
}

#[async_trait]
impl<S: ArchiveStore> ArchiveStore for FailingArchiveStore<S> {
    async fn insert(&self, record: &TokenRecord) -> Result<(), StorageError> {
        self.injector.maybe_fail()?;
        self.inner.insert(record).await
    }

    async fn update_last_use(&self, token: &str, last_use: i64) -> Result<(), StorageError> {
        self.injector.maybe_fail()?;
        self.inner.update_last_use(token, last_use).await
    }

    async fn lookup(&self, token: &str, not_before: Option<i64>) -> Result<UserId, StorageError> {
        self.injector.maybe_fail()?;
        self.inner.lookup(token, not_before).await
    }

    async fn delete(&self, token: &str) -> Result<(), StorageError> {
        self.injector.maybe_fail()?;
        self.inner.delete(token).await
    }

    async fn list_by_user(&self, userid: UserId) -> Result<Vec<TokenRecord>, StorageError> {
        self.injector.maybe_fail()?;
        self.inner.list_by_user(userid).await
    }

    async fn delete_expired(&self, cutoff: i64) -> Result<u64, StorageError> {
        self.injector.maybe_fail()?;
        self.inner.delete_expired(cutoff).await
    }
}

/// A cache that never answers.
pub struct HangingCacheStore;

#[async_trait]
impl CacheStore for HangingCacheStore {
    async fn get(&self, _token: &str) -> Result<UserId, StorageError> {
        std::future::pending().await
    }

    async fn set(&self, _tokens: &[String], _userids: &[UserId]) -> Result<(), StorageError> {
        std::future::pending().await
    }

    async fn delete(&self, _token: &str) -> Result<(), StorageError> {
        std::future::pending().await
    }
}

/// A cache whose next `set` parks, once armed, until released.
pub struct GatedCacheStore {
    inner: MemoryCacheStore,
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedCacheStore {
    fn new() -> Self {
        Self {
            inner: MemoryCacheStore::default(),
            armed: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStore for GatedCacheStore {
    async fn get(&self, token: &str) -> Result<UserId, StorageError> {
        self.inner.get(token).await
    }

    async fn set(&self, tokens: &[String], userids: &[UserId]) -> Result<(), StorageError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.set(tokens, userids).await
    }

    async fn delete(&self, token: &str) -> Result<(), StorageError> {
        self.inner.delete(token).await
    }
}

fn new_record(userid: UserId) -> TokenRecord {
    TokenRecord::new(token::generate(), userid, Metadata::new(), now_secs())
}

// =============================================================================
// Creation Failures
// =============================================================================

#[tokio::test]
async fn chaos_l3_insert_failure_aborts_creation() {
    let cache = Arc::new(MemoryCacheStore::default());
    let archive = Arc::new(FailingArchiveStore::new(MemoryArchiveStore::new(), vec![1]));
    let (tiers, _errors) = TokenTiers::initialize(archive.clone(), cache.clone(), TierConfig::default()).unwrap();

    let result = tiers.make_token(2, Metadata::new()).await;
    assert!(matches!(result, Err(TierError::Store(StorageError::Backend(_)))));

    // Nothing leaked into the faster tiers
    assert!(tiers.l1().is_empty());
    assert!(cache.is_empty());
    assert!(archive.inner.is_empty());

    // Next call succeeds
    assert!(tiers.make_token(2, Metadata::new()).await.is_ok());
}

#[tokio::test]
async fn chaos_l2_failure_on_create_is_reported_not_fatal() {
    let cache = Arc::new(FailingCacheStore::new(MemoryCacheStore::default(), vec![1]));
    let archive = Arc::new(MemoryArchiveStore::new());
    let (tiers, _errors) = TokenTiers::initialize(archive.clone(), cache.clone(), TierConfig::default()).unwrap();

    let issued = tiers.make_token(2, Metadata::new()).await.unwrap();
    assert!(!issued.is_cached());
    assert!(matches!(issued.cache_error, Some(StorageError::Backend(_))));

    // Still usable: in L1 and L3
    assert!(tiers.l1().contains(&issued.token));
    assert_eq!(archive.lookup(&issued.token, None).await.unwrap(), 2);
    assert_eq!(tiers.get_user_id(&issued.token).await.unwrap(), 2);

    // The next sweep writes it back to L2
    let report = tiers.run_l1_sweep().await;
    assert_eq!(report.errors, 0);
    assert_eq!(cache.inner.get(&issued.token).await.unwrap(), 2);
}

// =============================================================================
// Lookup Failures
// =============================================================================

#[tokio::test]
async fn chaos_l2_read_failure_falls_through_to_l3() {
    let cache = Arc::new(FailingCacheStore::new(MemoryCacheStore::default(), vec![]));
    let archive = Arc::new(MemoryArchiveStore::new());
    let (tiers, _errors) = TokenTiers::initialize(archive.clone(), cache.clone(), TierConfig::default()).unwrap();

    let record = new_record(5);
    archive.insert(&record).await.unwrap();

    cache.injector.set_failing(true);
    assert_eq!(tiers.get_user_id(&record.token).await.unwrap(), 5);
    assert!(tiers.l1().contains(&record.token));
}

#[tokio::test]
async fn chaos_promotion_failure_is_reported_and_value_returned() {
    // Call 1 is the L2 get (miss), call 2 the promotion set
    let cache = Arc::new(FailingCacheStore::new(MemoryCacheStore::default(), vec![2]));
    let archive = Arc::new(MemoryArchiveStore::new());
    let (tiers, mut errors) = TokenTiers::initialize(archive.clone(), cache.clone(), TierConfig::default()).unwrap();

    let record = new_record(5);
    archive.insert(&record).await.unwrap();

    assert_eq!(tiers.get_user_id(&record.token).await.unwrap(), 5);
    assert!(tiers.l1().contains(&record.token));
    assert!(!cache.inner.contains(&record.token));

    let reported = errors.try_recv().unwrap();
    assert_eq!(reported.task, SweepTask::Promotion);
}

#[tokio::test]
async fn chaos_l3_lookup_failure_surfaces() {
    let cache = Arc::new(MemoryCacheStore::default());
    let archive = Arc::new(FailingArchiveStore::new(MemoryArchiveStore::new(), vec![1]));
    let (tiers, _errors) = TokenTiers::initialize(archive, cache, TierConfig::default()).unwrap();

    let result = tiers.get_user_id(&token::generate()).await;
    assert!(matches!(result, Err(TierError::Store(_))));
}

#[tokio::test]
async fn chaos_malformed_token_touches_no_tier() {
    let cache = Arc::new(FailingCacheStore::new(MemoryCacheStore::default(), vec![]));
    let archive = Arc::new(FailingArchiveStore::new(MemoryArchiveStore::new(), vec![]));
    let (tiers, _errors) = TokenTiers::initialize(archive.clone(), cache.clone(), TierConfig::default()).unwrap();

    assert_eq!(tiers.get_user_id("definitely not a token").await.unwrap(), NO_USER);
    tiers.del_token("definitely not a token").await.unwrap();
    assert_eq!(cache.injector.calls(), 0);
    assert_eq!(archive.injector.calls(), 0);
}

#[tokio::test]
async fn chaos_hanging_cache_hits_deadline() {
    let archive = Arc::new(MemoryArchiveStore::new());
    let config = TierConfig {
        op_timeout_ms: 50,
        ..Default::default()
    };
    let (tiers, _errors) = TokenTiers::initialize(archive.clone(), Arc::new(HangingCacheStore), config).unwrap();

    let issued = tokio::time::timeout(Duration::from_secs(2), tiers.make_token(3, Metadata::new()))
        .await
        .expect("make_token must not hang")
        .unwrap();
    assert!(matches!(issued.cache_error, Some(StorageError::Timeout(_))));

    // Lookup degrades to L3 when the cache times out
    tiers.l1().clear();
    let userid = tokio::time::timeout(Duration::from_secs(2), tiers.get_user_id(&issued.token))
        .await
        .expect("get_user_id must not hang")
        .unwrap();
    assert_eq!(userid, 3);
}

// =============================================================================
// Deletion Failures
// =============================================================================

#[tokio::test]
async fn chaos_delete_returns_first_error_without_rollback() {
    let cache = Arc::new(FailingCacheStore::new(MemoryCacheStore::default(), vec![]));
    let archive = Arc::new(MemoryArchiveStore::new());
    let (tiers, _errors) = TokenTiers::initialize(archive.clone(), cache.clone(), TierConfig::default()).unwrap();

    let issued = tiers.make_token(2, Metadata::new()).await.unwrap();

    cache.injector.set_failing(true);
    let result = tiers.del_token(&issued.token).await;
    assert!(matches!(result, Err(TierError::Cache(_))));

    // L1 and L3 were still cleared; nothing restored
    assert!(!tiers.l1().contains(&issued.token));
    assert_eq!(archive.lookup(&issued.token, None).await.unwrap(), NO_USER);

    // Retry once the cache recovers
    cache.injector.set_failing(false);
    tiers.del_token(&issued.token).await.unwrap();
    assert!(!cache.inner.contains(&issued.token));
}

#[tokio::test]
async fn chaos_delete_l3_failure_surfaces_as_store_error() {
    let cache = Arc::new(MemoryCacheStore::default());
    let archive = Arc::new(FailingArchiveStore::new(MemoryArchiveStore::new(), vec![2]));
    let (tiers, _errors) = TokenTiers::initialize(archive, cache.clone(), TierConfig::default()).unwrap();

    // Call 1 is the insert, call 2 the delete
    let issued = tiers.make_token(2, Metadata::new()).await.unwrap();
    let result = tiers.del_token(&issued.token).await;
    assert!(matches!(result, Err(TierError::Store(_))));
    assert!(!cache.contains(&issued.token));
}

#[tokio::test]
async fn chaos_delete_during_sweep_write_back_stays_deleted() {
    let cache = Arc::new(GatedCacheStore::new());
    let archive = Arc::new(MemoryArchiveStore::new());
    let (tiers, _errors) = TokenTiers::initialize(archive.clone(), cache.clone(), TierConfig::default()).unwrap();
    let tiers = Arc::new(tiers);

    let issued = tiers.make_token(7, Metadata::new()).await.unwrap();

    // The sweep snapshots the token, then parks inside the L2 batch
    cache.arm();
    let sweep = tokio::spawn({
        let tiers = tiers.clone();
        async move { tiers.run_l1_sweep().await }
    });
    cache.entered.notified().await;

    tiers.del_token(&issued.token).await.unwrap();
    cache.release.notify_one();
    let report = sweep.await.unwrap();
    assert_eq!(report.errors, 0);

    // The late batch write was retracted
    assert!(!cache.inner.contains(&issued.token));
    assert_eq!(tiers.get_user_id(&issued.token).await.unwrap(), NO_USER);

    // And later sweeps have nothing to bring back
    tiers.run_l1_sweep().await;
    assert!(!cache.inner.contains(&issued.token));
    assert_eq!(tiers.get_user_id(&issued.token).await.unwrap(), NO_USER);
}

#[tokio::test]
async fn chaos_delete_during_l3_promotion_stays_deleted() {
    let cache = Arc::new(GatedCacheStore::new());
    let archive = Arc::new(MemoryArchiveStore::new());
    let (tiers, _errors) = TokenTiers::initialize(archive.clone(), cache.clone(), TierConfig::default()).unwrap();
    let tiers = Arc::new(tiers);

    let record = new_record(7);
    archive.insert(&record).await.unwrap();

    // The lookup reads L3, then parks promoting into L2
    cache.arm();
    let lookup = tokio::spawn({
        let tiers = tiers.clone();
        let token = record.token.clone();
        async move { tiers.get_user_id(&token).await }
    });
    cache.entered.notified().await;

    tiers.del_token(&record.token).await.unwrap();
    cache.release.notify_one();

    assert_eq!(lookup.await.unwrap().unwrap(), NO_USER);
    assert!(!tiers.l1().contains(&record.token));
    assert!(!cache.inner.contains(&record.token));
    assert_eq!(tiers.get_user_id(&record.token).await.unwrap(), NO_USER);
}

// =============================================================================
// Sweep Failures
// =============================================================================

#[tokio::test]
async fn chaos_sweep_reports_and_continues() {
    let cache = Arc::new(FailingCacheStore::new(MemoryCacheStore::default(), vec![]));
    let archive = Arc::new(FailingArchiveStore::new(MemoryArchiveStore::new(), vec![]));
    let (tiers, mut errors) = TokenTiers::initialize(archive.clone(), cache.clone(), TierConfig::default()).unwrap();

    let a = tiers.make_token(1, Metadata::new()).await.unwrap();
    let b = tiers.make_token(2, Metadata::new()).await.unwrap();

    cache.injector.set_failing(true);
    archive.injector.set_failing(true);

    let report = tiers.run_l1_sweep().await;
    assert_eq!(report.flushed, 2);
    // One batch failure plus one per token
    assert_eq!(report.errors, 3);

    let mut tasks = Vec::new();
    while let Ok(e) = errors.try_recv() {
        tasks.push(e.task);
    }
    assert_eq!(tasks.iter().filter(|t| **t == SweepTask::CacheFlush).count(), 1);
    assert_eq!(tasks.iter().filter(|t| **t == SweepTask::LastUseFlush).count(), 2);

    // L1 is untouched by write-back failures
    assert!(tiers.l1().contains(&a.token));
    assert!(tiers.l1().contains(&b.token));
}

#[tokio::test]
async fn chaos_full_error_channel_never_blocks_sweep() {
    let cache = Arc::new(FailingCacheStore::new(MemoryCacheStore::default(), vec![]));
    let archive = Arc::new(FailingArchiveStore::new(MemoryArchiveStore::new(), vec![]));
    let config = TierConfig {
        error_channel_capacity: 1,
        ..Default::default()
    };
    let (tiers, mut errors) = TokenTiers::initialize(archive.clone(), cache.clone(), config).unwrap();

    for userid in 1..=20 {
        tiers.make_token(userid, Metadata::new()).await.unwrap();
    }
    cache.injector.set_failing(true);
    archive.injector.set_failing(true);

    let report = tokio::time::timeout(Duration::from_secs(2), tiers.run_l1_sweep())
        .await
        .expect("sweep must not block on a full channel");
    assert_eq!(report.errors, 21);

    // Only the first report fit
    assert!(errors.try_recv().is_ok());
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn chaos_expiration_failure_is_reported() {
    let cache = Arc::new(MemoryCacheStore::default());
    let archive = Arc::new(FailingArchiveStore::new(MemoryArchiveStore::new(), vec![1]));
    let config = TierConfig {
        l3_horizon_secs: 60,
        ..Default::default()
    };
    let (tiers, mut errors) = TokenTiers::initialize(archive, cache, config).unwrap();

    assert_eq!(tiers.run_expiration_sweep().await, 0);
    assert_eq!(errors.try_recv().unwrap().task, SweepTask::Expiration);

    // Recovers on the next tick
    assert_eq!(tiers.run_expiration_sweep().await, 0);
    assert!(errors.try_recv().is_err());
}
