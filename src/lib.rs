//! # Token Tiers
//!
//! A three-tier token cache mapping opaque session tokens to user ids.
//!
//! ## Architecture
//!
//! Tokens are created top-down and looked up bottom-up:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    L1: Process Memory                       │
//! │  • Sharded map, every hit bumps last_use                   │
//! │  • Periodic sweep evicts idle entries and writes back      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                  (miss → read, hit → promote)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    L2: Remote Cache                         │
//! │  • Redis SET ... EX, shared across processes               │
//! │  • TTL renewed only by the L1 sweep write-back             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                  (miss → read, hit → promote)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   L3: Store of Record                       │
//! │  • SQLite/MySQL/Postgres via sqlx                          │
//! │  • Metadata, timestamps, optional expiration horizon       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use token_tiers::{TokenTiers, TierConfig, RedisStore, SqlStore, Metadata};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TierConfig::default();
//!     let cache = RedisStore::connect("redis://localhost:6379", config.l2_ttl_secs, Some("tok:"))
//!         .await
//!         .expect("Redis");
//!     let archive = SqlStore::connect("sqlite:tokens.db?mode=rwc", None)
//!         .await
//!         .expect("SQL");
//!
//!     let (tiers, mut errors) = TokenTiers::initialize(Arc::new(archive), Arc::new(cache), config)
//!         .expect("Invalid config");
//!     tiers.start().expect("Failed to start");
//!     tokio::spawn(async move {
//!         while let Some(e) = errors.recv().await {
//!             eprintln!("background: {}", e);
//!         }
//!     });
//!
//!     let issued = tiers.make_token(42, Metadata::new()).await.expect("Failed to issue");
//!     assert_eq!(tiers.get_user_id(&issued.token).await.unwrap(), 42);
//!
//!     tiers.del_token(&issued.token).await.unwrap();
//!     tiers.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: [`TokenTiers`], the public orchestration
//! - [`memory_tier`]: the L1 map
//! - [`storage`]: L2/L3 contracts and backends (Redis, SQL, Memory)
//! - [`resilience`]: bounded retry for backend calls
//! - [`token`]: token generation and canonical form

pub mod config;
pub mod error;
pub mod record;
pub mod token;
pub mod memory_tier;
pub mod storage;
pub mod resilience;
pub mod coordinator;
pub mod metrics;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::{TierConfig, MAX_SPAN_SECS};
pub use error::TierError;
pub use record::{TokenRecord, UserId, Metadata, NO_USER};
pub use coordinator::{TokenTiers, TierState, TierStats, IssuedToken, SweepTask, BackgroundError, SweepReport};
pub use memory_tier::MemoryTier;
pub use storage::traits::{CacheStore, ArchiveStore, StorageError};
pub use storage::memory::{MemoryCacheStore, MemoryArchiveStore};
pub use storage::redis::RedisStore;
pub use storage::sql::{SqlStore, Dialect};
pub use resilience::retry::RetryConfig;
pub use metrics::LatencyTimer;
