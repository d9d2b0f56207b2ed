// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage backends for L2 and L3.
//!
//! - [`traits`]: the [`traits::CacheStore`] and [`traits::ArchiveStore`] contracts
//! - [`redis`]: Redis-backed remote cache
//! - [`sql`]: SQLite/MySQL/Postgres store of record
//! - [`memory`]: in-process stand-ins for both

pub mod traits;
pub mod memory;
pub mod redis;
pub mod sql;
