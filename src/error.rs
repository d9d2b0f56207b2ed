// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use thiserror::Error;

use crate::record::UserId;
use crate::storage::traits::StorageError;

/// Errors surfaced by [`crate::TokenTiers`].
///
/// "Not found" is never an error: lookups return userid 0 instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TierError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Userid must be positive, got {0}")]
    InvalidUserId(UserId),
    #[error("Persistent store error: {0}")]
    Store(StorageError),
    #[error("Remote cache error: {0}")]
    Cache(StorageError),
}
