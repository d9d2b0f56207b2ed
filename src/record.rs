// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The token record held by the persistent tier.
//!
//! The faster tiers only ever hold `token -> userid`; the full record with
//! metadata and timestamps lives in L3.

use serde::{Deserialize, Serialize};

/// User identity. Valid identities are positive.
pub type UserId = i64;

/// Reserved userid meaning "no association found".
pub const NO_USER: UserId = 0;

/// Opaque key/value attachment stored with a token.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Canonical token: 32 lowercase hex chars.
    pub token: String,
    pub userid: UserId,
    #[serde(default)]
    pub metadata: Metadata,
    /// Epoch seconds, set once.
    pub created_at: i64,
    /// Epoch seconds, never moves backwards.
    pub last_use: i64,
}

impl TokenRecord {
    /// A fresh record stamped with `now` for both timestamps.
    #[must_use]
    pub fn new(token: String, userid: UserId, metadata: Metadata, now: i64) -> Self {
        Self {
            token,
            userid,
            metadata,
            created_at: now,
            last_use: now,
        }
    }

    /// Metadata as a JSON string for text columns, `None` when empty.
    pub fn metadata_json(&self) -> Option<String> {
        if self.metadata.is_empty() {
            None
        } else {
            serde_json::to_string(&self.metadata).ok()
        }
    }

    /// Parse a metadata text column. Anything that is not a JSON object
    /// (including NULL) reads back as empty.
    #[must_use]
    pub fn parse_metadata(raw: Option<&str>) -> Metadata {
        raw.and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok())
            .and_then(|v| match v {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            })
            .unwrap_or_default()
    }
}

/// Current wall-clock time in epoch seconds.
#[must_use]
pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
