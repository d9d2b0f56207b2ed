// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Token text format.
//!
//! Tokens are v4 UUIDs written as 32 lowercase hex characters with no
//! separators. Every tier keys on that canonical form.

use uuid::Uuid;

/// Length of a canonical token.
pub const TOKEN_LEN: usize = 32;

/// Generate a fresh canonical token.
#[must_use]
pub fn generate() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Canonical form of `raw`, or `None` if it is not a UUID.
///
/// Accepts simple, hyphenated, braced and `urn:uuid:` text in any case.
#[must_use]
pub fn canonicalize(raw: &str) -> Option<String> {
    Uuid::parse_str(raw.trim()).ok().map(|u| u.simple().to_string())
}

/// Whether `s` is already in canonical form.
#[must_use]
pub fn is_canonical(s: &str) -> bool {
    s.len() == TOKEN_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
