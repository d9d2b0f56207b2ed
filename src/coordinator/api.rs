//! Request operations: create, look up, delete, enumerate.
//!
//! Creation writes L3 → L2 → L1. Lookup reads L1 → L2 → L3 and promotes a
//! hit into every faster tier. Deletion fans out to all tiers.

use std::slice;
use tracing::{debug, info, warn};

use crate::error::TierError;
use crate::metrics;
use crate::record::{now_secs, Metadata, TokenRecord, UserId, NO_USER};
use crate::token;

use super::{IssuedToken, SweepTask, TokenTiers};

impl TokenTiers {
    /// Issue a new token for `userid` and attach `metadata`.
    ///
    /// The persistent insert must succeed; a failed remote-cache write only
    /// marks the result via [`IssuedToken::cache_error`].
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use token_tiers::{TokenTiers, Metadata};
    /// # async fn example(tiers: &TokenTiers) {
    /// let mut meta = Metadata::new();
    /// meta.insert("device".into(), "ios".into());
    ///
    /// let issued = tiers.make_token(4, meta).await.unwrap();
    /// if !issued.is_cached() {
    ///     eprintln!("cache not set: {:?}", issued.cache_error);
    /// }
    /// assert_eq!(tiers.get_user_id(&issued.token).await.unwrap(), 4);
    /// # }
    /// ```
    #[tracing::instrument(skip(self, metadata))]
    pub async fn make_token(&self, userid: UserId, metadata: Metadata) -> Result<IssuedToken, TierError> {
        if userid <= 0 {
            return Err(TierError::InvalidUserId(userid));
        }

        let shared = &self.shared;
        let now = now_secs();
        let record = TokenRecord::new(token::generate(), userid, metadata, now);

        shared
            .bounded("L3", "insert", shared.l3.insert(&record))
            .await
            .map_err(TierError::Store)?;
        metrics::record_operation("L3", "insert", "success");

        let cache_error = match shared
            .bounded("L2", "set", shared.l2.set(slice::from_ref(&record.token), &[userid]))
            .await
        {
            Ok(()) => {
                metrics::record_operation("L2", "set", "success");
                None
            }
            Err(e) => {
                warn!(error = %e, "Token issued but cache not set");
                metrics::record_operation("L2", "set", "error");
                Some(e)
            }
        };

        shared.l1.put_at(&record.token, userid, now);
        metrics::set_l1_entries(shared.l1.len());

        debug!(token = %record.token, cached = cache_error.is_none(), "Token issued");
        Ok(IssuedToken {
            token: record.token,
            userid,
            cache_error,
        })
    }

    /// Resolve `token` to its userid, or 0 when nothing matches.
    ///
    /// Accepts any UUID spelling; malformed input is a miss and touches no
    /// tier. An L2 outage degrades to an L3 read rather than an error.
    #[tracing::instrument(skip(self), fields(tier))]
    pub async fn get_user_id(&self, token: &str) -> Result<UserId, TierError> {
        let Some(token) = token::canonicalize(token) else {
            metrics::record_operation("all", "get", "malformed");
            return Ok(NO_USER);
        };
        let shared = &self.shared;

        // L1: process memory (a hit bumps last_use)
        let userid = shared.l1.get(&token);
        if userid != NO_USER {
            tracing::Span::current().record("tier", "L1");
            metrics::record_operation("L1", "get", "hit");
            return Ok(userid);
        }
        metrics::record_operation("L1", "get", "miss");

        // L2: remote cache
        match shared.bounded("L2", "get", shared.l2.get(&token)).await {
            Ok(userid) if userid != NO_USER => {
                // A delete in flight has already buried the token
                if !shared.l1.promote(&token, userid) {
                    tracing::Span::current().record("tier", "none");
                    metrics::record_operation("L2", "get", "deleted");
                    return Ok(NO_USER);
                }
                tracing::Span::current().record("tier", "L2");
                metrics::record_operation("L2", "get", "hit");
                metrics::record_promotion("L2", "L1");
                return Ok(userid);
            }
            Ok(_) => metrics::record_operation("L2", "get", "miss"),
            Err(e) => {
                warn!(error = %e, "L2 lookup failed, falling through to L3");
                metrics::record_operation("L2", "get", "error");
            }
        }

        // L3: store of record, honouring the persistence horizon
        let not_before = shared.config.l3_not_before(now_secs());
        let userid = shared
            .bounded("L3", "lookup", shared.l3.lookup(&token, not_before))
            .await
            .map_err(TierError::Store)?;

        if userid == NO_USER {
            tracing::Span::current().record("tier", "none");
            metrics::record_operation("L3", "lookup", "miss");
            return Ok(NO_USER);
        }
        if shared.l1.is_buried(&token) {
            tracing::Span::current().record("tier", "none");
            metrics::record_operation("L3", "lookup", "deleted");
            return Ok(NO_USER);
        }
        tracing::Span::current().record("tier", "L3");
        metrics::record_operation("L3", "lookup", "hit");

        match shared.cache_unless_buried(vec![(token.clone(), userid)]).await {
            Ok(_) => metrics::record_promotion("L3", "L2"),
            Err(e) => {
                warn!(error = %e, "Promotion into L2 failed");
                shared.report(SweepTask::Promotion, e);
            }
        }
        if !shared.l1.promote(&token, userid) {
            return Ok(NO_USER);
        }
        metrics::record_promotion("L3", "L1");

        Ok(userid)
    }

    /// Remove `token` from every tier.
    ///
    /// All tiers are attempted. The first failure (L2 before L3) is
    /// returned and nothing is rolled back, so a retry is always safe.
    /// L1 keeps a tombstone for `l2_ttl_secs` so concurrent sweeps and
    /// lookups cannot re-cache the token.
    #[tracing::instrument(skip(self))]
    pub async fn del_token(&self, token: &str) -> Result<(), TierError> {
        // Nothing was ever stored under a malformed key
        let Some(token) = token::canonicalize(token) else {
            return Ok(());
        };
        let shared = &self.shared;

        shared.l1.bury(&token, shared.config.l2_ttl_secs);
        metrics::set_l1_entries(shared.l1.len());

        let l2 = shared.bounded("L2", "delete", shared.l2.delete(&token)).await;
        let l3 = shared.bounded("L3", "delete", shared.l3.delete(&token)).await;

        match (l2, l3) {
            (Err(e), _) => {
                warn!(error = %e, "Token delete failed in L2");
                Err(TierError::Cache(e))
            }
            (Ok(()), Err(e)) => {
                warn!(error = %e, "Token delete failed in L3");
                Err(TierError::Store(e))
            }
            (Ok(()), Ok(())) => {
                info!(token = %token, "Token deleted");
                metrics::record_operation("all", "delete", "success");
                Ok(())
            }
        }
    }

    /// Every persistent record for `userid`, oldest first.
    ///
    /// Reads L3 only. A non-positive userid owns nothing.
    #[tracing::instrument(skip(self))]
    pub async fn get_user_tokens(&self, userid: UserId) -> Result<Vec<TokenRecord>, TierError> {
        if userid <= 0 {
            return Ok(Vec::new());
        }
        let shared = &self.shared;
        let records = shared
            .bounded("L3", "list", shared.l3.list_by_user(userid))
            .await
            .map_err(TierError::Store)?;
        metrics::record_operation("L3", "list", "success");
        Ok(records)
    }
}
