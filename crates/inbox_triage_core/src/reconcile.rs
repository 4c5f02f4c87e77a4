//! crates/inbox_triage_core/src/reconcile.rs
//!
//! Merges duplicate profile records that refer to the same logical identity,
//! and loads the canonical profile for an identity.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::achievements::Metric;
use crate::domain::{normalize_identity, AchievementUnlock, PlayerProfile};
use crate::error::{LedgerError, LedgerResult};
use crate::ports::{Clock, LedgerStore, LedgerWrite};
use crate::rewards::RewardEngine;

/// Result of one `merge` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Fewer than two records matched; nothing was written.
    Unchanged,
    Merged { canonical: Uuid, removed: Vec<Uuid> },
}

/// Folds `duplicate` into `canonical`: additive counters are summed, streaks
/// take the maximum and the later activity date wins.
pub fn fold_duplicate(canonical: &mut PlayerProfile, duplicate: &PlayerProfile) {
    canonical.total_xp += duplicate.total_xp;
    canonical.total_points += duplicate.total_points;
    canonical.lifetime_unsubscribes += duplicate.lifetime_unsubscribes;
    canonical.lifetime_keeps += duplicate.lifetime_keeps;
    canonical.total_sessions_completed += duplicate.total_sessions_completed;
    canonical.current_streak = canonical.current_streak.max(duplicate.current_streak);
    canonical.longest_streak = canonical.longest_streak.max(duplicate.longest_streak);
    canonical.last_activity_date = canonical.last_activity_date.max(duplicate.last_activity_date);
}

pub struct ProfileReconciler {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    engine: RewardEngine,
}

impl ProfileReconciler {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, engine: RewardEngine) -> Self {
        Self { store, clock, engine }
    }

    /// Collapses every profile matching `identity` into the oldest one.
    ///
    /// The merged totals can cross thresholds neither record reached alone,
    /// so every threshold achievement is re-evaluated before saving.
    ///
    /// Idempotent: a second call with no new duplicates writes nothing.
    pub async fn merge(&self, identity: &str) -> LedgerResult<MergeOutcome> {
        let normalized = normalize_identity(identity);
        let mut matches = self
            .store
            .profiles_matching(&normalized)
            .await
            .map_err(LedgerError::Persistence)?;
        if matches.len() < 2 {
            return Ok(MergeOutcome::Unchanged);
        }

        let mut canonical = matches.remove(0);
        let mut batch = LedgerWrite::new();
        let mut removed = Vec::with_capacity(matches.len());
        for duplicate in &matches {
            fold_duplicate(&mut canonical, duplicate);
            batch = batch.delete_profile(duplicate.id);
            removed.push(duplicate.id);
        }
        canonical.identity = normalized;
        canonical.refresh_level();

        let mut unlocks = self
            .store
            .unlocks_for(&canonical.identity)
            .await
            .map_err(LedgerError::Persistence)?;
        let known_unlocks = unlocks.len();
        let events = self
            .engine
            .evaluate(&Metric::ALL, &mut canonical, &mut unlocks, self.clock.now());

        self.store
            .save(
                batch
                    .profile(&canonical)
                    .unlocks(unlocks[known_unlocks..].iter().cloned()),
            )
            .await
            .map_err(LedgerError::Persistence)?;
        self.engine.feed().publish(&events);
        info!(
            identity = %canonical.identity,
            canonical = %canonical.id,
            removed = removed.len(),
            "Merged duplicate profiles."
        );
        Ok(MergeOutcome::Merged {
            canonical: canonical.id,
            removed,
        })
    }

    /// Reconciles, then returns the canonical profile (created on first
    /// access) together with its unlock records.
    pub async fn load(&self, identity: &str) -> LedgerResult<(PlayerProfile, Vec<AchievementUnlock>)> {
        let normalized = normalize_identity(identity);
        if let Err(e) = self.merge(&normalized).await {
            // Merging is opportunistic; the profile can still be served.
            warn!(identity = %normalized, error = %e, "Profile merge failed.");
        }

        let existing = self
            .store
            .profiles_matching(&normalized)
            .await
            .map_err(LedgerError::Persistence)?
            .into_iter()
            .next();

        let profile = match existing {
            Some(profile) if profile.identity == normalized => profile,
            Some(mut profile) => {
                profile.identity = normalized.clone();
                self.store
                    .save(LedgerWrite::new().profile(&profile))
                    .await
                    .map_err(LedgerError::Persistence)?;
                profile
            }
            None => {
                let profile = PlayerProfile::new(&normalized, self.clock.now());
                self.store
                    .save(LedgerWrite::new().profile(&profile))
                    .await
                    .map_err(LedgerError::Persistence)?;
                info!(identity = %normalized, "Created player profile.");
                profile
            }
        };

        let unlocks = self
            .store
            .unlocks_for(&normalized)
            .await
            .map_err(LedgerError::Persistence)?;
        Ok((profile, unlocks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewards::level_for_xp;
    use chrono::{NaiveDate, Utc};

    #[test]
    fn test_fold_sums_counters_and_maxes_streaks() {
        let mut canonical = PlayerProfile::new("a@b.c", Utc::now());
        canonical.total_xp = 100;
        canonical.total_points = 40;
        canonical.lifetime_unsubscribes = 3;
        canonical.current_streak = 2;
        canonical.longest_streak = 6;
        canonical.last_activity_date = NaiveDate::from_ymd_opt(2024, 1, 2);

        let mut duplicate = PlayerProfile::new("A@B.C", Utc::now());
        duplicate.total_xp = 250;
        duplicate.total_points = 60;
        duplicate.lifetime_keeps = 4;
        duplicate.total_sessions_completed = 1;
        duplicate.current_streak = 5;
        duplicate.longest_streak = 5;
        duplicate.last_activity_date = NaiveDate::from_ymd_opt(2024, 1, 5);

        fold_duplicate(&mut canonical, &duplicate);
        canonical.refresh_level();

        assert_eq!(canonical.total_xp, 350);
        assert_eq!(canonical.total_points, 100);
        assert_eq!(canonical.total_decisions(), 7);
        assert_eq!(canonical.total_sessions_completed, 1);
        assert_eq!(canonical.current_streak, 5);
        assert_eq!(canonical.longest_streak, 6);
        assert_eq!(canonical.last_activity_date, NaiveDate::from_ymd_opt(2024, 1, 5));
        assert_eq!(canonical.current_level, level_for_xp(350));
        assert!(canonical.current_level > level_for_xp(100).max(level_for_xp(250)));
    }
}
