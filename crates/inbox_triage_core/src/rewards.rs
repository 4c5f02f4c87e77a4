//! crates/inbox_triage_core/src/rewards.rs
//!
//! The reward engine: folds decisions into the ledger aggregates, derives
//! levels and streaks, and evaluates achievement thresholds.
//!
//! Everything here is pure arithmetic over in-memory state and cannot fail.
//! Unlock events are returned to the caller, who publishes them on the
//! `UnlockFeed` once the mutation has been saved.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::achievements::{self, AchievementDefinition, AchievementId, Metric};
use crate::domain::{AchievementUnlock, DailyActivity, Decision, PlayerProfile, Session};

//=========================================================================================
// Levels
//=========================================================================================

/// XP needed to reach each level; index `k` holds the threshold of level `k + 1`.
pub const LEVEL_THRESHOLDS: [u64; 10] = [0, 100, 300, 600, 1000, 1500, 2200, 3000, 4000, 5000];

pub const MAX_LEVEL: u32 = LEVEL_THRESHOLDS.len() as u32;

/// The greatest level whose threshold is `<= xp`, never below 1.
pub fn level_for_xp(xp: u64) -> u32 {
    let reached = LEVEL_THRESHOLDS.iter().take_while(|&&t| t <= xp).count() as u32;
    reached.max(1)
}

fn threshold_of(level: u32) -> u64 {
    let index = level.clamp(1, MAX_LEVEL) as usize - 1;
    LEVEL_THRESHOLDS[index]
}

/// XP still missing for the next level; 0 at max level.
pub fn xp_to_next_level(profile: &PlayerProfile) -> u64 {
    if profile.current_level >= MAX_LEVEL {
        return 0;
    }
    threshold_of(profile.current_level + 1).saturating_sub(profile.total_xp)
}

/// Fraction of the way from the current level to the next; 1.0 at max level.
pub fn level_progress(profile: &PlayerProfile) -> f64 {
    if profile.current_level >= MAX_LEVEL {
        return 1.0;
    }
    let current = threshold_of(profile.current_level);
    let next = threshold_of(profile.current_level + 1);
    let span = next.saturating_sub(current);
    if span == 0 {
        return 1.0;
    }
    (profile.total_xp.saturating_sub(current) as f64 / span as f64).clamp(0.0, 1.0)
}

//=========================================================================================
// Unlock notifications
//=========================================================================================

/// Emitted once per newly unlocked achievement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockEvent {
    pub identity: String,
    pub achievement: AchievementId,
    pub title: String,
    pub bonus_points: u32,
    pub unlocked_at: DateTime<Utc>,
}

impl UnlockEvent {
    fn new(identity: &str, def: &AchievementDefinition, at: DateTime<Utc>) -> Self {
        Self {
            identity: identity.to_string(),
            achievement: def.id,
            title: def.title.to_string(),
            bonus_points: def.bonus_points,
            unlocked_at: at,
        }
    }
}

/// Typed broadcast channel for unlock events.
#[derive(Clone)]
pub struct UnlockFeed {
    sender: broadcast::Sender<UnlockEvent>,
}

impl UnlockFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UnlockEvent> {
        self.sender.subscribe()
    }

    /// Publishes events. Having no subscribers is not an error.
    pub fn publish(&self, events: &[UnlockEvent]) {
        for event in events {
            let receivers = self.sender.send(event.clone()).unwrap_or(0);
            debug!(achievement = event.achievement.as_str(), receivers, "Published unlock event.");
        }
    }
}

impl Default for UnlockFeed {
    fn default() -> Self {
        Self::new(64)
    }
}

//=========================================================================================
// Reward Engine
//=========================================================================================

/// Mutable view over the aggregates one decision touches.
pub struct Ledger<'a> {
    pub session: &'a mut Session,
    pub day: &'a mut DailyActivity,
    pub profile: &'a mut PlayerProfile,
    /// Every unlock already recorded for the profile; new unlocks are appended.
    pub unlocks: &'a mut Vec<AchievementUnlock>,
}

#[derive(Clone, Default)]
pub struct RewardEngine {
    feed: UnlockFeed,
}

impl RewardEngine {
    pub fn new(feed: UnlockFeed) -> Self {
        Self { feed }
    }

    pub fn feed(&self) -> &UnlockFeed {
        &self.feed
    }

    /// Folds `decision` into the ledger and returns any newly unlocked
    /// achievements. The session keeps its own copy of the decision.
    pub fn apply(&self, decision: &Decision, ledger: &mut Ledger<'_>) -> Vec<UnlockEvent> {
        ledger.day.record(decision);
        ledger.session.add_decision(decision.clone());

        let profile = &mut *ledger.profile;
        profile.total_xp += u64::from(decision.xp);
        profile.total_points += u64::from(decision.points);
        if decision.action.is_unsubscribe() {
            profile.lifetime_unsubscribes += 1;
        } else {
            profile.lifetime_keeps += 1;
        }
        profile.refresh_level();

        let mut metrics = vec![Metric::TotalDecisions, Metric::CurrentLevel];
        if decision.action.is_unsubscribe() {
            metrics.push(Metric::LifetimeUnsubscribes);
        }
        self.evaluate(&metrics, ledger.profile, ledger.unlocks, decision.created_at)
    }

    /// Mirror of `apply`. Lifetime totals and XP are subtracted and the level
    /// recomputed (it may drop). Unlocks and streak fields are left alone.
    pub fn reverse(&self, decision: &Decision, ledger: &mut Ledger<'_>) {
        ledger.session.remove_decision(decision.id);
        ledger.day.reverse(decision);

        let profile = &mut *ledger.profile;
        profile.total_xp = profile.total_xp.saturating_sub(u64::from(decision.xp));
        profile.total_points = profile.total_points.saturating_sub(u64::from(decision.points));
        if decision.action.is_unsubscribe() {
            profile.lifetime_unsubscribes = profile.lifetime_unsubscribes.saturating_sub(1);
        } else {
            profile.lifetime_keeps = profile.lifetime_keeps.saturating_sub(1);
        }
        profile.refresh_level();
    }

    /// Evaluates the behavioral achievements for a completed session.
    pub fn check_session_achievements(
        &self,
        session: &Session,
        profile: &mut PlayerProfile,
        unlocks: &mut Vec<AchievementUnlock>,
        at: DateTime<Utc>,
    ) -> Vec<UnlockEvent> {
        let mut events = Vec::new();
        for def in achievements::behavioral() {
            if is_unlocked(unlocks, def.id) || !def.earned_by_session(session) {
                continue;
            }
            events.push(grant(def, profile, unlocks, at));
        }
        events
    }

    /// Session-completion bookkeeping: completed count, streak and last
    /// activity date.
    pub fn update_profile_stats(&self, profile: &mut PlayerProfile, today: NaiveDate) {
        profile.total_sessions_completed += 1;
        advance_streak(profile, today);
    }

    /// Runs every completion hook and re-evaluates the metrics completion
    /// can move.
    pub fn complete_session(
        &self,
        session: &Session,
        profile: &mut PlayerProfile,
        unlocks: &mut Vec<AchievementUnlock>,
        today: NaiveDate,
        at: DateTime<Utc>,
    ) -> Vec<UnlockEvent> {
        let mut events = self.check_session_achievements(session, profile, unlocks, at);
        self.update_profile_stats(profile, today);
        events.extend(self.evaluate(
            &[Metric::SessionsCompleted, Metric::LongestStreak, Metric::CurrentLevel],
            profile,
            unlocks,
            at,
        ));
        events
    }

    /// Compares every not-yet-unlocked achievement reading one of `metrics`
    /// against its threshold.
    pub fn evaluate(
        &self,
        metrics: &[Metric],
        profile: &mut PlayerProfile,
        unlocks: &mut Vec<AchievementUnlock>,
        at: DateTime<Utc>,
    ) -> Vec<UnlockEvent> {
        let crossed: Vec<&'static AchievementDefinition> = achievements::reading(metrics)
            .filter(|def| !is_unlocked(unlocks, def.id) && def.reached_by(profile))
            .collect();
        crossed
            .into_iter()
            .map(|def| grant(def, profile, unlocks, at))
            .collect()
    }
}

fn is_unlocked(unlocks: &[AchievementUnlock], id: AchievementId) -> bool {
    unlocks.iter().any(|u| u.achievement == id)
}

fn grant(
    def: &AchievementDefinition,
    profile: &mut PlayerProfile,
    unlocks: &mut Vec<AchievementUnlock>,
    at: DateTime<Utc>,
) -> UnlockEvent {
    profile.total_points += u64::from(def.bonus_points);
    unlocks.push(AchievementUnlock {
        identity: profile.identity.clone(),
        achievement: def.id,
        unlocked_at: at,
        seen: false,
    });
    info!(
        identity = %profile.identity,
        achievement = def.id.as_str(),
        bonus = def.bonus_points,
        "Achievement unlocked."
    );
    UnlockEvent::new(&profile.identity, def, at)
}

/// Consecutive-day streak rule: yesterday extends, today is unchanged,
/// anything else restarts at 1.
pub fn advance_streak(profile: &mut PlayerProfile, today: NaiveDate) {
    match profile.last_activity_date {
        Some(last) if last == today => {}
        Some(last) if today.pred_opt() == Some(last) => profile.current_streak += 1,
        _ => profile.current_streak = 1,
    }
    // Activity today always counts as at least one day.
    profile.current_streak = profile.current_streak.max(1);
    profile.longest_streak = profile.longest_streak.max(profile.current_streak);
    profile.last_activity_date = Some(today);
}
