//! crates/inbox_triage_core/src/domain.rs
//!
//! Defines the pure, core ledger entities for the application.
//! These structs are independent of any database or transport. The only
//! behavior they carry is the invariant-preserving mutators that fold a
//! decision into an aggregate and unfold it again.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rewards::level_for_xp;

/// Points and XP granted for an unsubscribe decision.
pub const UNSUBSCRIBE_POINTS: u32 = 10;
pub const UNSUBSCRIBE_XP: u32 = 15;
/// Points and XP granted for a keep decision.
pub const KEEP_POINTS: u32 = 5;
pub const KEEP_XP: u32 = 5;

/// Normalizes an identity string the way profiles are keyed.
pub fn normalize_identity(identity: &str) -> String {
    identity.trim().to_lowercase()
}

//=========================================================================================
// Items and Actions
//=========================================================================================

/// How the remote side should carry out an unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnsubscribeMethod {
    /// RFC 8058 one-click POST endpoint.
    OneClick { url: String },
    Mailto { address: String },
    /// A plain link the user would have to visit.
    Link { url: String },
}

/// The binary decision a user makes on one item, with its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionAction {
    Unsubscribe {
        #[serde(default)]
        method: Option<UnsubscribeMethod>,
    },
    Keep,
}

impl DecisionAction {
    /// Points awarded for this action. Fixed at decision time.
    pub fn points(&self) -> u32 {
        match self {
            DecisionAction::Unsubscribe { .. } => UNSUBSCRIBE_POINTS,
            DecisionAction::Keep => KEEP_POINTS,
        }
    }

    /// XP awarded for this action. Fixed at decision time.
    pub fn xp(&self) -> u32 {
        match self {
            DecisionAction::Unsubscribe { .. } => UNSUBSCRIBE_XP,
            DecisionAction::Keep => KEEP_XP,
        }
    }

    pub fn is_unsubscribe(&self) -> bool {
        matches!(self, DecisionAction::Unsubscribe { .. })
    }

    /// Stable label used by storage and logs.
    pub fn label(&self) -> &'static str {
        match self {
            DecisionAction::Unsubscribe { .. } => "unsubscribe",
            DecisionAction::Keep => "keep",
        }
    }
}

/// One email presented for review, as yielded by the item source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub sender: String,
    pub subject: String,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unsubscribe: Option<UnsubscribeMethod>,
}

//=========================================================================================
// Decision
//=========================================================================================

/// One user action on one item. Owned by its `Session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub session_id: Uuid,
    pub item_id: String,
    /// Display-only snapshot taken when the decision was made.
    pub sender: String,
    pub subject: String,
    pub action: DecisionAction,
    pub created_at: DateTime<Utc>,
    pub points: u32,
    pub xp: u32,
}

impl Decision {
    /// Creates a decision for `item`. Points and XP are derived from the
    /// action here and never recomputed.
    pub fn new(session_id: Uuid, item: &Item, action: DecisionAction, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            item_id: item.id.clone(),
            sender: item.sender.clone(),
            subject: item.subject.clone(),
            points: action.points(),
            xp: action.xp(),
            action,
            created_at: at,
        }
    }
}

//=========================================================================================
// Session
//=========================================================================================

/// One review run over a batch of items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub identity: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub target_count: u32,
    pub unsubscribe_count: u32,
    pub keep_count: u32,
    pub points_earned: u64,
    pub xp_earned: u64,
    pub is_completed: bool,
    /// Decisions in the order they were made.
    pub decisions: Vec<Decision>,
}

impl Session {
    pub fn new(identity: &str, target_count: u32, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: normalize_identity(identity),
            started_at: at,
            ended_at: None,
            target_count,
            unsubscribe_count: 0,
            keep_count: 0,
            points_earned: 0,
            xp_earned: 0,
            is_completed: false,
            decisions: Vec::new(),
        }
    }

    pub fn total_decisions(&self) -> u32 {
        self.unsubscribe_count + self.keep_count
    }

    pub fn add_decision(&mut self, decision: Decision) {
        if decision.action.is_unsubscribe() {
            self.unsubscribe_count += 1;
        } else {
            self.keep_count += 1;
        }
        self.points_earned += u64::from(decision.points);
        self.xp_earned += u64::from(decision.xp);
        self.decisions.push(decision);
    }

    /// Removes the decision with `decision_id` and unwinds its counters.
    /// Counters saturate at zero.
    pub fn remove_decision(&mut self, decision_id: Uuid) -> Option<Decision> {
        let index = self.decisions.iter().position(|d| d.id == decision_id)?;
        let decision = self.decisions.remove(index);
        if decision.action.is_unsubscribe() {
            self.unsubscribe_count = self.unsubscribe_count.saturating_sub(1);
        } else {
            self.keep_count = self.keep_count.saturating_sub(1);
        }
        self.points_earned = self.points_earned.saturating_sub(u64::from(decision.points));
        self.xp_earned = self.xp_earned.saturating_sub(u64::from(decision.xp));
        Some(decision)
    }

    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.is_completed = true;
        self.ended_at = Some(at);
    }

    /// Reverts a completion. Only the undo path calls this.
    pub fn reopen(&mut self) {
        self.is_completed = false;
        self.ended_at = None;
    }

    /// True when the session has decisions and all of them are unsubscribes
    /// (`unsubscribe == true`) or all of them are keeps.
    pub fn all_decisions_are(&self, unsubscribe: bool) -> bool {
        !self.decisions.is_empty()
            && self
                .decisions
                .iter()
                .all(|d| d.action.is_unsubscribe() == unsubscribe)
    }
}

//=========================================================================================
// DailyActivity
//=========================================================================================

/// Per-calendar-day rollup for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyActivity {
    pub identity: String,
    /// The local calendar day this bucket covers.
    pub day: NaiveDate,
    pub processed: u32,
    pub unsubscribed: u32,
    pub kept: u32,
    pub points_earned: u64,
    pub xp_earned: u64,
    pub sessions_started: u32,
    /// Monotonic for the day: once set, never cleared.
    pub counts_toward_streak: bool,
}

impl DailyActivity {
    pub fn new(identity: &str, day: NaiveDate) -> Self {
        Self {
            identity: normalize_identity(identity),
            day,
            processed: 0,
            unsubscribed: 0,
            kept: 0,
            points_earned: 0,
            xp_earned: 0,
            sessions_started: 0,
            counts_toward_streak: false,
        }
    }

    /// The instant the day starts in the given local offset.
    pub fn day_start(&self, offset: FixedOffset) -> DateTime<Utc> {
        let midnight = self.day.and_time(NaiveTime::MIN);
        offset
            .from_local_datetime(&midnight)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
    }

    pub fn record(&mut self, decision: &Decision) {
        self.processed += 1;
        if decision.action.is_unsubscribe() {
            self.unsubscribed += 1;
        } else {
            self.kept += 1;
        }
        self.points_earned += u64::from(decision.points);
        self.xp_earned += u64::from(decision.xp);
        self.counts_toward_streak = true;
    }

    /// Exact inverse of `record` except for `counts_toward_streak`.
    pub fn reverse(&mut self, decision: &Decision) {
        self.processed = self.processed.saturating_sub(1);
        if decision.action.is_unsubscribe() {
            self.unsubscribed = self.unsubscribed.saturating_sub(1);
        } else {
            self.kept = self.kept.saturating_sub(1);
        }
        self.points_earned = self.points_earned.saturating_sub(u64::from(decision.points));
        self.xp_earned = self.xp_earned.saturating_sub(u64::from(decision.xp));
    }

    pub fn record_session_start(&mut self) {
        self.sessions_started += 1;
    }
}

/// Local calendar day of `at` in `offset`.
pub fn day_key(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    at.with_timezone(&offset).date_naive()
}

//=========================================================================================
// PlayerProfile
//=========================================================================================

/// Lifetime aggregate for one logical identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub id: Uuid,
    pub identity: String,
    pub total_xp: u64,
    /// Cached `level_for_xp(total_xp)`.
    pub current_level: u32,
    pub total_points: u64,
    pub lifetime_unsubscribes: u32,
    pub lifetime_keeps: u32,
    pub total_sessions_completed: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_activity_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl PlayerProfile {
    pub fn new(identity: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: normalize_identity(identity),
            total_xp: 0,
            current_level: 1,
            total_points: 0,
            lifetime_unsubscribes: 0,
            lifetime_keeps: 0,
            total_sessions_completed: 0,
            current_streak: 0,
            longest_streak: 0,
            last_activity_date: None,
            created_at: at,
        }
    }

    pub fn total_decisions(&self) -> u32 {
        self.lifetime_unsubscribes + self.lifetime_keeps
    }

    /// Recomputes the cached level from `total_xp`.
    pub fn refresh_level(&mut self) {
        self.current_level = level_for_xp(self.total_xp);
    }
}

//=========================================================================================
// AchievementUnlock
//=========================================================================================

/// Record that an achievement was unlocked for an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementUnlock {
    pub identity: String,
    pub achievement: crate::achievements::AchievementId,
    pub unlocked_at: DateTime<Utc>,
    pub seen: bool,
}
