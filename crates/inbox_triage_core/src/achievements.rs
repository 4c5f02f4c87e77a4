//! crates/inbox_triage_core/src/achievements.rs
//!
//! The closed catalog of achievements. Pure lookup, no state.

use serde::{Deserialize, Serialize};

use crate::domain::{PlayerProfile, Session};

/// Minimum number of decisions a session needs before the behavioral
/// achievements can fire.
pub const BEHAVIORAL_MIN_DECISIONS: u32 = 5;

/// Every achievement the application knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementId {
    FirstDecision,
    #[serde(rename = "decisions_100")]
    Decisions100,
    #[serde(rename = "decisions_500")]
    Decisions500,
    #[serde(rename = "unsubscribes_10")]
    Unsubscribes10,
    #[serde(rename = "unsubscribes_50")]
    Unsubscribes50,
    #[serde(rename = "unsubscribes_100")]
    Unsubscribes100,
    FirstSession,
    #[serde(rename = "sessions_10")]
    Sessions10,
    #[serde(rename = "streak_3")]
    Streak3,
    #[serde(rename = "streak_7")]
    Streak7,
    #[serde(rename = "streak_30")]
    Streak30,
    #[serde(rename = "level_5")]
    Level5,
    #[serde(rename = "level_10")]
    Level10,
    CleanSweep,
    Curator,
}

impl AchievementId {
    /// Stable storage key, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AchievementId::FirstDecision => "first_decision",
            AchievementId::Decisions100 => "decisions_100",
            AchievementId::Decisions500 => "decisions_500",
            AchievementId::Unsubscribes10 => "unsubscribes_10",
            AchievementId::Unsubscribes50 => "unsubscribes_50",
            AchievementId::Unsubscribes100 => "unsubscribes_100",
            AchievementId::FirstSession => "first_session",
            AchievementId::Sessions10 => "sessions_10",
            AchievementId::Streak3 => "streak_3",
            AchievementId::Streak7 => "streak_7",
            AchievementId::Streak30 => "streak_30",
            AchievementId::Level5 => "level_5",
            AchievementId::Level10 => "level_10",
            AchievementId::CleanSweep => "clean_sweep",
            AchievementId::Curator => "curator",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        CATALOG
            .iter()
            .map(|def| def.id)
            .find(|id| id.as_str() == raw)
    }

    pub fn definition(&self) -> &'static AchievementDefinition {
        // CATALOG rows are declared in variant order.
        &CATALOG[*self as usize]
    }
}

/// The profile (or session) figure an achievement threshold is compared to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    TotalDecisions,
    SessionsCompleted,
    LifetimeUnsubscribes,
    LongestStreak,
    CurrentLevel,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::TotalDecisions,
        Metric::SessionsCompleted,
        Metric::LifetimeUnsubscribes,
        Metric::LongestStreak,
        Metric::CurrentLevel,
    ];

    pub fn read(&self, profile: &PlayerProfile) -> u64 {
        match self {
            Metric::TotalDecisions => u64::from(profile.total_decisions()),
            Metric::SessionsCompleted => u64::from(profile.total_sessions_completed),
            Metric::LifetimeUnsubscribes => u64::from(profile.lifetime_unsubscribes),
            Metric::LongestStreak => u64::from(profile.longest_streak),
            Metric::CurrentLevel => u64::from(profile.current_level),
        }
    }
}

/// How an achievement is unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    /// `metric >= threshold` on the profile.
    Threshold { metric: Metric, threshold: u64 },
    /// Every decision in a completed session was an unsubscribe.
    AllUnsubscribed,
    /// Every decision in a completed session was a keep.
    AllKept,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AchievementDefinition {
    pub id: AchievementId,
    pub title: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub criterion: Criterion,
    pub bonus_points: u32,
}

impl AchievementDefinition {
    pub fn metric(&self) -> Option<Metric> {
        match self.criterion {
            Criterion::Threshold { metric, .. } => Some(metric),
            _ => None,
        }
    }

    pub fn threshold(&self) -> Option<u64> {
        match self.criterion {
            Criterion::Threshold { threshold, .. } => Some(threshold),
            _ => None,
        }
    }

    /// Whether a threshold achievement has been reached by `profile`.
    /// Behavioral achievements always answer `false` here.
    pub fn reached_by(&self, profile: &PlayerProfile) -> bool {
        match self.criterion {
            Criterion::Threshold { metric, threshold } => metric.read(profile) >= threshold,
            Criterion::AllUnsubscribed | Criterion::AllKept => false,
        }
    }

    /// Whether a behavioral achievement is earned by a completed `session`.
    /// Every item of the batch must have been decided; a skip disqualifies.
    pub fn earned_by_session(&self, session: &Session) -> bool {
        let eligible = session.is_completed
            && session.target_count >= BEHAVIORAL_MIN_DECISIONS
            && session.total_decisions() == session.target_count;
        match self.criterion {
            Criterion::AllUnsubscribed => eligible && session.all_decisions_are(true),
            Criterion::AllKept => eligible && session.all_decisions_are(false),
            Criterion::Threshold { .. } => false,
        }
    }
}

const fn threshold(
    id: AchievementId,
    title: &'static str,
    description: &'static str,
    icon: &'static str,
    metric: Metric,
    threshold: u64,
    bonus_points: u32,
) -> AchievementDefinition {
    AchievementDefinition {
        id,
        title,
        description,
        icon,
        criterion: Criterion::Threshold { metric, threshold },
        bonus_points,
    }
}

pub static CATALOG: [AchievementDefinition; 15] = [
    threshold(AchievementId::FirstDecision, "First Swipe", "Make your first decision", "hand.tap", Metric::TotalDecisions, 1, 10),
    threshold(AchievementId::Decisions100, "Centurion", "Make 100 decisions", "100.circle", Metric::TotalDecisions, 100, 100),
    threshold(AchievementId::Decisions500, "Inbox Veteran", "Make 500 decisions", "tray.full", Metric::TotalDecisions, 500, 300),
    threshold(AchievementId::Unsubscribes10, "Declutterer", "Unsubscribe from 10 senders", "scissors", Metric::LifetimeUnsubscribes, 10, 50),
    threshold(AchievementId::Unsubscribes50, "Spam Slayer", "Unsubscribe from 50 senders", "flame", Metric::LifetimeUnsubscribes, 50, 150),
    threshold(AchievementId::Unsubscribes100, "Inbox Zen", "Unsubscribe from 100 senders", "leaf", Metric::LifetimeUnsubscribes, 100, 300),
    threshold(AchievementId::FirstSession, "Warmed Up", "Complete your first session", "flag", Metric::SessionsCompleted, 1, 25),
    threshold(AchievementId::Sessions10, "Regular", "Complete 10 sessions", "calendar", Metric::SessionsCompleted, 10, 100),
    threshold(AchievementId::Streak3, "On a Roll", "Keep a 3 day streak", "bolt", Metric::LongestStreak, 3, 50),
    threshold(AchievementId::Streak7, "Week Warrior", "Keep a 7 day streak", "bolt.fill", Metric::LongestStreak, 7, 150),
    threshold(AchievementId::Streak30, "Unstoppable", "Keep a 30 day streak", "crown", Metric::LongestStreak, 30, 500),
    threshold(AchievementId::Level5, "Rising Star", "Reach level 5", "star", Metric::CurrentLevel, 5, 100),
    threshold(AchievementId::Level10, "Inbox Master", "Reach level 10", "star.fill", Metric::CurrentLevel, 10, 250),
    AchievementDefinition {
        id: AchievementId::CleanSweep,
        title: "Clean Sweep",
        description: "Unsubscribe from every email in a session of 5 or more",
        icon: "sparkles",
        criterion: Criterion::AllUnsubscribed,
        bonus_points: 75,
    },
    AchievementDefinition {
        id: AchievementId::Curator,
        title: "Curator",
        description: "Keep every email in a session of 5 or more",
        icon: "heart",
        criterion: Criterion::AllKept,
        bonus_points: 50,
    },
];

/// Threshold achievements that read any of `metrics`.
pub fn reading(metrics: &[Metric]) -> impl Iterator<Item = &'static AchievementDefinition> + '_ {
    CATALOG
        .iter()
        .filter(move |def| def.metric().is_some_and(|m| metrics.contains(&m)))
}

/// Behavioral achievements, evaluated against completed sessions.
pub fn behavioral() -> impl Iterator<Item = &'static AchievementDefinition> {
    CATALOG.iter().filter(|def| def.metric().is_none())
}
