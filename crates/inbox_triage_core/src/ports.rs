//! crates/inbox_triage_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the ledger's external collaborators.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete mail transport, database and identity flow.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::achievements::AchievementId;
use crate::domain::{AchievementUnlock, DailyActivity, DecisionAction, Item, PlayerProfile, Session};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Ledger Write Batch
//=========================================================================================

/// Every insert, update and delete produced by one ledger operation.
///
/// Adapters must apply a batch atomically: either all of it is durable or none.
/// Sessions are upserted together with their current decisions; decisions
/// listed in `removed_decisions` are deleted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerWrite {
    pub profiles: Vec<PlayerProfile>,
    pub deleted_profiles: Vec<Uuid>,
    pub sessions: Vec<Session>,
    pub deleted_sessions: Vec<Uuid>,
    pub removed_decisions: Vec<Uuid>,
    pub days: Vec<DailyActivity>,
    pub unlocks: Vec<AchievementUnlock>,
}

impl LedgerWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile(mut self, profile: &PlayerProfile) -> Self {
        self.profiles.push(profile.clone());
        self
    }

    pub fn delete_profile(mut self, profile_id: Uuid) -> Self {
        self.deleted_profiles.push(profile_id);
        self
    }

    pub fn session(mut self, session: &Session) -> Self {
        self.sessions.push(session.clone());
        self
    }

    pub fn delete_session(mut self, session_id: Uuid) -> Self {
        self.deleted_sessions.push(session_id);
        self
    }

    pub fn remove_decision(mut self, decision_id: Uuid) -> Self {
        self.removed_decisions.push(decision_id);
        self
    }

    pub fn day(mut self, day: &DailyActivity) -> Self {
        self.days.push(day.clone());
        self
    }

    pub fn unlocks(mut self, unlocks: impl IntoIterator<Item = AchievementUnlock>) -> Self {
        self.unlocks.extend(unlocks);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The remote mailbox: yields items to review and receives decisions.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Fetches up to `limit` items for a new session.
    async fn fetch_batch(&self, limit: usize) -> PortResult<Vec<Item>>;

    /// Pushes one decision to the remote system. Called at most once per decision.
    async fn send_decision(&self, item_id: &str, action: &DecisionAction) -> PortResult<()>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    // --- Profiles ---
    /// All profiles whose identity matches case-insensitively, oldest first.
    async fn profiles_matching(&self, identity: &str) -> PortResult<Vec<PlayerProfile>>;

    // --- Daily Activity ---
    async fn daily_activity(&self, identity: &str, day: NaiveDate) -> PortResult<Option<DailyActivity>>;

    /// Days in `[from, to]`, ascending.
    async fn daily_activities(
        &self,
        identity: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> PortResult<Vec<DailyActivity>>;

    // --- Sessions ---
    async fn session(&self, session_id: Uuid) -> PortResult<Session>;

    /// Sessions for `identity`, most recent first.
    async fn sessions_for(&self, identity: &str) -> PortResult<Vec<Session>>;

    // --- Achievements ---
    async fn unlocks_for(&self, identity: &str) -> PortResult<Vec<AchievementUnlock>>;

    async fn mark_unlock_seen(&self, identity: &str, achievement: AchievementId) -> PortResult<()>;

    // --- Transactional Save ---
    async fn save(&self, batch: LedgerWrite) -> PortResult<()>;
}

/// Supplies the identity string of the current user.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_identity(&self) -> PortResult<String>;
}

/// Source of the current time, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
