//! crates/inbox_triage_core/src/session.rs
//!
//! The session controller: owns one review run from batch fetch to
//! completion and folds every decision into the ledger through the reward
//! engine.
//!
//! ```text
//! NotStarted -> Loading -> Active -> Completed
//!                  \          \
//!                   +-> Errored <+
//! ```
//!
//! Every mutation starts from the stored session, profile and unlocks (the
//! dashboard may have deleted an older session in the meantime), is computed
//! on those copies, saved in one `LedgerWrite`, and only then swapped in. A
//! failed save therefore leaves memory equal to what is on disk.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    day_key, normalize_identity, AchievementUnlock, DailyActivity, Decision, DecisionAction, Item,
    PlayerProfile, Session,
};
use crate::error::{FetchFailure, LedgerError, LedgerResult};
use crate::ports::{Clock, IdentityProvider, ItemSource, LedgerStore, LedgerWrite, PortError};
use crate::reconcile::ProfileReconciler;
use crate::rewards::{Ledger, RewardEngine, UnlockEvent};

//=========================================================================================
// Phases, Settings and Outcomes
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    NotStarted,
    Loading,
    Active,
    Completed,
    Errored(FetchFailure),
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::NotStarted => write!(f, "not started"),
            SessionPhase::Loading => write!(f, "loading"),
            SessionPhase::Active => write!(f, "active"),
            SessionPhase::Completed => write!(f, "completed"),
            SessionPhase::Errored(reason) => write!(f, "errored ({reason})"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// How many items to request per session.
    pub batch_size: usize,
    /// Offset used to cut calendar days.
    pub utc_offset: FixedOffset,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            batch_size: 20,
            utc_offset: Utc.fix(),
        }
    }
}

/// The external collaborators a controller talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn LedgerStore>,
    pub source: Arc<dyn ItemSource>,
    pub identity: Arc<dyn IdentityProvider>,
    pub clock: Arc<dyn Clock>,
}

/// A committed decision plus what is needed to unwind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldDecision {
    pub decision: Decision,
    /// Cursor position of the decided item.
    pub cursor: usize,
    /// Day bucket the decision was folded into.
    pub day: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub held: HeldDecision,
    pub unlocks: Vec<UnlockEvent>,
    /// Whether this decision completed the session.
    pub completed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Advanced {
    pub unlocks: Vec<UnlockEvent>,
    pub completed: bool,
}

//=========================================================================================
// Session Controller
//=========================================================================================

pub struct SessionController {
    ports: Collaborators,
    engine: RewardEngine,
    reconciler: ProfileReconciler,
    settings: SessionSettings,
    phase: SessionPhase,
    items: Vec<Item>,
    cursor: usize,
    session: Option<Session>,
    profile: Option<PlayerProfile>,
    unlocks: Vec<AchievementUnlock>,
}

impl SessionController {
    pub fn new(ports: Collaborators, engine: RewardEngine, settings: SessionSettings) -> Self {
        let reconciler = ProfileReconciler::new(ports.store.clone(), ports.clock.clone(), engine.clone());
        Self {
            ports,
            engine,
            reconciler,
            settings,
            phase: SessionPhase::NotStarted,
            items: Vec::new(),
            cursor: 0,
            session: None,
            profile: None,
            unlocks: Vec::new(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn profile(&self) -> Option<&PlayerProfile> {
        self.profile.as_ref()
    }

    pub fn unlocks(&self) -> &[AchievementUnlock] {
        &self.unlocks
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The item awaiting a decision, if the session is active.
    pub fn current_item(&self) -> Option<&Item> {
        match self.phase {
            SessionPhase::Active => self.items.get(self.cursor),
            _ => None,
        }
    }

    pub fn engine(&self) -> &RewardEngine {
        &self.engine
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Fetches a batch and opens a new session.
    pub async fn start(&mut self) -> LedgerResult<&Session> {
        match self.phase {
            SessionPhase::NotStarted | SessionPhase::Completed | SessionPhase::Errored(_) => {}
            _ => return Err(self.invalid("start")),
        }
        self.phase = SessionPhase::Loading;
        self.items.clear();
        self.cursor = 0;
        self.session = None;

        let identity = match self.ports.identity.current_identity().await {
            Ok(identity) => normalize_identity(&identity),
            Err(e) => {
                self.phase = SessionPhase::NotStarted;
                return Err(LedgerError::Identity(e));
            }
        };

        let (profile, unlocks) = match self.reconciler.load(&identity).await {
            Ok(loaded) => loaded,
            Err(e) => {
                self.phase = SessionPhase::NotStarted;
                return Err(e);
            }
        };
        self.profile = Some(profile.clone());
        self.unlocks = unlocks;

        let items = match self.ports.source.fetch_batch(self.settings.batch_size).await {
            Ok(items) if items.is_empty() => return Err(self.fetch_failed(FetchFailure::EmptyBatch)),
            Ok(items) => items,
            Err(e) => return Err(self.fetch_failed(FetchFailure::Failed(e.to_string()))),
        };

        let now = self.ports.clock.now();
        let mut day = match self.load_day(&identity, self.today(now)).await {
            Ok(day) => day,
            Err(e) => {
                self.phase = SessionPhase::NotStarted;
                return Err(e);
            }
        };
        day.record_session_start();
        let session = Session::new(&identity, items.len() as u32, now);

        let batch = LedgerWrite::new().session(&session).day(&day).profile(&profile);
        if let Err(e) = self.ports.store.save(batch).await {
            self.phase = SessionPhase::NotStarted;
            return Err(LedgerError::Persistence(e));
        }

        info!(
            identity = %identity,
            session = %session.id,
            items = items.len(),
            "Session started."
        );
        self.items = items;
        self.phase = SessionPhase::Active;
        Ok(self.session.insert(session))
    }

    /// Records `action` on the current item. The decision is durable when
    /// this returns; the caller hands the result to the undo controller.
    pub async fn record_decision(&mut self, item_id: &str, action: DecisionAction) -> LedgerResult<Recorded> {
        let item = self.expect_current(item_id, "record a decision")?.clone();
        let (mut session, mut profile, mut unlocks) = self.fresh_state().await?;
        let known_unlocks = unlocks.len();

        let now = self.ports.clock.now();
        let today = self.today(now);
        let mut day = self.load_day(&profile.identity, today).await?;

        let decision = Decision::new(session.id, &item, action, now);
        let mut events = self.engine.apply(
            &decision,
            &mut Ledger {
                session: &mut session,
                day: &mut day,
                profile: &mut profile,
                unlocks: &mut unlocks,
            },
        );

        let cursor = self.cursor;
        let completed = cursor + 1 >= self.items.len();
        if completed {
            events.extend(self.complete(&mut session, &mut profile, &mut unlocks, now));
        }

        let batch = LedgerWrite::new()
            .session(&session)
            .day(&day)
            .profile(&profile)
            .unlocks(unlocks[known_unlocks..].iter().cloned());
        self.ports.store.save(batch).await.map_err(LedgerError::Persistence)?;

        debug!(
            decision = %decision.id,
            item = %decision.item_id,
            action = decision.action.label(),
            points = decision.points,
            "Decision recorded."
        );
        self.commit_state(session, profile, unlocks);
        self.cursor = cursor + 1;
        if completed {
            self.phase = SessionPhase::Completed;
        }
        self.engine.feed().publish(&events);

        Ok(Recorded {
            held: HeldDecision {
                decision,
                cursor,
                day: today,
            },
            unlocks: events,
            completed,
        })
    }

    /// Moves past the current item without creating a decision.
    pub async fn skip(&mut self, item_id: &str) -> LedgerResult<Advanced> {
        self.expect_current(item_id, "skip")?;
        if self.cursor + 1 < self.items.len() {
            self.cursor += 1;
            return Ok(Advanced::default());
        }

        let (mut session, mut profile, mut unlocks) = self.fresh_state().await?;
        let known_unlocks = unlocks.len();
        let events = self.complete(&mut session, &mut profile, &mut unlocks, self.ports.clock.now());

        let batch = LedgerWrite::new()
            .session(&session)
            .profile(&profile)
            .unlocks(unlocks[known_unlocks..].iter().cloned());
        self.ports.store.save(batch).await.map_err(LedgerError::Persistence)?;

        self.commit_state(session, profile, unlocks);
        self.cursor += 1;
        self.phase = SessionPhase::Completed;
        self.engine.feed().publish(&events);
        Ok(Advanced {
            unlocks: events,
            completed: true,
        })
    }

    /// Unwinds a committed decision: reverses its rewards, deletes it,
    /// moves the cursor back to its item and reopens a completed session.
    pub async fn revoke(&mut self, held: &HeldDecision) -> LedgerResult<()> {
        let (mut session, mut profile, mut unlocks) = self.fresh_state().await?;
        if session.id != held.decision.session_id {
            return Err(LedgerError::NotFound(format!(
                "decision {} is not part of the live session",
                held.decision.id
            )));
        }
        let mut day = self.load_day(&profile.identity, held.day).await?;

        self.engine.reverse(
            &held.decision,
            &mut Ledger {
                session: &mut session,
                day: &mut day,
                profile: &mut profile,
                unlocks: &mut unlocks,
            },
        );
        let reopened = session.is_completed;
        if reopened {
            session.reopen();
            profile.total_sessions_completed = profile.total_sessions_completed.saturating_sub(1);
        }

        let batch = LedgerWrite::new()
            .session(&session)
            .remove_decision(held.decision.id)
            .day(&day)
            .profile(&profile);
        self.ports.store.save(batch).await.map_err(LedgerError::Persistence)?;

        info!(decision = %held.decision.id, reopened, "Decision undone.");
        self.commit_state(session, profile, unlocks);
        self.cursor = held.cursor;
        if self.phase == SessionPhase::Completed {
            self.phase = SessionPhase::Active;
        }
        Ok(())
    }

    /// Returns a finished or failed controller to `NotStarted`.
    pub fn reset(&mut self) -> LedgerResult<()> {
        match self.phase {
            SessionPhase::Completed | SessionPhase::Errored(_) => {}
            SessionPhase::NotStarted => return Ok(()),
            _ => return Err(self.invalid("reset")),
        }
        self.phase = SessionPhase::NotStarted;
        self.items.clear();
        self.cursor = 0;
        self.session = None;
        Ok(())
    }

    /// Deletes a stored session of the current user and reverses its
    /// contribution. The live session cannot be deleted while in progress.
    pub async fn delete_session(&mut self, session_id: Uuid) -> LedgerResult<PlayerProfile> {
        let live = self.session.as_ref().map(|s| s.id) == Some(session_id);
        if live && matches!(self.phase, SessionPhase::Active | SessionPhase::Loading) {
            return Err(self.invalid("delete the live session"));
        }
        let identity = self
            .ports
            .identity
            .current_identity()
            .await
            .map_err(LedgerError::Identity)?;

        let profile = remove_session(
            &self.ports,
            &self.engine,
            &identity,
            session_id,
            self.settings.utc_offset,
        )
        .await?;
        if live {
            self.session = None;
        }
        self.profile = Some(profile.clone());
        Ok(profile)
    }

    // ── Internals ────────────────────────────────────────────────────

    fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        day_key(now, self.settings.utc_offset)
    }

    fn invalid(&self, operation: &'static str) -> LedgerError {
        LedgerError::InvalidTransition {
            operation,
            phase: self.phase.clone(),
        }
    }

    fn fetch_failed(&mut self, failure: FetchFailure) -> LedgerError {
        warn!(reason = %failure, "Could not load a batch.");
        self.phase = SessionPhase::Errored(failure.clone());
        LedgerError::Fetch(failure)
    }

    fn expect_current(&self, item_id: &str, operation: &'static str) -> LedgerResult<&Item> {
        if self.phase != SessionPhase::Active {
            return Err(self.invalid(operation));
        }
        match self.items.get(self.cursor) {
            Some(item) if item.id == item_id => Ok(item),
            _ => Err(LedgerError::UnexpectedItem(item_id.to_string())),
        }
    }

    /// Working copies of the live session, the profile and its unlocks, read
    /// back from the store.
    ///
    /// A live session deleted elsewhere ends the run: the controller returns
    /// to `NotStarted` rather than saving the session again.
    async fn fresh_state(&mut self) -> LedgerResult<(Session, PlayerProfile, Vec<AchievementUnlock>)> {
        let live_id = self
            .session
            .as_ref()
            .map(|s| s.id)
            .ok_or_else(|| LedgerError::NotFound("no live session".to_string()))?;
        let session = match self.ports.store.session(live_id).await {
            Ok(session) => session,
            Err(PortError::NotFound(_)) => {
                warn!(session = %live_id, "Live session was deleted elsewhere.");
                self.phase = SessionPhase::NotStarted;
                self.items.clear();
                self.cursor = 0;
                self.session = None;
                return Err(LedgerError::NotFound(format!("session {live_id} was deleted")));
            }
            Err(e) => return Err(LedgerError::Persistence(e)),
        };
        let (profile, unlocks) = self.reconciler.load(&session.identity).await?;
        self.profile = Some(profile.clone());
        self.unlocks = unlocks.clone();
        Ok((session, profile, unlocks))
    }

    async fn load_day(&self, identity: &str, day: NaiveDate) -> LedgerResult<DailyActivity> {
        let stored = self
            .ports
            .store
            .daily_activity(identity, day)
            .await
            .map_err(LedgerError::Persistence)?;
        Ok(stored.unwrap_or_else(|| DailyActivity::new(identity, day)))
    }

    fn complete(
        &self,
        session: &mut Session,
        profile: &mut PlayerProfile,
        unlocks: &mut Vec<AchievementUnlock>,
        now: DateTime<Utc>,
    ) -> Vec<UnlockEvent> {
        session.complete(now);
        let events = self
            .engine
            .complete_session(session, profile, unlocks, self.today(now), now);
        info!(
            session = %session.id,
            decisions = session.total_decisions(),
            points = session.points_earned,
            "Session completed."
        );
        events
    }

    fn commit_state(
        &mut self,
        session: Session,
        profile: PlayerProfile,
        unlocks: Vec<AchievementUnlock>,
    ) {
        self.session = Some(session);
        self.profile = Some(profile);
        self.unlocks = unlocks;
    }
}

/// Deletes `session_id` (owned by `identity`) and reverses every decision it
/// holds against its own day bucket and the profile. Returns the updated
/// profile.
pub async fn remove_session(
    ports: &Collaborators,
    engine: &RewardEngine,
    identity: &str,
    session_id: Uuid,
    utc_offset: FixedOffset,
) -> LedgerResult<PlayerProfile> {
    let identity = normalize_identity(identity);
    let stored = match ports.store.session(session_id).await {
        Ok(session) if session.identity == identity => session,
        Ok(_) | Err(PortError::NotFound(_)) => {
            return Err(LedgerError::NotFound(format!("session {session_id}")));
        }
        Err(e) => return Err(LedgerError::Persistence(e)),
    };

    let reconciler = ProfileReconciler::new(ports.store.clone(), ports.clock.clone(), engine.clone());
    let (mut profile, _) = reconciler.load(&identity).await?;

    let mut session = stored.clone();
    let mut days: Vec<DailyActivity> = Vec::new();
    for decision in &stored.decisions {
        let key = day_key(decision.created_at, utc_offset);
        let index = match days.iter().position(|d| d.day == key) {
            Some(index) => index,
            None => {
                let day = ports
                    .store
                    .daily_activity(&identity, key)
                    .await
                    .map_err(LedgerError::Persistence)?
                    .unwrap_or_else(|| DailyActivity::new(&identity, key));
                days.push(day);
                days.len() - 1
            }
        };
        engine.reverse(
            decision,
            &mut Ledger {
                session: &mut session,
                day: &mut days[index],
                profile: &mut profile,
                unlocks: &mut Vec::new(),
            },
        );
    }
    if stored.is_completed {
        profile.total_sessions_completed = profile.total_sessions_completed.saturating_sub(1);
    }

    let mut batch = LedgerWrite::new().delete_session(session_id).profile(&profile);
    for day in &days {
        batch = batch.day(day);
    }
    ports.store.save(batch).await.map_err(LedgerError::Persistence)?;

    info!(
        identity = %identity,
        session = %session_id,
        decisions = stored.decisions.len(),
        "Session deleted."
    );
    Ok(profile)
}
