#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use inbox_triage_core::achievements::AchievementId;
use inbox_triage_core::{
    AchievementUnlock, Clock, Collaborators, DailyActivity, DecisionAction, IdentityProvider, InMemoryLedgerStore,
    Item, ItemSource, LedgerStore, LedgerWrite, PlayerProfile, PortError, PortResult, RewardEngine, Session,
    SessionController, SessionSettings, UnlockFeed,
};
use uuid::Uuid;

pub const USER: &str = "someone@example.com";

pub fn items(count: usize) -> Vec<Item> {
    (0..count)
        .map(|n| Item {
            id: format!("msg-{n}"),
            sender: format!("news{n}@shop.example"),
            subject: format!("Deals #{n}"),
            received_at: None,
            unsubscribe: None,
        })
        .collect()
}

pub fn unsubscribe() -> DecisionAction {
    DecisionAction::Unsubscribe { method: None }
}

//=========================================================================================
// Item source
//=========================================================================================

/// Serves queued batches and records every decision pushed to it.
#[derive(Default)]
pub struct RecordingSource {
    batches: Mutex<VecDeque<PortResult<Vec<Item>>>>,
    sent: Mutex<Vec<(String, DecisionAction)>>,
    fail_sends: AtomicBool,
}

impl RecordingSource {
    pub fn with_batch(batch: Vec<Item>) -> Self {
        let source = Self::default();
        source.push_batch(batch);
        source
    }

    pub fn push_batch(&self, batch: Vec<Item>) {
        self.batches.lock().unwrap().push_back(Ok(batch));
    }

    pub fn push_failure(&self, reason: &str) {
        self.batches
            .lock()
            .unwrap()
            .push_back(Err(PortError::Unexpected(reason.to_string())));
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, DecisionAction)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_ids(&self) -> Vec<String> {
        self.sent().into_iter().map(|(id, _)| id).collect()
    }
}

#[async_trait]
impl ItemSource for RecordingSource {
    async fn fetch_batch(&self, limit: usize) -> PortResult<Vec<Item>> {
        let next = self.batches.lock().unwrap().pop_front();
        match next {
            Some(Ok(mut batch)) => {
                batch.truncate(limit);
                Ok(batch)
            }
            Some(Err(e)) => Err(e),
            None => Ok(Vec::new()),
        }
    }

    async fn send_decision(&self, item_id: &str, action: &DecisionAction) -> PortResult<()> {
        self.sent.lock().unwrap().push((item_id.to_string(), action.clone()));
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("remote rejected the decision".to_string()));
        }
        Ok(())
    }
}

//=========================================================================================
// Store
//=========================================================================================

/// In-memory store whose saves can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryLedgerStore,
    fail_saves: AtomicBool,
}

impl FlakyStore {
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn profiles_matching(&self, identity: &str) -> PortResult<Vec<PlayerProfile>> {
        self.inner.profiles_matching(identity).await
    }

    async fn daily_activity(&self, identity: &str, day: NaiveDate) -> PortResult<Option<DailyActivity>> {
        self.inner.daily_activity(identity, day).await
    }

    async fn daily_activities(
        &self,
        identity: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> PortResult<Vec<DailyActivity>> {
        self.inner.daily_activities(identity, from, to).await
    }

    async fn session(&self, session_id: Uuid) -> PortResult<Session> {
        self.inner.session(session_id).await
    }

    async fn sessions_for(&self, identity: &str) -> PortResult<Vec<Session>> {
        self.inner.sessions_for(identity).await
    }

    async fn unlocks_for(&self, identity: &str) -> PortResult<Vec<AchievementUnlock>> {
        self.inner.unlocks_for(identity).await
    }

    async fn mark_unlock_seen(&self, identity: &str, achievement: AchievementId) -> PortResult<()> {
        self.inner.mark_unlock_seen(identity, achievement).await
    }

    async fn save(&self, batch: LedgerWrite) -> PortResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("disk full".to_string()));
        }
        self.inner.save(batch).await
    }
}

//=========================================================================================
// Clock and identity
//=========================================================================================

pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub struct StaticIdentity(pub String);

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_identity(&self) -> PortResult<String> {
        Ok(self.0.clone())
    }
}

pub fn noon(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
}

//=========================================================================================
// Harness
//=========================================================================================

pub struct Harness {
    pub store: Arc<FlakyStore>,
    pub source: Arc<RecordingSource>,
    pub clock: Arc<FixedClock>,
    pub feed: UnlockFeed,
    pub controller: SessionController,
}

impl Harness {
    pub fn new(identity: &str) -> Self {
        let store = Arc::new(FlakyStore::default());
        let source = Arc::new(RecordingSource::default());
        let clock = Arc::new(FixedClock::at(noon(2024, 3, 4)));
        let feed = UnlockFeed::new(64);
        let ports = Collaborators {
            store: store.clone(),
            source: source.clone(),
            identity: Arc::new(StaticIdentity(identity.to_string())),
            clock: clock.clone(),
        };
        let controller = SessionController::new(ports, RewardEngine::new(feed.clone()), SessionSettings::default());
        Self {
            store,
            source,
            clock,
            feed,
            controller,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            source: self.source.clone(),
            identity: Arc::new(StaticIdentity(USER.to_string())),
            clock: self.clock.clone(),
        }
    }

    /// Starts a session over `count` fresh items.
    pub async fn start_with(&mut self, count: usize) {
        self.source.push_batch(items(count));
        self.controller.start().await.expect("session starts");
    }

    /// Decides every remaining item with `action`.
    pub async fn decide_all(&mut self, action: DecisionAction) {
        while let Some(item) = self.controller.current_item().cloned() {
            self.controller
                .record_decision(&item.id, action.clone())
                .await
                .expect("decision recorded");
        }
    }

    pub async fn stored_profile(&self) -> PlayerProfile {
        self.store
            .profiles_matching(USER)
            .await
            .unwrap()
            .into_iter()
            .next()
            .expect("profile stored")
    }
}
