//! crates/inbox_triage_core/src/memory.rs
//!
//! A process-local `LedgerStore`. Used when no database is configured and by
//! the integration tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::achievements::AchievementId;
use crate::domain::{normalize_identity, AchievementUnlock, DailyActivity, PlayerProfile, Session};
use crate::ports::{LedgerStore, LedgerWrite, PortError, PortResult};

#[derive(Default)]
struct MemoryState {
    profiles: Vec<PlayerProfile>,
    sessions: HashMap<Uuid, Session>,
    days: HashMap<(String, NaiveDate), DailyActivity>,
    unlocks: Vec<AchievementUnlock>,
}

#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<MemoryState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn profiles_matching(&self, identity: &str) -> PortResult<Vec<PlayerProfile>> {
        let wanted = normalize_identity(identity);
        let state = self.state.lock().await;
        let mut matches: Vec<PlayerProfile> = state
            .profiles
            .iter()
            .filter(|p| normalize_identity(&p.identity) == wanted)
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(matches)
    }

    async fn daily_activity(&self, identity: &str, day: NaiveDate) -> PortResult<Option<DailyActivity>> {
        let state = self.state.lock().await;
        Ok(state.days.get(&(normalize_identity(identity), day)).cloned())
    }

    async fn daily_activities(
        &self,
        identity: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> PortResult<Vec<DailyActivity>> {
        let identity = normalize_identity(identity);
        let state = self.state.lock().await;
        let mut days: Vec<DailyActivity> = state
            .days
            .values()
            .filter(|d| d.identity == identity && d.day >= from && d.day <= to)
            .cloned()
            .collect();
        days.sort_by_key(|d| d.day);
        Ok(days)
    }

    async fn session(&self, session_id: Uuid) -> PortResult<Session> {
        let state = self.state.lock().await;
        state
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("session {session_id}")))
    }

    async fn sessions_for(&self, identity: &str) -> PortResult<Vec<Session>> {
        let identity = normalize_identity(identity);
        let state = self.state.lock().await;
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| s.identity == identity)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(sessions)
    }

    async fn unlocks_for(&self, identity: &str) -> PortResult<Vec<AchievementUnlock>> {
        let identity = normalize_identity(identity);
        let state = self.state.lock().await;
        Ok(state
            .unlocks
            .iter()
            .filter(|u| u.identity == identity)
            .cloned()
            .collect())
    }

    async fn mark_unlock_seen(&self, identity: &str, achievement: AchievementId) -> PortResult<()> {
        let identity = normalize_identity(identity);
        let mut state = self.state.lock().await;
        let unlock = state
            .unlocks
            .iter_mut()
            .find(|u| u.identity == identity && u.achievement == achievement)
            .ok_or_else(|| PortError::NotFound(format!("achievement {}", achievement.as_str())))?;
        unlock.seen = true;
        Ok(())
    }

    async fn save(&self, batch: LedgerWrite) -> PortResult<()> {
        // The whole batch is applied under one lock, so readers never see
        // half of it.
        let mut state = self.state.lock().await;

        state.profiles.retain(|p| !batch.deleted_profiles.contains(&p.id));
        for profile in batch.profiles {
            match state.profiles.iter_mut().find(|p| p.id == profile.id) {
                Some(existing) => *existing = profile,
                None => state.profiles.push(profile),
            }
        }

        for id in &batch.deleted_sessions {
            state.sessions.remove(id);
        }
        for session in batch.sessions {
            state.sessions.insert(session.id, session);
        }
        if !batch.removed_decisions.is_empty() {
            for session in state.sessions.values_mut() {
                session.decisions.retain(|d| !batch.removed_decisions.contains(&d.id));
            }
        }

        for day in batch.days {
            state.days.insert((day.identity.clone(), day.day), day);
        }

        for unlock in batch.unlocks {
            let known = state
                .unlocks
                .iter()
                .any(|u| u.identity == unlock.identity && u.achievement == unlock.achievement);
            if !known {
                state.unlocks.push(unlock);
            }
        }
        Ok(())
    }
}
