//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `LedgerStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use inbox_triage_core::achievements::AchievementId;
use inbox_triage_core::domain::{
    normalize_identity, AchievementUnlock, DailyActivity, Decision, DecisionAction, PlayerProfile, Session,
};
use inbox_triage_core::ports::{LedgerStore, LedgerWrite, PortError, PortResult};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `LedgerStore` port.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Creates a new `PgLedgerStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn db_err(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn count(value: i32) -> u32 {
    value.max(0) as u32
}

fn total(value: i64) -> u64 {
    value.max(0) as u64
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ProfileRecord {
    id: Uuid,
    identity: String,
    total_xp: i64,
    current_level: i32,
    total_points: i64,
    lifetime_unsubscribes: i32,
    lifetime_keeps: i32,
    total_sessions_completed: i32,
    current_streak: i32,
    longest_streak: i32,
    last_activity_date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
}
impl ProfileRecord {
    fn to_domain(self) -> PlayerProfile {
        PlayerProfile {
            id: self.id,
            identity: self.identity,
            total_xp: total(self.total_xp),
            current_level: count(self.current_level),
            total_points: total(self.total_points),
            lifetime_unsubscribes: count(self.lifetime_unsubscribes),
            lifetime_keeps: count(self.lifetime_keeps),
            total_sessions_completed: count(self.total_sessions_completed),
            current_streak: count(self.current_streak),
            longest_streak: count(self.longest_streak),
            last_activity_date: self.last_activity_date,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct SessionRecord {
    id: Uuid,
    identity: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    target_count: i32,
    unsubscribe_count: i32,
    keep_count: i32,
    points_earned: i64,
    xp_earned: i64,
    is_completed: bool,
}
impl SessionRecord {
    fn to_domain(self, decisions: Vec<Decision>) -> Session {
        Session {
            id: self.id,
            identity: self.identity,
            started_at: self.started_at,
            ended_at: self.ended_at,
            target_count: count(self.target_count),
            unsubscribe_count: count(self.unsubscribe_count),
            keep_count: count(self.keep_count),
            points_earned: total(self.points_earned),
            xp_earned: total(self.xp_earned),
            is_completed: self.is_completed,
            decisions,
        }
    }
}

#[derive(FromRow)]
struct DecisionRecord {
    id: Uuid,
    session_id: Uuid,
    item_id: String,
    sender: String,
    subject: String,
    action: Json<DecisionAction>,
    created_at: DateTime<Utc>,
    points: i32,
    xp: i32,
}
impl DecisionRecord {
    fn to_domain(self) -> Decision {
        Decision {
            id: self.id,
            session_id: self.session_id,
            item_id: self.item_id,
            sender: self.sender,
            subject: self.subject,
            action: self.action.0,
            created_at: self.created_at,
            points: count(self.points),
            xp: count(self.xp),
        }
    }
}

#[derive(FromRow)]
struct DailyActivityRecord {
    identity: String,
    day: NaiveDate,
    processed: i32,
    unsubscribed: i32,
    kept: i32,
    points_earned: i64,
    xp_earned: i64,
    sessions_started: i32,
    counts_toward_streak: bool,
}
impl DailyActivityRecord {
    fn to_domain(self) -> DailyActivity {
        DailyActivity {
            identity: self.identity,
            day: self.day,
            processed: count(self.processed),
            unsubscribed: count(self.unsubscribed),
            kept: count(self.kept),
            points_earned: total(self.points_earned),
            xp_earned: total(self.xp_earned),
            sessions_started: count(self.sessions_started),
            counts_toward_streak: self.counts_toward_streak,
        }
    }
}

#[derive(FromRow)]
struct UnlockRecord {
    identity: String,
    achievement: String,
    unlocked_at: DateTime<Utc>,
    seen: bool,
}
impl UnlockRecord {
    /// `None` for keys that are no longer in the catalog.
    fn to_domain(self) -> Option<AchievementUnlock> {
        Some(AchievementUnlock {
            identity: self.identity,
            achievement: AchievementId::parse(&self.achievement)?,
            unlocked_at: self.unlocked_at,
            seen: self.seen,
        })
    }
}

const PROFILE_COLUMNS: &str = "id, identity, total_xp, current_level, total_points, lifetime_unsubscribes, \
     lifetime_keeps, total_sessions_completed, current_streak, longest_streak, last_activity_date, created_at";

const SESSION_COLUMNS: &str = "id, identity, started_at, ended_at, target_count, unsubscribe_count, keep_count, \
     points_earned, xp_earned, is_completed";

const DECISION_COLUMNS: &str = "id, session_id, item_id, sender, subject, action, created_at, points, xp";

const DAY_COLUMNS: &str = "identity, day, processed, unsubscribed, kept, points_earned, xp_earned, \
     sessions_started, counts_toward_streak";

//=========================================================================================
// Transactional writes
//=========================================================================================

impl PgLedgerStore {
    async fn decisions_for(&self, session_ids: &[Uuid]) -> PortResult<HashMap<Uuid, Vec<Decision>>> {
        let records = sqlx::query_as::<_, DecisionRecord>(&format!(
            "SELECT {DECISION_COLUMNS} FROM decisions WHERE session_id = ANY($1) ORDER BY created_at ASC, id ASC"
        ))
        .bind(session_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut grouped: HashMap<Uuid, Vec<Decision>> = HashMap::new();
        for record in records {
            grouped.entry(record.session_id).or_default().push(record.to_domain());
        }
        Ok(grouped)
    }

    async fn upsert_profile(tx: &mut Transaction<'_, Postgres>, p: &PlayerProfile) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO profiles (id, identity, total_xp, current_level, total_points, lifetime_unsubscribes, \
             lifetime_keeps, total_sessions_completed, current_streak, longest_streak, last_activity_date, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (id) DO UPDATE SET identity = EXCLUDED.identity, total_xp = EXCLUDED.total_xp, \
             current_level = EXCLUDED.current_level, total_points = EXCLUDED.total_points, \
             lifetime_unsubscribes = EXCLUDED.lifetime_unsubscribes, lifetime_keeps = EXCLUDED.lifetime_keeps, \
             total_sessions_completed = EXCLUDED.total_sessions_completed, \
             current_streak = EXCLUDED.current_streak, longest_streak = EXCLUDED.longest_streak, \
             last_activity_date = EXCLUDED.last_activity_date",
        )
        .bind(p.id)
        .bind(&p.identity)
        .bind(p.total_xp as i64)
        .bind(p.current_level as i32)
        .bind(p.total_points as i64)
        .bind(p.lifetime_unsubscribes as i32)
        .bind(p.lifetime_keeps as i32)
        .bind(p.total_sessions_completed as i32)
        .bind(p.current_streak as i32)
        .bind(p.longest_streak as i32)
        .bind(p.last_activity_date)
        .bind(p.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn upsert_session(tx: &mut Transaction<'_, Postgres>, s: &Session) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO sessions (id, identity, started_at, ended_at, target_count, unsubscribe_count, \
             keep_count, points_earned, xp_earned, is_completed) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (id) DO UPDATE SET ended_at = EXCLUDED.ended_at, \
             unsubscribe_count = EXCLUDED.unsubscribe_count, keep_count = EXCLUDED.keep_count, \
             points_earned = EXCLUDED.points_earned, xp_earned = EXCLUDED.xp_earned, \
             is_completed = EXCLUDED.is_completed",
        )
        .bind(s.id)
        .bind(&s.identity)
        .bind(s.started_at)
        .bind(s.ended_at)
        .bind(s.target_count as i32)
        .bind(s.unsubscribe_count as i32)
        .bind(s.keep_count as i32)
        .bind(s.points_earned as i64)
        .bind(s.xp_earned as i64)
        .bind(s.is_completed)
        .execute(&mut **tx)
        .await?;

        // Decisions are immutable once written.
        for d in &s.decisions {
            sqlx::query(
                "INSERT INTO decisions (id, session_id, item_id, sender, subject, action, created_at, points, xp) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) ON CONFLICT (id) DO NOTHING",
            )
            .bind(d.id)
            .bind(d.session_id)
            .bind(&d.item_id)
            .bind(&d.sender)
            .bind(&d.subject)
            .bind(Json(&d.action))
            .bind(d.created_at)
            .bind(d.points as i32)
            .bind(d.xp as i32)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn upsert_day(tx: &mut Transaction<'_, Postgres>, d: &DailyActivity) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO daily_activity (identity, day, processed, unsubscribed, kept, points_earned, xp_earned, \
             sessions_started, counts_toward_streak) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (identity, day) DO UPDATE SET processed = EXCLUDED.processed, \
             unsubscribed = EXCLUDED.unsubscribed, kept = EXCLUDED.kept, points_earned = EXCLUDED.points_earned, \
             xp_earned = EXCLUDED.xp_earned, sessions_started = EXCLUDED.sessions_started, \
             counts_toward_streak = daily_activity.counts_toward_streak OR EXCLUDED.counts_toward_streak",
        )
        .bind(&d.identity)
        .bind(d.day)
        .bind(d.processed as i32)
        .bind(d.unsubscribed as i32)
        .bind(d.kept as i32)
        .bind(d.points_earned as i64)
        .bind(d.xp_earned as i64)
        .bind(d.sessions_started as i32)
        .bind(d.counts_toward_streak)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn apply(&self, batch: LedgerWrite) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if !batch.deleted_profiles.is_empty() {
            sqlx::query("DELETE FROM profiles WHERE id = ANY($1)")
                .bind(&batch.deleted_profiles)
                .execute(&mut *tx)
                .await?;
        }
        for profile in &batch.profiles {
            Self::upsert_profile(&mut tx, profile).await?;
        }
        if !batch.deleted_sessions.is_empty() {
            sqlx::query("DELETE FROM sessions WHERE id = ANY($1)")
                .bind(&batch.deleted_sessions)
                .execute(&mut *tx)
                .await?;
        }
        if !batch.removed_decisions.is_empty() {
            sqlx::query("DELETE FROM decisions WHERE id = ANY($1)")
                .bind(&batch.removed_decisions)
                .execute(&mut *tx)
                .await?;
        }
        for session in &batch.sessions {
            Self::upsert_session(&mut tx, session).await?;
        }
        for day in &batch.days {
            Self::upsert_day(&mut tx, day).await?;
        }
        for unlock in &batch.unlocks {
            sqlx::query(
                "INSERT INTO achievement_unlocks (identity, achievement, unlocked_at, seen) \
                 VALUES ($1, $2, $3, $4) ON CONFLICT (identity, achievement) DO NOTHING",
            )
            .bind(&unlock.identity)
            .bind(unlock.achievement.as_str())
            .bind(unlock.unlocked_at)
            .bind(unlock.seen)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }
}

//=========================================================================================
// `LedgerStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn profiles_matching(&self, identity: &str) -> PortResult<Vec<PlayerProfile>> {
        let records = sqlx::query_as::<_, ProfileRecord>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE LOWER(identity) = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(normalize_identity(identity))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn daily_activity(&self, identity: &str, day: NaiveDate) -> PortResult<Option<DailyActivity>> {
        let record = sqlx::query_as::<_, DailyActivityRecord>(&format!(
            "SELECT {DAY_COLUMNS} FROM daily_activity WHERE identity = $1 AND day = $2"
        ))
        .bind(normalize_identity(identity))
        .bind(day)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn daily_activities(
        &self,
        identity: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> PortResult<Vec<DailyActivity>> {
        let records = sqlx::query_as::<_, DailyActivityRecord>(&format!(
            "SELECT {DAY_COLUMNS} FROM daily_activity WHERE identity = $1 AND day BETWEEN $2 AND $3 ORDER BY day ASC"
        ))
        .bind(normalize_identity(identity))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn session(&self, session_id: Uuid) -> PortResult<Session> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
        ))
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Session {} not found", session_id)),
            _ => db_err(e),
        })?;

        let mut decisions = self.decisions_for(&[session_id]).await?;
        Ok(record.to_domain(decisions.remove(&session_id).unwrap_or_default()))
    }

    async fn sessions_for(&self, identity: &str) -> PortResult<Vec<Session>> {
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE identity = $1 ORDER BY started_at DESC"
        ))
        .bind(normalize_identity(identity))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        let mut decisions = self.decisions_for(&ids).await?;
        Ok(records
            .into_iter()
            .map(|r| {
                let owned = decisions.remove(&r.id).unwrap_or_default();
                r.to_domain(owned)
            })
            .collect())
    }

    async fn unlocks_for(&self, identity: &str) -> PortResult<Vec<AchievementUnlock>> {
        let records = sqlx::query_as::<_, UnlockRecord>(
            "SELECT identity, achievement, unlocked_at, seen FROM achievement_unlocks \
             WHERE identity = $1 ORDER BY unlocked_at ASC",
        )
        .bind(normalize_identity(identity))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(records.into_iter().filter_map(|r| r.to_domain()).collect())
    }

    async fn mark_unlock_seen(&self, identity: &str, achievement: AchievementId) -> PortResult<()> {
        let result = sqlx::query("UPDATE achievement_unlocks SET seen = TRUE WHERE identity = $1 AND achievement = $2")
            .bind(normalize_identity(identity))
            .bind(achievement.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Achievement {} not unlocked", achievement.as_str())));
        }
        Ok(())
    }

    async fn save(&self, batch: LedgerWrite) -> PortResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let summary = (batch.profiles.len(), batch.sessions.len(), batch.days.len(), batch.unlocks.len());
        self.apply(batch).await.map_err(db_err)?;
        debug!(
            profiles = summary.0,
            sessions = summary.1,
            days = summary.2,
            unlocks = summary.3,
            "Ledger batch committed."
        );
        Ok(())
    }
}
