//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the triage client and the API
//! server, plus the read-only views shared with the REST endpoints.

use chrono::{DateTime, NaiveDate, Utc};
use inbox_triage_core::domain::{DailyActivity, DecisionAction, Item, PlayerProfile, Session};
use inbox_triage_core::rewards::{level_progress, xp_to_next_level, UnlockEvent};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

//=========================================================================================
// Messages Sent FROM the Client TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Fetches a batch and opens a new session.
    Start,

    /// Records a decision on the item currently presented.
    Decide { item_id: String, action: DecisionAction },

    /// Moves past the current item without deciding.
    Skip { item_id: String },

    /// Revokes the decision in the undo window, if any.
    Undo,

    /// Returns a finished or failed session to the idle state.
    Reset,

    /// Syncs the pending decision now instead of waiting for the countdown.
    Flush,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionStarted { session_id: Uuid, total_items: usize },

    /// The next item awaiting a decision. `position` is zero-based.
    ItemPresented { item: Item, position: usize, total: usize },

    /// A decision was saved and entered the undo window.
    DecisionPending { decision_id: Uuid, time_remaining: f64 },

    /// Remaining fraction of the undo window, in `[0, 1]`.
    Countdown { decision_id: Uuid, time_remaining: f64 },

    /// The decision left the undo window and was handed to sync.
    DecisionCommitted { decision_id: Uuid },

    DecisionUndone { decision_id: Uuid, item_id: String },

    SessionCompleted { session: SessionView },

    AchievementUnlocked {
        achievement: String,
        title: String,
        bonus_points: u32,
        unlocked_at: DateTime<Utc>,
    },

    /// The batch could not be loaded. The client may retry with `start`.
    FetchFailed { reason: String, retryable: bool },

    Profile { profile: ProfileView },

    /// Reports an error to the client, which should display an error message.
    Error { message: String },
}

impl From<&UnlockEvent> for ServerMessage {
    fn from(event: &UnlockEvent) -> Self {
        ServerMessage::AchievementUnlocked {
            achievement: event.achievement.as_str().to_string(),
            title: event.title.clone(),
            bonus_points: event.bonus_points,
            unlocked_at: event.unlocked_at,
        }
    }
}

//=========================================================================================
// Read-only Views
//=========================================================================================

/// Player progress as shown on dashboards.
#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct ProfileView {
    pub identity: String,
    pub total_xp: u64,
    pub current_level: u32,
    pub xp_to_next_level: u64,
    /// Fraction of the way to the next level.
    pub level_progress: f64,
    pub total_points: u64,
    pub lifetime_unsubscribes: u32,
    pub lifetime_keeps: u32,
    pub total_sessions_completed: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_activity_date: Option<NaiveDate>,
}

impl From<&PlayerProfile> for ProfileView {
    fn from(p: &PlayerProfile) -> Self {
        Self {
            identity: p.identity.clone(),
            total_xp: p.total_xp,
            current_level: p.current_level,
            xp_to_next_level: xp_to_next_level(p),
            level_progress: level_progress(p),
            total_points: p.total_points,
            lifetime_unsubscribes: p.lifetime_unsubscribes,
            lifetime_keeps: p.lifetime_keeps,
            total_sessions_completed: p.total_sessions_completed,
            current_streak: p.current_streak,
            longest_streak: p.longest_streak,
            last_activity_date: p.last_activity_date,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq, ToSchema)]
pub struct SessionView {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub target_count: u32,
    pub unsubscribe_count: u32,
    pub keep_count: u32,
    pub points_earned: u64,
    pub xp_earned: u64,
    pub is_completed: bool,
}

impl From<&Session> for SessionView {
    fn from(s: &Session) -> Self {
        Self {
            id: s.id,
            started_at: s.started_at,
            ended_at: s.ended_at,
            target_count: s.target_count,
            unsubscribe_count: s.unsubscribe_count,
            keep_count: s.keep_count,
            points_earned: s.points_earned,
            xp_earned: s.xp_earned,
            is_completed: s.is_completed,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq, ToSchema)]
pub struct DailyActivityView {
    pub day: NaiveDate,
    pub processed: u32,
    pub unsubscribed: u32,
    pub kept: u32,
    pub points_earned: u64,
    pub xp_earned: u64,
    pub sessions_started: u32,
    pub counts_toward_streak: bool,
}

impl From<&DailyActivity> for DailyActivityView {
    fn from(d: &DailyActivity) -> Self {
        Self {
            day: d.day,
            processed: d.processed,
            unsubscribed: d.unsubscribed,
            kept: d.kept,
            points_earned: d.points_earned,
            xp_earned: d.xp_earned,
            sessions_started: d.sessions_started,
            counts_toward_streak: d.counts_toward_streak,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inbox_triage_core::domain::UnsubscribeMethod;
    use serde_json::json;

    #[test]
    fn test_client_messages_parse() {
        let decide: ClientMessage = serde_json::from_value(json!({
            "type": "decide",
            "item_id": "msg-1",
            "action": { "kind": "unsubscribe", "method": { "kind": "one_click", "url": "https://x.test/u" } }
        }))
        .unwrap();
        assert_eq!(
            decide,
            ClientMessage::Decide {
                item_id: "msg-1".to_string(),
                action: DecisionAction::Unsubscribe {
                    method: Some(UnsubscribeMethod::OneClick {
                        url: "https://x.test/u".to_string()
                    }),
                },
            }
        );

        let keep: ClientMessage =
            serde_json::from_str(r#"{"type":"decide","item_id":"m","action":{"kind":"keep"}}"#).unwrap();
        assert!(matches!(keep, ClientMessage::Decide { action: DecisionAction::Keep, .. }));

        for (raw, expected) in [
            (r#"{"type":"start"}"#, ClientMessage::Start),
            (r#"{"type":"undo"}"#, ClientMessage::Undo),
            (r#"{"type":"reset"}"#, ClientMessage::Reset),
            (r#"{"type":"flush"}"#, ClientMessage::Flush),
        ] {
            assert_eq!(serde_json::from_str::<ClientMessage>(raw).unwrap(), expected);
        }
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"explode"}"#).is_err());
    }

    #[test]
    fn test_server_messages_are_tagged() {
        let id = Uuid::nil();
        let pending = serde_json::to_value(ServerMessage::DecisionPending {
            decision_id: id,
            time_remaining: 1.0,
        })
        .unwrap();
        assert_eq!(
            pending,
            json!({ "type": "decision_pending", "decision_id": id, "time_remaining": 1.0 })
        );

        let failed = serde_json::to_value(ServerMessage::FetchFailed {
            reason: "the item source returned no items".to_string(),
            retryable: true,
        })
        .unwrap();
        assert_eq!(failed["type"], "fetch_failed");
        assert_eq!(failed["retryable"], true);
    }

    #[test]
    fn test_profile_view_derives_progress() {
        let mut profile = PlayerProfile::new("a@b.c", Utc::now());
        profile.total_xp = 200;
        profile.refresh_level();
        let view = ProfileView::from(&profile);
        assert_eq!(view.current_level, 2);
        assert_eq!(view.xp_to_next_level, 100);
        assert!((view.level_progress - 0.5).abs() < f64::EPSILON);
    }
}
