//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST dashboard endpoints and the master
//! definition for the OpenAPI specification.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    Extension,
};
use chrono::{Duration, Utc};
use futures::Stream;
use inbox_triage_core::achievements::{AchievementId, CATALOG};
use inbox_triage_core::domain::day_key;
use inbox_triage_core::session::remove_session;
use inbox_triage_core::PortError;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::middleware::Identity;
use crate::web::protocol::{DailyActivityView, ProfileView, SessionView};
use crate::web::state::AppState;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        get_profile_handler,
        list_achievements_handler,
        mark_achievement_seen_handler,
        list_sessions_handler,
        delete_session_handler,
        list_activity_handler,
        unlock_events_handler,
    ),
    components(
        schemas(ProfileView, AchievementView, SessionView, DailyActivityView)
    ),
    tags(
        (name = "Inbox Triage API", description = "Progress, achievements and history for the inbox triage game.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// One catalog entry together with the caller's progress on it.
#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct AchievementView {
    id: String,
    title: String,
    description: String,
    icon: String,
    bonus_points: u32,
    /// `None` for session-based achievements.
    threshold: Option<u64>,
    /// Current reading of the metric, capped at the threshold.
    progress: Option<u64>,
    unlocked: bool,
    unlocked_at: Option<chrono::DateTime<Utc>>,
    seen: bool,
}

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ActivityQuery {
    /// Number of days ending today (clamped to 1..=366, default 7).
    days: Option<u32>,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Returns the caller's profile, creating it on first access.
#[utoipa::path(
    get,
    path = "/profile",
    responses(
        (status = 200, description = "Current profile", body = ProfileView),
        (status = 401, description = "Missing or malformed identity header")
    ),
    params(("x-user-identity" = String, Header, description = "Mailbox identity of the caller."))
)]
pub async fn get_profile_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ProfileView>, ApiError> {
    let (profile, _) = app_state.reconciler().load(&identity.0).await?;
    Ok(Json(ProfileView::from(&profile)))
}

/// Lists the full achievement catalog with unlock state and progress.
#[utoipa::path(
    get,
    path = "/achievements",
    responses(
        (status = 200, description = "Achievement catalog", body = [AchievementView]),
        (status = 401, description = "Missing or malformed identity header")
    ),
    params(("x-user-identity" = String, Header, description = "Mailbox identity of the caller."))
)]
pub async fn list_achievements_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<AchievementView>>, ApiError> {
    let (profile, unlocks) = app_state.reconciler().load(&identity.0).await?;

    let views = CATALOG
        .iter()
        .map(|def| {
            let unlock = unlocks.iter().find(|u| u.achievement == def.id);
            let threshold = def.threshold();
            AchievementView {
                id: def.id.as_str().to_string(),
                title: def.title.to_string(),
                description: def.description.to_string(),
                icon: def.icon.to_string(),
                bonus_points: def.bonus_points,
                threshold,
                progress: def
                    .metric()
                    .zip(threshold)
                    .map(|(metric, threshold)| metric.read(&profile).min(threshold)),
                unlocked: unlock.is_some(),
                unlocked_at: unlock.map(|u| u.unlocked_at),
                seen: unlock.is_some_and(|u| u.seen),
            }
        })
        .collect();
    Ok(Json(views))
}

/// Marks an unlocked achievement as seen by the user.
#[utoipa::path(
    post,
    path = "/achievements/{id}/seen",
    responses(
        (status = 204, description = "Marked as seen"),
        (status = 404, description = "Unknown or not yet unlocked achievement")
    ),
    params(
        ("id" = String, Path, description = "Achievement key, e.g. `unsubscribes_10`."),
        ("x-user-identity" = String, Header, description = "Mailbox identity of the caller.")
    )
)]
pub async fn mark_achievement_seen_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let achievement =
        AchievementId::parse(&id).ok_or_else(|| PortError::NotFound(format!("Achievement {id}")))?;
    app_state.store.mark_unlock_seen(&identity.0, achievement).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Lists the caller's sessions, most recent first.
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "Session history", body = [SessionView]),
        (status = 401, description = "Missing or malformed identity header")
    ),
    params(("x-user-identity" = String, Header, description = "Mailbox identity of the caller."))
)]
pub async fn list_sessions_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<SessionView>>, ApiError> {
    let sessions = app_state.store.sessions_for(&identity.0).await?;
    Ok(Json(sessions.iter().map(SessionView::from).collect()))
}

/// Deletes a session and reverses its contribution to the profile.
#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "Session deleted; updated profile", body = ProfileView),
        (status = 404, description = "No such session for this user")
    ),
    params(
        ("id" = Uuid, Path, description = "Session id."),
        ("x-user-identity" = String, Header, description = "Mailbox identity of the caller.")
    )
)]
pub async fn delete_session_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ProfileView>, ApiError> {
    let profile = remove_session(
        &app_state.collaborators(&identity),
        &app_state.engine,
        &identity.0,
        session_id,
        app_state.config.utc_offset,
    )
    .await?;
    info!(identity = %identity.0, session = %session_id, "Session deleted via REST.");
    Ok(Json(ProfileView::from(&profile)))
}

/// Daily rollups for the last `days` days, oldest first.
#[utoipa::path(
    get,
    path = "/activity",
    responses(
        (status = 200, description = "Daily activity", body = [DailyActivityView]),
        (status = 401, description = "Missing or malformed identity header")
    ),
    params(
        ActivityQuery,
        ("x-user-identity" = String, Header, description = "Mailbox identity of the caller.")
    )
)]
pub async fn list_activity_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<DailyActivityView>>, ApiError> {
    let days = query.days.unwrap_or(7).clamp(1, 366);
    let today = day_key(app_state.clock.now(), app_state.config.utc_offset);
    let from = today - Duration::days(i64::from(days) - 1);
    let activity = app_state.store.daily_activities(&identity.0, from, today).await?;
    Ok(Json(activity.iter().map(DailyActivityView::from).collect()))
}

/// Server-sent stream of the caller's achievement unlocks.
#[utoipa::path(
    get,
    path = "/events/unlocks",
    responses(
        (status = 200, description = "`achievement_unlocked` events", body = String, content_type = "text/event-stream")
    ),
    params(("x-user-identity" = String, Header, description = "Mailbox identity of the caller."))
)]
pub async fn unlock_events_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut feed = app_state.engine.feed().subscribe();
    let stream = async_stream::stream! {
        loop {
            match feed.recv().await {
                Ok(event) if event.identity == identity.0 => {
                    match Event::default().event("achievement_unlocked").json_data(&event) {
                        Ok(sse) => yield Ok(sse),
                        Err(e) => warn!(error = %e, "Failed to encode unlock event."),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Unlock stream lagged behind the feed.");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}
