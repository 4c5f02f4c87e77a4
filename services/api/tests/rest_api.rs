use std::sync::Arc;

use api_lib::adapters::RequestIdentity;
use api_lib::config::Config;
use api_lib::web::{self, middleware::identity_pattern, middleware::IDENTITY_HEADER, AppState};
use async_trait::async_trait;
use inbox_triage_core::ports::{ItemSource, LedgerStore, PortResult, SystemClock};
use inbox_triage_core::{
    Collaborators, DecisionAction, InMemoryLedgerStore, Item, RewardEngine, SessionController, UnlockFeed,
};
use reqwest::StatusCode;
use serde_json::Value;

const USER: &str = "player@example.com";

struct StaticSource;

#[async_trait]
impl ItemSource for StaticSource {
    async fn fetch_batch(&self, limit: usize) -> PortResult<Vec<Item>> {
        Ok((0..limit.min(2))
            .map(|n| Item {
                id: format!("msg-{n}"),
                sender: format!("promo{n}@store.example"),
                subject: "Sale".to_string(),
                received_at: None,
                unsubscribe: None,
            })
            .collect())
    }

    async fn send_decision(&self, _item_id: &str, _action: &DecisionAction) -> PortResult<()> {
        Ok(())
    }
}

struct TestServer {
    base: String,
    state: Arc<AppState>,
    client: reqwest::Client,
}

impl TestServer {
    async fn spawn() -> Self {
        let config = Config::from_lookup(|key| {
            (key == "MAIL_BRIDGE_URL").then(|| "http://bridge.invalid".to_string())
        })
        .unwrap();
        let state = Arc::new(AppState {
            store: Arc::new(InMemoryLedgerStore::new()),
            source: Arc::new(StaticSource),
            clock: Arc::new(SystemClock),
            engine: RewardEngine::new(UnlockFeed::default()),
            config: Arc::new(config),
            identity_pattern: identity_pattern().unwrap(),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = web::router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            state,
            client: reqwest::Client::new(),
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base, path))
            .header(IDENTITY_HEADER, USER)
    }

    async fn json(&self, path: &str) -> Value {
        let response = self.get(path).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "GET {path}");
        response.json().await.unwrap()
    }

    /// Plays one full session of two unsubscribes through a controller.
    async fn play_session(&self) -> uuid::Uuid {
        let collaborators = Collaborators {
            store: self.state.store.clone(),
            source: self.state.source.clone(),
            identity: Arc::new(RequestIdentity::new(USER)),
            clock: self.state.clock.clone(),
        };
        let mut controller = SessionController::new(
            collaborators,
            self.state.engine.clone(),
            self.state.config.session_settings(),
        );
        let session_id = controller.start().await.unwrap().id;
        for id in ["msg-0", "msg-1"] {
            controller
                .record_decision(id, DecisionAction::Unsubscribe { method: None })
                .await
                .unwrap();
        }
        session_id
    }
}

#[tokio::test]
async fn test_requests_without_identity_are_rejected() {
    let server = TestServer::spawn().await;

    let missing = server
        .client
        .get(format!("{}/profile", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let malformed = server
        .client
        .get(format!("{}/profile", server.base))
        .header(IDENTITY_HEADER, "nobody")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_fresh_profile_is_created_on_first_read() {
    let server = TestServer::spawn().await;

    let profile = server.json("/profile").await;
    assert_eq!(profile["identity"], USER);
    assert_eq!(profile["total_xp"], 0);
    assert_eq!(profile["current_level"], 1);
    assert_eq!(profile["xp_to_next_level"], 100);

    let achievements = server.json("/achievements").await;
    let list = achievements.as_array().unwrap();
    assert_eq!(list.len(), 15);
    assert!(list.iter().all(|a| a["unlocked"] == false));
}

#[tokio::test]
async fn test_dashboard_reflects_a_played_session() {
    let server = TestServer::spawn().await;
    let session_id = server.play_session().await;

    let profile = server.json("/profile").await;
    assert_eq!(profile["lifetime_unsubscribes"], 2);
    assert_eq!(profile["total_sessions_completed"], 1);

    let sessions = server.json("/sessions").await;
    assert_eq!(sessions.as_array().unwrap().len(), 1);
    assert_eq!(sessions[0]["id"], session_id.to_string());
    assert_eq!(sessions[0]["is_completed"], true);

    let activity = server.json("/activity?days=3").await;
    let days = activity.as_array().unwrap();
    assert_eq!(days.len(), 1);
    assert_eq!(days[0]["processed"], 2);
    assert_eq!(days[0]["unsubscribed"], 2);

    let achievements = server.json("/achievements").await;
    let first = achievements
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["id"] == "first_decision")
        .unwrap();
    assert_eq!(first["unlocked"], true);
    assert_eq!(first["seen"], false);
}

#[tokio::test]
async fn test_marking_achievements_seen() {
    let server = TestServer::spawn().await;
    server.play_session().await;

    let post = |id: &str| {
        server
            .client
            .post(format!("{}/achievements/{id}/seen", server.base))
            .header(IDENTITY_HEADER, USER)
            .send()
    };

    assert_eq!(post("first_decision").await.unwrap().status(), StatusCode::NO_CONTENT);
    assert_eq!(post("no_such_thing").await.unwrap().status(), StatusCode::NOT_FOUND);
    // Known but not yet unlocked.
    assert_eq!(post("streak_30").await.unwrap().status(), StatusCode::NOT_FOUND);

    let unlocks = server.state.store.unlocks_for(USER).await.unwrap();
    let seen: Vec<_> = unlocks.iter().filter(|u| u.seen).map(|u| u.achievement.as_str()).collect();
    assert_eq!(seen, vec!["first_decision"]);
}

#[tokio::test]
async fn test_deleting_a_session_reverses_its_progress() {
    let server = TestServer::spawn().await;
    let session_id = server.play_session().await;

    let response = server
        .client
        .delete(format!("{}/sessions/{session_id}", server.base))
        .header(IDENTITY_HEADER, USER)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let profile: Value = response.json().await.unwrap();
    assert_eq!(profile["lifetime_unsubscribes"], 0);
    assert_eq!(profile["total_sessions_completed"], 0);

    let sessions = server.json("/sessions").await;
    assert!(sessions.as_array().unwrap().is_empty());

    let again = server
        .client
        .delete(format!("{}/sessions/{session_id}", server.base))
        .header(IDENTITY_HEADER, USER)
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sessions_are_private_to_their_owner() {
    let server = TestServer::spawn().await;
    let session_id = server.play_session().await;

    let response = server
        .client
        .delete(format!("{}/sessions/{session_id}", server.base))
        .header(IDENTITY_HEADER, "intruder@example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let others: Value = server
        .client
        .get(format!("{}/sessions", server.base))
        .header(IDENTITY_HEADER, "intruder@example.com")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(others.as_array().unwrap().is_empty());
}
