//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! Each connection is one serialized actor: it owns a `SessionController` and an
//! `UndoController`, and multiplexes client frames with countdown ticks posted
//! by the undo ticker.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use inbox_triage_core::{
    LedgerError, SessionController, SyncDispatcher, TickOutcome, UndoController,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::web::{
    middleware::Identity,
    protocol::{ClientMessage, ProfileView, ServerMessage, SessionView},
    state::AppState,
};

type WsSender = SplitSink<WebSocket, Message>;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, identity))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, identity: Identity) {
    info!(identity = %identity.0, "New WebSocket connection established.");

    let (mut sender, mut receiver) = socket.split();
    let (tick_tx, mut ticks) = mpsc::unbounded_channel();

    let mut session = SessionController::new(
        app_state.collaborators(&identity),
        app_state.engine.clone(),
        app_state.config.session_settings(),
    );
    let mut undo = UndoController::new(
        SyncDispatcher::spawn(app_state.source.clone()),
        app_state.config.undo_settings(),
        tick_tx,
    );

    // --- Main Actor Loop ---
    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let replies = match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(msg) => handle_client_message(msg, &mut session, &mut undo).await,
                        Err(e) => {
                            warn!("Failed to deserialize client message: {}", e);
                            vec![ServerMessage::Error { message: format!("Unrecognized message: {e}") }]
                        }
                    };
                    if !send_all(&mut sender, &replies).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!("Client sent close message.");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket receive failed.");
                    break;
                }
                None => {
                    info!("Client disconnected.");
                    break;
                }
            },
            Some(tick) = ticks.recv() => {
                let reply = match undo.on_countdown(tick) {
                    TickOutcome::Counting { time_remaining } => Some(ServerMessage::Countdown {
                        decision_id: tick.decision_id,
                        time_remaining,
                    }),
                    TickOutcome::Committed(decision_id) => Some(ServerMessage::DecisionCommitted { decision_id }),
                    TickOutcome::Idle => None,
                };
                if let Some(reply) = reply {
                    if !send_all(&mut sender, &[reply]).await {
                        break;
                    }
                }
            }
        }
    }

    // --- Cleanup ---
    // Leaving never drops a decision: the pending one is synced now.
    undo.close().await;
    info!(identity = %identity.0, "WebSocket connection closed.");
}

/// Applies one client message to the actor's controllers and returns the
/// replies, in order.
async fn handle_client_message(
    msg: ClientMessage,
    session: &mut SessionController,
    undo: &mut UndoController,
) -> Vec<ServerMessage> {
    let mut replies = Vec::new();
    match msg {
        ClientMessage::Start => {
            committed(&mut replies, undo.flush());
            match session.start().await {
                Ok(started) => {
                    let session_id = started.id;
                    replies.push(ServerMessage::SessionStarted {
                        session_id,
                        total_items: session.items().len(),
                    });
                    push_profile(&mut replies, session);
                    push_current_item(&mut replies, session);
                }
                Err(LedgerError::Fetch(failure)) => replies.push(ServerMessage::FetchFailed {
                    reason: failure.to_string(),
                    retryable: true,
                }),
                Err(e) => replies.push(error_message(&e)),
            }
        }
        ClientMessage::Decide { item_id, action } => match session.record_decision(&item_id, action).await {
            Ok(recorded) => {
                let decision_id = recorded.held.decision.id;
                committed(&mut replies, undo.hold(recorded.held));
                replies.push(ServerMessage::DecisionPending {
                    decision_id,
                    time_remaining: undo.time_remaining(),
                });
                replies.extend(recorded.unlocks.iter().map(ServerMessage::from));
                push_progress(&mut replies, session, recorded.completed);
            }
            Err(e) => replies.push(error_message(&e)),
        },
        ClientMessage::Skip { item_id } => match session.skip(&item_id).await {
            Ok(advanced) => {
                replies.extend(advanced.unlocks.iter().map(ServerMessage::from));
                push_progress(&mut replies, session, advanced.completed);
            }
            Err(e) => replies.push(error_message(&e)),
        },
        ClientMessage::Undo => match undo.undo(session).await {
            Ok(Some(decision)) => {
                replies.push(ServerMessage::DecisionUndone {
                    decision_id: decision.id,
                    item_id: decision.item_id,
                });
                push_profile(&mut replies, session);
                push_current_item(&mut replies, session);
            }
            Ok(None) => {}
            Err(e) => replies.push(error_message(&e)),
        },
        ClientMessage::Reset => {
            committed(&mut replies, undo.flush());
            if let Err(e) = session.reset() {
                replies.push(error_message(&e));
            }
        }
        ClientMessage::Flush => committed(&mut replies, undo.flush()),
    }
    replies
}

fn committed(replies: &mut Vec<ServerMessage>, decision: Option<uuid::Uuid>) {
    if let Some(decision_id) = decision {
        replies.push(ServerMessage::DecisionCommitted { decision_id });
    }
}

fn push_profile(replies: &mut Vec<ServerMessage>, session: &SessionController) {
    if let Some(profile) = session.profile() {
        replies.push(ServerMessage::Profile {
            profile: ProfileView::from(profile),
        });
    }
}

fn push_current_item(replies: &mut Vec<ServerMessage>, session: &SessionController) {
    if let Some(item) = session.current_item() {
        replies.push(ServerMessage::ItemPresented {
            item: item.clone(),
            position: session.cursor(),
            total: session.items().len(),
        });
    }
}

/// Either the completion summary or the next item.
fn push_progress(replies: &mut Vec<ServerMessage>, session: &SessionController, completed: bool) {
    if completed {
        if let Some(finished) = session.session() {
            replies.push(ServerMessage::SessionCompleted {
                session: SessionView::from(finished),
            });
        }
        push_profile(replies, session);
    } else {
        push_current_item(replies, session);
    }
}

fn error_message(e: &LedgerError) -> ServerMessage {
    match e {
        LedgerError::Persistence(_) => error!(error = %e, "Ledger save failed."),
        _ => warn!(error = %e, "Client request rejected."),
    }
    ServerMessage::Error { message: e.to_string() }
}

/// Sends `messages` in order. Returns `false` once the socket is gone.
async fn send_all(sender: &mut WsSender, messages: &[ServerMessage]) -> bool {
    for msg in messages {
        let json = match serde_json::to_string(msg) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize server message: {}", e);
                continue;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            error!("Failed to send message to client.");
            return false;
        }
    }
    true
}
