//! crates/inbox_triage_core/src/undo.rs
//!
//! Single-slot deferred commit between a saved decision and its remote sync.
//!
//! The slot is owned by the connection actor. The countdown ticker is a
//! detached task that only posts `CountdownTick`s back into the actor's
//! channel; the actor feeds them to `on_countdown`, so every slot transition
//! happens on the actor.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::Decision;
use crate::error::LedgerResult;
use crate::session::{HeldDecision, SessionController};
use crate::sync::{SyncDispatcher, SyncStatus};

/// Remaining fractions at or below this count as zero.
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoSettings {
    /// Length of the grace window.
    pub window: Duration,
    /// Countdown granularity.
    pub tick: Duration,
}

impl Default for UndoSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(5000),
            tick: Duration::from_millis(100),
        }
    }
}

impl UndoSettings {
    /// Fraction of the window one tick removes.
    pub fn step(&self) -> f64 {
        if self.window.is_zero() {
            return 1.0;
        }
        (self.tick.as_secs_f64() / self.window.as_secs_f64()).min(1.0)
    }
}

/// Posted by the ticker task for the decision it was started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownTick {
    pub decision_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// No slot, or the tick belonged to a decision no longer held.
    Idle,
    Counting { time_remaining: f64 },
    /// The window ran out and the decision was handed to sync.
    Committed(Uuid),
}

struct PendingSlot {
    held: HeldDecision,
    time_remaining: f64,
    countdown: CancellationToken,
}

pub struct UndoController {
    slot: Option<PendingSlot>,
    settings: UndoSettings,
    dispatcher: SyncDispatcher,
    ticks: mpsc::UnboundedSender<CountdownTick>,
}

impl UndoController {
    pub fn new(
        dispatcher: SyncDispatcher,
        settings: UndoSettings,
        ticks: mpsc::UnboundedSender<CountdownTick>,
    ) -> Self {
        Self {
            slot: None,
            settings,
            dispatcher,
            ticks,
        }
    }

    pub fn pending(&self) -> Option<&Decision> {
        self.slot.as_ref().map(|slot| &slot.held.decision)
    }

    /// Remaining grace fraction in `[0, 1]`; 0 when the slot is empty.
    pub fn time_remaining(&self) -> f64 {
        self.slot.as_ref().map_or(0.0, |slot| slot.time_remaining)
    }

    pub fn sync_status(&self) -> watch::Receiver<SyncStatus> {
        self.dispatcher.status()
    }

    /// Occupies the slot with `held` and starts its countdown. A decision
    /// already in the slot is committed first. Returns the id of that
    /// force-committed decision, if any.
    pub fn hold(&mut self, held: HeldDecision) -> Option<Uuid> {
        let forced = self.commit();
        let countdown = CancellationToken::new();
        self.spawn_ticker(held.decision.id, countdown.clone());
        debug!(decision = %held.decision.id, "Decision held for undo.");
        self.slot = Some(PendingSlot {
            held,
            time_remaining: 1.0,
            countdown,
        });
        forced
    }

    /// Advances the countdown of the held decision by one step.
    pub fn tick(&mut self) -> TickOutcome {
        let step = self.settings.step();
        let Some(slot) = self.slot.as_mut() else {
            return TickOutcome::Idle;
        };
        slot.time_remaining = (slot.time_remaining - step).max(0.0);
        if slot.time_remaining <= EPSILON {
            return match self.commit() {
                Some(id) => TickOutcome::Committed(id),
                None => TickOutcome::Idle,
            };
        }
        TickOutcome::Counting {
            time_remaining: slot.time_remaining,
        }
    }

    /// Handles a tick posted by a ticker task. Ticks from a ticker whose
    /// decision has already left the slot are ignored.
    pub fn on_countdown(&mut self, tick: CountdownTick) -> TickOutcome {
        match self.pending() {
            Some(decision) if decision.id == tick.decision_id => self.tick(),
            _ => TickOutcome::Idle,
        }
    }

    /// Hands the held decision to sync and empties the slot. No-op when
    /// empty.
    pub fn commit(&mut self) -> Option<Uuid> {
        let slot = self.slot.take()?;
        slot.countdown.cancel();
        let decision = slot.held.decision;
        let id = decision.id;
        info!(decision = %id, item = %decision.item_id, "Committing decision.");
        self.dispatcher.dispatch(decision);
        Some(id)
    }

    /// Same as `commit`; called when the user leaves or resets.
    pub fn flush(&mut self) -> Option<Uuid> {
        self.commit()
    }

    /// Revokes the held decision without syncing it. Returns the revoked
    /// decision, or `None` if the slot was empty.
    ///
    /// If the revocation cannot be saved the decision goes back into the
    /// slot with a fresh countdown and the error is returned.
    pub async fn undo(&mut self, session: &mut SessionController) -> LedgerResult<Option<Decision>> {
        let Some(slot) = self.slot.take() else {
            return Ok(None);
        };
        slot.countdown.cancel();

        match session.revoke(&slot.held).await {
            Ok(()) => Ok(Some(slot.held.decision)),
            Err(e) => {
                warn!(decision = %slot.held.decision.id, error = %e, "Undo failed; decision stays pending.");
                let countdown = CancellationToken::new();
                self.spawn_ticker(slot.held.decision.id, countdown.clone());
                self.slot = Some(PendingSlot {
                    countdown,
                    ..slot
                });
                Err(e)
            }
        }
    }

    /// Flushes the slot and waits for every handed-off decision to be
    /// attempted.
    pub async fn close(mut self) {
        self.flush();
        let Self { dispatcher, .. } = self;
        dispatcher.drain().await;
    }

    fn spawn_ticker(&self, decision_id: Uuid, countdown: CancellationToken) {
        let ticks = self.ticks.clone();
        let period = self.settings.tick.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = countdown.cancelled() => break,
                    _ = interval.tick() => {
                        if ticks.send(CountdownTick { decision_id }).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }
}
