pub mod achievements;
pub mod domain;
pub mod error;
pub mod memory;
pub mod ports;
pub mod reconcile;
pub mod rewards;
pub mod session;
pub mod sync;
pub mod undo;

pub use achievements::{AchievementDefinition, AchievementId, CATALOG};
pub use domain::{
    AchievementUnlock, DailyActivity, Decision, DecisionAction, Item, PlayerProfile, Session, UnsubscribeMethod,
};
pub use error::{FetchFailure, LedgerError, LedgerResult};
pub use memory::InMemoryLedgerStore;
pub use ports::{
    Clock, IdentityProvider, ItemSource, LedgerStore, LedgerWrite, PortError, PortResult, SystemClock,
};
pub use reconcile::{MergeOutcome, ProfileReconciler};
pub use rewards::{RewardEngine, UnlockEvent, UnlockFeed};
pub use session::{Collaborators, HeldDecision, SessionController, SessionPhase, SessionSettings};
pub use sync::{SyncDispatcher, SyncOutcome, SyncStatus};
pub use undo::{CountdownTick, TickOutcome, UndoController, UndoSettings};
