//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use std::sync::Arc;

use inbox_triage_core::ports::{Clock, ItemSource, LedgerStore};
use inbox_triage_core::{Collaborators, ProfileReconciler, RewardEngine};
use regex::Regex;

use crate::adapters::RequestIdentity;
use crate::config::Config;
use crate::web::middleware::Identity;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub source: Arc<dyn ItemSource>,
    pub clock: Arc<dyn Clock>,
    /// Shared so every connection publishes on the same unlock feed.
    pub engine: RewardEngine,
    pub config: Arc<Config>,
    pub identity_pattern: Regex,
}

impl AppState {
    /// The ports a controller acting for `identity` works with.
    pub fn collaborators(&self, identity: &Identity) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            source: self.source.clone(),
            identity: Arc::new(RequestIdentity::new(identity.0.clone())),
            clock: self.clock.clone(),
        }
    }

    pub fn reconciler(&self) -> ProfileReconciler {
        ProfileReconciler::new(self.store.clone(), self.clock.clone(), self.engine.clone())
    }
}
