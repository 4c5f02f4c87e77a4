//! services/api/src/adapters/identity.rs
//!
//! `IdentityProvider` for one authenticated request or connection. The
//! identity is validated and normalized by the middleware before it gets here.

use async_trait::async_trait;
use inbox_triage_core::ports::{IdentityProvider, PortError, PortResult};

#[derive(Debug, Clone)]
pub struct RequestIdentity {
    identity: String,
}

impl RequestIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for RequestIdentity {
    async fn current_identity(&self) -> PortResult<String> {
        if self.identity.is_empty() {
            return Err(PortError::Unauthorized);
        }
        Ok(self.identity.clone())
    }
}
