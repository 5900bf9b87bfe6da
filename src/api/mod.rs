//! Dashboard side channel.
//!
//! Read-only HTTP view of the per-user state store plus a WebSocket that
//! relays every state-change broadcast. A dashboard loads the keyed
//! snapshot once, then applies messages in `incr_value` order; a gap or a
//! `refresh` message means it must reload the snapshot.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod websocket;

pub use router::dashboard_router;
pub use server::{start_dashboard_server, DashboardServer};

use std::sync::Arc;

use crate::core_state::CoreState;

/// Shared context for every dashboard route.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        Self { core }
    }
}
