//! Application state - shared across all handlers.

use std::sync::Arc;

use rls_core::engine::Engine;
use rls_infra::rules::RuleStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RuleStore>,
    pub engine: Arc<Engine>,
}
