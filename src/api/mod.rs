// =============================================================================
// Telemetry API — REST + WebSocket surface for the dashboard
// =============================================================================

pub mod rest;
pub mod ws;

use std::sync::Arc;

use crate::app_state::AppState;
use crate::attribution::AttributionTracker;
use crate::clock::EngineClock;

/// Shared context handed to every handler.
#[derive(Clone)]
pub struct ApiContext {
    pub app_state: Arc<AppState>,
    pub clock: Arc<EngineClock>,
    pub attribution: Arc<AttributionTracker>,
}
