// =============================================================================
// REST endpoints — Axum 0.7
// =============================================================================
//
// Everything lives under `/api/v1/`. The server binds loopback by default;
// the operator endpoints mutate governance state and are deliberately thin —
// the kill switch is the only write path, and run mode is NOT mutable here
// (it is latched at startup).
//
// CORS is permissive for dashboard development.
// =============================================================================

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::api::ApiContext;
use crate::market::fnv1a32;

/// Build the full router.
pub fn router(ctx: ApiContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/attribution", get(attribution))
        .route("/api/v1/control/kill", post(control_kill))
        .route("/api/v1/control/reset-kill", post(control_reset_kill))
        .route(
            "/api/v1/control/reset-divergence/:symbol",
            post(control_reset_divergence),
        )
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(ctx)
}

// =============================================================================
// Read endpoints
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    mode: String,
    state_version: u64,
}

async fn health(State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        mode: ctx.app_state.mode.to_string(),
        state_version: ctx.app_state.version(),
    })
}

async fn full_state(State(ctx): State<ApiContext>) -> impl IntoResponse {
    let snapshot = ctx.app_state.build_snapshot(ctx.clock.now_ns());
    Json(snapshot)
}

async fn positions(State(ctx): State<ApiContext>) -> impl IntoResponse {
    let positions = ctx.app_state.positions.snapshot();
    Json(positions)
}

async fn attribution(State(ctx): State<ApiContext>) -> impl IntoResponse {
    let table = ctx.attribution.table_snapshot();
    Json(table)
}

// =============================================================================
// Operator controls
// =============================================================================

#[derive(Serialize)]
struct ControlResponse {
    ok: bool,
    message: String,
}

async fn control_kill(State(ctx): State<ApiContext>) -> impl IntoResponse {
    warn!("operator kill requested via API");
    ctx.app_state.governance.kill("operator API request");
    Json(ControlResponse {
        ok: true,
        message: "global kill raised".to_string(),
    })
}

async fn control_reset_kill(State(ctx): State<ApiContext>) -> impl IntoResponse {
    ctx.app_state.governance.operator_reset();
    Json(ControlResponse {
        ok: true,
        message: "global kill cleared".to_string(),
    })
}

async fn control_reset_divergence(
    State(ctx): State<ApiContext>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let symbol = symbol.to_uppercase();
    let hash = fnv1a32(&symbol);
    if ctx.app_state.symbol_snapshot(&symbol).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(ControlResponse {
                ok: false,
                message: format!("unknown symbol {symbol}"),
            }),
        );
    }
    ctx.app_state.divergence.reset(hash);
    (
        StatusCode::OK,
        Json(ControlResponse {
            ok: true,
            message: format!("divergence reset for {symbol}"),
        }),
    )
}
