//! Deployment plan and recovery status.

use axum::{extract::State, routing::get, Json, Router};

use crate::plan::PlanStatus;
use crate::recovery::RecoveryStatus;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/plan", get(get_plan))
        .route("/recovery", get(get_recovery))
}

async fn get_plan(State(state): State<AppState>) -> Json<PlanStatus> {
    Json(state.plan_status().as_ref().clone())
}

async fn get_recovery(State(state): State<AppState>) -> Json<RecoveryStatus> {
    Json(state.recovery_status().as_ref().clone())
}
