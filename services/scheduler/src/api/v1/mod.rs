//! API v1 routes.

mod brokers;
mod status;

use axum::Router;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(brokers::routes())
        .merge(status::routes())
}
