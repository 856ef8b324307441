//! Broker inspection and operator restart/replace.
//!
//! - `GET /v1/brokers`: indices of every broker with a stored task
//! - `GET /v1/brokers/{id}`: stored task and its latest status
//! - `PUT /v1/brokers/{id}?replace=bool`: queue a restart or replacement

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use ksched_id::{broker_index, broker_task_name};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::error::ApiError;
use crate::model::{TaskInfo, TaskStatus};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/brokers", get(list_brokers))
        .route("/brokers/{id}", get(get_broker).put(restart_broker))
}

#[derive(Debug, Serialize)]
pub struct BrokerResponse {
    pub id: u32,
    pub task: TaskInfo,
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RestartQuery {
    #[serde(default)]
    pub replace: bool,
}

async fn list_brokers(State(state): State<AppState>) -> Result<Json<Vec<u32>>, ApiError> {
    let mut ids: Vec<u32> = state
        .store()
        .task_names()?
        .iter()
        .filter_map(|name| broker_index(name).ok())
        .collect();
    ids.sort_unstable();
    Ok(Json(ids))
}

async fn get_broker(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BrokerResponse>, ApiError> {
    let id = parse_broker_id(&id)?;
    let name = broker_task_name(id);
    let record = state
        .store()
        .fetch_record(&name)?
        .ok_or_else(|| ApiError::not_found("broker_not_found", format!("no task for {name}")))?;

    Ok(Json(BrokerResponse {
        id,
        task: record.info,
        status: record.status,
    }))
}

/// Answers with the affected task id, or `[null]` when the broker has no
/// stored task.
async fn restart_broker(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RestartQuery>,
) -> Result<Json<Vec<Option<String>>>, ApiError> {
    let id = parse_broker_id(&id)?;
    let name = broker_task_name(id);

    let Some(task) = state.store().fetch_task(&name)? else {
        info!(broker = %name, "Restart requested for unknown broker");
        return Ok(Json(vec![None]));
    };

    let task_id = task.task_id.to_string();
    if query.replace {
        state.requests().replace(Some(task));
    } else {
        state.requests().restart(Some(task));
    }
    Ok(Json(vec![Some(task_id)]))
}

fn parse_broker_id(id: &str) -> Result<u32, ApiError> {
    id.parse().map_err(|_| {
        ApiError::bad_request("invalid_broker_id", format!("broker id must be an integer: {id}"))
    })
}

