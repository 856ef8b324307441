//! Status and operator API integration tests.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use ksched_id::{AgentId, OfferId};
use ksched_scheduler::{
    api,
    config::Config,
    driver::MockDriver,
    model::{Offer, Resource, TaskState, TaskStatus, RESOURCE_CPUS, RESOURCE_DISK, RESOURCE_MEM},
    state::AppState,
    store::{MemoryTaskStore, TaskStore},
    BrokerScheduler,
};
use serde_json::Value;
use tower::ServiceExt;

struct Harness {
    store: Arc<MemoryTaskStore>,
    scheduler: BrokerScheduler,
    driver: MockDriver,
    router: Router,
}

impl Harness {
    fn new() -> Self {
        Self::with_vars(&[])
    }

    /// Two brokers, plus any overridden `KSCHED_*` variables.
    fn with_vars(vars: &[(&str, &str)]) -> Self {
        let config = Config::from_lookup(|var| {
            vars.iter()
                .find(|(name, _)| *name == var)
                .map(|(_, value)| value.to_string())
                .or_else(|| (var == "KSCHED_BROKER_COUNT").then(|| "2".to_string()))
        })
        .unwrap();
        let store = Arc::new(MemoryTaskStore::new());
        let scheduler = BrokerScheduler::new(&config, store.clone());
        let state = AppState::new(
            store.clone(),
            scheduler.requests(),
            scheduler.subscribe_plan(),
            scheduler.subscribe_recovery(),
        );

        Self {
            store,
            scheduler,
            driver: MockDriver::new(),
            router: api::create_router(state),
        }
    }

    /// Launches broker `index` and reports it running.
    fn deploy(&mut self, index: u32) {
        let offer = Offer {
            id: OfferId::new(format!("o-{index}")),
            agent_id: AgentId::new(format!("agent-{index}")),
            hostname: format!("host-{index}"),
            resources: vec![
                Resource::scalar(RESOURCE_CPUS, 8.0),
                Resource::scalar(RESOURCE_MEM, 32768.0),
                Resource::scalar(RESOURCE_DISK, 100_000.0),
            ],
        };
        self.scheduler.resource_offers(&mut self.driver, vec![offer]);
        let task = self.store.fetch_task(&format!("broker-{index}")).unwrap().unwrap();
        self.scheduler
            .status_update(&mut self.driver, &TaskStatus::new(task.task_id, TaskState::Running));
    }

    async fn request(&self, method: Method, uri: &str) -> (StatusCode, Option<String>, Value) {
        let response = self
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, content_type, body)
    }
}

#[tokio::test]
async fn test_health_endpoints() {
    let h = Harness::new();

    let (status, _, body) = h.request(Method::GET, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "kafka-scheduler");

    let (status, _, _) = h.request(Method::GET, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_list_brokers() {
    let mut h = Harness::new();
    let (status, _, body) = h.request(Method::GET, "/v1/brokers").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([]));

    h.deploy(0);
    h.deploy(1);
    let (_, _, body) = h.request(Method::GET, "/v1/brokers").await;
    assert_eq!(body, serde_json::json!([0, 1]));
}

#[tokio::test]
async fn test_get_broker() {
    let mut h = Harness::new();
    h.deploy(0);

    let (status, _, body) = h.request(Method::GET, "/v1/brokers/0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 0);
    assert_eq!(body["task"]["name"], "broker-0");
    assert_eq!(body["status"]["state"], "RUNNING");

    let (status, content_type, body) = h.request(Method::GET, "/v1/brokers/1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(content_type.as_deref(), Some("application/problem+json"));
    assert_eq!(body["code"], "broker_not_found");
}

#[tokio::test]
async fn test_non_numeric_broker_id_is_rejected() {
    let h = Harness::new();
    let (status, _, body) = h.request(Method::PUT, "/v1/brokers/first").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_broker_id");
}

#[tokio::test]
async fn test_restart_unknown_broker_returns_null() {
    let h = Harness::new();
    let (status, _, body) = h.request(Method::PUT, "/v1/brokers/5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([null]));
}

#[tokio::test]
async fn test_restart_broker_kills_on_next_batch() {
    let mut h = Harness::new();
    h.deploy(0);
    let task = h.store.fetch_task("broker-0").unwrap().unwrap();

    let (status, _, body) = h.request(Method::PUT, "/v1/brokers/0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([task.task_id.to_string()]));

    h.driver.clear();
    h.scheduler.resource_offers(&mut h.driver, vec![]);
    assert_eq!(h.driver.killed_tasks(), vec![&task.task_id]);
    assert!(!h
        .store
        .fetch_task("broker-0")
        .unwrap()
        .unwrap()
        .is_permanently_failed());
}

#[tokio::test]
async fn test_replace_broker_marks_task_failed() {
    let mut h = Harness::new();
    h.deploy(0);
    let task = h.store.fetch_task("broker-0").unwrap().unwrap();

    let (status, _, _) = h.request(Method::PUT, "/v1/brokers/0?replace=true").await;
    assert_eq!(status, StatusCode::OK);

    h.driver.clear();
    h.scheduler.resource_offers(&mut h.driver, vec![]);
    assert_eq!(h.driver.killed_tasks(), vec![&task.task_id]);
    assert!(h
        .store
        .fetch_task("broker-0")
        .unwrap()
        .unwrap()
        .is_permanently_failed());
}

#[tokio::test]
async fn test_plan_status() {
    let mut h = Harness::new();
    let (status, _, body) = h.request(Method::GET, "/v1/plan").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["complete"], false);
    assert_eq!(body["phases"].as_array().unwrap().len(), 2);
    assert_eq!(body["phases"][0]["name"], "Reconciliation");

    h.deploy(0);
    let (_, _, body) = h.request(Method::GET, "/v1/plan").await;
    assert_eq!(body["current_block"], "broker-1");
    assert_eq!(body["phases"][1]["blocks"][0]["status"], "COMPLETE");

    h.deploy(1);
    let (_, _, body) = h.request(Method::GET, "/v1/plan").await;
    assert_eq!(body["complete"], true);
    assert!(body["current_block"].is_null());
}

#[tokio::test]
async fn test_plan_reports_validation_errors_and_still_runs() {
    let mut h = Harness::with_vars(&[("KSCHED_BROKER_HEAP_MB", "4096")]);

    let (status, _, body) = h.request(Method::GET, "/v1/plan").await;
    assert_eq!(status, StatusCode::OK);
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].as_str().unwrap().contains("heap"));

    // Reconciliation still runs; the broker requirement cannot be built.
    h.scheduler.resource_offers(
        &mut h.driver,
        vec![Offer {
            id: OfferId::new("o-0"),
            agent_id: AgentId::new("agent-0"),
            hostname: "host-0".to_string(),
            resources: vec![
                Resource::scalar(RESOURCE_CPUS, 8.0),
                Resource::scalar(RESOURCE_MEM, 32768.0),
                Resource::scalar(RESOURCE_DISK, 100_000.0),
            ],
        }],
    );
    assert!(h.driver.accepted_offers().is_empty());
    assert_eq!(h.driver.declined_offers(), vec![&OfferId::new("o-0")]);

    let (_, _, body) = h.request(Method::GET, "/v1/plan").await;
    assert_eq!(body["phases"][0]["complete"], true);
    assert_eq!(body["current_block"], "broker-0");
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_recovery_status() {
    let mut h = Harness::new();
    h.deploy(0);
    let task = h.store.fetch_task("broker-0").unwrap().unwrap();
    h.scheduler
        .status_update(&mut h.driver, &TaskStatus::new(task.task_id, TaskState::Failed));
    // Classification happens on the next offer batch.
    h.scheduler.resource_offers(&mut h.driver, vec![]);

    let (status, _, body) = h.request(Method::GET, "/v1/recovery").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recovering"], serde_json::json!(["broker-0"]));
    assert_eq!(body["failed"], serde_json::json!([]));
}
