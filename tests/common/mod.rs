//! In-process stand-ins for the LangGraph server and the gateway itself.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use aiko_gateway::clients::LangGraphClient;
use aiko_gateway::config::Config;
use aiko_gateway::http::{HttpState, build_router};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

pub const NEEDS_PER_ROUND: usize = 8;
pub const USE_CASES_PER_CATEGORY: usize = 4;

#[derive(Default)]
pub struct FakeEngineState {
    pub values: Map<String, Value>,
    pub round: u32,
    pub threads_created: u32,
    pub last_input: Option<Value>,
    pub last_api_key: Option<String>,
    pub state_updates: Vec<Value>,
}

pub type SharedEngine = Arc<Mutex<FakeEngineState>>;

pub fn needs_json(round: u32) -> Value {
    Value::Array(
        (1..=NEEDS_PER_ROUND)
            .map(|i| {
                json!({
                    "id": format!("need_{}_{}", round, i),
                    "theme": format!("Besoin {} (tour {})", i, round),
                    "quotes": ["citation 1", "citation 2", "citation 3", "citation 4", "citation 5"],
                })
            })
            .collect(),
    )
}

pub fn use_cases_json(prefix: &str, round: u32) -> Value {
    Value::Array(
        (1..=USE_CASES_PER_CATEGORY)
            .map(|i| {
                json!({
                    "titre": format!("{} {} r{}", prefix, i, round),
                    "description": "Automatisation ciblée",
                    "ia_utilisee": "LLM, OCR",
                })
            })
            .collect(),
    )
}

async fn ok() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn create_thread(State(engine): State<SharedEngine>, headers: HeaderMap) -> impl IntoResponse {
    let mut e = engine.lock().unwrap();
    e.threads_created += 1;
    e.last_api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Json(json!({ "thread_id": format!("thread-{}", e.threads_created), "status": "idle" }))
}

async fn run_wait(
    State(engine): State<SharedEngine>,
    Path(_thread_id): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let mut e = engine.lock().unwrap();
    e.last_input = Some(body["input"].clone());
    e.values.insert("identified_needs".into(), needs_json(0));
    Json(Value::Object(e.values.clone()))
}

/// Background run: regenerate needs below 5 validated, otherwise propose use cases.
async fn start_run(
    State(engine): State<SharedEngine>,
    Path(_thread_id): Path<String>,
) -> impl IntoResponse {
    let mut e = engine.lock().unwrap();
    e.round += 1;
    let round = e.round;
    let validated_needs = e
        .values
        .get("validated_needs")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);
    if e.values.contains_key("validated_quick_wins") {
        e.values
            .insert("proposed_quick_wins".into(), use_cases_json("QW", round));
        e.values
            .insert("proposed_structuration_ia".into(), use_cases_json("SIA", round));
    } else if validated_needs >= 5 {
        e.values
            .insert("proposed_quick_wins".into(), use_cases_json("QW", 0));
        e.values
            .insert("proposed_structuration_ia".into(), use_cases_json("SIA", 0));
    } else {
        e.values.insert("identified_needs".into(), needs_json(round));
    }
    Json(json!({ "run_id": format!("run-{}", round), "status": "pending" }))
}

async fn get_state(
    State(engine): State<SharedEngine>,
    Path(thread_id): Path<String>,
) -> axum::response::Response {
    if thread_id == "missing" {
        return (StatusCode::NOT_FOUND, "thread not found").into_response();
    }
    let e = engine.lock().unwrap();
    Json(json!({
        "values": Value::Object(e.values.clone()),
        "next": [],
        "created_at": "2026-10-19T00:00:00Z",
    }))
    .into_response()
}

async fn update_state(
    State(engine): State<SharedEngine>,
    Path(_thread_id): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let mut e = engine.lock().unwrap();
    e.state_updates.push(body.clone());
    if let Some(Value::Object(values)) = body.get("values") {
        e.values.extend(values.clone());
    }
    Json(json!({ "checkpoint": { "checkpoint_id": "cp" } }))
}

/// Start a fake LangGraph server; returns its base URL and shared state.
pub async fn spawn_fake_engine() -> (String, SharedEngine) {
    let engine: SharedEngine = Arc::new(Mutex::new(FakeEngineState::default()));
    let app = Router::new()
        .route("/ok", get(ok))
        .route("/threads", post(create_thread))
        .route("/threads/:thread_id/runs/wait", post(run_wait))
        .route("/threads/:thread_id/runs", post(start_run))
        .route(
            "/threads/:thread_id/state",
            get(get_state).post(update_state),
        )
        .with_state(engine.clone());
    let addr = serve(app).await;
    (format!("http://{}", addr), engine)
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn test_config(engine_url: &str, bearer_token: Option<&str>) -> Config {
    let mut config = Config::default();
    config.engine.base_url = engine_url.to_string();
    config.polling.max_attempts = 50;
    config.polling.interval_ms = 5;
    config.uploads.dir =
        std::env::temp_dir().join(format!("aiko-gateway-test-{}", uuid::Uuid::new_v4()));
    config.runtime.bearer_token = bearer_token.map(str::to_string);
    config
}

/// Start the gateway against `config`; returns its base URL.
pub async fn spawn_gateway(config: Config) -> String {
    let engine = Arc::new(LangGraphClient::new(&config.engine).unwrap());
    let state = HttpState::new(Arc::new(config), engine, CancellationToken::new());
    let addr = serve(build_router(state)).await;
    format!("http://{}", addr)
}
