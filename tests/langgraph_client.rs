mod common;

use aiko_gateway::clients::{LangGraphClient, WorkflowEngine};
use aiko_gateway::config::EngineConfig;
use aiko_gateway::error::GatewayError;
use serde_json::json;

fn client_for(url: &str, api_key: Option<&str>) -> LangGraphClient {
    LangGraphClient::new(&EngineConfig {
        base_url: url.to_string(),
        api_key: api_key.map(str::to_string),
        request_timeout_ms: 5_000,
        ..EngineConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn thread_lifecycle_against_fake_engine() {
    let (url, engine) = common::spawn_fake_engine().await;
    let client = client_for(&url, Some("secret"));

    assert!(client.health().await);

    let thread = client.create_thread().await.unwrap();
    assert_eq!(thread.thread_id, "thread-1");
    assert_eq!(
        engine.lock().unwrap().last_api_key.as_deref(),
        Some("secret")
    );

    let input = json!({ "company_info": { "company_name": "ACME" } });
    client
        .run_wait(&thread.thread_id, Some(input.clone()))
        .await
        .unwrap();
    assert_eq!(engine.lock().unwrap().last_input, Some(input));

    let state = client.get_state(&thread.thread_id).await.unwrap();
    assert_eq!(state.identified_needs().len(), common::NEEDS_PER_ROUND);
    assert_eq!(state.created_at.as_deref(), Some("2026-10-19T00:00:00Z"));

    client
        .update_state(&thread.thread_id, json!({ "validated_needs": [{"id": "n"}] }))
        .await
        .unwrap();
    let run = client.start_run(&thread.thread_id, None).await.unwrap();
    assert_eq!(run.run_id, "run-1");
    assert_eq!(run.status.as_deref(), Some("pending"));

    let updates = engine.lock().unwrap().state_updates.clone();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["values"]["validated_needs"][0]["id"], "n");
}

#[tokio::test]
async fn non_success_status_becomes_engine_error() {
    let (url, _engine) = common::spawn_fake_engine().await;
    let client = client_for(&url, None);
    let err = client.get_state("missing").await.unwrap_err();
    match err {
        GatewayError::Engine { status, message } => {
            assert_eq!(status, 404);
            assert!(message.contains("thread not found"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn unreachable_engine_reports_unhealthy() {
    // Port 9 (discard) is essentially never served locally
    let client = client_for("http://127.0.0.1:9", None);
    assert!(!client.health().await);
    let err = client.create_thread().await.unwrap_err();
    assert!(matches!(err, GatewayError::Transport { .. }));
}
