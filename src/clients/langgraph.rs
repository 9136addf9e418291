use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::clients::traits::{RunInfo, ThreadInfo, WorkflowEngine};
use crate::config::EngineConfig;
use crate::error::{GatewayError, Result};
use crate::schemas::ThreadState;

const ERROR_BODY_CAP: usize = 2048;
const HEALTH_TIMEOUT_MS: u64 = 3000;

/// reqwest-backed client for the LangGraph HTTP API
pub struct LangGraphClient {
    client: reqwest::Client,
    base_url: String,
    assistant_id: String,
    api_key: Option<String>,
}

impl LangGraphClient {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| GatewayError::Config {
                message: format!("Failed to build reqwest client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            assistant_id: config.assistant_id.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let rb = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => rb.header("x-api-key", key),
            None => rb,
        }
    }

    async fn send(&self, rb: RequestBuilder, operation: &str) -> Result<reqwest::Response> {
        let response = rb.send().await?;
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > ERROR_BODY_CAP {
                let mut cut = ERROR_BODY_CAP;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            tracing::error!("{} failed: {} - {}", operation, status, body);
            return Err(GatewayError::Engine {
                status: status.as_u16(),
                message: format!("{} failed: {}", operation, body),
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, rb: RequestBuilder, operation: &str) -> Result<T> {
        let response = self.send(rb, operation).await?;
        Ok(response.json::<T>().await?)
    }

    fn run_body(&self, input: Option<Value>) -> Value {
        json!({
            "assistant_id": self.assistant_id,
            "input": input,
        })
    }
}

#[async_trait]
impl WorkflowEngine for LangGraphClient {
    async fn create_thread(&self) -> Result<ThreadInfo> {
        let name = format!("Thread-{}", chrono::Utc::now().timestamp_millis());
        let rb = self
            .request(Method::POST, "/threads")
            .json(&json!({ "metadata": { "name": name } }));
        let thread: ThreadInfo = self.send_json(rb, "create thread").await?;
        info!("Thread created: {}", thread.thread_id);
        Ok(thread)
    }

    async fn run_wait(&self, thread_id: &str, input: Option<Value>) -> Result<Value> {
        debug!("run_wait on thread {}", thread_id);
        let rb = self
            .request(Method::POST, &format!("/threads/{}/runs/wait", thread_id))
            .json(&self.run_body(input));
        self.send_json(rb, "run workflow").await
    }

    async fn start_run(&self, thread_id: &str, input: Option<Value>) -> Result<RunInfo> {
        debug!("start_run on thread {}", thread_id);
        let rb = self
            .request(Method::POST, &format!("/threads/{}/runs", thread_id))
            .json(&self.run_body(input));
        self.send_json(rb, "resume workflow").await
    }

    async fn get_state(&self, thread_id: &str) -> Result<ThreadState> {
        let rb = self.request(Method::GET, &format!("/threads/{}/state", thread_id));
        self.send_json(rb, "get thread state").await
    }

    async fn update_state(&self, thread_id: &str, values: Value) -> Result<()> {
        let rb = self
            .request(Method::POST, &format!("/threads/{}/state", thread_id))
            .json(&json!({ "values": values }));
        self.send(rb, "update thread state").await?;
        Ok(())
    }

    async fn health(&self) -> bool {
        let rb = self
            .request(Method::GET, "/ok")
            .timeout(Duration::from_millis(HEALTH_TIMEOUT_MS));
        match rb.send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::warn!("LangGraph connection check failed: {}", e);
                false
            }
        }
    }
}
