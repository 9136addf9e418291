use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::deserializers::de_option_string_lossy;
use crate::error::Result;
use crate::schemas::ThreadState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub thread_id: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_option_string_lossy"
    )]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_option_string_lossy"
    )]
    pub status: Option<String>,
}

/// The external workflow server, treated as an opaque HTTP service.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    async fn create_thread(&self) -> Result<ThreadInfo>;

    /// Run the assistant on a thread and block until the run ends.
    async fn run_wait(&self, thread_id: &str, input: Option<Value>) -> Result<Value>;

    /// Start a background run; `None` input resumes from the last checkpoint.
    async fn start_run(&self, thread_id: &str, input: Option<Value>) -> Result<RunInfo>;

    async fn get_state(&self, thread_id: &str) -> Result<ThreadState>;

    async fn update_state(&self, thread_id: &str, values: Value) -> Result<()>;

    async fn health(&self) -> bool;
}
