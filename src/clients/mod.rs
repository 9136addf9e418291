pub mod langgraph;
pub mod traits;

pub use langgraph::LangGraphClient;
pub use traits::{RunInfo, ThreadInfo, WorkflowEngine};
