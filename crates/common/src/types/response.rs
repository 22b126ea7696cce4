use serde::{Deserialize, Serialize};

use crate::ids::TraceId;

/// Final answer for one `process` call: the rendered result text plus
/// request accounting.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentResponse {
    pub result: String,
    pub metadata: ResponseMetadata,
}

/// Request accounting returned alongside every response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub trace_id: TraceId,
    pub cache_hit: bool,
    pub processing_time_ms: f64,
    pub tokens_used: u64,
    /// Names of agents that produced output ("supervisor",
    /// "documentation_search", "code_gen").
    pub agents_invoked: Vec<String>,
    /// Trips through the validate node.
    pub workflow_iterations: u32,
}
