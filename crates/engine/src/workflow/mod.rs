use std::sync::Arc;
use std::time::Instant;

use devdocs_common::ids::TraceId;
use devdocs_common::types::{
    AgentResponse, CodeGenerationResult, DocumentationResult, ResponseMetadata, RoutingDecision,
};

use devdocs_common::config::SearchConfig;

use crate::agents::{CodeGenAgent, DocumentationSearchAgent, SupervisorAgent};

/// Per-request workflow state. Exclusively owned by the request that
/// created it and discarded afterwards.
#[derive(Debug)]
pub struct WorkflowState {
    pub prompt: String,
    pub routing_decision: Option<RoutingDecision>,
    pub documentation_results: Option<Vec<DocumentationResult>>,
    pub generated_code: Option<String>,
    pub code_generation_result: Option<CodeGenerationResult>,
    pub framework: Option<String>,
    pub iteration_count: u32,
    pub max_iterations: Option<u32>,
    pub trace_id: TraceId,
    pub errors: Vec<String>,
    pub supervisor_tokens: u64,
    /// Request deadline. Node calls get the remaining budget; expiry ends
    /// the workflow with whatever partial output exists.
    pub deadline: Option<Instant>,
}

impl WorkflowState {
    fn new(
        prompt: String,
        framework: Option<String>,
        max_iterations: u32,
        trace_id: TraceId,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            prompt,
            routing_decision: None,
            documentation_results: None,
            generated_code: None,
            code_generation_result: None,
            framework,
            iteration_count: 0,
            max_iterations: Some(max_iterations),
            trace_id,
            errors: Vec::new(),
            supervisor_tokens: 0,
            deadline,
        }
    }
}

/// Workflow graph nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Node {
    Supervisor,
    Search,
    CodeGen,
    Validate,
}

impl Node {
    fn name(&self) -> &'static str {
        match self {
            Self::Supervisor => "supervisor",
            Self::Search => "search",
            Self::CodeGen => "code_gen",
            Self::Validate => "validate",
        }
    }
}

const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// The cyclic agent workflow: supervisor routes, search retrieves, code
/// generation produces, validate decides whether to loop back for more
/// context. Node failures land in `state.errors`; `execute` never fails.
pub struct AgentWorkflow {
    supervisor: Arc<SupervisorAgent>,
    search_agent: Arc<DocumentationSearchAgent>,
    code_gen_agent: Arc<CodeGenAgent>,
    search_defaults: SearchConfig,
}

impl AgentWorkflow {
    pub fn new(
        supervisor: Arc<SupervisorAgent>,
        search_agent: Arc<DocumentationSearchAgent>,
        code_gen_agent: Arc<CodeGenAgent>,
        search_defaults: SearchConfig,
    ) -> Self {
        Self {
            supervisor,
            search_agent,
            code_gen_agent,
            search_defaults,
        }
    }

    /// Run the workflow for one prompt and synthesize the response.
    pub async fn execute(
        &self,
        prompt: &str,
        framework: Option<String>,
        max_iterations: u32,
        trace_id: TraceId,
        deadline: Option<Instant>,
    ) -> AgentResponse {
        let start = Instant::now();
        let span = tracing::info_span!("workflow_execution", trace_id = %trace_id);
        let _enter = span.enter();

        tracing::info!(
            prompt_length = prompt.len(),
            max_iterations,
            framework = framework.as_deref().unwrap_or("none"),
            "Workflow execution started"
        );

        let mut state = WorkflowState::new(
            prompt.to_string(),
            framework,
            max_iterations,
            trace_id,
            deadline,
        );

        // Hard bound on total node executions, well above anything the
        // loopback edge can legally produce.
        let step_limit = 4 * (max_iterations.max(1) as usize + 1);
        let mut steps = 0usize;
        let mut current = Some(Node::Supervisor);

        while let Some(node) = current {
            steps += 1;
            if steps > step_limit {
                tracing::error!(steps, "Workflow step limit exceeded, terminating");
                state.errors.push("Workflow step limit exceeded".to_string());
                break;
            }

            if deadline_expired(&state) {
                tracing::warn!(node = node.name(), "Request deadline expired before node");
                state
                    .errors
                    .push(format!("Timeout: deadline expired before {} node", node.name()));
                break;
            }

            tracing::info!(
                agent = node.name(),
                iteration = state.iteration_count,
                "Workflow node executing"
            );
            metrics::counter!("workflow.node_executions", "node" => node.name()).increment(1);

            let timed_out = self.run_node(node, &mut state).await;
            if timed_out {
                state
                    .errors
                    .push(format!("Timeout: {} node exceeded request budget", node.name()));
                break;
            }

            current = transition(node, &state);
        }

        let processing_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        let result = build_result(&state);

        // Derived from which nodes wrote non-empty output, not from which
        // nodes ran: a supervisor that errored out produced nothing.
        let mut agents_invoked = Vec::new();
        if state.routing_decision.is_some() {
            agents_invoked.push("supervisor".to_string());
        }
        if state
            .documentation_results
            .as_ref()
            .map(|r| !r.is_empty())
            .unwrap_or(false)
        {
            agents_invoked.push("documentation_search".to_string());
        }
        if state
            .generated_code
            .as_ref()
            .map(|c| !c.is_empty())
            .unwrap_or(false)
        {
            agents_invoked.push("code_gen".to_string());
        }

        let tokens_used = state.supervisor_tokens
            + state
                .code_generation_result
                .as_ref()
                .map(|r| r.tokens_used)
                .unwrap_or(0);

        tracing::info!(
            processing_time_ms,
            iterations = state.iteration_count,
            ?agents_invoked,
            tokens_used,
            errors = state.errors.len(),
            "Workflow execution complete"
        );
        metrics::histogram!("workflow.iterations").record(state.iteration_count as f64);

        AgentResponse {
            result,
            metadata: ResponseMetadata {
                trace_id,
                cache_hit: false,
                processing_time_ms,
                tokens_used,
                agents_invoked,
                workflow_iterations: state.iteration_count,
            },
        }
    }

    /// Run one node against the state. Returns true when the node was cut
    /// off by the request deadline.
    async fn run_node(&self, node: Node, state: &mut WorkflowState) -> bool {
        let budget = remaining_budget(state);
        let work = async {
            match node {
                Node::Supervisor => self.supervisor_node(state).await,
                Node::Search => self.search_node(state).await,
                Node::CodeGen => self.code_gen_node(state).await,
                Node::Validate => self.validate_node(state),
            }
        };

        match budget {
            Some(budget) => tokio::time::timeout(budget, work).await.is_err(),
            None => {
                work.await;
                false
            }
        }
    }

    async fn supervisor_node(&self, state: &mut WorkflowState) {
        if state.prompt.is_empty() {
            tracing::error!(trace_id = %state.trace_id, "Supervisor node missing prompt");
            state.errors.push("Missing required field: prompt".to_string());
            return;
        }

        match self.supervisor.classify(&state.prompt, state.trace_id).await {
            Ok(classification) => {
                state.routing_decision = Some(classification.decision);
                state.supervisor_tokens += classification.tokens_used;
            }
            Err(e) => {
                tracing::error!(trace_id = %state.trace_id, error = %e, "Supervisor node failed");
                state.errors.push(format!("Supervisor error: {}", e));
            }
        }
    }

    async fn search_node(&self, state: &mut WorkflowState) {
        if state.prompt.is_empty() {
            tracing::error!(trace_id = %state.trace_id, "Search node missing prompt");
            state.errors.push("Missing required field: prompt".to_string());
            state.documentation_results = Some(Vec::new());
            return;
        }

        let frameworks: Option<Vec<String>> = state.framework.clone().map(|f| vec![f]);

        match self
            .search_agent
            .search(
                &state.prompt,
                frameworks.as_deref(),
                self.search_defaults.top_k,
                self.search_defaults.min_score,
            )
            .await
        {
            Ok(results) => {
                tracing::info!(
                    trace_id = %state.trace_id,
                    result_count = results.len(),
                    max_score = DocumentationResult::max_score(&results),
                    "Search node complete"
                );
                state.documentation_results = Some(results);
            }
            Err(e) => {
                tracing::error!(trace_id = %state.trace_id, error = %e, "Search node failed");
                state.errors.push(format!("Search error: {}", e));
                state.documentation_results = Some(Vec::new());
            }
        }
    }

    async fn code_gen_node(&self, state: &mut WorkflowState) {
        if state.prompt.is_empty() {
            tracing::error!(trace_id = %state.trace_id, "Code generation node missing prompt");
            state.errors.push("Missing required field: prompt".to_string());
            state.generated_code = None;
            return;
        }

        // A documentation-only request renders search results directly;
        // generating code here would burn tokens on output that is never
        // shown.
        if state.routing_decision == Some(RoutingDecision::SearchOnly) {
            tracing::debug!(trace_id = %state.trace_id, "Search-only request, skipping code generation");
            return;
        }

        let result = self
            .code_gen_agent
            .generate(
                &state.prompt,
                state.documentation_results.as_deref(),
                state.framework.as_deref(),
                state.trace_id,
            )
            .await;

        tracing::info!(
            trace_id = %state.trace_id,
            syntax_valid = result.syntax_valid,
            language = %result.language,
            tokens_used = result.tokens_used,
            "Code generation node complete"
        );

        state.generated_code = Some(result.code.clone());
        state.code_generation_result = Some(result);
    }

    fn validate_node(&self, state: &mut WorkflowState) {
        state.iteration_count += 1;

        if state.max_iterations.is_none() {
            tracing::warn!(
                trace_id = %state.trace_id,
                "max_iterations not set, defaulting to {}",
                DEFAULT_MAX_ITERATIONS
            );
            state.max_iterations = Some(DEFAULT_MAX_ITERATIONS);
        }

        let Some(code) = state.generated_code.as_ref().filter(|c| !c.is_empty()) else {
            tracing::debug!(trace_id = %state.trace_id, "No code generated, validation passes through");
            return;
        };

        let syntax_valid = state
            .code_generation_result
            .as_ref()
            .map(|r| r.syntax_valid)
            .unwrap_or(false);

        tracing::info!(
            trace_id = %state.trace_id,
            iteration_count = state.iteration_count,
            code_length = code.len(),
            syntax_valid,
            "Validation complete"
        );
    }
}

/// The transition function: which node runs after `node`, or None for end.
fn transition(node: Node, state: &WorkflowState) -> Option<Node> {
    match node {
        Node::Supervisor => match state.routing_decision {
            None => {
                tracing::warn!(trace_id = %state.trace_id, "No routing decision, ending workflow");
                None
            }
            Some(decision) if decision.starts_with_search() => Some(Node::Search),
            Some(_) => Some(Node::CodeGen),
        },
        Node::Search => Some(Node::CodeGen),
        Node::CodeGen => Some(Node::Validate),
        Node::Validate => {
            let max_iterations = state.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);

            if state.iteration_count >= max_iterations {
                tracing::info!(
                    trace_id = %state.trace_id,
                    iteration_count = state.iteration_count,
                    max_iterations,
                    "Max iterations reached, ending workflow"
                );
                return None;
            }

            // A documentation-only run never loops back.
            if state.routing_decision == Some(RoutingDecision::SearchOnly) {
                return None;
            }

            let invalid = state
                .code_generation_result
                .as_ref()
                .map(|r| !r.syntax_valid)
                .unwrap_or(false);

            if invalid && state.generated_code.as_ref().map(|c| !c.is_empty()).unwrap_or(false) {
                tracing::info!(
                    trace_id = %state.trace_id,
                    iteration_count = state.iteration_count,
                    "Code has syntax errors, cycling back for more context"
                );
                metrics::counter!("workflow.loopbacks").increment(1);
                return Some(Node::Search);
            }

            None
        }
    }
}

fn deadline_expired(state: &WorkflowState) -> bool {
    state
        .deadline
        .map(|d| Instant::now() >= d)
        .unwrap_or(false)
}

fn remaining_budget(state: &WorkflowState) -> Option<std::time::Duration> {
    state.deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

/// Render the final result text from the workflow state.
fn build_result(state: &WorkflowState) -> String {
    if state.routing_decision == Some(RoutingDecision::SearchOnly) {
        let docs = state.documentation_results.as_deref().unwrap_or_default();
        if docs.is_empty() {
            return "No documentation results found.".to_string();
        }

        let mut result = String::from("Documentation Search Results:\n\n");
        for (i, doc) in docs.iter().take(5).enumerate() {
            let excerpt: String = doc.content.chars().take(200).collect();
            result.push_str(&format!(
                "{}. [{}] (Score: {:.2})\n   Source: {}\n   {}...\n\n",
                i + 1,
                doc.framework,
                doc.score,
                doc.source,
                excerpt
            ));
        }
        return result;
    }

    if let Some(code) = state.generated_code.as_ref().filter(|c| !c.is_empty()) {
        let mut result = code.clone();

        if let Some(code_result) = &state.code_generation_result {
            result.push_str("\n\n--- Metadata ---\n");
            result.push_str(&format!("Language: {}\n", code_result.language));
            result.push_str(&format!(
                "Framework: {}\n",
                code_result.framework.as_deref().unwrap_or("N/A")
            ));
            result.push_str(&format!("Syntax Valid: {}\n", code_result.syntax_valid));

            if !code_result.documentation_sources.is_empty() {
                result.push_str("\nDocumentation Sources:\n");
                for source in code_result.documentation_sources.iter().take(3) {
                    result.push_str(&format!("  - {}\n", source));
                }
            }
        }

        return result;
    }

    if !state.errors.is_empty() {
        return format!("Workflow completed with errors:\n{}", state.errors.join("\n"));
    }

    "Workflow completed but no result was generated.".to_string()
}
