use std::sync::Arc;

use devdocs_common::ids::TraceId;
use devdocs_common::types::RoutingDecision;

use crate::llm::{LlmCaller, LlmError};

const SYSTEM_PROMPT: &str = "You are a routing classifier for an AI agent system. Your job is to analyze user prompts and determine the appropriate routing strategy.

Available routing strategies:
1. SEARCH_ONLY: User is asking questions about documentation, seeking information, or wants to learn about a framework/concept
2. CODE_ONLY: User explicitly wants code generation without needing documentation context (e.g., simple code tasks, refactoring)
3. SEARCH_THEN_CODE: User wants code generation that requires framework documentation context (e.g., framework-specific implementations)

Guidelines:
- If the prompt contains questions like \"how to\", \"what is\", \"explain\", \"documentation\" -> SEARCH_ONLY
- If the prompt explicitly asks for code generation with framework-specific requirements -> SEARCH_THEN_CODE
- If the prompt asks for simple code without framework context -> CODE_ONLY
- When in doubt between CODE_ONLY and SEARCH_THEN_CODE, prefer SEARCH_THEN_CODE for better results

Respond with ONLY one of these exact values: SEARCH_ONLY, CODE_ONLY, or SEARCH_THEN_CODE";

/// One classification with its token spend.
#[derive(Clone, Debug)]
pub struct Classification {
    pub decision: RoutingDecision,
    pub tokens_used: u64,
}

/// Classifies prompts into a routing decision with a temperature-0 LLM
/// call. Unrecognized classifier output falls back to SEARCH_THEN_CODE,
/// the path that gathers the most context.
pub struct SupervisorAgent {
    llm: Arc<dyn LlmCaller>,
}

impl SupervisorAgent {
    pub fn new(llm: Arc<dyn LlmCaller>) -> Self {
        Self { llm }
    }

    /// Classify `prompt` into a routing decision. LLM failure after
    /// retries propagates.
    pub async fn classify(
        &self,
        prompt: &str,
        trace_id: TraceId,
    ) -> Result<Classification, LlmError> {
        let user_prompt = format!(
            "Analyze this prompt and determine the routing strategy:\n\nPrompt: {}\n\nRouting strategy:",
            prompt
        );

        let completion = self.llm.chat(SYSTEM_PROMPT, &user_prompt, 0.0, 50).await?;
        let classification = completion.text.trim().to_uppercase();

        let decision = parse_classification(&classification).unwrap_or_else(|| {
            tracing::warn!(
                trace_id = %trace_id,
                classification = classification.as_str(),
                fallback = "SEARCH_THEN_CODE",
                "Classification parse failed, using fallback"
            );
            metrics::counter!("supervisor.parse_fallbacks").increment(1);
            RoutingDecision::SearchThenCode
        });

        tracing::info!(
            trace_id = %trace_id,
            decision = decision.as_str(),
            tokens_used = completion.tokens_used,
            "Routing decision made"
        );
        metrics::counter!("supervisor.decisions", "decision" => decision.as_str()).increment(1);

        Ok(Classification {
            decision,
            tokens_used: completion.tokens_used,
        })
    }
}

/// Case-insensitive substring parse, checked in a fixed order. Tolerates
/// space-separated variants the classifier occasionally emits.
fn parse_classification(classification: &str) -> Option<RoutingDecision> {
    if classification.contains("SEARCH_ONLY") || classification.contains("SEARCH ONLY") {
        Some(RoutingDecision::SearchOnly)
    } else if classification.contains("CODE_ONLY") || classification.contains("CODE ONLY") {
        Some(RoutingDecision::CodeOnly)
    } else if classification.contains("SEARCH_THEN_CODE")
        || classification.contains("SEARCH THEN CODE")
    {
        Some(RoutingDecision::SearchThenCode)
    } else {
        None
    }
}
