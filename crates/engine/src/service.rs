use std::sync::Arc;
use std::time::{Duration, Instant};

use devdocs_common::config::SystemConfig;
use devdocs_common::ids::TraceId;
use devdocs_common::types::{AgentResponse, ResponseMetadata};
use devdocs_common::{DevDocsError, Result};

use crate::agents::{detect_framework, CodeGenAgent, DocumentationSearchAgent, SupervisorAgent, SyntaxValidator};
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::embeddings::{Embedder, EmbeddingClient};
use crate::kv::KvClient;
use crate::llm::ChatClient;
use crate::rerank::{FastembedCrossEncoder, Reranker};
use crate::retry::RetryPolicy;
use crate::semantic_cache::SemanticCache;
use crate::store::VectorStore;
use crate::tool_cache::ToolCache;
use crate::workflow::AgentWorkflow;

/// Everything the request pipeline depends on, created once at startup and
/// passed in explicitly. Tests build this with fakes behind the same seam
/// traits.
pub struct Services {
    pub config: Arc<SystemConfig>,
    pub embedder: Arc<dyn Embedder>,
    pub semantic_cache: Arc<SemanticCache>,
    pub workflow: Arc<AgentWorkflow>,
    pub breakers: Arc<CircuitBreakerRegistry>,
}

impl Services {
    /// Production wiring: connect Redis and PostgreSQL, load the local
    /// models, build the agents. Fails loudly on misconfiguration.
    pub async fn connect(
        config: SystemConfig,
        database_url: &str,
        redis_url: &str,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let breakers = Arc::new(CircuitBreakerRegistry::new(&config.breakers));

        let kv = Arc::new(
            KvClient::connect(redis_url)
                .await
                .map_err(|e| DevDocsError::Config(format!("Redis connection failed: {}", e)))?,
        );

        let store = Arc::new(
            VectorStore::connect(
                database_url,
                &config.store,
                RetryPolicy::database(&config.retry),
                breakers.postgres.clone(),
            )
            .await
            .map_err(|e| DevDocsError::Config(format!("PostgreSQL connection failed: {}", e)))?,
        );

        let embedder: Arc<dyn Embedder> = Arc::new(
            EmbeddingClient::new(
                config.embeddings.clone(),
                RetryPolicy::llm_api(&config.retry),
            )
            .map_err(|e| DevDocsError::Config(format!("Embedding provider failed: {}", e)))?,
        );

        let cross_encoder = FastembedCrossEncoder::load(&config.rerank)
            .map_err(|e| DevDocsError::Config(format!("Cross-encoder failed to load: {}", e)))?;
        let reranker = Arc::new(Reranker::new(Arc::new(cross_encoder)));

        let tool_cache = Arc::new(ToolCache::new(kv.clone(), config.cache.tool_ttl_seconds));
        let semantic_cache = Arc::new(SemanticCache::new(
            kv,
            store.clone(),
            config.cache.similarity_threshold,
            config.cache.semantic_ttl_seconds,
        ));

        let supervisor_llm = ChatClient::new(
            config.llm.supervisor.clone(),
            RetryPolicy::llm_api(&config.retry),
            breakers.llm_api.clone(),
        )
        .ok_or_else(|| DevDocsError::Config("Supervisor LLM API key not set".into()))?;

        let code_gen_llm = ChatClient::new(
            config.llm.code_gen.clone(),
            RetryPolicy::llm_api(&config.retry),
            breakers.llm_api.clone(),
        )
        .ok_or_else(|| DevDocsError::Config("Code generation LLM API key not set".into()))?;

        let supervisor = Arc::new(SupervisorAgent::new(Arc::new(supervisor_llm)));
        let search_agent = Arc::new(DocumentationSearchAgent::new(
            store,
            reranker,
            embedder.clone(),
            tool_cache,
            config.search.self_correction_threshold,
        ));
        let code_gen_agent = Arc::new(CodeGenAgent::new(
            Arc::new(code_gen_llm),
            Arc::new(SyntaxValidator::new()),
            &config.code_gen,
            &config.llm.code_gen,
        ));

        let workflow = Arc::new(AgentWorkflow::new(
            supervisor,
            search_agent,
            code_gen_agent,
            config.search.clone(),
        ));

        tracing::info!("Services wired and ready");

        Ok(Self {
            config,
            embedder,
            semantic_cache,
            workflow,
            breakers,
        })
    }
}

/// Per-request knobs for `process`.
#[derive(Clone, Debug, Default)]
pub struct ProcessOptions {
    /// Target framework. When absent, the prompt is scanned for framework
    /// markers.
    pub framework: Option<String>,
    /// Override for the workflow iteration ceiling.
    pub max_iterations: Option<u32>,
    /// Caller-supplied trace id; generated when absent.
    pub trace_id: Option<TraceId>,
}

/// The single entry point: semantic cache in front of the agent workflow.
pub struct AgentService {
    services: Services,
}

impl AgentService {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Process one prompt: cache lookup, workflow on miss, cache write on
    /// the way out. Cache trouble only ever costs latency.
    pub async fn process(&self, prompt: &str, options: ProcessOptions) -> Result<AgentResponse> {
        let start = Instant::now();
        let config = &self.services.config;
        let trace_id = options.trace_id.unwrap_or_default();

        let span = tracing::info_span!("process_request", trace_id = %trace_id);
        let _enter = span.enter();

        if prompt.trim().is_empty() {
            return Err(DevDocsError::InvalidInput("Prompt cannot be empty".into()));
        }
        let prompt_chars = prompt.chars().count();
        if prompt_chars > config.safety.max_prompt_chars {
            return Err(DevDocsError::InvalidInput(format!(
                "Prompt exceeds maximum length of {} characters",
                config.safety.max_prompt_chars
            )));
        }

        let deadline = Instant::now() + Duration::from_secs(config.safety.request_timeout_seconds);

        let framework = options.framework.clone().or_else(|| {
            detect_framework(prompt).map(|(framework, _)| {
                tracing::info!(trace_id = %trace_id, framework, "Framework detected from prompt");
                framework.to_string()
            })
        });

        let max_iterations = options
            .max_iterations
            .unwrap_or(config.safety.max_workflow_iterations);

        tracing::info!(
            trace_id = %trace_id,
            prompt_length = prompt_chars,
            max_iterations,
            framework = framework.as_deref().unwrap_or("none"),
            "Request received"
        );
        metrics::counter!("requests.received").increment(1);

        // Step 1: semantic cache. Failures here degrade to a miss.
        let mut embedding: Option<Vec<f32>> = None;
        match self.embed_within(prompt, deadline).await {
            Ok(vector) => {
                if let Some(cached) = self
                    .services
                    .semantic_cache
                    .get_with_embedding(prompt, &vector, None)
                    .await
                {
                    let processing_time_ms = start.elapsed().as_secs_f64() * 1000.0;
                    tracing::info!(
                        trace_id = %trace_id,
                        similarity_score = cached.similarity_score,
                        processing_time_ms,
                        "Semantic cache hit"
                    );
                    metrics::counter!("requests.cache_hits").increment(1);

                    return Ok(AgentResponse {
                        result: cached.response,
                        metadata: ResponseMetadata {
                            trace_id,
                            cache_hit: true,
                            processing_time_ms,
                            tokens_used: 0,
                            agents_invoked: Vec::new(),
                            workflow_iterations: 0,
                        },
                    });
                }
                tracing::info!(trace_id = %trace_id, "Semantic cache miss");
                embedding = Some(vector);
            }
            Err(e) => {
                tracing::warn!(
                    trace_id = %trace_id,
                    error = %e,
                    "Cache lookup embedding failed, continuing without cache"
                );
            }
        }

        // Step 2: run the workflow.
        let mut response = self
            .services
            .workflow
            .execute(prompt, framework, max_iterations, trace_id, Some(deadline))
            .await;

        // Step 3: cache the response for future queries, best effort.
        let embedding = match embedding {
            Some(vector) => Some(vector),
            None => self.embed_within(prompt, deadline).await.ok(),
        };
        if let Some(vector) = embedding {
            let stored = self
                .services
                .semantic_cache
                .set(prompt, &response.result, &vector, None)
                .await;
            if stored {
                tracing::info!(trace_id = %trace_id, "Response cached");
            }
        }

        let processing_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        response.metadata.processing_time_ms = processing_time_ms;

        tracing::info!(
            trace_id = %trace_id,
            processing_time_ms,
            tokens_used = response.metadata.tokens_used,
            iterations = response.metadata.workflow_iterations,
            agents_invoked = ?response.metadata.agents_invoked,
            "Request complete"
        );
        metrics::histogram!("requests.processing_time_ms").record(processing_time_ms);

        Ok(response)
    }

    /// Embed under what remains of the request budget.
    async fn embed_within(
        &self,
        prompt: &str,
        deadline: Instant,
    ) -> std::result::Result<Vec<f32>, DevDocsError> {
        let budget = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(budget, self.services.embedder.embed(prompt)).await {
            Ok(Ok(vector)) => Ok(vector),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(DevDocsError::Timeout("embedding call".into())),
        }
    }
}
