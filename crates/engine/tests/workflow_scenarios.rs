//! End-to-end request scenarios over in-memory fakes of every external
//! dependency (LLM, embeddings, cross-encoder, vector store, key-value
//! store). DB-backed paths are covered by the `#[ignore]`d tests in
//! store_integration.rs, which run against a live Postgres.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;

use devdocs_common::config::SystemConfig;
use devdocs_common::types::{DocumentationResult, RoutingDecision};
use devdocs_common::DevDocsError;

use devdocs_engine::agents::{CodeGenAgent, DocumentationSearchAgent, SupervisorAgent, SyntaxValidator};
use devdocs_engine::circuit_breaker::CircuitBreakerRegistry;
use devdocs_engine::embeddings::{Embedder, EmbeddingError};
use devdocs_engine::kv::{KvError, KvStore};
use devdocs_engine::llm::{ChatCompletion, LlmCaller, LlmError};
use devdocs_engine::rerank::{CrossEncoder, RerankError, Reranker};
use devdocs_engine::semantic_cache::SemanticCache;
use devdocs_engine::store::{CacheIndex, DocumentationIndex, StoreError};
use devdocs_engine::tool_cache::ToolCache;
use devdocs_engine::workflow::AgentWorkflow;
use devdocs_engine::{AgentService, ProcessOptions, Services};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryKv {
    entries: Mutex<HashMap<String, String>>,
}

impl KvStore for MemoryKv {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, KvError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.entries.lock().unwrap().get(key).cloned()) })
    }

    fn set_ex<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        _ttl_seconds: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), KvError>> + Send + 'a>> {
        Box::pin(async move {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), KvError>> + Send + 'a>> {
        Box::pin(async move {
            self.entries.lock().unwrap().remove(key);
            Ok(())
        })
    }

    fn delete_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, KvError>> + Send + 'a>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().unwrap();
            let before = entries.len();
            entries.retain(|k, _| !k.starts_with(prefix));
            Ok((before - entries.len()) as u64)
        })
    }
}

/// Key-value store with the plug pulled.
struct DownKv;

impl KvStore for DownKv {
    fn get<'a>(
        &'a self,
        _key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, KvError>> + Send + 'a>> {
        Box::pin(async { Err(KvError::Connection("connection refused".into())) })
    }

    fn set_ex<'a>(
        &'a self,
        _key: &'a str,
        _value: &'a str,
        _ttl_seconds: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), KvError>> + Send + 'a>> {
        Box::pin(async { Err(KvError::Connection("connection refused".into())) })
    }

    fn delete<'a>(
        &'a self,
        _key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), KvError>> + Send + 'a>> {
        Box::pin(async { Err(KvError::Connection("connection refused".into())) })
    }

    fn delete_prefix<'a>(
        &'a self,
        _prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, KvError>> + Send + 'a>> {
        Box::pin(async { Err(KvError::Connection("connection refused".into())) })
    }
}

/// Cache vector tier: rows scored by cosine similarity.
#[derive(Default)]
struct MemoryCacheIndex {
    rows: Mutex<Vec<(String, String, Vec<f32>)>>,
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        (dot / (na * nb)) as f64
    }
}

impl CacheIndex for MemoryCacheIndex {
    fn search_by_embedding<'a>(
        &'a self,
        embedding: &'a [f32],
        threshold: f64,
    ) -> Pin<
        Box<
            dyn Future<
                    Output = Result<
                        Option<(devdocs_common::types::CachedResponse, f64)>,
                        StoreError,
                    >,
                > + Send
                + 'a,
        >,
    > {
        Box::pin(async move {
            let rows = self.rows.lock().unwrap();
            let best = rows
                .iter()
                .map(|(_, response, stored)| {
                    (response.clone(), stored.clone(), cosine(stored, embedding))
                })
                .filter(|(_, _, sim)| *sim >= threshold)
                .max_by(|a, b| a.2.total_cmp(&b.2));

            Ok(best.map(|(response, stored, sim)| {
                (
                    devdocs_common::types::CachedResponse {
                        response,
                        embedding: stored,
                        similarity_score: 0.0,
                        cached_at: chrono::Utc::now(),
                        ttl_seconds: 3600,
                    },
                    sim,
                )
            }))
        })
    }

    fn upsert<'a>(
        &'a self,
        prompt: &'a str,
        response: &'a str,
        embedding: &'a [f32],
        _ttl_seconds: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let mut rows = self.rows.lock().unwrap();
            rows.retain(|(p, _, _)| p != prompt);
            rows.push((prompt.to_string(), response.to_string(), embedding.to_vec()));
            Ok(())
        })
    }

    fn truncate<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            self.rows.lock().unwrap().clear();
            Ok(())
        })
    }
}

/// Documentation index serving a fixed corpus regardless of embedding.
struct FixedDocs(Vec<DocumentationResult>);

impl DocumentationIndex for FixedDocs {
    fn search_documentation<'a>(
        &'a self,
        _query_embedding: &'a [f32],
        _frameworks: Option<&'a [String]>,
        top_k: usize,
        _min_score: f64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DocumentationResult>, StoreError>> + Send + 'a>>
    {
        Box::pin(async move { Ok(self.0.iter().take(top_k).cloned().collect()) })
    }
}

/// Deterministic embedder: same text, same unit vector.
struct HashEmbedder;

fn hash_vector(text: &str) -> Vec<f32> {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    let h = hasher.finish();
    let raw = [
        ((h & 0xffff) as f32) + 1.0,
        (((h >> 16) & 0xffff) as f32) + 1.0,
        (((h >> 32) & 0xffff) as f32) + 1.0,
    ];
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    raw.iter().map(|x| x / norm).collect()
}

impl Embedder for HashEmbedder {
    fn embed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>, EmbeddingError>> + Send + 'a>> {
        Box::pin(async move { Ok(hash_vector(text)) })
    }

    fn embed_batch<'a>(
        &'a self,
        texts: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Option<Vec<f32>>>, EmbeddingError>> + Send + 'a>>
    {
        Box::pin(async move { Ok(texts.iter().map(|t| Some(hash_vector(t))).collect()) })
    }

    fn dimensions(&self) -> u32 {
        3
    }
}

/// Cross-encoder scoring every pair with one fixed logit.
struct FlatScores(f32);

impl CrossEncoder for FlatScores {
    fn score_pairs<'a>(
        &'a self,
        _query: &'a str,
        documents: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>, RerankError>> + Send + 'a>> {
        let score = self.0;
        Box::pin(async move { Ok(documents.iter().map(|_| score).collect()) })
    }
}

/// LLM fake replaying a script; counts calls.
struct ScriptedLlm {
    responses: Mutex<VecDeque<Result<ChatCompletion, LlmError>>>,
    calls: AtomicUsize,
    /// When the script runs dry, repeat this response.
    fallback: Result<ChatCompletion, LlmError>,
}

impl ScriptedLlm {
    fn new(responses: Vec<Result<ChatCompletion, LlmError>>, fallback: Result<ChatCompletion, LlmError>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
            fallback,
        }
    }

    fn repeating(text: &str, tokens: u64) -> Self {
        Self::new(Vec::new(), ok(text, tokens))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn ok(text: &str, tokens: u64) -> Result<ChatCompletion, LlmError> {
    Ok(ChatCompletion {
        text: text.to_string(),
        tokens_used: tokens,
    })
}

fn clone_response(r: &Result<ChatCompletion, LlmError>) -> Result<ChatCompletion, LlmError> {
    match r {
        Ok(c) => Ok(c.clone()),
        Err(_) => Err(LlmError::Api("scripted failure".into())),
    }
}

impl LlmCaller for ScriptedLlm {
    fn chat<'a>(
        &'a self,
        _system: &'a str,
        _user: &'a str,
        _temperature: f64,
        _max_tokens: u32,
    ) -> Pin<Box<dyn Future<Output = Result<ChatCompletion, LlmError>> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| clone_response(&self.fallback))
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn nestjs_docs() -> Vec<DocumentationResult> {
    vec![
        DocumentationResult {
            content: "Controllers are responsible for handling incoming requests and returning responses to the client.".into(),
            score: 0.9,
            metadata: json!({"section": "controllers"}),
            source: "https://docs.nestjs.com/controllers".into(),
            framework: "NestJS".into(),
        },
        DocumentationResult {
            content: "A controller's purpose is to receive specific requests for the application; the routing mechanism controls which controller receives which requests.".into(),
            score: 0.85,
            metadata: json!({}),
            source: "https://docs.nestjs.com/first-steps".into(),
            framework: "NestJS".into(),
        },
    ]
}

struct Harness {
    service: AgentService,
    semantic_cache: Arc<SemanticCache>,
    supervisor_llm: Arc<ScriptedLlm>,
    code_gen_llm: Arc<ScriptedLlm>,
}

fn harness(
    kv: Arc<dyn KvStore>,
    docs: Vec<DocumentationResult>,
    supervisor_llm: Arc<ScriptedLlm>,
    code_gen_llm: Arc<ScriptedLlm>,
) -> Harness {
    let config = Arc::new(SystemConfig::default());
    let cache_index = Arc::new(MemoryCacheIndex::default());
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder);

    let semantic_cache = Arc::new(SemanticCache::new(
        kv.clone(),
        cache_index,
        config.cache.similarity_threshold,
        config.cache.semantic_ttl_seconds,
    ));

    let reranker = Arc::new(Reranker::new(Arc::new(FlatScores(3.0))));
    let tool_cache = Arc::new(ToolCache::new(kv, config.cache.tool_ttl_seconds));

    let search_agent = Arc::new(DocumentationSearchAgent::new(
        Arc::new(FixedDocs(docs)),
        reranker,
        embedder.clone(),
        tool_cache,
        config.search.self_correction_threshold,
    ));

    let supervisor = Arc::new(SupervisorAgent::new(supervisor_llm.clone()));
    let code_gen_agent = Arc::new(CodeGenAgent::new(
        code_gen_llm.clone(),
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

    let services = Services {
        config,
        embedder,
        semantic_cache: semantic_cache.clone(),
        workflow,
        breakers: Arc::new(CircuitBreakerRegistry::default()),
    };

    Harness {
        service: AgentService::new(services),
        semantic_cache,
        supervisor_llm,
        code_gen_llm,
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_pure_search_request() {
    let h = harness(
        Arc::new(MemoryKv::default()),
        nestjs_docs(),
        Arc::new(ScriptedLlm::repeating("SEARCH_ONLY", 10)),
        Arc::new(ScriptedLlm::repeating("unused", 0)),
    );

    let response = h
        .service
        .process("What is a NestJS controller?", ProcessOptions::default())
        .await
        .unwrap();

    assert!(!response.metadata.cache_hit);
    assert!(response
        .metadata
        .agents_invoked
        .contains(&"supervisor".to_string()));
    assert!(response
        .metadata
        .agents_invoked
        .contains(&"documentation_search".to_string()));
    assert!(!response
        .metadata
        .agents_invoked
        .contains(&"code_gen".to_string()));

    // Numbered excerpt list, not code.
    assert!(response.result.starts_with("Documentation Search Results:"));
    assert!(response.result.contains("1. [NestJS]"));
    assert!(response.result.contains("Source: https://docs.nestjs.com/"));

    // Only the supervisor spent tokens; the code-gen LLM never ran.
    assert_eq!(response.metadata.tokens_used, 10);
    assert_eq!(h.code_gen_llm.calls(), 0);
}

#[tokio::test]
async fn test_cache_hit_short_circuits_workflow() {
    let h = harness(
        Arc::new(MemoryKv::default()),
        nestjs_docs(),
        Arc::new(ScriptedLlm::repeating("SEARCH_ONLY", 10)),
        Arc::new(ScriptedLlm::repeating("unused", 0)),
    );

    let prompt = "What is a NestJS controller?";
    let embedding = hash_vector(prompt);
    assert!(
        h.semantic_cache
            .set(prompt, "A controller handles incoming requests.", &embedding, None)
            .await
    );

    let response = h.service.process(prompt, ProcessOptions::default()).await.unwrap();

    assert!(response.metadata.cache_hit);
    assert_eq!(response.result, "A controller handles incoming requests.");
    assert_eq!(response.metadata.tokens_used, 0);
    assert!(response.metadata.agents_invoked.is_empty());
    assert_eq!(response.metadata.workflow_iterations, 0);
    assert_eq!(h.supervisor_llm.calls(), 0);
}

#[tokio::test]
async fn test_framework_aware_code_generation() {
    let code = "```typescript\nimport { Controller, Post } from '@nestjs/common';\n\n@Controller('auth')\nexport class AuthController {\n  @Post('login')\n  login() {\n    return { token: 'stub' };\n  }\n}\n```";

    let h = harness(
        Arc::new(MemoryKv::default()),
        nestjs_docs(),
        Arc::new(ScriptedLlm::repeating("SEARCH_THEN_CODE", 10)),
        Arc::new(ScriptedLlm::repeating(code, 200)),
    );

    let response = h
        .service
        .process(
            "Create a NestJS controller for user authentication",
            ProcessOptions {
                framework: Some("NestJS".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    for agent in ["supervisor", "documentation_search", "code_gen"] {
        assert!(
            response.metadata.agents_invoked.contains(&agent.to_string()),
            "missing agent {}",
            agent
        );
    }

    assert!(response.result.contains("export class AuthController"));
    assert!(response.result.contains("Language: TypeScript"));
    assert!(response.result.contains("Syntax Valid: true"));
    assert!(response.result.contains("Documentation Sources:"));
    assert!(response.result.contains("https://docs.nestjs.com/"));
    assert_eq!(response.metadata.tokens_used, 210);
    assert_eq!(h.code_gen_llm.calls(), 1);
}

#[tokio::test]
async fn test_syntax_error_feedback_retry() {
    let code_gen_llm = Arc::new(ScriptedLlm::new(
        vec![
            ok("```python\ndef login(user:\n    pass\n```", 80),
            ok("```python\ndef login(user):\n    return user\n```", 70),
        ],
        ok("unused", 0),
    ));

    let h = harness(
        Arc::new(MemoryKv::default()),
        vec![],
        Arc::new(ScriptedLlm::repeating("SEARCH_THEN_CODE", 10)),
        code_gen_llm,
    );

    let response = h
        .service
        .process(
            "Create a FastAPI login endpoint",
            ProcessOptions {
                framework: Some("FastAPI".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // The agent needed exactly two attempts and both are billed.
    assert_eq!(h.code_gen_llm.calls(), 2);
    assert_eq!(response.metadata.tokens_used, 10 + 80 + 70);
    assert!(response.result.contains("Syntax Valid: true"));
    assert!(response.result.contains("def login(user):"));
}

#[tokio::test]
async fn test_loopback_is_bounded_by_max_iterations() {
    // Every attempt produces invalid code: the agent burns its attempts,
    // the workflow cycles back, and the iteration ceiling ends it.
    let h = harness(
        Arc::new(MemoryKv::default()),
        nestjs_docs(),
        Arc::new(ScriptedLlm::repeating("SEARCH_THEN_CODE", 10)),
        Arc::new(ScriptedLlm::repeating("```python\ndef broken(:\n```", 5)),
    );

    let response = h
        .service
        .process("Generate something", ProcessOptions::default())
        .await
        .unwrap();

    assert_eq!(response.metadata.workflow_iterations, 3);
    assert!(response.result.contains("Syntax Valid: false"));
}

#[tokio::test]
async fn test_max_iterations_one_forbids_loopback() {
    let h = harness(
        Arc::new(MemoryKv::default()),
        nestjs_docs(),
        Arc::new(ScriptedLlm::repeating("SEARCH_THEN_CODE", 10)),
        Arc::new(ScriptedLlm::repeating("```python\ndef broken(:\n```", 5)),
    );

    let response = h
        .service
        .process(
            "Generate something",
            ProcessOptions {
                max_iterations: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(response.metadata.workflow_iterations, 1);
}

#[tokio::test]
async fn test_kv_store_down_degrades_gracefully() {
    let h = harness(
        Arc::new(DownKv),
        nestjs_docs(),
        Arc::new(ScriptedLlm::repeating("SEARCH_ONLY", 10)),
        Arc::new(ScriptedLlm::repeating("unused", 0)),
    );

    let response = h
        .service
        .process("What is a NestJS controller?", ProcessOptions::default())
        .await
        .expect("request must survive a dead cache backend");

    assert!(!response.metadata.cache_hit);
    assert!(response.result.starts_with("Documentation Search Results:"));
}

#[tokio::test]
async fn test_supervisor_outage_returns_error_summary() {
    let h = harness(
        Arc::new(MemoryKv::default()),
        nestjs_docs(),
        Arc::new(ScriptedLlm::new(
            vec![Err(LlmError::RateLimited { retry_after: Some(60) })],
            Err(LlmError::Api("down".into())),
        )),
        Arc::new(ScriptedLlm::repeating("unused", 0)),
    );

    let response = h
        .service
        .process("What is a NestJS controller?", ProcessOptions::default())
        .await
        .unwrap();

    // No routing decision: the workflow ends after the supervisor and the
    // result summarizes the recorded errors.
    assert!(response.result.starts_with("Workflow completed with errors:"));
    assert!(response.result.contains("Supervisor error:"));
    assert_eq!(response.metadata.workflow_iterations, 0);
    // The supervisor wrote no output, so no agent gets credited.
    assert!(response.metadata.agents_invoked.is_empty());
}

#[tokio::test]
async fn test_empty_prompt_is_invalid_input() {
    let h = harness(
        Arc::new(MemoryKv::default()),
        vec![],
        Arc::new(ScriptedLlm::repeating("SEARCH_ONLY", 10)),
        Arc::new(ScriptedLlm::repeating("unused", 0)),
    );

    let err = h.service.process("   ", ProcessOptions::default()).await.unwrap_err();
    assert!(matches!(err, DevDocsError::InvalidInput(_)));
    assert_eq!(h.supervisor_llm.calls(), 0);
}

#[tokio::test]
async fn test_oversized_prompt_is_invalid_input() {
    let h = harness(
        Arc::new(MemoryKv::default()),
        vec![],
        Arc::new(ScriptedLlm::repeating("SEARCH_ONLY", 10)),
        Arc::new(ScriptedLlm::repeating("unused", 0)),
    );

    let oversized = "x".repeat(10_001);
    let err = h.service.process(&oversized, ProcessOptions::default()).await.unwrap_err();
    assert!(matches!(err, DevDocsError::InvalidInput(_)));
}

#[tokio::test]
async fn test_code_only_route_skips_search() {
    let h = harness(
        Arc::new(MemoryKv::default()),
        nestjs_docs(),
        Arc::new(ScriptedLlm::repeating("CODE_ONLY", 10)),
        Arc::new(ScriptedLlm::repeating(
            "```python\ndef add(a, b):\n    return a + b\n```",
            40,
        )),
    );

    let response = h
        .service
        .process("Write an add function in python", ProcessOptions::default())
        .await
        .unwrap();

    assert!(!response
        .metadata
        .agents_invoked
        .contains(&"documentation_search".to_string()));
    assert!(response
        .metadata
        .agents_invoked
        .contains(&"code_gen".to_string()));
    assert!(response.result.contains("def add(a, b):"));
}

#[tokio::test]
async fn test_response_is_cached_after_workflow() {
    let h = harness(
        Arc::new(MemoryKv::default()),
        nestjs_docs(),
        Arc::new(ScriptedLlm::repeating("SEARCH_ONLY", 10)),
        Arc::new(ScriptedLlm::repeating("unused", 0)),
    );

    let prompt = "What is a NestJS controller?";
    let first = h.service.process(prompt, ProcessOptions::default()).await.unwrap();
    assert!(!first.metadata.cache_hit);

    // Cache write happens after the response is computed; the second call
    // short-circuits the workflow entirely.
    let second = h.service.process(prompt, ProcessOptions::default()).await.unwrap();
    assert!(second.metadata.cache_hit);
    assert_eq!(second.result, first.result);
    assert_eq!(second.metadata.tokens_used, 0);
}

#[tokio::test]
async fn test_routing_decision_strings_are_closed_set() {
    assert_eq!(RoutingDecision::SearchOnly.as_str(), "SEARCH_ONLY");
    assert_eq!(RoutingDecision::CodeOnly.as_str(), "CODE_ONLY");
    assert_eq!(RoutingDecision::SearchThenCode.as_str(), "SEARCH_THEN_CODE");
}
