use std::sync::Arc;

use devdocs_common::config::{CodeGenConfig, LlmRoleConfig};
use devdocs_common::ids::TraceId;
use devdocs_common::types::{CodeGenerationResult, DocumentationResult, Language};

use crate::agents::syntax_validator::SyntaxValidator;
use crate::llm::LlmCaller;

const BASE_SYSTEM_PROMPT: &str = "You are an expert software engineer specializing in generating high-quality, production-ready code.

Your responsibilities:
1. Generate syntactically correct code that follows language best practices
2. Follow framework-specific conventions and patterns
3. Write clean, readable, and maintainable code
4. Include appropriate comments for complex logic
5. Use proper error handling and validation
6. Follow the framework's recommended project structure

Important guidelines:
- Generate ONLY the code requested, no explanations unless asked
- Ensure all imports and dependencies are included
- Use proper typing/type hints where applicable
- Follow the framework's naming conventions
- Include necessary decorators, annotations, or attributes";

/// Framework-aware code generation with validate-and-feedback retries.
///
/// Each attempt calls the LLM, extracts the code block, and runs the
/// syntax validator; on failure the validator's errors are appended to the
/// user prompt and the attempt repeats, up to `max_retries` extra tries.
/// The result always comes back as a value — an LLM outage after retries
/// produces an empty-code result describing the failure rather than an
/// error.
pub struct CodeGenAgent {
    llm: Arc<dyn LlmCaller>,
    validator: Arc<SyntaxValidator>,
    max_retries: u32,
    fallback_language: String,
    temperature: f64,
    max_tokens: u32,
}

impl CodeGenAgent {
    pub fn new(
        llm: Arc<dyn LlmCaller>,
        validator: Arc<SyntaxValidator>,
        config: &CodeGenConfig,
        role: &LlmRoleConfig,
    ) -> Self {
        Self {
            llm,
            validator,
            max_retries: config.max_retries,
            fallback_language: config.fallback_language.clone(),
            temperature: role.temperature.unwrap_or(0.2),
            max_tokens: role.max_tokens,
        }
    }

    /// Generate code for `prompt`, optionally grounded in documentation
    /// excerpts and targeted at a framework.
    pub async fn generate(
        &self,
        prompt: &str,
        docs: Option<&[DocumentationResult]>,
        framework: Option<&str>,
        trace_id: TraceId,
    ) -> CodeGenerationResult {
        let language = self.detect_language(framework, prompt);
        let system_prompt = build_system_prompt(framework, docs);
        let mut user_prompt = build_user_prompt(prompt, docs);

        let doc_sources: Vec<String> = docs
            .unwrap_or_default()
            .iter()
            .map(|d| d.source.clone())
            .collect();

        let total_attempts = self.max_retries + 1;
        let mut total_tokens = 0u64;
        let mut last_code = String::new();
        let mut last_errors: Vec<String> = Vec::new();

        tracing::info!(
            trace_id = %trace_id,
            framework = framework.unwrap_or("none"),
            language = %language,
            context_count = docs.map(|d| d.len()).unwrap_or(0),
            "Code generation started"
        );

        for attempt in 1..=total_attempts {
            tracing::info!(
                trace_id = %trace_id,
                attempt,
                total_attempts,
                "Code generation attempt"
            );

            let completion = match self
                .llm
                .chat(&system_prompt, &user_prompt, self.temperature, self.max_tokens)
                .await
            {
                Ok(completion) => completion,
                Err(e) => {
                    tracing::error!(
                        trace_id = %trace_id,
                        attempt,
                        error = %e,
                        "LLM call failed during code generation"
                    );
                    if attempt >= total_attempts {
                        return CodeGenerationResult {
                            code: String::new(),
                            language,
                            framework: framework.map(str::to_string),
                            syntax_valid: false,
                            validation_errors: vec![
                                format!("LLM API failed after {} attempts: {}", total_attempts, e),
                                format!("trace_id: {}", trace_id),
                            ],
                            tokens_used: total_tokens,
                            documentation_sources: Vec::new(),
                        };
                    }
                    continue;
                }
            };

            total_tokens += completion.tokens_used;
            let code = extract_code_from_markdown(&completion.text);
            let report = self.validator.validate(&code, &language);

            if report.valid {
                tracing::info!(
                    trace_id = %trace_id,
                    language = %language,
                    total_tokens,
                    attempts = attempt,
                    "Code generation successful"
                );
                metrics::counter!("code_gen.completions", "outcome" => "valid").increment(1);
                metrics::histogram!("code_gen.attempts").record(attempt as f64);

                return CodeGenerationResult {
                    code,
                    language,
                    framework: framework.map(str::to_string),
                    syntax_valid: true,
                    validation_errors: Vec::new(),
                    tokens_used: total_tokens,
                    documentation_sources: doc_sources,
                };
            }

            tracing::warn!(
                trace_id = %trace_id,
                attempt,
                errors = ?report.errors,
                "Syntax validation failed"
            );

            last_code = code;
            last_errors = report.errors;

            if attempt < total_attempts {
                user_prompt = format!(
                    "{}\n\nPrevious attempt had syntax errors:\n{}\n\nPlease fix these errors and generate valid {} code.",
                    user_prompt,
                    last_errors.join("\n"),
                    language
                );
            }
        }

        tracing::error!(
            trace_id = %trace_id,
            errors = ?last_errors,
            "Max retries reached, returning code with syntax errors"
        );
        metrics::counter!("code_gen.completions", "outcome" => "invalid").increment(1);

        CodeGenerationResult {
            code: last_code,
            language,
            framework: framework.map(str::to_string),
            syntax_valid: false,
            validation_errors: last_errors,
            tokens_used: total_tokens,
            documentation_sources: doc_sources,
        }
    }

    /// Infer the target language: the framework table first, then a
    /// keyword scan of the prompt, then the configured fallback.
    fn detect_language(&self, framework: Option<&str>, prompt: &str) -> Language {
        if let Some(framework) = framework {
            if let Some(language) = framework_language(framework) {
                return Language::from_name(language);
            }
        }

        let lowered = prompt.to_lowercase();
        let by_keyword = if ["python", "fastapi", "django", "flask"]
            .iter()
            .any(|kw| lowered.contains(kw))
        {
            Some("Python")
        } else if ["typescript", "nestjs", "angular"]
            .iter()
            .any(|kw| lowered.contains(kw))
        {
            Some("TypeScript")
        } else if ["javascript", "react", "vue", "express", "node"]
            .iter()
            .any(|kw| lowered.contains(kw))
        {
            Some("JavaScript")
        } else if ["java", "spring"].iter().any(|kw| lowered.contains(kw)) {
            Some("Java")
        } else if ["c#", "csharp", ".net", "dotnet"]
            .iter()
            .any(|kw| lowered.contains(kw))
        {
            Some("C#")
        } else {
            None
        };

        Language::from_name(by_keyword.unwrap_or(&self.fallback_language))
    }
}

fn framework_language(framework: &str) -> Option<&'static str> {
    match framework {
        "NestJS" => Some("TypeScript"),
        "React" => Some("JavaScript"),
        "FastAPI" => Some("Python"),
        "Spring Boot" => Some("Java"),
        ".NET Core" => Some("C#"),
        "Vue.js" => Some("JavaScript"),
        "Angular" => Some("TypeScript"),
        "Django" => Some("Python"),
        "Express.js" => Some("JavaScript"),
        _ => None,
    }
}

fn build_system_prompt(framework: Option<&str>, docs: Option<&[DocumentationResult]>) -> String {
    let mut prompt = BASE_SYSTEM_PROMPT.to_string();

    if let Some(framework) = framework {
        prompt.push_str("\n\n");
        prompt.push_str(&framework_guidance(framework));
    }

    if docs.map(|d| !d.is_empty()).unwrap_or(false) {
        prompt.push_str("\n\nYou have access to relevant framework documentation excerpts. Use these as reference for best practices and patterns.");
    }

    prompt
}

/// Curated per-framework guidance appended to the system prompt.
fn framework_guidance(framework: &str) -> String {
    match framework {
        "NestJS" => "Framework: NestJS (TypeScript)
- Use decorators: @Controller(), @Get(), @Post(), @Injectable(), etc.
- Follow dependency injection patterns
- Use proper module structure with @Module()
- Implement DTOs with class-validator decorators
- Use async/await for asynchronous operations
- Follow NestJS naming conventions (e.g., *.controller.ts, *.service.ts)"
            .to_string(),
        "React" => "Framework: React (JavaScript/TypeScript)
- Use functional components with hooks
- Follow React hooks rules (useState, useEffect, useCallback, useMemo)
- Use proper prop types or TypeScript interfaces
- Implement proper component composition
- Follow React naming conventions (PascalCase for components)
- Use modern ES6+ syntax"
            .to_string(),
        "FastAPI" => "Framework: FastAPI (Python)
- Use type hints for all function parameters and returns
- Use Pydantic models for request/response validation
- Implement proper dependency injection with Depends()
- Use async def for asynchronous endpoints
- Follow Python naming conventions (snake_case)
- Include proper HTTP status codes and response models"
            .to_string(),
        "Spring Boot" => "Framework: Spring Boot (Java)
- Use annotations: @RestController, @Service, @Repository, @Autowired
- Follow dependency injection with constructor injection
- Use proper exception handling with @ExceptionHandler
- Implement DTOs and entities separately
- Follow Java naming conventions (camelCase for methods, PascalCase for classes)
- Use Optional for nullable values"
            .to_string(),
        ".NET Core" => "Framework: .NET Core (C#)
- Use attributes: [ApiController], [HttpGet], [HttpPost], etc.
- Follow dependency injection patterns with IServiceCollection
- Use async/await for asynchronous operations
- Implement proper model validation with data annotations
- Follow C# naming conventions (PascalCase for public members)
- Use nullable reference types where appropriate"
            .to_string(),
        "Vue.js" => "Framework: Vue.js (JavaScript/TypeScript)
- Use Composition API with setup() or <script setup>
- Follow Vue 3 patterns with ref, reactive, computed
- Use proper component props and emits
- Implement proper lifecycle hooks
- Follow Vue naming conventions (kebab-case for components in templates)
- Use modern ES6+ syntax"
            .to_string(),
        "Angular" => "Framework: Angular (TypeScript)
- Use decorators: @Component, @Injectable, @Input, @Output
- Follow dependency injection patterns
- Use RxJS observables for async operations
- Implement proper component lifecycle hooks
- Follow Angular naming conventions (*.component.ts, *.service.ts)
- Use TypeScript strict mode"
            .to_string(),
        "Django" => "Framework: Django (Python)
- Use class-based views or function-based views appropriately
- Follow Django ORM patterns for models
- Implement proper URL routing
- Use Django forms or serializers (DRF)
- Follow Python naming conventions (snake_case)
- Include proper middleware and authentication"
            .to_string(),
        "Express.js" => "Framework: Express.js (JavaScript/TypeScript)
- Use middleware patterns properly
- Implement proper route handlers
- Use async/await for asynchronous operations
- Follow RESTful API conventions
- Include proper error handling middleware
- Use modern ES6+ syntax"
            .to_string(),
        other => format!(
            "Framework: {}\n- Follow {} best practices and conventions",
            other, other
        ),
    }
}

fn build_user_prompt(prompt: &str, docs: Option<&[DocumentationResult]>) -> String {
    let Some(docs) = docs.filter(|d| !d.is_empty()) else {
        return prompt.to_string();
    };

    let mut context = String::from("\n\n=== Relevant Documentation ===\n");
    for (i, doc) in docs.iter().take(3).enumerate() {
        context.push_str(&format!(
            "\n[Example {} from {} - {}]\n",
            i + 1,
            doc.framework,
            doc.source
        ));
        let excerpt: String = doc.content.chars().take(500).collect();
        context.push_str(&format!("{}...\n", excerpt));
    }
    context.push_str("\n=== End Documentation ===\n\n");
    context.push_str("Based on the documentation above, please generate the requested code:\n\n");
    context.push_str(prompt);
    context
}

/// Extract code from a markdown response. Fenced blocks win; a leading
/// language-tag line inside the fence is stripped.
fn extract_code_from_markdown(text: &str) -> String {
    if !text.contains("```") {
        return text.trim().to_string();
    }

    let parts: Vec<&str> = text.split("```").collect();
    if parts.len() < 3 {
        return text.trim().to_string();
    }

    let block = parts[1];
    let mut lines = block.lines();
    let first_line = lines.next().unwrap_or_default();

    let looks_like_language_tag = !first_line.trim().is_empty()
        && !first_line
            .chars()
            .any(|c| matches!(c, '{' | '}' | '(' | ')' | ';'));

    if looks_like_language_tag {
        lines.collect::<Vec<_>>().join("\n").trim().to_string()
    } else {
        block.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatCompletion, LlmError};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    /// LlmCaller fake replaying a script of responses and recording the
    /// prompts it was asked with.
    struct ScriptedLlm {
        responses: Mutex<VecDeque<Result<ChatCompletion, LlmError>>>,
        user_prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<Result<ChatCompletion, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                user_prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.user_prompts.lock().unwrap().len()
        }
    }

    impl LlmCaller for ScriptedLlm {
        fn chat<'a>(
            &'a self,
            _system: &'a str,
            user: &'a str,
            _temperature: f64,
            _max_tokens: u32,
        ) -> Pin<Box<dyn Future<Output = Result<ChatCompletion, LlmError>> + Send + 'a>> {
            self.user_prompts.lock().unwrap().push(user.to_string());
            Box::pin(async move {
                self.responses
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Err(LlmError::Api("script exhausted".into())))
            })
        }
    }

    fn ok(text: &str, tokens: u64) -> Result<ChatCompletion, LlmError> {
        Ok(ChatCompletion {
            text: text.to_string(),
            tokens_used: tokens,
        })
    }

    fn agent_with(llm: Arc<ScriptedLlm>) -> CodeGenAgent {
        CodeGenAgent::new(
            llm,
            Arc::new(SyntaxValidator::new()),
            &CodeGenConfig::default(),
            &LlmRoleConfig {
                provider: "openai".into(),
                model: "gpt-4".into(),
                max_tokens: 2000,
                temperature: Some(0.2),
                base_url: None,
                api_key_env: None,
            },
        )
    }

    fn doc(content: &str, source: &str) -> DocumentationResult {
        DocumentationResult {
            content: content.to_string(),
            score: 0.9,
            metadata: json!({}),
            source: source.to_string(),
            framework: "FastAPI".to_string(),
        }
    }

    #[tokio::test]
    async fn test_first_attempt_valid() {
        let llm = Arc::new(ScriptedLlm::new(vec![ok(
            "```python\ndef handler():\n    return {\"ok\": True}\n```",
            100,
        )]));
        let agent = agent_with(llm.clone());

        let result = agent
            .generate("Create a FastAPI handler", None, Some("FastAPI"), TraceId::new())
            .await;

        assert!(result.syntax_valid);
        assert_eq!(result.language, Language::Python);
        assert_eq!(result.tokens_used, 100);
        assert_eq!(llm.calls(), 1);
        assert!(result.code.starts_with("def handler()"));
    }

    #[tokio::test]
    async fn test_invalid_then_valid_sums_tokens_and_feeds_back_errors() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            ok("```python\ndef broken(:\n    pass\n```", 80),
            ok("```python\ndef fixed():\n    pass\n```", 70),
        ]));
        let agent = agent_with(llm.clone());

        let result = agent
            .generate("Create a FastAPI handler", None, Some("FastAPI"), TraceId::new())
            .await;

        assert!(result.syntax_valid);
        // Tokens from both attempts are counted.
        assert_eq!(result.tokens_used, 150);
        assert_eq!(llm.calls(), 2);

        // The second prompt carries the first attempt's validator output.
        let prompts = llm.user_prompts.lock().unwrap();
        assert!(prompts[1].contains("Previous attempt had syntax errors:"));
        assert!(prompts[1].contains("SyntaxError"));
        assert!(prompts[1].contains("generate valid Python code"));
    }

    #[tokio::test]
    async fn test_all_attempts_invalid_returns_last_code() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            ok("```python\ndef a(:\n```", 10),
            ok("```python\ndef b(:\n```", 20),
            ok("```python\ndef c(:\n```", 30),
        ]));
        let agent = agent_with(llm.clone());

        let result = agent
            .generate("broken forever", None, Some("FastAPI"), TraceId::new())
            .await;

        assert!(!result.syntax_valid);
        assert!(!result.validation_errors.is_empty());
        assert!(result.code.contains("def c"));
        assert_eq!(result.tokens_used, 60);
        // max_retries = 2 → exactly 3 attempts.
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_llm_outage_returns_result_not_error() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Err(LlmError::RateLimited { retry_after: None }),
            Err(LlmError::RateLimited { retry_after: None }),
            Err(LlmError::RateLimited { retry_after: None }),
        ]));
        let agent = agent_with(llm);

        let result = agent
            .generate("anything", None, Some("FastAPI"), TraceId::new())
            .await;

        assert!(!result.syntax_valid);
        assert!(result.code.is_empty());
        assert!(result.validation_errors[0].contains("LLM API failed after 3 attempts"));
        assert!(result.validation_errors[1].starts_with("trace_id:"));
    }

    #[tokio::test]
    async fn test_documentation_context_rendered_into_prompt() {
        let llm = Arc::new(ScriptedLlm::new(vec![ok(
            "```python\ndef handler():\n    pass\n```",
            50,
        )]));
        let agent = agent_with(llm.clone());

        let long_doc = "x".repeat(600);
        let docs = vec![
            doc(&long_doc, "https://docs.example.com/1"),
            doc("short", "https://docs.example.com/2"),
            doc("short", "https://docs.example.com/3"),
            doc("short", "https://docs.example.com/4"),
        ];

        let result = agent
            .generate("Create a handler", Some(&docs), Some("FastAPI"), TraceId::new())
            .await;

        let prompts = llm.user_prompts.lock().unwrap();
        assert!(prompts[0].contains("=== Relevant Documentation ==="));
        // Top 3 excerpts only, each capped at 500 chars.
        assert!(prompts[0].contains("[Example 3"));
        assert!(!prompts[0].contains("[Example 4"));
        assert!(!prompts[0].contains(&"x".repeat(501)));

        // All context sources are reported, not just the top 3.
        assert_eq!(result.documentation_sources.len(), 4);
    }

    #[test]
    fn test_language_from_framework_table() {
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let agent = agent_with(llm);

        assert_eq!(agent.detect_language(Some("NestJS"), ""), Language::TypeScript);
        assert_eq!(agent.detect_language(Some(".NET Core"), ""), Language::CSharp);
        assert_eq!(agent.detect_language(Some("Django"), ""), Language::Python);
    }

    #[test]
    fn test_language_from_prompt_keywords() {
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let agent = agent_with(llm);

        assert_eq!(
            agent.detect_language(None, "write a flask view"),
            Language::Python
        );
        assert_eq!(
            agent.detect_language(None, "an express middleware"),
            Language::JavaScript
        );
        // "javascript" must not be caught by the Java scan.
        assert_eq!(
            agent.detect_language(None, "plain javascript helper"),
            Language::JavaScript
        );
        assert_eq!(
            agent.detect_language(None, "spring data repository"),
            Language::Java
        );
    }

    #[test]
    fn test_language_fallback() {
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let agent = agent_with(llm);
        assert_eq!(agent.detect_language(None, "sort a list"), Language::Python);
    }

    #[test]
    fn test_extract_fenced_code_with_language_tag() {
        let text = "Here you go:\n```typescript\nconst x = 1;\n```\nEnjoy.";
        assert_eq!(extract_code_from_markdown(text), "const x = 1;");
    }

    #[test]
    fn test_extract_fenced_code_without_language_tag() {
        let text = "```\nconst x = 1;\n```";
        assert_eq!(extract_code_from_markdown(text), "const x = 1;");
    }

    #[test]
    fn test_extract_without_fence_returns_trimmed_text() {
        assert_eq!(extract_code_from_markdown("  const x = 1;  "), "const x = 1;");
    }
}
