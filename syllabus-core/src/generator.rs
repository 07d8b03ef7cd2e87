//! Answer generation over the Anthropic Messages API.
//!
//! The generator receives the user query, the retrieved course chunks and the
//! recent conversation, and returns the model's answer. When the caller hands
//! it a `ToolExecutor`, the model may call course tools for up to
//! `max_tool_rounds` sequential rounds before a final call with tool use
//! disabled.
//! Failures are returned as `GenerationError`; nothing is retried here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::GenerationError;
use crate::models::session::format_history;
use crate::models::{ScoredChunk, Turn};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

const SYSTEM_PROMPT: &str = "You are an assistant for course materials and educational content.

Course material relevant to the question is included with the question when available.
You may also have tools:
- search_course_content: search within course materials, optionally restricted to one course
- get_course_outline: course title, link and the numbered list of lessons

Guidelines:
- Use the outline tool for questions about course structure or lesson lists
- Use the search tool when the provided material does not cover the question
- You may use up to two tools in sequence for questions that need it
- If a tool returns nothing relevant, say so plainly
- Answer general knowledge questions directly

Answers must be brief, accurate and well formatted. Give only the answer, without
describing your search process. For outlines, give the course title, its link, and
each lesson with its number and title.";

// ============================================================================
// Traits
// ============================================================================

pub struct GenerationRequest<'a> {
    pub query: &'a str,
    /// Retrieved chunks, most similar first.
    pub context: &'a [ScoredChunk],
    /// Recent conversation, oldest first.
    pub history: &'a [Turn],
    pub tools: Option<&'a dyn ToolExecutor>,
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, GenerationError>;

    fn name(&self) -> &str;
}

/// Tool description in the Messages API shape.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Errors are reported back to the model as the tool result.
    async fn execute(&self, name: &str, input: &Value) -> anyhow::Result<String>;
}

// ============================================================================
// Anthropic client
// ============================================================================

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_tool_rounds: u32,
    pub timeout: Duration,
}

impl AnthropicConfig {
    /// Reads `ANTHROPIC_API_KEY` from the environment.
    pub fn from_settings(settings: &crate::config::GenerationConfig) -> Self {
        Self {
            api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            max_tool_rounds: settings.max_tool_rounds,
            timeout: Duration::from_secs(settings.timeout_seconds),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicGenerator {
    client: Client,
    config: AnthropicConfig,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<Value>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl MessagesResponse {
    fn blocks(&self) -> impl Iterator<Item = ContentBlock> + '_ {
        self.content
            .iter()
            .filter_map(|v| serde_json::from_value::<ContentBlock>(v.clone()).ok())
    }

    fn first_text(&self) -> Result<String, GenerationError> {
        self.blocks()
            .find_map(|b| match b {
                ContentBlock::Text { text } => Some(text),
                _ => None,
            })
            .ok_or(GenerationError::NoText)
    }

    fn wants_tools(&self) -> bool {
        self.stop_reason.as_deref() == Some("tool_use")
    }
}

impl AnthropicGenerator {
    pub fn new(config: AnthropicConfig) -> Result<Self, GenerationError> {
        Self::with_base_url(config, ANTHROPIC_API_URL.to_string())
    }

    /// Create a generator against a custom base URL (for testing / proxies)
    pub fn with_base_url(config: AnthropicConfig, base_url: String) -> Result<Self, GenerationError> {
        if config.api_key.is_empty() {
            return Err(GenerationError::MissingApiKey);
        }
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    async fn call(
        &self,
        system: &str,
        messages: &[Value],
        tools: Option<&[ToolDefinition]>,
        tool_choice: &str,
    ) -> Result<MessagesResponse, GenerationError> {
        let mut body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "system": system,
            "messages": messages,
        });
        if let Some(tools) = tools {
            body["tools"] = json!(tools);
            body["tool_choice"] = json!({"type": tool_choice});
        }

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .map(|e| e.error.message)
                .unwrap_or(error_body);
            tracing::error!(status = status.as_u16(), message = %message, "Anthropic API error");
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| GenerationError::Malformed(e.to_string()))
    }
}

/// Runs every tool_use block of a response; returns the `tool_result` blocks.
async fn run_tool_round(executor: &dyn ToolExecutor, response: &MessagesResponse) -> Vec<Value> {
    let mut results = Vec::new();
    for block in response.blocks() {
        let ContentBlock::ToolUse { id, name, input } = block else {
            continue;
        };
        let content = match executor.execute(&name, &input).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "Tool execution failed");
                format!("Error executing tool: {e}")
            }
        };
        results.push(json!({
            "type": "tool_result",
            "tool_use_id": id,
            "content": content,
        }));
    }
    results
}

fn system_prompt(history: &[Turn]) -> String {
    if history.is_empty() {
        SYSTEM_PROMPT.to_string()
    } else {
        format!(
            "{SYSTEM_PROMPT}\n\nPrevious conversation:\n{}",
            format_history(history)
        )
    }
}

fn user_message(query: &str, context: &[ScoredChunk]) -> String {
    if context.is_empty() {
        return query.to_string();
    }
    let mut out = String::from("Relevant course material:\n");
    for (i, scored) in context.iter().enumerate() {
        out.push_str(&format!(
            "\n[{}] {} (part {}):\n{}\n",
            i + 1,
            scored.chunk.source_id,
            scored.chunk.sequence_index + 1,
            scored.chunk.text
        ));
    }
    out.push_str(&format!("\nQuestion: {query}"));
    out
}

#[async_trait]
impl Generator for AnthropicGenerator {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, GenerationError> {
        let system = system_prompt(request.history);
        let mut messages = vec![json!({
            "role": "user",
            "content": user_message(request.query, request.context),
        })];

        let tools = request
            .tools
            .map(|executor| (executor, executor.definitions()))
            .filter(|(_, defs)| !defs.is_empty());

        let defs = tools.as_ref().map(|(_, defs)| defs.as_slice());
        let mut rounds = 0;
        while rounds < self.config.max_tool_rounds {
            let response = self.call(&system, &messages, defs, "auto").await?;

            let executor = match &tools {
                Some((executor, _)) if response.wants_tools() => *executor,
                _ => return response.first_text(),
            };

            let results = run_tool_round(executor, &response).await;
            if results.is_empty() {
                return response.first_text();
            }
            messages.push(json!({"role": "assistant", "content": response.content}));
            messages.push(json!({"role": "user", "content": results}));
            rounds += 1;
            tracing::debug!(round = rounds, "Tool round completed");
        }

        // Round budget spent. The history holds tool blocks, so the tools stay
        // declared but may not be called.
        self.call(&system, &messages, defs, "none").await?.first_text()
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use std::sync::Mutex;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(max_tool_rounds: u32) -> AnthropicConfig {
        AnthropicConfig {
            api_key: "test-key".to_string(),
            model: "test-model".to_string(),
            max_tokens: 800,
            temperature: 0.0,
            max_tool_rounds,
            timeout: Duration::from_secs(5),
        }
    }

    fn text_response(text: &str) -> Value {
        json!({
            "content": [{"type": "text", "text": text}],
            "stop_reason": "end_turn"
        })
    }

    fn tool_response(id: &str, name: &str, input: Value) -> Value {
        json!({
            "content": [{"type": "tool_use", "id": id, "name": name, "input": input}],
            "stop_reason": "tool_use"
        })
    }

    async fn mount_once(server: &MockServer, body: Value) {
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .up_to_n_times(1)
            .mount(server)
            .await;
    }

    async fn request_bodies(server: &MockServer) -> Vec<Value> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }

    /// Records calls and replays scripted outputs.
    struct ScriptedTools {
        outputs: Mutex<Vec<anyhow::Result<String>>>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedTools {
        fn new(outputs: Vec<anyhow::Result<String>>) -> Self {
            Self {
                outputs: Mutex::new(outputs),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ToolExecutor for ScriptedTools {
        fn definitions(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition {
                name: "search_course_content".to_string(),
                description: "Search course materials".to_string(),
                input_schema: json!({"type": "object"}),
            }]
        }

        async fn execute(&self, name: &str, input: &Value) -> anyhow::Result<String> {
            self.calls.lock().unwrap().push((name.to_string(), input.clone()));
            let mut outputs = self.outputs.lock().unwrap();
            if outputs.is_empty() {
                Ok("no output".to_string())
            } else {
                outputs.remove(0)
            }
        }
    }

    fn request<'a>(query: &'a str, tools: Option<&'a dyn ToolExecutor>) -> GenerationRequest<'a> {
        GenerationRequest {
            query,
            context: &[],
            history: &[],
            tools,
        }
    }

    #[tokio::test]
    async fn test_direct_answer_without_tools() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response("Direct answer")))
            .expect(1)
            .mount(&server)
            .await;

        let generator = AnthropicGenerator::with_base_url(test_config(2), server.uri()).unwrap();
        let answer = generator.generate(request("What is Python?", None)).await.unwrap();
        assert_eq!(answer, "Direct answer");

        let bodies = request_bodies(&server).await;
        assert!(bodies[0].get("tools").is_none(), "no tools without an executor");
        assert_eq!(bodies[0]["max_tokens"], 800);
        assert_eq!(bodies[0]["temperature"], 0.0);
        assert_eq!(bodies[0]["model"], "test-model");
    }

    #[tokio::test]
    async fn test_history_goes_into_system_prompt() {
        let server = MockServer::start().await;
        mount_once(&server, text_response("Answer with context")).await;

        let generator = AnthropicGenerator::with_base_url(test_config(2), server.uri()).unwrap();
        let history = vec![Turn::user("What is Python?"), Turn::assistant("A programming language")];
        generator
            .generate(GenerationRequest {
                query: "Follow-up question",
                context: &[],
                history: &history,
                tools: None,
            })
            .await
            .unwrap();

        let system = request_bodies(&server).await[0]["system"].as_str().unwrap().to_string();
        assert!(system.contains("Previous conversation:\nUser: What is Python?\nAssistant: A programming language"));
    }

    #[tokio::test]
    async fn test_context_rendered_before_question() {
        let server = MockServer::start().await;
        mount_once(&server, text_response("ok")).await;

        let generator = AnthropicGenerator::with_base_url(test_config(2), server.uri()).unwrap();
        let context = vec![ScoredChunk {
            chunk: Chunk::new("Closures capture variables.", "Rust Basics", 3),
            score: 0.9,
        }];
        generator
            .generate(GenerationRequest {
                query: "What is a closure?",
                context: &context,
                history: &[],
                tools: None,
            })
            .await
            .unwrap();

        let body = &request_bodies(&server).await[0];
        let content = body["messages"][0]["content"].as_str().unwrap();
        assert!(content.starts_with("Relevant course material:"));
        assert!(content.contains("[1] Rust Basics (part 4):\nClosures capture variables."));
        assert!(content.ends_with("Question: What is a closure?"));
        assert!(!body["system"].as_str().unwrap().contains("Previous conversation"));
    }

    #[tokio::test]
    async fn test_single_tool_round_then_answer() {
        let server = MockServer::start().await;
        mount_once(&server, tool_response("tool_1", "search_course_content", json!({"query": "python basics"}))).await;
        mount_once(&server, text_response("Here are the Python basics...")).await;

        let tools = ScriptedTools::new(vec![Ok("Found: Python fundamentals lesson".into())]);
        let generator = AnthropicGenerator::with_base_url(test_config(2), server.uri()).unwrap();
        let answer = generator.generate(request("Find Python basics", Some(&tools))).await.unwrap();

        assert_eq!(answer, "Here are the Python basics...");
        assert_eq!(
            tools.calls(),
            vec![("search_course_content".to_string(), json!({"query": "python basics"}))]
        );
        let bodies = request_bodies(&server).await;
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0]["tool_choice"], json!({"type": "auto"}));
        let tool_result = &bodies[1]["messages"][2]["content"][0];
        assert_eq!(tool_result["type"], "tool_result");
        assert_eq!(tool_result["tool_use_id"], "tool_1");
        assert_eq!(tool_result["content"], "Found: Python fundamentals lesson");
    }

    #[tokio::test]
    async fn test_two_sequential_rounds_accumulate_messages() {
        let server = MockServer::start().await;
        mount_once(&server, tool_response("tool_1", "get_course_outline", json!({"course_name": "Math"}))).await;
        mount_once(&server, tool_response("tool_2", "search_course_content", json!({"query": "calculus"}))).await;
        mount_once(&server, text_response("Final response")).await;

        let tools = ScriptedTools::new(vec![Ok("Outline data".into()), Ok("Search data".into())]);
        let generator = AnthropicGenerator::with_base_url(test_config(2), server.uri()).unwrap();
        let answer = generator
            .generate(request("Find calculus in Math course", Some(&tools)))
            .await
            .unwrap();

        assert_eq!(answer, "Final response");
        let counts: Vec<usize> = request_bodies(&server)
            .await
            .iter()
            .map(|b| b["messages"].as_array().unwrap().len())
            .collect();
        assert_eq!(counts, vec![1, 3, 5]);
        assert_eq!(tools.calls()[1].0, "search_course_content");
    }

    #[tokio::test]
    async fn test_round_budget_disables_tools_on_final_call() {
        let server = MockServer::start().await;
        mount_once(&server, tool_response("t1", "search_course_content", json!({"query": "a"}))).await;
        mount_once(&server, tool_response("t2", "search_course_content", json!({"query": "b"}))).await;
        mount_once(&server, text_response("Final answer after max rounds")).await;

        let tools = ScriptedTools::new(vec![]);
        let generator = AnthropicGenerator::with_base_url(test_config(2), server.uri()).unwrap();
        let answer = generator.generate(request("Complex query", Some(&tools))).await.unwrap();

        assert_eq!(answer, "Final answer after max rounds");
        assert_eq!(tools.calls().len(), 2);
        let bodies = request_bodies(&server).await;
        assert_eq!(bodies.len(), 3);
        assert_eq!(bodies[2]["tools"], bodies[0]["tools"]);
        assert_eq!(bodies[2]["tool_choice"], json!({"type": "none"}));
        assert_eq!(bodies[1]["tool_choice"], json!({"type": "auto"}));
    }

    #[tokio::test]
    async fn test_tool_failure_is_reported_to_model() {
        let server = MockServer::start().await;
        mount_once(&server, tool_response("tool_1", "search_course_content", json!({"query": "x"}))).await;
        mount_once(&server, text_response("I encountered an error but here's what I know...")).await;

        let tools = ScriptedTools::new(vec![Err(anyhow::anyhow!("Tool execution failed"))]);
        let generator = AnthropicGenerator::with_base_url(test_config(2), server.uri()).unwrap();
        let answer = generator.generate(request("Search for something", Some(&tools))).await.unwrap();

        assert_eq!(answer, "I encountered an error but here's what I know...");
        let bodies = request_bodies(&server).await;
        assert_eq!(
            bodies[1]["messages"][2]["content"][0]["content"],
            "Error executing tool: Tool execution failed"
        );
    }

    #[tokio::test]
    async fn test_api_error_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_json(json!({
                "type": "error",
                "error": {"type": "overloaded_error", "message": "Overloaded"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tools = ScriptedTools::new(vec![]);
        let generator = AnthropicGenerator::with_base_url(test_config(2), server.uri()).unwrap();
        match generator.generate(request("Test query", Some(&tools))).await {
            Err(GenerationError::Api { status, message }) => {
                assert_eq!(status, 529);
                assert_eq!(message, "Overloaded");
            }
            other => panic!("Expected Api error, got {other:?}"),
        }
        assert!(tools.calls().is_empty());
    }

    #[tokio::test]
    async fn test_response_without_text_is_an_error() {
        let server = MockServer::start().await;
        mount_once(&server, json!({"content": [], "stop_reason": "end_turn"})).await;

        let generator = AnthropicGenerator::with_base_url(test_config(2), server.uri()).unwrap();
        let result = generator.generate(request("q", None)).await;
        assert!(matches!(result, Err(GenerationError::NoText)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let generator = AnthropicGenerator::with_base_url(test_config(2), server.uri()).unwrap();
        let result = generator.generate(request("q", None)).await;
        assert!(matches!(result, Err(GenerationError::Malformed(_))));
    }

    #[test]
    fn test_missing_api_key() {
        let mut config = test_config(2);
        config.api_key.clear();
        assert!(matches!(
            AnthropicGenerator::new(config),
            Err(GenerationError::MissingApiKey)
        ));
    }
}
