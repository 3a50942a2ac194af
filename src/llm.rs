//! Generative Reasoning Service boundary.
//!
//! Every pipeline stage talks to the model through [`ReasoningService`]:
//! a structured instruction plus a named target schema in, a parsed JSON
//! value out. The production implementation speaks an Anthropic-compatible
//! `/v1/messages` API. Transport failures map onto the engine error
//! taxonomy; `generate_with_retry` adds bounded exponential backoff over
//! the retryable subset.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{ReasoningConfig, RetryPolicy};
use crate::error::EngineError;

/// Named response contract for a structured-generation request. The client
/// embeds the matching JSON shape in the prompt; stages parse against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSchema {
    /// `{"agents": [{role_title, domain, stance_bias, expertise_keywords}]}`
    Council,
    /// `{"statement": "...", "rebuts_agent_id": "..." | null}`
    DebateTurn,
    /// `{"scenarios": [...], "synthesis": "...", "black_swan_alert": "..." | null}`
    Synthesis,
    /// `{"event": "..."}`
    ChaosEvent,
}

impl TargetSchema {
    /// Prompt fragment describing the expected JSON shape.
    pub fn contract(&self) -> &'static str {
        match self {
            TargetSchema::Council => {
                r#"Respond with JSON only:
{
  "agents": [
    {
      "role_title": "specific expertise, e.g. Supply Chain Analyst",
      "domain": "field the expert works in",
      "stance_bias": "strategic stance, e.g. Risk-Averse, Disruptive",
      "expertise_keywords": ["keyword", "keyword"]
    }
  ]
}"#
            }
            TargetSchema::DebateTurn => {
                r#"Respond with JSON only:
{
  "statement": "your position in 2-4 sentences",
  "rebuts_agent_id": "id of the agent you are rebutting, or null for an opening statement"
}"#
            }
            TargetSchema::Synthesis => {
                r#"Respond with JSON only:
{
  "scenarios": [
    {
      "title": "short, punchy title",
      "narrative": "what happens and why",
      "assumptions": ["explicit assumption"],
      "rejected_alternatives": ["path considered and discarded"],
      "time_horizon": "Short Term (0-6m), Mid Term (1-2y), or Long Term (5y+)",
      "is_chaos_variant": false,
      "metrics": {
        "probability": 0.0,
        "impact_score": 0.0,
        "data_confidence": 0.0,
        "assumption_stability": 0.0
      }
    }
  ],
  "synthesis": "council-level summary of the debate outcome",
  "black_swan_alert": "low-probability high-impact event detected, or null"
}
All metric values must lie within [0, 1]."#
            }
            TargetSchema::ChaosEvent => {
                r#"Respond with JSON only:
{
  "event": "one rare, high-impact, domain-plausible disruption in 1-2 sentences"
}"#
            }
        }
    }
}

/// One structured-generation request.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    /// Instruction text for this stage.
    pub instruction: String,
    /// Prior structured context (transcript, node chain), already rendered.
    pub context: Option<String>,
    /// Response contract the reply must satisfy.
    pub schema: TargetSchema,
}

impl StructuredRequest {
    pub fn new(instruction: impl Into<String>, schema: TargetSchema) -> Self {
        Self {
            instruction: instruction.into(),
            context: None,
            schema,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Structured-generation seam between the engine and the model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Issue one request; returns the parsed JSON payload or a typed failure.
    async fn generate(&self, request: &StructuredRequest) -> Result<Value, EngineError>;
}

/// Issue a request through `service`, retrying the retryable failure subset
/// with exponential backoff, up to `policy.max_attempts` total attempts.
pub async fn generate_with_retry(
    service: &dyn ReasoningService,
    request: &StructuredRequest,
    policy: &RetryPolicy,
) -> Result<Value, EngineError> {
    let attempts = policy.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = policy.base_delay_ms.saturating_mul(1 << (attempt - 1));
            warn!(attempt = attempt, delay_ms = delay, "retrying service call");
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        match service.generate(request).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => last_err = Some(e),
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or(EngineError::ServiceError(
        "service call failed with no attempts".into(),
    )))
}

/// Reasoning client for an Anthropic-compatible messages API.
pub struct LLMClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    system: Option<String>,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
    msg: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

impl LLMClient {
    /// Create a new reasoning client
    pub fn new(config: &ReasoningConfig) -> Result<Self, EngineError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout,
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("LLM_BASE_URL").ok()?;
        let api_key = std::env::var("LLM_API_KEY").ok()?;
        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "glm-4.7".to_string());

        let config = ReasoningConfig {
            base_url,
            api_key,
            model,
            max_tokens: 4096,
            timeout_secs: 120,
            retry: RetryPolicy::default(),
        };
        Self::new(&config).ok()
    }

    fn build_prompt(request: &StructuredRequest) -> String {
        let mut prompt = request.instruction.clone();
        if let Some(ref context) = request.context {
            prompt.push_str("\n\nCONTEXT:\n");
            prompt.push_str(context);
        }
        prompt.push_str("\n\n");
        prompt.push_str(request.schema.contract());
        prompt
    }
}

#[async_trait]
impl ReasoningService for LLMClient {
    async fn generate(&self, request: &StructuredRequest) -> Result<Value, EngineError> {
        let url = format!("{}/v1/messages", self.base_url);
        let prompt = Self::build_prompt(request);

        let body = ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: None,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
        };

        info!(
            model = %self.model,
            schema = ?request.schema,
            prompt_length = body.messages[0].content.len(),
            "sending reasoning request"
        );

        let send = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| EngineError::ServiceTimeout(self.timeout))?
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::ServiceTimeout(self.timeout)
                } else {
                    EngineError::ServiceError(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| EngineError::ServiceError(e.to_string()))?;

        if status.as_u16() == 429 {
            return Err(EngineError::RateLimited);
        }
        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<ErrorResponse>(&text) {
                let msg = err
                    .msg
                    .or_else(|| err.error.and_then(|e| e.message))
                    .unwrap_or_else(|| "unknown error".to_string());
                return Err(EngineError::ServiceError(format!("{}: {}", status, msg)));
            }
            return Err(EngineError::ServiceError(format!("{}: {}", status, text)));
        }

        let chat_response: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| EngineError::MalformedOutput(format!("bad response envelope: {}", e)))?;

        let content = chat_response
            .content
            .iter()
            .filter_map(|block| {
                if block.content_type == "text" {
                    block.text.clone()
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("");

        if let Some(usage) = chat_response.usage {
            info!(
                model = %self.model,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "reasoning response received"
            );
        }

        let json_str = extract_json(&content);
        serde_json::from_str(&json_str)
            .map_err(|e| EngineError::MalformedOutput(format!("reply is not valid JSON: {}", e)))
    }
}

/// Extract a JSON object from a reply that may wrap it in prose or fences.
pub fn extract_json(content: &str) -> String {
    let trimmed = content.trim();

    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        if let Some(end) = trimmed[start + 7..].find("```") {
            return trimmed[start + 7..start + 7 + end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            return trimmed[start..=end].to_string();
        }
    }

    trimmed.to_string()
}
