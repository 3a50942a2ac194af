//! Visual Grounding Service boundary. An image goes in, a plain-text
//! summary comes out; downstream stages only ever see the text.

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::info;

use crate::config::VisionConfig;
use crate::error::EngineError;

/// Image-to-text seam for grounding simulations in visual input.
#[async_trait]
pub trait VisionService: Send + Sync {
    /// Describe the image; `hint` steers the summary when present.
    async fn describe(&self, image: &[u8], hint: Option<&str>) -> Result<String, EngineError>;
}

/// Grounding client for an Anthropic-compatible messages API.
pub struct GroundingClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct VisionRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<VisionMessage>,
}

#[derive(Debug, Serialize)]
struct VisionMessage {
    role: String,
    content: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct VisionResponse {
    content: Vec<VisionContentBlock>,
}

#[derive(Debug, Deserialize)]
struct VisionContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

impl GroundingClient {
    pub fn new(config: &VisionConfig) -> Result<Self, EngineError> {
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
            timeout,
        })
    }

    fn build_content(image: &[u8], hint: Option<&str>) -> Vec<Value> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let mut content = vec![serde_json::json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": detect_media_type(image),
                "data": encoded,
            }
        })];
        let instruction = match hint {
            Some(hint) => format!(
                "Describe this image as input for a strategic simulation. Focus on: {}",
                hint
            ),
            None => "Describe this image as input for a strategic simulation. \
                     Summarize the visible data, trends and anomalies in plain text."
                .to_string(),
        };
        content.push(serde_json::json!({"type": "text", "text": instruction}));
        content
    }
}

/// Sniff the media type from magic bytes; the API rejects mismatches.
fn detect_media_type(image: &[u8]) -> &'static str {
    if image.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if image.starts_with(&[0xFF, 0xD8]) {
        "image/jpeg"
    } else {
        "image/png"
    }
}

#[async_trait]
impl VisionService for GroundingClient {
    async fn describe(&self, image: &[u8], hint: Option<&str>) -> Result<String, EngineError> {
        let url = format!("{}/v1/messages", self.base_url);

        let body = VisionRequest {
            model: self.model.clone(),
            max_tokens: 1024,
            messages: vec![VisionMessage {
                role: "user".to_string(),
                content: Self::build_content(image, hint),
            }],
        };

        info!(model = %self.model, image_bytes = image.len(), "sending grounding request");

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
            .map_err(|e| EngineError::ServiceError(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(EngineError::RateLimited);
        }
        let text = response
            .text()
            .await
            .map_err(|e| EngineError::ServiceError(e.to_string()))?;
        if !status.is_success() {
            return Err(EngineError::ServiceError(format!("{}: {}", status, text)));
        }

        let parsed: VisionResponse = serde_json::from_str(&text)
            .map_err(|e| EngineError::MalformedOutput(format!("bad response envelope: {}", e)))?;

        let summary = parsed
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

        if summary.trim().is_empty() {
            return Err(EngineError::MalformedOutput(
                "grounding reply contained no text".into(),
            ));
        }
        Ok(summary)
    }
}
