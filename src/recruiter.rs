//! Derives a council of domain-expert personas from the current context.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{EngineConfig, RetryPolicy};
use crate::error::EngineError;
use crate::llm::{generate_with_retry, ReasoningService, StructuredRequest, TargetSchema};
use crate::schema::{self, AgentProfile};

/// Recruits a fresh council per simulation root or expansion.
pub struct Recruiter {
    service: Arc<dyn ReasoningService>,
    retry: RetryPolicy,
    recruit_retries: u32,
}

impl Recruiter {
    pub fn new(service: Arc<dyn ReasoningService>, engine: &EngineConfig, retry: RetryPolicy) -> Self {
        Self {
            service,
            retry,
            recruit_retries: engine.recruit_retries,
        }
    }

    /// Recruit `council_size` distinct, topically relevant expert personas.
    ///
    /// `council_size` below 2 is a configuration error and fails before any
    /// service call. A response with too few valid profiles or duplicate
    /// role titles fails the attempt; the request is regenerated up to the
    /// configured bound, then `InsufficientCouncil` is surfaced.
    pub async fn recruit(
        &self,
        context: &str,
        image_summary: Option<&str>,
        council_size: usize,
    ) -> Result<Vec<AgentProfile>, EngineError> {
        if context.trim().is_empty() {
            return Err(EngineError::Config("recruit context must be non-empty".into()));
        }
        if council_size < 2 {
            return Err(EngineError::Config(format!(
                "council_size must be at least 2, got {}",
                council_size
            )));
        }

        let request = self.build_request(context, image_summary, council_size);
        let attempts = self.recruit_retries + 1;
        let mut last_reason = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                warn!(attempt = attempt, reason = %last_reason, "regenerating council");
            }

            let value = generate_with_retry(self.service.as_ref(), &request, &self.retry).await?;

            match self.parse_council(&value, council_size) {
                Ok(council) => {
                    info!(
                        agents = council.len(),
                        roles = %council
                            .iter()
                            .map(|p| p.role_title.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                        "council assembled"
                    );
                    return Ok(council);
                }
                Err(reason) => last_reason = reason,
            }
        }

        Err(EngineError::InsufficientCouncil(format!(
            "after {} attempts: {}",
            attempts, last_reason
        )))
    }

    /// Parse and validate the council payload; soft errors describe why the
    /// attempt failed so the retry log is useful.
    fn parse_council(&self, value: &Value, council_size: usize) -> Result<Vec<AgentProfile>, String> {
        let agents = value
            .get("agents")
            .and_then(|v| v.as_array())
            .ok_or_else(|| "response has no 'agents' array".to_string())?;

        let mut council = Vec::new();
        for agent_value in agents {
            match schema::validate_profile(agent_value) {
                Ok(profile) => council.push(profile),
                Err(e) => warn!(error = %e, "discarding invalid profile"),
            }
        }

        if council.len() < council_size {
            return Err(format!(
                "{} valid profiles, need {}",
                council.len(),
                council_size
            ));
        }
        council.truncate(council_size);

        let mut titles = HashSet::new();
        for profile in &council {
            if !titles.insert(profile.role_title.to_lowercase()) {
                return Err(format!("duplicate role_title '{}'", profile.role_title));
            }
        }

        Ok(council)
    }

    fn build_request(
        &self,
        context: &str,
        image_summary: Option<&str>,
        council_size: usize,
    ) -> StructuredRequest {
        let instruction = format!(
            "MISSION: Recruit {} distinct expert personas to analyze the situation below. \
             RULES: No honorifics. Each expert covers a different angle; role titles must \
             not repeat. Ground every role in the specifics of the situation.",
            council_size
        );

        let mut ctx = context.to_string();
        if let Some(summary) = image_summary {
            ctx.push_str("\n\nVISUAL CONTEXT:\n");
            ctx.push_str(summary);
        }

        StructuredRequest::new(instruction, TargetSchema::Council).with_context(ctx)
    }
}
