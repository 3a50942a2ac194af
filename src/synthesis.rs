//! Synthesizes a finished debate into candidate future scenarios.
//!
//! Candidates leave this stage as raw payloads; the schema registry
//! validates them at attach time. Metric values are produced by the
//! reasoning service, never computed or clamped here — an out-of-range
//! score is a service-contract violation and is rejected downstream.

use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{ChaosConfig, EngineConfig, RetryPolicy};
use crate::debate::DebateTranscript;
use crate::error::EngineError;
use crate::llm::{generate_with_retry, ReasoningService, StructuredRequest, TargetSchema};
use crate::schema::AgentProfile;

/// Output of one synthesis call: raw scenario candidates plus the
/// council-level summary and any black-swan alert the service surfaced.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    /// Unvalidated scenario payloads, in service order.
    pub candidates: Vec<Value>,
    /// Council-level summary of the debate outcome.
    pub synthesis: String,
    /// Low-probability/high-impact event the service flagged, if any.
    pub black_swan_alert: Option<String>,
}

/// Turns a debate transcript into scored candidate futures.
pub struct ScenarioGenerator {
    service: Arc<dyn ReasoningService>,
    retry: RetryPolicy,
    synthesis_retries: u32,
    chaos_min_impact: f64,
}

impl ScenarioGenerator {
    pub fn new(
        service: Arc<dyn ReasoningService>,
        engine: &EngineConfig,
        chaos: &ChaosConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            service,
            retry,
            synthesis_retries: engine.synthesis_retries,
            chaos_min_impact: chaos.min_impact,
        }
    }

    /// Synthesize the debate into one or more candidate futures.
    ///
    /// When `chaos_event` is supplied, at least one returned candidate must
    /// incorporate it as a causal shock: flagged `is_chaos_variant` with an
    /// impact score at or above the configured floor. A response that fails
    /// the forcing contract (or returns zero candidates) is regenerated up
    /// to the stage bound, then the last failure is surfaced.
    pub async fn synthesize(
        &self,
        council: &[AgentProfile],
        transcript: &DebateTranscript,
        chaos_event: Option<&str>,
    ) -> Result<SynthesisResult, EngineError> {
        if transcript.is_empty() {
            return Err(EngineError::Config(
                "cannot synthesize from an empty transcript".into(),
            ));
        }

        let request = self.build_request(council, transcript, chaos_event);
        let attempts = self.synthesis_retries + 1;
        let mut last_err = EngineError::EmptyScenarioSet;

        for attempt in 0..attempts {
            if attempt > 0 {
                warn!(attempt = attempt, error = %last_err, "regenerating synthesis");
            }

            let value = generate_with_retry(self.service.as_ref(), &request, &self.retry).await?;

            match self.parse_result(value, chaos_event) {
                Ok(result) => {
                    info!(
                        candidates = result.candidates.len(),
                        chaos = chaos_event.is_some(),
                        black_swan = result.black_swan_alert.is_some(),
                        "synthesis complete"
                    );
                    return Ok(result);
                }
                Err(e) => last_err = e,
            }
        }

        Err(last_err)
    }

    fn parse_result(
        &self,
        mut value: Value,
        chaos_event: Option<&str>,
    ) -> Result<SynthesisResult, EngineError> {
        let candidates = match value.get_mut("scenarios").map(Value::take) {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(EngineError::MalformedOutput(
                    "response has no 'scenarios' array".into(),
                ))
            }
        };

        if candidates.is_empty() {
            return Err(EngineError::EmptyScenarioSet);
        }

        if chaos_event.is_some() {
            self.check_chaos_forcing(&candidates)?;
        }

        let synthesis = value
            .get("synthesis")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let black_swan_alert = value
            .get("black_swan_alert")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string);

        Ok(SynthesisResult {
            candidates,
            synthesis,
            black_swan_alert,
        })
    }

    /// The forced-event contract: at least one flagged candidate, and every
    /// flagged candidate's impact at or above the floor. Rejected, not
    /// clamped, when violated.
    fn check_chaos_forcing(&self, candidates: &[Value]) -> Result<(), EngineError> {
        let mut flagged = 0;
        for candidate in candidates {
            if candidate
                .get("is_chaos_variant")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
            {
                flagged += 1;
                let impact = candidate
                    .get("metrics")
                    .and_then(|m| m.get("impact_score"))
                    .and_then(|v| v.as_f64());
                match impact {
                    Some(score) if score >= self.chaos_min_impact => {}
                    _ => {
                        return Err(EngineError::MalformedOutput(format!(
                            "chaos variant impact_score below forced-event floor {}",
                            self.chaos_min_impact
                        )))
                    }
                }
            }
        }
        if flagged == 0 {
            return Err(EngineError::MalformedOutput(
                "no candidate incorporates the injected chaos event".into(),
            ));
        }
        Ok(())
    }

    fn build_request(
        &self,
        council: &[AgentProfile],
        transcript: &DebateTranscript,
        chaos_event: Option<&str>,
    ) -> StructuredRequest {
        let roster = council
            .iter()
            .map(|p| format!("- {} ({}): {}", p.role_title, p.domain, p.stance_bias))
            .collect::<Vec<_>>()
            .join("\n");

        let mut instruction = format!(
            "You are the synthesis stage of a strategic foresight engine.\n\
             ACTIVE COUNCIL:\n{}\n\n\
             TASK: Synthesize the council debate below into 3 divergent future \
             scenarios. Each scenario needs a narrative, its explicit assumptions, \
             the alternatives the council rejected, and the full metric bundle.",
            roster
        );

        if let Some(event) = chaos_event {
            instruction.push_str(&format!(
                "\n\nFORCED DISRUPTION: {}\nAt least one scenario must incorporate \
                 this event as a causal shock, set is_chaos_variant to true, and \
                 carry an impact_score of at least {:.2}.",
                event, self.chaos_min_impact
            ));
        }

        StructuredRequest::new(instruction, TargetSchema::Synthesis)
            .with_context(format!("COUNCIL DEBATE:\n{}", transcript.render(council)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::DebateEntry;
    use crate::llm::MockReasoningService;
    use serde_json::json;

    fn council() -> Vec<AgentProfile> {
        vec![
            AgentProfile {
                id: "a1".into(),
                role_title: "Economist".into(),
                domain: "macro".into(),
                stance_bias: "Bearish".into(),
                expertise_keywords: vec![],
            },
            AgentProfile {
                id: "a2".into(),
                role_title: "Lawyer".into(),
                domain: "regulation".into(),
                stance_bias: "Cautious".into(),
                expertise_keywords: vec![],
            },
        ]
    }

    fn transcript() -> DebateTranscript {
        let mut t = DebateTranscript::new();
        t.append(DebateEntry {
            agent_id: "a1".into(),
            statement: "Contagion spreads.".into(),
            rebuts_agent_id: None,
            ts: 1700000000,
        });
        t.append(DebateEntry {
            agent_id: "a2".into(),
            statement: "Courts slow it down.".into(),
            rebuts_agent_id: Some("a1".into()),
            ts: 1700000001,
        });
        t
    }

    fn scenario(title: &str, impact: f64, chaos: bool) -> Value {
        json!({
            "title": title,
            "narrative": "n",
            "assumptions": [],
            "rejected_alternatives": [],
            "is_chaos_variant": chaos,
            "metrics": {
                "probability": 0.3,
                "impact_score": impact,
                "data_confidence": 0.5,
                "assumption_stability": 0.5
            }
        })
    }

    fn generator(mock: MockReasoningService) -> ScenarioGenerator {
        ScenarioGenerator::new(
            Arc::new(mock),
            &EngineConfig::default(),
            &ChaosConfig::default(),
            RetryPolicy {
                max_attempts: 1,
                base_delay_ms: 1,
            },
        )
    }

    #[tokio::test]
    async fn test_synthesize_returns_raw_candidates() {
        let mut mock = MockReasoningService::new();
        mock.expect_generate().times(1).returning(|_| {
            Ok(json!({
                "scenarios": [
                    scenario("A", 0.5, false),
                    scenario("B", 0.6, false),
                    scenario("C", 0.7, false)
                ],
                "synthesis": "The council leans bearish.",
                "black_swan_alert": null
            }))
        });

        let result = generator(mock)
            .synthesize(&council(), &transcript(), None)
            .await
            .unwrap();
        assert_eq!(result.candidates.len(), 3);
        assert_eq!(result.synthesis, "The council leans bearish.");
        assert!(result.black_swan_alert.is_none());
        // Candidates stay raw; validation is the registry's job.
        assert_eq!(result.candidates[0]["title"], "A");
    }

    #[tokio::test]
    async fn test_empty_scenario_set_retried_then_surfaced() {
        let mut mock = MockReasoningService::new();
        mock.expect_generate()
            .times(3) // default synthesis_retries = 2
            .returning(|_| Ok(json!({"scenarios": [], "synthesis": ""})));

        let err = generator(mock)
            .synthesize(&council(), &transcript(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EmptyScenarioSet));
    }

    #[tokio::test]
    async fn test_chaos_forcing_requires_flagged_candidate() {
        let mut mock = MockReasoningService::new();
        let mut responses = vec![
            json!({"scenarios": [scenario("Forced", 0.9, true)], "synthesis": ""}),
            json!({"scenarios": [scenario("Tame", 0.5, false)], "synthesis": ""}),
        ];
        mock.expect_generate()
            .times(2)
            .returning(move |_| Ok(responses.pop().unwrap()));

        let result = generator(mock)
            .synthesize(&council(), &transcript(), Some("solar flare"))
            .await
            .unwrap();
        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0]["is_chaos_variant"], true);
    }

    #[tokio::test]
    async fn test_chaos_variant_below_impact_floor_rejected() {
        let mut mock = MockReasoningService::new();
        mock.expect_generate()
            .times(3)
            .returning(|_| Ok(json!({"scenarios": [scenario("Weak", 0.2, true)], "synthesis": ""})));

        let err = generator(mock)
            .synthesize(&council(), &transcript(), Some("solar flare"))
            .await
            .unwrap_err();
        match err {
            EngineError::MalformedOutput(msg) => assert!(msg.contains("floor")),
            other => panic!("expected MalformedOutput, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_black_swan_alert_passthrough() {
        let mut mock = MockReasoningService::new();
        mock.expect_generate().times(1).returning(|_| {
            Ok(json!({
                "scenarios": [scenario("A", 0.5, false)],
                "synthesis": "s",
                "black_swan_alert": "Sovereign default cascade detected."
            }))
        });

        let result = generator(mock)
            .synthesize(&council(), &transcript(), None)
            .await
            .unwrap();
        assert_eq!(
            result.black_swan_alert.as_deref(),
            Some("Sovereign default cascade detected.")
        );
    }

    #[tokio::test]
    async fn test_chaos_event_lands_in_instruction() {
        let mut mock = MockReasoningService::new();
        mock.expect_generate()
            .times(1)
            .withf(|request: &StructuredRequest| {
                request.instruction.contains("FORCED DISRUPTION: solar flare")
            })
            .returning(|_| Ok(json!({"scenarios": [scenario("F", 0.9, true)], "synthesis": ""})));

        generator(mock)
            .synthesize(&council(), &transcript(), Some("solar flare"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_transcript_rejected() {
        let mut mock = MockReasoningService::new();
        mock.expect_generate().times(0);

        let err = generator(mock)
            .synthesize(&council(), &DebateTranscript::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
