//! Turn-based structured debate among a recruited council.
//!
//! One opening statement per agent, then one rebuttal round. Each turn is a
//! single structured-generation request seeded with the agent's profile and
//! the transcript so far, so later agents see earlier statements within the
//! same round. Output is therefore path-dependent: reordering the council
//! changes the result, and that is the intended behavior.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, RetryPolicy};
use crate::error::EngineError;
use crate::llm::{generate_with_retry, ReasoningService, StructuredRequest, TargetSchema};
use crate::schema::AgentProfile;
use crate::tree::ScenarioNode;

/// One statement in a debate. Rebuttals name the agent they answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateEntry {
    pub agent_id: String,
    pub statement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rebuts_agent_id: Option<String>,
    pub ts: i64,
}

/// Append-only record of one debate round. Owned by the orchestrator while
/// the debate runs; read-only for every consumer afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebateTranscript {
    entries: Vec<DebateEntry>,
}

impl DebateTranscript {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append an entry. Entries are never edited or removed.
    pub fn append(&mut self, entry: DebateEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[DebateEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the transcript for use in prompts, naming agents by role.
    pub fn render(&self, council: &[AgentProfile]) -> String {
        let mut lines = Vec::new();
        for entry in &self.entries {
            let speaker = council
                .iter()
                .find(|p| p.id == entry.agent_id)
                .map(|p| p.role_title.as_str())
                .unwrap_or(entry.agent_id.as_str());
            match &entry.rebuts_agent_id {
                Some(target) => {
                    let target_name = council
                        .iter()
                        .find(|p| &p.id == target)
                        .map(|p| p.role_title.as_str())
                        .unwrap_or(target.as_str());
                    lines.push(format!(
                        "[{} rebutting {}]: {}",
                        speaker, target_name, entry.statement
                    ));
                }
                None => lines.push(format!("[{}]: {}", speaker, entry.statement)),
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Deserialize)]
struct TurnResponse {
    statement: String,
    #[serde(default)]
    rebuts_agent_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Round {
    Opening,
    Rebuttal,
}

/// Drives the structured exchange among council members.
pub struct DebateOrchestrator {
    service: Arc<dyn ReasoningService>,
    retry: RetryPolicy,
    turn_retries: u32,
}

impl DebateOrchestrator {
    pub fn new(service: Arc<dyn ReasoningService>, engine: &EngineConfig, retry: RetryPolicy) -> Self {
        Self {
            service,
            retry,
            turn_retries: engine.debate_retries,
        }
    }

    /// Run one full debate: an opening statement per agent, then a rebuttal
    /// per agent. Profiles are read-only input; the transcript is complete
    /// when every agent has produced both turns. An agent that cannot
    /// produce a valid turn within the retry bound stalls the debate.
    pub async fn run_debate(
        &self,
        council: &[AgentProfile],
        context: &str,
        prior_node: Option<&ScenarioNode>,
    ) -> Result<DebateTranscript, EngineError> {
        if council.len() < 2 {
            return Err(EngineError::Config(
                "a debate requires at least 2 agents".into(),
            ));
        }

        info!(agents = council.len(), "starting debate");
        let mut transcript = DebateTranscript::new();

        for round in [Round::Opening, Round::Rebuttal] {
            for profile in council {
                let entry = self
                    .take_turn(profile, council, context, prior_node, &transcript, round)
                    .await?;
                debug!(
                    agent = %profile.role_title,
                    rebuts = ?entry.rebuts_agent_id,
                    "turn recorded"
                );
                transcript.append(entry);
            }
        }

        info!(entries = transcript.len(), "debate complete");
        Ok(transcript)
    }

    /// One agent turn: bounded semantic retries around a structured request.
    /// Transport failures propagate; only contract violations are re-asked.
    async fn take_turn(
        &self,
        profile: &AgentProfile,
        council: &[AgentProfile],
        context: &str,
        prior_node: Option<&ScenarioNode>,
        transcript: &DebateTranscript,
        round: Round,
    ) -> Result<DebateEntry, EngineError> {
        let attempts = self.turn_retries + 1;

        for attempt in 0..attempts {
            if attempt > 0 {
                warn!(
                    agent = %profile.role_title,
                    attempt = attempt,
                    "regenerating invalid turn"
                );
            }

            let request = self.build_turn_request(profile, council, context, prior_node, transcript, round);
            let value = generate_with_retry(self.service.as_ref(), &request, &self.retry).await?;

            let turn: TurnResponse = match serde_json::from_value(value) {
                Ok(turn) => turn,
                Err(_) => continue,
            };

            match self.check_turn(&turn, profile, council, round) {
                Ok(entry) => return Ok(entry),
                Err(_) => continue,
            }
        }

        Err(EngineError::DebateStalled {
            agent_id: profile.id.clone(),
            attempts,
        })
    }

    fn check_turn(
        &self,
        turn: &TurnResponse,
        profile: &AgentProfile,
        council: &[AgentProfile],
        round: Round,
    ) -> Result<DebateEntry, EngineError> {
        if turn.statement.trim().is_empty() {
            return Err(EngineError::MalformedOutput("empty statement".into()));
        }

        let rebuts = match round {
            Round::Opening => None,
            Round::Rebuttal => {
                let ids: HashSet<&str> = council.iter().map(|p| p.id.as_str()).collect();
                match turn.rebuts_agent_id.as_deref() {
                    Some(target) if target != profile.id && ids.contains(target) => {
                        Some(target.to_string())
                    }
                    _ => {
                        return Err(EngineError::MalformedOutput(
                            "rebuttal must name another council member".into(),
                        ))
                    }
                }
            }
        };

        Ok(DebateEntry {
            agent_id: profile.id.clone(),
            statement: turn.statement.trim().to_string(),
            rebuts_agent_id: rebuts,
            ts: Utc::now().timestamp(),
        })
    }

    fn build_turn_request(
        &self,
        profile: &AgentProfile,
        council: &[AgentProfile],
        context: &str,
        prior_node: Option<&ScenarioNode>,
        transcript: &DebateTranscript,
        round: Round,
    ) -> StructuredRequest {
        let roster = council
            .iter()
            .map(|p| {
                format!(
                    "- {} | {} ({}), stance: {}",
                    p.id, p.role_title, p.domain, p.stance_bias
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let task = match round {
            Round::Opening => {
                "Give your opening statement on the situation: your read of where \
                 it leads and the forces driving it. Set rebuts_agent_id to null."
            }
            Round::Rebuttal => {
                "Review the transcript and rebut the council member you most \
                 disagree with. Set rebuts_agent_id to that agent's id."
            }
        };

        let instruction = format!(
            "You are {role} (id {id}), an expert in {domain}. Strategic stance: {stance}. \
             Expertise: {keywords}.\n\nCOUNCIL:\n{roster}\n\n{task}",
            role = profile.role_title,
            id = profile.id,
            domain = profile.domain,
            stance = profile.stance_bias,
            keywords = profile.expertise_keywords.join(", "),
            roster = roster,
            task = task,
        );

        let mut ctx = format!("SITUATION:\n{}", context);
        if let Some(node) = prior_node {
            ctx.push_str(&format!(
                "\n\nTHIS BRANCH FOLLOWS FROM:\n{}: {}",
                node.payload.title, node.payload.narrative
            ));
        }
        if !transcript.is_empty() {
            ctx.push_str(&format!(
                "\n\nTRANSCRIPT SO FAR:\n{}",
                transcript.render(council)
            ));
        }

        StructuredRequest::new(instruction, TargetSchema::DebateTurn).with_context(ctx)
    }
}
