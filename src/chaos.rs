//! Adversarial perturbation of scenario generation: picks or generates a
//! low-probability/high-impact event and threads it into the next synthesis
//! call for a branch. Nodes produced under injection are ordinary scenario
//! nodes carrying `is_chaos_variant = true` — nothing else downstream
//! changes.

use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::info;

use crate::config::{ChaosConfig, RetryPolicy};
use crate::error::EngineError;
use crate::llm::{generate_with_retry, ReasoningService, StructuredRequest, TargetSchema};
use crate::tree::ForecastTree;

/// Curated low-probability/high-impact disruptions, usable in any domain.
const CURATED_EVENTS: &[&str] = &[
    "A Carrington-class solar storm knocks out satellite communications and parts of the power grid for weeks.",
    "A critical zero-day in a ubiquitous open-source library is exploited at internet scale before a patch exists.",
    "A G7 sovereign unexpectedly defaults on its debt, freezing interbank lending.",
    "A laboratory accident releases a fast-spreading pathogen with a long asymptomatic window.",
    "A coordinated attack severs several transoceanic fiber routes simultaneously.",
    "A major cloud provider suffers a week-long global outage from a corrupted control-plane rollout.",
    "An earthquake disables the region producing most of the world's advanced semiconductors.",
    "A state actor demonstrates a working attack on the cryptography behind internet commerce.",
    "Key strait shipping is halted for a month by a regional armed conflict.",
    "A deepfake-driven disinformation wave triggers bank runs in three countries in one week.",
];

/// Supplies the forced event for a chaos round.
pub struct ChaosInjector {
    service: Arc<dyn ReasoningService>,
    retry: RetryPolicy,
    generate_events: bool,
}

impl ChaosInjector {
    pub fn new(service: Arc<dyn ReasoningService>, chaos: &ChaosConfig, retry: RetryPolicy) -> Self {
        Self {
            service,
            retry,
            generate_events: chaos.generate_events,
        }
    }

    /// Select or generate a chaos event for the branch rooted at
    /// `target_node_id`. The event text is threaded into the next synthesis
    /// call for that branch; this method does not touch the tree.
    pub async fn inject(
        &self,
        tree: &ForecastTree,
        target_node_id: &str,
    ) -> Result<String, EngineError> {
        let node = tree
            .get(target_node_id)
            .ok_or_else(|| EngineError::UnknownParent(target_node_id.to_string()))?;

        let event = if self.generate_events {
            self.generate_event(&node.payload.title, &node.payload.narrative)
                .await?
        } else {
            CURATED_EVENTS
                .choose(&mut rand::thread_rng())
                .expect("curated event set is non-empty")
                .to_string()
        };

        info!(target = %target_node_id, event = %event, "chaos event injected");
        Ok(event)
    }

    async fn generate_event(&self, title: &str, narrative: &str) -> Result<String, EngineError> {
        let request = StructuredRequest::new(
            "Propose one rare, high-impact, domain-plausible disruption that could \
             strike the situation below. It must be a genuine shock: low probability, \
             severe consequences, causally connected to the domain.",
            TargetSchema::ChaosEvent,
        )
        .with_context(format!("{}\n\n{}", title, narrative));

        let value = generate_with_retry(self.service.as_ref(), &request, &self.retry).await?;
        match value.get("event").and_then(|v| v.as_str()) {
            Some(event) if !event.trim().is_empty() => Ok(event.trim().to_string()),
            _ => Err(EngineError::MalformedOutput(
                "chaos response has no 'event' text".into(),
            )),
        }
    }
}
