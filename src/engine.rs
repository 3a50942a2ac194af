//! Simulation pipeline: recruit a council, run the debate, synthesize
//! candidate futures, attach them to the forecast tree. Expansion re-enters
//! the same pipeline with a node's narrative as the new context, which is
//! how the tree grows from its own leaves.
//!
//! The engine owns the tree and takes `&mut self` on every mutating path,
//! so attaches are serialized per tree instance by construction.

use std::sync::Arc;
use tracing::{info, warn};

use crate::chaos::ChaosInjector;
use crate::config::Config;
use crate::debate::DebateOrchestrator;
use crate::error::{EngineError, Stage};
use crate::graph::GraphDescription;
use crate::llm::ReasoningService;
use crate::recruiter::Recruiter;
use crate::schema;
use crate::synthesis::ScenarioGenerator;
use crate::tree::ForecastTree;

/// Orchestrates one user session's simulation pipeline over a single tree.
pub struct SimulationEngine {
    config: Config,
    recruiter: Recruiter,
    debate: DebateOrchestrator,
    generator: ScenarioGenerator,
    chaos: ChaosInjector,
    tree: ForecastTree,
}

impl SimulationEngine {
    pub fn new(config: Config, service: Arc<dyn ReasoningService>) -> Result<Self, EngineError> {
        config.validate()?;
        let retry = config.reasoning.retry.clone();
        Ok(Self {
            recruiter: Recruiter::new(service.clone(), &config.engine, retry.clone()),
            debate: DebateOrchestrator::new(service.clone(), &config.engine, retry.clone()),
            generator: ScenarioGenerator::new(
                service.clone(),
                &config.engine,
                &config.chaos,
                retry.clone(),
            ),
            chaos: ChaosInjector::new(service, &config.chaos, retry),
            tree: ForecastTree::new(),
            config,
        })
    }

    /// Seed the tree: run the full pipeline on a fresh context and attach
    /// the resulting scenarios as roots. Returns the new node ids.
    pub async fn seed(
        &mut self,
        context: &str,
        image_summary: Option<&str>,
    ) -> Result<Vec<String>, EngineError> {
        self.run_round(context.to_string(), image_summary, None, None)
            .await
    }

    /// Expand a node: re-enter the pipeline with the node's narrative and
    /// assumptions as the new context. Every resulting scenario is attached
    /// under `node_id`.
    pub async fn expand(&mut self, node_id: &str) -> Result<Vec<String>, EngineError> {
        let context = self.check_expandable(node_id)?;
        self.run_round(context, None, Some(node_id.to_string()), None)
            .await
    }

    /// Expand a node under chaos: force a low-probability/high-impact event
    /// into the generation round for this branch.
    pub async fn expand_with_chaos(&mut self, node_id: &str) -> Result<Vec<String>, EngineError> {
        let context = self.check_expandable(node_id)?;
        let event = self.chaos.inject(&self.tree, node_id).await?;
        self.run_round(context, None, Some(node_id.to_string()), Some(event))
            .await
    }

    pub fn tree(&self) -> &ForecastTree {
        &self.tree
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Renderer-facing graph description using the configured risk bands.
    pub fn export_graph(&self) -> GraphDescription {
        self.tree.export_graph(&self.config.risk_bands)
    }

    fn check_expandable(&self, node_id: &str) -> Result<String, EngineError> {
        let node = self
            .tree
            .get(node_id)
            .ok_or_else(|| EngineError::UnknownParent(node_id.to_string()))?;
        if node.depth >= self.config.engine.max_depth {
            return Err(EngineError::Config(format!(
                "node '{}' is at depth {}, expansion is bounded at {}",
                node_id, node.depth, self.config.engine.max_depth
            )));
        }
        self.tree.context_for(node_id)
    }

    /// One recruit → debate → synthesize → attach cycle. Each stage failure
    /// is wrapped with the stage that produced it; the tree is only touched
    /// after every candidate has passed validation.
    async fn run_round(
        &mut self,
        context: String,
        image_summary: Option<&str>,
        parent_id: Option<String>,
        chaos_event: Option<String>,
    ) -> Result<Vec<String>, EngineError> {
        info!(
            parent = parent_id.as_deref().unwrap_or("<root>"),
            chaos = chaos_event.is_some(),
            "starting simulation round"
        );

        let council = self
            .recruiter
            .recruit(&context, image_summary, self.config.engine.council_size)
            .await
            .map_err(|e| e.at_stage(Stage::Recruit))?;

        let prior_node = parent_id.as_deref().and_then(|id| self.tree.get(id));
        let transcript = self
            .debate
            .run_debate(&council, &context, prior_node)
            .await
            .map_err(|e| e.at_stage(Stage::Debate))?;

        let result = self
            .generator
            .synthesize(&council, &transcript, chaos_event.as_deref())
            .await
            .map_err(|e| e.at_stage(Stage::Synthesize))?;

        if !result.synthesis.is_empty() {
            info!(synthesis = %result.synthesis, "council synthesis");
        }
        if let Some(alert) = &result.black_swan_alert {
            warn!(alert = %alert, "black swan alert");
        }

        // Validate every candidate before attaching any, so a bad round
        // leaves the tree in its previous state.
        for candidate in &result.candidates {
            schema::validate_scenario(candidate).map_err(|e| e.at_stage(Stage::Attach))?;
        }

        let mut attached = Vec::with_capacity(result.candidates.len());
        for candidate in &result.candidates {
            let node = self
                .tree
                .attach(candidate, council.clone(), parent_id.as_deref())
                .map_err(|e| e.at_stage(Stage::Attach))?;
            attached.push(node.id.clone());
        }

        info!(
            attached = attached.len(),
            total_nodes = self.tree.len(),
            "simulation round complete"
        );
        Ok(attached)
    }
}
