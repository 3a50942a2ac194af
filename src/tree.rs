//! Forecast tree: arena storage for scored scenario nodes.
//!
//! Nodes live in a flat map keyed by id with `parent_id` back-references,
//! forming an implicit tree — no live object pointers, no cyclic ownership.
//! The tree is append-only for the lifetime of a session: a node is created
//! exactly once from a validated payload and never mutated afterwards;
//! corrections mean inserting a new node. Acyclicity holds by construction
//! because a node can only attach to an already-existing parent (or none).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use crate::config::RiskBandConfig;
use crate::error::EngineError;
use crate::graph::{GraphDescription, GraphEdge, GraphNode};
use crate::schema::{self, AgentProfile, ScenarioPayload};

/// One scored, narrated candidate future, fixed in place in the tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioNode {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub depth: u32,
    pub payload: ScenarioPayload,
    /// The council that produced this node. Owned exclusively; councils are
    /// never shared across nodes.
    pub source_agents: Vec<AgentProfile>,
}

/// Append-only forecast tree. `attach` is the only mutator.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ForecastTree {
    nodes: HashMap<String, ScenarioNode>,
    root_ids: Vec<String>,
    insertion_order: Vec<String>,
}

impl ForecastTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a raw candidate payload and insert it under `parent_id`.
    ///
    /// Validation happens before anything is touched, so a rejected payload
    /// leaves the tree exactly as it was. Returns the inserted node.
    pub fn attach(
        &mut self,
        payload: &serde_json::Value,
        source_agents: Vec<AgentProfile>,
        parent_id: Option<&str>,
    ) -> Result<&ScenarioNode, EngineError> {
        let validated = schema::validate_scenario(payload)?;

        let depth = match parent_id {
            Some(pid) => {
                let parent = self
                    .nodes
                    .get(pid)
                    .ok_or_else(|| EngineError::UnknownParent(pid.to_string()))?;
                parent.depth + 1
            }
            None => 0,
        };

        let id = Uuid::new_v4().to_string();
        let node = ScenarioNode {
            id: id.clone(),
            parent_id: parent_id.map(|p| p.to_string()),
            depth,
            payload: validated,
            source_agents,
        };

        info!(
            node_id = %id,
            depth = depth,
            chaos = node.payload.is_chaos_variant,
            title = %node.payload.title,
            "scenario attached"
        );

        if parent_id.is_none() {
            self.root_ids.push(id.clone());
        }
        self.insertion_order.push(id.clone());
        self.nodes.insert(id.clone(), node);
        Ok(&self.nodes[&id])
    }

    pub fn get(&self, id: &str) -> Option<&ScenarioNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root_ids(&self) -> &[String] {
        &self.root_ids
    }

    /// Node ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.insertion_order.iter().map(|s| s.as_str())
    }

    /// Children of a node, in insertion order.
    pub fn children_of(&self, id: &str) -> Vec<&ScenarioNode> {
        self.insertion_order
            .iter()
            .filter_map(|nid| self.nodes.get(nid))
            .filter(|n| n.parent_id.as_deref() == Some(id))
            .collect()
    }

    /// Walk `parent_id` links from `id` back to its root. Returns the chain
    /// in root-first order. The walk is bounded by the node count, so a
    /// corrupted chain fails loudly instead of spinning.
    pub fn path_to_root(&self, id: &str) -> Result<Vec<&ScenarioNode>, EngineError> {
        let mut chain = Vec::new();
        let mut current = Some(
            self.nodes
                .get(id)
                .ok_or_else(|| EngineError::UnknownParent(id.to_string()))?,
        );

        while let Some(node) = current {
            if chain.len() > self.nodes.len() {
                return Err(EngineError::UnknownParent(format!(
                    "parent chain from '{}' does not terminate",
                    id
                )));
            }
            chain.push(node);
            current = match &node.parent_id {
                Some(pid) => Some(
                    self.nodes
                        .get(pid)
                        .ok_or_else(|| EngineError::UnknownParent(pid.clone()))?,
                ),
                None => None,
            };
        }

        chain.reverse();
        Ok(chain)
    }

    /// Build the expansion context for a node: its narrative plus explicit
    /// assumptions, the seed for the next recruit/debate cycle.
    pub fn context_for(&self, id: &str) -> Result<String, EngineError> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| EngineError::UnknownParent(id.to_string()))?;

        let mut context = format!("{}\n\n{}", node.payload.title, node.payload.narrative);
        if !node.payload.assumptions.is_empty() {
            context.push_str("\n\nStanding assumptions:\n");
            for assumption in &node.payload.assumptions {
                context.push_str(&format!("- {}\n", assumption));
            }
        }
        Ok(context)
    }

    /// Produce the directed-graph description consumed by the external
    /// renderer. Pure read; one edge per non-root node.
    pub fn export_graph(&self, bands: &RiskBandConfig) -> GraphDescription {
        let mut nodes = Vec::with_capacity(self.insertion_order.len());
        let mut edges = Vec::new();

        for id in &self.insertion_order {
            let node = &self.nodes[id];
            let band = node.payload.metrics.risk_band(bands);
            let label = match &node.payload.time_horizon {
                Some(horizon) => {
                    format!("{} [{}] ({})", node.payload.title, band, horizon)
                }
                None => format!("{} [{}]", node.payload.title, band),
            };
            nodes.push(GraphNode {
                id: node.id.clone(),
                label,
                risk_band: band,
                is_chaos_variant: node.payload.is_chaos_variant,
            });
            if let Some(parent) = &node.parent_id {
                edges.push(GraphEdge {
                    from: parent.clone(),
                    to: node.id.clone(),
                });
            }
        }

        GraphDescription { nodes, edges }
    }
}
