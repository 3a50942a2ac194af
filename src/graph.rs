//! Directed-graph description handed to the external renderer, plus a DOT
//! rendering of it. Rasterization is not this crate's concern.

use serde::{Deserialize, Serialize};

use crate::schema::RiskBand;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub risk_band: RiskBand,
    pub is_chaos_variant: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
}

/// Node/edge list describing the forecast tree for rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDescription {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

fn band_color(band: RiskBand) -> &'static str {
    match band {
        RiskBand::Red => "#B22222",
        RiskBand::Yellow => "#B8860B",
        RiskBand::Green => "#006400",
    }
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Render the description as Graphviz DOT. Chaos variants get a distinct
/// shape so they stand out without any other special casing.
pub fn to_dot(graph: &GraphDescription) -> String {
    let mut out = String::from("digraph forecast {\n");
    out.push_str("    bgcolor=\"#0E1117\";\n");
    out.push_str("    rankdir=LR;\n");
    out.push_str("    node [fontname=\"Helvetica\", fontcolor=white, style=filled];\n");
    out.push_str("    edge [color=\"#555555\", arrowsize=0.7];\n");

    for node in &graph.nodes {
        let shape = if node.is_chaos_variant { "note" } else { "box" };
        out.push_str(&format!(
            "    \"{}\" [label=\"{}\", shape={}, fillcolor=\"{}\"];\n",
            escape(&node.id),
            escape(&node.label),
            shape,
            band_color(node.risk_band),
        ));
    }
    for edge in &graph.edges {
        out.push_str(&format!(
            "    \"{}\" -> \"{}\";\n",
            escape(&edge.from),
            escape(&edge.to)
        ));
    }

    out.push_str("}\n");
    out
}
