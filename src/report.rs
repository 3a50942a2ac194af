//! Markdown strategic report for one explored path of the forecast tree.

use chrono::Utc;

use crate::config::RiskBandConfig;
use crate::error::EngineError;
use crate::tree::ForecastTree;

/// Render the chain from the root down to `node_id` as a dated markdown
/// report, one step per node.
pub fn render_path(
    tree: &ForecastTree,
    node_id: &str,
    bands: &RiskBandConfig,
) -> Result<String, EngineError> {
    let chain = tree.path_to_root(node_id)?;

    let mut report = String::from("# STRATEGIC FORESIGHT REPORT\n");
    report.push_str(&format!(
        "**Date:** {}\n\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    ));

    for (i, node) in chain.iter().enumerate() {
        report.push_str(&format!("## Step {}: {}\n", i + 1, node.payload.title));
        report.push_str(&format!("_{}_\n\n", node.payload.narrative));

        if let Some(horizon) = &node.payload.time_horizon {
            report.push_str(&format!("**Time horizon:** {}\n\n", horizon));
        }
        if !node.payload.assumptions.is_empty() {
            report.push_str("**Assumptions:**\n");
            for assumption in &node.payload.assumptions {
                report.push_str(&format!("- {}\n", assumption));
            }
            report.push('\n');
        }
        if !node.payload.rejected_alternatives.is_empty() {
            report.push_str("**Rejected alternatives:**\n");
            for alternative in &node.payload.rejected_alternatives {
                report.push_str(&format!("- {}\n", alternative));
            }
            report.push('\n');
        }

        let metrics = &node.payload.metrics;
        report.push_str(&format!(
            "**Metrics:** Risk: {} | Prob: {:.0}% | Impact: {:.0}% | \
             Data confidence: {:.0}% | Assumption stability: {:.0}%\n",
            metrics.risk_band(bands),
            metrics.probability * 100.0,
            metrics.impact_score * 100.0,
            metrics.data_confidence * 100.0,
            metrics.assumption_stability * 100.0,
        ));
        if node.payload.is_chaos_variant {
            report.push_str("\n> CHAOS VARIANT: this step was forced by an injected disruption.\n");
        }
        report.push_str("---\n");
    }

    Ok(report)
}
