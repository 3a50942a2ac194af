use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use foresight_engine::config::Config;
use foresight_engine::engine::SimulationEngine;
use foresight_engine::error::{EngineError, Stage};
use foresight_engine::graph;
use foresight_engine::llm::{ReasoningService, StructuredRequest, TargetSchema};
use foresight_engine::report;
use foresight_engine::schema;

/// Scripted reasoning service covering every pipeline stage, with a switch
/// to make synthesis fail for degraded-pipeline tests.
struct ScriptedService {
    fail_synthesis: AtomicBool,
}

impl ScriptedService {
    fn new() -> Self {
        Self {
            fail_synthesis: AtomicBool::new(false),
        }
    }

    fn council() -> Value {
        json!({
            "agents": [
                {"id": "a1", "role_title": "Macro Economist", "domain": "monetary policy",
                 "stance_bias": "Risk-Averse", "expertise_keywords": ["rates", "liquidity"]},
                {"id": "a2", "role_title": "Regulation Lawyer", "domain": "financial law",
                 "stance_bias": "Institutionalist", "expertise_keywords": ["enforcement"]},
                {"id": "a3", "role_title": "Exchange Technologist", "domain": "market infrastructure",
                 "stance_bias": "Disruptive", "expertise_keywords": ["defi", "custody"]}
            ]
        })
    }

    fn scenario(title: &str, probability: f64, chaos: bool) -> Value {
        json!({
            "title": title,
            "narrative": format!("{}: the council's reasoning plays out step by step.", title),
            "assumptions": ["liquidity stays thin", "no emergency rate cut"],
            "rejected_alternatives": ["quick V-shaped recovery"],
            "time_horizon": "Mid Term (1-2y)",
            "is_chaos_variant": chaos,
            "metrics": {
                "probability": probability,
                "impact_score": if chaos { 0.92 } else { 0.6 },
                "data_confidence": 0.55,
                "assumption_stability": 0.5
            }
        })
    }
}

#[async_trait]
impl ReasoningService for ScriptedService {
    async fn generate(&self, request: &StructuredRequest) -> Result<Value, EngineError> {
        match request.schema {
            TargetSchema::Council => Ok(Self::council()),
            TargetSchema::DebateTurn => {
                let me = ["a1", "a2", "a3"]
                    .iter()
                    .find(|id| request.instruction.contains(&format!("(id {})", id)))
                    .copied()
                    .unwrap_or("a1");
                let rebuttal = request.instruction.contains("rebut the council member");
                let target = if me == "a1" { "a3" } else { "a1" };
                Ok(json!({
                    "statement": format!("{} argues from its own corner of the problem.", me),
                    "rebuts_agent_id": if rebuttal { json!(target) } else { Value::Null },
                }))
            }
            TargetSchema::Synthesis => {
                if self.fail_synthesis.load(Ordering::SeqCst) {
                    return Err(EngineError::ServiceError("synthesis backend down".into()));
                }
                let chaos = request.instruction.contains("FORCED DISRUPTION");
                let mut scenarios = vec![
                    Self::scenario("Regulatory Clampdown", 0.45, false),
                    Self::scenario("Slow Bleed", 0.35, false),
                    Self::scenario("Contrarian Rally", 0.2, false),
                ];
                if chaos {
                    scenarios.push(Self::scenario("Systemic Shock", 0.05, true));
                }
                Ok(json!({
                    "scenarios": scenarios,
                    "synthesis": "The council converges on continued stress with a minority rally case.",
                    "black_swan_alert": if chaos { json!("Injected disruption dominates the branch.") } else { Value::Null }
                }))
            }
            TargetSchema::ChaosEvent => Ok(json!({"event": "A G7 sovereign default freezes interbank lending."})),
        }
    }
}

fn test_engine(service: Arc<ScriptedService>) -> SimulationEngine {
    let mut config = Config::default_for_endpoint("http://unused".into(), "test-key".into());
    config.reasoning.retry.max_attempts = 1;
    config.reasoning.retry.base_delay_ms = 1;
    SimulationEngine::new(config, service).unwrap()
}

/// Full seed → expand flow: depth assignment, parent links, per-node councils
#[tokio::test]
async fn test_pipeline_seed_and_expand() {
    let mut engine = test_engine(Arc::new(ScriptedService::new()));

    let roots = engine.seed("Bitcoin crashes below $30k.", None).await.unwrap();
    assert_eq!(roots.len(), 3);
    assert_eq!(engine.tree().root_ids().len(), 3);

    let children = engine.expand(&roots[0]).await.unwrap();
    assert_eq!(children.len(), 3);

    for id in &children {
        let node = engine.tree().get(id).unwrap();
        assert_eq!(node.depth, 1);
        assert_eq!(node.parent_id.as_deref(), Some(roots[0].as_str()));
        // Each node owns its own council copy.
        assert_eq!(node.source_agents.len(), 3);
    }
}

/// Depth and acyclicity invariants hold across repeated expansion
#[tokio::test]
async fn test_depth_and_acyclicity_invariants() {
    let mut engine = test_engine(Arc::new(ScriptedService::new()));
    let roots = engine.seed("Context", None).await.unwrap();
    let level1 = engine.expand(&roots[1]).await.unwrap();
    let level2 = engine.expand(&level1[0]).await.unwrap();

    let tree = engine.tree();
    let ids: Vec<String> = tree.ids().map(str::to_string).collect();
    for id in &ids {
        let node = tree.get(id).unwrap();
        match &node.parent_id {
            Some(pid) => assert_eq!(node.depth, tree.get(pid).unwrap().depth + 1),
            None => assert_eq!(node.depth, 0),
        }
        // Walking parent links always reaches a root within depth+1 steps.
        let chain = tree.path_to_root(id).unwrap();
        assert_eq!(chain.len() as u32, node.depth + 1);
        assert!(chain[0].parent_id.is_none());
    }

    assert_eq!(tree.get(&level2[0]).unwrap().depth, 2);
}

/// export_graph: one edge per non-root node, endpoints all present
#[tokio::test]
async fn test_export_graph_properties() {
    let mut engine = test_engine(Arc::new(ScriptedService::new()));
    let roots = engine.seed("Context", None).await.unwrap();
    engine.expand(&roots[0]).await.unwrap();
    engine.expand(&roots[2]).await.unwrap();

    let tree = engine.tree();
    let non_roots = tree
        .ids()
        .filter_map(|id| tree.get(id))
        .filter(|n| n.parent_id.is_some())
        .count();

    let description = engine.export_graph();
    assert_eq!(description.edges.len(), non_roots);
    assert_eq!(description.nodes.len(), tree.len());

    let node_ids: std::collections::HashSet<_> =
        description.nodes.iter().map(|n| n.id.as_str()).collect();
    for edge in &description.edges {
        assert!(node_ids.contains(edge.from.as_str()));
        assert!(node_ids.contains(edge.to.as_str()));
    }

    // DOT rendering carries one arrow per edge.
    let dot = graph::to_dot(&description);
    assert_eq!(dot.matches(" -> ").count(), description.edges.len());
}

/// Chaos round: at least one variant node, flagged and high-impact
#[tokio::test]
async fn test_chaos_expansion_properties() {
    let mut engine = test_engine(Arc::new(ScriptedService::new()));
    let roots = engine.seed("Context", None).await.unwrap();
    let children = engine.expand_with_chaos(&roots[0]).await.unwrap();

    let variants: Vec<_> = children
        .iter()
        .map(|id| engine.tree().get(id).unwrap())
        .filter(|n| n.payload.is_chaos_variant)
        .collect();
    assert!(!variants.is_empty());
    for variant in &variants {
        assert!(variant.payload.metrics.impact_score >= 0.7);
        // Chaos variants are ordinary nodes otherwise: same parent, same depth rules.
        assert_eq!(variant.parent_id.as_deref(), Some(roots[0].as_str()));
        assert_eq!(variant.depth, 1);
    }
}

/// A failing stage surfaces a typed error naming the stage and leaves the
/// tree in its last valid state
#[tokio::test]
async fn test_degraded_pipeline_preserves_tree() {
    let service = Arc::new(ScriptedService::new());
    let mut engine = test_engine(service.clone());
    let roots = engine.seed("Context", None).await.unwrap();
    let before = engine.tree().len();

    service.fail_synthesis.store(true, Ordering::SeqCst);
    let err = engine.expand(&roots[0]).await.unwrap_err();
    match err {
        EngineError::StageFailed { stage, .. } => assert_eq!(stage, Stage::Synthesize),
        other => panic!("expected StageFailed, got {:?}", other),
    }
    assert_eq!(engine.tree().len(), before);

    // The engine recovers once the service does.
    service.fail_synthesis.store(false, Ordering::SeqCst);
    let children = engine.expand(&roots[0]).await.unwrap();
    assert_eq!(children.len(), 3);
}

/// Round-trip: a validated payload attached and looked up again is intact
#[tokio::test]
async fn test_validate_attach_lookup_round_trip() {
    let mut engine = test_engine(Arc::new(ScriptedService::new()));
    let roots = engine.seed("Context", None).await.unwrap();

    let raw = ScriptedService::scenario("Regulatory Clampdown", 0.45, false);
    let validated = schema::validate_scenario(&raw).unwrap();
    let node = engine.tree().get(&roots[0]).unwrap();

    assert_eq!(node.payload, validated);
}

/// Markdown report over a depth-2 path has one step per node, root first
#[tokio::test]
async fn test_report_over_explored_path() {
    let mut engine = test_engine(Arc::new(ScriptedService::new()));
    let roots = engine.seed("Context", None).await.unwrap();
    let level1 = engine.expand(&roots[0]).await.unwrap();
    let level2 = engine.expand(&level1[0]).await.unwrap();

    let rendered = report::render_path(
        engine.tree(),
        &level2[0],
        &engine.config().risk_bands,
    )
    .unwrap();

    assert_eq!(rendered.matches("## Step").count(), 3);
    assert!(rendered.starts_with("# STRATEGIC FORESIGHT REPORT"));
    assert!(rendered.contains("**Metrics:**"));
    assert!(rendered.contains("Regulatory Clampdown"));
}

/// Config loading from TOML with every section present
#[test]
fn test_config_roundtrip() {
    use std::io::Write;
    use tempfile::NamedTempFile;

    let toml_content = r#"
[engine]
council_size = 4
max_depth = 6
recruit_retries = 1
debate_retries = 3
synthesis_retries = 1

[reasoning]
base_url = "https://llm.example.com"
api_key = "integration-key"
model = "test-model"
max_tokens = 2048
timeout_secs = 60

[reasoning.retry]
max_attempts = 5
base_delay_ms = 250

[vision]
base_url = "https://vision.example.com"
api_key = "vision-key"

[risk_bands]
yellow_threshold = 0.15
red_threshold = 0.5

[chaos]
min_impact = 0.8
generate_events = true
    "#;

    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(toml_content.as_bytes()).unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.engine.council_size, 4);
    assert_eq!(config.engine.max_depth, 6);
    assert_eq!(config.engine.debate_retries, 3);
    assert_eq!(config.reasoning.base_url, "https://llm.example.com");
    assert_eq!(config.reasoning.model, "test-model");
    assert_eq!(config.reasoning.retry.max_attempts, 5);
    assert_eq!(config.risk_bands.red_threshold, 0.5);
    assert_eq!(config.chaos.min_impact, 0.8);
    assert!(config.chaos.generate_events);

    let vision = config.vision.unwrap();
    assert_eq!(vision.base_url, "https://vision.example.com");
    assert_eq!(vision.timeout_secs, 120); // default applied
}

/// Rejecting a council below size 2 never reaches the service
#[test]
fn test_small_council_is_config_error() {
    let service = Arc::new(ScriptedService::new());
    let mut config = Config::default_for_endpoint("http://unused".into(), "k".into());
    config.engine.council_size = 1;
    let err = SimulationEngine::new(config, service).err().unwrap();
    assert!(matches!(err, EngineError::Config(_)));
}
