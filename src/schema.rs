//! Validation boundary between untrusted model output and the rest of the
//! engine. Every payload crossing into the forecast tree passes through one
//! of the `validate_*` operations here; a value that fails its contract is
//! rejected with the offending field named, never coerced or clamped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::RiskBandConfig;
use crate::error::EngineError;

/// One recruited expert persona. Immutable once created; scoped to the
/// debate round that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub role_title: String,
    pub domain: String,
    pub stance_bias: String,
    pub expertise_keywords: Vec<String>,
}

/// Quantitative scores attached to a scenario. All four fields live in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricBundle {
    pub probability: f64,
    pub impact_score: f64,
    pub data_confidence: f64,
    pub assumption_stability: f64,
}

/// Severity classification derived from a metric bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskBand {
    Green,
    Yellow,
    Red,
}

impl std::fmt::Display for RiskBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RiskBand::Green => "Green",
            RiskBand::Yellow => "Yellow",
            RiskBand::Red => "Red",
        };
        write!(f, "{}", name)
    }
}

impl MetricBundle {
    /// Deterministic banding: heat = probability x impact, thresholded.
    /// Same bundle and thresholds always yield the same band.
    pub fn risk_band(&self, bands: &RiskBandConfig) -> RiskBand {
        let heat = self.probability * self.impact_score;
        if heat >= bands.red_threshold {
            RiskBand::Red
        } else if heat >= bands.yellow_threshold {
            RiskBand::Yellow
        } else {
            RiskBand::Green
        }
    }
}

/// A validated scenario candidate, not yet placed in the tree. The tree
/// manager turns this into a `ScenarioNode` by assigning id, parent and depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioPayload {
    pub title: String,
    pub narrative: String,
    pub assumptions: Vec<String>,
    pub rejected_alternatives: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_horizon: Option<String>,
    pub metrics: MetricBundle,
    #[serde(default)]
    pub is_chaos_variant: bool,
}

/// Validate a loose value as an agent profile.
///
/// `id` may be omitted; a fresh one is assigned. Everything else is required
/// and non-empty.
pub fn validate_profile(value: &Value) -> Result<AgentProfile, EngineError> {
    Ok(AgentProfile {
        id: match value.get("id").and_then(|v| v.as_str()) {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        },
        role_title: require_str(value, "role_title")?,
        domain: require_str(value, "domain")?,
        stance_bias: require_str(value, "stance_bias")?,
        expertise_keywords: require_str_array(value, "expertise_keywords")?,
    })
}

/// Validate a loose value as a metric bundle. Out-of-range values are
/// rejected, not clamped: clamping would mask a service-contract violation.
pub fn validate_metrics(value: &Value) -> Result<MetricBundle, EngineError> {
    Ok(MetricBundle {
        probability: require_unit_interval(value, "probability")?,
        impact_score: require_unit_interval(value, "impact_score")?,
        data_confidence: require_unit_interval(value, "data_confidence")?,
        assumption_stability: require_unit_interval(value, "assumption_stability")?,
    })
}

/// Validate a loose value as a scenario payload.
pub fn validate_scenario(value: &Value) -> Result<ScenarioPayload, EngineError> {
    let metrics_value = value
        .get("metrics")
        .ok_or_else(|| EngineError::schema("metrics", "required object is missing"))?;
    Ok(ScenarioPayload {
        title: require_str(value, "title")?,
        narrative: require_str(value, "narrative")?,
        assumptions: require_str_array(value, "assumptions")?,
        rejected_alternatives: require_str_array(value, "rejected_alternatives")?,
        time_horizon: optional_str(value, "time_horizon")?,
        metrics: validate_metrics(metrics_value)?,
        is_chaos_variant: value
            .get("is_chaos_variant")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    })
}

fn require_str(value: &Value, field: &str) -> Result<String, EngineError> {
    match value.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(EngineError::schema(field, "must be a non-empty string")),
        Some(_) => Err(EngineError::schema(field, "must be a string")),
        None => Err(EngineError::schema(field, "required field is missing")),
    }
}

fn optional_str(value: &Value, field: &str) -> Result<Option<String>, EngineError> {
    match value.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.clone())),
        Some(Value::String(_)) => Ok(None),
        Some(_) => Err(EngineError::schema(field, "must be a string when present")),
    }
}

fn require_str_array(value: &Value, field: &str) -> Result<Vec<String>, EngineError> {
    let items = match value.get(field) {
        Some(Value::Array(items)) => items,
        Some(_) => return Err(EngineError::schema(field, "must be an array of strings")),
        None => return Err(EngineError::schema(field, "required field is missing")),
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            _ => Err(EngineError::schema(field, "must contain only strings")),
        })
        .collect()
}

fn require_unit_interval(value: &Value, field: &str) -> Result<f64, EngineError> {
    let n = match value.get(field) {
        Some(v) => v
            .as_f64()
            .ok_or_else(|| EngineError::schema(field, "must be numeric"))?,
        None => return Err(EngineError::schema(field, "required field is missing")),
    };
    if !(0.0..=1.0).contains(&n) {
        return Err(EngineError::schema(field, "must be within [0, 1]"));
    }
    Ok(n)
}
