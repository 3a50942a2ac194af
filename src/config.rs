use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::EngineError;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Pipeline knobs (council size, expansion bound, per-stage retries)
    #[serde(default)]
    pub engine: EngineConfig,

    /// Reasoning service configuration
    pub reasoning: ReasoningConfig,

    /// Visual grounding service configuration (optional)
    #[serde(default)]
    pub vision: Option<VisionConfig>,

    /// Risk band thresholds
    #[serde(default)]
    pub risk_bands: RiskBandConfig,

    /// Chaos injection configuration
    #[serde(default)]
    pub chaos: ChaosConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of experts recruited per debate round (minimum 2)
    #[serde(default = "default_council_size")]
    pub council_size: usize,
    /// Maximum node depth reachable through expansion
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Regeneration attempts before recruiting fails
    #[serde(default = "default_stage_retries")]
    pub recruit_retries: u32,
    /// Turn regeneration attempts per agent before the debate stalls
    #[serde(default = "default_stage_retries")]
    pub debate_retries: u32,
    /// Regeneration attempts before synthesis fails
    #[serde(default = "default_stage_retries")]
    pub synthesis_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Bounded exponential backoff for transport-level failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

/// Thresholds separating the risk bands.
///
/// Heat is probability x impact; heat >= red is Red, heat >= yellow is
/// Yellow, anything below is Green.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskBandConfig {
    #[serde(default = "default_yellow_threshold")]
    pub yellow_threshold: f64,
    #[serde(default = "default_red_threshold")]
    pub red_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaosConfig {
    /// Lowest acceptable impact_score on a forced-event candidate
    #[serde(default = "default_chaos_min_impact")]
    pub min_impact: f64,
    /// Generate events via the reasoning service instead of the curated set
    #[serde(default)]
    pub generate_events: bool,
}

fn default_council_size() -> usize {
    3
}

fn default_max_depth() -> u32 {
    4
}

fn default_stage_retries() -> u32 {
    2
}

fn default_model() -> String {
    "glm-4.7".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_yellow_threshold() -> f64 {
    0.20
}

fn default_red_threshold() -> f64 {
    0.45
}

fn default_chaos_min_impact() -> f64 {
    0.7
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            council_size: default_council_size(),
            max_depth: default_max_depth(),
            recruit_retries: default_stage_retries(),
            debate_retries: default_stage_retries(),
            synthesis_retries: default_stage_retries(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl Default for RiskBandConfig {
    fn default() -> Self {
        Self {
            yellow_threshold: default_yellow_threshold(),
            red_threshold: default_red_threshold(),
        }
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            min_impact: default_chaos_min_impact(),
            generate_events: false,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::Config(format!("cannot read config file: {}", e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("invalid config file: {}", e)))?;
        config.validate()?;
        info!(
            model = %config.reasoning.model,
            council_size = config.engine.council_size,
            max_depth = config.engine.max_depth,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Check cross-field constraints that serde defaults cannot express
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.engine.council_size < 2 {
            return Err(EngineError::Config(
                "engine.council_size must be at least 2 (no meaningful debate below that)".into(),
            ));
        }
        if self.risk_bands.yellow_threshold >= self.risk_bands.red_threshold {
            return Err(EngineError::Config(
                "risk_bands.yellow_threshold must be below red_threshold".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.chaos.min_impact) {
            return Err(EngineError::Config(
                "chaos.min_impact must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Default configuration around an existing reasoning endpoint
    pub fn default_for_endpoint(base_url: String, api_key: String) -> Self {
        Self {
            engine: EngineConfig::default(),
            reasoning: ReasoningConfig {
                base_url,
                api_key,
                model: default_model(),
                max_tokens: default_max_tokens(),
                timeout_secs: default_timeout_secs(),
                retry: RetryPolicy::default(),
            },
            vision: None,
            risk_bands: RiskBandConfig::default(),
            chaos: ChaosConfig::default(),
        }
    }
}
