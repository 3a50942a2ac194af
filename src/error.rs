//! Error taxonomy for the simulation pipeline.
//!
//! Validation failures are never coerced into degraded data: a payload that
//! fails its contract is surfaced, and the forecast tree stays in its last
//! valid state. Transport failures carry enough context to name the pipeline
//! stage that gave up.

use std::time::Duration;

/// Pipeline stage, used to attribute a failure to the component that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Recruit,
    Debate,
    Synthesize,
    Attach,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Recruit => "recruit",
            Stage::Debate => "debate",
            Stage::Synthesize => "synthesize",
            Stage::Attach => "attach",
        };
        write!(f, "{}", name)
    }
}

/// Errors from the simulation core.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Untrusted model output failed a schema contract. Never coerced.
    #[error("schema violation: field '{field}': {constraint}")]
    SchemaViolation { field: String, constraint: String },

    /// Recruiter could not assemble a full council of distinct roles.
    #[error("insufficient council: {0}")]
    InsufficientCouncil(String),

    /// An agent failed to produce a valid debate turn within the retry bound.
    #[error("debate stalled: agent '{agent_id}' failed after {attempts} attempts")]
    DebateStalled { agent_id: String, attempts: u32 },

    /// Synthesis returned zero scenario candidates.
    #[error("synthesis returned zero scenario candidates")]
    EmptyScenarioSet,

    /// Caller referenced a parent node that is not in the tree. Not retried.
    #[error("unknown parent node: {0}")]
    UnknownParent(String),

    /// An external service call exceeded its deadline.
    #[error("service call timed out after {0:?}")]
    ServiceTimeout(Duration),

    /// The reasoning service rejected the call with a rate limit.
    #[error("rate limited by reasoning service")]
    RateLimited,

    /// The reasoning service failed outright.
    #[error("reasoning service error: {0}")]
    ServiceError(String),

    /// Service output could not be parsed against the requested schema.
    #[error("malformed service output: {0}")]
    MalformedOutput(String),

    /// Caller-side configuration error. Not retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// A pipeline stage exhausted its local retries; names the stage.
    #[error("{stage} stage failed: {source}")]
    StageFailed {
        stage: Stage,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Whether the transport retry layer may re-issue the request.
    ///
    /// Stage-level contract failures (`InsufficientCouncil`, `DebateStalled`,
    /// `EmptyScenarioSet`) are retried by their own stages, not here.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ServiceTimeout(_)
                | EngineError::RateLimited
                | EngineError::ServiceError(_)
                | EngineError::MalformedOutput(_)
        )
    }

    /// Wrap this error with the pipeline stage that produced it.
    pub fn at_stage(self, stage: Stage) -> EngineError {
        EngineError::StageFailed {
            stage,
            source: Box::new(self),
        }
    }

    /// Shorthand for a schema violation naming the offending field.
    pub fn schema(field: impl Into<String>, constraint: impl Into<String>) -> EngineError {
        EngineError::SchemaViolation {
            field: field.into(),
            constraint: constraint.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_subset() {
        assert!(EngineError::RateLimited.is_retryable());
        assert!(EngineError::ServiceError("boom".into()).is_retryable());
        assert!(EngineError::ServiceTimeout(Duration::from_secs(30)).is_retryable());
        assert!(EngineError::MalformedOutput("not json".into()).is_retryable());

        assert!(!EngineError::UnknownParent("n1".into()).is_retryable());
        assert!(!EngineError::Config("bad".into()).is_retryable());
        assert!(!EngineError::schema("probability", "must be within [0, 1]").is_retryable());
        assert!(!EngineError::EmptyScenarioSet.is_retryable());
    }

    #[test]
    fn test_stage_attribution() {
        let err = EngineError::RateLimited.at_stage(Stage::Debate);
        let msg = err.to_string();
        assert!(msg.contains("debate stage failed"));
        assert!(msg.contains("rate limited"));
    }

    #[test]
    fn test_schema_violation_names_field() {
        let err = EngineError::schema("impact_score", "must be within [0, 1]");
        assert!(err.to_string().contains("impact_score"));
        assert!(err.to_string().contains("[0, 1]"));
    }
}
