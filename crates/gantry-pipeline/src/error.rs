use thiserror::Error;

use gantry_rollout::RolloutError;
use gantry_state::StateError;

/// Failure of a single pipeline stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage requires an input artifact")]
    NoInput,

    #[error("secret {name} is unavailable: {reason}")]
    SecretUnavailable { name: String, reason: String },

    #[error("source fetch failed: {0}")]
    Fetch(String),

    #[error("build command is empty")]
    EmptyBuildCommand,

    #[error("build exited with status {status}")]
    BuildFailed { status: i32 },

    #[error("descriptor {path} is missing the image placeholder")]
    MissingPlaceholder { path: String },

    #[error("descriptor {path} is malformed: {reason}")]
    MalformedDescriptor { path: String, reason: String },

    #[error("rollout did not complete: {0}")]
    RolloutNotCompleted(String),

    #[error(transparent)]
    Rollout(#[from] RolloutError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Failure of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The stage's input artifact is absent; the stage never ran.
    #[error("stage {stage} has no input artifact")]
    MissingInput { stage: String },

    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: StageError,
    },
}

pub type StageResult<T> = Result<T, StageError>;
