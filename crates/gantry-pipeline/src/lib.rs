//! gantry-pipeline — the source → build → deploy release workflow.
//!
//! Three stages run strictly in order, each consuming the previous
//! stage's artifact: checkout the source branch, run the externally
//! authored build instructions, then hand the built image to the
//! rollout driver. Any stage failure halts the run; nothing retries
//! and later stages never start.

pub mod artifact;
pub mod build;
pub mod deploy;
pub mod descriptor;
pub mod error;
pub mod pipeline;
pub mod source;

pub use artifact::Artifact;
pub use build::{BuildStage, ImageDetail, ImageRegistry};
pub use deploy::DeployStage;
pub use error::{PipelineError, StageError};
pub use pipeline::{Pipeline, PipelineRun, Stage, StageFuture};
pub use source::{EnvSecrets, SecretResolver, SourceStage};
