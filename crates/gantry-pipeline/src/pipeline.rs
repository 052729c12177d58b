//! The sequential pipeline runner.
//!
//! Stages are totally ordered. Stage N+1 never starts before stage N
//! succeeds, a stage with a missing input artifact fails the run
//! without executing, and the first failure halts everything with no
//! retry.

use std::pin::Pin;
use std::time::Instant;

use tracing::{error, info};

use crate::artifact::Artifact;
use crate::error::{PipelineError, StageError};

pub type StageFuture<'a> = Pin<Box<dyn Future<Output = Result<Artifact, StageError>> + Send + 'a>>;

/// One pipeline stage.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run the stage against its predecessor's artifact. The first
    /// stage of a pipeline receives `None`.
    fn run<'a>(&'a self, input: Option<&'a Artifact>) -> StageFuture<'a>;
}

/// An ordered sequence of stages.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Execute all stages in order, feeding each its predecessor's
    /// artifact.
    pub async fn run(&self) -> Result<PipelineRun, PipelineError> {
        let mut artifacts: Vec<Artifact> = Vec::with_capacity(self.stages.len());
        let mut previous: Option<Artifact> = None;

        for (index, stage) in self.stages.iter().enumerate() {
            let name = stage.name();

            // Later stages require their predecessor's artifact to
            // still be present; a vanished artifact fails the run
            // before the stage executes.
            if index > 0 && !previous.as_ref().is_some_and(Artifact::exists) {
                error!(stage = name, "input artifact missing, run halted");
                return Err(PipelineError::MissingInput {
                    stage: name.to_string(),
                });
            }

            info!(stage = name, "stage started");
            let started = Instant::now();
            match stage.run(previous.as_ref()).await {
                Ok(artifact) => {
                    info!(
                        stage = name,
                        artifact = %artifact.name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "stage succeeded"
                    );
                    artifacts.push(artifact.clone());
                    previous = Some(artifact);
                }
                Err(source) => {
                    error!(stage = name, error = %source, "stage failed, run halted");
                    return Err(PipelineError::Stage {
                        stage: name.to_string(),
                        source,
                    });
                }
            }
        }

        Ok(PipelineRun { artifacts })
    }
}

/// A successful run's artifacts, in stage order.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub artifacts: Vec<Artifact>,
}

impl PipelineRun {
    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }
}
