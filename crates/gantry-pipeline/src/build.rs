//! Build stage: externally authored build instructions.
//!
//! The build command runs inside the source checkout with three
//! injected variables describing where the image goes. The command's
//! contents are the application's business, not gantry's.

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::info;

use gantry_core::ImageRef;
use gantry_core::config::{BuildConfig, RegistryConfig};

use crate::artifact::Artifact;
use crate::error::StageError;
use crate::pipeline::{Stage, StageFuture};

/// Variables every build sees.
pub const ENV_REGISTRY_URI: &str = "GANTRY_REGISTRY_URI";
pub const ENV_REGION: &str = "GANTRY_REGION";
pub const ENV_ACCOUNT_ID: &str = "GANTRY_ACCOUNT_ID";

/// Artifact file the build stage emits into the checkout.
pub const IMAGE_DETAIL_FILE: &str = "image-detail.json";

/// Registry collaborator: repository names become pushable URIs.
pub trait ImageRegistry: Send + Sync {
    fn registry_uri(&self) -> String;
    fn region(&self) -> String;
    fn account_id(&self) -> String;
}

impl ImageRegistry for RegistryConfig {
    fn registry_uri(&self) -> String {
        format!("{}/{}", self.host, self.repository)
    }

    fn region(&self) -> String {
        self.region.clone()
    }

    fn account_id(&self) -> String {
        self.account.clone()
    }
}

/// The image-detail JSON handed to the deploy stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDetail {
    pub image_uri: String,
    /// The source revision the image was built from.
    pub source_revision: String,
}

impl ImageDetail {
    /// Parse the URI back into a typed reference. A URI without a tag
    /// resolves to `latest`.
    pub fn image_ref(&self) -> ImageRef {
        match self.image_uri.rsplit_once(':') {
            Some((repository, tag)) if !tag.contains('/') => ImageRef::new(repository, tag),
            _ => ImageRef::new(&self.image_uri, "latest"),
        }
    }
}

/// Runs the configured build command in the source checkout.
pub struct BuildStage<R> {
    config: BuildConfig,
    registry: R,
}

impl<R: ImageRegistry> BuildStage<R> {
    pub fn new(config: BuildConfig, registry: R) -> Self {
        Self { config, registry }
    }

    async fn build(&self, input: &Artifact) -> Result<Artifact, StageError> {
        let Some((program, args)) = self.config.command.split_first() else {
            return Err(StageError::EmptyBuildCommand);
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&input.path)
            .env(ENV_REGISTRY_URI, self.registry.registry_uri())
            .env(ENV_REGION, self.registry.region())
            .env(ENV_ACCOUNT_ID, self.registry.account_id());
        if let Some(extra) = &self.config.env {
            command.envs(extra);
        }

        info!(command = %self.config.command.join(" "), "build started");
        let status = command.status().await?;
        if !status.success() {
            return Err(StageError::BuildFailed {
                status: status.code().unwrap_or(-1),
            });
        }

        // The image tag defaults to the source revision the checkout
        // artifact carries.
        let tag = self
            .config
            .image_tag
            .clone()
            .unwrap_or_else(|| input.digest.clone());
        let image = ImageRef::new(&self.registry.registry_uri(), &tag);

        let detail = ImageDetail {
            image_uri: image.uri(),
            source_revision: input.digest.clone(),
        };
        let path = input.path.join(IMAGE_DETAIL_FILE);
        std::fs::write(&path, serde_json::to_vec_pretty(&detail)?)?;

        info!(image = %image, "build produced image");
        Artifact::from_file("image", &path).map_err(Into::into)
    }
}

impl<R: ImageRegistry> Stage for BuildStage<R> {
    fn name(&self) -> &'static str {
        "build"
    }

    fn run<'a>(&'a self, input: Option<&'a Artifact>) -> StageFuture<'a> {
        Box::pin(async move {
            let input = input.ok_or(StageError::NoInput)?;
            self.build(input).await
        })
    }
}
