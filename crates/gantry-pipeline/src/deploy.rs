//! Deploy stage: bridges the built image into the rollout driver.
//!
//! Parses the descriptors from the source checkout, derives the next
//! immutable task-definition revision, and runs the blue-green rollout
//! to a terminal state. Anything short of `Completed` fails the stage
//! and halts the pipeline.

use std::path::Path;

use tokio::sync::watch;
use tracing::info;

use gantry_core::epoch_secs;
use gantry_health::Prober;
use gantry_rollout::{ClusterBackend, RolloutDriver, RolloutOutcome, RolloutRequest};
use gantry_state::StateStore;
use gantry_topology::Topology;

use crate::artifact::Artifact;
use crate::build::ImageDetail;
use crate::descriptor::{render_rollout_spec, render_task_definition};
use crate::error::StageError;
use crate::pipeline::{Stage, StageFuture};

/// Artifact file recording the rollout result.
pub const ROLLOUT_RESULT_FILE: &str = "rollout-result.json";

/// Rendered task definition, persisted next to the rollout result.
pub const RENDERED_TASK_DEFINITION_FILE: &str = "taskdef.rendered.json";

/// Rendered rollout spec, persisted next to the rollout result.
pub const RENDERED_ROLLOUT_SPEC_FILE: &str = "rolloutspec.rendered.yaml";

pub struct DeployStage<B, P> {
    driver: RolloutDriver<B, P>,
    topology: Topology,
    state: StateStore,
    rollback: watch::Receiver<bool>,
    task_definition_template: String,
    rollout_spec_template: String,
}

impl<B: ClusterBackend, P: Prober> DeployStage<B, P> {
    pub fn new(
        driver: RolloutDriver<B, P>,
        topology: Topology,
        state: StateStore,
        rollback: watch::Receiver<bool>,
    ) -> Self {
        Self {
            driver,
            topology,
            state,
            rollback,
            task_definition_template: "taskdef.json".to_string(),
            rollout_spec_template: "rolloutspec.yaml".to_string(),
        }
    }

    /// Override the descriptor locations within the checkout.
    pub fn with_templates(mut self, task_definition: &str, rollout_spec: &str) -> Self {
        self.task_definition_template = task_definition.to_string();
        self.rollout_spec_template = rollout_spec.to_string();
        self
    }

    async fn deploy(&self, input: &Artifact) -> Result<Artifact, StageError> {
        let detail: ImageDetail = serde_json::from_slice(&std::fs::read(&input.path)?)?;
        let image = detail.image_ref();
        let checkout = input.path.parent().unwrap_or(Path::new(".")).to_path_buf();

        // Both descriptors must render before anything launches. The
        // rendered forms are persisted into the checkout so the deploy
        // record can be inspected after the fact.
        let taskdef_template =
            std::fs::read_to_string(checkout.join(&self.task_definition_template))?;
        let taskdef =
            render_task_definition(&taskdef_template, &self.task_definition_template, &image)?;
        let spec_template = std::fs::read_to_string(checkout.join(&self.rollout_spec_template))?;
        let rollout_spec =
            render_rollout_spec(&spec_template, &self.rollout_spec_template, &image)?;
        std::fs::write(
            checkout.join(RENDERED_TASK_DEFINITION_FILE),
            serde_json::to_vec_pretty(&taskdef)?,
        )?;
        std::fs::write(
            checkout.join(RENDERED_ROLLOUT_SPEC_FILE),
            serde_yaml::to_string(&rollout_spec)?,
        )?;

        // Next revision continues from the persisted steady state, not
        // from the topology's initial revision.
        let service = &self.topology.service.name;
        let last_revision = self
            .state
            .get_service(service)?
            .map(|s| s.task_definition_revision)
            .unwrap_or(self.topology.task_definition.revision);
        let mut definition = self.topology.task_definition.next_revision(image);
        // The rendered descriptor owns the family when it names one.
        if let Some(family) = taskdef.get("family").and_then(|v| v.as_str()) {
            definition.family = family.to_string();
        }
        definition.revision = last_revision + 1;

        let request = RolloutRequest {
            // The monotonic revision keeps ids unique even when two
            // rollouts land on the same epoch second.
            rollout_id: format!("{}-r{}-{}", definition.family, definition.revision, epoch_secs()),
            source_revision: detail.source_revision.clone(),
            definition: definition.clone(),
        };
        let rollout_id = request.rollout_id.clone();

        let outcome = self
            .driver
            .execute(&self.topology, request, self.rollback.clone())
            .await?;

        match outcome {
            RolloutOutcome::Completed => {
                let result = serde_json::json!({
                    "rollout_id": rollout_id,
                    "revision": definition.revision,
                    "image": definition.image.uri(),
                    "outcome": "completed",
                });
                let path = checkout.join(ROLLOUT_RESULT_FILE);
                std::fs::write(&path, serde_json::to_vec_pretty(&result)?)?;
                info!(rollout = %rollout_id, revision = definition.revision, "deploy completed");
                Artifact::from_file("rollout", &path).map_err(Into::into)
            }
            RolloutOutcome::RolledBack { reason } | RolloutOutcome::Failed { reason } => {
                Err(StageError::RolloutNotCompleted(reason))
            }
        }
    }
}

impl<B: ClusterBackend, P: Prober> Stage for DeployStage<B, P> {
    fn name(&self) -> &'static str {
        "deploy"
    }

    fn run<'a>(&'a self, input: Option<&'a Artifact>) -> StageFuture<'a> {
        Box::pin(async move {
            let input = input.ok_or(StageError::NoInput)?;
            self.deploy(input).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use gantry_core::TargetColor;
    use gantry_core::config::GantryConfig;
    use gantry_health::{ProbeResult, ReadinessGate};
    use gantry_rollout::{MemoryCluster, StaticProber, TrafficSplit};
    use gantry_state::RolloutStatus;

    fn topology() -> Topology {
        let mut config = GantryConfig::scaffold("storefront", "example.com");
        config.rollout.as_mut().unwrap().schedule.bake_secs = Some(0);
        let (topology, _) = Topology::from_config(&config).unwrap();
        topology
    }

    fn fast_driver(
        backend: MemoryCluster,
        state: StateStore,
        topology: &Topology,
    ) -> RolloutDriver<MemoryCluster, StaticProber> {
        let mut gate = ReadinessGate::new("/healthz");
        gate.probe_interval = Duration::from_millis(5);
        gate.probe_timeout = Duration::from_millis(5);
        RolloutDriver::new(backend, StaticProber(ProbeResult::Healthy), state, topology)
            .with_gate(gate)
            .with_health_timeout(Duration::from_millis(50))
    }

    fn checkout_with_descriptors(dir: &Path) -> Artifact {
        std::fs::write(
            dir.join("taskdef.json"),
            r#"{"family": "storefront", "image": "<IMAGE_NAME>"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("rolloutspec.yaml"),
            "service: storefront\nimage: <IMAGE_NAME>\n",
        )
        .unwrap();

        let detail = ImageDetail {
            image_uri: "registry.example.com/storefront:abc123".to_string(),
            source_revision: "abc123".to_string(),
        };
        let path = dir.join("image-detail.json");
        std::fs::write(&path, serde_json::to_vec_pretty(&detail).unwrap()).unwrap();
        Artifact::from_file("image", &path).unwrap()
    }

    fn no_signal() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        std::mem::forget(tx);
        rx
    }

    #[tokio::test]
    async fn deploy_runs_the_rollout_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let input = checkout_with_descriptors(dir.path());

        let topology = topology();
        let backend = MemoryCluster::with_live(TargetColor::Blue);
        let state = StateStore::open_in_memory().unwrap();
        let stage = DeployStage::new(
            fast_driver(backend.clone(), state.clone(), &topology),
            topology,
            state.clone(),
            no_signal(),
        );

        let artifact = stage.deploy(&input).await.unwrap();
        assert_eq!(artifact.name, "rollout");

        let result: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&artifact.path).unwrap()).unwrap();
        assert_eq!(result["outcome"], "completed");
        // First rollout moves the topology's revision 1 to revision 2.
        assert_eq!(result["revision"], 2);
        assert_eq!(result["image"], "registry.example.com/storefront:abc123");

        assert_eq!(backend.weights(), TrafficSplit::full(TargetColor::Green));
        let service = state.get_service("storefront").unwrap().unwrap();
        assert_eq!(service.live_target, TargetColor::Green);
    }

    #[tokio::test]
    async fn descriptor_without_placeholder_fails_before_any_launch() {
        let dir = tempfile::tempdir().unwrap();
        let input = checkout_with_descriptors(dir.path());
        std::fs::write(dir.path().join("taskdef.json"), r#"{"image": "hardcoded"}"#).unwrap();

        let topology = topology();
        let backend = MemoryCluster::with_live(TargetColor::Blue);
        let state = StateStore::open_in_memory().unwrap();
        let stage = DeployStage::new(
            fast_driver(backend.clone(), state.clone(), &topology),
            topology,
            state.clone(),
            no_signal(),
        );

        let err = stage.deploy(&input).await.unwrap_err();
        assert!(matches!(err, StageError::MissingPlaceholder { .. }));
        // The backend never saw the rollout.
        assert!(backend.weight_history().is_empty());
        assert!(backend.revisions().is_empty());
        assert!(
            state
                .list_rollouts("storefront")
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn failed_rollout_fails_the_stage() {
        let dir = tempfile::tempdir().unwrap();
        let input = checkout_with_descriptors(dir.path());

        let topology = topology();
        let backend = MemoryCluster::with_live(TargetColor::Blue);
        backend.fail_next_launch("no capacity");
        let state = StateStore::open_in_memory().unwrap();
        let stage = DeployStage::new(
            fast_driver(backend.clone(), state.clone(), &topology),
            topology,
            state,
            no_signal(),
        );

        let err = stage.deploy(&input).await.unwrap_err();
        match err {
            StageError::RolloutNotCompleted(reason) => assert!(reason.contains("no capacity")),
            other => panic!("expected rollout failure, got {other:?}"),
        }
        // No result artifact.
        assert!(!dir.path().join(ROLLOUT_RESULT_FILE).exists());
    }

    #[tokio::test]
    async fn second_deploy_derives_the_next_revision() {
        let dir = tempfile::tempdir().unwrap();
        let input = checkout_with_descriptors(dir.path());

        let topology = topology();
        let backend = MemoryCluster::with_live(TargetColor::Blue);
        let state = StateStore::open_in_memory().unwrap();
        let stage = DeployStage::new(
            fast_driver(backend.clone(), state.clone(), &topology),
            topology,
            state.clone(),
            no_signal(),
        );

        stage.deploy(&input).await.unwrap();
        let artifact = stage.deploy(&input).await.unwrap();

        let result: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&artifact.path).unwrap()).unwrap();
        assert_eq!(result["revision"], 3);

        let service = state.get_service("storefront").unwrap().unwrap();
        assert_eq!(service.task_definition_revision, 3);
        assert_eq!(service.live_target, TargetColor::Blue);
    }

    #[tokio::test]
    async fn same_second_deploys_keep_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let input = checkout_with_descriptors(dir.path());

        let topology = topology();
        let backend = MemoryCluster::with_live(TargetColor::Blue);
        let state = StateStore::open_in_memory().unwrap();
        let stage = DeployStage::new(
            fast_driver(backend.clone(), state.clone(), &topology),
            topology,
            state.clone(),
            no_signal(),
        );

        // Back to back, almost certainly within one epoch second.
        stage.deploy(&input).await.unwrap();
        stage.deploy(&input).await.unwrap();

        let records = state.list_rollouts("storefront").unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.status == RolloutStatus::Succeeded));
        let mut revisions: Vec<u32> = records.iter().map(|r| r.revision).collect();
        revisions.sort_unstable();
        assert_eq!(revisions, vec![2, 3]);
    }

    #[tokio::test]
    async fn rendered_descriptors_are_persisted_and_name_the_family() {
        let dir = tempfile::tempdir().unwrap();
        let input = checkout_with_descriptors(dir.path());
        std::fs::write(
            dir.path().join("taskdef.json"),
            r#"{"family": "storefront-api", "image": "<IMAGE_NAME>"}"#,
        )
        .unwrap();

        let topology = topology();
        let backend = MemoryCluster::with_live(TargetColor::Blue);
        let state = StateStore::open_in_memory().unwrap();
        let stage = DeployStage::new(
            fast_driver(backend.clone(), state.clone(), &topology),
            topology,
            state.clone(),
            no_signal(),
        );

        stage.deploy(&input).await.unwrap();

        // The descriptor's family flows into the registered revision
        // and the rollout record.
        assert_eq!(backend.revisions(), vec![("storefront-api".to_string(), 2)]);
        let records = state.list_rollouts("storefront").unwrap();
        assert_eq!(records[0].family, "storefront-api");

        // Rendered forms are on disk with the image substituted.
        let rendered: serde_json::Value = serde_json::from_slice(
            &std::fs::read(dir.path().join(RENDERED_TASK_DEFINITION_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(rendered["image"], "registry.example.com/storefront:abc123");
        let spec = std::fs::read_to_string(dir.path().join(RENDERED_ROLLOUT_SPEC_FILE)).unwrap();
        assert!(spec.contains("registry.example.com/storefront:abc123"));
        assert!(!spec.contains("<IMAGE_NAME>"));
    }
}
