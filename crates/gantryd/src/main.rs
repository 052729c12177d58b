//! gantryd — the gantry control plane.
//!
//! Single binary over the gantry crates:
//! - `validate` parses the configuration and checks the topology
//! - `plan` prints the dependency-ordered provision plan
//! - `run` executes the source → build → deploy pipeline
//! - `status` lists rollout records from the state store
//!
//! # Usage
//!
//! ```text
//! gantryd --config gantry.toml validate
//! gantryd --config gantry.toml run --workdir .gantry
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use gantry_core::GantryConfig;
use gantry_health::ProbeResult;
use gantry_pipeline::{BuildStage, DeployStage, EnvSecrets, Pipeline, SourceStage};
use gantry_rollout::{MemoryCluster, RolloutDriver, StaticProber};
use gantry_state::StateStore;
use gantry_topology::Topology;

#[derive(Parser)]
#[command(name = "gantryd", about = "Blue-green deployment control plane", version)]
struct Cli {
    /// Path to the deployment configuration.
    #[arg(short, long, default_value = "gantry.toml", global = true)]
    config: PathBuf,

    /// Path to the state database.
    #[arg(long, default_value = "gantry.redb", global = true)]
    state: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a scaffold configuration for a new service.
    Init {
        /// Service name.
        name: String,
        /// DNS zone the service is exposed under.
        domain: String,
    },

    /// Parse the configuration and validate the topology.
    Validate,

    /// Print the dependency-ordered provision plan.
    Plan,

    /// Run the release pipeline against the simulation backend.
    Run {
        /// Working directory for checkouts and artifacts.
        #[arg(long, default_value = ".gantry")]
        workdir: PathBuf,
    },

    /// List rollout records for the configured service.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gantryd=debug,gantry=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Init { name, domain } => init(&cli.config, &name, &domain),
        Command::Validate => validate(&load(&cli.config)?),
        Command::Plan => plan(&load(&cli.config)?),
        Command::Run { workdir } => run(&load(&cli.config)?, &cli.state, &workdir).await,
        Command::Status => status(&load(&cli.config)?, &cli.state),
    }
}

fn load(path: &PathBuf) -> anyhow::Result<GantryConfig> {
    GantryConfig::from_file(path)
        .with_context(|| format!("could not load configuration from {}", path.display()))
}

fn init(path: &PathBuf, name: &str, domain: &str) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("{} already exists, not overwriting", path.display());
    }
    let config = GantryConfig::scaffold(name, domain);
    std::fs::write(path, config.to_toml_string()?)?;
    println!("wrote {}", path.display());
    Ok(())
}

fn validate(config: &GantryConfig) -> anyhow::Result<()> {
    let (topology, warnings) = Topology::from_config(config)?;

    for warning in &warnings {
        println!("warning: {warning}");
    }
    println!(
        "topology valid: service {} on {} ({} subnets, {} listener(s), {} live)",
        topology.service.name,
        topology.load_balancer.dns.record_name,
        topology.network.subnets.len(),
        topology.load_balancer.listeners.len(),
        topology.service.attached_target,
    );
    Ok(())
}

fn plan(config: &GantryConfig) -> anyhow::Result<()> {
    let (topology, _) = Topology::from_config(config)?;
    let plan = topology.plan();

    for (index, step) in plan.steps().iter().enumerate() {
        if step.depends_on.is_empty() {
            println!("{:>2}. {:<16} {}", index + 1, step.kind, step.name);
        } else {
            println!(
                "{:>2}. {:<16} {}  (after: {})",
                index + 1,
                step.kind,
                step.name,
                step.depends_on.join(", ")
            );
        }
    }
    Ok(())
}

async fn run(config: &GantryConfig, state_path: &PathBuf, workdir: &PathBuf) -> anyhow::Result<()> {
    let (topology, warnings) = Topology::from_config(config)?;
    for warning in &warnings {
        warn!(%warning, "topology warning");
    }

    let source = config
        .source
        .clone()
        .context("a [source] section is required for run")?;
    let build = config
        .build
        .clone()
        .context("a [build] section is required for run")?;

    std::fs::create_dir_all(workdir)?;
    let state = StateStore::open(state_path)?;

    // Ctrl-C becomes the rollout's rollback signal: during the bake it
    // triggers a rollback, earlier it forces a clean failure.
    let (rollback_tx, rollback_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, signalling rollback");
            let _ = rollback_tx.send(true);
        }
    });

    // Cloud adapters are a separate concern; run drives the in-process
    // simulation backend, whose tasks are always probe-healthy.
    let backend = MemoryCluster::with_live(topology.service.attached_target);
    let mut driver = RolloutDriver::new(
        backend,
        StaticProber(ProbeResult::Healthy),
        state.clone(),
        &topology,
    );
    if let Some(secs) = config.rollout.as_ref().and_then(|r| r.health_timeout_secs) {
        driver = driver.with_health_timeout(Duration::from_secs(secs));
    }

    let mut deploy = DeployStage::new(driver, topology.clone(), state, rollback_rx);
    if let Some(rollout) = &config.rollout
        && let (Some(taskdef), Some(spec)) = (
            &rollout.task_definition_template,
            &rollout.rollout_spec_template,
        )
    {
        deploy = deploy.with_templates(taskdef, spec);
    }

    let run = Pipeline::new()
        .stage(SourceStage::new(source, EnvSecrets, workdir))
        .stage(BuildStage::new(build, config.registry.clone()))
        .stage(deploy)
        .run()
        .await?;

    for artifact in &run.artifacts {
        info!(artifact = %artifact.name, path = %artifact.path.display(), "pipeline artifact");
    }
    println!("pipeline completed: {} stage(s)", run.artifacts.len());
    Ok(())
}

fn status(config: &GantryConfig, state_path: &PathBuf) -> anyhow::Result<()> {
    let state = StateStore::open(state_path)?;
    let records = state.list_rollouts(&config.service.name)?;

    if records.is_empty() {
        println!("no rollouts recorded for {}", config.service.name);
        return Ok(());
    }

    println!(
        "{:<28} {:<12} {:<14} {:>8}  reason",
        "ID", "STATUS", "PHASE", "REVISION"
    );
    for record in records {
        println!(
            "{:<28} {:<12} {:<14} {:>8}  {}",
            record.id,
            format!("{:?}", record.status).to_lowercase(),
            record.phase,
            record.revision,
            record.reason.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}
