//! Core domain types shared across the gantry crates.

use serde::{Deserialize, Serialize};

/// Unique identifier for a service (the deployed application).
pub type ServiceId = String;

/// Unique identifier for one rollout execution.
pub type RolloutId = String;

/// A task endpoint as registered in a target set (`ip:port`).
pub type TaskEndpoint = String;

/// The two mutually exclusive routable target pools.
///
/// Exactly one color is "live" (receiving default listener traffic)
/// outside a rollout window. The other is the staging pool for the
/// next revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetColor {
    Blue,
    Green,
}

impl TargetColor {
    /// The opposite pool.
    pub fn other(self) -> Self {
        match self {
            TargetColor::Blue => TargetColor::Green,
            TargetColor::Green => TargetColor::Blue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetColor::Blue => "blue",
            TargetColor::Green => "green",
        }
    }
}

impl std::fmt::Display for TargetColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a container image in a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Full repository URI (registry host + repository name).
    pub repository: String,
    /// Tag, e.g. "latest" or a source revision.
    pub tag: String,
    /// Content digest (`sha256:…`), if known.
    pub digest: Option<String>,
}

impl ImageRef {
    pub fn new(repository: &str, tag: &str) -> Self {
        Self {
            repository: repository.to_string(),
            tag: tag.to_string(),
            digest: None,
        }
    }

    /// Canonical URI: `repo:tag` or `repo:tag@sha256:…` when pinned.
    pub fn uri(&self) -> String {
        match &self.digest {
            Some(digest) => format!("{}:{}@{}", self.repository, self.tag, digest),
            None => format!("{}:{}", self.repository, self.tag),
        }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.uri())
    }
}

/// How listener traffic moves from the live color to the replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShiftSchedule {
    /// Shift a minority fraction first, bake, then shift the rest.
    Canary(CanaryPolicy),
    /// Shift 100% in a single step (no bake window).
    AllAtOnce,
}

impl Default for ShiftSchedule {
    fn default() -> Self {
        Self::Canary(CanaryPolicy::default())
    }
}

impl ShiftSchedule {
    /// Integer percentage of listener weight shifted before the bake.
    pub fn canary_percent(&self) -> u32 {
        match self {
            ShiftSchedule::Canary(p) => p.canary_percent,
            ShiftSchedule::AllAtOnce => 100,
        }
    }

    /// Bake duration after the first shift step.
    pub fn bake_secs(&self) -> u64 {
        match self {
            ShiftSchedule::Canary(p) => p.bake_secs,
            ShiftSchedule::AllAtOnce => 0,
        }
    }
}

/// Canary traffic-shift parameters.
///
/// The percentage is an integer fraction of total listener weight and
/// the bake time is a fixed timer, not adaptive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryPolicy {
    /// Percentage of traffic shifted before the bake (1–99).
    pub canary_percent: u32,
    /// Seconds to hold the canary split before promoting.
    pub bake_secs: u64,
}

impl Default for CanaryPolicy {
    fn default() -> Self {
        // 10% for 5 minutes: bounds the blast radius of a bad revision
        // to a minority of requests before committing fully.
        Self {
            canary_percent: 10,
            bake_secs: 300,
        }
    }
}

impl CanaryPolicy {
    /// A policy is usable only with a genuine minority split.
    pub fn is_valid(&self) -> bool {
        (1..=99).contains(&self.canary_percent)
    }
}

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
