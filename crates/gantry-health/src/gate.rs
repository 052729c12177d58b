//! Readiness gate — bounded wait for a whole replacement pool.
//!
//! Used as the rollout's provisioning guard: every replacement task
//! must prove healthy within the deadline, or the rollout fails before
//! any traffic has shifted.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::checker::{HealthStatus, HealthTracker, ProbeResult, Prober};

#[derive(Debug, Error)]
pub enum GateError {
    #[error("health check timeout: {unready:?} never became healthy")]
    Timeout {
        /// Endpoints that had not reached healthy at the deadline.
        unready: Vec<String>,
    },
}

/// Polls a set of endpoints until all are healthy or a deadline passes.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    /// Consecutive successes required per endpoint.
    pub healthy_threshold: u32,
    /// Failures tolerated before an endpoint counts as unhealthy.
    pub unhealthy_threshold: u32,
    /// Poll interval between probe rounds.
    pub probe_interval: Duration,
    /// Per-probe timeout.
    pub probe_timeout: Duration,
    /// HTTP path probed on each endpoint.
    pub path: String,
}

impl ReadinessGate {
    pub fn new(path: &str) -> Self {
        Self {
            healthy_threshold: 1,
            unhealthy_threshold: 3,
            probe_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
            path: path.to_string(),
        }
    }

    /// Wait until every endpoint is healthy.
    ///
    /// Returns `GateError::Timeout` naming the stragglers if the
    /// deadline elapses first. An endpoint that reached healthy stays
    /// counted even if later rounds are skipped.
    pub async fn await_all_healthy<P: Prober>(
        &self,
        prober: &P,
        endpoints: &[String],
        deadline: Duration,
    ) -> Result<(), GateError> {
        if endpoints.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        let mut trackers: Vec<(String, HealthTracker)> = endpoints
            .iter()
            .map(|e| {
                (
                    e.clone(),
                    HealthTracker::new(
                        self.unhealthy_threshold,
                        self.healthy_threshold,
                        self.probe_interval,
                    ),
                )
            })
            .collect();

        loop {
            for (endpoint, tracker) in trackers.iter_mut() {
                if tracker.status() == HealthStatus::Healthy {
                    continue;
                }
                let result = prober.probe(endpoint, &self.path, self.probe_timeout).await;
                let status = tracker.record(result);
                debug!(%endpoint, ?result, ?status, "readiness probe");
            }

            let unready: Vec<String> = trackers
                .iter()
                .filter(|(_, t)| t.status() != HealthStatus::Healthy)
                .map(|(e, _)| e.clone())
                .collect();

            if unready.is_empty() {
                info!(
                    endpoints = endpoints.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "all endpoints healthy"
                );
                return Ok(());
            }

            if started.elapsed() + self.probe_interval > deadline {
                return Err(GateError::Timeout { unready });
            }

            tokio::time::sleep(self.probe_interval).await;
        }
    }
}
