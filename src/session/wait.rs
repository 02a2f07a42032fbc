//! Readiness and deletion wait loops
//!
//! Both loops are caller-driven polling with an explicit deadline, not watch
//! subscriptions: the control plane is only assumed to answer point queries.
//! Poll interval and max wait are caller-configurable; tests run them with
//! sub-second values.

use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::k8s::{ControlPlane, ControlPlaneError};

/// Errors produced by the wait loops
#[derive(Error, Debug)]
pub enum WaitError {
    #[error("timed out after {waited:?} waiting for job '{job_name}'")]
    Timeout { job_name: String, waited: Duration },

    #[error("job '{job_name}' has a pod in terminal phase '{phase}'")]
    JobFailed { job_name: String, phase: String },

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
}

/// Poll until a pod of the job is running, a pod reaches a terminal failure
/// phase, or the deadline passes.
///
/// Readiness is derived from pod phase (narrowed to all-containers-ready
/// when the kubelet reports container statuses) rather than from the
/// orchestrator's probe verdict, so it also converges on clusters and test
/// doubles where probe wiring is absent.
pub async fn wait_for_ready(
    control_plane: &dyn ControlPlane,
    job_name: &str,
    namespace: &str,
    poll_interval: Duration,
    max_wait: Duration,
) -> Result<(), WaitError> {
    let started = Instant::now();
    let selector = format!("app={job_name}");

    loop {
        let pods = control_plane.list_pods(namespace, &selector).await?;

        for pod in &pods {
            let phase = pod
                .status
                .as_ref()
                .and_then(|status| status.phase.as_deref())
                .unwrap_or("");

            match phase {
                "Failed" | "Unknown" => {
                    return Err(WaitError::JobFailed {
                        job_name: job_name.to_string(),
                        phase: phase.to_string(),
                    });
                }
                "Running" if containers_ready(pod) => {
                    debug!("job '{}' ready after {:?}", job_name, started.elapsed());
                    return Ok(());
                }
                _ => {}
            }
        }

        if started.elapsed() >= max_wait {
            return Err(WaitError::Timeout {
                job_name: job_name.to_string(),
                waited: started.elapsed(),
            });
        }
        sleep(poll_interval).await;
    }
}

/// Poll until the control plane reports the job absent, or the deadline
/// passes. Errors other than not-found propagate; the loop retries on
/// presence, not on failure.
pub async fn wait_for_deletion(
    control_plane: &dyn ControlPlane,
    job_name: &str,
    namespace: &str,
    poll_interval: Duration,
    max_wait: Duration,
) -> Result<(), WaitError> {
    let started = Instant::now();

    loop {
        match control_plane.get_job(job_name, namespace).await {
            Err(ControlPlaneError::NotFound) => {
                debug!("job '{}' deleted after {:?}", job_name, started.elapsed());
                return Ok(());
            }
            Err(other) => return Err(other.into()),
            Ok(_) => {}
        }

        if started.elapsed() >= max_wait {
            return Err(WaitError::Timeout {
                job_name: job_name.to_string(),
                waited: started.elapsed(),
            });
        }
        sleep(poll_interval).await;
    }
}

/// All reported containers ready; an absent report does not block readiness.
fn containers_ready(pod: &Pod) -> bool {
    match pod.status.as_ref().and_then(|s| s.container_statuses.as_ref()) {
        Some(statuses) => statuses.iter().all(|cs| cs.ready),
        None => true,
    }
}
