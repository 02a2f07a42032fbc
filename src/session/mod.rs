//! Ephemeral MCP server session management
//!
//! The [`SessionManager`] owns the registry of running servers and the
//! control-plane client handles. It drives the create -> wait-ready ->
//! expose flows and their mirror-image deletion flows, and releases every
//! registered server (best-effort) when the scope exits.
//!
//! Lifecycle is an explicit enter/exit pair: `enter()` loads credentials and
//! validates the target namespace, `exit()` tears everything down. Nothing
//! else may be called before `enter()`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::k8s::{
    build_job_spec, build_service_spec, ControlPlane, ControlPlaneError, JobState,
    KubeControlPlane, KubeOptions, PortForward,
};

pub mod wait;

pub use wait::WaitError;

/// Default interval between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default deadline for readiness and deletion waits.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60);

/// Errors surfaced by session-manager operations
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session manager is not entered; call enter() first")]
    NotEntered,

    #[error("no usable kubernetes credentials: {0}")]
    InvalidKubeConfig(String),

    #[error("namespace '{0}' not found in cluster")]
    NamespaceNotFound(String),

    #[error("failed to create MCP server '{job_name}': {reason}")]
    ServerCreationFailed { job_name: String, reason: String },

    #[error("MCP job '{0}' not found")]
    JobNotFound(String),

    #[error("failed to delete MCP server '{job_name}': {reason}")]
    ServerDeletionFailed { job_name: String, reason: String },

    #[error("failed to open port forward to pod '{pod_name}' port {port}: {reason}")]
    PortForwardFailed {
        pod_name: String,
        port: u16,
        reason: String,
    },

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error("control plane error: {0}")]
    ControlPlane(#[from] ControlPlaneError),
}

/// A running MCP server: the config it was created from and the name the
/// control plane assigned (equal to the config's job name by construction).
#[derive(Debug, Clone, Serialize)]
pub struct ServerHandle {
    pub config: ServerConfig,
    pub pod_name: String,
}

impl ServerHandle {
    /// In-cluster URL of the server's SSE proxy endpoint.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.pod_name, self.config.port)
    }

    pub fn sse_url(&self) -> String {
        format!("{}/sse", self.url())
    }
}

enum ClientState {
    Unloaded,
    Injected(Arc<dyn ControlPlane>),
    Ready(Arc<dyn ControlPlane>),
}

/// Stateful controller for ephemeral MCP servers in one namespace.
///
/// The registry is keyed by job name; entries are inserted on successful
/// create and removed when deletion is initiated, independent of whether the
/// underlying resources have finished terminating. Client handles are
/// populated exactly once, by `enter()`.
pub struct SessionManager {
    namespace: String,
    kube_options: KubeOptions,
    poll_interval: Duration,
    max_wait_time: Duration,
    jobs: DashMap<String, ServerHandle>,
    forwards: DashMap<String, PortForward>,
    client: RwLock<ClientState>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new("default")
    }
}

impl SessionManager {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kube_options: KubeOptions::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait_time: DEFAULT_MAX_WAIT,
            jobs: DashMap::new(),
            forwards: DashMap::new(),
            client: RwLock::new(ClientState::Unloaded),
        }
    }

    /// Override poll interval and wait deadline (tests use sub-second values).
    pub fn with_timing(mut self, poll_interval: Duration, max_wait_time: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.max_wait_time = max_wait_time;
        self
    }

    /// Override kubeconfig path/context used by `enter()`.
    pub fn with_kube_options(mut self, options: KubeOptions) -> Self {
        self.kube_options = options;
        self
    }

    /// Inject a pre-built control plane. `enter()` still validates the
    /// namespace before the manager becomes usable.
    pub fn with_control_plane(mut self, control_plane: Arc<dyn ControlPlane>) -> Self {
        self.client = RwLock::new(ClientState::Injected(control_plane));
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Snapshot of the currently registered servers.
    pub fn servers(&self) -> Vec<ServerHandle> {
        self.jobs.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Acquire the session: load credentials (local kubeconfig, then
    /// in-cluster service account) and verify the namespace exists.
    /// Idempotent; a second call is a no-op.
    pub async fn enter(&self) -> Result<(), SessionError> {
        let mut state = self.client.write().await;
        let control_plane: Arc<dyn ControlPlane> = match &*state {
            ClientState::Ready(_) => return Ok(()),
            ClientState::Injected(cp) => cp.clone(),
            ClientState::Unloaded => {
                let kube = KubeControlPlane::load(&self.kube_options)
                    .await
                    .map_err(|e| SessionError::InvalidKubeConfig(e.to_string()))?;
                Arc::new(kube)
            }
        };

        let namespaces = control_plane.list_namespaces().await?;
        if !namespaces.iter().any(|ns| ns == &self.namespace) {
            return Err(SessionError::NamespaceNotFound(self.namespace.clone()));
        }

        *state = ClientState::Ready(control_plane);
        info!("session manager entered namespace '{}'", self.namespace);
        Ok(())
    }

    /// Release the session: close port forwards and delete every registered
    /// server's resources. Deletions are best-effort and not waited on;
    /// individual failures are logged and suppressed so one failure does not
    /// block cleanup of the rest. Idempotent.
    pub async fn exit(&self) {
        let control_plane = {
            let mut state = self.client.write().await;
            match std::mem::replace(&mut *state, ClientState::Unloaded) {
                ClientState::Ready(cp) => cp,
                other => {
                    *state = other;
                    return;
                }
            }
        };

        let forward_keys: Vec<String> =
            self.forwards.iter().map(|entry| entry.key().clone()).collect();
        for pod_name in forward_keys {
            if let Some((_, mut forward)) = self.forwards.remove(&pod_name) {
                forward.close();
            }
        }

        let handles = self.servers();
        for handle in &handles {
            self.release_pods(control_plane.as_ref(), &handle.pod_name).await;
            if let Err(e) = control_plane.delete_job(&handle.pod_name, &self.namespace).await {
                info!("error deleting job '{}': {}", handle.pod_name, e);
            }
        }
        info!("session manager exited, released {} job(s)", handles.len());
    }

    /// Create an MCP server job and register it.
    ///
    /// With `wait_for_ready` the readiness wait runs before returning; its
    /// timeout or failure propagates, but the registry entry remains - the
    /// job exists even if it is not ready yet, and the caller decides whether
    /// to delete it.
    pub async fn create_server(
        &self,
        config: ServerConfig,
        wait_for_ready: bool,
    ) -> Result<ServerHandle, SessionError> {
        let control_plane = self.control_plane().await?;
        let job = build_job_spec(&config, &self.namespace);

        let created = control_plane
            .create_job(&self.namespace, &job)
            .await
            .map_err(|e| SessionError::ServerCreationFailed {
                job_name: config.job_name().to_string(),
                reason: e.to_string(),
            })?;

        // the assigned name is required for all subsequent addressing
        let pod_name = created.metadata.name.clone().ok_or_else(|| {
            SessionError::ServerCreationFailed {
                job_name: config.job_name().to_string(),
                reason: "control plane response is missing the job name".to_string(),
            }
        })?;

        let handle = ServerHandle {
            config,
            pod_name: pod_name.clone(),
        };
        self.jobs.insert(pod_name.clone(), handle.clone());
        info!("job '{}' created", pod_name);

        if wait_for_ready {
            wait::wait_for_ready(
                control_plane.as_ref(),
                &pod_name,
                &self.namespace,
                self.poll_interval,
                self.max_wait_time,
            )
            .await?;
        }
        Ok(handle)
    }

    /// Delete an MCP server and unregister it.
    ///
    /// The registry entry is removed first so concurrent observers see it
    /// gone immediately; pod cleanup is best-effort; a failing job deletion
    /// surfaces as [`SessionError::ServerDeletionFailed`] even though pod
    /// cleanup may have partially occurred.
    pub async fn delete_server(
        &self,
        pod_name: &str,
        wait_for_deletion: bool,
    ) -> Result<ServerHandle, SessionError> {
        let control_plane = self.control_plane().await?;

        let (_, handle) = self
            .jobs
            .remove(pod_name)
            .ok_or_else(|| SessionError::JobNotFound(pod_name.to_string()))?;

        self.release_pods(control_plane.as_ref(), pod_name).await;

        control_plane
            .delete_job(pod_name, &self.namespace)
            .await
            .map_err(|e| SessionError::ServerDeletionFailed {
                job_name: pod_name.to_string(),
                reason: e.to_string(),
            })?;
        info!("job '{}' deleted", pod_name);

        if wait_for_deletion {
            wait::wait_for_deletion(
                control_plane.as_ref(),
                pod_name,
                &self.namespace,
                self.poll_interval,
                self.max_wait_time,
            )
            .await?;
        }
        Ok(handle)
    }

    /// Query the job's current status. Control-plane absence maps to
    /// [`SessionError::JobNotFound`]; other errors propagate as-is.
    pub async fn get_job_status(&self, pod_name: &str) -> Result<JobState, SessionError> {
        let control_plane = self.control_plane().await?;
        match control_plane.get_job(pod_name, &self.namespace).await {
            Ok(job) => Ok(JobState::from_job(&job)),
            Err(ControlPlaneError::NotFound) => {
                Err(SessionError::JobNotFound(pod_name.to_string()))
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Create a cluster-internal Service routing to the server's pods.
    pub async fn expose_port(&self, handle: &ServerHandle) -> Result<(), SessionError> {
        let control_plane = self.control_plane().await?;
        let service = build_service_spec(&handle.config);
        control_plane.create_service(&self.namespace, &service).await?;
        info!("service '{}' created", handle.pod_name);
        Ok(())
    }

    /// Delete the Service created by [`SessionManager::expose_port`].
    pub async fn remove_port(&self, handle: &ServerHandle) -> Result<(), SessionError> {
        let control_plane = self.control_plane().await?;
        control_plane.delete_service(&handle.pod_name, &self.namespace).await?;
        info!("service '{}' deleted", handle.pod_name);
        Ok(())
    }

    /// Open a local stream tunnel to the server's pod port. The forward is
    /// tracked by pod name and closed on [`SessionManager::exit`].
    pub async fn create_port_forward(&self, handle: &ServerHandle) -> Result<(), SessionError> {
        let control_plane = self.control_plane().await?;
        let forward = control_plane
            .open_port_forward(&handle.pod_name, &self.namespace, handle.config.port)
            .await
            .map_err(|e| SessionError::PortForwardFailed {
                pod_name: handle.pod_name.clone(),
                port: handle.config.port,
                reason: e.to_string(),
            })?;
        self.forwards.insert(handle.pod_name.clone(), forward);
        Ok(())
    }

    /// Close a tracked port forward. Best-effort: closing an unknown or
    /// already-closed forward is a no-op.
    pub fn delete_port_forward(&self, pod_name: &str) {
        if let Some((_, mut forward)) = self.forwards.remove(pod_name) {
            forward.close();
        } else {
            warn!("no port forward tracked for pod '{}'", pod_name);
        }
    }

    async fn control_plane(&self) -> Result<Arc<dyn ControlPlane>, SessionError> {
        match &*self.client.read().await {
            ClientState::Ready(cp) => Ok(cp.clone()),
            _ => Err(SessionError::NotEntered),
        }
    }

    /// Delete a job's pods by label, logging and suppressing per-pod
    /// failures (the dominant failure mode is "pod already gone").
    async fn release_pods(&self, control_plane: &dyn ControlPlane, job_name: &str) {
        let selector = format!("app={job_name}");
        match control_plane.list_pods(&self.namespace, &selector).await {
            Ok(pods) => {
                for pod in pods {
                    let Some(name) = pod.metadata.name else { continue };
                    info!("deleting pod '{}'", name);
                    if let Err(e) = control_plane.delete_pod(&name, &self.namespace).await {
                        info!("error deleting pod '{}': {}", name, e);
                    }
                }
            }
            Err(e) => info!("error listing pods for '{}': {}", job_name, e),
        }
    }
}
