//! Control-plane client abstraction
//!
//! The session manager talks to Kubernetes through the [`ControlPlane`]
//! trait: the narrow capability set it actually needs (job CRUD, pod listing,
//! service CRUD, port-forward streams, namespace listing). The production
//! implementation wraps the `kube` client; tests use [`mock::MockControlPlane`].

use std::path::PathBuf;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Pod, Service};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Errors surfaced by control-plane calls
#[derive(Error, Debug)]
pub enum ControlPlaneError {
    #[error("resource not found")]
    NotFound,

    #[error("api error {code}: {message}")]
    Api { code: u16, message: String },

    #[error("connection error: {0}")]
    Connection(String),
}

impl From<kube::Error> for ControlPlaneError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 404 => ControlPlaneError::NotFound,
            kube::Error::Api(resp) => ControlPlaneError::Api {
                code: resp.code,
                message: resp.message,
            },
            other => ControlPlaneError::Connection(other.to_string()),
        }
    }
}

/// Errors that can occur while loading Kubernetes credentials
#[derive(Error, Debug)]
pub enum KubeClientError {
    #[error("no usable kubernetes credentials (kubeconfig: {kubeconfig}; in-cluster: {incluster})")]
    CredentialsUnavailable { kubeconfig: String, incluster: String },

    #[error("failed to construct kubernetes client: {0}")]
    ClientConstruction(String),
}

/// Credential selection for [`KubeControlPlane::load`]
#[derive(Debug, Clone, Default)]
pub struct KubeOptions {
    /// Kubeconfig file path; defaults to `$KUBECONFIG` or `~/.kube/config`
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context name; defaults to the file's current context
    pub context: Option<String>,
}

/// Default kubeconfig location: `$KUBECONFIG`, falling back to `~/.kube/config`
pub fn default_kubeconfig_path() -> PathBuf {
    std::env::var_os("KUBECONFIG").map(PathBuf::from).unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".kube")
            .join("config")
    })
}

/// A bidirectional tunnel stream to a pod port.
pub trait TunnelStream: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync> TunnelStream for T {}

/// An open local-to-pod port forward.
///
/// Holds the forwarded stream and the background task driving the tunnel.
/// Closing is best-effort and idempotent; dropping the handle closes it.
pub struct PortForward {
    pod_name: String,
    port: u16,
    stream: Option<Box<dyn TunnelStream>>,
    driver: Option<JoinHandle<()>>,
}

impl PortForward {
    pub fn new(
        pod_name: impl Into<String>,
        port: u16,
        stream: Box<dyn TunnelStream>,
        driver: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            pod_name: pod_name.into(),
            port,
            stream: Some(stream),
            driver,
        }
    }

    pub fn pod_name(&self) -> &str {
        &self.pod_name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Take ownership of the forwarded stream. Returns `None` once taken or
    /// after the forward is closed.
    pub fn take_stream(&mut self) -> Option<Box<dyn TunnelStream>> {
        self.stream.take()
    }

    pub fn close(&mut self) {
        self.stream = None;
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

impl Drop for PortForward {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PortForward {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortForward")
            .field("pod_name", &self.pod_name)
            .field("port", &self.port)
            .field("open", &self.stream.is_some())
            .finish()
    }
}

/// The capability set the session manager consumes.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, ControlPlaneError>;

    async fn get_job(&self, name: &str, namespace: &str) -> Result<Job, ControlPlaneError>;

    /// Delete a job with foreground propagation.
    async fn delete_job(&self, name: &str, namespace: &str) -> Result<(), ControlPlaneError>;

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, ControlPlaneError>;

    /// Delete a pod immediately (grace period 0, background propagation).
    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<(), ControlPlaneError>;

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, ControlPlaneError>;

    async fn delete_service(&self, name: &str, namespace: &str) -> Result<(), ControlPlaneError>;

    async fn open_port_forward(
        &self,
        pod_name: &str,
        namespace: &str,
        port: u16,
    ) -> Result<PortForward, ControlPlaneError>;

    async fn list_namespaces(&self) -> Result<Vec<String>, ControlPlaneError>;
}

// ============================================================================
// Production implementation over the kube client
// ============================================================================

/// [`ControlPlane`] backed by a real cluster connection.
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    /// Load credentials and build a client.
    ///
    /// Tries the local kubeconfig first, then falls back to in-cluster
    /// service-account discovery.
    pub async fn load(options: &KubeOptions) -> Result<Self, KubeClientError> {
        let config = match try_kubeconfig(options).await {
            Ok(config) => {
                info!("using local kubeconfig");
                config
            }
            Err(kubeconfig_err) => match Config::incluster() {
                Ok(config) => {
                    info!("using in-cluster service account");
                    config
                }
                Err(incluster_err) => {
                    return Err(KubeClientError::CredentialsUnavailable {
                        kubeconfig: kubeconfig_err.to_string(),
                        incluster: incluster_err.to_string(),
                    });
                }
            },
        };

        let client = Client::try_from(config)
            .map_err(|e| KubeClientError::ClientConstruction(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn try_kubeconfig(options: &KubeOptions) -> Result<Config, kube::config::KubeconfigError> {
    let context = KubeConfigOptions {
        context: options.context.clone(),
        ..Default::default()
    };
    let path = options.kubeconfig.clone().unwrap_or_else(default_kubeconfig_path);
    let kubeconfig = Kubeconfig::read_from(path)?;
    Config::from_custom_kubeconfig(kubeconfig, &context).await
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, ControlPlaneError> {
        let created = self.jobs(namespace).create(&PostParams::default(), job).await?;
        Ok(created)
    }

    async fn get_job(&self, name: &str, namespace: &str) -> Result<Job, ControlPlaneError> {
        let job = self.jobs(namespace).get(name).await?;
        Ok(job)
    }

    async fn delete_job(&self, name: &str, namespace: &str) -> Result<(), ControlPlaneError> {
        self.jobs(namespace).delete(name, &DeleteParams::foreground()).await?;
        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, ControlPlaneError> {
        let params = ListParams::default().labels(label_selector);
        let pods = self.pods(namespace).list(&params).await?;
        Ok(pods.items)
    }

    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<(), ControlPlaneError> {
        let params = DeleteParams::background().grace_period(0);
        self.pods(namespace).delete(name, &params).await?;
        Ok(())
    }

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, ControlPlaneError> {
        let created = self
            .services(namespace)
            .create(&PostParams::default(), service)
            .await?;
        Ok(created)
    }

    async fn delete_service(&self, name: &str, namespace: &str) -> Result<(), ControlPlaneError> {
        self.services(namespace).delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn open_port_forward(
        &self,
        pod_name: &str,
        namespace: &str,
        port: u16,
    ) -> Result<PortForward, ControlPlaneError> {
        let mut forwarder = self.pods(namespace).portforward(pod_name, &[port]).await?;
        let stream = forwarder
            .take_stream(port)
            .ok_or_else(|| ControlPlaneError::Connection(format!("no stream for port {port}")))?;

        let pod = pod_name.to_string();
        let driver = tokio::spawn(async move {
            if let Err(e) = forwarder.join().await {
                warn!("port forward for pod '{}' ended: {}", pod, e);
            }
        });

        Ok(PortForward::new(pod_name, port, Box::new(stream), Some(driver)))
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, ControlPlaneError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces.list(&ListParams::default()).await?;
        Ok(list.items.into_iter().filter_map(|ns| ns.metadata.name).collect())
    }
}

// ============================================================================
// In-memory mock for tests
// ============================================================================

pub mod mock {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use k8s_openapi::api::batch::v1::JobStatus;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use tokio::io::DuplexStream;
    use tokio::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct MockState {
        jobs: HashMap<String, Job>,
        services: HashMap<String, Service>,
        pod_phases: HashMap<String, String>,
        forward_peers: Vec<DuplexStream>,
    }

    /// In-memory control plane with scriptable pod phases and failure
    /// injection. Newly created jobs get one pod in `default_pod_phase`.
    pub struct MockControlPlane {
        namespaces: Vec<String>,
        default_pod_phase: Mutex<Option<String>>,
        fail_create: AtomicBool,
        strip_created_name: AtomicBool,
        retain_jobs_on_delete: AtomicBool,
        fail_port_forward: AtomicBool,
        deleted_pods: AtomicUsize,
        state: Mutex<MockState>,
    }

    impl Default for MockControlPlane {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockControlPlane {
        pub fn new() -> Self {
            Self {
                namespaces: vec!["default".to_string()],
                default_pod_phase: Mutex::new(Some("Running".to_string())),
                fail_create: AtomicBool::new(false),
                strip_created_name: AtomicBool::new(false),
                retain_jobs_on_delete: AtomicBool::new(false),
                fail_port_forward: AtomicBool::new(false),
                deleted_pods: AtomicUsize::new(0),
                state: Mutex::new(MockState::default()),
            }
        }

        pub fn with_namespaces(mut self, namespaces: &[&str]) -> Self {
            self.namespaces = namespaces.iter().map(|ns| ns.to_string()).collect();
            self
        }

        /// Phase given to pods of newly created jobs; `None` means the pod is
        /// not scheduled yet (no pods listed).
        pub async fn set_default_pod_phase(&self, phase: Option<&str>) {
            *self.default_pod_phase.lock().await = phase.map(str::to_string);
        }

        pub async fn set_pod_phase(&self, job_name: &str, phase: &str) {
            self.state
                .lock()
                .await
                .pod_phases
                .insert(job_name.to_string(), phase.to_string());
        }

        pub fn fail_create(&self, fail: bool) {
            self.fail_create.store(fail, Ordering::SeqCst);
        }

        pub fn strip_created_name(&self, strip: bool) {
            self.strip_created_name.store(strip, Ordering::SeqCst);
        }

        /// Make `delete_job` succeed without removing the job, so deletion
        /// waits never observe absence.
        pub fn retain_jobs_on_delete(&self, retain: bool) {
            self.retain_jobs_on_delete.store(retain, Ordering::SeqCst);
        }

        pub fn fail_port_forward(&self, fail: bool) {
            self.fail_port_forward.store(fail, Ordering::SeqCst);
        }

        pub async fn job_names(&self) -> Vec<String> {
            self.state.lock().await.jobs.keys().cloned().collect()
        }

        pub async fn has_job(&self, name: &str) -> bool {
            self.state.lock().await.jobs.contains_key(name)
        }

        pub async fn service_names(&self) -> Vec<String> {
            self.state.lock().await.services.keys().cloned().collect()
        }

        pub fn deleted_pod_count(&self) -> usize {
            self.deleted_pods.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ControlPlane for MockControlPlane {
        async fn create_job(&self, _namespace: &str, job: &Job) -> Result<Job, ControlPlaneError> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(ControlPlaneError::Api {
                    code: 422,
                    message: "job rejected".to_string(),
                });
            }

            let name = job.metadata.name.clone().unwrap_or_default();
            let mut state = self.state.lock().await;
            if state.jobs.contains_key(&name) {
                return Err(ControlPlaneError::Api {
                    code: 409,
                    message: format!("job '{name}' already exists"),
                });
            }

            let mut created = job.clone();
            created.status = Some(JobStatus {
                active: Some(1),
                ..Default::default()
            });
            state.jobs.insert(name.clone(), created.clone());
            if let Some(phase) = self.default_pod_phase.lock().await.clone() {
                state.pod_phases.insert(name, phase);
            }

            if self.strip_created_name.load(Ordering::SeqCst) {
                created.metadata.name = None;
            }
            Ok(created)
        }

        async fn get_job(&self, name: &str, _namespace: &str) -> Result<Job, ControlPlaneError> {
            self.state
                .lock()
                .await
                .jobs
                .get(name)
                .cloned()
                .ok_or(ControlPlaneError::NotFound)
        }

        async fn delete_job(&self, name: &str, _namespace: &str) -> Result<(), ControlPlaneError> {
            let mut state = self.state.lock().await;
            if !state.jobs.contains_key(name) {
                return Err(ControlPlaneError::NotFound);
            }
            if !self.retain_jobs_on_delete.load(Ordering::SeqCst) {
                state.jobs.remove(name);
                state.pod_phases.remove(name);
            }
            Ok(())
        }

        async fn list_pods(
            &self,
            _namespace: &str,
            label_selector: &str,
        ) -> Result<Vec<Pod>, ControlPlaneError> {
            let job_name = label_selector.strip_prefix("app=").unwrap_or(label_selector);
            let state = self.state.lock().await;
            let Some(phase) = state.pod_phases.get(job_name) else {
                return Ok(vec![]);
            };

            let pod = Pod {
                metadata: ObjectMeta {
                    name: Some(format!("{job_name}-pod")),
                    labels: Some(
                        [("app".to_string(), job_name.to_string())].into_iter().collect(),
                    ),
                    ..Default::default()
                },
                status: Some(PodStatus {
                    phase: Some(phase.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            };
            Ok(vec![pod])
        }

        async fn delete_pod(&self, name: &str, _namespace: &str) -> Result<(), ControlPlaneError> {
            let job_name = name.trim_end_matches("-pod");
            self.state.lock().await.pod_phases.remove(job_name);
            self.deleted_pods.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn create_service(
            &self,
            _namespace: &str,
            service: &Service,
        ) -> Result<Service, ControlPlaneError> {
            let name = service.metadata.name.clone().unwrap_or_default();
            self.state.lock().await.services.insert(name, service.clone());
            Ok(service.clone())
        }

        async fn delete_service(
            &self,
            name: &str,
            _namespace: &str,
        ) -> Result<(), ControlPlaneError> {
            self.state
                .lock()
                .await
                .services
                .remove(name)
                .map(|_| ())
                .ok_or(ControlPlaneError::NotFound)
        }

        async fn open_port_forward(
            &self,
            pod_name: &str,
            _namespace: &str,
            port: u16,
        ) -> Result<PortForward, ControlPlaneError> {
            if self.fail_port_forward.load(Ordering::SeqCst) {
                return Err(ControlPlaneError::Connection(
                    "port forward refused".to_string(),
                ));
            }

            let (local, peer) = tokio::io::duplex(1024);
            self.state.lock().await.forward_peers.push(peer);
            Ok(PortForward::new(pod_name, port, Box::new(local), None))
        }

        async fn list_namespaces(&self) -> Result<Vec<String>, ControlPlaneError> {
            Ok(self.namespaces.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::mock::MockControlPlane;
    use super::*;
    use crate::config::ServerConfig;
    use crate::k8s::job::build_job_spec;

    #[test]
    fn test_default_kubeconfig_path_env_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"apiVersion: v1\nkind: Config\n").unwrap();

        std::env::set_var("KUBECONFIG", file.path());
        assert_eq!(default_kubeconfig_path(), file.path());
        std::env::remove_var("KUBECONFIG");

        let fallback = default_kubeconfig_path();
        assert!(fallback.ends_with(".kube/config"));
    }

    #[tokio::test]
    async fn test_mock_job_lifecycle() {
        let mock = MockControlPlane::new();
        let config = ServerConfig::from_runtime("uvx", "mcp-server-fetch");
        let job = build_job_spec(&config, "default");

        let created = mock.create_job("default", &job).await.unwrap();
        assert_eq!(created.metadata.name.as_deref(), Some(config.job_name()));

        let fetched = mock.get_job(config.job_name(), "default").await.unwrap();
        assert_eq!(fetched.status.and_then(|s| s.active), Some(1));

        mock.delete_job(config.job_name(), "default").await.unwrap();
        assert!(matches!(
            mock.get_job(config.job_name(), "default").await,
            Err(ControlPlaneError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_mock_duplicate_job_rejected() {
        let mock = MockControlPlane::new();
        let config = ServerConfig::from_runtime("uvx", "mcp-server-git");
        let job = build_job_spec(&config, "default");

        mock.create_job("default", &job).await.unwrap();
        let err = mock.create_job("default", &job).await;
        assert!(matches!(err, Err(ControlPlaneError::Api { code: 409, .. })));
    }

    #[tokio::test]
    async fn test_mock_pods_follow_label_selector() {
        let mock = MockControlPlane::new();
        let config = ServerConfig::from_runtime("uvx", "mcp-server-time");
        let job = build_job_spec(&config, "default");
        mock.create_job("default", &job).await.unwrap();

        let selector = format!("app={}", config.job_name());
        let pods = mock.list_pods("default", &selector).await.unwrap();
        assert_eq!(pods.len(), 1);
        let phase = pods[0].status.as_ref().and_then(|s| s.phase.clone());
        assert_eq!(phase.as_deref(), Some("Running"));

        let none = mock.list_pods("default", "app=unrelated").await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_mock_port_forward_stream() {
        let mock = MockControlPlane::new();
        let mut forward = mock.open_port_forward("some-pod", "default", 8080).await.unwrap();
        assert_eq!(forward.pod_name(), "some-pod");
        assert_eq!(forward.port(), 8080);
        assert!(forward.take_stream().is_some());
        assert!(forward.take_stream().is_none());
        forward.close();
    }
}
