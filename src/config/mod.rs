//! Server configuration model
//!
//! This module defines the immutable configuration for an ephemeral MCP
//! server: the container image, the runtime invocation, resource shape, and
//! the derived Kubernetes job name. A config is built once through
//! [`ServerConfigBuilder`] and never mutated afterwards.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub mod presets;

/// The generic proxy image used when no custom image is given. It wraps a
/// stdio MCP server behind an SSE endpoint.
pub const DEFAULT_PROXY_IMAGE: &str = "ghcr.io/kube-mcp/mcp-proxy:latest";

/// Default entrypoint for the proxy image.
pub const DEFAULT_ENTRYPOINT: &str = "mcp-proxy";

/// Default bind host for the exposed endpoint.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default port for the exposed endpoint.
pub const DEFAULT_PORT: u16 = 8080;

/// Errors that can occur while constructing a configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid runtime (runtime_exec={runtime_exec:?}, runtime_mcp={runtime_mcp:?}): {message}")]
    InvalidRuntime {
        runtime_exec: Option<String>,
        runtime_mcp: Option<String>,
        message: String,
    },
}

/// Configuration for one ephemeral MCP server.
///
/// `runtime_exec` and `runtime_mcp` are jointly present or absent: either the
/// image is a proxy that launches `runtime_exec runtime_mcp` (e.g. `uvx
/// mcp-server-fetch`), or the image itself is the MCP server and neither is
/// set. The derived `job_name` doubles as the Kubernetes resource name and
/// the registry key, so it is generated exactly once at build time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerConfig {
    /// Launcher program invoked by the proxy (e.g. "uvx", "npx")
    pub runtime_exec: Option<String>,
    /// MCP server package loaded by the launcher (e.g. "mcp-server-fetch")
    pub runtime_mcp: Option<String>,
    /// Container image reference
    pub image: String,
    /// Container entrypoint override
    pub entrypoint: Option<Vec<String>>,
    /// Host the MCP server binds inside the pod
    pub host: String,
    /// Port the MCP server listens on
    pub port: u16,
    /// Resource requests for the container (cpu/memory quantities)
    pub resource_requests: HashMap<String, String>,
    /// Resource limits for the container
    pub resource_limits: HashMap<String, String>,
    /// Environment variables for the container
    pub env: Option<HashMap<String, String>>,
    job_name: String,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Config for a proxied runtime invocation, e.g. `uvx mcp-server-fetch`.
    pub fn from_runtime(runtime_exec: impl Into<String>, runtime_mcp: impl Into<String>) -> Self {
        let image = DEFAULT_PROXY_IMAGE.to_string();
        let job_name = generate_job_name(image_base_name(&image));
        Self {
            runtime_exec: Some(runtime_exec.into()),
            runtime_mcp: Some(runtime_mcp.into()),
            image,
            entrypoint: Some(vec![DEFAULT_ENTRYPOINT.to_string()]),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            resource_requests: default_resource_requests(),
            resource_limits: default_resource_limits(),
            env: None,
            job_name,
        }
    }

    /// Config for an image that is itself an MCP server (no proxy runtime).
    ///
    /// The default proxy image is rejected here: a bare proxy has no server
    /// to launch, so it must be configured via [`ServerConfig::from_runtime`].
    pub fn from_image(
        image: impl Into<String>,
        entrypoint: Option<Vec<String>>,
    ) -> Result<Self, ConfigError> {
        let image = image.into();
        if image == DEFAULT_PROXY_IMAGE {
            return Err(ConfigError::InvalidRuntime {
                runtime_exec: None,
                runtime_mcp: None,
                message: format!(
                    "image '{}' is the generic proxy; use from_runtime to name the MCP server it should launch",
                    image
                ),
            });
        }
        Self::builder().image(image).entrypoint(entrypoint).build()
    }

    /// The Kubernetes job name. Generated once at build time; stable for the
    /// lifetime of this config.
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Image reference stripped of registry path and tag:
    /// `ghcr.io/org/proxy:latest` -> `proxy`.
    pub fn image_name(&self) -> &str {
        image_base_name(&self.image)
    }

    /// Arguments passed to the proxy entrypoint. Present only when both
    /// runtime fields are set.
    pub fn launch_args(&self) -> Option<Vec<String>> {
        match (&self.runtime_exec, &self.runtime_mcp) {
            (Some(exec), Some(mcp)) => Some(vec![
                "--pass-environment".to_string(),
                format!("--sse-port={}", self.port),
                format!("--sse-host={}", self.host),
                exec.clone(),
                mcp.clone(),
            ]),
            _ => None,
        }
    }
}

/// Builder for [`ServerConfig`]. `build` enforces the runtime invariant and
/// mints the job name.
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    runtime_exec: Option<String>,
    runtime_mcp: Option<String>,
    image: Option<String>,
    entrypoint: Option<Option<Vec<String>>>,
    host: Option<String>,
    port: Option<u16>,
    resource_requests: Option<HashMap<String, String>>,
    resource_limits: Option<HashMap<String, String>>,
    env: Option<HashMap<String, String>>,
}

impl ServerConfigBuilder {
    pub fn runtime(mut self, exec: impl Into<String>, mcp: impl Into<String>) -> Self {
        self.runtime_exec = Some(exec.into());
        self.runtime_mcp = Some(mcp.into());
        self
    }

    pub fn runtime_exec(mut self, exec: impl Into<String>) -> Self {
        self.runtime_exec = Some(exec.into());
        self
    }

    pub fn runtime_mcp(mut self, mcp: impl Into<String>) -> Self {
        self.runtime_mcp = Some(mcp.into());
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Entrypoint override. Passing `None` explicitly clears the default
    /// proxy entrypoint (the image's own entrypoint is used instead).
    pub fn entrypoint(mut self, entrypoint: impl Into<Option<Vec<String>>>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn resource_requests(mut self, requests: HashMap<String, String>) -> Self {
        self.resource_requests = Some(requests);
        self
    }

    pub fn resource_limits(mut self, limits: HashMap<String, String>) -> Self {
        self.resource_limits = Some(limits);
        self
    }

    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        match (&self.runtime_exec, &self.runtime_mcp) {
            (Some(_), None) => {
                return Err(ConfigError::InvalidRuntime {
                    runtime_exec: self.runtime_exec,
                    runtime_mcp: None,
                    message: "runtime_exec is specified but runtime_mcp is not".to_string(),
                });
            }
            (None, Some(_)) => {
                return Err(ConfigError::InvalidRuntime {
                    runtime_exec: None,
                    runtime_mcp: self.runtime_mcp,
                    message: "runtime_mcp is specified but runtime_exec is not".to_string(),
                });
            }
            _ => {}
        }

        let image = self.image.unwrap_or_else(|| DEFAULT_PROXY_IMAGE.to_string());
        let job_name = generate_job_name(image_base_name(&image));
        Ok(ServerConfig {
            runtime_exec: self.runtime_exec,
            runtime_mcp: self.runtime_mcp,
            entrypoint: self
                .entrypoint
                .unwrap_or_else(|| Some(vec![DEFAULT_ENTRYPOINT.to_string()])),
            host: self.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            resource_requests: self.resource_requests.unwrap_or_else(default_resource_requests),
            resource_limits: self.resource_limits.unwrap_or_else(default_resource_limits),
            env: self.env,
            image,
            job_name,
        })
    }
}

pub fn default_resource_requests() -> HashMap<String, String> {
    HashMap::from([
        ("cpu".to_string(), "100m".to_string()),
        ("memory".to_string(), "100Mi".to_string()),
    ])
}

pub fn default_resource_limits() -> HashMap<String, String> {
    HashMap::from([
        ("cpu".to_string(), "200m".to_string()),
        ("memory".to_string(), "200Mi".to_string()),
    ])
}

fn image_base_name(image: &str) -> &str {
    let base = image.rsplit('/').next().unwrap_or(image);
    base.split(':').next().unwrap_or(base)
}

/// Job names are `{image_name}-{suffix}` where the suffix is a random uuid
/// fragment, so two configs for the same image never collide in the cluster.
fn generate_job_name(image_name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", image_name, &suffix[..8])
}
