//! kube-mcp - provision ephemeral MCP servers as Kubernetes jobs
//!
//! Each server runs as a run-until-deleted Job whose pod proxies an MCP
//! runtime (e.g. `uvx mcp-server-fetch`) behind an SSE endpoint. The
//! [`session::SessionManager`] owns the lifecycle: create, wait for
//! readiness, expose, and tear down.

pub mod cli;
pub mod config;
pub mod k8s;
pub mod server;
pub mod session;

pub use config::{ConfigError, ServerConfig};
pub use session::{ServerHandle, SessionError, SessionManager};
