use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::k8s::KubeOptions;

#[derive(Parser, Debug)]
#[command(name = "kube-mcp")]
#[command(about = "Provision ephemeral MCP servers as Kubernetes jobs")]
#[command(version)]
pub struct Args {
    /// Kubernetes namespace to create servers in
    #[arg(short, long, env = "KUBE_MCP_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Bind address for the HTTP API
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0")]
    pub bind_addr: String,

    /// Port for the HTTP API
    #[arg(short, long, value_name = "PORT", default_value = "8000")]
    pub port: u16,

    /// Kubeconfig file (defaults to $KUBECONFIG or ~/.kube/config)
    #[arg(long, env = "KUBE_MCP_KUBECONFIG", value_name = "FILE")]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context name
    #[arg(long, env = "KUBE_MCP_CONTEXT", value_name = "NAME")]
    pub kube_context: Option<String>,

    /// Seconds between readiness/deletion status polls
    #[arg(long, default_value = "1")]
    pub poll_interval: u64,

    /// Deadline in seconds for readiness/deletion waits
    #[arg(long, default_value = "60")]
    pub max_wait: u64,

    /// HTTP request timeout in seconds (creates may block on readiness)
    #[arg(long, default_value = "120")]
    pub request_timeout: u64,

    /// Path to a .env file for loading MCP server credentials
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,
}

impl Args {
    pub fn kube_options(&self) -> KubeOptions {
        KubeOptions {
            kubeconfig: self.kubeconfig.clone(),
            context: self.kube_context.clone(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["kube-mcp"]).unwrap();
        assert_eq!(args.namespace, "default");
        assert_eq!(args.bind_addr, "0.0.0.0");
        assert_eq!(args.port, 8000);
        assert_eq!(args.poll_interval(), Duration::from_secs(1));
        assert_eq!(args.max_wait(), Duration::from_secs(60));
    }

    #[test]
    fn test_kube_options() {
        let args = Args::try_parse_from([
            "kube-mcp",
            "--kubeconfig",
            "/tmp/config",
            "--kube-context",
            "kind-kind",
            "--namespace",
            "tools",
        ])
        .unwrap();

        let options = args.kube_options();
        assert_eq!(options.kubeconfig, Some(PathBuf::from("/tmp/config")));
        assert_eq!(options.context.as_deref(), Some("kind-kind"));
        assert_eq!(args.namespace, "tools");
    }
}
