//! Kubernetes integration
//!
//! The control-plane client seam, the pure job/service spec builders, and
//! the status snapshot types.

pub mod client;
pub mod job;
pub mod status;

pub use client::{
    default_kubeconfig_path, ControlPlane, ControlPlaneError, KubeClientError, KubeControlPlane,
    KubeOptions, PortForward, TunnelStream,
};
pub use job::{build_job_spec, build_service_spec};
pub use status::{JobState, PodCount};
