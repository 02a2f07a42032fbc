//! Job and Service spec builders
//!
//! Pure functions from a [`ServerConfig`] to Kubernetes resource descriptors.
//! No I/O happens here; the session manager submits the results.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
    Service, ServicePort, ServiceSpec, TCPSocketAction,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::config::ServerConfig;

/// Transient container restarts must not flip the job to failed; the job runs
/// until it is explicitly deleted.
const BACKOFF_LIMIT: i32 = 10;

/// Render the job descriptor for a server config.
///
/// The pod template carries the label `app = job_name`; that label is the
/// sole linkage used later to find the job's pods for readiness checks and
/// deletion. The TCP readiness probe is advisory to the orchestrator only:
/// the session manager re-derives readiness from pod phase.
pub fn build_job_spec(config: &ServerConfig, namespace: &str) -> Job {
    let job_name = config.job_name().to_string();

    let env_list: Vec<EnvVar> = config
        .env
        .as_ref()
        .map(|env| {
            env.iter()
                .collect::<BTreeMap<_, _>>()
                .into_iter()
                .map(|(name, value)| EnvVar {
                    name: name.clone(),
                    value: Some(value.clone()),
                    value_from: None,
                })
                .collect()
        })
        .unwrap_or_default();

    let container = Container {
        name: job_name.clone(),
        image: Some(config.image.clone()),
        command: config.entrypoint.clone(),
        args: config.launch_args(),
        image_pull_policy: Some("IfNotPresent".to_string()),
        resources: Some(ResourceRequirements {
            requests: Some(to_quantities(&config.resource_requests)),
            limits: Some(to_quantities(&config.resource_limits)),
            ..Default::default()
        }),
        ports: Some(vec![ContainerPort {
            container_port: i32::from(config.port),
            ..Default::default()
        }]),
        env: Some(env_list),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(i32::from(config.port)),
                host: None,
            }),
            initial_delay_seconds: Some(5),
            period_seconds: Some(1),
            timeout_seconds: Some(2),
            success_threshold: Some(1),
            failure_threshold: Some(10),
            ..Default::default()
        }),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(job_name.clone()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(BACKOFF_LIMIT),
            // no completions/parallelism: run-until-deleted semantics
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(app_label(&job_name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    restart_policy: Some("Never".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Render the ClusterIP service that exposes a server's port inside the
/// cluster, selecting the job's pods by the `app` label.
pub fn build_service_spec(config: &ServerConfig) -> Service {
    let job_name = config.job_name().to_string();

    Service {
        metadata: ObjectMeta {
            name: Some(job_name.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(app_label(&job_name)),
            ports: Some(vec![ServicePort {
                port: i32::from(config.port),
                target_port: Some(IntOrString::Int(i32::from(config.port))),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn app_label(job_name: &str) -> BTreeMap<String, String> {
    [("app".to_string(), job_name.to_string())].into_iter().collect()
}

fn to_quantities(resources: &std::collections::HashMap<String, String>) -> BTreeMap<String, Quantity> {
    resources
        .iter()
        .map(|(name, value)| (name.clone(), Quantity(value.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn fetch_config() -> ServerConfig {
        ServerConfig::from_runtime("uvx", "mcp-server-fetch")
    }

    #[test]
    fn test_job_identity_and_labels() {
        let config = fetch_config();
        let job = build_job_spec(&config, "tools");

        assert_eq!(job.metadata.name.as_deref(), Some(config.job_name()));
        assert_eq!(job.metadata.namespace.as_deref(), Some("tools"));

        let template = job.spec.as_ref().unwrap().template.clone();
        let labels = template.metadata.unwrap().labels.unwrap();
        assert_eq!(labels.get("app").map(String::as_str), Some(config.job_name()));
    }

    #[test]
    fn test_job_runs_until_deleted() {
        let config = fetch_config();
        let job = build_job_spec(&config, "default");
        let spec = job.spec.unwrap();

        assert_eq!(spec.backoff_limit, Some(10));
        assert_eq!(spec.completions, None);
        assert_eq!(spec.parallelism, None);

        let pod_spec = spec.template.spec.unwrap();
        assert_eq!(pod_spec.restart_policy.as_deref(), Some("Never"));
    }

    #[test]
    fn test_container_shape() {
        let config = fetch_config();
        let job = build_job_spec(&config, "default");
        let container = job.spec.unwrap().template.spec.unwrap().containers[0].clone();

        assert_eq!(container.name, config.job_name());
        assert_eq!(container.image.as_deref(), Some(config.image.as_str()));
        assert_eq!(container.command, config.entrypoint);
        assert_eq!(container.args, config.launch_args());
        assert_eq!(container.image_pull_policy.as_deref(), Some("IfNotPresent"));
        assert_eq!(container.ports.unwrap()[0].container_port, 8080);

        let resources = container.resources.unwrap();
        assert_eq!(resources.requests.unwrap()["cpu"], Quantity("100m".to_string()));
        assert_eq!(resources.limits.unwrap()["memory"], Quantity("200Mi".to_string()));
    }

    #[test]
    fn test_readiness_probe_parameters() {
        let config = fetch_config();
        let job = build_job_spec(&config, "default");
        let container = job.spec.unwrap().template.spec.unwrap().containers[0].clone();
        let probe = container.readiness_probe.unwrap();

        assert_eq!(probe.tcp_socket.unwrap().port, IntOrString::Int(8080));
        assert_eq!(probe.initial_delay_seconds, Some(5));
        assert_eq!(probe.period_seconds, Some(1));
        assert_eq!(probe.timeout_seconds, Some(2));
        assert_eq!(probe.success_threshold, Some(1));
        assert_eq!(probe.failure_threshold, Some(10));
    }

    #[test]
    fn test_env_mapping() {
        let config = ServerConfig::builder()
            .runtime("npx", "@modelcontextprotocol/server-github")
            .env(HashMap::from([
                ("GITHUB_TOKEN".to_string(), "secret".to_string()),
                ("DYNAMIC_TOOLSETS".to_string(), "1".to_string()),
            ]))
            .build()
            .unwrap();

        let job = build_job_spec(&config, "default");
        let env = job.spec.unwrap().template.spec.unwrap().containers[0]
            .env
            .clone()
            .unwrap();

        // env list is sorted by name for deterministic specs
        assert_eq!(env[0].name, "DYNAMIC_TOOLSETS");
        assert_eq!(env[0].value.as_deref(), Some("1"));
        assert_eq!(env[1].name, "GITHUB_TOKEN");
        assert_eq!(env[1].value.as_deref(), Some("secret"));
    }

    #[test]
    fn test_env_absent_maps_to_empty_list() {
        let config = fetch_config();
        let job = build_job_spec(&config, "default");
        let env = job.spec.unwrap().template.spec.unwrap().containers[0]
            .env
            .clone()
            .unwrap();
        assert!(env.is_empty());
    }

    #[test]
    fn test_service_selects_job_pods() {
        let config = fetch_config();
        let service = build_service_spec(&config);

        assert_eq!(service.metadata.name.as_deref(), Some(config.job_name()));
        let spec = service.spec.unwrap();
        let selector = spec.selector.unwrap();
        assert_eq!(selector.get("app").map(String::as_str), Some(config.job_name()));

        let port = spec.ports.unwrap()[0].clone();
        assert_eq!(port.port, 8080);
        assert_eq!(port.target_port, Some(IntOrString::Int(8080)));
    }
}
