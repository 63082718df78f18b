use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1 as batch;
use k8s_openapi::api::core::v1 as core;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use log::info;

use crate::error::Error;
use crate::workload::{ResourceRequest, WorkloadKind, WorkloadSpec};

// orchestration control plane boundary. the core never talks to the
// cluster except through this trait, so tests run against a double.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn submit(&self, spec: &WorkloadSpec) -> Result<(), Error>;

    // cascading removal; already-absent workloads are not an error
    async fn remove(&self, name: &str) -> Result<(), Error>;
}

/// Control plane backed by a kubernetes namespace: single workloads become
/// pods, queue workloads become batch jobs with completions/parallelism.
pub struct KubeControlPlane {
    client: Client,
    namespace: String,
}

impl KubeControlPlane {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        KubeControlPlane {
            client,
            namespace: namespace.into(),
        }
    }
}

fn dispatch_err(e: kube::Error) -> Error {
    Error::Dispatch(e.to_string())
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(response) if response.code == 404)
}

fn quantities(r: &ResourceRequest) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(r.cpu_cores.to_string())),
        ("memory".to_string(), Quantity(format!("{}Gi", r.memory_gb))),
        ("nvidia.com/gpu".to_string(), Quantity(r.gpus.to_string())),
    ])
}

fn object_meta(spec: &WorkloadSpec) -> ObjectMeta {
    ObjectMeta {
        name: Some(spec.name.clone()),
        labels: Some(spec.labels.iter().cloned().collect()),
        ..Default::default()
    }
}

fn pod_spec(spec: &WorkloadSpec) -> core::PodSpec {
    core::PodSpec {
        // training jobs need large shared-memory segments for data
        // loading, so the host ipc namespace is shared on purpose
        host_ipc: Some(true),
        restart_policy: Some("Never".to_string()),
        node_selector: if spec.cpu_only {
            Some(BTreeMap::from([(
                "hardware-type".to_string(),
                "CPUONLY".to_string(),
            )]))
        } else {
            None
        },
        volumes: Some(
            spec.volumes
                .iter()
                .map(|(name, _)| core::Volume {
                    name: name.clone(),
                    persistent_volume_claim: Some(core::PersistentVolumeClaimVolumeSource {
                        claim_name: name.clone(),
                        read_only: None,
                    }),
                    ..Default::default()
                })
                .collect(),
        ),
        containers: vec![core::Container {
            name: "worker".to_string(),
            image: Some(spec.image.clone()),
            command: Some(spec.command.clone()),
            env: Some(
                spec.env
                    .iter()
                    .map(|(name, value)| core::EnvVar {
                        name: name.clone(),
                        value: Some(value.clone()),
                        value_from: None,
                    })
                    .collect(),
            ),
            volume_mounts: Some(
                spec.volumes
                    .iter()
                    .map(|(name, mount_path)| core::VolumeMount {
                        name: name.clone(),
                        mount_path: mount_path.clone(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            resources: Some(core::ResourceRequirements {
                limits: Some(quantities(&spec.resources.limits)),
                requests: Some(quantities(&spec.resources.requests)),
                ..Default::default()
            }),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn as_pod(spec: &WorkloadSpec) -> core::Pod {
    core::Pod {
        metadata: object_meta(spec),
        spec: Some(pod_spec(spec)),
        ..Default::default()
    }
}

fn as_batch_job(spec: &WorkloadSpec, completions: u32, parallelism: u32) -> batch::Job {
    let metadata = object_meta(spec);
    batch::Job {
        metadata: metadata.clone(),
        spec: Some(batch::JobSpec {
            // a failed attempt is not relaunched; failures surface
            backoff_limit: Some(0),
            completions: Some(completions as i32),
            parallelism: Some(parallelism as i32),
            template: core::PodTemplateSpec {
                metadata: Some(metadata),
                spec: Some(pod_spec(spec)),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn submit(&self, spec: &WorkloadSpec) -> Result<(), Error> {
        match spec.kind {
            WorkloadKind::Single => {
                let pods: Api<core::Pod> =
                    Api::namespaced(self.client.clone(), &self.namespace);
                pods.create(&PostParams::default(), &as_pod(spec))
                    .await
                    .map_err(dispatch_err)?;
            }
            WorkloadKind::Queue {
                completions,
                parallelism,
            } => {
                let jobs: Api<batch::Job> =
                    Api::namespaced(self.client.clone(), &self.namespace);
                jobs.create(
                    &PostParams::default(),
                    &as_batch_job(spec, completions, parallelism),
                )
                .await
                .map_err(dispatch_err)?;
            }
        }
        info!(
            "Submitted workload `{}` to namespace `{}`.",
            spec.name, self.namespace
        );
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), Error> {
        // children are torn down before the parent is reported gone
        let params = DeleteParams::foreground();

        let jobs: Api<batch::Job> = Api::namespaced(self.client.clone(), &self.namespace);
        match jobs.delete(name, &params).await {
            Ok(_) => return Ok(()),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(dispatch_err(e)),
        }

        // single dispatches run as bare pods
        let pods: Api<core::Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        match pods.delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(dispatch_err(e)),
        }
    }
}
