use std::collections::BTreeMap;

// container entrypoint wrapping every worker command
pub const ENTRYPOINT: &str = "/entrypoint.sh";

/// Requested capacity for a workload. Defaults mirror what the training
/// images are tuned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRequest {
    pub gpus: u32,
    pub memory_gb: u32,
    pub cpu_cores: u32,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        ResourceRequest {
            gpus: 0,
            memory_gb: 128,
            cpu_cores: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSpec {
    pub limits: ResourceRequest,
    pub requests: ResourceRequest,
}

// limits are the request verbatim; requests are under-stated at two thirds
// (integer floor) of memory and cpu to help the control plane bin-pack,
// except gpus, which are not fractionally shareable.
pub fn derive_resources(request: ResourceRequest) -> ResourceSpec {
    ResourceSpec {
        limits: request,
        requests: ResourceRequest {
            gpus: request.gpus,
            memory_gb: request.memory_gb * 2 / 3,
            cpu_cores: request.cpu_cores * 2 / 3,
        },
    }
}

/// Volumes as callers hand them in: a bare list of claim names, each
/// self-mounted at `/<name>`, or an explicit name-to-mount-path mapping.
#[derive(Debug, Clone)]
pub enum Volumes {
    Named(Vec<String>),
    Mapped(BTreeMap<String, String>),
}

impl Volumes {
    pub fn normalized(&self) -> Vec<(String, String)> {
        match self {
            Volumes::Named(names) => names
                .iter()
                .map(|name| (name.clone(), format!("/{name}")))
                .collect(),
            Volumes::Mapped(map) => map
                .iter()
                .map(|(name, mount)| (name.clone(), mount.clone()))
                .collect(),
        }
    }
}

impl From<Vec<String>> for Volumes {
    fn from(names: Vec<String>) -> Self {
        Volumes::Named(names)
    }
}

impl From<BTreeMap<String, String>> for Volumes {
    fn from(map: BTreeMap<String, String>) -> Self {
        Volumes::Mapped(map)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    // one container, run once
    Single,
    // up to `parallelism` workers consume one work item each until
    // `completions` items are done
    Queue { completions: u32, parallelism: u32 },
}

/// A value object handed to the control plane and then discarded — it is
/// built fresh for every dispatch and never persisted. Restart policy is
/// always "never": failures surface instead of being retried transparently.
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    pub volumes: Vec<(String, String)>,
    pub resources: ResourceSpec,
    // placement hint: pin to cpu-only nodes when no gpus were requested
    pub cpu_only: bool,
    pub labels: Vec<(String, String)>,
    pub kind: WorkloadKind,
}

impl WorkloadSpec {
    /// Pure transform from dispatch inputs to a submittable spec.
    pub fn build(
        name: String,
        image: String,
        command: Vec<String>,
        request: ResourceRequest,
        env: Vec<(String, String)>,
        volumes: &Volumes,
        labels: Vec<(String, String)>,
        kind: WorkloadKind,
    ) -> Self {
        let mut full_command = vec![ENTRYPOINT.to_string()];
        full_command.extend(command);
        WorkloadSpec {
            name,
            image,
            command: full_command,
            env,
            volumes: volumes.normalized(),
            resources: derive_resources(request),
            cpu_only: request.gpus == 0,
            labels,
            kind,
        }
    }
}
