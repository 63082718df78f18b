use std::collections::BTreeMap;

use mongodb::bson::{Bson, Document};
use serde::Deserialize;

use crate::job::{CloneSource, JobSubmission, RuntimeEnvironment};
use crate::workload::Volumes;

// declarative description of a batch of jobs as read in from disk(toml)

fn default_memory_gb() -> u32 {
    128
}

fn default_cpu_cores() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
pub struct ClusterSection {
    pub image: String,

    // either a bare list of claim names or an explicit name -> mount map
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub mounts: BTreeMap<String, String>,

    #[serde(default)]
    pub gpus: u32,
    #[serde(default = "default_memory_gb")]
    pub memory_gb: u32,
    #[serde(default = "default_cpu_cores")]
    pub cpu_cores: u32,

    // when set, the whole batch is submitted as one work queue
    pub parallelism: Option<u32>,

    pub results_dir: Option<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ClusterSection {
    pub fn volumes(&self) -> Volumes {
        if self.mounts.is_empty() {
            Volumes::Named(self.volumes.clone())
        } else {
            Volumes::Mapped(self.mounts.clone())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JobEntry {
    pub name: String,

    // overrides the batch-wide script
    pub script: Option<String>,

    #[serde(default)]
    pub config: toml::Table,
}

#[derive(Debug, Deserialize)]
pub struct BatchDescription {
    // defaults to $USER when omitted
    pub user: Option<String>,
    pub project: String,
    pub experiment: String,

    // entry point executed for every job unless a job overrides it
    pub script: String,

    // exactly one of the two: a local directory to package and upload,
    // or a path already present on the worker
    pub code_dir: Option<String>,
    pub code_path: Option<String>,
    #[serde(default)]
    pub code_excludes: Vec<String>,

    // batch-wide config; per-job keys win on conflict
    #[serde(default)]
    pub config: toml::Table,

    pub cluster: ClusterSection,

    pub jobs: Vec<JobEntry>,
}

impl BatchDescription {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// One submission per job entry, sharing the resolved clone source.
    pub fn submissions(&self, clone: CloneSource) -> Vec<(String, JobSubmission)> {
        self.jobs
            .iter()
            .map(|entry| {
                let mut config = self.config.clone();
                for (key, value) in &entry.config {
                    config.insert(key.clone(), value.clone());
                }
                let mut submission = JobSubmission::new(
                    self.project.clone(),
                    self.experiment.clone(),
                    entry.name.clone(),
                    RuntimeEnvironment {
                        clone: clone.clone(),
                        script: entry
                            .script
                            .clone()
                            .unwrap_or_else(|| self.script.clone()),
                    },
                );
                submission.user = self.user.clone();
                submission.config_overrides = table_to_document(&config);
                (entry.name.clone(), submission)
            })
            .collect()
    }
}

// toml values map onto the sum-typed config representation the registry
// persists; datetimes degrade to their string form
pub fn toml_to_bson(value: &toml::Value) -> Bson {
    match value {
        toml::Value::String(s) => Bson::String(s.clone()),
        toml::Value::Integer(i) => Bson::Int64(*i),
        toml::Value::Float(f) => Bson::Double(*f),
        toml::Value::Boolean(b) => Bson::Boolean(*b),
        toml::Value::Datetime(dt) => Bson::String(dt.to_string()),
        toml::Value::Array(items) => Bson::Array(items.iter().map(toml_to_bson).collect()),
        toml::Value::Table(table) => Bson::Document(table_to_document(table)),
    }
}

pub fn table_to_document(table: &toml::Table) -> Document {
    table
        .iter()
        .map(|(key, value)| (key.clone(), toml_to_bson(value)))
        .collect()
}
