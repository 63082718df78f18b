use std::{env, fs, path::Path, sync::Arc};

use clap::{Parser, Subcommand};
use log::{info, warn};
use mongodb::{
    bson::doc,
    options::{ClientOptions, ServerApi, ServerApiVersion},
};
use tracing_subscriber::EnvFilter;

use jobmon::archive::ArchivePackager;
use jobmon::batch::BatchDescription;
use jobmon::blob::GridFsBlobStore;
use jobmon::cluster::KubeControlPlane;
use jobmon::dispatch::{ClusterDispatcher, DispatchOptions};
use jobmon::job::CloneSource;
use jobmon::registry::JobRegistry;
use jobmon::store::MongoJobStore;
use jobmon::workload::ResourceRequest;

// CLI
#[derive(Parser, Debug)]
#[command(name = "jobmon")]
#[command(version = "0.1.0")]
#[command(about = "Submit ML training runs to a shared cluster and track \
                   them from registration to completion.",
          long_about = None)
]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a batch of jobs and start them on the cluster
    Schedule {
        /// The batch description file on disk(toml)
        batch_file: String,

        /// Register the jobs only, do not start them on a worker
        #[arg(short, long, action)]
        manual: bool,
    },
}

// per-job outcome, reported individually even when some jobs fail
enum Outcome {
    Registered(String),
    Dispatched(String),
    Failed(String),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Schedule { batch_file, manual } => schedule(&batch_file, manual).await,
    }
}

async fn schedule(batch_file: &str, manual: bool) -> anyhow::Result<()> {
    let batch = BatchDescription::parse(&fs::read_to_string(batch_file)?)?;

    let db_uri = env::var("JOBMON_DB_URI")
        .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
    let db_name = env::var("JOBMON_DB_NAME").unwrap_or_else(|_| "jobmon".to_string());
    let database = mongodb_setup(&db_uri).await?.database(&db_name);

    let registry = JobRegistry::new(Arc::new(MongoJobStore::new(&database)));

    // resolve where workers will get the code from
    let clone = match (&batch.code_dir, &batch.code_path) {
        (Some(dir), None) => {
            let packager =
                ArchivePackager::new(Arc::new(GridFsBlobStore::new(&database)));
            let (handle, files) = packager
                .pack(Path::new(dir), &batch.code_excludes)
                .await?;
            info!("Code package `{handle}` holds {} entries.", files.len());
            CloneSource::CodePackage(handle)
        }
        (None, Some(path)) => CloneSource::Path(path.clone()),
        _ => anyhow::bail!("the batch must set exactly one of `code_dir` and `code_path`"),
    };

    // register everything first; a job that fails registration is reported
    // and skipped, not fatal to the rest of the batch
    let mut outcomes: Vec<(String, Outcome)> = vec![];
    for (name, submission) in batch.submissions(clone) {
        match registry.register(&submission).await {
            Ok(job_id) => outcomes.push((name, Outcome::Registered(job_id))),
            Err(e) => {
                warn!("Registration of `{name}` failed: `{e}`");
                outcomes.push((name, Outcome::Failed(e.to_string())));
            }
        }
    }

    if !manual {
        let namespace =
            env::var("JOBMON_NAMESPACE").unwrap_or_else(|_| "default".to_string());
        let control_plane = KubeControlPlane::new(kube::Client::try_default().await?, namespace);
        let dispatcher = ClusterDispatcher::new(registry, Arc::new(control_plane));

        let mut options =
            DispatchOptions::new(batch.cluster.image.clone(), batch.cluster.volumes());
        options.resources = ResourceRequest {
            gpus: batch.cluster.gpus,
            memory_gb: batch.cluster.memory_gb,
            cpu_cores: batch.cluster.cpu_cores,
        };
        options.env = batch
            .cluster
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(results_dir) = &batch.cluster.results_dir {
            options.results_dir = results_dir.clone();
        }

        match batch.cluster.parallelism {
            // the whole batch becomes one work queue
            Some(parallelism) => {
                let job_ids: Vec<String> = outcomes
                    .iter()
                    .filter_map(|(_, outcome)| match outcome {
                        Outcome::Registered(id) => Some(id.clone()),
                        _ => None,
                    })
                    .collect();
                let user = batch
                    .user
                    .clone()
                    .or_else(|| env::var("USER").ok())
                    .unwrap_or_default();
                match dispatcher
                    .dispatch_queue(&job_ids, &user, &options, parallelism)
                    .await
                {
                    Ok(workload) => {
                        info!("Queue workload: `{workload}`");
                        for (_, outcome) in outcomes.iter_mut() {
                            if let Outcome::Registered(id) = outcome {
                                let id = id.clone();
                                *outcome = Outcome::Dispatched(id);
                            }
                        }
                    }
                    Err(e) => warn!("Queue dispatch failed: `{e}`"),
                }
            }

            // one workload per job
            None => {
                for (name, outcome) in outcomes.iter_mut() {
                    let job_id = match outcome {
                        Outcome::Registered(id) => id.clone(),
                        _ => continue,
                    };
                    match dispatcher.dispatch_single(&job_id, &options).await {
                        Ok(_) => *outcome = Outcome::Dispatched(job_id),
                        Err(e) => warn!("Dispatch of `{name}` failed: `{e}`"),
                    }
                }
            }
        }
    }

    // pretty-print one line per job
    let width = outcomes
        .iter()
        .map(|(name, _)| name.len())
        .max()
        .unwrap_or(0)
        + 1;
    let mut dispatched = 0;
    for (name, outcome) in &outcomes {
        let label = format!("{name}:");
        match outcome {
            Outcome::Registered(id) => println!("{label:<width$} {id}"),
            Outcome::Dispatched(id) => {
                println!("{label:<width$} {id}");
                dispatched += 1;
            }
            Outcome::Failed(reason) => println!("{label:<width$} failed ({reason})"),
        }
    }
    if !manual {
        println!("{dispatched} jobs scheduled on the container cluster");
    }
    Ok(())
}

async fn mongodb_setup(uri: &str) -> anyhow::Result<mongodb::Client> {
    info!("Connecting to the MongoDB daemon...");
    let mut client_options = ClientOptions::parse(uri).await?;
    let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
    client_options.server_api = Some(server_api);
    let client = mongodb::Client::with_options(client_options)?;
    // Send a ping to confirm a successful connection
    client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await?;
    info!("Successfully connected to the MongoDB instance!");
    Ok(client)
}
