use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use bimingest::db::job_repo::JobFilter;
use bimingest::worker::crossbeam_channel;
use bimingest::{load_config, logging, Config, IngestService, JsonModelParser, LodLevel, LodPolicy};
use clap::{Parser, Subcommand};
use log::{error, info};

#[derive(Parser, Debug)]
#[command(name = "bimingest")]
#[command(about = "Staged building-model ingest with diagnostic reports")]
#[command(version)]
struct Cli {
    /// Path to the JSON config file (defaults apply when omitted)
    #[arg(short, long, env = "BIMINGEST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the worker pool until interrupted
    Run,
    /// Queue a model file for ingest and print the job id
    Submit {
        /// Target record the model belongs to
        #[arg(long)]
        target: String,
        /// Path to the model file
        #[arg(long)]
        file: String,
        /// Level of detail (low decimates, high keeps full geometry)
        #[arg(long)]
        lod: Option<LodLevel>,
        /// Per-element triangle budget for low detail
        #[arg(long)]
        target_triangles: Option<usize>,
    },
    /// Print the status of a target record as JSON
    Status { target: String },
    /// Print the processing report of a job as JSON
    Report { job_id: String },
    /// Cancel a pending or running job
    Cancel { job_id: String },
    /// List jobs, newest first
    Jobs {
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        target: Option<String>,
        #[arg(long, default_value = "20")]
        limit: u64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let default_lod = config.lod;
    let service = IngestService::new(config, Arc::new(JsonModelParser))?;

    match command {
        Command::Run => {
            let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
            ctrlc::set_handler(move || {
                let _ = stop_tx.try_send(());
            })?;

            service.start()?;
            info!("Worker pool running, press Ctrl-C to stop");
            let _ = stop_rx.recv();
            service.shutdown();
        }
        Command::Submit {
            target,
            file,
            lod,
            target_triangles,
        } => {
            let lod = (lod.is_some() || target_triangles.is_some()).then(|| LodPolicy {
                level: lod.unwrap_or(default_lod.level),
                target_triangles: target_triangles.unwrap_or(default_lod.target_triangles),
            });
            let job_id = service.submit(&target, &file, lod)?;
            println!("{}", job_id);
        }
        Command::Status { target } => {
            let status = service.get_status(&target)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Report { job_id } => {
            let report = service.get_report(&job_id)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Cancel { job_id } => {
            if service.cancel(&job_id)? {
                println!("cancelled {}", job_id);
            } else {
                println!("job {} is not pending or running here", job_id);
            }
        }
        Command::Jobs {
            state,
            target,
            limit,
        } => {
            let filter = JobFilter {
                state,
                target_id: target,
                limit: Some(limit),
                ..Default::default()
            };
            let (jobs, total) = service.list_jobs(&filter)?;
            for job in &jobs {
                println!(
                    "{}  {:<8}  {}  attempt {}/{}",
                    job.id, job.state.as_str(), job.target_id, job.attempt_count, job.max_attempts
                );
            }
            println!("{} of {} job(s)", jobs.len(), total);
        }
    }

    Ok(())
}
