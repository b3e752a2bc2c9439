use crate::{
    commands::{Commands, RuleCommand},
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use engine_config::{job::JobConfiguration, rule::ScalingRule};
use engine_core::state::{job_item::JobItemRepository, sled_store::SledRepository};
use engine_runtime::{
    error::JobError,
    execution::{factory::DatabaseCollaborators, supervisor::JobSupervisor},
};
use model::job::status::JobStatus;
use std::{path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod output;
mod shutdown;

#[derive(Debug, Parser)]
#[command(name = "scaling", version, about = "Online data migration for sharded databases")]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "Directory of the durable job state (default: ~/.scaling/state)"
    )]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let code = match execute(cli).await {
        Ok(()) => ExitCode::Success,
        Err(CliError::ShutdownRequested) => ExitCode::ShutdownRequested,
        Err(err @ CliError::Unfinished { .. }) => {
            error!(error = %err, "Job did not finish");
            ExitCode::Unfinished
        }
        Err(err) => {
            error!(error = %err, "Command failed");
            ExitCode::GeneralError
        }
    };
    code.into()
}

async fn execute(cli: Cli) -> Result<(), CliError> {
    let supervisor = Arc::new(open_supervisor(cli.state)?);

    match cli.command {
        Commands::Run { config } => {
            let config = JobConfiguration::load(&config)?;
            run_job(supervisor, config).await?;
        }
        Commands::Status { job, json } => {
            let rows = supervisor.status(&job).await?;
            if json {
                output::print_json(&rows)?;
            } else {
                print!("{}", output::render_status(&rows));
            }
        }
        Commands::Check {
            job,
            algorithm,
            json,
        } => {
            let results = supervisor.check(&job, algorithm).await?;
            if json {
                output::print_json(&results)?;
            } else {
                print!("{}", output::render_check(&results));
            }
        }
        Commands::Stop { job } => supervisor.stop(&job).await?,
        Commands::Drop { job } => {
            supervisor.drop_job(&job).await?;
            info!(job_id = %job, "Dropped job");
        }
        Commands::List => {
            for job_id in supervisor.job_ids().await? {
                println!("{job_id}");
            }
        }
        Commands::Rule { command } => match command {
            RuleCommand::Create { file } => {
                let source = tokio::fs::read_to_string(&file).await?;
                let rule: ScalingRule = serde_json::from_str(&source)?;
                supervisor.create_rule(&rule).await?;
            }
            RuleCommand::List => output::print_json(&supervisor.list_rules().await?)?,
        },
    }

    Ok(())
}

/// Schedules and starts the job, then waits for every item to settle. A
/// shutdown signal stops the items; they finish their in-flight batch first.
async fn run_job(supervisor: Arc<JobSupervisor>, config: JobConfiguration) -> Result<(), CliError> {
    let job_id = supervisor.schedule(config).await?;
    supervisor.start(&job_id).await?;

    let shutdown = ShutdownCoordinator::new(CancellationToken::new());
    shutdown.register_handlers();
    let stopper = {
        let supervisor = Arc::clone(&supervisor);
        let job_id = job_id.clone();
        let token = shutdown.cancel_token();
        tokio::spawn(async move {
            token.cancelled().await;
            supervisor.stop(&job_id).await
        })
    };

    let statuses = supervisor.wait(&job_id).await?;
    if shutdown.is_shutdown_requested() {
        stopper.await.map_err(JobError::from)??;
    } else {
        stopper.abort();
    }
    print!("{}", output::render_status(&supervisor.status(&job_id).await?));

    if shutdown.is_shutdown_requested() {
        return Err(CliError::ShutdownRequested);
    }
    if statuses.iter().any(|s| *s != JobStatus::Finished) {
        let statuses = statuses
            .iter()
            .map(JobStatus::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        return Err(CliError::Unfinished { job_id, statuses });
    }
    info!(job_id = %job_id, "Job finished");
    Ok(())
}

fn open_supervisor(state: Option<PathBuf>) -> Result<JobSupervisor, CliError> {
    let path = match state {
        Some(path) => path,
        None => dirs::home_dir()
            .ok_or(CliError::NoHomeDirectory)?
            .join(".scaling/state"),
    };
    let store = SledRepository::open(&path).map_err(|source| CliError::StateStore {
        path: path.display().to_string(),
        source,
    })?;
    Ok(JobSupervisor::new(
        JobItemRepository::new(Arc::new(store)),
        Arc::new(DatabaseCollaborators::default()),
    ))
}
