use clap::Subcommand;
use engine_config::check::CheckAlgorithm;
use std::path::PathBuf;

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Schedule a job from its configuration and run it until it finishes
    /// or a shutdown signal arrives.
    Run {
        #[arg(long, help = "Job configuration file (JSON)")]
        config: PathBuf,
    },
    /// Show one row per job item.
    Status {
        #[arg(long, help = "Job ID")]
        job: String,

        #[arg(long, help = "Print the rows as JSON instead of a table")]
        json: bool,
    },
    /// Compare source shards against the target table by table.
    Check {
        #[arg(long, help = "Job ID")]
        job: String,

        #[arg(long, help = "COUNT or DATA_MATCH; defaults to the job's algorithm")]
        algorithm: Option<CheckAlgorithm>,

        #[arg(long, help = "Print the results as JSON instead of a table")]
        json: bool,
    },
    /// Mark every item of a job as stopping.
    Stop {
        #[arg(long, help = "Job ID")]
        job: String,
    },
    /// Delete all durable state of a job.
    Drop {
        #[arg(long, help = "Job ID")]
        job: String,
    },
    /// List scheduled jobs.
    List,
    Rule {
        #[command(subcommand)]
        command: RuleCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum RuleCommand {
    /// Register a scaling rule read from a JSON file.
    Create {
        #[arg(long, help = "Rule definition file (JSON)")]
        file: PathBuf,
    },
    List,
}
