use engine_config::error::ConfigError;
use engine_core::error::RepositoryError;
use engine_runtime::error::JobError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to read a file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Invalid job configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to open the state store at {path}: {source}")]
    StateStore {
        path: String,
        #[source]
        source: RepositoryError,
    },

    #[error("{0}")]
    Job(#[from] JobError),

    #[error("Could not determine the home directory; pass --state")]
    NoHomeDirectory,

    #[error("Job '{job_id}' did not finish: {statuses}")]
    Unfinished { job_id: String, statuses: String },

    #[error("Shutdown requested")]
    ShutdownRequested,
}
