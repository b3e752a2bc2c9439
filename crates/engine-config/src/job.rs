use crate::{check::CheckAlgorithm, error::ConfigError};
use connectors::connection::DataSourceConfig;
use engine_core::rate_limit::{RateLimitAlgorithm, RateLimiterConfig, rate_limiter_for};
use planner::query::registry::{is_supported, supported_types};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
    sync::Arc,
};
use tracing::{info, warn};

/// One migration job: which tables move from which source shards to the
/// target, and how fast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Source shards. Each one becomes a job item.
    pub sources: Vec<DataSourceConfig>,
    pub target: DataSourceConfig,
    pub tables: Vec<TableConfiguration>,
    /// Logical table -> columns the router shards on.
    #[serde(default)]
    pub sharding_columns: BTreeMap<String, Vec<String>>,
    /// Logical table -> schema name on both sides.
    #[serde(default)]
    pub schema_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub read: ReadConfiguration,
    #[serde(default)]
    pub write: WriteConfiguration,
    #[serde(default)]
    pub incremental: IncrementalConfiguration,
    #[serde(default)]
    pub check_algorithm: CheckAlgorithm,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfiguration {
    pub logic_table: String,
    /// Data source name -> physical tables holding rows of the logical table.
    /// Empty means a table named like the logical one on every source.
    #[serde(default)]
    pub actual_tables: BTreeMap<String, Vec<String>>,
    /// Overrides the key discovered from metadata.
    #[serde(default)]
    pub unique_key: Option<String>,
}

/// A physical table on one source shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataNode {
    pub logic_table: String,
    pub actual_table: String,
    pub unique_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadConfiguration {
    pub batch_size: usize,
    pub worker_threads: usize,
    pub rate_limiter: Option<RateLimiterConfig>,
}

impl Default for ReadConfiguration {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            worker_threads: 8,
            rate_limiter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteConfiguration {
    pub batch_size: usize,
    pub concurrency: usize,
    pub retry_times: usize,
    pub rate_limiter: Option<RateLimiterConfig>,
}

impl Default for WriteConfiguration {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            concurrency: 2,
            retry_times: 3,
            rate_limiter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncrementalConfiguration {
    pub enabled: bool,
    pub batch_size: usize,
    pub idle_millis: u64,
}

impl Default for IncrementalConfiguration {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 1000,
            idle_millis: 1000,
        }
    }
}

impl JobConfiguration {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json(&json)?;
        info!(path = %path.display(), tables = config.tables.len(), "Loaded job configuration");
        Ok(config)
    }

    /// The configured id, or one derived from the configuration content so
    /// that rescheduling the same file resumes the same job.
    pub fn job_id(&self) -> String {
        match &self.job_id {
            Some(id) => id.clone(),
            None => self.derive_job_id(),
        }
    }

    pub fn with_job_id(mut self) -> Self {
        if self.job_id.is_none() {
            self.job_id = Some(self.derive_job_id());
        }
        self
    }

    fn derive_job_id(&self) -> String {
        let mut unnamed = self.clone();
        unnamed.job_id = None;
        let mut h = blake3::Hasher::new();
        // Serializing plain structs and string maps cannot fail.
        h.update(serde_json::to_string(&unnamed).unwrap_or_default().as_bytes());
        format!("job-{}", &h.finalize().to_hex()[..16])
    }

    /// Physical tables to migrate from `data_source`, in configuration order.
    pub fn data_nodes(&self, data_source: &str) -> Vec<DataNode> {
        let mut nodes = Vec::new();
        for table in &self.tables {
            let actual: Vec<String> = if table.actual_tables.is_empty() {
                vec![table.logic_table.clone()]
            } else {
                table
                    .actual_tables
                    .get(data_source)
                    .cloned()
                    .unwrap_or_default()
            };
            nodes.extend(actual.into_iter().map(|actual_table| DataNode {
                logic_table: table.logic_table.clone(),
                actual_table,
                unique_key: table.unique_key.clone(),
            }));
        }
        nodes
    }

    pub fn schema_name(&self, logic_table: &str) -> Option<&str> {
        self.schema_mapping.get(logic_table).map(String::as_str)
    }

    pub fn read_rate_limiter(&self) -> Result<Option<Arc<dyn RateLimitAlgorithm>>, ConfigError> {
        Ok(self
            .read
            .rate_limiter
            .as_ref()
            .map(rate_limiter_for)
            .transpose()?)
    }

    pub fn write_rate_limiter(&self) -> Result<Option<Arc<dyn RateLimitAlgorithm>>, ConfigError> {
        Ok(self
            .write
            .rate_limiter
            .as_ref()
            .map(rate_limiter_for)
            .transpose()?)
    }

    /// Checks everything that can be checked without touching a database.
    /// All problems are reported at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_data_sources(&mut errors);
        self.validate_tables(&mut errors);
        self.validate_sizes(&mut errors);
        self.validate_rate_limiters(&mut errors);

        if !errors.is_empty() {
            return Err(ConfigError::ValidationFailed(errors));
        }
        Ok(())
    }

    fn validate_data_sources(&self, errors: &mut Vec<String>) {
        if self.sources.is_empty() {
            errors.push("at least one source data source is required".to_string());
        }

        let mut names = HashSet::new();
        for ds in self.sources.iter().chain(std::iter::once(&self.target)) {
            if !is_supported(&ds.database_type) {
                errors.push(format!(
                    "data source `{}` has unsupported database type `{}` (supported: {})",
                    ds.name,
                    ds.database_type,
                    supported_types().join(", ")
                ));
            }
        }
        for ds in &self.sources {
            if !names.insert(ds.name.as_str()) {
                errors.push(format!("duplicate source data source `{}`", ds.name));
            }
        }
    }

    fn validate_tables(&self, errors: &mut Vec<String>) {
        if self.tables.is_empty() {
            errors.push("table list is empty".to_string());
            return;
        }

        let sources: HashSet<&str> = self.sources.iter().map(|ds| ds.name.as_str()).collect();
        let mut seen = HashSet::new();
        for table in &self.tables {
            if table.logic_table.trim().is_empty() {
                errors.push("table with empty logical name".to_string());
                continue;
            }
            if !seen.insert(table.logic_table.as_str()) {
                errors.push(format!("duplicate table `{}`", table.logic_table));
            }
            for data_source in table.actual_tables.keys() {
                if !sources.contains(data_source.as_str()) {
                    errors.push(format!(
                        "table `{}` references unknown data source `{data_source}`",
                        table.logic_table
                    ));
                }
            }
        }

        for table in self.sharding_columns.keys() {
            if !seen.contains(table.as_str()) {
                warn!(table = %table, "Sharding columns configured for a table that is not migrated");
            }
        }
    }

    fn validate_sizes(&self, errors: &mut Vec<String>) {
        let sizes = [
            ("read.batch_size", self.read.batch_size),
            ("read.worker_threads", self.read.worker_threads),
            ("write.batch_size", self.write.batch_size),
            ("write.concurrency", self.write.concurrency),
            ("incremental.batch_size", self.incremental.batch_size),
        ];
        for (name, value) in sizes {
            if value == 0 {
                errors.push(format!("{name} must be greater than zero"));
            }
        }
    }

    fn validate_rate_limiters(&self, errors: &mut Vec<String>) {
        let limiters = [
            ("read.rate_limiter", &self.read.rate_limiter),
            ("write.rate_limiter", &self.write.rate_limiter),
        ];
        for (name, limiter) in limiters {
            if let Some(config) = limiter {
                if let Err(err) = rate_limiter_for(config) {
                    errors.push(format!("{name}: {err}"));
                }
            }
        }
    }
}
