use crate::{error::ConfigError, job::JobConfiguration};
use connectors::connection::DataSourceConfig;
use engine_core::{rate_limit::RateLimitAlgorithm, retry::RetryPolicy};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

/// Settings of the shared write path. Built once per job and shared
/// read-only by every task.
#[derive(Debug)]
pub struct ImporterConfiguration {
    pub target: DataSourceConfig,
    sharding_columns: HashMap<String, HashSet<String>>,
    schema_mapping: HashMap<String, String>,
    pub batch_size: usize,
    pub concurrency: usize,
    pub retry_times: usize,
    pub rate_limiter: Option<Arc<dyn RateLimitAlgorithm>>,
}

impl ImporterConfiguration {
    pub fn from_job(job: &JobConfiguration) -> Result<Arc<Self>, ConfigError> {
        let sharding_columns = job
            .sharding_columns
            .iter()
            .map(|(table, columns)| {
                let columns = columns.iter().map(|c| c.to_ascii_lowercase()).collect();
                (table.to_ascii_lowercase(), columns)
            })
            .collect();
        let schema_mapping = job
            .schema_mapping
            .iter()
            .map(|(table, schema)| (table.to_ascii_lowercase(), schema.clone()))
            .collect();

        Ok(Arc::new(Self {
            target: job.target.clone(),
            sharding_columns,
            schema_mapping,
            batch_size: job.write.batch_size,
            concurrency: job.write.concurrency.max(1),
            retry_times: job.write.retry_times,
            rate_limiter: job.write_rate_limiter()?,
        }))
    }

    /// Columns of `table` the router places rows by; matched case-insensitively.
    pub fn is_sharding_column(&self, table: &str, column: &str) -> bool {
        self.sharding_columns
            .get(&table.to_ascii_lowercase())
            .is_some_and(|columns| columns.contains(&column.to_ascii_lowercase()))
    }

    pub fn schema_name(&self, table: &str) -> Option<&str> {
        self.schema_mapping
            .get(&table.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_retry_times(self.retry_times)
    }
}
