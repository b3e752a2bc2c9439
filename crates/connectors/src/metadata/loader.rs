use crate::error::DbError;
use async_trait::async_trait;
use model::metadata::table::TableMetaData;
use std::sync::Arc;

/// Discovers the column and unique-key shape of a table.
#[async_trait]
pub trait MetadataLoader: Send + Sync {
    async fn load(&self, table: &str) -> Result<Arc<TableMetaData>, DbError>;
}
