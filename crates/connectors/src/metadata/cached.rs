use crate::{error::DbError, metadata::loader::MetadataLoader};
use async_trait::async_trait;
use model::metadata::table::TableMetaData;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::debug;

/// Loads each table once and serves it from memory afterwards.
///
/// Metadata is never refreshed: a schema change during a migration is
/// surfaced by the importer as a mismatch rather than picked up here.
pub struct CachedMetadataLoader {
    inner: Arc<dyn MetadataLoader>,
    tables: RwLock<HashMap<String, Arc<TableMetaData>>>,
}

impl CachedMetadataLoader {
    pub fn new(inner: Arc<dyn MetadataLoader>) -> Self {
        Self {
            inner,
            tables: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl MetadataLoader for CachedMetadataLoader {
    async fn load(&self, table: &str) -> Result<Arc<TableMetaData>, DbError> {
        if let Some(found) = self.tables.read().await.get(table) {
            return Ok(Arc::clone(found));
        }

        let mut tables = self.tables.write().await;
        if let Some(found) = tables.get(table) {
            return Ok(Arc::clone(found));
        }
        let loaded = self.inner.load(table).await?;
        debug!(table, columns = loaded.columns.len(), "Loaded table metadata");
        tables.insert(table.to_string(), Arc::clone(&loaded));
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{
        core::data_type::DataType,
        metadata::table::{ColumnMetaData, TableMetaData},
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetadataLoader for CountingLoader {
        async fn load(&self, table: &str) -> Result<Arc<TableMetaData>, DbError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if table == "missing" {
                return Err(DbError::TableNotFound(table.to_string()));
            }
            Ok(Arc::new(TableMetaData::new(
                table,
                vec![ColumnMetaData {
                    ordinal: 1,
                    name: "id".into(),
                    data_type: DataType::BigInt,
                    nullable: false,
                    primary_key: true,
                    unique_key: true,
                }],
                vec![],
            )))
        }
    }

    #[tokio::test]
    async fn loads_each_table_once() {
        let inner = Arc::new(CountingLoader {
            calls: AtomicUsize::new(0),
        });
        let loader = CachedMetadataLoader::new(inner.clone());

        let first = loader.load("t_order").await.unwrap();
        let second = loader.load("t_order").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        loader.load("t_order_item").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_cache_failures() {
        let inner = Arc::new(CountingLoader {
            calls: AtomicUsize::new(0),
        });
        let loader = CachedMetadataLoader::new(inner.clone());

        assert!(matches!(
            loader.load("missing").await,
            Err(DbError::TableNotFound(_))
        ));
        assert!(loader.load("missing").await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
