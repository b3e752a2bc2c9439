//! Resolution of the collaborators a job talks to.

use connectors::{
    connection::{Connection, ConnectionFactory, DataSourceConfig},
    factory::DefaultConnectionFactory,
    metadata::{
        cached::CachedMetadataLoader,
        information_schema::{CatalogFlavor, InformationSchemaLoader},
        loader::MetadataLoader,
    },
    source::{ChangeEventSourceFactory, SnapshotOnly},
};
use engine_config::job::JobConfiguration;
use planner::query::registry::dialect_for;
use std::sync::Arc;

/// Builds the per-job connection factory, metadata loaders and change-event
/// sources. Swapped for in-memory fakes in tests.
pub trait Collaborators: Send + Sync {
    fn connection_factory(&self, config: &JobConfiguration) -> Arc<dyn ConnectionFactory>;

    fn metadata_loader(
        &self,
        data_source: &DataSourceConfig,
        connection: Arc<dyn Connection>,
    ) -> Arc<dyn MetadataLoader>;

    fn change_sources(&self, config: &JobConfiguration) -> Arc<dyn ChangeEventSourceFactory>;
}

/// Real databases through `DefaultConnectionFactory` and `information_schema`.
pub struct DatabaseCollaborators {
    change_sources: Arc<dyn ChangeEventSourceFactory>,
}

impl DatabaseCollaborators {
    pub fn new(change_sources: Arc<dyn ChangeEventSourceFactory>) -> Self {
        Self { change_sources }
    }
}

impl Default for DatabaseCollaborators {
    /// Snapshot copy only; no change capture adapter is plugged in.
    fn default() -> Self {
        Self::new(Arc::new(SnapshotOnly))
    }
}

impl Collaborators for DatabaseCollaborators {
    fn connection_factory(&self, config: &JobConfiguration) -> Arc<dyn ConnectionFactory> {
        let data_sources = config
            .sources
            .iter()
            .chain(std::iter::once(&config.target))
            .cloned();
        Arc::new(DefaultConnectionFactory::new(data_sources))
    }

    fn metadata_loader(
        &self,
        data_source: &DataSourceConfig,
        connection: Arc<dyn Connection>,
    ) -> Arc<dyn MetadataLoader> {
        let flavor = dialect_for(&data_source.database_type)
            .map(|d| CatalogFlavor::for_dialect(d.name()))
            .unwrap_or(CatalogFlavor::Postgres);
        let loader = InformationSchemaLoader::new(connection, flavor, None);
        Arc::new(CachedMetadataLoader::new(Arc::new(loader)))
    }

    fn change_sources(&self, _config: &JobConfiguration) -> Arc<dyn ChangeEventSourceFactory> {
        Arc::clone(&self.change_sources)
    }
}
