use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cluster::{ClusterHandle, NodeRequest, NodeResponse};
use crate::config::ImportOptions;
use crate::error::Result;
use crate::import::{inspect, DatasetMetadata, DatasetSummary, Importer};
use crate::keys::KeyRegistry;
use crate::reduce::ReductionEngine;

/// One verification session against one cluster
///
/// Owns the key registry; the importer and the engine share it, and every
/// dataset the session creates lives under its namespace on the nodes.
pub struct Session {
    id: Uuid,
    cluster: ClusterHandle,
    registry: Arc<KeyRegistry>,
    importer: Importer,
    engine: ReductionEngine,
}

impl Session {
    pub fn new(cluster: ClusterHandle, import: ImportOptions, max_in_flight: usize) -> Self {
        let id = Uuid::new_v4();
        let registry = Arc::new(KeyRegistry::new(format!("session-{}", id.simple())));
        info!("Session {} started on {} nodes", id, cluster.size());
        Self {
            id,
            importer: Importer::new(registry.clone(), import),
            engine: ReductionEngine::new(registry.clone(), max_in_flight),
            cluster,
            registry,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cluster(&self) -> &ClusterHandle {
        &self.cluster
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    pub fn importer(&self) -> &Importer {
        &self.importer
    }

    pub fn engine(&self) -> &ReductionEngine {
        &self.engine
    }

    /// Stage `folder/file` afresh and import it under `key`
    pub async fn import(
        &self,
        folder: &Path,
        file: &str,
        key: &str,
        timeout: Duration,
    ) -> Result<DatasetMetadata> {
        let source = self.registry.stage(folder, file)?;
        self.importer
            .import(&self.cluster, source, key, timeout)
            .await
    }

    pub async fn inspect(&self, key: &str) -> Result<DatasetSummary> {
        inspect(&self.cluster, &self.registry, key).await
    }

    /// Release a dataset on every node; the key stays used
    pub async fn drop_dataset(&self, key: &str) -> Result<()> {
        self.cluster.ensure_operational()?;
        let dataset = self.registry.qualified(key);
        for (node, result) in self
            .cluster
            .call_all(|_| NodeRequest::DropDataset {
                dataset: dataset.clone(),
            })
            .await
        {
            match result.map_err(|e| e.with_location(key, None))? {
                NodeResponse::Ack => {}
                other => return Err(other.into_error(node, key)),
            }
        }
        self.registry.mark_dropped(key);
        debug!("Dropped '{}' from {} nodes", key, self.cluster.size());
        Ok(())
    }
}
