//! Resource collection
//!
//! Asks a [`ResourceDescriber`] for a resource inventory and persists it as
//! a [`ResourceSnapshot`] at a deterministic key, so a re-run overwrites
//! the previous snapshot instead of accumulating copies.
//!
//! # Module Structure
//!
//! - [`describer`] - The external describe service and its HTTP client
//! - [`store`] - Path-addressable blob storage

pub mod describer;
pub mod store;

pub use describer::{CollectionTarget, HttpDescriber, ResourceDescriber};
pub use store::{BlobStore, LocalBlobStore, MemoryBlobStore};

use crate::error::{CollectionError, StorageError};
use crate::snapshot::{is_record_tree, ResourceSnapshot, SnapshotKey};
use futures::future::join_all;
use std::sync::Arc;

pub struct ResourceCollector<D> {
    describer: D,
    store: Arc<dyn BlobStore>,
}

impl<D: ResourceDescriber> ResourceCollector<D> {
    pub fn new(describer: D, store: Arc<dyn BlobStore>) -> Self {
        Self { describer, store }
    }

    /// Collect one snapshot and persist it under `stage`. Nothing is
    /// written when the target is incomplete, the describer fails, or it
    /// returns something that is not a record tree.
    pub async fn collect(
        &self,
        target: &CollectionTarget,
        resource_type: &str,
        stage: &str,
    ) -> Result<ResourceSnapshot, CollectionError> {
        target.validate()?;
        tracing::info!(
            "Collecting {} from account {} in {}",
            resource_type,
            target.account_id,
            target.region
        );

        let body = self.describer.describe(target, resource_type).await?;
        if !is_record_tree(&body) {
            return Err(CollectionError::MalformedResponse {
                message: format!("expected an object or array, got {}", type_name(&body)),
            });
        }

        let snapshot = ResourceSnapshot::new(
            SnapshotKey::new(&target.account_id, &target.region, resource_type),
            body,
        );
        let bytes = snapshot.to_bytes().map_err(StorageError::from)?;
        let key = snapshot.key.object_key(stage);
        self.store.put(&key, &bytes)?;

        tracing::info!("Stored snapshot {} ({} bytes)", key, bytes.len());
        Ok(snapshot)
    }

    /// Collect the same resource type from several targets concurrently.
    /// Each target succeeds or fails on its own; results keep input order.
    pub async fn collect_many(
        &self,
        targets: &[CollectionTarget],
        resource_type: &str,
        stage: &str,
    ) -> Vec<Result<ResourceSnapshot, CollectionError>> {
        join_all(
            targets
                .iter()
                .map(|target| self.collect(target, resource_type, stage)),
        )
        .await
    }
}

/// Read a previously persisted snapshot.
pub fn load_snapshot(
    store: &dyn BlobStore,
    key: &SnapshotKey,
    stage: &str,
) -> Result<ResourceSnapshot, StorageError> {
    let bytes = store.get(&key.object_key(stage))?;
    Ok(ResourceSnapshot::from_bytes(&bytes)?)
}

fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
