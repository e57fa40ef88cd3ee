//! Pipeline orchestration
//!
//! One run takes one resource type through collect → relationalize → map →
//! stage → load. Every stage works on the complete output of the previous
//! one and the first failure stops the run. Runs share nothing but the
//! blob store, and every run writes its staged output under its own run id.

use crate::collector::{load_snapshot, BlobStore, CollectionTarget, ResourceCollector, ResourceDescriber};
use crate::error::PipelineError;
use crate::loader::{BulkLoader, LoadRequest, LoadSummary, LoaderEndpoint};
use crate::mapping::{GraphRecordMapper, MappingRegistry, StagedVertexFile};
use crate::relationalize::Relationalizer;
use crate::snapshot::{ResourceSnapshot, SnapshotKey};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Stage prefix for raw snapshots.
pub const DEFAULT_STAGE: &str = "raw";

/// Prefix for staged loader input.
pub const OUTPUT_PREFIX: &str = "output-dir";

/// Staged node prefix of a run.
pub fn nodes_prefix(run_id: Uuid) -> String {
    format!("{}/{}/nodes/", OUTPUT_PREFIX, run_id)
}

/// Identity and paths of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Stage prefix raw snapshots are read from and written to.
    pub stage: String,
    pub target: CollectionTarget,
}

impl PipelineContext {
    pub fn new(target: CollectionTarget, stage: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            stage: stage.to_string(),
            target,
        }
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn snapshot_key(&self, resource_type: &str) -> SnapshotKey {
        SnapshotKey::new(&self.target.account_id, &self.target.region, resource_type)
    }

    /// `output-dir/<run id>/nodes/`, the prefix the loader reads.
    pub fn nodes_prefix(&self) -> String {
        nodes_prefix(self.run_id)
    }

    /// `output-dir/<run id>/nodes/<resourceType>.csv`
    pub fn staged_key(&self, resource_type: &str) -> String {
        format!("{}{}.csv", self.nodes_prefix(), resource_type)
    }
}

/// Loader settings for the load stage.
#[derive(Debug, Clone)]
pub struct LoadTarget {
    pub role_arn: String,
    pub region: String,
    pub endpoints: Vec<LoaderEndpoint>,
    pub timeout: Duration,
}

/// A staged vertex file and where it was written.
#[derive(Debug, Clone)]
pub struct StagedOutput {
    pub file: StagedVertexFile,
    pub key: String,
    /// Tables produced by relationalization, summed over snapshots.
    pub tables: usize,
}

/// What a run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub resource_type: String,
    pub tables: usize,
    pub vertices: usize,
    pub staged_uri: String,
    pub load_id: Option<String>,
    pub load_summary: Option<LoadSummary>,
}

pub struct Pipeline {
    store: Arc<dyn BlobStore>,
    registry: MappingRegistry,
    relationalizer: Relationalizer,
}

impl Pipeline {
    pub fn new(store: Arc<dyn BlobStore>, registry: MappingRegistry) -> Self {
        Self {
            store,
            registry,
            relationalizer: Relationalizer::new(),
        }
    }

    pub fn with_relationalizer(mut self, relationalizer: Relationalizer) -> Self {
        self.relationalizer = relationalizer;
        self
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn registry(&self) -> &MappingRegistry {
        &self.registry
    }

    /// Collect stage.
    pub async fn collect<D: ResourceDescriber>(
        &self,
        ctx: &PipelineContext,
        describer: D,
        resource_type: &str,
    ) -> Result<ResourceSnapshot, PipelineError> {
        let collector = ResourceCollector::new(describer, self.store.clone());
        Ok(collector
            .collect(&ctx.target, resource_type, &ctx.stage)
            .await?)
    }

    /// Collect one resource type from several targets concurrently. Every
    /// target is attempted; the first failure in target order is returned
    /// once all have finished.
    pub async fn collect_many<D: ResourceDescriber>(
        &self,
        ctx: &PipelineContext,
        describer: D,
        targets: &[CollectionTarget],
        resource_type: &str,
    ) -> Result<Vec<ResourceSnapshot>, PipelineError> {
        let collector = ResourceCollector::new(describer, self.store.clone());
        let results = collector
            .collect_many(targets, resource_type, &ctx.stage)
            .await;

        let mut snapshots = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (target, result) in targets.iter().zip(results) {
            match result {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(err) => {
                    tracing::error!(
                        "Collecting {} from account {} in {} failed: {}",
                        resource_type,
                        target.account_id,
                        target.region,
                        err
                    );
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(snapshots),
        }
    }

    /// Relationalize and map snapshots of one resource type, then stage them
    /// as a single vertex file. The staged object is fully written before
    /// this returns.
    pub fn transform(
        &self,
        ctx: &PipelineContext,
        snapshots: &[ResourceSnapshot],
        resource_type: &str,
    ) -> Result<StagedOutput, PipelineError> {
        let def = self.registry.get(resource_type)?;

        let mut partitions = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            let tables = self.relationalizer.relationalize(snapshot)?;
            tracing::info!(
                "Relationalized {} into {} tables",
                snapshot.key,
                tables.len()
            );
            partitions.push(tables);
        }

        let tables = partitions.iter().map(|t| t.len()).sum();
        let file = GraphRecordMapper::new(def).map_all(&partitions)?;
        let key = ctx.staged_key(resource_type);
        self.store.put(&key, file.to_csv().as_bytes())?;

        tracing::info!("Staged {} {} vertices at {}", file.len(), def.label, key);
        Ok(StagedOutput { file, key, tables })
    }

    /// Transform the snapshot previously collected for the run's target.
    pub fn transform_stored(
        &self,
        ctx: &PipelineContext,
        resource_type: &str,
    ) -> Result<StagedOutput, PipelineError> {
        self.transform_stored_many(ctx, std::slice::from_ref(&ctx.target), resource_type)
    }

    /// Transform stored snapshots of several targets into one vertex file,
    /// in target order.
    pub fn transform_stored_many(
        &self,
        ctx: &PipelineContext,
        targets: &[CollectionTarget],
        resource_type: &str,
    ) -> Result<StagedOutput, PipelineError> {
        let snapshots = targets
            .iter()
            .map(|target| {
                let key = SnapshotKey::new(&target.account_id, &target.region, resource_type);
                load_snapshot(self.store.as_ref(), &key, &ctx.stage)
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.transform(ctx, &snapshots, resource_type)
    }

    /// Load stage: submit the run's staged nodes and wait.
    pub async fn load(
        &self,
        ctx: &PipelineContext,
        loader: &BulkLoader,
        target: &LoadTarget,
    ) -> Result<(String, LoadSummary), PipelineError> {
        let request = LoadRequest {
            source: self.store.uri(&ctx.nodes_prefix()),
            role_arn: target.role_arn.clone(),
            region: target.region.clone(),
            endpoints: target.endpoints.clone(),
        };

        let (job, summary) = loader.load(request, target.timeout).await?;
        tracing::info!(
            "Bulk load {} finished: {} rows processed, {} skipped",
            job.load_id,
            summary.rows_processed,
            summary.rows_skipped
        );
        Ok((job.load_id, summary))
    }

    /// All stages for one resource type. `load` is skipped when `None`.
    pub async fn run<D: ResourceDescriber>(
        &self,
        ctx: &PipelineContext,
        describer: D,
        resource_type: &str,
        load: Option<(&BulkLoader, &LoadTarget)>,
    ) -> Result<RunReport, PipelineError> {
        tracing::info!("Run {} started for {}", ctx.run_id, resource_type);

        // fail on an unknown resource type before calling out
        self.registry.get(resource_type)?;

        let snapshot = self.collect(ctx, describer, resource_type).await?;
        let staged = self.transform(ctx, std::slice::from_ref(&snapshot), resource_type)?;

        let mut report = RunReport {
            run_id: ctx.run_id,
            resource_type: resource_type.to_string(),
            tables: staged.tables,
            vertices: staged.file.len(),
            staged_uri: self.store.uri(&staged.key),
            load_id: None,
            load_summary: None,
        };

        if let Some((loader, target)) = load {
            let (load_id, summary) = self.load(ctx, loader, target).await?;
            report.load_id = Some(load_id);
            report.load_summary = Some(summary);
        }

        tracing::info!("Run {} finished", ctx.run_id);
        Ok(report)
    }
}
