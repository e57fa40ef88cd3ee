//! resgraph
//!
//! Inventories cloud resources, flattens the nested describe results into
//! relational tables, maps them to graph vertices and bulk-loads the staged
//! vertex files into a graph database.
//!
//! Stages, leaves first:
//!
//! - [`collector`] - Snapshot collection and blob storage
//! - [`relationalize`] - Nested records to linked flat tables
//! - [`mapping`] - Flat tables to vertex records and staging CSV
//! - [`loader`] - Bulk load submission and completion tracking
//! - [`pipeline`] - Runs the stages in order for one resource type

pub mod collector;
pub mod config;
pub mod error;
pub mod http;
pub mod loader;
pub mod mapping;
pub mod pipeline;
pub mod relationalize;
pub mod snapshot;

pub use error::{
    CollectionError, CompletionError, ConfigError, LoadError, MappingError, PipelineError,
    RelationalizationError, StorageError, TimeoutError,
};
