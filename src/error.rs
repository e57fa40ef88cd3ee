//! Error taxonomy
//!
//! One error type per pipeline stage so callers can tell a failed collection
//! from a failed load without string matching. [`PipelineError`] wraps them
//! all and is what the orchestration layer returns.

use std::time::Duration;
use thiserror::Error;

/// Upstream resource-description failures. Nothing is persisted when one
/// of these is returned.
#[derive(Error, Debug)]
pub enum CollectionError {
    /// The target is missing its account, role or region.
    #[error("Collection target has an empty {field}")]
    InvalidTarget {
        /// Name of the empty field.
        field: &'static str,
    },

    /// The cross-account role could not be assumed.
    #[error("Role assumption failed for {role_arn}: {message}")]
    RoleAssumption {
        /// Role that was requested.
        role_arn: String,
        /// Reason reported by the describer.
        message: String,
    },

    /// The describer rejected the call because of rate limiting.
    #[error("Resource API throttled: {message}")]
    Throttled {
        /// Reason reported by the describer.
        message: String,
    },

    /// The describer answered with a non-success status.
    #[error("Resource API request failed with status {status}")]
    Api {
        /// HTTP status code.
        status: u16,
    },

    /// The response was not a structured record tree.
    #[error("Malformed resource response: {message}")]
    MalformedResponse {
        /// What was wrong with the payload.
        message: String,
    },

    /// The request never produced a response.
    #[error("Resource API transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The snapshot could not be persisted.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The nested input could not be flattened.
#[derive(Error, Debug)]
pub enum RelationalizationError {
    /// Nesting exceeded the configured traversal depth. API responses are
    /// trees, so this only happens on a contract violation upstream.
    #[error("Nesting deeper than {limit} levels at '{path}'")]
    DepthExceeded {
        /// Column path where the limit was hit.
        path: String,
        /// Configured limit.
        limit: usize,
    },
}

/// A mapping definition does not fit the relationalized tables.
#[derive(Error, Debug)]
pub enum MappingError {
    /// No mapping is registered for the resource type.
    #[error("No mapping registered for resource type '{0}'")]
    UnknownResourceType(String),

    /// The mapping selects a table relationalization did not produce.
    #[error("Table '{table}' not found (available: {available})")]
    TableNotFound {
        /// Table the mapping asked for.
        table: String,
        /// Comma separated list of produced tables.
        available: String,
    },

    /// A referenced source column does not exist in any row.
    #[error("Column '{column}' not found in table '{table}'")]
    ColumnNotFound {
        /// Table that was searched.
        table: String,
        /// Missing column.
        column: String,
    },

    /// A referenced source column is absent from one row.
    #[error("Row {row} of table '{table}' has no value for '{column}'")]
    MissingValue {
        /// Table that was mapped.
        table: String,
        /// Row key.
        row: u64,
        /// Missing column.
        column: String,
    },

    /// A value cannot be read as its declared source type.
    #[error("Row {row} column '{column}': '{value}' is not a valid {expected}")]
    InvalidValue {
        /// Row key.
        row: u64,
        /// Column holding the value.
        column: String,
        /// Offending value.
        value: String,
        /// Declared source type.
        expected: String,
    },
}

/// The graph database rejected or failed the ingest.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The loader refused the submission.
    #[error("Bulk load rejected ({status}): {detail}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Sanitized detail from the loader.
        detail: String,
    },

    /// The load reached a failed terminal state.
    #[error("Bulk load {load_id} failed with {status}: {detail}")]
    Failed {
        /// Loader job id.
        load_id: String,
        /// Raw status reported by the loader.
        status: String,
        /// Error detail reported by the loader.
        detail: String,
    },

    /// The loader answered with something that is not a loader response.
    #[error("Unexpected loader response: {0}")]
    Protocol(String),

    /// The request list carried no endpoint to talk to.
    #[error("No loader endpoint configured")]
    NoEndpoint,

    /// The request never produced a response.
    #[error("Loader transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Polling exceeded the caller's bound. The remote job state is unknown, so
/// callers should re-poll rather than re-submit.
#[derive(Error, Debug)]
#[error("Bulk load {load_id} still {last_status} after {elapsed:?}")]
pub struct TimeoutError {
    /// Loader job id.
    pub load_id: String,
    /// Last status observed before giving up.
    pub last_status: String,
    /// How long the caller waited.
    pub elapsed: Duration,
    /// Last status poll failure, when the final polls did not get through.
    pub last_error: Option<String>,
}

/// Outcome of waiting on a load that did not succeed.
#[derive(Error, Debug)]
pub enum CompletionError {
    /// The load failed.
    #[error(transparent)]
    Load(#[from] LoadError),
    /// The wait ran out before a terminal status.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

/// Blob store failures.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No object exists at the key.
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The key escapes the store root or is otherwise unusable.
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    /// IO error against the backing store.
    #[error("IO error on {key}: {source}")]
    Io {
        /// Key being accessed.
        key: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A stored snapshot could not be decoded.
    #[error("Snapshot decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Configuration and mapping-definition problems.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A mapping definition is inconsistent.
    #[error("Invalid mapping for '{resource_type}': {message}")]
    InvalidMapping {
        /// Resource type of the broken definition.
        resource_type: String,
        /// What is wrong with it.
        message: String,
    },

    /// Two definitions claim the same resource type.
    #[error("Duplicate mapping for resource type '{0}'")]
    DuplicateMapping(String),

    /// A definition file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON definition parse failure.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML definition parse failure.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A value in the configuration cannot be used.
    #[error("Invalid configuration value for {field}: {message}")]
    InvalidValue {
        /// Configuration field.
        field: String,
        /// Why it was rejected.
        message: String,
    },
}

/// Any failure that stops a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("collect stage failed: {0}")]
    Collection(#[from] CollectionError),
    #[error("relationalize stage failed: {0}")]
    Relationalization(#[from] RelationalizationError),
    #[error("map stage failed: {0}")]
    Mapping(#[from] MappingError),
    #[error("load stage failed: {0}")]
    Load(#[from] LoadError),
    #[error("load stage timed out: {0}")]
    Timeout(#[from] TimeoutError),
    #[error("staging failed: {0}")]
    Storage(#[from] StorageError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<CompletionError> for PipelineError {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::Load(e) => PipelineError::Load(e),
            CompletionError::Timeout(e) => PipelineError::Timeout(e),
        }
    }
}

impl PipelineError {
    /// Short name of the stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Collection(_) => "collect",
            PipelineError::Relationalization(_) => "relationalize",
            PipelineError::Mapping(_) => "map",
            PipelineError::Load(_) | PipelineError::Timeout(_) => "load",
            PipelineError::Storage(_) => "staging",
            PipelineError::Config(_) => "config",
        }
    }

    /// True when the outcome of a submitted load is unknown.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PipelineError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MappingError::ColumnNotFound {
            table: "roottable".to_string(),
            column: "InstanceType".to_string(),
        };
        assert!(err.to_string().contains("InstanceType"));
        assert!(err.to_string().contains("roottable"));

        let err = TimeoutError {
            load_id: "abc".to_string(),
            last_status: "IN_PROGRESS".to_string(),
            elapsed: Duration::from_secs(5),
            last_error: None,
        };
        assert!(err.to_string().contains("abc"));
        assert!(err.to_string().contains("IN_PROGRESS"));
    }

    #[test]
    fn test_completion_error_keeps_timeout_distinct() {
        let timeout: PipelineError = CompletionError::Timeout(TimeoutError {
            load_id: "abc".to_string(),
            last_status: "PENDING".to_string(),
            elapsed: Duration::from_millis(10),
            last_error: None,
        })
        .into();
        assert!(timeout.is_timeout());
        assert_eq!(timeout.stage(), "load");

        let failed: PipelineError = CompletionError::Load(LoadError::NoEndpoint).into();
        assert!(!failed.is_timeout());
        assert!(matches!(failed, PipelineError::Load(_)));
    }
}
