//! Resource snapshots
//!
//! A snapshot is the raw describe result for one resource type in one
//! account and region. It is written once per collection run and never
//! mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifies where a snapshot came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotKey {
    pub account: String,
    pub region: String,
    pub resource_type: String,
}

impl SnapshotKey {
    pub fn new(account: &str, region: &str, resource_type: &str) -> Self {
        Self {
            account: account.to_string(),
            region: region.to_string(),
            resource_type: resource_type.to_string(),
        }
    }

    /// Object key relative to a bucket:
    /// `<stage>/account=<account>/region=<region>/<resourceType>.json`.
    ///
    /// Stable across runs so that a re-run overwrites the previous snapshot.
    pub fn object_key(&self, stage: &str) -> String {
        let partition = format!(
            "account={}/region={}/{}.json",
            self.account, self.region, self.resource_type
        );
        if stage.is_empty() {
            partition
        } else {
            format!("{}/{}", stage.trim_end_matches('/'), partition)
        }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.account, self.region, self.resource_type)
    }
}

/// Raw structured record set for one resource-type query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    #[serde(flatten)]
    pub key: SnapshotKey,
    pub collected_at: DateTime<Utc>,
    pub body: Value,
}

impl ResourceSnapshot {
    pub fn new(key: SnapshotKey, body: Value) -> Self {
        Self {
            key,
            collected_at: Utc::now(),
            body,
        }
    }

    /// Top-level records. An array body contributes one record per
    /// element, anything else is a single record.
    pub fn records(&self) -> Vec<&Value> {
        match &self.body {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        }
    }

    /// Encode the snapshot envelope for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a stored snapshot envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Whether a describe response is a record tree (object or array at the
/// top). Scalars and `null` are not.
pub fn is_record_tree(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_key_layout() {
        let key = SnapshotKey::new("111111111111", "us-east-1", "ec2");
        assert_eq!(
            key.object_key("raw"),
            "raw/account=111111111111/region=us-east-1/ec2.json"
        );
        assert_eq!(
            key.object_key(""),
            "account=111111111111/region=us-east-1/ec2.json"
        );
        assert_eq!(key.object_key("raw/"), key.object_key("raw"));
    }

    #[test]
    fn test_records_splits_top_level_arrays() {
        let key = SnapshotKey::new("1", "r", "ec2");
        let single = ResourceSnapshot::new(key.clone(), json!({"a": 1}));
        assert_eq!(single.records().len(), 1);

        let many = ResourceSnapshot::new(key, json!([{"a": 1}, {"a": 2}, {"a": 3}]));
        assert_eq!(many.records().len(), 3);
    }

    #[test]
    fn test_envelope_keeps_key_fields_flat() {
        let snapshot = ResourceSnapshot::new(
            SnapshotKey::new("1", "us-east-1", "ec2"),
            json!({"Reservations": []}),
        );
        let encoded: Value = serde_json::from_slice(&snapshot.to_bytes().unwrap()).unwrap();
        assert_eq!(encoded["account"], "1");
        assert_eq!(encoded["resourceType"], "ec2");
        assert!(encoded.get("collectedAt").is_some());

        let decoded = ResourceSnapshot::from_bytes(&snapshot.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_is_record_tree() {
        assert!(is_record_tree(&json!({})));
        assert!(is_record_tree(&json!([])));
        assert!(!is_record_tree(&json!("text")));
        assert!(!is_record_tree(&Value::Null));
    }
}
