//! Relationalization
//!
//! Flattens a nested snapshot into a root table plus one child table per
//! array-valued field. The traversal is depth-first over the JSON tree:
//!
//! - objects are inlined into the current row with path-qualified columns
//! - arrays become child tables, one row per element, linked to the parent
//!   row through the row's `parent` key; the parent keeps no column for it
//! - scalars become columns, `null` is treated as absent
//!
//! Column and table names come from [`naming`], so repeated runs over the
//! same topology produce the same identifiers and row order.

pub mod naming;
mod table;

pub use table::{FlatTable, Row, Scalar, ScalarKind, TableSet};

use crate::error::RelationalizationError;
use crate::snapshot::ResourceSnapshot;
use naming::{child_table_name, element_path, join_key, scalar_column, ROOT_TABLE};
use serde_json::Value;
use std::collections::HashMap;

/// Default traversal depth limit.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Flattens nested records into linked flat tables.
#[derive(Debug, Clone)]
pub struct Relationalizer {
    root_table: String,
    max_depth: usize,
}

impl Default for Relationalizer {
    fn default() -> Self {
        Self {
            root_table: ROOT_TABLE.to_string(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl Relationalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root_table(mut self, name: &str) -> Self {
        self.root_table = name.to_string();
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn root_table(&self) -> &str {
        &self.root_table
    }

    /// Relationalize a collected snapshot.
    pub fn relationalize(
        &self,
        snapshot: &ResourceSnapshot,
    ) -> Result<TableSet, RelationalizationError> {
        tracing::debug!("Relationalizing snapshot {}", snapshot.key);
        self.relationalize_records(&snapshot.records())
    }

    /// Relationalize a bare JSON document (object = one record, array = one
    /// record per element).
    pub fn relationalize_value(&self, value: &Value) -> Result<TableSet, RelationalizationError> {
        match value {
            Value::Array(items) => self.relationalize_records(&items.iter().collect::<Vec<_>>()),
            other => self.relationalize_records(&[other]),
        }
    }

    fn relationalize_records(
        &self,
        records: &[&Value],
    ) -> Result<TableSet, RelationalizationError> {
        let mut builder = Builder::new(&self.root_table, self.max_depth);

        for (i, record) in records.iter().enumerate() {
            let mut row = Row::root(i as u64);
            builder.flatten(0, &mut row, "", record, 0)?;
            builder.tables[0].rows.push(row);
        }

        let mut tables = builder.tables;
        for table in &mut tables {
            table.widen_mixed_columns();
            tracing::debug!(
                "Table {}: {} rows, {} columns",
                table.name,
                table.rows.len(),
                table.column_names().len()
            );
        }

        Ok(TableSet::from_tables(tables))
    }
}

struct Builder<'a> {
    root: &'a str,
    max_depth: usize,
    tables: Vec<FlatTable>,
    by_name: HashMap<String, usize>,
}

impl<'a> Builder<'a> {
    fn new(root: &'a str, max_depth: usize) -> Self {
        let mut by_name = HashMap::new();
        by_name.insert(root.to_string(), 0);
        Self {
            root,
            max_depth,
            tables: vec![FlatTable::new(root, None)],
            by_name,
        }
    }

    /// Index of the named table, creating it on first sight so that empty
    /// arrays still produce an (empty) table.
    fn table_index(&mut self, name: String, parent: usize) -> usize {
        if let Some(&idx) = self.by_name.get(&name) {
            return idx;
        }
        let parent_name = self.tables[parent].name.clone();
        self.tables.push(FlatTable::new(&name, Some(&parent_name)));
        let idx = self.tables.len() - 1;
        self.by_name.insert(name, idx);
        idx
    }

    fn flatten(
        &mut self,
        table: usize,
        row: &mut Row,
        path: &str,
        value: &Value,
        depth: usize,
    ) -> Result<(), RelationalizationError> {
        if depth > self.max_depth {
            return Err(RelationalizationError::DepthExceeded {
                path: scalar_column(path),
                limit: self.max_depth,
            });
        }

        match value {
            Value::Null => {}
            Value::Object(fields) => {
                for (key, field) in fields {
                    self.flatten(table, row, &join_key(path, key), field, depth + 1)?;
                }
            }
            Value::Array(items) => {
                let array_path = scalar_column(path);
                let child = self.table_index(child_table_name(self.root, &array_path), table);
                let element = element_path(&array_path);

                for (index, item) in items.iter().enumerate() {
                    let key = self.tables[child].rows.len() as u64;
                    let mut child_row = Row::child(key, row.key, index);
                    self.flatten(child, &mut child_row, &element, item, depth + 1)?;
                    self.tables[child].rows.push(child_row);
                }
            }
            leaf => {
                if let Some(scalar) = Scalar::from_json(leaf) {
                    row.columns.insert(scalar_column(path), scalar);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn describe_instances() -> Value {
        json!({
            "Reservations": [
                {
                    "ReservationId": "r-1",
                    "Instances": [
                        {
                            "InstanceId": "i-1",
                            "InstanceType": "t2.micro",
                            "State": {"Code": 16, "Name": "running"},
                            "Tags": [{"Key": "env", "Value": "dev"}]
                        },
                        {
                            "InstanceId": "i-2",
                            "InstanceType": "m5.large",
                            "State": {"Code": 80, "Name": "stopped"},
                            "Tags": []
                        }
                    ]
                }
            ]
        })
    }

    #[test]
    fn test_table_names_follow_array_paths() {
        let tables = Relationalizer::new()
            .relationalize_value(&describe_instances())
            .unwrap();

        assert_eq!(
            tables.names(),
            vec![
                "roottable",
                "roottable_Reservations",
                "roottable_Reservations.val.Instances",
                "roottable_Reservations.val.Instances.val.Tags",
            ]
        );
    }

    #[test]
    fn test_nested_objects_are_inlined() {
        let tables = Relationalizer::new()
            .relationalize_value(&describe_instances())
            .unwrap();
        let instances = tables.get("roottable_Reservations.val.Instances").unwrap();

        assert_eq!(instances.rows.len(), 2);
        let first = &instances.rows[0];
        assert_eq!(
            first.get("Reservations.val.Instances.val.InstanceId"),
            Some(&Scalar::String("i-1".to_string()))
        );
        assert_eq!(
            first.get("Reservations.val.Instances.val.State.Code"),
            Some(&Scalar::Int(16))
        );
        // arrays are moved out of the parent
        assert!(!instances.has_column("Reservations.val.Instances.val.Tags"));
    }

    #[test]
    fn test_child_rows_reference_parent_rows() {
        let tables = Relationalizer::new()
            .relationalize_value(&describe_instances())
            .unwrap();

        let root = tables.root().unwrap();
        assert_eq!(root.rows.len(), 1);
        assert!(root.rows[0].columns.is_empty());
        assert_eq!(root.rows[0].parent, None);

        let reservations = tables.get("roottable_Reservations").unwrap();
        assert_eq!(reservations.parent.as_deref(), Some("roottable"));
        assert_eq!(reservations.rows[0].parent, Some(0));

        let instances = tables.get("roottable_Reservations.val.Instances").unwrap();
        assert_eq!(
            instances.parent.as_deref(),
            Some("roottable_Reservations")
        );
        for (i, row) in instances.rows.iter().enumerate() {
            assert_eq!(row.key, i as u64);
            assert_eq!(row.parent, Some(0));
            assert_eq!(row.index, Some(i));
        }

        let tags = tables
            .get("roottable_Reservations.val.Instances.val.Tags")
            .unwrap();
        assert_eq!(tags.rows.len(), 1);
        assert_eq!(tags.rows[0].parent, Some(0));
    }

    #[test]
    fn test_empty_array_yields_empty_table() {
        let tables = Relationalizer::new()
            .relationalize_value(&json!({"Reservations": []}))
            .unwrap();
        let reservations = tables.get("roottable_Reservations").unwrap();
        assert!(reservations.rows.is_empty());
    }

    #[test]
    fn test_missing_fields_are_absent_not_null() {
        let tables = Relationalizer::new()
            .relationalize_value(&json!([
                {"id": "a", "extra": "x"},
                {"id": "b", "extra": null},
                {"id": "c"}
            ]))
            .unwrap();
        let root = tables.root().unwrap();
        assert_eq!(root.rows.len(), 3);
        assert!(root.rows[0].get("extra").is_some());
        assert!(root.rows[1].get("extra").is_none());
        assert!(root.rows[2].get("extra").is_none());
    }

    #[test]
    fn test_mixed_types_widen_to_string() {
        let tables = Relationalizer::new()
            .relationalize_value(&json!([{"port": 22}, {"port": "ssh"}, {"port": 443}]))
            .unwrap();
        let root = tables.root().unwrap();
        let ports: Vec<_> = root.rows.iter().map(|r| r.get("port").cloned()).collect();
        assert_eq!(
            ports,
            vec![
                Some(Scalar::String("22".to_string())),
                Some(Scalar::String("ssh".to_string())),
                Some(Scalar::String("443".to_string())),
            ]
        );
        assert!(root.widened.contains("port"));
    }

    #[test]
    fn test_scalar_arrays() {
        let tables = Relationalizer::new()
            .relationalize_value(&json!({"Groups": ["a", "b"]}))
            .unwrap();
        let groups = tables.get("roottable_Groups").unwrap();
        let values: Vec<_> = groups
            .rows
            .iter()
            .map(|r| r.get("Groups.val").cloned())
            .collect();
        assert_eq!(
            values,
            vec![
                Some(Scalar::String("a".to_string())),
                Some(Scalar::String("b".to_string()))
            ]
        );
    }

    #[test]
    fn test_nested_arrays() {
        let tables = Relationalizer::new()
            .relationalize_value(&json!({"m": [[1, 2], [3]]}))
            .unwrap();
        assert_eq!(
            tables.names(),
            vec!["roottable", "roottable_m", "roottable_m.val"]
        );
        let inner = tables.get("roottable_m.val").unwrap();
        assert_eq!(inner.rows.len(), 3);
        assert_eq!(inner.rows[2].parent, Some(1));
        assert_eq!(inner.rows[2].get("m.val.val"), Some(&Scalar::Int(3)));
    }

    #[test]
    fn test_depth_limit() {
        let mut value = json!("leaf");
        for _ in 0..10 {
            value = json!({ "n": value });
        }
        let err = Relationalizer::new()
            .with_max_depth(5)
            .relationalize_value(&value)
            .unwrap_err();
        assert!(matches!(
            err,
            RelationalizationError::DepthExceeded { limit: 5, .. }
        ));

        assert!(Relationalizer::new()
            .with_max_depth(10)
            .relationalize_value(&value)
            .is_ok());
    }

    #[test]
    fn test_custom_root_table() {
        let tables = Relationalizer::new()
            .with_root_table("ec2")
            .relationalize_value(&json!({"xs": [1]}))
            .unwrap();
        assert_eq!(tables.names(), vec!["ec2", "ec2_xs"]);
    }

    #[test]
    fn test_deterministic() {
        let relationalizer = Relationalizer::new();
        let a = relationalizer.relationalize_value(&describe_instances()).unwrap();
        let b = relationalizer.relationalize_value(&describe_instances()).unwrap();
        assert_eq!(a, b);
    }
}
