//! Flat tables produced by relationalization

use serde::Serialize;
use serde_json::{Number, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A leaf value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Type tag of a [`Scalar`], used to detect mixed-type columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarKind {
    Bool,
    Int,
    Float,
    String,
}

impl Scalar {
    /// Convert a JSON leaf. Returns `None` for containers and `null`.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::Number(n) => Some(Self::from_number(n)),
            Value::String(s) => Some(Scalar::String(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    fn from_number(n: &Number) -> Self {
        if let Some(i) = n.as_i64() {
            Scalar::Int(i)
        } else if n.is_f64() {
            Scalar::Float(n.as_f64().unwrap_or_default())
        } else {
            // u64 above i64::MAX: keep the exact digits
            Scalar::String(n.to_string())
        }
    }

    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::Bool(_) => ScalarKind::Bool,
            Scalar::Int(_) => ScalarKind::Int,
            Scalar::Float(_) => ScalarKind::Float,
            Scalar::String(_) => ScalarKind::String,
        }
    }

    /// Widen to the string representation.
    pub fn to_string_scalar(&self) -> Scalar {
        match self {
            Scalar::String(_) => self.clone(),
            other => Scalar::String(other.to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => match Number::from_f64(*x) {
                Some(n) => write!(f, "{}", n),
                None => write!(f, "{}", x),
            },
            Scalar::String(s) => f.write_str(s),
        }
    }
}

/// One row of a flat table.
///
/// `key` is sequential within the table. Child rows point at their parent
/// row through `parent` and remember their array position in `index`.
/// None of the three are columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub key: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    pub columns: BTreeMap<String, Scalar>,
}

impl Row {
    pub fn root(key: u64) -> Self {
        Self {
            key,
            parent: None,
            index: None,
            columns: BTreeMap::new(),
        }
    }

    pub fn child(key: u64, parent: u64, index: usize) -> Self {
        Self {
            key,
            parent: Some(parent),
            index: Some(index),
            columns: BTreeMap::new(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.columns.get(column)
    }
}

/// A named table of flat rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlatTable {
    pub name: String,
    /// Parent table name; `None` for the root table.
    pub parent: Option<String>,
    pub rows: Vec<Row>,
    /// Columns whose values were widened to strings because rows disagreed
    /// on the type.
    pub widened: BTreeSet<String>,
}

impl FlatTable {
    pub fn new(name: &str, parent: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            parent: parent.map(|p| p.to_string()),
            rows: Vec::new(),
            widened: BTreeSet::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Union of column names over all rows, sorted.
    pub fn column_names(&self) -> BTreeSet<&str> {
        self.rows
            .iter()
            .flat_map(|row| row.columns.keys().map(|k| k.as_str()))
            .collect()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.rows.iter().any(|row| row.columns.contains_key(column))
    }

    /// Number of column values across all rows.
    pub fn value_count(&self) -> usize {
        self.rows.iter().map(|row| row.columns.len()).sum()
    }

    /// Widen every column whose non-absent values have more than one type.
    pub(crate) fn widen_mixed_columns(&mut self) {
        let mut kinds: BTreeMap<&str, BTreeSet<ScalarKind>> = BTreeMap::new();
        for row in &self.rows {
            for (column, value) in &row.columns {
                kinds.entry(column.as_str()).or_default().insert(value.kind());
            }
        }

        let mixed: BTreeSet<String> = kinds
            .into_iter()
            .filter(|(_, k)| k.len() > 1)
            .map(|(column, _)| column.to_string())
            .collect();

        if mixed.is_empty() {
            return;
        }

        for row in &mut self.rows {
            for column in &mixed {
                if let Some(value) = row.columns.get_mut(column) {
                    *value = value.to_string_scalar();
                }
            }
        }

        tracing::warn!(
            "Table {}: widened mixed-type columns to string: {:?}",
            self.name,
            mixed
        );
        self.widened.extend(mixed);
    }
}

/// All tables produced from one snapshot, in discovery order (root first,
/// then depth-first by first occurrence).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableSet {
    tables: Vec<FlatTable>,
}

impl TableSet {
    pub(crate) fn from_tables(tables: Vec<FlatTable>) -> Self {
        Self { tables }
    }

    pub fn get(&self, name: &str) -> Option<&FlatTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn root(&self) -> Option<&FlatTable> {
        self.tables.iter().find(|t| t.is_root())
    }

    pub fn names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlatTable> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Number of column values across every table.
    pub fn value_count(&self) -> usize {
        self.tables.iter().map(FlatTable::value_count).sum()
    }
}
