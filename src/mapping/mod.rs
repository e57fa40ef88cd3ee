//! Graph record mapping
//!
//! Turns rows of one relationalized table into vertex records: the natural
//! key becomes a prefixed `~id`, every row gets the resource type's label,
//! and only the declared columns survive as typed properties.
//!
//! # Module Structure
//!
//! - [`registry`] - Declarative mapping definitions (embedded + user files)
//! - [`staging`] - CSV rendering of the staged vertex file

pub mod registry;
pub mod staging;

pub use registry::{FieldMapping, IdMapping, MappingDef, MappingRegistry, PropertyType, SourceType};
pub use staging::StagedVertexFile;

use crate::error::MappingError;
use crate::relationalize::naming::is_descendant_table;
use crate::relationalize::{FlatTable, Row, Scalar, TableSet};

/// Staging column holding the vertex id.
pub const ID_COLUMN: &str = "~id";

/// Staging column holding the vertex label.
pub const LABEL_COLUMN: &str = "~label";

/// A graph vertex as one staging row.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexRecord {
    pub id: String,
    pub label: String,
    /// `(header, value)` pairs in mapping order.
    pub properties: Vec<(String, String)>,
}

impl VertexRecord {
    pub fn property(&self, header: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }
}

/// Global vertex id: resource-type tag followed by the natural key.
pub fn vertex_id(prefix: &str, natural_key: &str) -> String {
    format!("{}{}", prefix, natural_key)
}

/// Maps relationalized tables through one [`MappingDef`].
pub struct GraphRecordMapper<'a> {
    def: &'a MappingDef,
}

impl<'a> GraphRecordMapper<'a> {
    pub fn new(def: &'a MappingDef) -> Self {
        Self { def }
    }

    pub fn definition(&self) -> &MappingDef {
        self.def
    }

    /// Map every row of the selected table. A table with no rows yields no
    /// records, and so does a child table that never appeared because its
    /// array was empty or missing in every record. A non-empty table lacking
    /// a referenced column, or any row lacking a value, is an error.
    pub fn map(&self, tables: &TableSet) -> Result<Vec<VertexRecord>, MappingError> {
        let Some(table) = tables.get(&self.def.table) else {
            return self.absent_table(tables);
        };

        if !table.rows.is_empty() {
            for column in self.def.source_columns() {
                if !table.has_column(column) {
                    return Err(MappingError::ColumnNotFound {
                        table: table.name.clone(),
                        column: column.to_string(),
                    });
                }
            }
        }

        let records = table
            .rows
            .iter()
            .map(|row| self.map_row(table, row))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            "Mapped {} {} vertices from {}",
            records.len(),
            self.def.label,
            table.name
        );
        Ok(records)
    }

    /// Map several table sets (e.g. one per account/region) and collapse
    /// them into a single staged file.
    pub fn map_all<'t>(
        &self,
        partitions: impl IntoIterator<Item = &'t TableSet>,
    ) -> Result<StagedVertexFile, MappingError> {
        let mapped = partitions
            .into_iter()
            .map(|tables| self.map(tables))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.collapse(mapped))
    }

    /// Merge mapped partitions into one writable unit, in input order. The
    /// loader needs exactly one file per vertex type.
    pub fn collapse(&self, partitions: Vec<Vec<VertexRecord>>) -> StagedVertexFile {
        StagedVertexFile {
            resource_type: self.def.resource_type.clone(),
            header: self.def.header(),
            records: partitions.into_iter().flatten().collect(),
        }
    }

    /// A missing table is only an empty array when the nearest table above
    /// it exists and has no rows. If that ancestor has rows, none of them
    /// carried the array, which means the source schema changed.
    fn absent_table(&self, tables: &TableSet) -> Result<Vec<VertexRecord>, MappingError> {
        let root = tables.root().map(|t| t.name.as_str()).unwrap_or_default();
        let ancestor = tables
            .iter()
            .filter(|t| is_descendant_table(root, &t.name, &self.def.table))
            .max_by_key(|t| t.name.len());

        match ancestor {
            Some(ancestor) if ancestor.rows.is_empty() => {
                tracing::debug!(
                    "No {} table because {} is empty",
                    self.def.table,
                    ancestor.name
                );
                Ok(Vec::new())
            }
            _ => Err(MappingError::TableNotFound {
                table: self.def.table.clone(),
                available: tables.names().join(", "),
            }),
        }
    }

    fn map_row(&self, table: &FlatTable, row: &Row) -> Result<VertexRecord, MappingError> {
        let natural_key = required(table, row, &self.def.id.source)?;

        let properties = self
            .def
            .fields
            .iter()
            .map(|field| {
                let value = required(table, row, &field.source)?;
                let value = read_as(row, &field.source, value, field.source_type)?;
                Ok((field.header(), value))
            })
            .collect::<Result<Vec<_>, MappingError>>()?;

        Ok(VertexRecord {
            id: vertex_id(&self.def.id.prefix, &natural_key.to_string()),
            label: self.def.label.clone(),
            properties,
        })
    }
}

fn required<'r>(table: &FlatTable, row: &'r Row, column: &str) -> Result<&'r Scalar, MappingError> {
    row.get(column).ok_or_else(|| MappingError::MissingValue {
        table: table.name.clone(),
        row: row.key,
        column: column.to_string(),
    })
}

/// Interpret a scalar as the declared source type and render it for the
/// staging file.
fn read_as(
    row: &Row,
    column: &str,
    value: &Scalar,
    source_type: SourceType,
) -> Result<String, MappingError> {
    let invalid = || MappingError::InvalidValue {
        row: row.key,
        column: column.to_string(),
        value: value.to_string(),
        expected: source_type.to_string(),
    };

    match (source_type, value) {
        (SourceType::String, v) => Ok(v.to_string()),
        (SourceType::Long, Scalar::Int(i)) => Ok(i.to_string()),
        (SourceType::Long, Scalar::String(s)) => {
            s.trim().parse::<i64>().map(|i| i.to_string()).map_err(|_| invalid())
        }
        (SourceType::Double, Scalar::Int(_) | Scalar::Float(_)) => Ok(value.to_string()),
        (SourceType::Double, Scalar::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(|x| Scalar::Float(x).to_string())
            .map_err(|_| invalid()),
        (SourceType::Boolean, Scalar::Bool(b)) => Ok(b.to_string()),
        (SourceType::Boolean, Scalar::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok("true".to_string()),
            "false" => Ok("false".to_string()),
            _ => Err(invalid()),
        },
        _ => Err(invalid()),
    }
}
