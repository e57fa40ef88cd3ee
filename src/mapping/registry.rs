//! Mapping Registry - Load vertex mapping definitions
//!
//! Built-in definitions are embedded JSON files compiled into the binary.
//! Operators can add or override resource types with their own JSON or YAML
//! files, so a new resource type is a data change rather than a code change.
//! Every definition is validated before any transformation runs.

use crate::error::{ConfigError, MappingError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;

/// Embedded mapping files (compiled into the binary)
const MAPPING_FILES: &[&str] = &[include_str!("../mappings/ec2.json")];

/// How a source column is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    String,
    Long,
    Double,
    Boolean,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceType::String => "string",
            SourceType::Long => "long",
            SourceType::Double => "double",
            SourceType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Property type embedded in the staging header, consumed by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PropertyType {
    Bool,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    #[default]
    String,
    Date,
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropertyType::Bool => "Bool",
            PropertyType::Byte => "Byte",
            PropertyType::Short => "Short",
            PropertyType::Int => "Int",
            PropertyType::Long => "Long",
            PropertyType::Float => "Float",
            PropertyType::Double => "Double",
            PropertyType::String => "String",
            PropertyType::Date => "Date",
        };
        f.write_str(name)
    }
}

/// One `(sourceColumn, sourceType, targetProperty, targetType)` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source: String,
    #[serde(default)]
    pub source_type: SourceType,
    pub property: String,
    #[serde(default)]
    pub property_type: PropertyType,
}

impl FieldMapping {
    /// Staging header for this property, e.g. `instanceType:String`.
    pub fn header(&self) -> String {
        format!("{}:{}", self.property, self.property_type)
    }
}

/// Natural-key column and the resource-type tag prepended to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdMapping {
    pub source: String,
    pub prefix: String,
}

/// Vertex mapping for one resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingDef {
    /// Filled from the key of the `mappings` table.
    #[serde(skip)]
    pub resource_type: String,
    /// Relationalized table the vertices come from.
    pub table: String,
    pub label: String,
    pub id: IdMapping,
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
}

impl MappingDef {
    /// Staging columns: `~id`, one per property, `~label`.
    pub fn header(&self) -> Vec<String> {
        let mut header = Vec::with_capacity(self.fields.len() + 2);
        header.push(super::ID_COLUMN.to_string());
        header.extend(self.fields.iter().map(FieldMapping::header));
        header.push(super::LABEL_COLUMN.to_string());
        header
    }

    /// Every source column the mapping reads, id column first.
    pub fn source_columns(&self) -> Vec<&str> {
        let mut columns = vec![self.id.source.as_str()];
        for field in &self.fields {
            if !columns.contains(&field.source.as_str()) {
                columns.push(field.source.as_str());
            }
        }
        columns
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidMapping {
            resource_type: self.resource_type.clone(),
            message: message.to_string(),
        };

        if self.resource_type.trim().is_empty() {
            return Err(invalid("resource type is empty"));
        }
        if self.table.trim().is_empty() {
            return Err(invalid("table is empty"));
        }
        if self.label.trim().is_empty() {
            return Err(invalid("label is empty"));
        }
        if self.id.source.trim().is_empty() {
            return Err(invalid("id source column is empty"));
        }
        if self.id.prefix.is_empty() {
            return Err(invalid("id prefix is empty"));
        }

        let mut seen = BTreeSet::new();
        for field in &self.fields {
            if field.source.trim().is_empty() {
                return Err(invalid("field source column is empty"));
            }
            let property = field.property.as_str();
            if property.trim().is_empty() {
                return Err(invalid("property name is empty"));
            }
            if property.starts_with('~') {
                return Err(invalid(&format!(
                    "property '{}' uses the reserved '~' prefix",
                    property
                )));
            }
            if property.contains(':') || property.contains(',') {
                return Err(invalid(&format!(
                    "property '{}' must not contain ':' or ','",
                    property
                )));
            }
            if !seen.insert(property) {
                return Err(invalid(&format!("property '{}' mapped twice", property)));
            }
        }

        Ok(())
    }
}

/// Root structure of a mapping file
#[derive(Debug, Clone, Deserialize)]
struct MappingFile {
    #[serde(default)]
    mappings: HashMap<String, MappingDef>,
}

impl MappingFile {
    fn into_defs(self) -> impl Iterator<Item = MappingDef> {
        self.mappings.into_iter().map(|(resource_type, mut def)| {
            def.resource_type = resource_type;
            def
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Builtin,
    User,
}

/// Validated set of mapping definitions keyed by resource type.
#[derive(Debug, Clone, Default)]
pub struct MappingRegistry {
    mappings: BTreeMap<String, (MappingDef, Origin)>,
}

impl MappingRegistry {
    /// Registry with the embedded definitions only.
    pub fn builtin() -> Result<Self, ConfigError> {
        let mut registry = Self::default();
        for content in MAPPING_FILES {
            let file: MappingFile = serde_json::from_str(content)?;
            for def in file.into_defs() {
                registry.insert(def, Origin::Builtin)?;
            }
        }
        Ok(registry)
    }

    /// Merge definitions from a `.json`, `.yaml` or `.yml` file. User
    /// definitions replace built-in ones of the same resource type, but two
    /// user files may not define the same type.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        self.load_str(&content, is_yaml)?;
        tracing::info!("Loaded mappings from {}", path.display());
        Ok(())
    }

    /// Merge definitions from file content.
    pub fn load_str(&mut self, content: &str, yaml: bool) -> Result<(), ConfigError> {
        let file: MappingFile = if yaml {
            serde_yaml::from_str(content)?
        } else {
            serde_json::from_str(content)?
        };
        for def in file.into_defs() {
            self.insert(def, Origin::User)?;
        }
        Ok(())
    }

    fn insert(&mut self, def: MappingDef, origin: Origin) -> Result<(), ConfigError> {
        def.validate()?;
        let existing = self.mappings.get(&def.resource_type).map(|(_, o)| *o);
        match (existing, origin) {
            (None, _) => {}
            (Some(Origin::Builtin), Origin::User) => {
                tracing::info!("Overriding built-in mapping for {}", def.resource_type);
            }
            _ => return Err(ConfigError::DuplicateMapping(def.resource_type)),
        }
        self.mappings.insert(def.resource_type.clone(), (def, origin));
        Ok(())
    }

    /// Look up the mapping for a resource type.
    pub fn get(&self, resource_type: &str) -> Result<&MappingDef, MappingError> {
        self.mappings
            .get(resource_type)
            .map(|(def, _)| def)
            .ok_or_else(|| MappingError::UnknownResourceType(resource_type.to_string()))
    }

    /// All registered resource types, sorted.
    pub fn resource_types(&self) -> Vec<&str> {
        self.mappings.keys().map(|s| s.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappingDef> {
        self.mappings.values().map(|(def, _)| def)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_loads_successfully() {
        let registry = MappingRegistry::builtin().unwrap();
        assert!(!registry.is_empty(), "Registry should have mappings");
        assert!(registry.resource_types().contains(&"ec2"));
    }

    #[test]
    fn test_ec2_mapping() {
        let registry = MappingRegistry::builtin().unwrap();
        let ec2 = registry.get("ec2").unwrap();
        assert_eq!(ec2.label, "EC2");
        assert_eq!(ec2.id.prefix, "ec2");
        assert_eq!(ec2.table, "roottable_Reservations.val.Instances");
        assert_eq!(
            ec2.header(),
            vec!["~id", "instanceId:String", "instanceType:String", "~label"]
        );
        assert_eq!(
            ec2.source_columns(),
            vec![
                "Reservations.val.Instances.val.InstanceId",
                "Reservations.val.Instances.val.InstanceType"
            ]
        );
    }

    #[test]
    fn test_unknown_resource_type() {
        let registry = MappingRegistry::builtin().unwrap();
        assert!(matches!(
            registry.get("rds"),
            Err(MappingError::UnknownResourceType(_))
        ));
    }

    #[test]
    fn test_yaml_user_mapping() {
        let mut registry = MappingRegistry::builtin().unwrap();
        registry
            .load_str(
                r#"
mappings:
  vpc:
    table: roottable_Vpcs
    label: VPC
    id:
      source: Vpcs.val.VpcId
      prefix: vpc
    fields:
      - source: Vpcs.val.CidrBlock
        property: cidr
      - source: Vpcs.val.IsDefault
        source_type: boolean
        property: isDefault
        property_type: Bool
"#,
                true,
            )
            .unwrap();

        let vpc = registry.get("vpc").unwrap();
        assert_eq!(vpc.resource_type, "vpc");
        assert_eq!(vpc.fields[0].source_type, SourceType::String);
        assert_eq!(
            vpc.header(),
            vec!["~id", "cidr:String", "isDefault:Bool", "~label"]
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_user_mapping_overrides_builtin_once() {
        let override_ec2 = r#"{"mappings": {"ec2": {
            "table": "roottable_Reservations.val.Instances",
            "label": "Instance",
            "id": {"source": "Reservations.val.Instances.val.InstanceId", "prefix": "ec2"}
        }}}"#;

        let mut registry = MappingRegistry::builtin().unwrap();
        registry.load_str(override_ec2, false).unwrap();
        assert_eq!(registry.get("ec2").unwrap().label, "Instance");

        let err = registry.load_str(override_ec2, false).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateMapping(_)));
    }

    #[test]
    fn test_validation_rejects_bad_definitions() {
        let base = r#"{"mappings": {"x": {
            "table": "roottable",
            "label": "X",
            "id": {"source": "id", "prefix": "x"},
            "fields": [FIELDS]
        }}}"#;

        let cases = [
            r#"{"source": "a", "property": "~id"}"#,
            r#"{"source": "a", "property": "p:String"}"#,
            r#"{"source": "a", "property": "p"}, {"source": "b", "property": "p"}"#,
            r#"{"source": "", "property": "p"}"#,
        ];

        for fields in cases {
            let mut registry = MappingRegistry::default();
            let err = registry
                .load_str(&base.replace("FIELDS", fields), false)
                .unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidMapping { .. }),
                "expected invalid mapping for {}",
                fields
            );
        }
    }

    #[test]
    fn test_validation_rejects_empty_prefix() {
        let mut registry = MappingRegistry::default();
        let err = registry
            .load_str(
                r#"{"mappings": {"x": {"table": "t", "label": "X", "id": {"source": "id", "prefix": ""}}}}"#,
                false,
            )
            .unwrap_err();
        assert!(err.to_string().contains("prefix"));
    }
}
