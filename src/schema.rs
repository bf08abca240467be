//! Schema metadata and versioned table descriptions.
//!
//! Every embedded Arrow sub-file carries the same three metadata keys:
//! `MINKNOW:file_identifier`, `MINKNOW:software` and `MINKNOW:pod5_version`.
//! The pod5 version decides which table-spec version a reader should expect,
//! and each field of a table description records the spec version it was
//! added at (and possibly removed at).

use std::fmt;

use arrow2::datatypes::{DataType, Field, IntegerType, Metadata, Schema};
use uuid::Uuid;

use crate::error::{Pod5Error, Result};

pub const FILE_IDENTIFIER_KEY: &str = "MINKNOW:file_identifier";
pub const SOFTWARE_KEY: &str = "MINKNOW:software";
pub const POD5_VERSION_KEY: &str = "MINKNOW:pod5_version";

/// The format version written into new files.
pub const WRITTEN_POD5_VERSION: Version = Version::new(0, 3, 2);

/// A pod5 format version: three dotted `u16` components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub revision: u16,
}

impl Version {
    pub const fn new(major: u16, minor: u16, revision: u16) -> Self {
        Self {
            major,
            minor,
            revision,
        }
    }

    /// Parse `"a.b.c"`. Fails on a component count other than three or on
    /// non-numeric components, including trailing characters.
    pub fn parse(s: &str) -> Result<Self> {
        let components: Vec<&str> = s.split('.').collect();
        if components.len() != 3 {
            return Err(Pod5Error::consistency(format!(
                "Invalid version '{s}': expected three components"
            )));
        }
        let mut parsed = [0u16; 3];
        for (slot, component) in parsed.iter_mut().zip(&components) {
            *slot = component.parse::<u16>().map_err(|_| {
                Pod5Error::consistency(format!(
                    "Invalid version '{s}': component '{component}' is not a number"
                ))
            })?;
        }
        Ok(Self::new(parsed[0], parsed[1], parsed[2]))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

/// Schema-level metadata shared by all tables of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMetadata {
    pub file_identifier: Uuid,
    pub writing_software: String,
    pub writing_pod5_version: Version,
}

impl SchemaMetadata {
    pub fn new(file_identifier: Uuid, writing_software: impl Into<String>) -> Self {
        Self {
            file_identifier,
            writing_software: writing_software.into(),
            writing_pod5_version: WRITTEN_POD5_VERSION,
        }
    }

    /// Build the Arrow key-value metadata for a sub-file schema.
    pub fn to_metadata(&self) -> Result<Metadata> {
        if self.writing_software.is_empty() {
            return Err(Pod5Error::invalid_argument(
                "Expected writing software to be specified for metadata",
            ));
        }
        if self.writing_pod5_version == Version::default() {
            return Err(Pod5Error::invalid_argument(
                "Expected writing pod5 version to be specified for metadata",
            ));
        }
        if self.file_identifier.is_nil() {
            return Err(Pod5Error::invalid_argument(
                "Expected file identifier to be specified for metadata",
            ));
        }

        let mut metadata = Metadata::new();
        metadata.insert(
            FILE_IDENTIFIER_KEY.to_string(),
            self.file_identifier.to_string(),
        );
        metadata.insert(SOFTWARE_KEY.to_string(), self.writing_software.clone());
        metadata.insert(
            POD5_VERSION_KEY.to_string(),
            self.writing_pod5_version.to_string(),
        );
        Ok(metadata)
    }

    pub fn from_metadata(metadata: &Metadata) -> Result<Self> {
        let get = |key: &str| {
            metadata
                .get(key)
                .ok_or_else(|| Pod5Error::consistency(format!("Missing metadata key '{key}'")))
        };
        let identifier_str = get(FILE_IDENTIFIER_KEY)?;
        let file_identifier = Uuid::parse_str(identifier_str).map_err(|_| {
            Pod5Error::consistency(format!(
                "Schema file_identifier metadata not uuid form: '{identifier_str}'"
            ))
        })?;
        let writing_software = get(SOFTWARE_KEY)?.clone();
        let writing_pod5_version = Version::parse(get(POD5_VERSION_KEY)?)?;
        Ok(Self {
            file_identifier,
            writing_software,
            writing_pod5_version,
        })
    }
}

/// Monotonically increasing version of one table's schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableSpecVersion(u8);

impl TableSpecVersion {
    pub const fn first() -> Self {
        Self(0)
    }

    pub const fn at(version: u8) -> Self {
        Self(version)
    }

    pub fn as_int(self) -> u8 {
        self.0
    }
}

/// One field of a table description.
pub(crate) struct FieldSpec {
    pub name: &'static str,
    pub data_type: DataType,
    pub added: TableSpecVersion,
    pub removed: Option<TableSpecVersion>,
}

impl FieldSpec {
    pub(crate) fn new(name: &'static str, data_type: DataType, added: TableSpecVersion) -> Self {
        Self {
            name,
            data_type,
            added,
            removed: None,
        }
    }

    pub(crate) fn removed_at(mut self, removed: TableSpecVersion) -> Self {
        self.removed = Some(removed);
        self
    }

    pub(crate) fn active_at(&self, version: TableSpecVersion) -> bool {
        self.added <= version && self.removed.map_or(true, |removed| version < removed)
    }
}

/// Emit the schema written by the current code: all fields that have not
/// been removed, in declaration order.
pub(crate) fn writer_schema(
    fields: &[FieldSpec],
    latest: TableSpecVersion,
    metadata: Metadata,
) -> Schema {
    let fields: Vec<Field> = fields
        .iter()
        .filter(|f| f.active_at(latest))
        .map(|f| Field::new(f.name, f.data_type.clone(), false))
        .collect();
    Schema::from(fields).with_metadata(metadata)
}

pub(crate) fn find_field_untyped(schema: &Schema, name: &str) -> Result<usize> {
    schema
        .fields
        .iter()
        .position(|f| f.name == name)
        .ok_or_else(|| Pod5Error::schema_type(format!("Schema missing field '{name}'")))
}

pub(crate) fn find_field(schema: &Schema, name: &str, expected: &DataType) -> Result<usize> {
    let field_idx = find_field_untyped(schema, name)?;
    let actual = &schema.fields[field_idx].data_type;
    if !datatype_equivalent(actual, expected) {
        return Err(Pod5Error::schema_type(format!(
            "Schema field '{name}' is incorrect type: '{actual:?}'"
        )));
    }
    Ok(field_idx)
}

/// Datatype equivalence for schema resolution. Extension types compare by
/// name only; nested types recurse through their children while ignoring
/// child field names and nullability.
pub(crate) fn datatype_equivalent(actual: &DataType, expected: &DataType) -> bool {
    match (actual, expected) {
        (DataType::Extension(a, _, _), DataType::Extension(b, _, _)) => a == b,
        (DataType::List(a), DataType::List(b)) | (DataType::LargeList(a), DataType::LargeList(b)) => {
            datatype_equivalent(&a.data_type, &b.data_type)
        }
        (DataType::Dictionary(ai, av, _), DataType::Dictionary(bi, bv, _)) => {
            ai == bi && datatype_equivalent(av, bv)
        }
        (DataType::Struct(a), DataType::Struct(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b.iter())
                    .all(|(x, y)| x.name == y.name && datatype_equivalent(&x.data_type, &y.data_type))
        }
        (DataType::Map(a, _), DataType::Map(b, _)) => {
            datatype_equivalent(&a.data_type, &b.data_type)
        }
        (DataType::Timestamp(au, _), DataType::Timestamp(bu, _)) => au == bu,
        (a, b) => a == b,
    }
}

/// Value shape of a resolved dictionary field.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DictValueKind {
    Utf8,
    Struct(Vec<Field>),
}

/// Resolve a dictionary field: the index type must be int16, the value type
/// either utf8 or a struct.
pub(crate) fn find_dict_field(schema: &Schema, name: &str) -> Result<(usize, DictValueKind)> {
    let field_idx = find_field_untyped(schema, name)?;
    let datatype = &schema.fields[field_idx].data_type;
    let DataType::Dictionary(index_type, value_type, _) = datatype else {
        return Err(Pod5Error::schema_type(format!(
            "Dictionary field '{name}' was unexpected type: {datatype:?}"
        )));
    };
    if *index_type != IntegerType::Int16 {
        return Err(Pod5Error::schema_type(format!(
            "Schema field '{name}' has incorrect dictionary index type: {index_type:?}"
        )));
    }
    let kind = match value_type.as_ref() {
        DataType::Utf8 => DictValueKind::Utf8,
        DataType::Struct(fields) => DictValueKind::Struct(fields.clone()),
        other => {
            return Err(Pod5Error::schema_type(format!(
                "Dictionary value of '{name}' was unexpected type: {other:?}"
            )))
        }
    };
    Ok((field_idx, kind))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_version_parse() {
        assert_eq!(Version::parse("0.3.2").unwrap(), Version::new(0, 3, 2));
        assert_eq!(
            Version::parse("10.0.40").unwrap(),
            Version::new(10, 0, 40)
        );
        assert!(Version::parse("0.3").is_err());
        assert!(Version::parse("0.3.2.1").is_err());
        assert!(Version::parse("0.x.2").is_err());
        assert!(Version::parse("0.3.2b").is_err());
    }

    #[test]
    fn test_version_ordering() {
        assert!(Version::new(0, 0, 32) < Version::new(0, 3, 2));
        assert!(Version::new(0, 0, 24) < Version::new(0, 0, 25));
    }

    #[test]
    fn test_metadata_roundtrip() -> eyre::Result<()> {
        let metadata = SchemaMetadata {
            file_identifier: Uuid::new_v4(),
            writing_software: "pod5-format tests".to_string(),
            writing_pod5_version: Version::new(0, 3, 2),
        };
        let encoded = metadata.to_metadata()?;
        assert_eq!(SchemaMetadata::from_metadata(&encoded)?, metadata);
        Ok(())
    }

    #[test]
    fn test_metadata_rejects_nil_identifier() {
        let metadata = SchemaMetadata {
            file_identifier: Uuid::nil(),
            writing_software: "x".to_string(),
            writing_pod5_version: Version::new(0, 3, 2),
        };
        assert!(metadata.to_metadata().is_err());
    }

    #[test]
    fn test_field_spec_activity() {
        let spec = FieldSpec::new("pore", DataType::Int16, TableSpecVersion::first())
            .removed_at(TableSpecVersion::at(3));
        assert!(spec.active_at(TableSpecVersion::at(0)));
        assert!(spec.active_at(TableSpecVersion::at(2)));
        assert!(!spec.active_at(TableSpecVersion::at(3)));
    }
}
