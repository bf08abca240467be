//! Versioned description of the read table.
//!
//! The first spec version stored pore, calibration, end-reason and run-info
//! as struct-valued dictionaries. Version 1 added the MinKNOW event and
//! scaling metrics, version 2 the derived `num_samples`, and version 3
//! replaced the struct dictionaries with plain columns, utf8 dictionaries
//! and the separate run-info table. Writers emit version 3; readers resolve
//! whichever variant the file's pod5 version implies.

use arrow2::datatypes::{DataType, Field, IntegerType, Metadata, Schema};

use crate::dictionary::map_type;
use crate::error::Result;
use crate::schema::{
    self, DictValueKind, FieldSpec, TableSpecVersion, Version,
};
use crate::types::uuid_type;

const V0: TableSpecVersion = TableSpecVersion::first();
const V1: TableSpecVersion = TableSpecVersion::at(1);
const V2: TableSpecVersion = TableSpecVersion::at(2);
const V3: TableSpecVersion = TableSpecVersion::at(3);

pub(crate) const LATEST: TableSpecVersion = V3;

/// Read-table spec version expected for a file written at `file_version`.
pub fn read_table_version_for_file(file_version: Version) -> TableSpecVersion {
    if file_version >= Version::new(0, 0, 32) {
        V3
    } else if file_version >= Version::new(0, 0, 25) {
        V2
    } else if file_version >= Version::new(0, 0, 24) {
        V1
    } else {
        V0
    }
}

fn dict(value: DataType) -> DataType {
    DataType::Dictionary(IntegerType::Int16, Box::new(value), false)
}

fn signal_index_type() -> DataType {
    DataType::List(Box::new(Field::new("item", DataType::UInt64, true)))
}

fn timestamp_type() -> DataType {
    DataType::Timestamp(arrow2::datatypes::TimeUnit::Millisecond, Some("UTC".to_string()))
}

pub(crate) fn pore_struct_fields() -> Vec<Field> {
    vec![
        Field::new("channel", DataType::UInt16, false),
        Field::new("well", DataType::UInt8, false),
        Field::new("pore_type", DataType::Utf8, false),
    ]
}

pub(crate) fn calibration_struct_fields() -> Vec<Field> {
    vec![
        Field::new("offset", DataType::Float32, false),
        Field::new("scale", DataType::Float32, false),
    ]
}

pub(crate) fn end_reason_struct_fields() -> Vec<Field> {
    vec![
        Field::new("name", DataType::Utf8, false),
        Field::new("forced", DataType::Boolean, false),
    ]
}

pub(crate) fn run_info_struct_fields() -> Vec<Field> {
    vec![
        Field::new("acquisition_id", DataType::Utf8, false),
        Field::new("acquisition_start_time", timestamp_type(), false),
        Field::new("adc_max", DataType::Int16, false),
        Field::new("adc_min", DataType::Int16, false),
        Field::new("context_tags", map_type(), false),
        Field::new("experiment_name", DataType::Utf8, false),
        Field::new("flow_cell_id", DataType::Utf8, false),
        Field::new("flow_cell_product_code", DataType::Utf8, false),
        Field::new("protocol_name", DataType::Utf8, false),
        Field::new("protocol_run_id", DataType::Utf8, false),
        Field::new("protocol_start_time", timestamp_type(), false),
        Field::new("sample_id", DataType::Utf8, false),
        Field::new("sample_rate", DataType::UInt16, false),
        Field::new("sequencing_kit", DataType::Utf8, false),
        Field::new("sequencer_position", DataType::Utf8, false),
        Field::new("sequencer_position_type", DataType::Utf8, false),
        Field::new("software", DataType::Utf8, false),
        Field::new("system_name", DataType::Utf8, false),
        Field::new("system_type", DataType::Utf8, false),
        Field::new("tracking_id", map_type(), false),
    ]
}

fn field_specs() -> Vec<FieldSpec> {
    vec![
        // V0 fields
        FieldSpec::new("read_id", uuid_type(), V0),
        FieldSpec::new("signal", signal_index_type(), V0),
        FieldSpec::new("pore", dict(DataType::Struct(pore_struct_fields())), V0).removed_at(V3),
        FieldSpec::new(
            "calibration",
            dict(DataType::Struct(calibration_struct_fields())),
            V0,
        )
        .removed_at(V3),
        FieldSpec::new("read_number", DataType::UInt32, V0),
        FieldSpec::new("start", DataType::UInt64, V0),
        FieldSpec::new("median_before", DataType::Float32, V0),
        FieldSpec::new(
            "end_reason",
            dict(DataType::Struct(end_reason_struct_fields())),
            V0,
        )
        .removed_at(V3),
        FieldSpec::new(
            "run_info",
            dict(DataType::Struct(run_info_struct_fields())),
            V0,
        )
        .removed_at(V3),
        // V1 fields
        FieldSpec::new("num_minknow_events", DataType::UInt64, V1),
        FieldSpec::new("tracked_scaling_scale", DataType::Float32, V1),
        FieldSpec::new("tracked_scaling_shift", DataType::Float32, V1),
        FieldSpec::new("predicted_scaling_scale", DataType::Float32, V1),
        FieldSpec::new("predicted_scaling_shift", DataType::Float32, V1),
        FieldSpec::new("num_reads_since_mux_change", DataType::UInt32, V1),
        FieldSpec::new("time_since_mux_change", DataType::Float32, V1),
        // V2 fields
        FieldSpec::new("num_samples", DataType::UInt64, V2),
        // V3 fields
        FieldSpec::new("channel", DataType::UInt16, V3),
        FieldSpec::new("well", DataType::UInt8, V3),
        FieldSpec::new("pore_type", dict(DataType::Utf8), V3),
        FieldSpec::new("calibration_offset", DataType::Float32, V3),
        FieldSpec::new("calibration_scale", DataType::Float32, V3),
        FieldSpec::new("end_reason", dict(DataType::Utf8), V3),
        FieldSpec::new("end_reason_forced", DataType::Boolean, V3),
        FieldSpec::new("run_info", dict(DataType::Utf8), V3),
    ]
}

pub(crate) fn writer_schema(metadata: Metadata) -> Schema {
    schema::writer_schema(&field_specs(), LATEST, metadata)
}

/// Which dictionary shape the resolved file uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadTableVariant {
    /// Struct-valued pore/calibration/end-reason/run-info dictionaries.
    LegacyStructDicts,
    /// Plain columns plus utf8 dictionaries referencing the run-info table.
    Flat,
}

/// Resolved column indices of one read table.
#[derive(Debug, Clone)]
pub(crate) struct ReadTableSchema {
    pub version: TableSpecVersion,
    pub variant: ReadTableVariant,
    pub read_id: usize,
    pub signal: usize,
    pub read_number: usize,
    pub start: usize,
    pub median_before: usize,
    pub num_minknow_events: Option<usize>,
    pub tracked_scaling_scale: Option<usize>,
    pub tracked_scaling_shift: Option<usize>,
    pub predicted_scaling_scale: Option<usize>,
    pub predicted_scaling_shift: Option<usize>,
    pub num_reads_since_mux_change: Option<usize>,
    pub time_since_mux_change: Option<usize>,
    pub num_samples: Option<usize>,
    // Flat variant columns
    pub channel: Option<usize>,
    pub well: Option<usize>,
    pub pore_type: Option<usize>,
    pub calibration_offset: Option<usize>,
    pub calibration_scale: Option<usize>,
    pub end_reason_forced: Option<usize>,
    // Present in both variants, with variant-dependent value types
    pub end_reason: usize,
    pub run_info: usize,
    // Legacy variant columns
    pub pore: Option<usize>,
    pub calibration: Option<usize>,
}

pub(crate) fn resolve_schema(
    arrow_schema: &Schema,
    file_version: Version,
) -> Result<ReadTableSchema> {
    let version = read_table_version_for_file(file_version);
    let variant = if version >= V3 {
        ReadTableVariant::Flat
    } else {
        ReadTableVariant::LegacyStructDicts
    };

    let find = |name: &'static str, data_type: DataType| -> Result<usize> {
        schema::find_field(arrow_schema, name, &data_type)
    };
    let find_at = |name: &'static str,
                   data_type: DataType,
                   added: TableSpecVersion|
     -> Result<Option<usize>> {
        if version >= added {
            Ok(Some(schema::find_field(arrow_schema, name, &data_type)?))
        } else {
            Ok(None)
        }
    };
    let find_dict = |name: &'static str, expected: DictValueKind| -> Result<usize> {
        let (index, kind) = schema::find_dict_field(arrow_schema, name)?;
        match (&kind, &expected) {
            (DictValueKind::Utf8, DictValueKind::Utf8) => Ok(index),
            (DictValueKind::Struct(_), DictValueKind::Struct(_)) => Ok(index),
            _ => Err(crate::error::Pod5Error::schema_type(format!(
                "Dictionary field '{name}' has the wrong value shape for table version {}",
                version.as_int()
            ))),
        }
    };

    let flat = variant == ReadTableVariant::Flat;
    let struct_kind = DictValueKind::Struct(Vec::new());

    Ok(ReadTableSchema {
        version,
        variant,
        read_id: find("read_id", uuid_type())?,
        signal: find("signal", signal_index_type())?,
        read_number: find("read_number", DataType::UInt32)?,
        start: find("start", DataType::UInt64)?,
        median_before: find("median_before", DataType::Float32)?,
        num_minknow_events: find_at("num_minknow_events", DataType::UInt64, V1)?,
        tracked_scaling_scale: find_at("tracked_scaling_scale", DataType::Float32, V1)?,
        tracked_scaling_shift: find_at("tracked_scaling_shift", DataType::Float32, V1)?,
        predicted_scaling_scale: find_at("predicted_scaling_scale", DataType::Float32, V1)?,
        predicted_scaling_shift: find_at("predicted_scaling_shift", DataType::Float32, V1)?,
        num_reads_since_mux_change: find_at("num_reads_since_mux_change", DataType::UInt32, V1)?,
        time_since_mux_change: find_at("time_since_mux_change", DataType::Float32, V1)?,
        num_samples: find_at("num_samples", DataType::UInt64, V2)?,
        channel: find_at("channel", DataType::UInt16, V3)?,
        well: find_at("well", DataType::UInt8, V3)?,
        pore_type: if flat {
            Some(find_dict("pore_type", DictValueKind::Utf8)?)
        } else {
            None
        },
        calibration_offset: find_at("calibration_offset", DataType::Float32, V3)?,
        calibration_scale: find_at("calibration_scale", DataType::Float32, V3)?,
        end_reason_forced: find_at("end_reason_forced", DataType::Boolean, V3)?,
        end_reason: find_dict(
            "end_reason",
            if flat {
                DictValueKind::Utf8
            } else {
                struct_kind.clone()
            },
        )?,
        run_info: find_dict(
            "run_info",
            if flat {
                DictValueKind::Utf8
            } else {
                struct_kind.clone()
            },
        )?,
        pore: if flat {
            None
        } else {
            Some(find_dict("pore", struct_kind.clone())?)
        },
        calibration: if flat {
            None
        } else {
            Some(find_dict("calibration", struct_kind)?)
        },
    })
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_writer_schema_field_order() {
        let schema = writer_schema(Metadata::new());
        let names: Vec<&str> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "read_id",
                "signal",
                "read_number",
                "start",
                "median_before",
                "num_minknow_events",
                "tracked_scaling_scale",
                "tracked_scaling_shift",
                "predicted_scaling_scale",
                "predicted_scaling_shift",
                "num_reads_since_mux_change",
                "time_since_mux_change",
                "num_samples",
                "channel",
                "well",
                "pore_type",
                "calibration_offset",
                "calibration_scale",
                "end_reason",
                "end_reason_forced",
                "run_info",
            ]
        );
    }

    #[test]
    fn test_version_mapping() {
        assert_eq!(read_table_version_for_file(Version::new(0, 0, 20)), V0);
        assert_eq!(read_table_version_for_file(Version::new(0, 0, 24)), V1);
        assert_eq!(read_table_version_for_file(Version::new(0, 0, 25)), V2);
        assert_eq!(read_table_version_for_file(Version::new(0, 0, 32)), V3);
        assert_eq!(read_table_version_for_file(Version::new(0, 3, 2)), V3);
    }

    #[test]
    fn test_resolves_own_writer_schema() -> eyre::Result<()> {
        let schema = writer_schema(Metadata::new());
        let resolved = resolve_schema(&schema, Version::new(0, 3, 2))?;
        assert_eq!(resolved.variant, ReadTableVariant::Flat);
        assert_eq!(resolved.read_id, 0);
        assert_eq!(resolved.signal, 1);
        assert_eq!(resolved.pore_type, Some(15));
        assert_eq!(resolved.end_reason, 18);
        assert_eq!(resolved.run_info, 20);
        assert!(resolved.pore.is_none());
        Ok(())
    }

    #[test]
    fn test_missing_field_fails_resolution() {
        let mut schema = writer_schema(Metadata::new());
        schema.fields.retain(|f| f.name != "num_samples");
        assert!(resolve_schema(&schema, Version::new(0, 3, 2)).is_err());
    }
}
