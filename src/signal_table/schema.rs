use arrow2::datatypes::{DataType, Field, Metadata, Schema};

use crate::error::{Pod5Error, Result};
use crate::schema::{datatype_equivalent, find_field, find_field_untyped};
use crate::types::{is_vbz_signal_type, uuid_type, vbz_signal_type};

/// How the signal column stores its chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalType {
    /// VBZ compressed large-binary cells.
    #[default]
    VbzSignal,
    /// Plain `large_list<i16>` values.
    UncompressedSignal,
}

pub(crate) fn uncompressed_signal_type() -> DataType {
    DataType::LargeList(Box::new(Field::new("item", DataType::Int16, true)))
}

/// Resolved column indices plus the signal variant of one signal table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SignalTableSchema {
    pub signal_type: SignalType,
    pub read_id: usize,
    pub signal: usize,
    pub samples: usize,
}

pub(crate) fn make_writer_schema(
    signal_type: SignalType,
    metadata: Metadata,
) -> (Schema, SignalTableSchema) {
    let signal_schema_type = match signal_type {
        SignalType::UncompressedSignal => uncompressed_signal_type(),
        SignalType::VbzSignal => vbz_signal_type(),
    };
    let schema = Schema::from(vec![
        Field::new("read_id", uuid_type(), false),
        Field::new("signal", signal_schema_type, false),
        Field::new("samples", DataType::UInt32, false),
    ])
    .with_metadata(metadata);
    let field_locations = SignalTableSchema {
        signal_type,
        read_id: 0,
        signal: 1,
        samples: 2,
    };
    (schema, field_locations)
}

pub(crate) fn resolve_schema(schema: &Schema) -> Result<SignalTableSchema> {
    let read_id = find_field(schema, "read_id", &uuid_type())?;
    let samples = find_field(schema, "samples", &DataType::UInt32)?;

    let signal = find_field_untyped(schema, "signal")?;
    let signal_arrow_type = &schema.fields[signal].data_type;
    let signal_type = if datatype_equivalent(signal_arrow_type, &uncompressed_signal_type()) {
        SignalType::UncompressedSignal
    } else if is_vbz_signal_type(signal_arrow_type) {
        SignalType::VbzSignal
    } else {
        return Err(Pod5Error::schema_type(format!(
            "Schema field 'signal' is incorrect type: '{signal_arrow_type:?}'"
        )));
    };

    Ok(SignalTableSchema {
        signal_type,
        read_id,
        signal,
        samples,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_writer_schema_resolves_back() -> eyre::Result<()> {
        for signal_type in [SignalType::VbzSignal, SignalType::UncompressedSignal] {
            let (schema, locations) = make_writer_schema(signal_type, Metadata::new());
            let resolved = resolve_schema(&schema)?;
            assert_eq!(resolved.signal_type, signal_type);
            assert_eq!(resolved.read_id, locations.read_id);
            assert_eq!(resolved.signal, locations.signal);
            assert_eq!(resolved.samples, locations.samples);
        }
        Ok(())
    }

    #[test]
    fn test_missing_field_is_a_type_error() {
        let (mut schema, _) = make_writer_schema(SignalType::VbzSignal, Metadata::new());
        schema.fields.remove(2);
        assert!(resolve_schema(&schema).is_err());
    }
}
