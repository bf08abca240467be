use std::sync::Arc;

use arrow2::array::{
    Array, BooleanArray, DictionaryArray, FixedSizeBinaryArray, ListArray, MapArray,
    PrimitiveArray, StructArray, Utf8Array,
};
use arrow2::chunk::Chunk;
use uuid::Uuid;

use super::schema::{resolve_schema, ReadTableSchema, ReadTableVariant};
use crate::error::{Pod5Error, Result};
use crate::records::{
    CalibrationData, EndReason, EndReasonData, PoreData, RunInfoData, SignalTableRowIndex,
};
use crate::run_info_table::map_array_value;
use crate::schema::SchemaMetadata;
use crate::table_reader::TableReader;

/// How a read row refers to its run info.
#[derive(Debug, Clone, PartialEq)]
pub enum RunInfoReference {
    /// Acquisition id into the file's run-info table.
    AcquisitionId(String),
    /// Full run info, inlined by legacy struct-dictionary files.
    Data(Box<RunInfoData>),
}

impl RunInfoReference {
    pub fn acquisition_id(&self) -> &str {
        match self {
            RunInfoReference::AcquisitionId(id) => id,
            RunInfoReference::Data(data) => &data.acquisition_id,
        }
    }
}

/// One fully materialized read-table row.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRecord {
    pub read_id: Uuid,
    pub signal_rows: Vec<SignalTableRowIndex>,
    pub read_number: u32,
    pub start_sample: u64,
    pub median_before: f32,
    pub num_minknow_events: Option<u64>,
    pub tracked_scaling_scale: Option<f32>,
    pub tracked_scaling_shift: Option<f32>,
    pub predicted_scaling_scale: Option<f32>,
    pub predicted_scaling_shift: Option<f32>,
    pub num_reads_since_mux_change: Option<u32>,
    pub time_since_mux_change: Option<f32>,
    pub num_samples: Option<u64>,
    pub pore: PoreData,
    pub calibration: CalibrationData,
    pub end_reason: EndReasonData,
    pub run_info: RunInfoReference,
}

/// One record batch of the read table with typed column access.
pub(crate) struct ReadTableRecordBatch {
    chunk: Arc<Chunk<Box<dyn Array>>>,
    schema: Arc<ReadTableSchema>,
}

impl ReadTableRecordBatch {
    pub(crate) fn num_rows(&self) -> usize {
        self.chunk.len()
    }

    fn column(&self, index: usize) -> &dyn Array {
        self.chunk.arrays()[index].as_ref()
    }

    fn primitive<T: arrow2::types::NativeType>(&self, index: usize) -> Result<&PrimitiveArray<T>> {
        self.column(index)
            .as_any()
            .downcast_ref::<PrimitiveArray<T>>()
            .ok_or_else(|| {
                Pod5Error::schema_type(format!("Read table column {index} has unexpected type"))
            })
    }

    fn optional_primitive<T: arrow2::types::NativeType>(
        &self,
        index: Option<usize>,
        row: usize,
    ) -> Result<Option<T>> {
        index
            .map(|index| Ok(self.primitive::<T>(index)?.value(row)))
            .transpose()
    }

    fn dictionary(&self, index: usize) -> Result<&DictionaryArray<i16>> {
        self.column(index)
            .as_any()
            .downcast_ref::<DictionaryArray<i16>>()
            .ok_or_else(|| {
                Pod5Error::schema_type(format!(
                    "Read table column {index} is not an i16 dictionary"
                ))
            })
    }

    fn dictionary_value_index(&self, column: usize, row: usize) -> Result<(usize, &Box<dyn Array>)> {
        let dictionary = self.dictionary(column)?;
        let key = dictionary.keys().value(row);
        let value_index = usize::try_from(key).map_err(|_| {
            Pod5Error::consistency(format!("Negative dictionary index {key} in read row {row}"))
        })?;
        let values = dictionary.values();
        if value_index >= values.len() {
            return Err(Pod5Error::consistency(format!(
                "Dictionary index {key} is outside the value array of {} entries",
                values.len()
            )));
        }
        Ok((value_index, values))
    }

    fn dictionary_utf8(&self, column: usize, row: usize) -> Result<&str> {
        let (value_index, values) = self.dictionary_value_index(column, row)?;
        let values = values
            .as_any()
            .downcast_ref::<Utf8Array<i32>>()
            .ok_or_else(|| Pod5Error::schema_type("Dictionary values are not utf8"))?;
        Ok(values.value(value_index))
    }

    fn dictionary_struct(&self, column: usize, row: usize) -> Result<(usize, &StructArray)> {
        let (value_index, values) = self.dictionary_value_index(column, row)?;
        let values = values
            .as_any()
            .downcast_ref::<StructArray>()
            .ok_or_else(|| Pod5Error::schema_type("Dictionary values are not a struct"))?;
        Ok((value_index, values))
    }

    pub(crate) fn read_id_column(&self) -> Result<&FixedSizeBinaryArray> {
        self.column(self.schema.read_id)
            .as_any()
            .downcast_ref::<FixedSizeBinaryArray>()
            .ok_or_else(|| Pod5Error::schema_type("Read table read_id column is not a uuid"))
    }

    pub(crate) fn read_id(&self, row: usize) -> Result<Uuid> {
        Uuid::from_slice(self.read_id_column()?.value(row))
            .map_err(|_| Pod5Error::consistency("Read table read_id is not 16 bytes"))
    }

    /// Signal rows referenced by a read, in sample order.
    pub(crate) fn signal_rows(&self, row: usize) -> Result<Vec<SignalTableRowIndex>> {
        let list = self
            .column(self.schema.signal)
            .as_any()
            .downcast_ref::<ListArray<i32>>()
            .ok_or_else(|| Pod5Error::schema_type("Read table signal column is not a list"))?;
        let (start, end) = list.offsets().start_end(row);
        let values = list
            .values()
            .as_any()
            .downcast_ref::<PrimitiveArray<u64>>()
            .ok_or_else(|| Pod5Error::schema_type("Signal index values are not u64"))?;
        Ok(values.values()[start..end].to_vec())
    }

    pub(crate) fn pore_data(&self, row: usize) -> Result<PoreData> {
        match self.schema.variant {
            ReadTableVariant::Flat => {
                let channel = self
                    .optional_primitive::<u16>(self.schema.channel, row)?
                    .unwrap_or_default();
                let well = self
                    .optional_primitive::<u8>(self.schema.well, row)?
                    .unwrap_or_default();
                let pore_type = self
                    .dictionary_utf8(self.schema.pore_type.expect("flat schema"), row)?
                    .to_string();
                Ok(PoreData {
                    channel,
                    well,
                    pore_type,
                })
            }
            ReadTableVariant::LegacyStructDicts => {
                let (index, values) =
                    self.dictionary_struct(self.schema.pore.expect("legacy schema"), row)?;
                Ok(PoreData {
                    channel: struct_primitive::<u16>(values, "channel")?.value(index),
                    well: struct_primitive::<u8>(values, "well")?.value(index),
                    pore_type: struct_utf8(values, "pore_type")?.value(index).to_string(),
                })
            }
        }
    }

    pub(crate) fn calibration(&self, row: usize) -> Result<CalibrationData> {
        match self.schema.variant {
            ReadTableVariant::Flat => Ok(CalibrationData {
                offset: self
                    .optional_primitive::<f32>(self.schema.calibration_offset, row)?
                    .unwrap_or_default(),
                scale: self
                    .optional_primitive::<f32>(self.schema.calibration_scale, row)?
                    .unwrap_or_default(),
            }),
            ReadTableVariant::LegacyStructDicts => {
                let (index, values) =
                    self.dictionary_struct(self.schema.calibration.expect("legacy schema"), row)?;
                Ok(CalibrationData {
                    offset: struct_primitive::<f32>(values, "offset")?.value(index),
                    scale: struct_primitive::<f32>(values, "scale")?.value(index),
                })
            }
        }
    }

    pub(crate) fn end_reason_data(&self, row: usize) -> Result<EndReasonData> {
        match self.schema.variant {
            ReadTableVariant::Flat => {
                let name = self.dictionary_utf8(self.schema.end_reason, row)?;
                let forced = self
                    .schema
                    .end_reason_forced
                    .map(|index| -> Result<bool> {
                        let column = self
                            .column(index)
                            .as_any()
                            .downcast_ref::<BooleanArray>()
                            .ok_or_else(|| {
                                Pod5Error::schema_type("end_reason_forced column is not boolean")
                            })?;
                        Ok(column.value(row))
                    })
                    .transpose()?
                    .unwrap_or_default();
                Ok(EndReasonData {
                    end_reason: EndReason::parse(name).unwrap_or_default(),
                    forced,
                })
            }
            ReadTableVariant::LegacyStructDicts => {
                let (index, values) = self.dictionary_struct(self.schema.end_reason, row)?;
                let name = struct_utf8(values, "name")?.value(index);
                let forced = struct_column(values, "forced")?
                    .as_any()
                    .downcast_ref::<BooleanArray>()
                    .ok_or_else(|| Pod5Error::schema_type("End reason forced is not boolean"))?
                    .value(index);
                Ok(EndReasonData {
                    end_reason: EndReason::parse(name).unwrap_or_default(),
                    forced,
                })
            }
        }
    }

    pub(crate) fn run_info_reference(&self, row: usize) -> Result<RunInfoReference> {
        match self.schema.variant {
            ReadTableVariant::Flat => Ok(RunInfoReference::AcquisitionId(
                self.dictionary_utf8(self.schema.run_info, row)?.to_string(),
            )),
            ReadTableVariant::LegacyStructDicts => {
                let (index, values) = self.dictionary_struct(self.schema.run_info, row)?;
                Ok(RunInfoReference::Data(Box::new(extract_run_info_struct(
                    values, index,
                )?)))
            }
        }
    }

    pub(crate) fn read_record(&self, row: usize) -> Result<ReadRecord> {
        if row >= self.num_rows() {
            return Err(Pod5Error::invalid_argument(format!(
                "Queried read row {row} is outside the available rows ({} in batch)",
                self.num_rows()
            )));
        }
        Ok(ReadRecord {
            read_id: self.read_id(row)?,
            signal_rows: self.signal_rows(row)?,
            read_number: self.primitive::<u32>(self.schema.read_number)?.value(row),
            start_sample: self.primitive::<u64>(self.schema.start)?.value(row),
            median_before: self.primitive::<f32>(self.schema.median_before)?.value(row),
            num_minknow_events: self
                .optional_primitive::<u64>(self.schema.num_minknow_events, row)?,
            tracked_scaling_scale: self
                .optional_primitive::<f32>(self.schema.tracked_scaling_scale, row)?,
            tracked_scaling_shift: self
                .optional_primitive::<f32>(self.schema.tracked_scaling_shift, row)?,
            predicted_scaling_scale: self
                .optional_primitive::<f32>(self.schema.predicted_scaling_scale, row)?,
            predicted_scaling_shift: self
                .optional_primitive::<f32>(self.schema.predicted_scaling_shift, row)?,
            num_reads_since_mux_change: self
                .optional_primitive::<u32>(self.schema.num_reads_since_mux_change, row)?,
            time_since_mux_change: self
                .optional_primitive::<f32>(self.schema.time_since_mux_change, row)?,
            num_samples: self.optional_primitive::<u64>(self.schema.num_samples, row)?,
            pore: self.pore_data(row)?,
            calibration: self.calibration(row)?,
            end_reason: self.end_reason_data(row)?,
            run_info: self.run_info_reference(row)?,
        })
    }
}

fn struct_column<'a>(values: &'a StructArray, name: &str) -> Result<&'a dyn Array> {
    let index = values
        .fields()
        .iter()
        .position(|f| f.name == name)
        .ok_or_else(|| Pod5Error::schema_type(format!("Missing {name} field in struct")))?;
    Ok(values.values()[index].as_ref())
}

fn struct_primitive<'a, T: arrow2::types::NativeType>(
    values: &'a StructArray,
    name: &str,
) -> Result<&'a PrimitiveArray<T>> {
    struct_column(values, name)?
        .as_any()
        .downcast_ref::<PrimitiveArray<T>>()
        .ok_or_else(|| Pod5Error::schema_type(format!("Struct field {name} has unexpected type")))
}

fn struct_utf8<'a>(values: &'a StructArray, name: &str) -> Result<&'a Utf8Array<i32>> {
    struct_column(values, name)?
        .as_any()
        .downcast_ref::<Utf8Array<i32>>()
        .ok_or_else(|| Pod5Error::schema_type(format!("Struct field {name} is not utf8")))
}

fn struct_map(values: &StructArray, name: &str, index: usize) -> Result<crate::records::RunInfoMap> {
    let map = struct_column(values, name)?
        .as_any()
        .downcast_ref::<MapArray>()
        .ok_or_else(|| Pod5Error::schema_type(format!("Struct field {name} is not a map")))?;
    map_array_value(map, index)
}

fn extract_run_info_struct(values: &StructArray, index: usize) -> Result<RunInfoData> {
    Ok(RunInfoData {
        acquisition_id: struct_utf8(values, "acquisition_id")?.value(index).to_string(),
        acquisition_start_time_ms: struct_primitive::<i64>(values, "acquisition_start_time")?
            .value(index),
        adc_max: struct_primitive::<i16>(values, "adc_max")?.value(index),
        adc_min: struct_primitive::<i16>(values, "adc_min")?.value(index),
        context_tags: struct_map(values, "context_tags", index)?,
        experiment_name: struct_utf8(values, "experiment_name")?.value(index).to_string(),
        flow_cell_id: struct_utf8(values, "flow_cell_id")?.value(index).to_string(),
        flow_cell_product_code: struct_utf8(values, "flow_cell_product_code")?
            .value(index)
            .to_string(),
        protocol_name: struct_utf8(values, "protocol_name")?.value(index).to_string(),
        protocol_run_id: struct_utf8(values, "protocol_run_id")?.value(index).to_string(),
        protocol_start_time_ms: struct_primitive::<i64>(values, "protocol_start_time")?
            .value(index),
        sample_id: struct_utf8(values, "sample_id")?.value(index).to_string(),
        sample_rate: struct_primitive::<u16>(values, "sample_rate")?.value(index),
        sequencing_kit: struct_utf8(values, "sequencing_kit")?.value(index).to_string(),
        sequencer_position: struct_utf8(values, "sequencer_position")?
            .value(index)
            .to_string(),
        sequencer_position_type: struct_utf8(values, "sequencer_position_type")?
            .value(index)
            .to_string(),
        software: struct_utf8(values, "software")?.value(index).to_string(),
        system_name: struct_utf8(values, "system_name")?.value(index).to_string(),
        system_type: struct_utf8(values, "system_type")?.value(index).to_string(),
        tracking_id: struct_map(values, "tracking_id", index)?,
    })
}

/// Reader over the embedded read table.
pub(crate) struct ReadTableReader {
    table: TableReader,
    resolved: Arc<ReadTableSchema>,
}

impl ReadTableReader {
    pub(crate) fn new(table: TableReader) -> Result<Self> {
        let file_version = table.schema_metadata().writing_pod5_version;
        let resolved = Arc::new(resolve_schema(table.schema(), file_version)?);
        Ok(Self { table, resolved })
    }

    pub(crate) fn schema_metadata(&self) -> &SchemaMetadata {
        self.table.schema_metadata()
    }

    pub(crate) fn num_record_batches(&self) -> usize {
        self.table.num_record_batches()
    }

    pub(crate) fn read_record_batch(&mut self, index: usize) -> Result<ReadTableRecordBatch> {
        let chunk = self.table.read_record_batch(index)?;
        Ok(ReadTableRecordBatch {
            chunk,
            schema: Arc::clone(&self.resolved),
        })
    }
}

#[cfg(test)]
mod test {
    use arrow2::array::DictionaryArray;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::read_table::schema::{
        calibration_struct_fields, end_reason_struct_fields, pore_struct_fields,
    };
    use arrow2::datatypes::DataType;

    fn struct_dict(
        fields: Vec<arrow2::datatypes::Field>,
        children: Vec<Box<dyn Array>>,
        keys: Vec<i16>,
    ) -> Box<dyn Array> {
        let values = StructArray::new(DataType::Struct(fields), children, None);
        DictionaryArray::try_from_keys(PrimitiveArray::from_vec(keys), values.boxed())
            .unwrap()
            .boxed()
    }

    /// Build a miniature legacy (v0) batch and check the struct-dictionary
    /// decoding path.
    #[test]
    fn test_legacy_struct_dictionaries_decode() -> eyre::Result<()> {
        let pore = struct_dict(
            pore_struct_fields(),
            vec![
                PrimitiveArray::from_vec(vec![212u16]).boxed(),
                PrimitiveArray::from_vec(vec![3u8]).boxed(),
                Utf8Array::<i32>::from_slice(["r9.4.1"]).boxed(),
            ],
            vec![0, 0],
        );
        let calibration = struct_dict(
            calibration_struct_fields(),
            vec![
                PrimitiveArray::from_vec(vec![1.5f32]).boxed(),
                PrimitiveArray::from_vec(vec![0.25f32]).boxed(),
            ],
            vec![0, 0],
        );
        let end_reason = struct_dict(
            end_reason_struct_fields(),
            vec![
                Utf8Array::<i32>::from_slice(["signal_positive"]).boxed(),
                BooleanArray::from_slice([false]).boxed(),
            ],
            vec![0, 0],
        );

        let schema = Arc::new(ReadTableSchema {
            version: crate::schema::TableSpecVersion::first(),
            variant: ReadTableVariant::LegacyStructDicts,
            read_id: 0,
            signal: 1,
            read_number: 4,
            start: 5,
            median_before: 6,
            num_minknow_events: None,
            tracked_scaling_scale: None,
            tracked_scaling_shift: None,
            predicted_scaling_scale: None,
            predicted_scaling_shift: None,
            num_reads_since_mux_change: None,
            time_since_mux_change: None,
            num_samples: None,
            channel: None,
            well: None,
            pore_type: None,
            calibration_offset: None,
            calibration_scale: None,
            end_reason_forced: None,
            end_reason: 7,
            run_info: 8,
            pore: Some(2),
            calibration: Some(3),
        });

        let read_ids: Vec<u8> = (0..32).collect();
        let run_info = struct_dict(
            crate::read_table::schema::run_info_struct_fields(),
            run_info_children(),
            vec![0, 0],
        );
        let signal_offsets =
            arrow2::offset::OffsetsBuffer::try_from(vec![0i32, 2, 3]).unwrap();
        let chunk = Chunk::try_new(vec![
            FixedSizeBinaryArray::try_new(
                crate::types::uuid_type(),
                read_ids.into(),
                None,
            )?
            .boxed(),
            ListArray::<i32>::try_new(
                DataType::List(Box::new(arrow2::datatypes::Field::new(
                    "item",
                    DataType::UInt64,
                    true,
                ))),
                signal_offsets,
                PrimitiveArray::from_vec(vec![0u64, 1, 2]).boxed(),
                None,
            )?
            .boxed(),
            pore,
            calibration,
            PrimitiveArray::from_vec(vec![7u32, 8]).boxed(),
            PrimitiveArray::from_vec(vec![100u64, 200]).boxed(),
            PrimitiveArray::from_vec(vec![220.5f32, 221.5]).boxed(),
            end_reason,
            run_info,
        ])?;

        let batch = ReadTableRecordBatch {
            chunk: Arc::new(chunk),
            schema,
        };
        let record = batch.read_record(0)?;
        assert_eq!(record.signal_rows, vec![0, 1]);
        assert_eq!(
            record.pore,
            PoreData::new(212, 3, "r9.4.1")
        );
        assert_eq!(record.calibration, CalibrationData::new(1.5, 0.25));
        assert_eq!(
            record.end_reason,
            EndReasonData::new(EndReason::SignalPositive, false)
        );
        assert_eq!(record.run_info.acquisition_id(), "acq-0");
        assert_eq!(record.num_samples, None);

        let second = batch.read_record(1)?;
        assert_eq!(second.signal_rows, vec![2]);
        Ok(())
    }

    fn run_info_children() -> Vec<Box<dyn Array>> {
        let utf8 = |value: &str| Utf8Array::<i32>::from_slice([value]).boxed();
        let map = || {
            let mut builder = crate::dictionary::StringMapKeyBuilder::default();
            builder.append(&vec![("k".to_string(), "v".to_string())]);
            builder.finish().unwrap().boxed()
        };
        let timestamp = DataType::Timestamp(
            arrow2::datatypes::TimeUnit::Millisecond,
            Some("UTC".to_string()),
        );
        vec![
            utf8("acq-0"),
            PrimitiveArray::from_vec(vec![10i64]).to(timestamp.clone()).boxed(),
            PrimitiveArray::from_vec(vec![2047i16]).boxed(),
            PrimitiveArray::from_vec(vec![-2048i16]).boxed(),
            map(),
            utf8("exp"),
            utf8("fc"),
            utf8("code"),
            utf8("proto"),
            utf8("run"),
            PrimitiveArray::from_vec(vec![20i64]).to(timestamp).boxed(),
            utf8("sample"),
            PrimitiveArray::from_vec(vec![4000u16]).boxed(),
            utf8("kit"),
            utf8("pos"),
            utf8("pos-type"),
            utf8("soft"),
            utf8("sys"),
            utf8("sys-type"),
            map(),
        ]
    }
}
