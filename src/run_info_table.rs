//! The run-info table: one row per distinct acquisition, referenced from
//! read rows by acquisition id.

use arrow2::array::{Array, MapArray, PrimitiveArray, StructArray, Utf8Array};
use arrow2::chunk::Chunk;
use arrow2::datatypes::{DataType, Metadata, Schema, TimeUnit};

use crate::dictionary::{
    map_type, PrimitiveKeyBuilder, StringKeyBuilder, StringMapKeyBuilder,
};
use crate::error::{Pod5Error, Result};
use crate::records::{RunInfoData, RunInfoMap};
use crate::schema::{self, FieldSpec, TableSpecVersion};
use crate::table_reader::TableReader;

fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".to_string()))
}

fn field_specs() -> Vec<FieldSpec> {
    let v0 = TableSpecVersion::first();
    vec![
        FieldSpec::new("acquisition_id", DataType::Utf8, v0),
        FieldSpec::new("acquisition_start_time", timestamp_type(), v0),
        FieldSpec::new("adc_max", DataType::Int16, v0),
        FieldSpec::new("adc_min", DataType::Int16, v0),
        FieldSpec::new("context_tags", map_type(), v0),
        FieldSpec::new("experiment_name", DataType::Utf8, v0),
        FieldSpec::new("flow_cell_id", DataType::Utf8, v0),
        FieldSpec::new("flow_cell_product_code", DataType::Utf8, v0),
        FieldSpec::new("protocol_name", DataType::Utf8, v0),
        FieldSpec::new("protocol_run_id", DataType::Utf8, v0),
        FieldSpec::new("protocol_start_time", timestamp_type(), v0),
        FieldSpec::new("sample_id", DataType::Utf8, v0),
        FieldSpec::new("sample_rate", DataType::UInt16, v0),
        FieldSpec::new("sequencing_kit", DataType::Utf8, v0),
        FieldSpec::new("sequencer_position", DataType::Utf8, v0),
        FieldSpec::new("sequencer_position_type", DataType::Utf8, v0),
        FieldSpec::new("software", DataType::Utf8, v0),
        FieldSpec::new("system_name", DataType::Utf8, v0),
        FieldSpec::new("system_type", DataType::Utf8, v0),
        FieldSpec::new("tracking_id", map_type(), v0),
    ]
}

pub(crate) fn writer_schema(metadata: Metadata) -> Schema {
    schema::writer_schema(&field_specs(), TableSpecVersion::first(), metadata)
}

/// Column indices of a resolved run-info table schema.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedRunInfoSchema {
    acquisition_id: usize,
    acquisition_start_time: usize,
    adc_max: usize,
    adc_min: usize,
    context_tags: usize,
    experiment_name: usize,
    flow_cell_id: usize,
    flow_cell_product_code: usize,
    protocol_name: usize,
    protocol_run_id: usize,
    protocol_start_time: usize,
    sample_id: usize,
    sample_rate: usize,
    sequencing_kit: usize,
    sequencer_position: usize,
    sequencer_position_type: usize,
    software: usize,
    system_name: usize,
    system_type: usize,
    tracking_id: usize,
}

pub(crate) fn resolve_schema(schema: &Schema) -> Result<ResolvedRunInfoSchema> {
    let find = |name: &'static str, data_type: &DataType| -> Result<usize> {
        schema::find_field(schema, name, data_type)
    };
    Ok(ResolvedRunInfoSchema {
        acquisition_id: find("acquisition_id", &DataType::Utf8)?,
        acquisition_start_time: find("acquisition_start_time", &timestamp_type())?,
        adc_max: find("adc_max", &DataType::Int16)?,
        adc_min: find("adc_min", &DataType::Int16)?,
        context_tags: find("context_tags", &map_type())?,
        experiment_name: find("experiment_name", &DataType::Utf8)?,
        flow_cell_id: find("flow_cell_id", &DataType::Utf8)?,
        flow_cell_product_code: find("flow_cell_product_code", &DataType::Utf8)?,
        protocol_name: find("protocol_name", &DataType::Utf8)?,
        protocol_run_id: find("protocol_run_id", &DataType::Utf8)?,
        protocol_start_time: find("protocol_start_time", &timestamp_type())?,
        sample_id: find("sample_id", &DataType::Utf8)?,
        sample_rate: find("sample_rate", &DataType::UInt16)?,
        sequencing_kit: find("sequencing_kit", &DataType::Utf8)?,
        sequencer_position: find("sequencer_position", &DataType::Utf8)?,
        sequencer_position_type: find("sequencer_position_type", &DataType::Utf8)?,
        software: find("software", &DataType::Utf8)?,
        system_name: find("system_name", &DataType::Utf8)?,
        system_type: find("system_type", &DataType::Utf8)?,
        tracking_id: find("tracking_id", &map_type())?,
    })
}

/// Build the record batches for all distinct run infos.
pub(crate) fn build_chunks(
    rows: &[RunInfoData],
    batch_size: usize,
) -> Result<Vec<Chunk<Box<dyn Array>>>> {
    let mut chunks = Vec::new();
    for batch in rows.chunks(batch_size.max(1)) {
        let mut acquisition_id = StringKeyBuilder::default();
        let mut acquisition_start_time = PrimitiveKeyBuilder::<i64>::default();
        let mut adc_max = PrimitiveKeyBuilder::<i16>::default();
        let mut adc_min = PrimitiveKeyBuilder::<i16>::default();
        let mut context_tags = StringMapKeyBuilder::default();
        let mut experiment_name = StringKeyBuilder::default();
        let mut flow_cell_id = StringKeyBuilder::default();
        let mut flow_cell_product_code = StringKeyBuilder::default();
        let mut protocol_name = StringKeyBuilder::default();
        let mut protocol_run_id = StringKeyBuilder::default();
        let mut protocol_start_time = PrimitiveKeyBuilder::<i64>::default();
        let mut sample_id = StringKeyBuilder::default();
        let mut sample_rate = PrimitiveKeyBuilder::<u16>::default();
        let mut sequencing_kit = StringKeyBuilder::default();
        let mut sequencer_position = StringKeyBuilder::default();
        let mut sequencer_position_type = StringKeyBuilder::default();
        let mut software = StringKeyBuilder::default();
        let mut system_name = StringKeyBuilder::default();
        let mut system_type = StringKeyBuilder::default();
        let mut tracking_id = StringMapKeyBuilder::default();

        for row in batch {
            acquisition_id.append(&row.acquisition_id);
            acquisition_start_time.append(row.acquisition_start_time_ms);
            adc_max.append(row.adc_max);
            adc_min.append(row.adc_min);
            context_tags.append(&row.context_tags);
            experiment_name.append(&row.experiment_name);
            flow_cell_id.append(&row.flow_cell_id);
            flow_cell_product_code.append(&row.flow_cell_product_code);
            protocol_name.append(&row.protocol_name);
            protocol_run_id.append(&row.protocol_run_id);
            protocol_start_time.append(row.protocol_start_time_ms);
            sample_id.append(&row.sample_id);
            sample_rate.append(row.sample_rate);
            sequencing_kit.append(&row.sequencing_kit);
            sequencer_position.append(&row.sequencer_position);
            sequencer_position_type.append(&row.sequencer_position_type);
            software.append(&row.software);
            system_name.append(&row.system_name);
            system_type.append(&row.system_type);
            tracking_id.append(&row.tracking_id);
        }

        let columns: Vec<Box<dyn Array>> = vec![
            acquisition_id.finish()?.boxed(),
            acquisition_start_time.finish(timestamp_type()).boxed(),
            adc_max.finish(DataType::Int16).boxed(),
            adc_min.finish(DataType::Int16).boxed(),
            context_tags.finish()?.boxed(),
            experiment_name.finish()?.boxed(),
            flow_cell_id.finish()?.boxed(),
            flow_cell_product_code.finish()?.boxed(),
            protocol_name.finish()?.boxed(),
            protocol_run_id.finish()?.boxed(),
            protocol_start_time.finish(timestamp_type()).boxed(),
            sample_id.finish()?.boxed(),
            sample_rate.finish(DataType::UInt16).boxed(),
            sequencing_kit.finish()?.boxed(),
            sequencer_position.finish()?.boxed(),
            sequencer_position_type.finish()?.boxed(),
            software.finish()?.boxed(),
            system_name.finish()?.boxed(),
            system_type.finish()?.boxed(),
            tracking_id.finish()?.boxed(),
        ];
        chunks.push(Chunk::try_new(columns)?);
    }
    Ok(chunks)
}

pub(crate) struct RunInfoTableReader {
    table: TableReader,
    resolved: ResolvedRunInfoSchema,
}

impl RunInfoTableReader {
    pub(crate) fn new(table: TableReader) -> Result<Self> {
        let resolved = resolve_schema(table.schema())?;
        Ok(Self { table, resolved })
    }

    pub(crate) fn table(&self) -> &TableReader {
        &self.table
    }

    /// Scan batches for the run info with the given acquisition id.
    pub(crate) fn find_by_acquisition_id(
        &mut self,
        acquisition_id: &str,
    ) -> Result<Option<RunInfoData>> {
        for batch_index in 0..self.table.num_record_batches() {
            let chunk = self.table.read_record_batch(batch_index)?;
            let ids = utf8_column(&chunk, self.resolved.acquisition_id)?;
            for row in 0..ids.len() {
                if ids.value(row) == acquisition_id {
                    return Ok(Some(self.extract_row(&chunk, row)?));
                }
            }
        }
        Ok(None)
    }

    fn extract_row(&self, chunk: &Chunk<Box<dyn Array>>, row: usize) -> Result<RunInfoData> {
        let r = &self.resolved;
        Ok(RunInfoData {
            acquisition_id: utf8_column(chunk, r.acquisition_id)?.value(row).to_string(),
            acquisition_start_time_ms: primitive_column::<i64>(chunk, r.acquisition_start_time)?
                .value(row),
            adc_max: primitive_column::<i16>(chunk, r.adc_max)?.value(row),
            adc_min: primitive_column::<i16>(chunk, r.adc_min)?.value(row),
            context_tags: map_value(chunk, r.context_tags, row)?,
            experiment_name: utf8_column(chunk, r.experiment_name)?.value(row).to_string(),
            flow_cell_id: utf8_column(chunk, r.flow_cell_id)?.value(row).to_string(),
            flow_cell_product_code: utf8_column(chunk, r.flow_cell_product_code)?
                .value(row)
                .to_string(),
            protocol_name: utf8_column(chunk, r.protocol_name)?.value(row).to_string(),
            protocol_run_id: utf8_column(chunk, r.protocol_run_id)?.value(row).to_string(),
            protocol_start_time_ms: primitive_column::<i64>(chunk, r.protocol_start_time)?
                .value(row),
            sample_id: utf8_column(chunk, r.sample_id)?.value(row).to_string(),
            sample_rate: primitive_column::<u16>(chunk, r.sample_rate)?.value(row),
            sequencing_kit: utf8_column(chunk, r.sequencing_kit)?.value(row).to_string(),
            sequencer_position: utf8_column(chunk, r.sequencer_position)?
                .value(row)
                .to_string(),
            sequencer_position_type: utf8_column(chunk, r.sequencer_position_type)?
                .value(row)
                .to_string(),
            software: utf8_column(chunk, r.software)?.value(row).to_string(),
            system_name: utf8_column(chunk, r.system_name)?.value(row).to_string(),
            system_type: utf8_column(chunk, r.system_type)?.value(row).to_string(),
            tracking_id: map_value(chunk, r.tracking_id, row)?,
        })
    }
}

fn column(chunk: &Chunk<Box<dyn Array>>, index: usize) -> Result<&dyn Array> {
    chunk
        .arrays()
        .get(index)
        .map(|a| a.as_ref())
        .ok_or_else(|| Pod5Error::schema_type(format!("Column {index} missing from batch")))
}

fn utf8_column<'a>(chunk: &'a Chunk<Box<dyn Array>>, index: usize) -> Result<&'a Utf8Array<i32>> {
    column(chunk, index)?
        .as_any()
        .downcast_ref::<Utf8Array<i32>>()
        .ok_or_else(|| Pod5Error::schema_type(format!("Column {index} is not utf8")))
}

fn primitive_column<'a, T: arrow2::types::NativeType>(
    chunk: &'a Chunk<Box<dyn Array>>,
    index: usize,
) -> Result<&'a PrimitiveArray<T>> {
    column(chunk, index)?
        .as_any()
        .downcast_ref::<PrimitiveArray<T>>()
        .ok_or_else(|| Pod5Error::schema_type(format!("Column {index} has unexpected type")))
}

/// Decode one row of a map<utf8, utf8> column.
pub(crate) fn map_array_value(map: &MapArray, row: usize) -> Result<RunInfoMap> {
    let (start, end) = map.offsets().start_end(row);
    let entries = map
        .field()
        .as_any()
        .downcast_ref::<StructArray>()
        .ok_or_else(|| Pod5Error::schema_type("Map entries are not a struct"))?;
    let keys = entries.values()[0]
        .as_any()
        .downcast_ref::<Utf8Array<i32>>()
        .ok_or_else(|| Pod5Error::schema_type("Map keys are not utf8"))?;
    let values = entries.values()[1]
        .as_any()
        .downcast_ref::<Utf8Array<i32>>()
        .ok_or_else(|| Pod5Error::schema_type("Map values are not utf8"))?;
    Ok((start..end)
        .map(|i| (keys.value(i).to_string(), values.value(i).to_string()))
        .collect())
}

fn map_value(chunk: &Chunk<Box<dyn Array>>, index: usize, row: usize) -> Result<RunInfoMap> {
    let map = column(chunk, index)?
        .as_any()
        .downcast_ref::<MapArray>()
        .ok_or_else(|| Pod5Error::schema_type(format!("Column {index} is not a map")))?;
    map_array_value(map, row)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample_run_info(acquisition_id: &str) -> RunInfoData {
        RunInfoData {
            acquisition_id: acquisition_id.to_string(),
            acquisition_start_time_ms: 1_500_000_000_000,
            adc_max: 2047,
            adc_min: -2048,
            context_tags: vec![("basecall_config".to_string(), "hac".to_string())],
            experiment_name: "experiment 1".to_string(),
            flow_cell_id: "FC1234".to_string(),
            flow_cell_product_code: "FLO-MIN114".to_string(),
            protocol_name: "sequencing".to_string(),
            protocol_run_id: "proto-1".to_string(),
            protocol_start_time_ms: 1_500_000_000_100,
            sample_id: "sample-7".to_string(),
            sample_rate: 4000,
            sequencing_kit: "SQK-LSK114".to_string(),
            sequencer_position: "1A".to_string(),
            sequencer_position_type: "P2".to_string(),
            software: "pod5-format tests".to_string(),
            system_name: "system".to_string(),
            system_type: "promethion".to_string(),
            tracking_id: vec![
                ("run_id".to_string(), acquisition_id.to_string()),
                ("exp_script".to_string(), "seq".to_string()),
            ],
        }
    }

    #[test]
    fn test_chunks_match_schema() -> eyre::Result<()> {
        let rows = vec![sample_run_info("acq-1"), sample_run_info("acq-2")];
        let chunks = build_chunks(&rows, 10)?;
        assert_eq!(chunks.len(), 1);
        let schema = writer_schema(Default::default());
        assert_eq!(chunks[0].arrays().len(), schema.fields.len());
        for (array, field) in chunks[0].arrays().iter().zip(&schema.fields) {
            assert!(
                crate::schema::datatype_equivalent(array.data_type(), &field.data_type),
                "column {} type mismatch",
                field.name
            );
        }
        let resolved = resolve_schema(&schema)?;
        assert_eq!(resolved.acquisition_id, 0);
        assert_eq!(resolved.tracking_id, 19);
        Ok(())
    }

    #[test]
    fn test_map_column_decodes() -> eyre::Result<()> {
        let rows = vec![sample_run_info("acq-1")];
        let chunks = build_chunks(&rows, 10)?;
        let map = chunks[0].arrays()[19]
            .as_any()
            .downcast_ref::<MapArray>()
            .unwrap();
        assert_eq!(map_array_value(map, 0)?, rows[0].tracking_id);
        Ok(())
    }
}
