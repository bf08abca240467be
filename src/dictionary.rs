//! Deduplicating dictionary writers and the column key builders behind them.
//!
//! Each writer hands out `i16` indices for distinct values; the read table
//! stores those indices and the value arrays are emitted once per file. The
//! same key builders also assemble the run-info table columns.

use std::collections::HashMap;

use arrow2::array::{Array, DictionaryArray, MapArray, PrimitiveArray, StructArray, Utf8Array};
use arrow2::buffer::Buffer;
use arrow2::datatypes::{DataType, Field};
use arrow2::offset::OffsetsBuffer;

use crate::error::{Pod5Error, Result};
use crate::records::{EndReason, RunInfoData, RunInfoMap};

/// Accumulates primitive values for one child column.
#[derive(Debug, Default)]
pub(crate) struct PrimitiveKeyBuilder<T> {
    values: Vec<T>,
}

impl<T: arrow2::types::NativeType> PrimitiveKeyBuilder<T> {
    pub(crate) fn append(&mut self, value: T) {
        self.values.push(value);
    }

    pub(crate) fn finish(&self, data_type: DataType) -> PrimitiveArray<T> {
        PrimitiveArray::from_vec(self.values.clone()).to(data_type)
    }
}

/// Concatenated string bytes with a parallel i32 offset column.
#[derive(Debug)]
pub(crate) struct StringKeyBuilder {
    bytes: Vec<u8>,
    offsets: Vec<i32>,
}

impl Default for StringKeyBuilder {
    fn default() -> Self {
        Self {
            bytes: Vec::new(),
            offsets: vec![0],
        }
    }
}

impl StringKeyBuilder {
    pub(crate) fn append(&mut self, value: &str) {
        self.bytes.extend_from_slice(value.as_bytes());
        self.offsets.push(self.bytes.len() as i32);
    }

    pub(crate) fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub(crate) fn finish(&self) -> Result<Utf8Array<i32>> {
        let offsets = OffsetsBuffer::try_from(self.offsets.clone())
            .map_err(arrow2::error::Error::from)?;
        Ok(Utf8Array::try_new(
            DataType::Utf8,
            offsets,
            Buffer::from(self.bytes.clone()),
            None,
        )?)
    }
}

/// Outer offsets over a pair of string builders, one entry per map.
#[derive(Debug)]
pub(crate) struct StringMapKeyBuilder {
    offsets: Vec<i32>,
    keys: StringKeyBuilder,
    values: StringKeyBuilder,
}

impl Default for StringMapKeyBuilder {
    fn default() -> Self {
        Self {
            offsets: vec![0],
            keys: StringKeyBuilder::default(),
            values: StringKeyBuilder::default(),
        }
    }
}

pub(crate) fn map_entries_field() -> Field {
    Field::new(
        "entries",
        DataType::Struct(vec![
            Field::new("key", DataType::Utf8, false),
            Field::new("value", DataType::Utf8, true),
        ]),
        false,
    )
}

pub(crate) fn map_type() -> DataType {
    DataType::Map(Box::new(map_entries_field()), false)
}

impl StringMapKeyBuilder {
    pub(crate) fn append(&mut self, value: &RunInfoMap) {
        for (key, item) in value {
            self.keys.append(key);
            self.values.append(item);
        }
        self.offsets.push(self.keys.len() as i32);
    }

    pub(crate) fn finish(&self) -> Result<MapArray> {
        let entries = StructArray::new(
            map_entries_field().data_type,
            vec![self.keys.finish()?.boxed(), self.values.finish()?.boxed()],
            None,
        );
        let offsets = OffsetsBuffer::try_from(self.offsets.clone())
            .map_err(arrow2::error::Error::from)?;
        Ok(MapArray::try_new(
            map_type(),
            offsets,
            entries.boxed(),
            None,
        )?)
    }
}

/// A writer of one dictionary: a unique value set addressed by i16 index.
pub(crate) trait DictionaryWriter {
    fn value_array(&self) -> Result<Box<dyn Array>>;
    fn item_count(&self) -> usize;

    fn build_dictionary_array(&self, keys: PrimitiveArray<i16>) -> Result<DictionaryArray<i16>> {
        Ok(DictionaryArray::try_from_keys(keys, self.value_array()?)?)
    }
}

fn next_index(count: usize) -> Result<i16> {
    i16::try_from(count).map_err(|_| {
        Pod5Error::invalid_argument("Dictionary is full: more than i16::MAX distinct values")
    })
}

/// Deduplicates pore type names.
#[derive(Debug, Default)]
pub struct PoreWriter {
    builder: StringKeyBuilder,
    indices: HashMap<String, i16>,
}

impl PoreWriter {
    pub fn add(&mut self, pore_type: &str) -> Result<i16> {
        if let Some(&index) = self.indices.get(pore_type) {
            return Ok(index);
        }
        let index = next_index(self.builder.len())?;
        self.builder.append(pore_type);
        self.indices.insert(pore_type.to_string(), index);
        Ok(index)
    }
}

impl DictionaryWriter for PoreWriter {
    fn value_array(&self) -> Result<Box<dyn Array>> {
        Ok(self.builder.finish()?.boxed())
    }

    fn item_count(&self) -> usize {
        self.builder.len()
    }
}

/// Deduplicates end reason names.
#[derive(Debug, Default)]
pub struct EndReasonWriter {
    builder: StringKeyBuilder,
    indices: HashMap<EndReason, i16>,
}

impl EndReasonWriter {
    pub fn add(&mut self, end_reason: EndReason) -> Result<i16> {
        if let Some(&index) = self.indices.get(&end_reason) {
            return Ok(index);
        }
        let index = next_index(self.builder.len())?;
        self.builder.append(end_reason.as_str());
        self.indices.insert(end_reason, index);
        Ok(index)
    }
}

impl DictionaryWriter for EndReasonWriter {
    fn value_array(&self) -> Result<Box<dyn Array>> {
        Ok(self.builder.finish()?.boxed())
    }

    fn item_count(&self) -> usize {
        self.builder.len()
    }
}

/// Deduplicates run infos by acquisition id. The read table references the
/// acquisition id; the full rows land in the run-info table at close.
#[derive(Debug, Default)]
pub struct RunInfoWriter {
    acquisition_ids: StringKeyBuilder,
    rows: Vec<RunInfoData>,
    indices: HashMap<String, i16>,
}

impl RunInfoWriter {
    pub fn add(&mut self, run_info: &RunInfoData) -> Result<i16> {
        if run_info.acquisition_id.is_empty() {
            return Err(Pod5Error::invalid_argument(
                "Run info must have a non-empty acquisition id",
            ));
        }
        if let Some(&index) = self.indices.get(&run_info.acquisition_id) {
            return Ok(index);
        }
        let index = next_index(self.rows.len())?;
        self.acquisition_ids.append(&run_info.acquisition_id);
        self.indices
            .insert(run_info.acquisition_id.clone(), index);
        self.rows.push(run_info.clone());
        Ok(index)
    }

    pub(crate) fn rows(&self) -> &[RunInfoData] {
        &self.rows
    }
}

impl DictionaryWriter for RunInfoWriter {
    fn value_array(&self) -> Result<Box<dyn Array>> {
        Ok(self.acquisition_ids.finish()?.boxed())
    }

    fn item_count(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_string_builder_offsets() -> eyre::Result<()> {
        let mut builder = StringKeyBuilder::default();
        builder.append("well_1");
        builder.append("");
        builder.append("well_2");
        let array = builder.finish()?;
        assert_eq!(array.len(), 3);
        assert_eq!(array.value(0), "well_1");
        assert_eq!(array.value(1), "");
        assert_eq!(array.value(2), "well_2");
        Ok(())
    }

    #[test]
    fn test_map_builder() -> eyre::Result<()> {
        let mut builder = StringMapKeyBuilder::default();
        builder.append(&vec![
            ("device".to_string(), "p2_solo".to_string()),
            ("mode".to_string(), "fast".to_string()),
        ]);
        builder.append(&Vec::new());
        let array = builder.finish()?;
        assert_eq!(array.len(), 2);
        Ok(())
    }

    #[test]
    fn test_pore_writer_dedups() -> eyre::Result<()> {
        let mut writer = PoreWriter::default();
        assert_eq!(writer.add("r10_4_1")?, 0);
        assert_eq!(writer.add("r9_4_1")?, 1);
        assert_eq!(writer.add("r10_4_1")?, 0);
        assert_eq!(writer.item_count(), 2);
        Ok(())
    }

    #[test]
    fn test_end_reason_writer() -> eyre::Result<()> {
        let mut writer = EndReasonWriter::default();
        let a = writer.add(EndReason::SignalPositive)?;
        let b = writer.add(EndReason::MuxChange)?;
        assert_eq!(writer.add(EndReason::SignalPositive)?, a);
        assert_ne!(a, b);

        let keys = PrimitiveArray::from_vec(vec![b, a, a]);
        let dict = writer.build_dictionary_array(keys)?;
        assert_eq!(dict.len(), 3);
        Ok(())
    }

    #[test]
    fn test_run_info_writer_requires_acquisition_id() {
        let mut writer = RunInfoWriter::default();
        assert!(writer.add(&RunInfoData::default()).is_err());
    }
}
