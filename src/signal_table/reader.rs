use std::sync::Arc;

use arrow2::array::{Array, BinaryArray, FixedSizeBinaryArray, ListArray, PrimitiveArray};
use arrow2::chunk::Chunk;
use uuid::Uuid;

use super::schema::{resolve_schema, SignalTableSchema, SignalType};
use crate::compression::decompress_signal_into;
use crate::error::{Pod5Error, Result};
use crate::records::SignalTableRowIndex;
use crate::schema::SchemaMetadata;
use crate::table_reader::TableReader;

/// One record batch of the signal table with typed column access.
pub(crate) struct SignalTableRecordBatch {
    chunk: Arc<Chunk<Box<dyn Array>>>,
    field_locations: SignalTableSchema,
}

impl SignalTableRecordBatch {
    pub(crate) fn num_rows(&self) -> usize {
        self.chunk.len()
    }

    pub(crate) fn read_id_column(&self) -> Result<&FixedSizeBinaryArray> {
        self.chunk.arrays()[self.field_locations.read_id]
            .as_any()
            .downcast_ref::<FixedSizeBinaryArray>()
            .ok_or_else(|| Pod5Error::schema_type("Signal table read_id column is not a uuid"))
    }

    pub(crate) fn read_id(&self, row: usize) -> Result<Uuid> {
        let column = self.read_id_column()?;
        Uuid::from_slice(column.value(row))
            .map_err(|_| Pod5Error::consistency("Signal table read_id is not 16 bytes"))
    }

    fn uncompressed_signal_column(&self) -> Result<&ListArray<i64>> {
        self.chunk.arrays()[self.field_locations.signal]
            .as_any()
            .downcast_ref::<ListArray<i64>>()
            .ok_or_else(|| {
                Pod5Error::schema_type("Signal table signal column is not a large list")
            })
    }

    fn vbz_signal_column(&self) -> Result<&BinaryArray<i64>> {
        self.chunk.arrays()[self.field_locations.signal]
            .as_any()
            .downcast_ref::<BinaryArray<i64>>()
            .ok_or_else(|| {
                Pod5Error::schema_type("Signal table signal column is not a large binary")
            })
    }

    pub(crate) fn samples_column(&self) -> Result<&PrimitiveArray<u32>> {
        self.chunk.arrays()[self.field_locations.samples]
            .as_any()
            .downcast_ref::<PrimitiveArray<u32>>()
            .ok_or_else(|| Pod5Error::schema_type("Signal table samples column is not u32"))
    }

    /// Number of samples stored in one row's chunk.
    pub(crate) fn samples_in_row(&self, row: usize) -> Result<u32> {
        if row >= self.num_rows() {
            return Err(Pod5Error::invalid_argument(format!(
                "Queried signal row {row} is outside the available rows ({} in batch)",
                self.num_rows()
            )));
        }
        Ok(self.samples_column()?.value(row))
    }

    /// Decode one row's chunk into `samples`, whose length must equal the
    /// row's sample count.
    pub(crate) fn extract_signal_row(&self, row: usize, samples: &mut [i16]) -> Result<()> {
        if row >= self.num_rows() {
            return Err(Pod5Error::invalid_argument(format!(
                "Queried signal row {row} is outside the available rows ({} in batch)",
                self.num_rows()
            )));
        }
        let samples_in_row = self.samples_in_row(row)? as usize;
        if samples_in_row != samples.len() {
            return Err(Pod5Error::invalid_argument(format!(
                "Unexpected size for sample array {} expected {samples_in_row}",
                samples.len()
            )));
        }

        match self.field_locations.signal_type {
            SignalType::UncompressedSignal => {
                let column = self.uncompressed_signal_column()?;
                let (start, end) = column.offsets().start_end(row);
                if end - start != samples_in_row {
                    return Err(Pod5Error::consistency(format!(
                        "Signal row {row} stores {} samples but declares {samples_in_row}",
                        end - start
                    )));
                }
                let values = column
                    .values()
                    .as_any()
                    .downcast_ref::<PrimitiveArray<i16>>()
                    .ok_or_else(|| {
                        Pod5Error::schema_type("Signal list values are not 16 bit integers")
                    })?;
                samples.copy_from_slice(&values.values()[start..end]);
                Ok(())
            }
            SignalType::VbzSignal => {
                let compressed = self.vbz_signal_column()?.value(row);
                decompress_signal_into(compressed, samples)
            }
        }
    }
}

/// Reader over the embedded signal table.
pub(crate) struct SignalTableReader {
    table: TableReader,
    field_locations: SignalTableSchema,
    batch_size: Option<usize>,
}

impl SignalTableReader {
    pub(crate) fn new(table: TableReader) -> Result<Self> {
        let field_locations = resolve_schema(table.schema())?;
        Ok(Self {
            table,
            field_locations,
            batch_size: None,
        })
    }

    pub(crate) fn schema_metadata(&self) -> &SchemaMetadata {
        self.table.schema_metadata()
    }

    pub(crate) fn signal_type(&self) -> SignalType {
        self.field_locations.signal_type
    }

    pub(crate) fn num_record_batches(&self) -> usize {
        self.table.num_record_batches()
    }

    pub(crate) fn read_record_batch(&mut self, index: usize) -> Result<SignalTableRecordBatch> {
        let chunk = self.table.read_record_batch(index)?;
        Ok(SignalTableRecordBatch {
            chunk,
            field_locations: self.field_locations,
        })
    }

    /// Map an absolute signal row to its batch and row-in-batch. All batches
    /// share the first batch's size, except possibly the last.
    pub(crate) fn signal_batch_for_row_id(
        &mut self,
        row: SignalTableRowIndex,
    ) -> Result<(usize, usize)> {
        let batch_size = match self.batch_size {
            Some(size) => size,
            None => {
                if self.table.num_record_batches() == 0 {
                    return Err(Pod5Error::invalid_argument(
                        "Row outside batch bounds: signal table is empty",
                    ));
                }
                let size = self.read_record_batch(0)?.num_rows();
                self.batch_size = Some(size);
                size
            }
        };
        if batch_size == 0 {
            return Err(Pod5Error::consistency("Signal table has an empty batch"));
        }
        let batch = (row / batch_size as u64) as usize;
        if batch >= self.table.num_record_batches() {
            return Err(Pod5Error::invalid_argument(format!(
                "Row {row} outside batch bounds"
            )));
        }
        Ok((batch, (row % batch_size as u64) as usize))
    }

    /// The denormalized owning read id of one signal row.
    pub(crate) fn read_id_for_row(&mut self, row: SignalTableRowIndex) -> Result<Uuid> {
        let (batch_index, batch_row) = self.signal_batch_for_row_id(row)?;
        self.read_record_batch(batch_index)?.read_id(batch_row)
    }

    /// Total sample count across the given signal rows.
    pub(crate) fn extract_sample_count(
        &mut self,
        row_indices: &[SignalTableRowIndex],
    ) -> Result<u64> {
        let mut sample_count = 0u64;
        for &signal_row in row_indices {
            let (batch_index, batch_row) = self.signal_batch_for_row_id(signal_row)?;
            let batch = self.read_record_batch(batch_index)?;
            sample_count += batch.samples_in_row(batch_row)? as u64;
        }
        Ok(sample_count)
    }

    /// Materialize the given signal rows, in order, into `output_samples`.
    /// The output length must equal the rows' total sample count.
    pub(crate) fn extract_samples(
        &mut self,
        row_indices: &[SignalTableRowIndex],
        output_samples: &mut [i16],
    ) -> Result<()> {
        let mut sample_count = 0usize;
        for &signal_row in row_indices {
            let (batch_index, batch_row) = self.signal_batch_for_row_id(signal_row)?;
            let batch = self.read_record_batch(batch_index)?;
            let row_samples_count = batch.samples_in_row(batch_row)? as usize;
            let sample_start = sample_count;
            sample_count += row_samples_count;
            if sample_count > output_samples.len() {
                return Err(Pod5Error::invalid_argument(
                    "Too few samples in output samples array",
                ));
            }
            batch.extract_signal_row(
                batch_row,
                &mut output_samples[sample_start..sample_start + row_samples_count],
            )?;
        }
        if sample_count != output_samples.len() {
            return Err(Pod5Error::invalid_argument(format!(
                "Signal rows hold {sample_count} samples but the output buffer expects {}",
                output_samples.len()
            )));
        }
        Ok(())
    }
}
