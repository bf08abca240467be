use std::io::Write;

use arrow2::array::{Array, BooleanArray, FixedSizeBinaryArray, ListArray, PrimitiveArray};
use arrow2::buffer::Buffer;
use arrow2::chunk::Chunk;
use arrow2::datatypes::{DataType, Field, Metadata, Schema};
use arrow2::io::ipc::write::{FileWriter, WriteOptions};
use arrow2::offset::OffsetsBuffer;
use log::debug;

use super::schema::writer_schema;
use crate::dictionary::{DictionaryWriter, EndReasonWriter, PoreWriter, RunInfoWriter};
use crate::error::{Pod5Error, Result};
use crate::records::{ReadData, SignalTableRowIndex};

/// Finished per-batch columns. Dictionary columns are held as bare key
/// arrays; the value arrays are attached once at close so every batch
/// references the same dictionaries.
struct SealedBatch {
    read_id: Box<dyn Array>,
    signal: Box<dyn Array>,
    read_number: Box<dyn Array>,
    start: Box<dyn Array>,
    median_before: Box<dyn Array>,
    num_minknow_events: Box<dyn Array>,
    tracked_scaling_scale: Box<dyn Array>,
    tracked_scaling_shift: Box<dyn Array>,
    predicted_scaling_scale: Box<dyn Array>,
    predicted_scaling_shift: Box<dyn Array>,
    num_reads_since_mux_change: Box<dyn Array>,
    time_since_mux_change: Box<dyn Array>,
    num_samples: Box<dyn Array>,
    channel: Box<dyn Array>,
    well: Box<dyn Array>,
    pore_type_keys: PrimitiveArray<i16>,
    calibration_offset: Box<dyn Array>,
    calibration_scale: Box<dyn Array>,
    end_reason_keys: PrimitiveArray<i16>,
    end_reason_forced: Box<dyn Array>,
    run_info_keys: PrimitiveArray<i16>,
}

#[derive(Default)]
struct ColumnBuilders {
    read_id_bytes: Vec<u8>,
    signal_offsets: Vec<i32>,
    signal_values: Vec<u64>,
    read_number: Vec<u32>,
    start: Vec<u64>,
    median_before: Vec<f32>,
    num_minknow_events: Vec<u64>,
    tracked_scaling_scale: Vec<f32>,
    tracked_scaling_shift: Vec<f32>,
    predicted_scaling_scale: Vec<f32>,
    predicted_scaling_shift: Vec<f32>,
    num_reads_since_mux_change: Vec<u32>,
    time_since_mux_change: Vec<f32>,
    num_samples: Vec<u64>,
    channel: Vec<u16>,
    well: Vec<u8>,
    pore_type: Vec<i16>,
    calibration_offset: Vec<f32>,
    calibration_scale: Vec<f32>,
    end_reason: Vec<i16>,
    end_reason_forced: Vec<bool>,
    run_info: Vec<i16>,
}

impl ColumnBuilders {
    fn new() -> Self {
        Self {
            signal_offsets: vec![0],
            ..Default::default()
        }
    }

    fn seal(&mut self) -> Result<SealedBatch> {
        let mut done = std::mem::replace(self, Self::new());
        let signal_offsets = OffsetsBuffer::try_from(done.signal_offsets)
            .map_err(arrow2::error::Error::from)?;
        Ok(SealedBatch {
            read_id: FixedSizeBinaryArray::try_new(
                crate::types::uuid_type(),
                Buffer::from(done.read_id_bytes),
                None,
            )?
            .boxed(),
            signal: ListArray::<i32>::try_new(
                DataType::List(Box::new(Field::new("item", DataType::UInt64, true))),
                signal_offsets,
                PrimitiveArray::from_vec(done.signal_values).boxed(),
                None,
            )?
            .boxed(),
            read_number: PrimitiveArray::from_vec(done.read_number).boxed(),
            start: PrimitiveArray::from_vec(done.start).boxed(),
            median_before: PrimitiveArray::from_vec(done.median_before).boxed(),
            num_minknow_events: PrimitiveArray::from_vec(done.num_minknow_events).boxed(),
            tracked_scaling_scale: PrimitiveArray::from_vec(done.tracked_scaling_scale).boxed(),
            tracked_scaling_shift: PrimitiveArray::from_vec(done.tracked_scaling_shift).boxed(),
            predicted_scaling_scale: PrimitiveArray::from_vec(done.predicted_scaling_scale)
                .boxed(),
            predicted_scaling_shift: PrimitiveArray::from_vec(done.predicted_scaling_shift)
                .boxed(),
            num_reads_since_mux_change: PrimitiveArray::from_vec(done.num_reads_since_mux_change)
                .boxed(),
            time_since_mux_change: PrimitiveArray::from_vec(done.time_since_mux_change).boxed(),
            num_samples: PrimitiveArray::from_vec(done.num_samples).boxed(),
            channel: PrimitiveArray::from_vec(done.channel).boxed(),
            well: PrimitiveArray::from_vec(done.well).boxed(),
            pore_type_keys: PrimitiveArray::from_vec(done.pore_type),
            calibration_offset: PrimitiveArray::from_vec(done.calibration_offset).boxed(),
            calibration_scale: PrimitiveArray::from_vec(done.calibration_scale).boxed(),
            end_reason_keys: PrimitiveArray::from_vec(done.end_reason),
            end_reason_forced: BooleanArray::from_slice(&done.end_reason_forced).boxed(),
            run_info_keys: PrimitiveArray::from_vec(done.run_info),
        })
    }
}

/// Builds read-table record batches. Rows are sealed into batches as
/// `table_batch_size` fills; the Arrow IPC file itself is emitted at close,
/// when the dictionary value arrays are final.
pub(crate) struct ReadTableWriter {
    schema: Schema,
    table_batch_size: usize,
    builders: ColumnBuilders,
    sealed: Vec<SealedBatch>,
    written_batched_row_count: u64,
    current_batch_row_count: usize,
    closed: bool,
}

impl ReadTableWriter {
    pub(crate) fn new(metadata: Metadata, table_batch_size: usize) -> Self {
        Self {
            schema: writer_schema(metadata),
            table_batch_size: table_batch_size.max(1),
            builders: ColumnBuilders::new(),
            sealed: Vec::new(),
            written_batched_row_count: 0,
            current_batch_row_count: 0,
            closed: false,
        }
    }

    /// Append one read row referencing the given signal rows. The signal
    /// duration is the total sample count across those rows.
    pub(crate) fn add_read(
        &mut self,
        read_data: &ReadData,
        signal: &[SignalTableRowIndex],
        signal_duration: u64,
    ) -> Result<u64> {
        if self.closed {
            return Err(Pod5Error::WriterClosed);
        }
        let row_id = self.written_batched_row_count + self.current_batch_row_count as u64;
        let b = &mut self.builders;
        b.read_id_bytes.extend_from_slice(read_data.read_id.as_bytes());
        b.signal_values.extend_from_slice(signal);
        b.signal_offsets.push(b.signal_values.len() as i32);
        b.read_number.push(read_data.read_number);
        b.start.push(read_data.start_sample);
        b.median_before.push(read_data.median_before);
        b.num_minknow_events.push(read_data.num_minknow_events);
        b.tracked_scaling_scale.push(read_data.tracked_scaling_scale);
        b.tracked_scaling_shift.push(read_data.tracked_scaling_shift);
        b.predicted_scaling_scale
            .push(read_data.predicted_scaling_scale);
        b.predicted_scaling_shift
            .push(read_data.predicted_scaling_shift);
        b.num_reads_since_mux_change
            .push(read_data.num_reads_since_mux_change);
        b.time_since_mux_change.push(read_data.time_since_mux_change);
        b.num_samples.push(signal_duration);
        b.channel.push(read_data.channel);
        b.well.push(read_data.well);
        b.pore_type.push(read_data.pore_type);
        b.calibration_offset.push(read_data.calibration_offset);
        b.calibration_scale.push(read_data.calibration_scale);
        b.end_reason.push(read_data.end_reason);
        b.end_reason_forced.push(read_data.end_reason_forced);
        b.run_info.push(read_data.run_info);

        self.current_batch_row_count += 1;
        if self.current_batch_row_count >= self.table_batch_size {
            self.seal_batch()?;
        }
        Ok(row_id)
    }

    fn seal_batch(&mut self) -> Result<()> {
        if self.current_batch_row_count == 0 {
            return Ok(());
        }
        let sealed = self.builders.seal()?;
        self.sealed.push(sealed);
        self.written_batched_row_count += self.current_batch_row_count as u64;
        self.current_batch_row_count = 0;
        Ok(())
    }

    /// Seal any partial batch and write the whole table as an embedded Arrow
    /// file, attaching the final dictionary values to every batch.
    pub(crate) fn write_to<W: Write>(
        &mut self,
        sink: W,
        pore_writer: &PoreWriter,
        end_reason_writer: &EndReasonWriter,
        run_info_writer: &RunInfoWriter,
    ) -> Result<()> {
        if self.closed {
            return Err(Pod5Error::WriterClosed);
        }
        self.seal_batch()?;
        self.closed = true;

        debug!("read table: writing {} batches", self.sealed.len());
        let mut writer = FileWriter::try_new(
            sink,
            self.schema.clone(),
            None,
            WriteOptions { compression: None },
        )?;
        for batch in self.sealed.drain(..) {
            let pore_type = pore_writer
                .build_dictionary_array(batch.pore_type_keys)?
                .boxed();
            let end_reason = end_reason_writer
                .build_dictionary_array(batch.end_reason_keys)?
                .boxed();
            let run_info = run_info_writer
                .build_dictionary_array(batch.run_info_keys)?
                .boxed();
            let chunk = Chunk::try_new(vec![
                batch.read_id,
                batch.signal,
                batch.read_number,
                batch.start,
                batch.median_before,
                batch.num_minknow_events,
                batch.tracked_scaling_scale,
                batch.tracked_scaling_shift,
                batch.predicted_scaling_scale,
                batch.predicted_scaling_shift,
                batch.num_reads_since_mux_change,
                batch.time_since_mux_change,
                batch.num_samples,
                batch.channel,
                batch.well,
                pore_type,
                batch.calibration_offset,
                batch.calibration_scale,
                end_reason,
                batch.end_reason_forced,
                run_info,
            ])?;
            writer.write(&chunk, None)?;
        }
        writer.finish()?;
        Ok(())
    }
}
