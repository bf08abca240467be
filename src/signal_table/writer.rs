use std::io::Write;

use arrow2::array::{Array, BinaryArray, FixedSizeBinaryArray, ListArray, PrimitiveArray};
use arrow2::buffer::Buffer;
use arrow2::chunk::Chunk;
use arrow2::datatypes::Metadata;
use arrow2::io::ipc::write::{FileWriter, WriteOptions};
use arrow2::offset::OffsetsBuffer;
use log::debug;
use uuid::Uuid;

use super::schema::{make_writer_schema, uncompressed_signal_type, SignalTableSchema, SignalType};
use crate::compression::compress_signal;
use crate::error::{Pod5Error, Result};
use crate::records::SignalTableRowIndex;
use crate::types::{uuid_type, vbz_signal_type};
use crate::writer::SharedSink;

/// Variant column builder for the signal column.
enum SignalBuilder {
    Uncompressed {
        values: Vec<i16>,
        offsets: Vec<i64>,
    },
    Vbz {
        bytes: Vec<u8>,
        offsets: Vec<i64>,
    },
}

impl SignalBuilder {
    fn new(signal_type: SignalType) -> Self {
        match signal_type {
            SignalType::UncompressedSignal => SignalBuilder::Uncompressed {
                values: Vec::new(),
                offsets: vec![0],
            },
            SignalType::VbzSignal => SignalBuilder::Vbz {
                bytes: Vec::new(),
                offsets: vec![0],
            },
        }
    }

    fn append_signal(&mut self, signal: &[i16]) -> Result<()> {
        match self {
            SignalBuilder::Uncompressed { values, offsets } => {
                values.extend_from_slice(signal);
                offsets.push(values.len() as i64);
            }
            SignalBuilder::Vbz { bytes, offsets } => {
                bytes.extend_from_slice(&compress_signal(signal)?);
                offsets.push(bytes.len() as i64);
            }
        }
        Ok(())
    }

    fn append_pre_compressed(&mut self, signal: &[u8]) -> Result<()> {
        match self {
            SignalBuilder::Uncompressed { .. } => Err(Pod5Error::invalid_argument(
                "Pre-compressed signal cannot be appended to an uncompressed signal table",
            )),
            SignalBuilder::Vbz { bytes, offsets } => {
                bytes.extend_from_slice(signal);
                offsets.push(bytes.len() as i64);
                Ok(())
            }
        }
    }

    fn finish(&mut self) -> Result<Box<dyn Array>> {
        match self {
            SignalBuilder::Uncompressed { values, offsets } => {
                let offsets = OffsetsBuffer::try_from(std::mem::replace(offsets, vec![0]))
                    .map_err(arrow2::error::Error::from)?;
                let values = PrimitiveArray::from_vec(std::mem::take(values));
                Ok(
                    ListArray::<i64>::try_new(
                        uncompressed_signal_type(),
                        offsets,
                        values.boxed(),
                        None,
                    )?
                    .boxed(),
                )
            }
            SignalBuilder::Vbz { bytes, offsets } => {
                let offsets = OffsetsBuffer::try_from(std::mem::replace(offsets, vec![0]))
                    .map_err(arrow2::error::Error::from)?;
                Ok(BinaryArray::<i64>::try_new(
                    vbz_signal_type(),
                    offsets,
                    Buffer::from(std::mem::take(bytes)),
                    None,
                )?
                .boxed())
            }
        }
    }
}

/// Streams signal record batches into the combined file, flushing the sink
/// after every batch so an interrupted file keeps its written rows.
pub(crate) struct SignalTableWriter<W: Write> {
    writer: Option<FileWriter<SharedSink<W>>>,
    sink: SharedSink<W>,
    field_locations: SignalTableSchema,
    table_batch_size: usize,
    read_id_bytes: Vec<u8>,
    signal_builder: SignalBuilder,
    samples: Vec<u32>,
    written_batched_row_count: u64,
    current_batch_row_count: usize,
}

impl<W: Write> SignalTableWriter<W> {
    pub(crate) fn new(
        sink: SharedSink<W>,
        metadata: Metadata,
        signal_type: SignalType,
        table_batch_size: usize,
    ) -> Result<Self> {
        let (schema, field_locations) = make_writer_schema(signal_type, metadata);
        let writer = FileWriter::try_new(
            sink.clone(),
            schema,
            None,
            WriteOptions { compression: None },
        )?;
        Ok(Self {
            writer: Some(writer),
            sink,
            field_locations,
            table_batch_size,
            read_id_bytes: Vec::new(),
            signal_builder: SignalBuilder::new(signal_type),
            samples: Vec::new(),
            written_batched_row_count: 0,
            current_batch_row_count: 0,
        })
    }

    pub(crate) fn signal_type(&self) -> SignalType {
        self.field_locations.signal_type
    }

    /// Append one chunk of samples, compressing when the table is VBZ.
    /// Returns the absolute row index of the new row.
    pub(crate) fn add_signal(
        &mut self,
        read_id: &Uuid,
        signal: &[i16],
    ) -> Result<SignalTableRowIndex> {
        if self.writer.is_none() {
            return Err(Pod5Error::WriterClosed);
        }
        let row_id = self.written_batched_row_count + self.current_batch_row_count as u64;
        self.read_id_bytes.extend_from_slice(read_id.as_bytes());
        self.signal_builder.append_signal(signal)?;
        self.samples.push(signal.len() as u32);
        self.current_batch_row_count += 1;

        if self.current_batch_row_count >= self.table_batch_size {
            self.write_batch()?;
        }
        Ok(row_id)
    }

    /// Append an already-compressed VBZ cell covering `sample_count` samples.
    pub(crate) fn add_pre_compressed_signal(
        &mut self,
        read_id: &Uuid,
        signal: &[u8],
        sample_count: u32,
    ) -> Result<SignalTableRowIndex> {
        if self.writer.is_none() {
            return Err(Pod5Error::WriterClosed);
        }
        let row_id = self.written_batched_row_count + self.current_batch_row_count as u64;
        self.read_id_bytes.extend_from_slice(read_id.as_bytes());
        self.signal_builder.append_pre_compressed(signal)?;
        self.samples.push(sample_count);
        self.current_batch_row_count += 1;

        if self.current_batch_row_count >= self.table_batch_size {
            self.write_batch()?;
        }
        Ok(row_id)
    }

    fn write_batch(&mut self) -> Result<()> {
        if self.current_batch_row_count == 0 {
            return Ok(());
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(Pod5Error::WriterClosed);
        };

        let read_ids = FixedSizeBinaryArray::try_new(
            uuid_type(),
            Buffer::from(std::mem::take(&mut self.read_id_bytes)),
            None,
        )?
        .boxed();
        let signal = self.signal_builder.finish()?;
        let samples = PrimitiveArray::from_vec(std::mem::take(&mut self.samples)).boxed();
        let chunk = Chunk::try_new(vec![read_ids, signal, samples])?;
        debug!(
            "signal table: writing batch of {} rows",
            self.current_batch_row_count
        );
        self.written_batched_row_count += self.current_batch_row_count as u64;
        self.current_batch_row_count = 0;
        writer.write(&chunk, None)?;
        self.sink.flush()?;
        Ok(())
    }

    /// Flush any partial batch and seal the embedded Arrow file.
    pub(crate) fn close(&mut self) -> Result<()> {
        if self.writer.is_none() {
            return Ok(());
        }
        self.write_batch()?;
        if let Some(mut writer) = self.writer.take() {
            writer.finish()?;
        }
        self.sink.flush()?;
        Ok(())
    }
}
