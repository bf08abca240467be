//! Writing combined POD5 files.
//!
//! The signal table is streamed straight into the output file; the read and
//! run-info tables are appended when the writer is closed, followed by the
//! footer flatbuffer and the closing signature.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufWriter, Seek, Write};
use std::path::Path;
use std::rc::Rc;

use arrow2::io::ipc::write::{FileWriter, WriteOptions as IpcWriteOptions};
use flatbuffers::FlatBufferBuilder;
use log::debug;
use uuid::Uuid;

use crate::dictionary::{
    DictionaryWriter, EndReasonWriter, PoreWriter, RunInfoWriter,
};
use crate::error::{Pod5Error, Result};
use crate::footer::{FILE_SIGNATURE, FOOTER_MAGIC};
use crate::footer_generated::minknow::reads_format::{
    ContentType, EmbeddedFile, EmbeddedFileArgs, Footer, FooterArgs, Format,
};
use crate::read_table::ReadTableWriter;
use crate::records::{EndReason, ReadData, RunInfoData, SignalTableRowIndex};
use crate::run_info_table;
use crate::schema::{SchemaMetadata, WRITTEN_POD5_VERSION};
use crate::signal_table::{SignalTableWriter, SignalType};

const SOFTWARE: &str = "pod5-format-rs";

/// Samples per signal-table row when the caller does not pick a chunk size.
pub const DEFAULT_SIGNAL_CHUNK_SIZE: usize = 102_400;

/// Tuning knobs for a combined-file writer.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Rows per read-table record batch.
    pub read_table_batch_size: usize,
    /// Rows per signal-table record batch.
    pub signal_table_batch_size: usize,
    /// Maximum samples per signal chunk; zero selects the default.
    pub max_signal_chunk_size: usize,
    /// Whether signal chunks are VBZ compressed or stored raw.
    pub signal_type: SignalType,
    /// Writer identification stored in the schema metadata and footer.
    pub software_name: String,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            read_table_batch_size: 1000,
            signal_table_batch_size: 100,
            max_signal_chunk_size: DEFAULT_SIGNAL_CHUNK_SIZE,
            signal_type: SignalType::VbzSignal,
            software_name: SOFTWARE.to_string(),
        }
    }
}

/// A cloneable handle over the output sink, so the embedded Arrow writers
/// and the envelope writer can share one stream.
pub(crate) struct SharedSink<W>(Rc<RefCell<W>>);

impl<W> SharedSink<W> {
    fn new(writer: W) -> Self {
        Self(Rc::new(RefCell::new(writer)))
    }
}

impl<W> Clone for SharedSink<W> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<W: Write> Write for SharedSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.borrow_mut().flush()
    }
}

impl<W: Seek> Seek for SharedSink<W> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.0.borrow_mut().seek(pos)
    }
}

impl<W: Seek> SharedSink<W> {
    fn stream_position(&self) -> io::Result<u64> {
        self.0.borrow_mut().stream_position()
    }
}

struct TableInfo {
    offset: i64,
    length: i64,
    content_type: ContentType,
}

/// Writer for one combined POD5 file.
pub struct Pod5Writer<W: Write + Seek> {
    sink: SharedSink<W>,
    signal_writer: SignalTableWriter<W>,
    read_writer: ReadTableWriter,
    pore_writer: PoreWriter,
    end_reason_writer: EndReasonWriter,
    run_info_writer: RunInfoWriter,
    options: WriterOptions,
    file_identifier: Uuid,
    section_marker: Uuid,
    signal_table_start: u64,
    tables: Vec<TableInfo>,
    finished: bool,
}

impl Pod5Writer<BufWriter<File>> {
    /// Create a combined file at `path`.
    pub fn create(path: impl AsRef<Path>, options: WriterOptions) -> Result<Self> {
        let file = File::create(path)?;
        Self::from_writer(BufWriter::new(file), options)
    }
}

impl<W: Write + Seek> Pod5Writer<W> {
    /// Start a combined file on an arbitrary sink. Writes the signature and
    /// the opening section marker immediately.
    pub fn from_writer(writer: W, options: WriterOptions) -> Result<Self> {
        let file_identifier = Uuid::new_v4();
        let section_marker = Uuid::new_v4();
        let mut sink = SharedSink::new(writer);

        sink.write_all(&FILE_SIGNATURE)?;
        sink.write_all(section_marker.as_bytes())?;
        let signal_table_start = sink.stream_position()?;

        let metadata =
            SchemaMetadata::new(file_identifier, options.software_name.clone()).to_metadata()?;
        let signal_writer = SignalTableWriter::new(
            sink.clone(),
            metadata.clone(),
            options.signal_type,
            options.signal_table_batch_size.max(1),
        )?;
        let read_writer = ReadTableWriter::new(metadata, options.read_table_batch_size);

        debug!("created combined writer with file identifier {file_identifier}");
        Ok(Self {
            sink,
            signal_writer,
            read_writer,
            pore_writer: PoreWriter::default(),
            end_reason_writer: EndReasonWriter::default(),
            run_info_writer: RunInfoWriter::default(),
            options,
            file_identifier,
            section_marker,
            signal_table_start,
            tables: Vec::new(),
            finished: false,
        })
    }

    /// Identifier written into both sub-files and the footer.
    pub fn file_identifier(&self) -> Uuid {
        self.file_identifier
    }

    pub fn signal_type(&self) -> SignalType {
        self.signal_writer.signal_type()
    }

    /// Intern a pore type, returning its dictionary index.
    pub fn add_pore_type(&mut self, pore_type: &str) -> Result<i16> {
        self.pore_writer.add(pore_type)
    }

    /// Intern an end reason, returning its dictionary index.
    pub fn add_end_reason(&mut self, end_reason: EndReason) -> Result<i16> {
        self.end_reason_writer.add(end_reason)
    }

    /// Intern a run info, returning its dictionary index. Run infos are
    /// deduplicated by acquisition id.
    pub fn add_run_info(&mut self, run_info: &RunInfoData) -> Result<i16> {
        self.run_info_writer.add(run_info)
    }

    fn signal_chunk_size(&self) -> usize {
        if self.options.max_signal_chunk_size == 0 {
            DEFAULT_SIGNAL_CHUNK_SIZE
        } else {
            self.options.max_signal_chunk_size
        }
    }

    fn check_read_data(&self, read_data: &ReadData) -> Result<()> {
        check_dict_index(
            read_data.pore_type,
            self.pore_writer.item_count(),
            "pore type",
        )?;
        check_dict_index(
            read_data.end_reason,
            self.end_reason_writer.item_count(),
            "end reason",
        )?;
        check_dict_index(
            read_data.run_info,
            self.run_info_writer.item_count(),
            "run info",
        )
    }

    /// Append one read: the samples are split into chunks of at most the
    /// configured chunk size, each chunk becomes one signal row, and the
    /// read row referencing those rows is appended last.
    pub fn add_read(&mut self, read_data: &ReadData, samples: &[i16]) -> Result<()> {
        if self.finished {
            return Err(Pod5Error::WriterClosed);
        }
        self.check_read_data(read_data)?;

        let chunk_size = self.signal_chunk_size();
        let mut signal_rows: Vec<SignalTableRowIndex> =
            Vec::with_capacity(samples.len().div_ceil(chunk_size));
        for chunk in samples.chunks(chunk_size) {
            signal_rows.push(self.signal_writer.add_signal(&read_data.read_id, chunk)?);
        }
        self.read_writer
            .add_read(read_data, &signal_rows, samples.len() as u64)?;
        Ok(())
    }

    /// Append one read whose signal chunks were compressed by the caller.
    /// Chunks and their sample counts run in parallel, in sample order.
    pub fn add_read_pre_compressed(
        &mut self,
        read_data: &ReadData,
        signal_chunks: &[&[u8]],
        sample_counts: &[u32],
    ) -> Result<()> {
        if self.finished {
            return Err(Pod5Error::WriterClosed);
        }
        if signal_chunks.len() != sample_counts.len() {
            return Err(Pod5Error::invalid_argument(format!(
                "{} signal chunks with {} sample counts",
                signal_chunks.len(),
                sample_counts.len()
            )));
        }
        self.check_read_data(read_data)?;

        let mut signal_rows = Vec::with_capacity(signal_chunks.len());
        let mut signal_duration = 0u64;
        for (chunk, &count) in signal_chunks.iter().zip(sample_counts) {
            signal_rows.push(self.signal_writer.add_pre_compressed_signal(
                &read_data.read_id,
                chunk,
                count,
            )?);
            signal_duration += count as u64;
        }
        self.read_writer
            .add_read(read_data, &signal_rows, signal_duration)?;
        Ok(())
    }

    fn pad_to_alignment(&mut self) -> Result<u64> {
        let position = self.sink.stream_position()?;
        let padding = (8 - position % 8) % 8;
        if padding > 0 {
            self.sink.write_all(&[0u8; 8][..padding as usize])?;
        }
        Ok(position + padding)
    }

    fn end_table(&mut self, start: u64, content_type: ContentType) -> Result<()> {
        let end = self.sink.stream_position()?;
        self.pad_to_alignment()?;
        let marker = self.section_marker;
        self.sink.write_all(marker.as_bytes())?;
        self.tables.push(TableInfo {
            offset: start as i64,
            length: (end - start) as i64,
            content_type,
        });
        Ok(())
    }

    /// Seal all three tables, write the footer and the closing signature.
    pub fn close(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        // Signal first: its rows must reach the file before any read rows
        // referencing them exist anywhere.
        self.signal_writer.close()?;
        self.end_table(self.signal_table_start, ContentType::SignalTable)?;

        let reads_start = self.sink.stream_position()?;
        self.read_writer.write_to(
            self.sink.clone(),
            &self.pore_writer,
            &self.end_reason_writer,
            &self.run_info_writer,
        )?;
        self.end_table(reads_start, ContentType::ReadsTable)?;

        let run_info_start = self.sink.stream_position()?;
        self.write_run_info_table()?;
        self.end_table(run_info_start, ContentType::RunInfoTable)?;

        self.write_footer()?;
        self.sink.flush()?;
        debug!("combined file {} closed", self.file_identifier);
        Ok(())
    }

    fn write_run_info_table(&mut self) -> Result<()> {
        let metadata = SchemaMetadata::new(self.file_identifier, self.options.software_name.clone())
            .to_metadata()?;
        let schema = run_info_table::writer_schema(metadata);
        let mut writer = FileWriter::try_new(
            self.sink.clone(),
            schema,
            None,
            IpcWriteOptions { compression: None },
        )?;
        let chunks = run_info_table::build_chunks(
            self.run_info_writer.rows(),
            self.options.read_table_batch_size.max(1),
        )?;
        for chunk in &chunks {
            writer.write(chunk, None)?;
        }
        writer.finish()?;
        Ok(())
    }

    fn write_footer(&mut self) -> Result<()> {
        self.sink.write_all(&FOOTER_MAGIC)?;
        let footer = self.build_footer();
        let footer_start = self.sink.stream_position()?;
        self.sink.write_all(&footer)?;
        // The recorded length covers the alignment padding too; trailing
        // zeros are invisible to the flatbuffer root.
        let footer_end = self.pad_to_alignment()?;
        self.sink
            .write_all(&((footer_end - footer_start) as i64).to_le_bytes())?;
        let marker = self.section_marker;
        self.sink.write_all(marker.as_bytes())?;
        self.sink.write_all(&FILE_SIGNATURE)?;
        Ok(())
    }

    fn build_footer(&self) -> Vec<u8> {
        let mut builder = FlatBufferBuilder::new();
        let mut tables = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            let efile_args = EmbeddedFileArgs {
                offset: table.offset,
                length: table.length,
                format: Format::FeatherV2,
                content_type: table.content_type,
            };
            tables.push(EmbeddedFile::create(&mut builder, &efile_args));
        }
        let contents = Some(builder.create_vector(&tables));

        let file_identifier = builder.create_string(&self.file_identifier.to_string());
        let software = builder.create_string(&self.options.software_name);
        let pod5_version = builder.create_string(&WRITTEN_POD5_VERSION.to_string());

        let fbtable = Footer::create(
            &mut builder,
            &FooterArgs {
                file_identifier: Some(file_identifier),
                software: Some(software),
                pod5_version: Some(pod5_version),
                contents,
            },
        );

        builder.finish_minimal(fbtable);
        builder.finished_data().to_vec()
    }
}

impl<W: Write + Seek> Drop for Pod5Writer<W> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.close();
        }
    }
}

fn check_dict_index(index: i16, item_count: usize, what: &str) -> Result<()> {
    if index < 0 || index as usize >= item_count {
        return Err(Pod5Error::invalid_argument(format!(
            "Read refers to {what} dictionary entry {index}, but only {item_count} exist"
        )));
    }
    Ok(())
}
