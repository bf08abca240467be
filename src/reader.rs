//! Reading POD5 files.

use std::fs::File;
use std::path::Path;

use log::debug;
use memmap2::MmapOptions;
use uuid::Uuid;

use crate::error::{Pod5Error, Result};
use crate::footer::{EmbeddedFileInfo, ParsedFooter, FILE_SIGNATURE};
use crate::read_table::{ReadRecord, ReadTableReader, RunInfoReference};
use crate::records::{RunInfoData, SignalTableRowIndex};
use crate::run_info_table::RunInfoTableReader;
use crate::schema::SchemaMetadata;
use crate::search::{search_for_read_ids, TraversalPlan};
use crate::signal_table::{SignalTableReader, SignalType};
use crate::table_reader::{SharedBytes, SubFile, TableReader};

/// Reader over one POD5 dataset: a combined file, or a split
/// signal/reads file pair.
pub struct Pod5Reader {
    footer_identifier: Option<Uuid>,
    read_table_location: Option<EmbeddedFileInfo>,
    signal_table_location: Option<EmbeddedFileInfo>,
    read_reader: ReadTableReader,
    signal_reader: SignalTableReader,
    run_info_reader: Option<RunInfoTableReader>,
}

fn map_file(path: &Path) -> Result<SharedBytes> {
    let file = File::open(path)?;
    let map = unsafe { MmapOptions::new().map(&file)? };
    Ok(SharedBytes::from_mmap(map))
}

fn check_signatures(bytes: &SharedBytes) -> Result<()> {
    let data = bytes.as_slice();
    if data.len() < FILE_SIGNATURE.len() * 2 || data[..8] != FILE_SIGNATURE {
        return Err(Pod5Error::SignatureFailure("Start"));
    }
    if data[data.len() - 8..] != FILE_SIGNATURE {
        return Err(Pod5Error::SignatureFailure("End"));
    }
    Ok(())
}

impl Pod5Reader {
    /// Memory-map and open a combined file.
    pub fn open_combined(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_shared(map_file(path.as_ref())?)
    }

    /// Open a combined file already held in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_shared(SharedBytes::from_vec(bytes))
    }

    fn from_shared(bytes: SharedBytes) -> Result<Self> {
        check_signatures(&bytes)?;
        let footer = ParsedFooter::read_footer(SubFile::full(bytes.clone()))?;
        let footer_identifier = footer.file_identifier()?;
        debug!("opening combined file {footer_identifier}");

        let reads = footer.read_table()?;
        let read_reader = ReadTableReader::new(TableReader::open(
            SubFile::new(bytes.clone(), reads.0.offset, reads.0.length)?,
            Pod5Error::ReadTableMissing,
        )?)?;

        let signal = footer.signal_table()?;
        let signal_reader = SignalTableReader::new(TableReader::open(
            SubFile::new(bytes.clone(), signal.0.offset, signal.0.length)?,
            Pod5Error::SignalTableMissing,
        )?)?;

        let run_info_reader = footer
            .run_info_table()?
            .map(|table| -> Result<RunInfoTableReader> {
                RunInfoTableReader::new(TableReader::open(
                    SubFile::new(bytes.clone(), table.0.offset, table.0.length)?,
                    Pod5Error::RunInfoTableMissing,
                )?)
            })
            .transpose()?;

        let reader = Self {
            footer_identifier: Some(footer_identifier),
            read_table_location: Some(reads.0),
            signal_table_location: Some(signal.0),
            read_reader,
            signal_reader,
            run_info_reader,
        };
        reader.check_file_identifiers()?;
        Ok(reader)
    }

    /// Open a split pair of standalone Arrow files.
    pub fn open_split(
        signal_path: impl AsRef<Path>,
        reads_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let read_reader = ReadTableReader::new(TableReader::open(
            SubFile::full(map_file(reads_path.as_ref())?),
            Pod5Error::ReadTableMissing,
        )?)?;
        let signal_reader = SignalTableReader::new(TableReader::open(
            SubFile::full(map_file(signal_path.as_ref())?),
            Pod5Error::SignalTableMissing,
        )?)?;
        let reader = Self {
            footer_identifier: None,
            read_table_location: None,
            signal_table_location: None,
            read_reader,
            signal_reader,
            run_info_reader: None,
        };
        reader.check_file_identifiers()?;
        Ok(reader)
    }

    fn check_file_identifiers(&self) -> Result<()> {
        let reads_identifier = self.read_reader.schema_metadata().file_identifier;
        let signal_identifier = self.signal_reader.schema_metadata().file_identifier;
        if signal_identifier != reads_identifier {
            return Err(Pod5Error::consistency(format!(
                "Invalid read and signal file pair signal identifier: {signal_identifier}, \
                 reads identifier: {reads_identifier}"
            )));
        }
        if let Some(footer_identifier) = self.footer_identifier {
            if footer_identifier != reads_identifier {
                return Err(Pod5Error::consistency(format!(
                    "Footer identifier {footer_identifier} does not match table identifier \
                     {reads_identifier}"
                )));
            }
        }
        if let Some(run_info) = &self.run_info_reader {
            let run_info_identifier = run_info.table().schema_metadata().file_identifier;
            if run_info_identifier != reads_identifier {
                return Err(Pod5Error::consistency(format!(
                    "Run info identifier {run_info_identifier} does not match table identifier \
                     {reads_identifier}"
                )));
            }
        }
        Ok(())
    }

    /// The file identifier shared by the sub-files and the footer.
    pub fn file_identifier(&self) -> Uuid {
        self.read_reader.schema_metadata().file_identifier
    }

    /// Schema metadata of the read table.
    pub fn schema_metadata(&self) -> &SchemaMetadata {
        self.read_reader.schema_metadata()
    }

    pub fn signal_type(&self) -> SignalType {
        self.signal_reader.signal_type()
    }

    /// Byte window of the read table inside a combined file.
    pub fn read_table_location(&self) -> Option<EmbeddedFileInfo> {
        self.read_table_location
    }

    /// Byte window of the signal table inside a combined file.
    pub fn signal_table_location(&self) -> Option<EmbeddedFileInfo> {
        self.signal_table_location
    }

    pub fn num_read_record_batches(&self) -> usize {
        self.read_reader.num_record_batches()
    }

    pub fn num_signal_record_batches(&self) -> usize {
        self.signal_reader.num_record_batches()
    }

    /// Rows in one read-table batch.
    pub fn read_batch_num_rows(&mut self, batch: usize) -> Result<usize> {
        Ok(self.read_reader.read_record_batch(batch)?.num_rows())
    }

    /// Total read count across all batches.
    pub fn num_reads(&mut self) -> Result<u64> {
        let mut total = 0u64;
        for batch in 0..self.num_read_record_batches() {
            total += self.read_batch_num_rows(batch)? as u64;
        }
        Ok(total)
    }

    /// Materialize one read row.
    pub fn read_record(&mut self, batch: usize, row: usize) -> Result<ReadRecord> {
        self.read_reader.read_record_batch(batch)?.read_record(row)
    }

    /// Materialize a read's full signal by visiting its signal rows in order.
    pub fn read_signal(&mut self, batch: usize, row: usize) -> Result<Vec<i16>> {
        let record = self.read_record(batch, row)?;
        self.read_record_signal(&record)
    }

    /// Materialize the signal of an already-fetched read record.
    pub fn read_record_signal(&mut self, record: &ReadRecord) -> Result<Vec<i16>> {
        let sample_count = self
            .signal_reader
            .extract_sample_count(&record.signal_rows)?;
        let mut samples = vec![0i16; sample_count as usize];
        self.signal_reader
            .extract_samples(&record.signal_rows, &mut samples)?;
        Ok(samples)
    }

    /// Total samples across the given signal rows.
    pub fn extract_sample_count(&mut self, rows: &[SignalTableRowIndex]) -> Result<u64> {
        self.signal_reader.extract_sample_count(rows)
    }

    /// The read id denormalized onto one signal row.
    pub fn signal_row_read_id(&mut self, row: SignalTableRowIndex) -> Result<Uuid> {
        self.signal_reader.read_id_for_row(row)
    }

    /// Decode the given signal rows, in order, into `out`.
    pub fn extract_samples(
        &mut self,
        rows: &[SignalTableRowIndex],
        out: &mut [i16],
    ) -> Result<()> {
        self.signal_reader.extract_samples(rows, out)
    }

    /// Plan an I/O-efficient traversal visiting the given read ids.
    pub fn plan_traversal(&mut self, read_ids: &[Uuid]) -> Result<TraversalPlan> {
        search_for_read_ids(&mut self.read_reader, read_ids)
    }

    /// Look up a run info by acquisition id in the run-info table.
    pub fn run_info(&mut self, acquisition_id: &str) -> Result<Option<RunInfoData>> {
        match &mut self.run_info_reader {
            Some(reader) => reader.find_by_acquisition_id(acquisition_id),
            None => Ok(None),
        }
    }

    /// Resolve a read record's run info, whichever schema variant the file
    /// uses.
    pub fn read_run_info(&mut self, record: &ReadRecord) -> Result<Option<RunInfoData>> {
        match &record.run_info {
            RunInfoReference::Data(data) => Ok(Some(data.as_ref().clone())),
            RunInfoReference::AcquisitionId(id) => self.run_info(id),
        }
    }
}
