//! Recovery of table data from combined files with a missing or corrupt
//! footer.
//!
//! The embedded sub-files are self-describing Arrow files, so the recovery
//! path does not need the footer at all: it scans forward from the outer
//! header for the Arrow file magic, opens the embedded stream behind it and
//! copies record batches into a fresh standalone Arrow file until the stream
//! ends or a batch fails to load.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use arrow2::datatypes::Schema;
use arrow2::io::ipc::read::{read_stream_metadata, StreamReader, StreamState};
use arrow2::io::ipc::write::{FileWriter, WriteOptions};
use log::{debug, warn};
use memmap2::MmapOptions;

use crate::error::{Pod5Error, Result};
use crate::footer::FILE_SIGNATURE;
use crate::schema::SchemaMetadata;
use crate::table_reader::{SharedBytes, SubFile};

const ARROW_MAGIC: &[u8; 6] = b"ARROW1";

/// Outcome of a recovery pass over one embedded table.
#[derive(Debug)]
pub struct RecoveredData {
    /// Complete batches copied into the destination file.
    pub recovered_batches: usize,
    /// Rows across the recovered batches.
    pub recovered_rows: usize,
    /// Why consumption stopped, when the stream did not end cleanly.
    pub failed_batch_error: Option<String>,
    /// Metadata of the recovered table's schema.
    pub metadata: SchemaMetadata,
}

/// Recover the read table of a damaged combined file into a standalone
/// Arrow file at `dest`.
pub fn recover_read_table(src: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<RecoveredData> {
    recover_table(src.as_ref(), dest.as_ref(), |schema| {
        has_field(schema, "read_number") && has_field(schema, "signal")
    })
    .map_err(|e| match e {
        Pod5Error::SignalTableMissing => Pod5Error::ReadTableMissing,
        other => other,
    })
}

/// Recover the signal table of a damaged combined file into a standalone
/// Arrow file at `dest`.
pub fn recover_signal_table(
    src: impl AsRef<Path>,
    dest: impl AsRef<Path>,
) -> Result<RecoveredData> {
    recover_table(src.as_ref(), dest.as_ref(), |schema| {
        has_field(schema, "samples") && !has_field(schema, "read_number")
    })
}

fn has_field(schema: &Schema, name: &str) -> bool {
    schema.fields.iter().any(|f| f.name == name)
}

fn recover_table(
    src: &Path,
    dest: &Path,
    wanted: impl Fn(&Schema) -> bool,
) -> Result<RecoveredData> {
    let file = File::open(src)?;
    let map = unsafe { MmapOptions::new().map(&file)? };
    let bytes = SharedBytes::from_mmap(map);

    let data = bytes.as_slice();
    if data.len() < FILE_SIGNATURE.len() || data[..8] != FILE_SIGNATURE {
        return Err(Pod5Error::SignatureFailure("Start"));
    }

    // Sub-files start on 8-byte boundaries after the header; probe each
    // aligned Arrow magic until one holds the table we want.
    let header_length = FILE_SIGNATURE.len() + 16;
    let mut candidate = header_length;
    while candidate + ARROW_MAGIC.len() <= data.len() {
        if &data[candidate..candidate + ARROW_MAGIC.len()] == ARROW_MAGIC {
            let stream_start = (candidate + 8) as u64;
            let mut reader =
                SubFile::new(bytes.clone(), stream_start, bytes.len() as u64 - stream_start)?;
            match read_stream_metadata(&mut reader) {
                Ok(stream_metadata) if wanted(&stream_metadata.schema) => {
                    debug!("recovering table found at offset {candidate}");
                    return copy_stream(reader, stream_metadata, dest);
                }
                Ok(_) => {}
                Err(_) => {}
            }
        }
        candidate += 8;
    }

    Err(Pod5Error::SignalTableMissing)
}

fn copy_stream(
    reader: SubFile,
    stream_metadata: arrow2::io::ipc::read::StreamMetadata,
    dest: &Path,
) -> Result<RecoveredData> {
    let metadata = SchemaMetadata::from_metadata(&stream_metadata.schema.metadata)?;
    let mut recovered = RecoveredData {
        recovered_batches: 0,
        recovered_rows: 0,
        failed_batch_error: None,
        metadata,
    };

    let sink = BufWriter::new(File::create(dest)?);
    let mut writer = FileWriter::try_new(
        sink,
        stream_metadata.schema.clone(),
        None,
        WriteOptions { compression: None },
    )?;

    let mut stream = StreamReader::new(reader, stream_metadata, None);
    loop {
        match stream.next() {
            None => break,
            Some(Ok(StreamState::Some(chunk))) => {
                recovered.recovered_batches += 1;
                recovered.recovered_rows += chunk.len();
                writer.write(&chunk, None)?;
            }
            Some(Ok(StreamState::Waiting)) => {
                warn!("recovery stream truncated mid-message");
                recovered.failed_batch_error =
                    Some("stream ended inside an unfinished message".to_string());
                break;
            }
            Some(Err(e)) => {
                warn!("recovery stream failed: {e}");
                recovered.failed_batch_error = Some(e.to_string());
                break;
            }
        }
    }
    writer.finish()?;
    debug!(
        "recovered {} batches ({} rows)",
        recovered.recovered_batches, recovered.recovered_rows
    );
    Ok(recovered)
}
