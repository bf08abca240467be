//! Reading and writing POD5 files.
//!
//! POD5 is a columnar container for nanopore sequencing reads: per-read
//! metadata in a read table, signal sample chunks in a parallel signal
//! table, both stored as Arrow IPC files embedded in a self-describing
//! outer envelope. Signal chunks are VBZ compressed by default (delta +
//! zig-zag + stream-vbyte-16 + zstd).
//!
//! Writing:
//!
//! ```no_run
//! use pod5_format::{EndReason, Pod5Writer, ReadData, RunInfoData, WriterOptions};
//! use uuid::Uuid;
//!
//! # fn main() -> Result<(), pod5_format::Pod5Error> {
//! let mut writer = Pod5Writer::create("reads.pod5", WriterOptions::default())?;
//! let pore_type = writer.add_pore_type("r10_4_1")?;
//! let end_reason = writer.add_end_reason(EndReason::SignalPositive)?;
//! let run_info = writer.add_run_info(&RunInfoData {
//!     acquisition_id: "acq-1".to_string(),
//!     sample_rate: 4000,
//!     ..RunInfoData::default()
//! })?;
//! let read = ReadData {
//!     read_id: Uuid::new_v4(),
//!     read_number: 1,
//!     start_sample: 0,
//!     median_before: 220.5,
//!     num_minknow_events: 0,
//!     tracked_scaling_scale: 1.0,
//!     tracked_scaling_shift: 0.0,
//!     predicted_scaling_scale: 1.0,
//!     predicted_scaling_shift: 0.0,
//!     num_reads_since_mux_change: 0,
//!     time_since_mux_change: 0.0,
//!     channel: 42,
//!     well: 1,
//!     pore_type,
//!     calibration_offset: -264.0,
//!     calibration_scale: 0.187,
//!     end_reason,
//!     end_reason_forced: false,
//!     run_info,
//! };
//! writer.add_read(&read, &[10, 12, 9, 8, 40])?;
//! writer.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! Reading:
//!
//! ```no_run
//! # fn main() -> Result<(), pod5_format::Pod5Error> {
//! let mut reader = pod5_format::Pod5Reader::open_combined("reads.pod5")?;
//! for batch in 0..reader.num_read_record_batches() {
//!     for row in 0..reader.read_batch_num_rows(batch)? {
//!         let record = reader.read_record(batch, row)?;
//!         let samples = reader.read_record_signal(&record)?;
//!         println!("{}: {} samples", record.read_id, samples.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod compression;
mod dictionary;
mod error;
mod footer;
#[allow(clippy::all)]
mod footer_generated;
mod read_table;
mod reader;
mod records;
pub mod recovery;
mod run_info_table;
mod schema;
mod search;
mod signal_table;
pub mod svb16;
mod table_reader;
mod types;
mod writer;

pub use error::{Pod5Error, Result};
pub use footer::{EmbeddedFileInfo, ParsedFooter, FILE_SIGNATURE};
pub use read_table::{read_table_version_for_file, ReadRecord, RunInfoReference};
pub use reader::Pod5Reader;
pub use records::{
    CalibrationData, EndReason, EndReasonData, PoreData, ReadData, RunInfoData, RunInfoMap,
    SignalTableRowIndex,
};
pub use recovery::{recover_read_table, recover_signal_table, RecoveredData};
pub use schema::{SchemaMetadata, TableSpecVersion, Version, WRITTEN_POD5_VERSION};
pub use search::{TraversalPlan, TraversalStep};
pub use signal_table::SignalType;
pub use types::{
    is_uuid_type, is_vbz_signal_type, register_extension_types, registered_extension_type,
    uuid_type, vbz_signal_type, ExtensionRegistration, UUID_EXTENSION_NAME, VBZ_EXTENSION_NAME,
};
pub use writer::{Pod5Writer, WriterOptions, DEFAULT_SIGNAL_CHUNK_SIZE};
