//! The read table: one row per sequencing read, linking into the signal
//! table by row index.

mod reader;
mod schema;
mod writer;

pub use reader::{ReadRecord, RunInfoReference};
pub use schema::read_table_version_for_file;
pub(crate) use reader::ReadTableReader;
pub(crate) use writer::ReadTableWriter;
