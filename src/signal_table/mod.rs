//! The signal table: one row per chunk of a read's samples.

mod reader;
mod schema;
mod writer;

pub use schema::SignalType;
pub(crate) use reader::SignalTableReader;
pub(crate) use writer::SignalTableWriter;
