//! Error types.
use std::io;

use flatbuffers::InvalidFlatbuffer;

/// Result alias used across the crate.
pub type Result<T, E = Pod5Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Pod5Error {
    /// Reason why flatbuffers failed to parse the footer
    #[error("Failed to parse footer, {0}")]
    FooterParserFailure(#[from] InvalidFlatbuffer),

    /// The signature at the beginning or ending of the file wasn't able to be
    /// verified. This may mean that the file was corrupted or incorrectly
    /// written.
    #[error("Failed to verify signature: {0}")]
    SignatureFailure(&'static str),

    #[error("{0}")]
    IOError(#[from] io::Error),

    #[error("{0}")]
    ArrowError(#[from] arrow2::error::Error),

    #[error("Missing list of embedded files from footer, footer is likely improperly constructed or pod5 is empty")]
    ContentsMissing,

    #[error("Missing Signal table from POD5")]
    SignalTableMissing,

    #[error("Missing Read table from POD5")]
    ReadTableMissing,

    #[error("Missing Run Info table from POD5")]
    RunInfoTableMissing,

    /// A caller-supplied value was rejected before any I/O happened.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A table schema did not contain a required field, or a field had an
    /// unexpected Arrow type.
    #[error("Schema type error: {0}")]
    SchemaTypeError(String),

    /// Cross-file or cross-table invariants do not hold, e.g. the read and
    /// signal tables carry different file identifiers.
    #[error("File consistency error: {0}")]
    ConsistencyError(String),

    /// The VBZ payload could not be decoded back into samples.
    #[error("Signal codec error: {0}")]
    CodecError(String),

    #[error("Writer has already been closed")]
    WriterClosed,
}

impl Pod5Error {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Pod5Error::InvalidArgument(msg.into())
    }

    pub(crate) fn schema_type(msg: impl Into<String>) -> Self {
        Pod5Error::SchemaTypeError(msg.into())
    }

    pub(crate) fn consistency(msg: impl Into<String>) -> Self {
        Pod5Error::ConsistencyError(msg.into())
    }

    pub(crate) fn codec(msg: impl Into<String>) -> Self {
        Pod5Error::CodecError(msg.into())
    }
}
