// src/codec/mod.rs
//
// Record <-> text conversion. One record becomes one comma-separated line,
// one column per field of the record kind's layout.

mod layout;
mod text;

pub use layout::{
    global, install_global, FieldLayoutTable, FieldSpec, FieldType, LayoutError, RecordLayout,
};
pub use text::{
    from_text, header_row, read_header_row, to_text, write_header_row, TextLogReader,
    TextLogWriter,
};

use thiserror::Error;

use crate::record::RecordError;

/// Column delimiter of the text form.
pub const DELIMITER: char = ',';

/// Per-record/per-line failures. None of these poison a text file: readers
/// report the failing line and carry on with the next.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("no layout registered for record kind {0}")]
    UnknownKind(u32),

    #[error("column '{column}': cannot parse '{value}': {reason}")]
    ParseError {
        column: String,
        value: String,
        reason: String,
    },

    #[error("expected {expected} columns, found {found}")]
    ColumnCount { expected: usize, found: usize },

    #[error("record kind {found} written to a kind {expected} text log")]
    WrongKind { expected: u32, found: u32 },

    #[error("text source has no header row")]
    MissingHeader,

    #[error("line {line}: {source}")]
    AtLine {
        line: usize,
        #[source]
        source: Box<CodecError>,
    },

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Whether a reader can skip the failing line and keep going.
    pub fn is_line_error(&self) -> bool {
        match self {
            CodecError::AtLine { source, .. } => source.is_line_error(),
            CodecError::Io(_) | CodecError::MissingHeader | CodecError::Layout(_) => false,
            _ => true,
        }
    }
}
