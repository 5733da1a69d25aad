use std::io;
use std::path::PathBuf;

use patchsynth::SynthError;

/// A single malformed patch definition line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("expected 17 or 18 fields, found {0}")]
    FieldCount(usize),

    #[error("field {field} ({name}): {reason}")]
    InvalidField {
        field: usize,
        name: &'static str,
        reason: String,
    },

    #[error("note range {low}..={high} is empty or outside 0..=127")]
    NoteRange { low: u8, high: u8 },
}

/// Represents an error when loading patches.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("line {line}: {source}")]
    Record { line: usize, source: RecordError },

    #[error("sample `{0}` was not found")]
    MissingSample(String),

    #[error("sample `{name}` could not be decoded")]
    Sample {
        name: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Synth(#[from] SynthError),

    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}
