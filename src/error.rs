use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the sequencer engine and its components.
///
/// The engine loop treats `LabelNotFound`/`OffsetNotFound`/`SlotMissing` as
/// recoverable (logged, playback continues); `PresetTypeMismatch` aborts the
/// load that raised it and `NoPorts` aborts engine startup.
#[derive(Debug, Error)]
pub enum SeqError {
    #[error("label {0} not found")]
    LabelNotFound(String),

    #[error("offset {0} not found")]
    OffsetNotFound(String),

    #[error("{path}: not a valid {expected} document: {reason}")]
    PresetTypeMismatch {
        expected: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("could not serialize preset {0}")]
    PresetWrite(String),

    #[error("no usable MIDI ports")]
    NoPorts,

    #[error("no populated slot on this axis")]
    SlotMissing,

    #[error("MIDI driver: {0}")]
    Driver(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SeqError>;
