use std::path::PathBuf;

use anyhow::Error;

/// Failures surfaced by ingestion, the frame store, and playback.
#[derive(Debug, thiserror::Error)]
pub enum SqlStreamError {
    #[error("source '{source_label}' could not be opened: {reason}")]
    SourceUnavailable {
        source_label: String,
        reason: String,
    },

    #[error("Database file {} not found.", .path.display())]
    MissingPersistedStore { path: PathBuf },

    #[error("playback interrupted after {ticks} tick(s)")]
    InterruptedPlayback { ticks: u64 },

    #[error("ingestion interrupted after {frames} frame(s); nothing was committed")]
    InterruptedIngest { frames: u32 },

    #[error("frame {frame_id} is incomplete: expected lines 0..{expected}, {detail}")]
    ArchiveIncomplete {
        frame_id: u32,
        expected: u32,
        detail: String,
    },

    #[error("frame {frame_id} is not in the archive (last archived frame: {last:?})")]
    FrameNotArchived { frame_id: u32, last: Option<u32> },

    #[error("frame archive already holds {frames} frame(s); it is written once per session")]
    ArchiveAlreadyCommitted { frames: u32 },

    #[error("display row {line_no} has no content")]
    MirrorRowMissing { line_no: u32 },

    #[error("density ramp must have exactly {expected} characters, got {actual}")]
    InvalidRamp { expected: usize, actual: usize },

    #[error("display dimensions must be > 0, got {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("source frame has no pixels ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    #[error("target fps must be > 0")]
    InvalidFps,

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = SqlStreamError> = std::result::Result<T, E>;

impl SqlStreamError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::MissingPersistedStore { .. } => 4,
            Self::SourceUnavailable { .. } => 3,
            Self::InterruptedPlayback { .. } | Self::InterruptedIngest { .. } => 130,
            _ => 1,
        }
    }
}

pub fn find_sqlstream_error(error: &Error) -> Option<&SqlStreamError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<SqlStreamError>())
}
