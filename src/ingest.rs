use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::decoding::FrameSource;
use crate::encoder::encode_frame;
use crate::error::SqlStreamError;
use crate::session::SessionContext;
use crate::store::{ArchivedLine, FrameStore};

const PROGRESS_EVERY_FRAMES: u32 = 30;

#[derive(Debug, Clone, Copy)]
pub struct IngestArgs {
    pub duration_seconds: f64,
    pub target_fps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub frames: u32,
    pub max_frames: u32,
    pub rows: usize,
}

/// Frames to decode: the clip duration at the source's own rate, falling back
/// to the playback rate when the container reports none.
pub fn frame_budget(native_fps: Option<f64>, args: IngestArgs) -> u32 {
    let fps = native_fps
        .filter(|fps| fps.is_finite() && *fps > 0.0)
        .unwrap_or(args.target_fps as f64);
    (fps * args.duration_seconds).max(0.0) as u32
}

/// Encodes up to the frame budget from `source` and commits every line to
/// `store` in one batch. The store is reset first; nothing is archived if
/// decoding fails or `cancel` is raised.
pub fn run_ingest(
    store: &mut FrameStore,
    source: &mut dyn FrameSource,
    context: &SessionContext,
    args: IngestArgs,
    cancel: &AtomicBool,
) -> Result<IngestSummary> {
    if args.target_fps == 0 {
        return Err(SqlStreamError::InvalidFps.into());
    }
    if !args.duration_seconds.is_finite() || args.duration_seconds < 0.0 {
        bail!("--duration must be >= 0");
    }

    store
        .reset(context.height())
        .context("failed to prepare frame store")?;

    let max_frames = frame_budget(source.native_fps(), args);
    let mut batch = Vec::new();
    let mut frame_id = 0_u32;

    while frame_id < max_frames {
        if cancel.load(Ordering::SeqCst) {
            return Err(SqlStreamError::InterruptedIngest { frames: frame_id }.into());
        }
        let decoded = match source.next_frame() {
            // The decoder shares our process group, so Ctrl-C can kill it first.
            Err(_) if cancel.load(Ordering::SeqCst) => {
                return Err(SqlStreamError::InterruptedIngest { frames: frame_id }.into());
            }
            result => result.with_context(|| format!("failed to decode frame {frame_id}"))?,
        };
        let Some(frame) = decoded else {
            break;
        };

        let lines = encode_frame(&frame, context)
            .with_context(|| format!("failed to encode frame {frame_id}"))?;
        batch.extend(
            lines
                .into_iter()
                .enumerate()
                .map(|(line_no, content)| ArchivedLine::new(frame_id, line_no as u32, content)),
        );

        frame_id += 1;
        if frame_id % PROGRESS_EVERY_FRAMES == 0 {
            info!("Buffering frames: {frame_id}/{max_frames}");
        }
    }
    if cancel.load(Ordering::SeqCst) {
        return Err(SqlStreamError::InterruptedIngest { frames: frame_id }.into());
    }

    store
        .ingest_batch(&batch)
        .context("failed to commit frame archive")?;
    info!("Ingestion complete. {frame_id} frames committed to SQLite.");

    Ok(IngestSummary {
        frames: frame_id,
        max_frames,
        rows: batch.len(),
    })
}
