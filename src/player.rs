use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::{info, trace, warn};

use crate::error::{Result, SqlStreamError};
use crate::store::FrameStore;

pub const CURSOR_HOME: &str = "\x1b[H";
pub const STATUS_FILL: char = '=';

#[derive(Debug, Clone, Copy)]
pub struct PlaybackArgs {
    pub target_fps: u32,
    /// Terminal width the status line is centered in.
    pub columns: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSummary {
    pub ticks: u64,
    pub last_frame: Option<u32>,
    pub row_updates: u64,
    /// SHA-256 over every byte written, tick by tick.
    pub output_digest: String,
}

#[derive(Debug, Clone, Copy)]
pub struct FramePacer {
    budget: Duration,
}

impl FramePacer {
    pub fn new(target_fps: u32) -> Result<Self> {
        if target_fps == 0 {
            return Err(SqlStreamError::InvalidFps);
        }
        Ok(Self {
            budget: Duration::from_secs_f64(1.0 / target_fps as f64),
        })
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Sleep owed after a tick that took `elapsed`. Late ticks owe nothing.
    pub fn remaining(&self, elapsed: Duration) -> Duration {
        self.budget.saturating_sub(elapsed)
    }
}

/// Plays every archived frame once, in order, at `args.target_fps`.
///
/// Each tick re-synchronizes the display mirror from the archive, reads it
/// back, and writes it to `out`. `cancel` is checked between ticks.
pub fn run_playback<W: Write>(
    store: &mut FrameStore,
    out: &mut W,
    args: PlaybackArgs,
    cancel: &AtomicBool,
) -> Result<PlaybackSummary> {
    let pacer = FramePacer::new(args.target_fps)?;
    let mut hasher = Sha256::new();
    let mut summary = PlaybackSummary {
        ticks: 0,
        last_frame: None,
        row_updates: 0,
        output_digest: String::new(),
    };

    let Some(total) = store.max_frame_id()? else {
        warn!("frame archive is empty; nothing to play");
        summary.output_digest = format!("{:x}", hasher.finalize());
        return Ok(summary);
    };
    info!(
        frames = total as u64 + 1,
        fps = args.target_fps,
        height = store.height(),
        "playback started"
    );

    for frame_id in 0..=total {
        if cancel.load(Ordering::SeqCst) {
            return Err(SqlStreamError::InterruptedPlayback {
                ticks: summary.ticks,
            });
        }

        let started = Instant::now();
        let updated = store.sync_frame(frame_id)?;
        let lines = store.read_current()?;
        summary.row_updates += updated as u64;

        let status = status_line(frame_id, total, summary.row_updates, args.columns);
        let rendered = render_tick(&lines, &status);
        out.write_all(rendered.as_bytes())?;
        out.flush()?;
        hasher.update(rendered.as_bytes());

        summary.ticks += 1;
        summary.last_frame = Some(frame_id);

        let elapsed = started.elapsed();
        let delay = pacer.remaining(elapsed);
        trace!(frame_id, elapsed_us = elapsed.as_micros() as u64, "tick rendered");
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    summary.output_digest = format!("{:x}", hasher.finalize());
    info!(
        ticks = summary.ticks,
        row_updates = summary.row_updates,
        "playback finished"
    );
    Ok(summary)
}

/// Cursor home, the picture, then the status line on its own row.
pub fn render_tick(lines: &[String], status: &str) -> String {
    let picture_len = lines.iter().map(String::len).sum::<usize>() + lines.len();
    let mut output = String::with_capacity(CURSOR_HOME.len() + picture_len + status.len());
    output.push_str(CURSOR_HOME);
    output.push_str(&lines.join("\n"));
    output.push('\n');
    output.push_str(status);
    output
}

pub fn status_line(frame_id: u32, total: u32, row_updates: u64, columns: usize) -> String {
    let text = format!(
        " [ FRAME {}/{} | SQL UPDATES: {} ] ",
        frame_id,
        total,
        group_thousands(row_updates)
    );
    center_with_fill(&text, columns, STATUS_FILL)
}

/// Pads `text` on both sides to `width` characters. When the padding is odd
/// the extra fill goes on the left only if `width` is also odd.
pub fn center_with_fill(text: &str, width: usize, fill: char) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.to_owned();
    }
    let margin = width - len;
    let left = margin / 2 + (margin & width & 1);
    let right = margin - left;

    let mut output = String::with_capacity(text.len() + margin * fill.len_utf8());
    output.extend(std::iter::repeat(fill).take(left));
    output.push_str(text);
    output.extend(std::iter::repeat(fill).take(right));
    output
}

pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut output = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            output.push(',');
        }
        output.push(digit);
    }
    output
}

#[cfg(test)]
mod tests {
    use std::io::{self, Write};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::{
        center_with_fill, group_thousands, render_tick, run_playback, status_line, FramePacer,
        PlaybackArgs,
    };
    use crate::error::SqlStreamError;
    use crate::store::{archive_rows, FrameStore};

    fn store_with_frames(frames: &[&[&str]]) -> FrameStore {
        let height = frames.first().map(|frame| frame.len()).unwrap_or(1) as u32;
        let mut store = FrameStore::open_in_memory().expect("store");
        store.reset(height).expect("reset");
        let rows = archive_rows(frames.iter().map(|frame| {
            frame
                .iter()
                .map(|line| (*line).to_owned())
                .collect::<Vec<_>>()
        }));
        store.ingest_batch(&rows).expect("batch");
        store
    }

    fn args() -> PlaybackArgs {
        PlaybackArgs {
            target_fps: 1000,
            columns: 40,
        }
    }

    #[test]
    fn thousands_are_grouped_with_commas() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(1234567), "1,234,567");
    }

    #[test]
    fn centering_places_odd_padding_by_width_parity() {
        assert_eq!(center_with_fill("ab", 5, '='), "==ab=");
        assert_eq!(center_with_fill("abc", 6, '='), "=abc==");
        assert_eq!(center_with_fill(" ab ", 9, '='), "=== ab ==");
        assert_eq!(center_with_fill("abcdef", 4, '='), "abcdef");
    }

    #[test]
    fn status_line_spans_the_terminal_width() {
        let line = status_line(3, 9, 1200, 60);
        assert_eq!(line.chars().count(), 60);
        assert!(line.contains(" [ FRAME 3/9 | SQL UPDATES: 1,200 ] "));
        assert!(line.starts_with('='));
        assert!(line.ends_with('='));
    }

    #[test]
    fn tick_output_starts_at_cursor_home() {
        let lines = vec!["ab".to_owned(), "cd".to_owned()];
        assert_eq!(render_tick(&lines, "S"), "\x1b[Hab\ncd\nS");
    }

    #[test]
    fn pacer_owes_nothing_for_late_ticks() {
        let pacer = FramePacer::new(10).expect("pacer");
        assert_eq!(pacer.budget(), Duration::from_millis(100));
        assert_eq!(
            pacer.remaining(Duration::from_millis(30)),
            Duration::from_millis(70)
        );
        assert_eq!(pacer.remaining(Duration::from_millis(250)), Duration::ZERO);
        assert!(FramePacer::new(0).is_err());
    }

    #[test]
    fn playback_renders_every_frame_in_order() {
        let mut store = store_with_frames(&[&["a0", "a1"], &["b0", "b1"], &["c0", "c1"]]);
        let mut out = Vec::<u8>::new();
        let summary =
            run_playback(&mut store, &mut out, args(), &AtomicBool::new(false)).expect("play");

        assert_eq!(summary.ticks, 3);
        assert_eq!(summary.last_frame, Some(2));
        assert_eq!(summary.row_updates, 6);

        let text = String::from_utf8(out).expect("utf8");
        let ticks = text.split("\x1b[H").skip(1).collect::<Vec<_>>();
        assert_eq!(ticks.len(), 3);
        assert!(ticks[0].starts_with("a0\na1\n"));
        assert!(ticks[1].starts_with("b0\nb1\n"));
        assert!(ticks[2].starts_with("c0\nc1\n"));
        assert!(ticks[2].contains("FRAME 2/2 | SQL UPDATES: 6"));
    }

    #[test]
    fn empty_archive_plays_nothing() {
        let mut store = FrameStore::open_in_memory().expect("store");
        store.reset(2).expect("reset");
        let mut out = Vec::<u8>::new();
        let summary =
            run_playback(&mut store, &mut out, args(), &AtomicBool::new(false)).expect("play");
        assert_eq!(summary.ticks, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn cancelled_playback_stops_before_the_next_tick() {
        let mut store = store_with_frames(&[&["x"], &["y"]]);
        let mut out = Vec::<u8>::new();
        let error = run_playback(&mut store, &mut out, args(), &AtomicBool::new(true))
            .expect_err("cancelled");
        assert!(matches!(
            error,
            SqlStreamError::InterruptedPlayback { ticks: 0 }
        ));
        assert!(out.is_empty());
    }

    /// Raises `cancel` as soon as the first tick is written.
    struct InterruptingWriter<'a> {
        written: Vec<u8>,
        cancel: &'a AtomicBool,
    }

    impl Write for InterruptingWriter<'_> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.cancel.store(true, Ordering::SeqCst);
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn interrupt_during_a_tick_lets_that_tick_finish() {
        let mut store = store_with_frames(&[&["x"], &["y"], &["z"]]);
        let cancel = AtomicBool::new(false);
        let mut out = InterruptingWriter {
            written: Vec::new(),
            cancel: &cancel,
        };

        let error = run_playback(&mut store, &mut out, args(), &cancel).expect_err("cancelled");
        assert!(matches!(
            error,
            SqlStreamError::InterruptedPlayback { ticks: 1 }
        ));

        let text = String::from_utf8(out.written).expect("utf8");
        assert_eq!(text.matches("\x1b[H").count(), 1);
        assert!(text.starts_with("\x1b[Hx\n"));
        assert!(text.contains("FRAME 0/2"));
    }

    #[test]
    fn identical_archives_produce_identical_digests() {
        let frames: &[&[&str]] = &[&["11", "22"], &["33", "44"]];
        let mut first_store = store_with_frames(frames);
        let mut second_store = store_with_frames(frames);
        let cancel = AtomicBool::new(false);

        let first =
            run_playback(&mut first_store, &mut Vec::<u8>::new(), args(), &cancel).expect("play");
        let second =
            run_playback(&mut second_store, &mut Vec::<u8>::new(), args(), &cancel).expect("play");
        assert_eq!(first.output_digest, second.output_digest);
        assert_eq!(first.output_digest.len(), 64);
    }
}
