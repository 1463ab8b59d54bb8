//! SQLite-backed frame archive and display mirror.
//!
//! `frame_library` holds every encoded line of the session and is written once.
//! `display` holds exactly one row per screen line and is overwritten on each
//! playback tick by a correlated `UPDATE` against the archive.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{params, Connection, DatabaseName};
use tracing::debug;

use crate::error::{Result, SqlStreamError};

const DROP_SCHEMA: &str = "
    DROP TABLE IF EXISTS frame_library;
    DROP TABLE IF EXISTS display;
";

const CREATE_SCHEMA: &str = "
    CREATE TABLE frame_library (frame_id INTEGER, line_no INTEGER, content TEXT);
    CREATE TABLE display (line_no INTEGER PRIMARY KEY, content TEXT);
";

const SYNC_DISPLAY: &str = "
    UPDATE display SET content = (
        SELECT content FROM frame_library
        WHERE frame_id = ?1 AND line_no = display.line_no
    )
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedLine {
    pub frame_id: u32,
    pub line_no: u32,
    pub content: String,
}

impl ArchivedLine {
    pub fn new(frame_id: u32, line_no: u32, content: impl Into<String>) -> Self {
        Self {
            frame_id,
            line_no,
            content: content.into(),
        }
    }
}

/// Flattens per-frame line lists into archive rows, numbering frames from 0.
pub fn archive_rows<I>(frames: I) -> Vec<ArchivedLine>
where
    I: IntoIterator<Item = Vec<String>>,
{
    frames
        .into_iter()
        .enumerate()
        .flat_map(|(frame_id, lines)| {
            lines
                .into_iter()
                .enumerate()
                .map(move |(line_no, content)| {
                    ArchivedLine::new(frame_id as u32, line_no as u32, content)
                })
        })
        .collect()
}

pub struct FrameStore {
    conn: Connection,
    height: u32,
    committed: bool,
}

impl FrameStore {
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Opens (or creates) a store file. Existing tables are kept until `reset`.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Copies a persisted store into a fresh in-memory connection so the
    /// playback loop never touches the disk.
    pub fn load_into_memory(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SqlStreamError::MissingPersistedStore {
                path: path.to_path_buf(),
            });
        }
        let mut conn = Connection::open_in_memory()?;
        conn.restore(DatabaseName::Main, path, None::<fn(rusqlite::backup::Progress)>)?;
        debug!(path = %path.display(), "restored persisted store into memory");
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "synchronous", "OFF")?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "MEMORY", |row| row.get(0))?;
        debug!(journal_mode = %journal_mode, "store connection configured");
        let height = existing_display_height(&conn)?;
        Ok(Self {
            conn,
            height,
            committed: false,
        })
    }

    /// Number of rows in the display mirror.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Drops both tables, recreates them, and seeds `height` empty display rows.
    pub fn reset(&mut self, height: u32) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(DROP_SCHEMA)?;
        tx.execute_batch(CREATE_SCHEMA)?;
        {
            let mut insert = tx.prepare("INSERT INTO display (line_no, content) VALUES (?1, '')")?;
            for line_no in 0..height {
                insert.execute(params![line_no])?;
            }
        }
        tx.commit()?;
        self.height = height;
        self.committed = false;
        debug!(height, "frame store reset");
        Ok(())
    }

    /// Writes the whole session's lines in one transaction.
    ///
    /// Every frame must carry exactly the lines `0..height`, and frame ids must
    /// run contiguously from 0. The archive can only be filled once per reset.
    pub fn ingest_batch(&mut self, rows: &[ArchivedLine]) -> Result<()> {
        let archived = self.archived_frame_count()?;
        if self.committed || archived > 0 {
            return Err(SqlStreamError::ArchiveAlreadyCommitted { frames: archived });
        }
        validate_batch(rows, self.height)?;

        let tx = self.conn.transaction()?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO frame_library (frame_id, line_no, content) VALUES (?1, ?2, ?3)",
            )?;
            for row in rows {
                insert.execute(params![row.frame_id, row.line_no, row.content])?;
            }
        }
        tx.commit()?;
        self.committed = true;
        debug!(rows = rows.len(), "frame archive committed");
        Ok(())
    }

    pub fn max_frame_id(&self) -> Result<Option<u32>> {
        let max = self
            .conn
            .query_row("SELECT MAX(frame_id) FROM frame_library", [], |row| {
                row.get::<_, Option<u32>>(0)
            })?;
        Ok(max)
    }

    pub fn archived_frame_count(&self) -> Result<u32> {
        let count = self.conn.query_row(
            "SELECT COUNT(DISTINCT frame_id) FROM frame_library",
            [],
            |row| row.get::<_, u32>(0),
        )?;
        Ok(count)
    }

    /// Re-synchronizes every display row against `frame_id` in the archive.
    ///
    /// Returns the number of display rows updated. Fails without touching the
    /// mirror when the frame is absent or does not hold a full set of lines.
    pub fn sync_frame(&mut self, frame_id: u32) -> Result<usize> {
        let (rows, present) = self.conn.query_row(
            "SELECT COUNT(*),
                    COUNT(DISTINCT CASE WHEN line_no >= 0 AND line_no < ?2 THEN line_no END)
             FROM frame_library WHERE frame_id = ?1",
            params![frame_id, self.height],
            |row| Ok((row.get::<_, u32>(0)?, row.get::<_, u32>(1)?)),
        )?;

        if rows == 0 {
            return Err(SqlStreamError::FrameNotArchived {
                frame_id,
                last: self.max_frame_id()?,
            });
        }
        if present != self.height || rows != self.height {
            return Err(SqlStreamError::ArchiveIncomplete {
                frame_id,
                expected: self.height,
                detail: format!("found {rows} row(s) covering {present} line(s)"),
            });
        }

        let updated = self.conn.execute(SYNC_DISPLAY, params![frame_id])?;
        Ok(updated)
    }

    /// Current display rows ordered by line number.
    pub fn read_current(&self) -> Result<Vec<String>> {
        let mut select = self
            .conn
            .prepare_cached("SELECT line_no, content FROM display ORDER BY line_no")?;
        let rows = select.query_map([], |row| {
            Ok((row.get::<_, u32>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut lines = Vec::with_capacity(self.height as usize);
        for row in rows {
            let (line_no, content) = row?;
            let content = content.ok_or(SqlStreamError::MirrorRowMissing { line_no })?;
            lines.push(content);
        }
        Ok(lines)
    }
}

fn existing_display_height(conn: &Connection) -> Result<u32> {
    let has_display = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'display'",
        [],
        |row| row.get::<_, u32>(0),
    )?;
    if has_display == 0 {
        return Ok(0);
    }
    let rows = conn.query_row("SELECT COUNT(*) FROM display", [], |row| {
        row.get::<_, u32>(0)
    })?;
    Ok(rows)
}

fn validate_batch(rows: &[ArchivedLine], height: u32) -> Result<()> {
    let mut frames: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for row in rows {
        frames.entry(row.frame_id).or_default().push(row.line_no);
    }

    for (expected_id, (&frame_id, line_nos)) in frames.iter_mut().enumerate() {
        if frame_id != expected_id as u32 {
            return Err(SqlStreamError::ArchiveIncomplete {
                frame_id: expected_id as u32,
                expected: height,
                detail: format!("frame ids skip from {} to {frame_id}", expected_id),
            });
        }
        line_nos.sort_unstable();
        let complete = line_nos.len() == height as usize
            && line_nos
                .iter()
                .enumerate()
                .all(|(index, &line_no)| line_no == index as u32);
        if !complete {
            return Err(SqlStreamError::ArchiveIncomplete {
                frame_id,
                expected: height,
                detail: format!("got line numbers {line_nos:?}"),
            });
        }
    }
    Ok(())
}
