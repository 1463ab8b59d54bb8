use terminal_size::{terminal_size, Height, Width};

pub const FALLBACK_COLUMNS: u16 = 80;
pub const FALLBACK_ROWS: u16 = 24;
/// Rows kept free below the picture for the status line and the prompt.
pub const RESERVED_ROWS: u16 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalGeometry {
    pub columns: u16,
    pub rows: u16,
}

impl TerminalGeometry {
    pub fn detect() -> Self {
        match terminal_size() {
            Some((Width(columns), Height(rows))) if columns > 0 && rows > 0 => {
                Self { columns, rows }
            }
            _ => Self {
                columns: FALLBACK_COLUMNS,
                rows: FALLBACK_ROWS,
            },
        }
    }

    /// Picture size used when no explicit width/height is given.
    pub fn default_display(self, width: Option<u32>, height: Option<u32>) -> (u32, u32) {
        let width = width.unwrap_or(self.columns as u32);
        let height =
            height.unwrap_or_else(|| (self.rows.saturating_sub(RESERVED_ROWS) as u32).max(1));
        (width, height)
    }
}
