//! Per-run configuration shared by the encoder, the store, and the player.

use crate::error::{Result, SqlStreamError};

pub const DENSITY_BUCKETS: usize = 8;
pub const DEFAULT_DENSITY_RAMP: &str = "@%#*+=-:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Color,
    Glyph,
}

impl RenderMode {
    pub fn from_color_flag(color: bool) -> Self {
        if color {
            Self::Color
        } else {
            Self::Glyph
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Color => "color",
            Self::Glyph => "glyph",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayDims {
    width: u32,
    height: u32,
}

impl DisplayDims {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(SqlStreamError::InvalidDimensions { width, height });
        }
        Ok(Self { width, height })
    }

    pub fn width(self) -> u32 {
        self.width
    }

    pub fn height(self) -> u32 {
        self.height
    }
}

/// Characters ordered dark to light, one per luminance bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DensityRamp {
    glyphs: [char; DENSITY_BUCKETS],
}

impl DensityRamp {
    pub fn parse(raw: &str) -> Result<Self> {
        let chars = raw.chars().collect::<Vec<_>>();
        let glyphs = <[char; DENSITY_BUCKETS]>::try_from(chars.as_slice()).map_err(|_| {
            SqlStreamError::InvalidRamp {
                expected: DENSITY_BUCKETS,
                actual: chars.len(),
            }
        })?;
        Ok(Self { glyphs })
    }

    pub fn glyph_for_luma(&self, luma: u8) -> char {
        self.glyphs[(luma / 32) as usize]
    }

    pub fn darkest(&self) -> char {
        self.glyphs[0]
    }

    pub fn lightest(&self) -> char {
        self.glyphs[DENSITY_BUCKETS - 1]
    }
}

impl Default for DensityRamp {
    fn default() -> Self {
        Self {
            glyphs: ['@', '%', '#', '*', '+', '=', '-', ':'],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub dims: DisplayDims,
    pub ramp: DensityRamp,
    pub mode: RenderMode,
}

impl SessionContext {
    pub fn new(dims: DisplayDims, ramp: DensityRamp, mode: RenderMode) -> Self {
        Self { dims, ramp, mode }
    }

    pub fn width(&self) -> u32 {
        self.dims.width()
    }

    pub fn height(&self) -> u32 {
        self.dims.height()
    }
}

#[cfg(test)]
mod tests {
    use super::{DensityRamp, DisplayDims, DEFAULT_DENSITY_RAMP};
    use crate::error::SqlStreamError;

    #[test]
    fn default_ramp_matches_default_string() {
        let parsed = DensityRamp::parse(DEFAULT_DENSITY_RAMP).expect("default ramp should parse");
        assert_eq!(parsed, DensityRamp::default());
    }

    #[test]
    fn ramp_length_is_checked_when_built() {
        let error = DensityRamp::parse("@%#*+=-:. ").expect_err("10 chars should be rejected");
        assert!(matches!(
            error,
            SqlStreamError::InvalidRamp {
                expected: 8,
                actual: 10
            }
        ));
    }

    #[test]
    fn ramp_accepts_multibyte_glyphs() {
        let ramp = DensityRamp::parse("█▓▒░·,. ").expect("8 chars should parse");
        assert_eq!(ramp.darkest(), '█');
        assert_eq!(ramp.lightest(), ' ');
    }

    #[test]
    fn bucket_boundaries_sit_on_multiples_of_32() {
        let ramp = DensityRamp::parse("01234567").expect("ramp should parse");
        assert_eq!(ramp.glyph_for_luma(0), '0');
        assert_eq!(ramp.glyph_for_luma(31), '0');
        assert_eq!(ramp.glyph_for_luma(32), '1');
        assert_eq!(ramp.glyph_for_luma(223), '6');
        assert_eq!(ramp.glyph_for_luma(224), '7');
        assert_eq!(ramp.glyph_for_luma(255), '7');
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(DisplayDims::new(0, 4).is_err());
        assert!(DisplayDims::new(4, 0).is_err());
        assert!(DisplayDims::new(1, 1).is_ok());
    }
}
