use std::fmt::Write as _;

use image::{Rgb, RgbImage};

use crate::error::{Result, SqlStreamError};
use crate::session::{DensityRamp, DisplayDims, RenderMode, SessionContext};

pub const ANSI_RESET: &str = "\x1b[0m";

/// Encodes one decoded frame into exactly `dims.height()` terminal lines.
pub fn encode_frame(frame: &RgbImage, context: &SessionContext) -> Result<Vec<String>> {
    let resized = resample_area(frame, context.dims)?;
    let lines = resized
        .rows()
        .map(|row| match context.mode {
            RenderMode::Color => color_line(row),
            RenderMode::Glyph => glyph_line(row, &context.ramp),
        })
        .collect();
    Ok(lines)
}

fn color_line<'a>(row: impl Iterator<Item = &'a Rgb<u8>>) -> String {
    let mut line = String::new();
    for pixel in row {
        let [r, g, b] = pixel.0;
        let _ = write!(line, "\x1b[48;2;{r};{g};{b}m ");
    }
    line.push_str(ANSI_RESET);
    line
}

fn glyph_line<'a>(row: impl Iterator<Item = &'a Rgb<u8>>, ramp: &DensityRamp) -> String {
    row.map(|pixel| ramp.glyph_for_luma(luminance(pixel))).collect()
}

/// Rec.601 luma with 14-bit fixed point weights, rounded to nearest.
pub fn luminance(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    let weighted = r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868;
    ((weighted + (1 << 13)) >> 14) as u8
}

/// Resizes by averaging every source pixel weighted by the fraction of its
/// area covered by the destination pixel.
pub fn resample_area(source: &RgbImage, dims: DisplayDims) -> Result<RgbImage> {
    let (source_width, source_height) = source.dimensions();
    if source_width == 0 || source_height == 0 {
        return Err(SqlStreamError::EmptyFrame {
            width: source_width,
            height: source_height,
        });
    }

    let column_spans = area_spans(source_width, dims.width());
    let row_spans = area_spans(source_height, dims.height());
    let mut output = RgbImage::new(dims.width(), dims.height());

    for (out_y, row_span) in row_spans.iter().enumerate() {
        for (out_x, column_span) in column_spans.iter().enumerate() {
            let mut accum = [0.0_f64; 3];
            let mut total_weight = 0.0_f64;
            for &(src_y, weight_y) in row_span {
                for &(src_x, weight_x) in column_span {
                    let weight = weight_x * weight_y;
                    let pixel = source.get_pixel(src_x, src_y).0;
                    for (channel, value) in accum.iter_mut().zip(pixel) {
                        *channel += value as f64 * weight;
                    }
                    total_weight += weight;
                }
            }

            let averaged =
                accum.map(|channel| (channel / total_weight).round().clamp(0.0, 255.0) as u8);
            output.put_pixel(out_x as u32, out_y as u32, Rgb(averaged));
        }
    }

    Ok(output)
}

/// For each destination index, the source indices it overlaps and the
/// overlap length in source units.
fn area_spans(source_len: u32, target_len: u32) -> Vec<Vec<(u32, f64)>> {
    let scale = source_len as f64 / target_len as f64;
    (0..target_len)
        .map(|index| {
            let start = index as f64 * scale;
            let end = (start + scale).min(source_len as f64);
            let first = start.floor() as u32;
            let last = (end.ceil() as u32).min(source_len);
            (first..last)
                .filter_map(|src| {
                    let overlap = end.min(src as f64 + 1.0) - start.max(src as f64);
                    (overlap > 1e-9).then_some((src, overlap))
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::{area_spans, encode_frame, luminance, resample_area, ANSI_RESET};
    use crate::session::{DensityRamp, DisplayDims, RenderMode, SessionContext};

    fn context(width: u32, height: u32, mode: RenderMode) -> SessionContext {
        SessionContext::new(
            DisplayDims::new(width, height).expect("dims should be valid"),
            DensityRamp::parse("01234567").expect("ramp should parse"),
            mode,
        )
    }

    #[test]
    fn downsampling_averages_whole_blocks() {
        let mut source = RgbImage::new(4, 2);
        for x in 0..2 {
            for y in 0..2 {
                source.put_pixel(x, y, Rgb([0, 0, 0]));
                source.put_pixel(x + 2, y, Rgb([200, 100, 50]));
            }
        }
        source.put_pixel(0, 0, Rgb([40, 40, 40]));

        let resized =
            resample_area(&source, DisplayDims::new(2, 1).expect("dims")).expect("resample");
        assert_eq!(resized.get_pixel(0, 0).0, [10, 10, 10]);
        assert_eq!(resized.get_pixel(1, 0).0, [200, 100, 50]);
    }

    #[test]
    fn fractional_spans_cover_the_source_exactly() {
        let spans = area_spans(3, 2);
        assert_eq!(spans[0], vec![(0, 1.0), (1, 0.5)]);
        assert_eq!(spans[1], vec![(1, 0.5), (2, 1.0)]);
    }

    #[test]
    fn upsampling_repeats_source_pixels() {
        let source = RgbImage::from_pixel(1, 1, Rgb([7, 8, 9]));
        let resized =
            resample_area(&source, DisplayDims::new(3, 2).expect("dims")).expect("resample");
        assert!(resized.pixels().all(|pixel| pixel.0 == [7, 8, 9]));
    }

    #[test]
    fn empty_source_frame_is_rejected() {
        let source = RgbImage::new(0, 0);
        assert!(resample_area(&source, DisplayDims::new(2, 2).expect("dims")).is_err());
    }

    #[test]
    fn luminance_spans_full_range() {
        assert_eq!(luminance(&Rgb([0, 0, 0])), 0);
        assert_eq!(luminance(&Rgb([255, 255, 255])), 255);
        assert_eq!(luminance(&Rgb([255, 0, 0])), 76);
        assert_eq!(luminance(&Rgb([0, 255, 0])), 150);
        assert_eq!(luminance(&Rgb([0, 0, 255])), 29);
    }

    #[test]
    fn glyph_mode_maps_dark_to_first_and_light_to_last() {
        let mut source = RgbImage::new(2, 1);
        source.put_pixel(0, 0, Rgb([0, 0, 0]));
        source.put_pixel(1, 0, Rgb([255, 255, 255]));

        let lines = encode_frame(&source, &context(2, 1, RenderMode::Glyph)).expect("encode");
        assert_eq!(lines, vec!["07".to_owned()]);
    }

    #[test]
    fn glyph_mode_is_monotonic_in_luminance() {
        let mut source = RgbImage::new(256, 1);
        for value in 0..=255_u8 {
            source.put_pixel(value as u32, 0, Rgb([value, value, value]));
        }
        let lines = encode_frame(&source, &context(256, 1, RenderMode::Glyph)).expect("encode");
        let digits = lines[0]
            .chars()
            .map(|ch| ch.to_digit(10).expect("ramp is digits"))
            .collect::<Vec<_>>();
        assert!(digits.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(digits[31], 0);
        assert_eq!(digits[32], 1);
        assert_eq!(digits[255], 7);
    }

    #[test]
    fn color_mode_rows_have_fixed_length_for_uniform_digits() {
        let source = RgbImage::from_pixel(8, 6, Rgb([123, 45, 6]));
        let lines = encode_frame(&source, &context(4, 3, RenderMode::Color)).expect("encode");
        let escape = "\x1b[48;2;123;45;6m";

        assert_eq!(lines.len(), 3);
        for line in &lines {
            assert_eq!(line.len(), 4 * (escape.len() + 1) + ANSI_RESET.len());
            assert!(line.starts_with(escape));
            assert!(line.ends_with(ANSI_RESET));
            assert_eq!(line.matches(ANSI_RESET).count(), 1);
        }
    }

    #[test]
    fn encoding_is_reproducible() {
        let mut source = RgbImage::new(13, 7);
        for (x, y, pixel) in source.enumerate_pixels_mut() {
            *pixel = Rgb([(x * 19) as u8, (y * 37) as u8, ((x + y) * 11) as u8]);
        }
        let ctx = context(5, 3, RenderMode::Color);
        let first = encode_frame(&source, &ctx).expect("encode");
        let second = encode_frame(&source, &ctx).expect("encode");
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }
}
