//! Encoder benchmarks: glyph vs truecolor at a typical terminal size.
//! Run: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{Rgb, RgbImage};
use sqlstream::encoder::encode_frame;
use sqlstream::session::{DensityRamp, DisplayDims, RenderMode, SessionContext};

fn source_frame() -> RgbImage {
    RgbImage::from_fn(640, 360, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
}

fn bench_encode(c: &mut Criterion) {
    let frame = source_frame();
    let dims = DisplayDims::new(120, 40).expect("dims");

    let mut group = c.benchmark_group("encode_frame");
    group.sample_size(50);

    for mode in [RenderMode::Glyph, RenderMode::Color] {
        let ctx = SessionContext::new(dims, DensityRamp::default(), mode);
        group.bench_function(format!("360p_to_120x40_{}", mode.as_str()), |b| {
            b.iter(|| black_box(encode_frame(black_box(&frame), &ctx).expect("encode")));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode);
criterion_main!(benches);
