use bgfill::{
    Bitmap, Compositor, FillColor, ImageEncoder, OutputFormat, Resizer, SegmentationMask,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{Rgba, RgbaImage};

fn test_bitmap(width: u32, height: u32) -> Bitmap {
    let image = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
    });
    Bitmap::new(image).unwrap()
}

fn half_mask(width: u32, height: u32) -> SegmentationMask {
    let data = (0..height)
        .flat_map(|_| (0..width).map(move |x| if x < width / 2 { 0.9 } else { 0.1 }))
        .collect();
    SegmentationMask::new(data, (width, height))
}

fn bench_composite(c: &mut Criterion) {
    let mut group = c.benchmark_group("composite");
    for &(width, height) in &[(512, 512), (1024, 768), (1024, 1024)] {
        let bitmap = test_bitmap(width, height);
        let mask = half_mask(width, height);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", width, height)),
            &(bitmap, mask),
            |b, (bitmap, mask)| {
                b.iter(|| {
                    Compositor::composite(bitmap.clone(), black_box(mask), 0.5, FillColor::BLACK)
                        .unwrap()
                });
            },
        );
    }
    group.finish();
}

fn bench_resize(c: &mut Criterion) {
    let bitmap = test_bitmap(2000, 1000);
    c.bench_function("resize_2000x1000_to_1024", |b| {
        b.iter(|| Resizer::bound(bitmap.clone(), black_box(1024)));
    });
}

fn bench_encode(c: &mut Criterion) {
    let bitmap = test_bitmap(1024, 1024);
    let mut group = c.benchmark_group("encode_1024");
    group.bench_function("jpeg_q90", |b| {
        b.iter(|| ImageEncoder::encode(black_box(&bitmap), OutputFormat::Jpeg, 90).unwrap());
    });
    group.bench_function("png", |b| {
        b.iter(|| ImageEncoder::encode(black_box(&bitmap), OutputFormat::Png, 90).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_composite, bench_resize, bench_encode);
criterion_main!(benches);
