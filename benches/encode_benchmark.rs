//! Criterion benchmarks for zenvp8 encoding performance.
//!
//! Tracks performance across:
//! - Quantizer indices (fine to coarse key frames)
//! - Trellis quantization on and off
//! - Inter frame sequences with motion
//! - Decoding of the produced streams

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use zenvp8::mux::MemoryWriter;
use zenvp8::{Decoder, Encoder, EncoderConfig, Raster};

const WIDTH: usize = 176;
const HEIGHT: usize = 144;

/// Smooth gradient with seeded noise, shifted right by `shift` pixels.
fn textured(shift: usize) -> Raster {
    let mut rng = StdRng::seed_from_u64(7);
    let noise: Vec<u8> = (0..(WIDTH + 64) * HEIGHT).map(|_| rng.gen_range(0..24)).collect();
    let mut raster = Raster::new(WIDTH, HEIGHT);
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let sx = x + 64 - shift;
            let value = (sx * 3 / 2 + y) % 200 + usize::from(noise[y * (WIDTH + 64) + sx]);
            raster.y.set(x, y, value as u8);
        }
    }
    for y in 0..HEIGHT / 2 {
        for x in 0..WIDTH / 2 {
            raster.u.set(x, y, (96 + (x + y) % 64) as u8);
            raster.v.set(x, y, (160 - (x * 2 + 64 - shift / 2) % 64) as u8);
        }
    }
    raster
}

fn encode_sequence(config: &EncoderConfig, frames: &[Raster], quantizer: Option<u8>) -> Vec<Vec<u8>> {
    let writer = MemoryWriter::new(WIDTH as u16, HEIGHT as u16);
    let mut encoder = Encoder::new(writer, config.clone());
    for frame in frames {
        encoder.encode(black_box(frame), 0.95, quantizer).unwrap();
    }
    encoder.into_writer().into_frames()
}

fn bench_encode_quantizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_quantizer");
    group.throughput(Throughput::Elements((WIDTH * HEIGHT) as u64));

    let frame = [textured(0)];
    let config = EncoderConfig::new();
    for quantizer in [10u8, 40, 80, 120] {
        group.bench_with_input(BenchmarkId::new("key", quantizer), &quantizer, |b, &quantizer| {
            b.iter(|| encode_sequence(&config, &frame, Some(quantizer)));
        });
    }

    group.finish();
}

fn bench_encode_trellis(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_trellis");
    group.throughput(Throughput::Elements((WIDTH * HEIGHT) as u64));

    let frame = [textured(0)];
    for trellis in [false, true] {
        let config = EncoderConfig::new().with_trellis(trellis);
        group.bench_with_input(BenchmarkId::new("zenvp8", trellis), &config, |b, config| {
            b.iter(|| encode_sequence(config, &frame, Some(40)));
        });
    }

    group.finish();
}

fn bench_encode_inter(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_inter");
    group.sample_size(10);

    let frames: Vec<Raster> = (0..4).map(|i| textured(i * 3)).collect();
    group.throughput(Throughput::Elements((WIDTH * HEIGHT * frames.len()) as u64));

    group.bench_function("fixed_quantizer", |b| {
        b.iter(|| encode_sequence(&EncoderConfig::new(), &frames, Some(40)));
    });
    group.bench_function("converged", |b| {
        b.iter(|| encode_sequence(&EncoderConfig::new(), &frames, None));
    });
    group.bench_function("two_pass", |b| {
        let config = EncoderConfig::new().with_two_pass(true);
        b.iter(|| encode_sequence(&config, &frames, Some(40)));
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let frames: Vec<Raster> = (0..4).map(|i| textured(i * 3)).collect();
    let payloads = encode_sequence(&EncoderConfig::new(), &frames, Some(40));
    group.throughput(Throughput::Elements((WIDTH * HEIGHT * frames.len()) as u64));

    group.bench_function("sequence", |b| {
        b.iter(|| {
            let mut decoder = Decoder::new(WIDTH, HEIGHT);
            for payload in &payloads {
                black_box(decoder.decode(payload).unwrap());
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_encode_quantizer,
    bench_encode_trellis,
    bench_encode_inter,
    bench_decode,
);
criterion_main!(benches);
