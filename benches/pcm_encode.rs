use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use livecall::audio::{encode_pcm16le, PcmFramer, FRAME_SAMPLES};

fn tone(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / 16_000.0).sin() * 0.8)
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_pcm16le");
    for len in [512, FRAME_SAMPLES, 4 * FRAME_SAMPLES] {
        let samples = tone(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &samples, |b, samples| {
            b.iter(|| encode_pcm16le(black_box(samples)))
        });
    }
    group.finish();
}

fn bench_framer(c: &mut Criterion) {
    // Typical capture callback size that does not divide the frame evenly.
    let buffer = tone(1_920);
    c.bench_function("framer_push_1920", |b| {
        let mut framer = PcmFramer::new(FRAME_SAMPLES);
        b.iter(|| black_box(framer.push(black_box(&buffer))))
    });
}

criterion_group!(benches, bench_encode, bench_framer);
criterion_main!(benches);
