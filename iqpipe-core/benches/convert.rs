use criterion::{black_box, criterion_group, criterion_main, Criterion};
use num_complex::Complex;

use iqpipe_core::config::SampleFormat;
use iqpipe_core::convert::{convert_in, convert_out};

fn bench_convert(c: &mut Criterion) {
    let frames = 16_384;
    let cu8_bytes: Vec<u8> = (0..frames * 2).map(|n| (n % 256) as u8).collect();
    let cs16_bytes: Vec<u8> = (0..frames * 4).map(|n| (n % 251) as u8).collect();
    let mut complex = vec![Complex::new(0.0f32, 0.0); frames];
    let mut out = vec![0u8; frames * 8];

    c.bench_function("convert_in_cu8", |b| {
        b.iter(|| convert_in(black_box(&cu8_bytes), SampleFormat::Cu8, &mut complex))
    });
    c.bench_function("convert_in_cs16", |b| {
        b.iter(|| convert_in(black_box(&cs16_bytes), SampleFormat::Cs16, &mut complex))
    });

    convert_in(&cs16_bytes, SampleFormat::Cs16, &mut complex);
    c.bench_function("convert_out_cs16", |b| {
        b.iter(|| convert_out(black_box(&complex), SampleFormat::Cs16, &mut out))
    });
    c.bench_function("convert_out_cf32", |b| {
        b.iter(|| convert_out(black_box(&complex), SampleFormat::Cf32, &mut out))
    });
}

criterion_group!(benches, bench_convert);
criterion_main!(benches);
