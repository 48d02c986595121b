use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ownvoice_audio::PcmAudio;
use ownvoice_voiceprint::{decide, Embedding, EnrollmentSet, FeatureExtractor, ThresholdConfig};

fn make_sine_pcm(freq_hz: f64, seconds: f64, sample_rate: u32) -> PcmAudio {
    let n = (seconds * sample_rate as f64) as usize;
    let samples: Vec<f64> = (0..n)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            0.5 * (freq_hz * 2.0 * std::f64::consts::PI * t).sin()
        })
        .collect();
    PcmAudio::new(samples, sample_rate, 1, 16).unwrap()
}

fn bench_extract_1s(c: &mut Criterion) {
    let extractor = FeatureExtractor::new();
    let audio = make_sine_pcm(440.0, 1.0, 16000);

    c.bench_function("voiceprint_extract_1s", |b| {
        b.iter(|| {
            let _ = black_box(extractor.extract(black_box(&audio)));
        });
    });
}

fn bench_extract_12s(c: &mut Criterion) {
    let extractor = FeatureExtractor::new();
    let audio = make_sine_pcm(440.0, 12.0, 16000);

    c.bench_function("voiceprint_extract_12s", |b| {
        b.iter(|| {
            let _ = black_box(extractor.extract(black_box(&audio)));
        });
    });
}

fn bench_extract_48k_resampled(c: &mut Criterion) {
    let extractor = FeatureExtractor::new();
    let audio = make_sine_pcm(440.0, 1.0, 48000);

    c.bench_function("voiceprint_extract_1s_48k", |b| {
        b.iter(|| {
            let _ = black_box(extractor.extract(black_box(&audio)));
        });
    });
}

fn bench_decide(c: &mut Criterion) {
    let extractor = FeatureExtractor::new();
    let probe = extractor.extract(&make_sine_pcm(440.0, 1.0, 16000)).unwrap();
    let members: Vec<Embedding> = [220.0, 330.0, 440.0]
        .iter()
        .map(|&f| extractor.extract(&make_sine_pcm(f, 1.0, 16000)).unwrap())
        .collect();
    let enrollment = EnrollmentSet::new(members).unwrap();
    let config = ThresholdConfig::defaults("bench");

    c.bench_function("voiceprint_decide_3_members", |b| {
        b.iter(|| {
            let _ = black_box(decide(black_box(&probe), &enrollment, &config));
        });
    });
}

criterion_group!(
    benches,
    bench_extract_1s,
    bench_extract_12s,
    bench_extract_48k_resampled,
    bench_decide,
);
criterion_main!(benches);
