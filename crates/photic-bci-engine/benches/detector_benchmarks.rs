//! Benchmarks for the detection hot path

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use photic_bci_core::config::{DetectorKind, EngineConfig};
use photic_bci_engine::detect::FrequencyDetector;
use photic_bci_engine::{FilterSpec, SyntheticSsvep};

fn config(detector: DetectorKind) -> EngineConfig {
    EngineConfig {
        sampling_rate: 250.0,
        target_frequencies: vec![8.0, 10.0, 12.0, 15.0],
        detector,
        ..EngineConfig::default()
    }
}

fn bench_filter_stage(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_apply_all");
    let cfg = config(DetectorKind::Psd);
    let filter = FilterSpec::from_config(&cfg);

    for &size in &[250usize, 500, 1000] {
        let mut synth = SyntheticSsvep::new(250.0, 8, 10.0, 3.0, 1);
        let window = synth.next_chunk(size);

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let mut copy = window.clone();
                filter.apply_all(black_box(&mut copy));
                black_box(copy)
            });
        });
    }
    group.finish();
}

fn bench_psd_detector(c: &mut Criterion) {
    let mut group = c.benchmark_group("psd_detect");
    let cfg = config(DetectorKind::Psd);
    let detector = FrequencyDetector::from_config(&cfg).unwrap();

    for &size in &[250usize, 500, 1000] {
        let mut synth = SyntheticSsvep::new(250.0, 8, 10.0, 3.0, 2);
        let window = synth.next_chunk(size);

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(detector.detect(black_box(&window))));
        });
    }
    group.finish();
}

fn bench_cca_detector(c: &mut Criterion) {
    let mut group = c.benchmark_group("cca_detect");
    let cfg = config(DetectorKind::Cca);
    let detector = FrequencyDetector::from_config(&cfg).unwrap();

    for &size in &[250usize, 500] {
        let mut synth = SyntheticSsvep::new(250.0, 8, 12.0, 3.0, 3);
        let window = synth.next_chunk(size);

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(detector.detect(black_box(&window))));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_filter_stage,
    bench_psd_detector,
    bench_cca_detector
);
criterion_main!(benches);
