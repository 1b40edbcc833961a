use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pi_daq::sequencer::{build_sequence, EventSequence, OutputChannel};

fn make_channels(count: usize) -> Vec<OutputChannel> {
    (0..count)
        .map(|idx| {
            let channel = OutputChannel::new(
                (idx % 26) as u8 + 2,
                format!("ch{}", idx),
                (idx % 7) as f64 * 1e-3,
                0.05 + (idx % 3) as f64 * 0.01,
            );
            if idx % 4 == 0 {
                channel.inverted()
            } else {
                channel
            }
        })
        .collect()
}

fn benchmark_from_channels(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_sequence_from_channels");
    for count in [5usize, 26, 256] {
        let channels = make_channels(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &channels, |b, channels| {
            b.iter(|| EventSequence::from_channels(black_box(channels)))
        });
    }
    group.finish();
}

fn benchmark_parallel_tables(c: &mut Criterion) {
    let channels = make_channels(26);
    let pins: Vec<u8> = channels.iter().map(|c| c.pin).collect();
    let delays: Vec<f64> = channels.iter().map(|c| c.delay_s).collect();
    let durations: Vec<f64> = channels.iter().map(|c| c.duration_s).collect();
    let inverts: Vec<bool> = channels.iter().map(|c| c.invert).collect();

    c.bench_function("build_sequence_26_pins", |b| {
        b.iter(|| {
            build_sequence(
                black_box(&pins),
                black_box(&delays),
                black_box(&durations),
                black_box(&inverts),
            )
        })
    });
}

fn benchmark_offsets(c: &mut Criterion) {
    let sequence = EventSequence::from_channels(&make_channels(256)).ok();
    c.bench_function("event_sequence_offsets_256", |b| {
        b.iter(|| sequence.as_ref().map(|s| s.offsets()))
    });
}

criterion_group!(
    benches,
    benchmark_from_channels,
    benchmark_parallel_tables,
    benchmark_offsets
);
criterion_main!(benches);
