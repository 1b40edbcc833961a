//! Properties of the timed-event sequencer over random channel tables.

use pi_daq::sequencer::{build_sequence, EventSequence, OutputChannel};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

struct Table {
    pins: Vec<u8>,
    delays: Vec<f64>,
    durations: Vec<f64>,
    inverts: Vec<bool>,
}

/// Distinct pins, delays and durations on a millisecond grid.
fn random_table(rng: &mut StdRng) -> Table {
    let n = rng.gen_range(1..=8);
    let mut pins: Vec<u8> = (2..28).collect();
    for i in 0..n {
        let j = rng.gen_range(i..pins.len());
        pins.swap(i, j);
    }
    pins.truncate(n);
    Table {
        pins,
        delays: (0..n).map(|_| rng.gen_range(0..5000) as f64 / 1000.0).collect(),
        durations: (0..n).map(|_| rng.gen_range(0..2000) as f64 / 1000.0).collect(),
        inverts: (0..n).map(|_| rng.gen_bool(0.5)).collect(),
    }
}

fn build(t: &Table) -> EventSequence {
    build_sequence(&t.pins, &t.delays, &t.durations, &t.inverts).unwrap()
}

#[test]
fn test_length_is_twice_channel_count() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..200 {
        let table = random_table(&mut rng);
        let seq = build(&table);
        assert_eq!(seq.len(), 2 * table.pins.len());
        assert_eq!(seq.pins().len(), seq.levels().len());
        assert_eq!(seq.waits().len(), seq.len());
        assert_eq!(seq.waits().last().copied(), Some(0.0));
    }
}

#[test]
fn test_wait_sum_spans_first_to_last_edge() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..200 {
        let table = random_table(&mut rng);
        let seq = build(&table);

        let last = table
            .delays
            .iter()
            .zip(&table.durations)
            .map(|(d, p)| d + p)
            .fold(f64::MIN, f64::max);
        let first = table.delays.iter().copied().fold(f64::MAX, f64::min);

        let total: f64 = seq.waits().iter().sum();
        assert!((total - (last - first)).abs() < 1e-9, "{} vs {}", total, last - first);
        assert!(seq.waits().iter().all(|w| *w >= 0.0));
    }
}

#[test]
fn test_each_pin_pulses_once_with_its_polarity() {
    let mut rng = StdRng::seed_from_u64(23);
    for _ in 0..200 {
        let table = random_table(&mut rng);
        let seq = build(&table);
        let pins = seq.pins();
        let levels = seq.levels();

        for (i, pin) in table.pins.iter().enumerate() {
            let positions: Vec<usize> = (0..pins.len()).filter(|&k| pins[k] == *pin).collect();
            assert_eq!(positions.len(), 2);
            // Active edge comes first, even for zero-length pulses.
            assert_eq!(levels[positions[0]], !table.inverts[i]);
            assert_eq!(levels[positions[1]], table.inverts[i]);
        }
    }
}

#[test]
fn test_idempotent() {
    let mut rng = StdRng::seed_from_u64(5);
    let table = random_table(&mut rng);
    assert_eq!(build(&table), build(&table));
}

#[test]
fn test_named_channels_in_display() {
    let channels = vec![
        OutputChannel::new(25, "Sol1", 0.0, 0.2),
        OutputChannel::new(21, "Yel LED", 0.002, 6.0).inverted(),
    ];
    let text = EventSequence::from_channels(&channels).unwrap().to_string();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "Pin 25 (Sol1) = 1, then wait 0.002000 s");
    assert_eq!(lines[1], "Pin 21 (Yel LED) = 0, then wait 0.198000 s");
    assert_eq!(lines.last().copied(), Some("Then wait for next trigger."));
}
