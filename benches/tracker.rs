//! Tracker insert / lookup / trim throughput.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use semisync::{ActiveTransactionTracker, PositionKey};

fn positions(count: u64) -> Vec<PositionKey> {
  (1..=count)
    .map(|offset| PositionKey::new("binlog.000042", offset * 512))
    .collect()
}

fn bench_insert_and_trim(c: &mut Criterion) {
  let mut group = c.benchmark_group("tracker_insert_trim");
  for count in [64u64, 1_024, 16_384] {
    let input = positions(count);
    group.bench_with_input(BenchmarkId::from_parameter(count), &input, |b, input| {
      let mut tracker = ActiveTransactionTracker::new(256).expect("tracker");
      b.iter(|| {
        for position in input {
          tracker.insert(position.clone()).expect("insert");
        }
        let half = &input[input.len() / 2];
        black_box(tracker.trim_up_to(Some(half)));
        black_box(tracker.trim_up_to(None));
      });
    });
  }
  group.finish();
}

fn bench_contains(c: &mut Criterion) {
  let input = positions(4_096);
  let mut tracker = ActiveTransactionTracker::new(256).expect("tracker");
  for position in &input {
    tracker.insert(position.clone()).expect("insert");
  }

  c.bench_function("tracker_contains", |b| {
    let mut index = 0;
    b.iter(|| {
      index = (index + 7) % input.len();
      black_box(tracker.contains_as_transaction_end(&input[index]))
    });
  });
}

criterion_group!(benches, bench_insert_and_trim, bench_contains);
criterion_main!(benches);
