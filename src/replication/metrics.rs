//! Counters the coordinator reports into.
//!
//! The coordinator only increments; resetting and exporting belong to
//! whoever owns the sink.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub trait AckMetricsSink: Send + Sync + Debug {
  /// A commit wait ended with a replica acknowledgment.
  fn record_acked_transaction(&self, waited: Duration);

  /// A commit finished without the acknowledgment guarantee.
  fn record_unacked_transaction(&self);

  fn record_timeout(&self);

  fn record_off_transition(&self);

  /// Round trip between sending a flagged event and reading its reply.
  fn record_network_wait(&self, waited: Duration);

  /// A waiter lowered the wait watermark below its previous value.
  fn record_wait_position_backtrack(&self);
}

/// Atomic counter sink.
#[derive(Debug, Default)]
pub struct AckMetrics {
  acked_transactions: AtomicU64,
  unacked_transactions: AtomicU64,
  timeouts: AtomicU64,
  off_transitions: AtomicU64,
  wait_position_backtracks: AtomicU64,
  transaction_wait_micros: AtomicU64,
  network_waits: AtomicU64,
  network_wait_micros: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AckMetricsSnapshot {
  pub acked_transactions: u64,
  pub unacked_transactions: u64,
  pub timeouts: u64,
  pub off_transitions: u64,
  pub wait_position_backtracks: u64,
  pub avg_transaction_wait_micros: u64,
  pub network_waits: u64,
  pub avg_network_wait_micros: u64,
}

impl AckMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn snapshot(&self) -> AckMetricsSnapshot {
    let acked = self.acked_transactions.load(Ordering::Relaxed);
    let network_waits = self.network_waits.load(Ordering::Relaxed);
    AckMetricsSnapshot {
      acked_transactions: acked,
      unacked_transactions: self.unacked_transactions.load(Ordering::Relaxed),
      timeouts: self.timeouts.load(Ordering::Relaxed),
      off_transitions: self.off_transitions.load(Ordering::Relaxed),
      wait_position_backtracks: self.wait_position_backtracks.load(Ordering::Relaxed),
      avg_transaction_wait_micros: average(
        self.transaction_wait_micros.load(Ordering::Relaxed),
        acked,
      ),
      network_waits,
      avg_network_wait_micros: average(self.network_wait_micros.load(Ordering::Relaxed), network_waits),
    }
  }

  pub fn reset(&self) {
    for counter in [
      &self.acked_transactions,
      &self.unacked_transactions,
      &self.timeouts,
      &self.off_transitions,
      &self.wait_position_backtracks,
      &self.transaction_wait_micros,
      &self.network_waits,
      &self.network_wait_micros,
    ] {
      counter.store(0, Ordering::Relaxed);
    }
  }
}

impl AckMetricsSink for AckMetrics {
  fn record_acked_transaction(&self, waited: Duration) {
    self.acked_transactions.fetch_add(1, Ordering::Relaxed);
    self
      .transaction_wait_micros
      .fetch_add(duration_micros(waited), Ordering::Relaxed);
  }

  fn record_unacked_transaction(&self) {
    self.unacked_transactions.fetch_add(1, Ordering::Relaxed);
  }

  fn record_timeout(&self) {
    self.timeouts.fetch_add(1, Ordering::Relaxed);
  }

  fn record_off_transition(&self) {
    self.off_transitions.fetch_add(1, Ordering::Relaxed);
  }

  fn record_network_wait(&self, waited: Duration) {
    self.network_waits.fetch_add(1, Ordering::Relaxed);
    self
      .network_wait_micros
      .fetch_add(duration_micros(waited), Ordering::Relaxed);
  }

  fn record_wait_position_backtrack(&self) {
    self.wait_position_backtracks.fetch_add(1, Ordering::Relaxed);
  }
}

fn duration_micros(duration: Duration) -> u64 {
  u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

fn average(total: u64, count: u64) -> u64 {
  if count == 0 {
    0
  } else {
    total / count
  }
}

#[cfg(test)]
mod tests {
  use super::{AckMetrics, AckMetricsSink, AckMetricsSnapshot};
  use std::time::Duration;

  #[test]
  fn averages_and_reset() {
    let metrics = AckMetrics::new();
    metrics.record_acked_transaction(Duration::from_micros(100));
    metrics.record_acked_transaction(Duration::from_micros(300));
    metrics.record_network_wait(Duration::from_micros(40));
    metrics.record_unacked_transaction();
    metrics.record_timeout();
    metrics.record_off_transition();

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.acked_transactions, 2);
    assert_eq!(snapshot.avg_transaction_wait_micros, 200);
    assert_eq!(snapshot.avg_network_wait_micros, 40);
    assert_eq!(snapshot.unacked_transactions, 1);
    assert_eq!(snapshot.timeouts, 1);
    assert_eq!(snapshot.off_transitions, 1);

    metrics.reset();
    assert_eq!(metrics.snapshot(), AckMetricsSnapshot::default());
  }
}
