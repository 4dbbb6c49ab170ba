//! Primary-side semi-sync coordinator.
//!
//! Commit threads report durably appended transaction ends and then block
//! in [`ReplicationAckCoordinator::wait_for_ack`]. The binlog sender asks
//! per event whether to request an ack, and the reply reader feeds
//! acknowledged positions back in. All state sits behind one mutex paired
//! with one condition variable; wakeups are broadcast after the guard is
//! released.
//!
//! While ON, every commit waits for an ack. A timeout or a tracker failure
//! flips the coordinator OFF; it flips back ON once an ack arrives for a
//! position at or past the last commit seen, i.e. once a replica has
//! caught up with everything committed while it was unreliable.

use super::metrics::{AckMetrics, AckMetricsSink};
use super::options::AckCoordinatorOptions;
use super::tracker::ActiveTransactionTracker;
use super::transport::{self, SYNC_HEADER_LEN};
use super::types::{reached, PositionKey, WaitOutcome};
use crate::error::Result;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug)]
struct CoordinatorState {
  enabled: bool,
  state_on: bool,
  /// Furthest position any replica acknowledged.
  reply_position: Option<PositionKey>,
  /// Smallest position some commit thread is blocked on.
  wait_position: Option<PositionKey>,
  /// Furthest transaction end appended to the local log.
  commit_position: Option<PositionKey>,
  tracker: Option<ActiveTransactionTracker>,
  waiting_count: usize,
  replica_count: usize,
  timeout: Duration,
  wait_no_replica: bool,
}

/// Point-in-time view of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AckCoordinatorStatus {
  pub enabled: bool,
  pub state_on: bool,
  pub reply_position: Option<PositionKey>,
  pub wait_position: Option<PositionKey>,
  pub commit_position: Option<PositionKey>,
  pub tracked_transactions: usize,
  pub waiting_sessions: usize,
  pub replica_count: usize,
  pub timeout_ms: u64,
  pub wait_no_replica: bool,
}

#[derive(Debug)]
pub struct ReplicationAckCoordinator {
  state: Mutex<CoordinatorState>,
  ack_cond: Condvar,
  tracker_capacity: usize,
  metrics: Arc<dyn AckMetricsSink>,
}

impl ReplicationAckCoordinator {
  pub fn new(options: AckCoordinatorOptions) -> Result<Self> {
    Self::with_metrics(options, Arc::new(AckMetrics::new()))
  }

  pub fn with_metrics(
    options: AckCoordinatorOptions,
    metrics: Arc<dyn AckMetricsSink>,
  ) -> Result<Self> {
    options.validate()?;

    let coordinator = Self {
      state: Mutex::new(CoordinatorState {
        enabled: false,
        state_on: false,
        reply_position: None,
        wait_position: None,
        commit_position: None,
        tracker: None,
        waiting_count: 0,
        replica_count: 0,
        timeout: options.ack_timeout(),
        wait_no_replica: options.wait_no_replica,
      }),
      ack_cond: Condvar::new(),
      tracker_capacity: options.tracker_capacity,
      metrics,
    };

    if options.enabled {
      coordinator.enable()?;
    }
    Ok(coordinator)
  }

  /// Starts semi-sync with a fresh tracker and cleared watermarks. The
  /// coordinator comes up ON. If the tracker cannot be allocated it stays
  /// disabled.
  pub fn enable(&self) -> Result<()> {
    let mut state = self.state.lock();
    if state.enabled {
      return Ok(());
    }

    let tracker = ActiveTransactionTracker::new(self.tracker_capacity).map_err(|error| {
      warn!(%error, capacity = self.tracker_capacity, "cannot enable semi-sync replication");
      error
    })?;
    state.tracker = Some(tracker);
    state.reply_position = None;
    state.wait_position = None;
    state.commit_position = None;
    state.enabled = true;
    state.state_on = true;
    info!(capacity = self.tracker_capacity, "semi-sync replication enabled");
    Ok(())
  }

  /// Switches OFF, releases every waiter and drops the tracker.
  pub fn disable(&self) {
    let mut state = self.state.lock();
    if !state.enabled {
      return;
    }

    self.switch_off_locked(&mut state);
    state.tracker = None;
    state.commit_position = None;
    state.enabled = false;
    drop(state);

    self.ack_cond.notify_all();
    info!("semi-sync replication disabled");
  }

  pub fn is_enabled(&self) -> bool {
    self.state.lock().enabled
  }

  pub fn is_on(&self) -> bool {
    self.state.lock().state_on
  }

  pub fn timeout(&self) -> Duration {
    self.state.lock().timeout
  }

  pub fn set_timeout(&self, timeout: Duration) {
    self.state.lock().timeout = timeout;
  }

  /// Turning `wait_no_replica` off with no replica connected switches OFF
  /// right away.
  pub fn set_wait_no_replica(&self, wait: bool) {
    let mut state = self.state.lock();
    state.wait_no_replica = wait;

    let switch_off = Self::no_replica_to_wait_for(&state);
    if switch_off {
      self.switch_off_locked(&mut state);
    }
    drop(state);

    if switch_off {
      self.ack_cond.notify_all();
    }
  }

  /// Records that `position`, the end of a transaction, is durable in the
  /// local log.
  ///
  /// An out-of-order or unallocatable position switches the coordinator
  /// OFF. The error is handed back as a warning; the commit itself stands.
  /// A position whose stream id cannot travel in a reply is rejected
  /// without touching any state.
  pub fn on_transaction_committed_to_log(&self, position: &PositionKey) -> Result<()> {
    position.validate()?;

    let mut state = self.state.lock();
    if !state.enabled {
      return Ok(());
    }

    if !reached(state.commit_position.as_ref(), position) {
      state.commit_position = Some(position.clone());
    }
    if !state.state_on {
      return Ok(());
    }

    let inserted = match state.tracker.as_mut() {
      Some(tracker) => tracker.insert(position.clone()),
      None => Ok(()),
    };
    if let Err(error) = inserted {
      warn!(%position, %error, "cannot track transaction end, switching semi-sync off");
      self.switch_off_locked(&mut state);
      drop(state);
      self.ack_cond.notify_all();
      return Err(error);
    }
    Ok(())
  }

  /// Applies an acknowledgment for `position`. `skipped` marks positions
  /// of events the sender chose not to ship, whose bookkeeping still has
  /// to advance.
  pub fn on_replica_ack(&self, position: &PositionKey, skipped: bool) {
    self.apply_ack(position, skipped);
  }

  /// Returns whether the ack was applied rather than ignored.
  fn apply_ack(&self, position: &PositionKey, skipped: bool) -> bool {
    if let Err(error) = position.validate() {
      warn!(%error, "ignoring ack for invalid position");
      return false;
    }

    let mut state = self.state.lock();
    if !state.enabled {
      return false;
    }

    if !state.state_on {
      Self::try_switch_on_locked(&mut state, position);
    }

    if let Some(reply) = state.reply_position.as_ref() {
      if position < reply {
        debug!(%position, %reply, "ignoring ack behind reply position");
        return false;
      }
    }

    state.reply_position = Some(position.clone());
    let trimmed = state
      .tracker
      .as_mut()
      .map_or(0, |tracker| tracker.trim_up_to(Some(position)));

    let release = state
      .wait_position
      .as_ref()
      .is_some_and(|wait| position >= wait);
    if release {
      state.wait_position = None;
    }
    drop(state);

    debug!(%position, skipped, trimmed, release, "replica ack applied");
    if release {
      self.ack_cond.notify_all();
    }
    true
  }

  /// Receiver glue: decodes a reply payload and applies it. A malformed
  /// payload leaves the coordinator untouched.
  pub fn on_replica_reply(&self, payload: &[u8], network_wait: Duration) -> Result<PositionKey> {
    let position = transport::decode_reply_payload(payload).map_err(|error| {
      warn!(%error, len = payload.len(), "dropping malformed replica reply");
      error
    })?;

    if self.apply_ack(&position, false) {
      self.metrics.record_network_wait(network_wait);
    }
    Ok(position)
  }

  /// Blocks until some replica acknowledged `position`, the coordinator
  /// goes OFF, or `timeout` elapses. A timeout switches the coordinator
  /// OFF; the local commit is not affected either way.
  pub fn wait_for_ack(&self, position: &PositionKey, timeout: Duration) -> WaitOutcome {
    let started = Instant::now();
    let deadline = started.checked_add(timeout);

    let mut state = self.state.lock();
    if !state.enabled {
      return WaitOutcome::Disabled;
    }
    if let Err(error) = position.validate() {
      drop(state);
      warn!(%error, "not waiting on a position no reply can carry");
      self.metrics.record_unacked_transaction();
      return WaitOutcome::Disabled;
    }
    if !state.state_on {
      drop(state);
      self.metrics.record_unacked_transaction();
      return WaitOutcome::Disabled;
    }

    state.waiting_count += 1;
    let mut switched_off = false;
    let outcome = loop {
      if reached(state.reply_position.as_ref(), position) {
        break WaitOutcome::Acked;
      }
      if !state.enabled || !state.state_on {
        break WaitOutcome::Disabled;
      }
      if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
        warn!(
          %position,
          timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
          "timed out waiting for replica ack, switching semi-sync off"
        );
        self.switch_off_locked(&mut state);
        switched_off = true;
        break WaitOutcome::TimedOut;
      }

      // Re-asserted every round: an ack for an earlier waiter clears it.
      self.lower_wait_position_locked(&mut state, position);

      match deadline {
        Some(deadline) => {
          let _ = self.ack_cond.wait_until(&mut state, deadline);
        }
        None => self.ack_cond.wait(&mut state),
      }
    };
    state.waiting_count -= 1;
    drop(state);

    if switched_off {
      self.ack_cond.notify_all();
    }

    match outcome {
      WaitOutcome::Acked => self.metrics.record_acked_transaction(started.elapsed()),
      WaitOutcome::TimedOut => {
        self.metrics.record_timeout();
        self.metrics.record_unacked_transaction();
      }
      WaitOutcome::Disabled => self.metrics.record_unacked_transaction(),
    }
    debug!(
      %position,
      %outcome,
      waited_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
      "commit wait finished"
    );
    outcome
  }

  /// [`Self::wait_for_ack`] with the configured timeout.
  pub fn wait_for_commit(&self, position: &PositionKey) -> WaitOutcome {
    let timeout = self.timeout();
    self.wait_for_ack(position, timeout)
  }

  /// Whether the event ending at `position` should ask the replica for an
  /// acknowledgment.
  pub fn should_request_ack(&self, position: &PositionKey) -> bool {
    if position.validate().is_err() {
      return false;
    }

    let state = self.state.lock();
    if !state.enabled {
      return false;
    }

    if state.state_on {
      if reached(state.reply_position.as_ref(), position) {
        return false;
      }
      return state
        .tracker
        .as_ref()
        .is_some_and(|tracker| tracker.contains_as_transaction_end(position));
    }

    // OFF: probe once the sender has passed the last known commit.
    state
      .commit_position
      .as_ref()
      .map_or(true, |commit| position >= commit)
  }

  /// Reserves the sync header for a semi-sync peer. A buffer too small for
  /// it disables semi-sync.
  pub fn reserve_sync_header(&self, buffer: &mut [u8], peer_semi_sync: bool) -> Result<usize> {
    match transport::reserve_sync_header(buffer, peer_semi_sync) {
      Ok(len) => Ok(len),
      Err(error) => {
        warn!(%error, "cannot reserve sync header, disabling semi-sync");
        self.disable();
        Err(error)
      }
    }
  }

  /// Flags a reserved header when the event at `position` needs an ack.
  pub fn prepare_event_header(&self, header: &mut [u8], position: &PositionKey) -> bool {
    if header.len() < SYNC_HEADER_LEN {
      return false;
    }

    let request = self.should_request_ack(position);
    if request {
      transport::set_sync_flag(header);
    }
    request
  }

  pub fn add_replica(&self) {
    let mut state = self.state.lock();
    state.replica_count += 1;
    info!(replicas = state.replica_count, "semi-sync replica connected");
  }

  /// Without `wait_no_replica`, losing the last replica switches OFF.
  pub fn remove_replica(&self) {
    let mut state = self.state.lock();
    state.replica_count = state.replica_count.saturating_sub(1);
    info!(replicas = state.replica_count, "semi-sync replica disconnected");

    let switch_off = Self::no_replica_to_wait_for(&state);
    if switch_off {
      self.switch_off_locked(&mut state);
    }
    drop(state);

    if switch_off {
      self.ack_cond.notify_all();
    }
  }

  /// Forces the OFF state. Waiters are released with `Disabled`.
  pub fn switch_off(&self) {
    let mut state = self.state.lock();
    if !state.enabled || !state.state_on {
      return;
    }
    self.switch_off_locked(&mut state);
    drop(state);
    self.ack_cond.notify_all();
  }

  pub fn status(&self) -> AckCoordinatorStatus {
    let state = self.state.lock();
    AckCoordinatorStatus {
      enabled: state.enabled,
      state_on: state.state_on,
      reply_position: state.reply_position.clone(),
      wait_position: state.wait_position.clone(),
      commit_position: state.commit_position.clone(),
      tracked_transactions: state
        .tracker
        .as_ref()
        .map_or(0, ActiveTransactionTracker::count),
      waiting_sessions: state.waiting_count,
      replica_count: state.replica_count,
      timeout_ms: u64::try_from(state.timeout.as_millis()).unwrap_or(u64::MAX),
      wait_no_replica: state.wait_no_replica,
    }
  }

  /// Caller must broadcast on `ack_cond` once the guard is dropped.
  fn switch_off_locked(&self, state: &mut CoordinatorState) {
    let was_on = state.state_on;
    state.state_on = false;

    let cleared = state
      .tracker
      .as_mut()
      .map_or(0, |tracker| tracker.trim_up_to(None));
    state.wait_position = None;
    state.reply_position = None;

    if was_on {
      self.metrics.record_off_transition();
      warn!(
        cleared,
        waiting = state.waiting_count,
        commit_position = ?state.commit_position,
        "semi-sync replication switched OFF"
      );
    }
  }

  fn no_replica_to_wait_for(state: &CoordinatorState) -> bool {
    state.enabled && state.state_on && state.replica_count == 0 && !state.wait_no_replica
  }

  fn try_switch_on_locked(state: &mut CoordinatorState, position: &PositionKey) {
    let caught_up = state
      .commit_position
      .as_ref()
      .map_or(true, |commit| position >= commit);
    if caught_up {
      state.state_on = true;
      info!(%position, "semi-sync replication switched ON");
    }
  }

  fn lower_wait_position_locked(&self, state: &mut CoordinatorState, position: &PositionKey) {
    let lower = match state.wait_position.as_ref() {
      None => true,
      Some(wait) if position < wait => {
        self.metrics.record_wait_position_backtrack();
        true
      }
      Some(_) => false,
    };
    if lower {
      state.wait_position = Some(position.clone());
    }
  }
}
