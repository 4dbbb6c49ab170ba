//! Coordinator configuration.

use crate::error::{AckError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_TRACKER_CAPACITY: usize = 256;
pub const MAX_TRACKER_CAPACITY: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AckCoordinatorOptions {
  /// Enable semi-sync as soon as the coordinator is built.
  pub enabled: bool,
  pub timeout_ms: u64,
  /// Keep waiting for acks while no semi-sync replica is connected.
  pub wait_no_replica: bool,
  /// Expected number of concurrently committing sessions; sizes the
  /// tracker's bucket table.
  pub tracker_capacity: usize,
}

impl Default for AckCoordinatorOptions {
  fn default() -> Self {
    Self {
      enabled: false,
      timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
      wait_no_replica: true,
      tracker_capacity: DEFAULT_TRACKER_CAPACITY,
    }
  }
}

impl AckCoordinatorOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    self
  }

  pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
    self.timeout_ms = timeout_ms;
    self
  }

  pub fn wait_no_replica(mut self, wait: bool) -> Self {
    self.wait_no_replica = wait;
    self
  }

  pub fn tracker_capacity(mut self, capacity: usize) -> Self {
    self.tracker_capacity = capacity;
    self
  }

  pub fn ack_timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }

  pub fn from_json_str(raw: &str) -> Result<Self> {
    let options: Self = serde_json::from_str(raw)
      .map_err(|error| AckError::Config(format!("decode coordinator options: {error}")))?;
    options.validate()?;
    Ok(options)
  }

  pub fn validate(&self) -> Result<()> {
    if self.timeout_ms == 0 {
      return Err(AckError::Config("timeout_ms must be positive".to_string()));
    }
    if self.tracker_capacity == 0 || self.tracker_capacity > MAX_TRACKER_CAPACITY {
      return Err(AckError::Config(format!(
        "tracker_capacity must be in 1..={MAX_TRACKER_CAPACITY}, got {}",
        self.tracker_capacity
      )));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::AckCoordinatorOptions;
  use std::time::Duration;

  #[test]
  fn builder_sets_fields() {
    let options = AckCoordinatorOptions::new()
      .enabled(true)
      .timeout(Duration::from_millis(250))
      .wait_no_replica(false)
      .tracker_capacity(16);

    assert!(options.enabled);
    assert_eq!(options.ack_timeout(), Duration::from_millis(250));
    assert!(!options.wait_no_replica);
    assert_eq!(options.tracker_capacity, 16);
    options.validate().expect("valid");
  }

  #[test]
  fn json_fills_defaults_and_validates() {
    let options =
      AckCoordinatorOptions::from_json_str(r#"{"enabled":true,"timeout_ms":500}"#).expect("parse");
    assert!(options.enabled);
    assert_eq!(options.timeout_ms, 500);
    assert!(options.wait_no_replica);

    assert!(AckCoordinatorOptions::from_json_str(r#"{"timeout_ms":0}"#).is_err());
    assert!(AckCoordinatorOptions::from_json_str(r#"{"tracker_capacity":0}"#).is_err());
    assert!(AckCoordinatorOptions::new()
      .tracker_capacity(usize::MAX / 2)
      .validate()
      .is_err());
    AckCoordinatorOptions::new()
      .tracker_capacity(super::MAX_TRACKER_CAPACITY)
      .validate()
      .expect("largest capacity");
    assert!(AckCoordinatorOptions::from_json_str("not json").is_err());
  }
}
