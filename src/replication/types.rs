//! Replication log position and wait outcome types.

use crate::error::{AckError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Longest stream id accepted on the wire or in a position.
pub const MAX_STREAM_ID_LEN: usize = 512;

/// A point in the replication log: the log stream id plus a byte offset
/// inside that stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
  pub stream_id: String,
  pub offset: u64,
}

impl PositionKey {
  pub fn new(stream_id: impl Into<String>, offset: u64) -> Self {
    Self {
      stream_id: stream_id.into(),
      offset,
    }
  }

  /// Like [`PositionKey::new`], but rejects stream ids over
  /// [`MAX_STREAM_ID_LEN`] bytes.
  pub fn try_new(stream_id: impl Into<String>, offset: u64) -> Result<Self> {
    let position = Self::new(stream_id, offset);
    position.validate()?;
    Ok(position)
  }

  /// Checks the stream id bound a position must meet to travel in a reply.
  pub fn validate(&self) -> Result<()> {
    if self.stream_id.len() > MAX_STREAM_ID_LEN {
      return Err(AckError::InvalidPosition(format!(
        "stream id is {} bytes, limit is {MAX_STREAM_ID_LEN}",
        self.stream_id.len()
      )));
    }
    Ok(())
  }
}

impl fmt::Display for PositionKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.stream_id, self.offset)
  }
}

impl Ord for PositionKey {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .stream_id
      .as_bytes()
      .cmp(other.stream_id.as_bytes())
      .then_with(|| self.offset.cmp(&other.offset))
  }
}

impl PartialOrd for PositionKey {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl FromStr for PositionKey {
  type Err = AckError;

  fn from_str(raw: &str) -> Result<Self> {
    // Stream ids may themselves contain ':', the offset never does.
    let (stream_id, offset) = raw
      .rsplit_once(':')
      .ok_or_else(|| AckError::InvalidPosition(format!("missing offset: {raw}")))?;

    if offset.is_empty() || !offset.bytes().all(|byte| byte.is_ascii_digit()) {
      return Err(AckError::InvalidPosition(format!("invalid offset: {offset}")));
    }
    let offset = offset
      .parse::<u64>()
      .map_err(|_| AckError::InvalidPosition(format!("offset overflow: {raw}")))?;

    Self::try_new(stream_id, offset)
  }
}

/// True when `watermark` is set and has reached `position`.
pub(crate) fn reached(watermark: Option<&PositionKey>, position: &PositionKey) -> bool {
  watermark.is_some_and(|mark| mark >= position)
}

/// How a commit-side wait for a replica acknowledgment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WaitOutcome {
  /// Some replica acknowledged the position.
  Acked,
  /// The deadline passed first; the coordinator switched OFF.
  TimedOut,
  /// Semi-sync is disabled or OFF, nothing was awaited.
  Disabled,
}

impl fmt::Display for WaitOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let value = match self {
      WaitOutcome::Acked => "acked",
      WaitOutcome::TimedOut => "timed_out",
      WaitOutcome::Disabled => "disabled",
    };
    write!(f, "{value}")
  }
}
