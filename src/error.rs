//! Error types for the acknowledgment engine.

use thiserror::Error;

use crate::replication::types::PositionKey;

#[derive(Debug, Error)]
pub enum AckError {
  /// A transaction end position arrived that is not past the tracker tail.
  #[error("transaction position {position} is not after tracked tail {tail}")]
  OutOfOrder {
    position: PositionKey,
    tail: PositionKey,
  },

  #[error("failed to allocate tracker node storage for {requested} nodes")]
  AllocationFailed { requested: usize },

  #[error("sync header needs {required} bytes but only {capacity} are available")]
  HeaderBufferTooSmall { capacity: usize, required: usize },

  #[error("malformed replica reply: {0}")]
  MalformedReply(String),

  #[error("invalid position: {0}")]
  InvalidPosition(String),

  #[error("invalid configuration: {0}")]
  Config(String),
}

pub type Result<T> = std::result::Result<T, AckError>;
