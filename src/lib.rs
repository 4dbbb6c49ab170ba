//! semisync: primary-side acknowledgment engine for semi-synchronous
//! replication.
//!
//! The commit path reports durably appended transaction end positions,
//! then blocks until a replica acknowledges them or a timeout fires. The
//! network sender asks whether an outgoing event should carry the
//! ack-request flag, and the receiver feeds decoded replies back in.

pub mod error;
pub mod replication;

pub use error::{AckError, Result};
pub use replication::{
  AckCoordinatorOptions, AckCoordinatorStatus, AckMetrics, AckMetricsSink,
  ActiveTransactionTracker, PositionKey, ReplicationAckCoordinator, WaitOutcome,
};
