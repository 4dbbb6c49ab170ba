//! Semi-sync replication primitives: log positions, the active
//! transaction tracker, the sync header / reply codec and the
//! acknowledgment coordinator that ties them together.

pub mod coordinator;
pub mod metrics;
pub mod options;
pub mod tracker;
pub mod transport;
pub mod types;

pub use coordinator::{AckCoordinatorStatus, ReplicationAckCoordinator};
pub use metrics::{AckMetrics, AckMetricsSink, AckMetricsSnapshot};
pub use options::AckCoordinatorOptions;
pub use tracker::ActiveTransactionTracker;
pub use types::{PositionKey, WaitOutcome};
