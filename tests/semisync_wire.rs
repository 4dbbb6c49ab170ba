use std::sync::Arc;
use std::time::Duration;

use semisync::replication::transport::{
  encode_reply_payload, read_sync_header, PACKET_MAGIC, SYNC_HEADER_LEN,
};
use semisync::{
  AckCoordinatorOptions, AckError, AckMetrics, PositionKey, ReplicationAckCoordinator, WaitOutcome,
};

fn open_coordinator(metrics: Arc<AckMetrics>) -> ReplicationAckCoordinator {
  ReplicationAckCoordinator::with_metrics(AckCoordinatorOptions::new().enabled(true), metrics)
    .expect("open coordinator")
}

#[test]
fn sender_flags_only_tracked_transaction_ends() {
  let coordinator = open_coordinator(Arc::new(AckMetrics::new()));
  let end = PositionKey::new("log.000007", 4_096);
  coordinator
    .on_transaction_committed_to_log(&end)
    .expect("commit");

  let mut packet = vec![0u8; 64];
  let header_len = coordinator
    .reserve_sync_header(&mut packet, true)
    .expect("reserve");
  assert_eq!(header_len, SYNC_HEADER_LEN);
  assert_eq!(packet[1], PACKET_MAGIC);

  coordinator.prepare_event_header(&mut packet[..header_len], &PositionKey::new("log.000007", 2_048));
  assert!(!read_sync_header(&packet).expect("read header"));

  coordinator.prepare_event_header(&mut packet[..header_len], &end);
  assert!(read_sync_header(&packet).expect("read header"));

  let mut plain = vec![0u8; 64];
  assert_eq!(
    coordinator
      .reserve_sync_header(&mut plain, false)
      .expect("plain peer"),
    0
  );
}

#[test]
fn decoded_reply_releases_commit() {
  let metrics = Arc::new(AckMetrics::new());
  let coordinator = Arc::new(open_coordinator(metrics.clone()));
  let end = PositionKey::new("log.000007", u64::MAX - 1);
  coordinator
    .on_transaction_committed_to_log(&end)
    .expect("commit");

  let waiter = {
    let coordinator = coordinator.clone();
    let end = end.clone();
    std::thread::spawn(move || coordinator.wait_for_ack(&end, Duration::from_secs(5)))
  };

  let payload = encode_reply_payload(&end).expect("encode reply");
  let acked = coordinator
    .on_replica_reply(&payload, Duration::from_micros(250))
    .expect("apply reply");
  assert_eq!(acked, end);
  assert_eq!(waiter.join().expect("waiter"), WaitOutcome::Acked);

  let snapshot = metrics.snapshot();
  assert_eq!(snapshot.network_waits, 1);
  assert_eq!(snapshot.avg_network_wait_micros, 250);
}

#[test]
fn malformed_reply_leaves_state_untouched() {
  let coordinator = open_coordinator(Arc::new(AckMetrics::new()));
  coordinator
    .on_transaction_committed_to_log(&PositionKey::new("log.1", 10))
    .expect("commit");
  let before = coordinator.status();

  let mut payload = encode_reply_payload(&PositionKey::new("log.1", 10)).expect("encode");
  payload[0] = 0x01;
  let err = coordinator
    .on_replica_reply(&payload, Duration::ZERO)
    .expect_err("bad magic");
  assert!(matches!(err, AckError::MalformedReply(_)));

  let err = coordinator
    .on_replica_reply(&[PACKET_MAGIC, 0, 0, 0], Duration::ZERO)
    .expect_err("short payload");
  assert!(matches!(err, AckError::MalformedReply(_)));

  assert_eq!(coordinator.status(), before);
}

#[test]
fn undersized_header_buffer_disables_coordinator() {
  let coordinator = open_coordinator(Arc::new(AckMetrics::new()));
  let mut tiny = [0u8; 2];
  let err = coordinator
    .reserve_sync_header(&mut tiny, true)
    .expect_err("buffer too small");
  assert!(
    err.to_string().contains("needs 3 bytes"),
    "unexpected error: {err}"
  );
  assert!(!coordinator.is_enabled());
  assert!(!coordinator.should_request_ack(&PositionKey::new("log.1", 1)));
}

#[test]
fn replies_to_disabled_coordinator_record_no_network_wait() {
  let metrics = Arc::new(AckMetrics::new());
  let coordinator =
    ReplicationAckCoordinator::with_metrics(AckCoordinatorOptions::new(), metrics.clone())
      .expect("open coordinator");

  let payload = encode_reply_payload(&PositionKey::new("log.1", 10)).expect("encode");
  coordinator
    .on_replica_reply(&payload, Duration::from_micros(100))
    .expect("well-formed reply");

  assert_eq!(metrics.snapshot().network_waits, 0);
  assert_eq!(coordinator.status().reply_position, None);
}
