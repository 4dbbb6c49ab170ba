//! Wire pieces of the semi-sync protocol: the 3-byte header prepended to
//! every event sent to a semi-sync replica, and the reply payload a
//! replica sends back to acknowledge a position.
//!
//! Sync header: `[reserved, PACKET_MAGIC, flag]`, flag 1 asks for an ack.
//! Reply payload: `[PACKET_MAGIC, offset: u64 BE, stream_id bytes...]`,
//! the stream id runs to the end of the payload.

use super::types::{PositionKey, MAX_STREAM_ID_LEN};
use crate::error::{AckError, Result};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

pub const PACKET_MAGIC: u8 = 0xEF;
pub const SYNC_FLAG_NONE: u8 = 0;
pub const SYNC_FLAG_ACK: u8 = 1;

pub const SYNC_HEADER_LEN: usize = 3;
pub const SYNC_MAGIC_OFFSET: usize = 1;
pub const SYNC_FLAG_OFFSET: usize = 2;

pub const REPLY_MAGIC_OFFSET: usize = 0;
pub const REPLY_OFFSET_OFFSET: usize = 1;
pub const REPLY_STREAM_ID_OFFSET: usize = 9;

/// Writes the sync header at the front of `buffer` and returns its length.
///
/// Returns 0 without touching the buffer when the peer did not negotiate
/// semi-sync. A buffer shorter than the header is an error the caller must
/// answer by disabling the coordinator.
pub fn reserve_sync_header(buffer: &mut [u8], peer_semi_sync: bool) -> Result<usize> {
  if !peer_semi_sync {
    return Ok(0);
  }

  if buffer.len() < SYNC_HEADER_LEN {
    return Err(AckError::HeaderBufferTooSmall {
      capacity: buffer.len(),
      required: SYNC_HEADER_LEN,
    });
  }

  buffer[0] = 0;
  buffer[SYNC_MAGIC_OFFSET] = PACKET_MAGIC;
  buffer[SYNC_FLAG_OFFSET] = SYNC_FLAG_NONE;
  Ok(SYNC_HEADER_LEN)
}

/// Marks a reserved header as requesting an acknowledgment.
pub fn set_sync_flag(header: &mut [u8]) {
  if let Some(flag) = header.get_mut(SYNC_FLAG_OFFSET) {
    *flag = SYNC_FLAG_ACK;
  }
}

/// Replica-side view of a sync header: whether an ack was requested.
pub fn read_sync_header(header: &[u8]) -> Result<bool> {
  if header.len() < SYNC_HEADER_LEN {
    return Err(AckError::MalformedReply(format!(
      "sync header too short: {} bytes",
      header.len()
    )));
  }
  if header[SYNC_MAGIC_OFFSET] != PACKET_MAGIC {
    return Err(AckError::MalformedReply(format!(
      "sync header has invalid magic {:#04x}",
      header[SYNC_MAGIC_OFFSET]
    )));
  }

  match header[SYNC_FLAG_OFFSET] {
    SYNC_FLAG_NONE => Ok(false),
    SYNC_FLAG_ACK => Ok(true),
    other => Err(AckError::MalformedReply(format!(
      "sync header has invalid flag {other}"
    ))),
  }
}

/// Builds the reply a replica sends after receiving a flagged event.
pub fn encode_reply_payload(position: &PositionKey) -> Result<Vec<u8>> {
  position.validate()?;
  let stream_id = position.stream_id.as_bytes();

  let mut bytes = Vec::with_capacity(REPLY_STREAM_ID_OFFSET + stream_id.len());
  bytes.push(PACKET_MAGIC);
  bytes
    .write_u64::<BigEndian>(position.offset)
    .map_err(|error| AckError::InvalidPosition(format!("encode reply offset: {error}")))?;
  bytes.extend_from_slice(stream_id);
  Ok(bytes)
}

pub fn decode_reply_payload(payload: &[u8]) -> Result<PositionKey> {
  if payload.len() < REPLY_STREAM_ID_OFFSET {
    return Err(AckError::MalformedReply(format!(
      "reply payload too short: {} bytes",
      payload.len()
    )));
  }

  if payload[REPLY_MAGIC_OFFSET] != PACKET_MAGIC {
    return Err(AckError::MalformedReply(format!(
      "reply payload has invalid magic {:#04x}",
      payload[REPLY_MAGIC_OFFSET]
    )));
  }

  let offset = BigEndian::read_u64(&payload[REPLY_OFFSET_OFFSET..REPLY_STREAM_ID_OFFSET]);
  let stream_id = &payload[REPLY_STREAM_ID_OFFSET..];
  if stream_id.len() > MAX_STREAM_ID_LEN {
    return Err(AckError::MalformedReply(format!(
      "reply stream id is {} bytes, limit is {MAX_STREAM_ID_LEN}",
      stream_id.len()
    )));
  }

  let stream_id = std::str::from_utf8(stream_id)
    .map_err(|_| AckError::MalformedReply("reply stream id is not valid utf-8".to_string()))?;
  Ok(PositionKey::new(stream_id, offset))
}
