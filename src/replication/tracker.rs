//! Ordered set of transaction end positions still awaiting a replica ack.
//!
//! Nodes live in an arena addressed by index. Each node sits on a doubly
//! linked list kept in ascending position order and on exactly one hash
//! bucket chain, so membership checks stay O(1) on average while trimming
//! walks the list from the front.

use super::types::PositionKey;
use crate::error::{AckError, Result};
use xxhash_rust::xxh64::xxh64;

const STREAM_HASH_SEED: u64 = 0x9e37_79b9_7f4a_7c15;
const OFFSET_HASH_SEED: u64 = 0xc2b2_ae3d_27d4_eb4f;

#[derive(Debug)]
struct TransactionNode {
  position: PositionKey,
  prev: Option<usize>,
  next: Option<usize>,
  hash_next: Option<usize>,
}

#[derive(Debug)]
pub struct ActiveTransactionTracker {
  buckets: Vec<Option<usize>>,
  slots: Vec<Option<TransactionNode>>,
  free: Vec<usize>,
  head: Option<usize>,
  tail: Option<usize>,
  len: usize,
}

impl ActiveTransactionTracker {
  /// Creates a tracker whose bucket table is twice `capacity_hint`. The
  /// table never resizes; node storage grows on demand.
  pub fn new(capacity_hint: usize) -> Result<Self> {
    let bucket_count = capacity_hint.max(1).saturating_mul(2);
    let mut buckets = Vec::new();
    buckets
      .try_reserve_exact(bucket_count)
      .map_err(|_| AckError::AllocationFailed {
        requested: bucket_count,
      })?;
    buckets.resize(bucket_count, None);

    Ok(Self {
      buckets,
      slots: Vec::new(),
      free: Vec::new(),
      head: None,
      tail: None,
      len: 0,
    })
  }

  pub fn count(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn bucket_count(&self) -> usize {
    self.buckets.len()
  }

  /// Oldest tracked position.
  pub fn first(&self) -> Option<&PositionKey> {
    self.head.map(|index| &self.node(index).position)
  }

  /// Newest tracked position.
  pub fn last(&self) -> Option<&PositionKey> {
    self.tail.map(|index| &self.node(index).position)
  }

  /// Appends `position` at the tail. It must sort strictly after the
  /// current tail; otherwise nothing changes and `OutOfOrder` is returned.
  pub fn insert(&mut self, position: PositionKey) -> Result<()> {
    if let Some(tail) = self.last() {
      if position <= *tail {
        return Err(AckError::OutOfOrder {
          position,
          tail: tail.clone(),
        });
      }
    }

    let bucket = self.bucket_of(&position);
    let node = TransactionNode {
      position,
      prev: self.tail,
      next: None,
      hash_next: self.buckets[bucket],
    };
    let index = self.allocate(node)?;

    match self.tail {
      Some(tail) => self.node_mut(tail).next = Some(index),
      None => self.head = Some(index),
    }
    self.tail = Some(index);
    self.buckets[bucket] = Some(index);
    self.len += 1;
    Ok(())
  }

  /// Whether `position` is tracked as the end of some transaction.
  pub fn contains_as_transaction_end(&self, position: &PositionKey) -> bool {
    let mut cursor = self.buckets[self.bucket_of(position)];
    while let Some(index) = cursor {
      let node = self.node(index);
      if node.position == *position {
        return true;
      }
      cursor = node.hash_next;
    }
    false
  }

  /// Drops every node at or before `up_to`, or every node when `up_to` is
  /// `None`. Returns how many nodes were removed.
  pub fn trim_up_to(&mut self, up_to: Option<&PositionKey>) -> usize {
    let Some(up_to) = up_to else {
      return self.clear();
    };

    let mut removed = 0;
    while let Some(index) = self.head {
      if self.node(index).position > *up_to {
        break;
      }
      self.unlink_from_bucket(index);
      let node = self.release(index);
      self.head = node.next;
      removed += 1;
    }

    match self.head {
      Some(head) => self.node_mut(head).prev = None,
      None => self.tail = None,
    }
    self.len -= removed;
    removed
  }

  fn clear(&mut self) -> usize {
    let removed = self.len;
    self.buckets.iter_mut().for_each(|bucket| *bucket = None);

    let mut cursor = self.head;
    while let Some(index) = cursor {
      cursor = self.node(index).next;
      self.slots[index] = None;
      self.free.push(index);
    }

    self.head = None;
    self.tail = None;
    self.len = 0;
    removed
  }

  fn bucket_of(&self, position: &PositionKey) -> usize {
    let stream_hash = xxh64(position.stream_id.as_bytes(), STREAM_HASH_SEED);
    let offset_hash = xxh64(&position.offset.to_le_bytes(), OFFSET_HASH_SEED);
    (stream_hash.wrapping_add(offset_hash) % self.buckets.len() as u64) as usize
  }

  fn allocate(&mut self, node: TransactionNode) -> Result<usize> {
    if let Some(index) = self.free.pop() {
      self.slots[index] = Some(node);
      return Ok(index);
    }

    let requested = self.slots.len() + 1;
    self
      .slots
      .try_reserve(1)
      .map_err(|_| AckError::AllocationFailed { requested })?;
    self.slots.push(Some(node));
    Ok(self.slots.len() - 1)
  }

  fn release(&mut self, index: usize) -> TransactionNode {
    let node = self.slots[index]
      .take()
      .unwrap_or_else(|| unreachable!("released vacant tracker slot {index}"));
    self.free.push(index);
    node
  }

  fn unlink_from_bucket(&mut self, index: usize) {
    let bucket = self.bucket_of(&self.node(index).position);
    let successor = self.node(index).hash_next;

    if self.buckets[bucket] == Some(index) {
      self.buckets[bucket] = successor;
      return;
    }

    let mut cursor = self.buckets[bucket];
    while let Some(current) = cursor {
      let next = self.node(current).hash_next;
      if next == Some(index) {
        self.node_mut(current).hash_next = successor;
        return;
      }
      cursor = next;
    }
  }

  fn node(&self, index: usize) -> &TransactionNode {
    self.slots[index]
      .as_ref()
      .unwrap_or_else(|| unreachable!("linked tracker slot {index} is vacant"))
  }

  fn node_mut(&mut self, index: usize) -> &mut TransactionNode {
    self.slots[index]
      .as_mut()
      .unwrap_or_else(|| unreachable!("linked tracker slot {index} is vacant"))
  }

  #[cfg(test)]
  fn chained_nodes(&self) -> usize {
    let mut total = 0;
    for head in &self.buckets {
      let mut cursor = *head;
      while let Some(index) = cursor {
        total += 1;
        cursor = self.node(index).hash_next;
      }
    }
    total
  }
}
