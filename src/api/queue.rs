//! Purpose: Work-queue contract plus an in-process, at-least-once implementation.
//! Exports: `WorkQueue`, `OutgoingMessage`, `ReceivedMessage`, `MemoryQueue`, `random_id`,
//!          `MAX_BATCH_ENTRIES`.
//! Role: Seam between block producers/consumers and whatever queue service backs them.
//! Invariants: Batched sends carry at most `MAX_BATCH_ENTRIES` entries.
//! Invariants: Received messages stay invisible until deleted or the visibility timeout lapses.
//! Invariants: Deleting a receipt that is no longer in flight fails; acks never double up.
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use getrandom::fill as fill_random;

use crate::core::error::{Error, ErrorKind};
use crate::core::plan::Block;

pub type ApiResult<T> = Result<T, Error>;

pub const MAX_BATCH_ENTRIES: usize = 10;
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutgoingMessage {
    pub id: String,
    pub dedup_id: String,
    pub group_id: String,
    pub body: String,
}

impl OutgoingMessage {
    pub fn new(body: impl Into<String>) -> ApiResult<Self> {
        Ok(Self {
            id: random_id()?,
            dedup_id: random_id()?,
            group_id: random_id()?,
            body: body.into(),
        })
    }

    pub fn for_block(block: &Block) -> ApiResult<Self> {
        Self::new(block.to_body()?)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReceivedMessage {
    pub receipt: String,
    pub body: String,
    pub receive_count: u32,
}

pub trait WorkQueue: Send + Sync {
    /// Enqueues up to `MAX_BATCH_ENTRIES` messages; returns how many were accepted
    /// (entries whose dedup id was already seen are dropped).
    fn send_batch(&self, entries: &[OutgoingMessage]) -> ApiResult<usize>;

    fn receive(&self, max: usize) -> ApiResult<Vec<ReceivedMessage>>;

    fn delete(&self, receipt: &str) -> ApiResult<()>;
}

impl<Q: WorkQueue + ?Sized> WorkQueue for Arc<Q> {
    fn send_batch(&self, entries: &[OutgoingMessage]) -> ApiResult<usize> {
        (**self).send_batch(entries)
    }

    fn receive(&self, max: usize) -> ApiResult<Vec<ReceivedMessage>> {
        (**self).receive(max)
    }

    fn delete(&self, receipt: &str) -> ApiResult<()> {
        (**self).delete(receipt)
    }
}

pub(crate) fn check_batch(entries: &[OutgoingMessage]) -> ApiResult<()> {
    if entries.len() > MAX_BATCH_ENTRIES {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "batch of {} entries exceeds the limit of {MAX_BATCH_ENTRIES}",
            entries.len()
        )));
    }
    Ok(())
}

/// 16 random bytes, hex encoded.
pub fn random_id() -> ApiResult<String> {
    let mut bytes = [0u8; 16];
    fill_random(&mut bytes).map_err(|err| {
        Error::new(ErrorKind::Internal).with_message(format!("failed to generate message id: {err}"))
    })?;
    Ok(bytes.iter().map(|byte| format!("{byte:02x}")).collect())
}

#[derive(Debug)]
struct Stored {
    body: String,
    receive_count: u32,
}

#[derive(Debug)]
struct InFlight {
    message: Stored,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct MemoryState {
    ready: VecDeque<Stored>,
    in_flight: HashMap<String, InFlight>,
    seen_dedup: HashSet<String>,
    next_receipt: u64,
}

/// FIFO queue living in process memory; useful for tests and single-process runs.
#[derive(Debug)]
pub struct MemoryQueue {
    visibility_timeout: Duration,
    state: Mutex<MemoryState>,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            visibility_timeout,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn ready_len(&self) -> usize {
        self.lock().map(|state| state.ready.len()).unwrap_or(0)
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock().map(|state| state.in_flight.len()).unwrap_or(0)
    }

    fn lock(&self) -> ApiResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("queue state lock poisoned"))
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(DEFAULT_VISIBILITY_TIMEOUT)
    }
}

impl WorkQueue for MemoryQueue {
    fn send_batch(&self, entries: &[OutgoingMessage]) -> ApiResult<usize> {
        check_batch(entries)?;
        let mut state = self.lock()?;
        let mut accepted = 0;
        for entry in entries {
            if !state.seen_dedup.insert(entry.dedup_id.clone()) {
                continue;
            }
            state.ready.push_back(Stored {
                body: entry.body.clone(),
                receive_count: 0,
            });
            accepted += 1;
        }
        Ok(accepted)
    }

    fn receive(&self, max: usize) -> ApiResult<Vec<ReceivedMessage>> {
        let mut state = self.lock()?;
        let now = Instant::now();

        let mut expired: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        expired.sort_by_key(|receipt| std::cmp::Reverse(state.in_flight[receipt].deadline));
        for receipt in expired {
            if let Some(entry) = state.in_flight.remove(&receipt) {
                state.ready.push_front(entry.message);
            }
        }

        let mut received = Vec::new();
        while received.len() < max {
            let Some(mut message) = state.ready.pop_front() else {
                break;
            };
            message.receive_count += 1;
            state.next_receipt += 1;
            let receipt = format!("receipt-{}", state.next_receipt);
            received.push(ReceivedMessage {
                receipt: receipt.clone(),
                body: message.body.clone(),
                receive_count: message.receive_count,
            });
            state.in_flight.insert(
                receipt,
                InFlight {
                    message,
                    deadline: now + self.visibility_timeout,
                },
            );
        }
        Ok(received)
    }

    fn delete(&self, receipt: &str) -> ApiResult<()> {
        let mut state = self.lock()?;
        match state.in_flight.remove(receipt) {
            Some(_) => Ok(()),
            None => Err(Error::new(ErrorKind::Queue)
                .with_message(format!("receipt {receipt} is not in flight"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MAX_BATCH_ENTRIES, MemoryQueue, OutgoingMessage, WorkQueue, random_id};
    use crate::core::error::ErrorKind;
    use std::time::Duration;

    fn message(body: &str) -> OutgoingMessage {
        OutgoingMessage::new(body).unwrap()
    }

    #[test]
    fn delivers_in_fifo_order_and_hides_in_flight() {
        let queue = MemoryQueue::default();
        assert_eq!(queue.send_batch(&[message("a"), message("b")]).unwrap(), 2);

        let first = queue.receive(1).unwrap();
        assert_eq!(first[0].body, "a");
        let second = queue.receive(5).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].body, "b");
        assert!(queue.receive(1).unwrap().is_empty());
        assert_eq!(queue.in_flight_len(), 2);
    }

    #[test]
    fn duplicate_dedup_ids_are_suppressed() {
        let queue = MemoryQueue::default();
        let original = message("a");
        let mut replay = message("a");
        replay.dedup_id = original.dedup_id.clone();
        assert_eq!(queue.send_batch(&[original]).unwrap(), 1);
        assert_eq!(queue.send_batch(&[replay]).unwrap(), 0);
        assert_eq!(queue.ready_len(), 1);
    }

    #[test]
    fn unacknowledged_messages_are_redelivered() {
        let queue = MemoryQueue::new(Duration::ZERO);
        queue.send_batch(&[message("a")]).unwrap();
        let first = queue.receive(1).unwrap().remove(0);
        let again = queue.receive(1).unwrap().remove(0);
        assert_eq!(again.body, "a");
        assert_eq!(again.receive_count, 2);
        assert_ne!(first.receipt, again.receipt);

        let err = queue.delete(&first.receipt).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Queue);
    }

    #[test]
    fn delete_acknowledges_exactly_once() {
        let queue = MemoryQueue::default();
        queue.send_batch(&[message("a")]).unwrap();
        let received = queue.receive(1).unwrap().remove(0);
        queue.delete(&received.receipt).unwrap();
        assert!(queue.delete(&received.receipt).is_err());
        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(queue.ready_len(), 0);
    }

    #[test]
    fn oversized_batches_are_rejected() {
        let queue = MemoryQueue::default();
        let entries: Vec<OutgoingMessage> =
            (0..=MAX_BATCH_ENTRIES).map(|i| message(&i.to_string())).collect();
        let err = queue.send_batch(&entries).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn random_ids_are_hex_and_distinct() {
        let a = random_id().unwrap();
        let b = random_id().unwrap();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
