//! Purpose: Cut a keyspace range into blocks and enqueue them for distributed workers.
//! Exports: `WorkDistributor`, `FillReport`.
//! Role: Producer side of distributed mode (`distgen fill`).
//! Invariants: One message per block, each with a fresh dedup id; batches never exceed the queue limit.
use num_bigint::BigUint;
use serde::Serialize;

use crate::api::queue::{ApiResult, MAX_BATCH_ENTRIES, OutgoingMessage, WorkQueue};
use crate::core::plan::{self, KeyRange};

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct FillReport {
    pub blocks: u64,
    pub batches: u64,
    /// Blocks the queue dropped as duplicates.
    pub suppressed: u64,
}

pub struct WorkDistributor<Q> {
    queue: Q,
}

impl<Q: WorkQueue> WorkDistributor<Q> {
    pub fn new(queue: Q) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn fill(&self, range: &KeyRange, block_size: &BigUint) -> ApiResult<FillReport> {
        let mut report = FillReport::default();
        let mut batch = Vec::with_capacity(MAX_BATCH_ENTRIES);
        for block in plan::partition(&range.start, &range.end, block_size)? {
            batch.push(OutgoingMessage::for_block(&block)?);
            if batch.len() == MAX_BATCH_ENTRIES {
                self.flush(&mut batch, &mut report)?;
            }
        }
        if !batch.is_empty() {
            self.flush(&mut batch, &mut report)?;
        }
        tracing::info!(
            blocks = report.blocks,
            batches = report.batches,
            start = %range.start,
            end = %range.end,
            "range enqueued"
        );
        Ok(report)
    }

    fn flush(&self, batch: &mut Vec<OutgoingMessage>, report: &mut FillReport) -> ApiResult<()> {
        let accepted = self.queue.send_batch(batch)? as u64;
        let sent = batch.len() as u64;
        report.blocks += accepted;
        report.suppressed += sent - accepted;
        report.batches += 1;
        tracing::debug!(entries = sent, accepted, "batch sent");
        batch.clear();
        Ok(())
    }
}
