//! Purpose: Consume queued blocks: enumerate, digest, persist, upload, then acknowledge.
//! Exports: `Worker`, `PollOutcome`, `WorkerReport`, `compute_keyspace`, `enumerate_block`, `run_workers`.
//! Role: Consumer side of distributed mode (`distgen work`), one loop per thread.
//! Invariants: A block is acknowledged only after its artifact reached the sink and the local copy is gone.
//! Invariants: Any failure before the ack leaves the message for redelivery; the loop keeps going.
//! Invariants: Interrupts are observed between records; the output is flushed and the block stays unacked.
//! Invariants: Reprocessing a block truncates its local file, so redelivery yields identical bytes.
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::api::queue::{ApiResult, WorkQueue};
use crate::api::sink::ObjectSink;
use crate::core::alphabet::Alphabet;
use crate::core::codec;
use crate::core::digest::DigestPipeline;
use crate::core::error::{Error, ErrorKind};
use crate::core::keyspace::KeyspaceEnumerator;
use crate::core::plan::Block;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const PAUSE_STEP: Duration = Duration::from_millis(100);

/// Writes one record per value from `seed` through the inclusive `stop`; returns the record count.
pub fn compute_keyspace<W: Write>(
    seed: &str,
    stop: Option<&str>,
    alphabet: &Alphabet,
    pipeline: &DigestPipeline,
    out: &mut W,
    cancel: Option<&AtomicBool>,
) -> ApiResult<u64> {
    let mut enumerator = KeyspaceEnumerator::new(seed, alphabet)?;
    if let Some(stop) = stop {
        enumerator = enumerator.with_stop(stop)?;
    }

    let mut records = 0u64;
    for value in enumerator {
        if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            out.flush().map_err(write_error)?;
            return Err(Error::new(ErrorKind::Interrupted)
                .with_message(format!("interrupted after {records} records")));
        }
        pipeline.write_record(&value, out)?;
        records += 1;
    }
    out.flush().map_err(write_error)?;
    Ok(records)
}

/// Seeds at `encode(block.start)` and stops after `encode(block.stop)`.
pub fn enumerate_block<W: Write>(
    block: &Block,
    alphabet: &Alphabet,
    pipeline: &DigestPipeline,
    out: &mut W,
    cancel: Option<&AtomicBool>,
) -> ApiResult<u64> {
    if block.is_empty() {
        return Ok(0);
    }
    let seed = codec::encode(&block.start, alphabet);
    let stop = codec::encode(&block.stop, alphabet);
    compute_keyspace(&seed, Some(&stop), alphabet, pipeline, out, cancel)
        .map_err(|err| err.with_block(block))
}

fn write_error(err: std::io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to flush output")
        .with_source(err)
}

#[derive(Debug)]
pub enum PollOutcome {
    Idle,
    Completed { block: Block, records: u64 },
    Failed { block: Block, error: Error },
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct WorkerReport {
    pub worker: usize,
    pub blocks_completed: u64,
    /// Transient failures; the block is redelivered.
    pub blocks_failed: u64,
    /// Blocks this worker's configuration cannot process (e.g. a different charset).
    pub blocks_rejected: u64,
    /// Receives that failed or returned an undecodable body.
    pub poll_errors: u64,
    pub records: u64,
    pub interrupted: bool,
}

#[derive(Clone)]
pub struct Worker<Q, S> {
    id: usize,
    queue: Q,
    sink: S,
    alphabet: Alphabet,
    pipeline: DigestPipeline,
    work_dir: PathBuf,
    poll_interval: Duration,
    drain: bool,
    cancel: Arc<AtomicBool>,
}

impl<Q: WorkQueue, S: ObjectSink> Worker<Q, S> {
    pub fn new(queue: Q, sink: S, alphabet: Alphabet, pipeline: DigestPipeline) -> Self {
        Self {
            id: 0,
            queue,
            sink,
            alphabet,
            pipeline,
            work_dir: std::env::temp_dir().join("distgen"),
            poll_interval: DEFAULT_POLL_INTERVAL,
            drain: false,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_id(mut self, id: usize) -> Self {
        self.id = id;
        self
    }

    /// Scratch directory for in-progress artifacts.
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Return from `run` on the first empty poll instead of waiting for more work.
    pub fn with_drain(mut self, drain: bool) -> Self {
        self.drain = drain;
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn local_path(&self, block: &Block) -> PathBuf {
        self.work_dir
            .join(format!("worker-{}", self.id))
            .join(block.output_name())
    }

    /// Receives at most one block and drives it to completion.
    ///
    /// Interrupts come back as `Err` with `ErrorKind::Interrupted`; so do receive
    /// failures and undecodable bodies, which stay on the queue.
    pub fn poll_once(&self) -> ApiResult<PollOutcome> {
        let Some(message) = self.queue.receive(1)?.into_iter().next() else {
            return Ok(PollOutcome::Idle);
        };
        let block = Block::from_body(&message.body)?;
        tracing::info!(
            worker = self.id,
            block = %block,
            attempt = message.receive_count,
            "block received"
        );

        let result = self
            .process_block(&block)
            .and_then(|records| {
                self.queue
                    .delete(&message.receipt)
                    .map(|()| records)
                    .map_err(|err| err.with_block(&block))
            });
        match result {
            Ok(records) => {
                tracing::info!(worker = self.id, block = %block, records, "block acknowledged");
                Ok(PollOutcome::Completed { block, records })
            }
            Err(error) if error.kind() == ErrorKind::Interrupted => Err(error),
            Err(error) => Ok(PollOutcome::Failed { block, error }),
        }
    }

    /// Enumerate into the local file, upload it, then remove it.
    pub fn process_block(&self, block: &Block) -> ApiResult<u64> {
        let path = self.local_path(block);
        let records = self.write_block(block, &path)?;
        self.sink
            .put_file(&block.output_name(), &path)
            .map_err(|err| err.with_block(block))?;
        fs::remove_file(&path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to remove uploaded artifact")
                .with_path(&path)
                .with_block(block)
                .with_source(err)
        })?;
        Ok(records)
    }

    fn write_block(&self, block: &Block, path: &Path) -> ApiResult<u64> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to create work directory")
                    .with_path(parent)
                    .with_source(err)
            })?;
        }
        let file = File::create(path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to create block output")
                .with_path(path)
                .with_block(block)
                .with_source(err)
        })?;
        let mut out = BufWriter::new(file);
        enumerate_block(block, &self.alphabet, &self.pipeline, &mut out, Some(&self.cancel))
            .map_err(|err| err.with_path(path))
    }

    pub fn run(&self) -> WorkerReport {
        let mut report = WorkerReport {
            worker: self.id,
            ..WorkerReport::default()
        };
        loop {
            if self.cancelled() {
                report.interrupted = true;
                break;
            }
            match self.poll_once() {
                Ok(PollOutcome::Idle) => {
                    if self.drain {
                        break;
                    }
                    self.pause(self.poll_interval);
                }
                Ok(PollOutcome::Completed { records, .. }) => {
                    report.blocks_completed += 1;
                    report.records += records;
                }
                Ok(PollOutcome::Failed { block, error }) if error.kind().is_transient() => {
                    report.blocks_failed += 1;
                    tracing::warn!(worker = self.id, block = %block, error = %error, "block failed; left for redelivery");
                }
                Ok(PollOutcome::Failed { block, error }) => {
                    report.blocks_rejected += 1;
                    tracing::error!(
                        worker = self.id,
                        block = %block,
                        error = %error,
                        "block cannot be processed with this configuration; check --charset"
                    );
                }
                Err(error) if error.kind() == ErrorKind::Interrupted => {
                    tracing::info!(worker = self.id, error = %error, "worker interrupted");
                    report.interrupted = true;
                    break;
                }
                Err(error) => {
                    report.poll_errors += 1;
                    tracing::warn!(worker = self.id, error = %error, "poll failed");
                    self.pause(self.poll_interval);
                }
            }
        }
        tracing::info!(
            worker = self.id,
            completed = report.blocks_completed,
            failed = report.blocks_failed,
            rejected = report.blocks_rejected,
            "worker stopped"
        );
        report
    }

    fn pause(&self, total: Duration) {
        let mut remaining = total;
        while !remaining.is_zero() && !self.cancelled() {
            let step = remaining.min(PAUSE_STEP);
            thread::sleep(step);
            remaining -= step;
        }
    }
}

/// Runs `count` copies of `template` on scoped threads, ids `0..count`.
pub fn run_workers<Q, S>(template: &Worker<Q, S>, count: usize) -> ApiResult<Vec<WorkerReport>>
where
    Q: WorkQueue + Clone,
    S: ObjectSink + Clone,
{
    thread::scope(|scope| {
        let handles: Vec<_> = (0..count.max(1))
            .map(|id| {
                let worker = template.clone().with_id(id);
                scope.spawn(move || worker.run())
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| Error::new(ErrorKind::Internal).with_message("worker thread panicked"))
            })
            .collect()
    })
}
