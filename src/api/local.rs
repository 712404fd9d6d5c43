//! Purpose: Single-process mode: a bounded in-memory queue drained by a fixed thread pool.
//! Exports: `LocalPool`, `LocalReport`.
//! Role: `distgen local`; replaces the external queue and sink with per-worker files.
//! Invariants: Each block is popped by exactly one worker (one receiver behind one mutex).
//! Invariants: Worker `n` owns `generated_keyspace_{chars_len}_{n}.json` exclusively.
//! Invariants: The producer blocks when the channel is full; memory stays bounded.
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use num_bigint::BigUint;
use serde::Serialize;

use crate::api::queue::ApiResult;
use crate::api::status::{DEFAULT_STATUS_INTERVAL, Progress, StatusReporter};
use crate::api::worker::enumerate_block;
use crate::core::alphabet::Alphabet;
use crate::core::digest::DigestPipeline;
use crate::core::error::{Error, ErrorKind};
use crate::core::plan::{self, Block, KeyRange};

const DEFAULT_QUEUE_DEPTH: usize = 1024;
const PRODUCER_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Clone, Debug, Default, Serialize)]
pub struct LocalReport {
    pub blocks: u64,
    pub records: u64,
    pub files: Vec<PathBuf>,
    pub status_reports: u64,
    pub interrupted: bool,
}

pub struct LocalPool {
    alphabet: Alphabet,
    pipeline: DigestPipeline,
    output_dir: PathBuf,
    chars_len: usize,
    workers: usize,
    queue_depth: usize,
    status_interval: Duration,
    cancel: Arc<AtomicBool>,
}

impl LocalPool {
    pub fn new(alphabet: Alphabet, pipeline: DigestPipeline, output_dir: impl Into<PathBuf>, chars_len: usize) -> Self {
        Self {
            alphabet,
            pipeline,
            output_dir: output_dir.into(),
            chars_len,
            workers: num_cpus::get(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            status_interval: DEFAULT_STATUS_INTERVAL,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn output_path(&self, worker_id: usize) -> PathBuf {
        self.output_dir
            .join(format!("generated_keyspace_{}_{worker_id}.json", self.chars_len))
    }

    pub fn run(&self, range: &KeyRange, block_size: &BigUint) -> ApiResult<LocalReport> {
        let blocks = plan::partition(&range.start, &range.end, block_size)?;
        std::fs::create_dir_all(&self.output_dir).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to create output directory")
                .with_path(&self.output_dir)
                .with_source(err)
        })?;

        let (sender, receiver) = sync_channel::<Block>(self.queue_depth);
        let receiver = Mutex::new(receiver);
        let records = Arc::new(AtomicU64::new(0));
        let completed = Arc::new(AtomicU64::new(0));
        let failed = AtomicBool::new(false);

        let reporter = {
            let records = Arc::clone(&records);
            let completed = Arc::clone(&completed);
            StatusReporter::spawn("local", self.status_interval, move || Progress {
                items: records.load(Ordering::Relaxed),
                blocks: completed.load(Ordering::Relaxed),
                bytes: 0,
            })
        };
        tracing::info!(workers = self.workers, output = %self.output_dir.display(), "starting local pool");

        let results: Vec<ApiResult<PathBuf>> = thread::scope(|scope| {
            let producer = scope.spawn(|| produce(blocks, sender, &self.cancel, &failed));
            let handles: Vec<_> = (0..self.workers)
                .map(|worker_id| {
                    let receiver = &receiver;
                    let records = &records;
                    let completed = &completed;
                    let failed = &failed;
                    scope.spawn(move || {
                        let result = self.drain(worker_id, receiver, records, completed);
                        if result.is_err() {
                            failed.store(true, Ordering::Relaxed);
                        }
                        result
                    })
                })
                .collect();

            let mut results: Vec<ApiResult<PathBuf>> = handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(Error::new(ErrorKind::Internal).with_message("local worker panicked"))
                    })
                })
                .collect();
            if producer.join().is_err() {
                results.push(Err(Error::new(ErrorKind::Internal).with_message("block producer panicked")));
            }
            results
        });
        let status_reports = reporter.stop();

        let mut report = LocalReport {
            blocks: completed.load(Ordering::Relaxed),
            records: records.load(Ordering::Relaxed),
            status_reports,
            ..LocalReport::default()
        };
        for result in results {
            match result {
                Ok(path) => report.files.push(path),
                Err(err) if err.kind() == ErrorKind::Interrupted => report.interrupted = true,
                Err(err) => return Err(err),
            }
        }
        if self.cancel.load(Ordering::Relaxed) {
            report.interrupted = true;
        }
        tracing::info!(blocks = report.blocks, records = report.records, "local pool finished");
        Ok(report)
    }

    fn drain(
        &self,
        worker_id: usize,
        receiver: &Mutex<Receiver<Block>>,
        records: &AtomicU64,
        completed: &AtomicU64,
    ) -> ApiResult<PathBuf> {
        let path = self.output_path(worker_id);
        let file = File::create(&path).map_err(|err| output_error(err, "failed to create output", &path))?;
        let mut out = BufWriter::new(file);

        loop {
            let next = {
                let guard = receiver
                    .lock()
                    .map_err(|_| Error::new(ErrorKind::Internal).with_message("block queue lock poisoned"))?;
                guard.recv()
            };
            let Ok(block) = next else {
                break;
            };
            let count = enumerate_block(&block, &self.alphabet, &self.pipeline, &mut out, Some(&self.cancel))
                .map_err(|err| err.with_path(&path))?;
            records.fetch_add(count, Ordering::Relaxed);
            completed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(worker = worker_id, block = %block, records = count, "block done");
        }
        out.flush().map_err(|err| output_error(err, "failed to flush output", &path))?;
        Ok(path)
    }
}

/// Feeds blocks until exhausted, cancelled, or a worker failed; dropping `sender` lets workers finish.
fn produce(
    blocks: impl Iterator<Item = Block>,
    sender: SyncSender<Block>,
    cancel: &AtomicBool,
    failed: &AtomicBool,
) {
    let stopped = || cancel.load(Ordering::Relaxed) || failed.load(Ordering::Relaxed);
    let mut queued = 0u64;
    'blocks: for block in blocks {
        let mut pending = block;
        loop {
            if stopped() {
                break 'blocks;
            }
            match sender.try_send(pending) {
                Ok(()) => break,
                Err(TrySendError::Full(block)) => {
                    pending = block;
                    thread::sleep(PRODUCER_BACKOFF);
                }
                Err(TrySendError::Disconnected(_)) => break 'blocks,
            }
        }
        queued += 1;
    }
    tracing::debug!(blocks = queued, "block generation completed");
}

fn output_error(err: std::io::Error, message: &str, path: &Path) -> Error {
    Error::new(ErrorKind::Io)
        .with_message(message)
        .with_path(path)
        .with_source(err)
}
