//! Purpose: Hold top-level CLI command dispatch for `distgen`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Configuration is validated before any queue, sink or file is touched.
//! Invariants: Interrupted runs still print their report, then exit 130.

use std::sync::Arc;
use std::time::Duration;

use distgen::api::config::DEFAULT_QUEUE_BLOCK_SIZE;
use distgen::api::signal::install_interrupt_flag;
use distgen::api::{
    DirectorySink, HttpSink, IndexLookup, LocalPool, ObjectSink, OutputMode, QuerySet, SpoolQueue,
    WordlistIndexer, WorkDistributor, Worker, lookup, worker,
};
use distgen::core::alphabet::Alphabet;
use distgen::core::codec;
use distgen::core::digest::AlgorithmRegistry;

use super::*;

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    let registry = AlgorithmRegistry::builtin();
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "distgen", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Encode { ordinal, charset } => {
            let alphabet = alphabet_for(&charset)?;
            let value = codec::encode(&ordinal, &alphabet);
            emit_json(json!({
                "ordinal": ordinal_json(&ordinal),
                "value": value,
                "keyspace_length": ordinal_json(&codec::keyspace_length(&value, &alphabet)),
            }));
            Ok(RunOutcome::ok())
        }
        Command::Decode { value, charset } => {
            let alphabet = alphabet_for(&charset)?;
            let ordinal = codec::decode(&value, &alphabet)?;
            emit_json(json!({
                "value": value,
                "ordinal": ordinal_json(&ordinal),
                "keyspace_length": ordinal_json(&codec::keyspace_length(&value, &alphabet)),
            }));
            Ok(RunOutcome::ok())
        }
        Command::Keyspace {
            charset,
            digest,
            range,
            block_size,
        } => {
            let job = job_config(&charset, &digest, Some(&range), block_size);
            job.validate()?;
            let alphabet = job.alphabet()?;
            let pipeline = job.pipeline(&registry)?;
            let range = job.resolve_range(&alphabet)?;
            let summary = job.summarize(&alphabet, &pipeline, &range)?;
            emit_json(to_json(&summary)?);
            Ok(RunOutcome::ok())
        }
        Command::Fill {
            charset,
            digest,
            range,
            block_size,
            queue_dir,
        } => {
            let block_size = block_size.unwrap_or_else(|| BigUint::from(DEFAULT_QUEUE_BLOCK_SIZE));
            let job = job_config(&charset, &digest, Some(&range), Some(block_size));
            job.validate()?;
            let alphabet = job.alphabet()?;
            let pipeline = job.pipeline(&registry)?;
            let range = job.resolve_range(&alphabet)?;
            let summary = job.summarize(&alphabet, &pipeline, &range)?;

            let distributor = WorkDistributor::new(SpoolQueue::open(&queue_dir)?);
            let report = distributor.fill(&range, &summary.block_size)?;
            emit_json(json!({
                "queue_dir": distributor.queue().root().display().to_string(),
                "keyspace": to_json(&summary)?,
                "fill": to_json(&report)?,
            }));
            Ok(RunOutcome::ok())
        }
        Command::Work {
            charset,
            digest,
            queue_dir,
            sink_dir,
            sink_url,
            sink_token,
            work_dir,
            workers,
            poll_interval,
            visibility_timeout,
            drain,
        } => {
            let job = job_config(&charset, &digest, None, None);
            job.validate()?;
            let alphabet = job.alphabet()?;
            let pipeline = job.pipeline(&registry)?;
            let sink = open_sink(sink_dir, sink_url, sink_token)?;
            let queue = SpoolQueue::open(&queue_dir)?.with_visibility_timeout(visibility_timeout);
            let cancel = install_interrupt_flag()?;

            let mut template = Worker::new(queue, sink, alphabet, pipeline)
                .with_poll_interval(poll_interval)
                .with_drain(drain)
                .with_cancel(cancel);
            if let Some(work_dir) = work_dir {
                template = template.with_work_dir(work_dir);
            }
            let workers = workers.unwrap_or_else(num_cpus::get).max(1);
            tracing::info!(workers, queue = %queue_dir.display(), "starting workers");
            let reports = worker::run_workers(&template, workers)?;

            let interrupted = reports.iter().any(|report| report.interrupted);
            let completed: u64 = reports.iter().map(|report| report.blocks_completed).sum();
            let failed: u64 = reports.iter().map(|report| report.blocks_failed).sum();
            let rejected: u64 = reports.iter().map(|report| report.blocks_rejected).sum();
            let poll_errors: u64 = reports.iter().map(|report| report.poll_errors).sum();
            emit_json(json!({
                "blocks_completed": completed,
                "blocks_failed": failed,
                "blocks_rejected": rejected,
                "poll_errors": poll_errors,
                "interrupted": interrupted,
                "workers": to_json(&reports)?,
            }));
            Ok(RunOutcome::finished(interrupted))
        }
        Command::Local {
            charset,
            digest,
            range,
            block_size,
            output,
            workers,
            status_interval,
        } => {
            let job = job_config(&charset, &digest, Some(&range), block_size);
            job.validate()?;
            let alphabet = job.alphabet()?;
            let pipeline = job.pipeline(&registry)?;
            let range = job.resolve_range(&alphabet)?;
            let summary = job.summarize(&alphabet, &pipeline, &range)?;
            tracing::info!(
                start = %summary.start,
                end = %summary.end,
                entries = %summary.entries,
                block_size = %summary.block_size,
                estimated = %summary.estimated_human,
                "keyspace resolved"
            );

            let cancel = install_interrupt_flag()?;
            let mut pool = LocalPool::new(alphabet, pipeline, &output, job.chars_len)
                .with_status_interval(status_interval.max(MIN_STATUS_INTERVAL))
                .with_cancel(cancel);
            if let Some(workers) = workers {
                pool = pool.with_workers(workers);
            }
            let report = pool.run(&range, &summary.block_size)?;
            emit_json(json!({
                "keyspace": to_json(&summary)?,
                "local": to_json(&report)?,
            }));
            Ok(RunOutcome::finished(report.interrupted))
        }
        Command::Index {
            wordlist,
            algorithms,
            truncate,
            output,
            append,
            overwrite,
            status_interval,
        } => {
            let job = JobConfig {
                algorithms,
                truncate,
                ..JobConfig::default()
            };
            job.validate()?;
            let pipeline = job.pipeline(&registry)?;
            let mode = if append {
                OutputMode::Append
            } else if overwrite {
                OutputMode::Overwrite
            } else {
                OutputMode::Create
            };

            let cancel = install_interrupt_flag()?;
            let indexer = WordlistIndexer::new(pipeline)
                .with_status_interval(status_interval.max(MIN_STATUS_INTERVAL))
                .with_cancel(cancel);
            let report = indexer.index_file(&wordlist, &output, mode)?;
            emit_json(json!({
                "output": output.display().to_string(),
                "index": to_json(&report)?,
            }));
            Ok(RunOutcome::finished(report.interrupted))
        }
        Command::Lookup {
            algorithm,
            encoding,
            from_files,
            hashes,
            index,
        } => {
            let hashes = if from_files {
                let paths: Vec<PathBuf> = hashes.iter().map(PathBuf::from).collect();
                lookup::read_hash_files(&paths)?
            } else {
                hashes
            };
            let query = QuerySet::new(&registry, &algorithm, &hashes, encoding)?;
            let (results, stats) = IndexLookup::new(query).search_files(&index)?;
            let mut value = to_json(&results)?;
            if let Value::Object(fields) = &mut value {
                fields.insert("stats".to_string(), to_json(&stats)?);
            }
            emit_json(value);
            Ok(RunOutcome::ok())
        }
    }
}

const MIN_STATUS_INTERVAL: Duration = Duration::from_secs(1);

fn alphabet_for(charset: &CharsetArgs) -> Result<Alphabet, Error> {
    match &charset.charset {
        Some(symbols) => Alphabet::new(symbols),
        None => Ok(Alphabet::default()),
    }
}

fn open_sink(
    sink_dir: Option<PathBuf>,
    sink_url: Option<String>,
    sink_token: Option<String>,
) -> Result<Arc<dyn ObjectSink>, Error> {
    match (sink_dir, sink_url) {
        (Some(dir), _) => Ok(Arc::new(DirectorySink::new(dir)?)),
        (None, Some(url)) => {
            let mut sink = HttpSink::new(&url)?;
            if let Some(token) = sink_token {
                sink = sink.with_token(token);
            }
            Ok(Arc::new(sink))
        }
        (None, None) => Err(Error::new(ErrorKind::Usage)
            .with_message("work needs somewhere to upload finished blocks")
            .with_hint("Pass --sink-dir <dir> or --sink-url <url> (or set DISTGEN_SINK_DIR / DISTGEN_SINK_URL).")),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, Error> {
    serde_json::to_value(value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode output json")
            .with_source(err)
    })
}
