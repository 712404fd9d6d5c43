//! Purpose: Build a digest index from a newline-delimited wordlist.
//! Exports: `WordlistIndexer`, `IndexReport`, `OutputMode`.
//! Role: `distgen index`; same record format as keyspace output, usually with whole digests.
//! Invariants: The output stream and its position live behind one mutex shared with the reporter.
//! Invariants: Undecodable lines are logged and skipped; they never abort the run.
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bstr::ByteSlice;
use serde::Serialize;

use crate::api::queue::ApiResult;
use crate::api::status::{DEFAULT_STATUS_INTERVAL, Progress, StatusReporter};
use crate::core::digest::DigestPipeline;
use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputMode {
    /// Refuse to touch an existing file.
    Create,
    Overwrite,
    Append,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct IndexReport {
    pub lines: u64,
    pub records: u64,
    pub skipped: u64,
    pub bytes_written: u64,
    /// Progress snapshots the status reporter took while the index was written.
    pub status_reports: u64,
    pub interrupted: bool,
}

struct SharedOutput<W> {
    writer: W,
    position: u64,
    records: u64,
}

pub struct WordlistIndexer {
    pipeline: DigestPipeline,
    status_interval: Duration,
    cancel: Arc<AtomicBool>,
}

impl WordlistIndexer {
    pub fn new(pipeline: DigestPipeline) -> Self {
        Self {
            pipeline,
            status_interval: DEFAULT_STATUS_INTERVAL,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn index_file(&self, wordlist: &Path, output: &Path, mode: OutputMode) -> ApiResult<IndexReport> {
        let input = File::open(wordlist).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("wordlist does not exist or is not readable")
                .with_path(wordlist)
                .with_source(err)
        })?;
        let file = open_output(output, mode)?;
        tracing::info!(
            wordlist = %wordlist.display(),
            output = %output.display(),
            algorithms = %self.pipeline.algorithms().names().collect::<Vec<_>>().join(","),
            "creating index"
        );
        let report = self
            .index(BufReader::new(input), BufWriter::new(file))
            .map_err(|err| err.with_path(output))?;
        tracing::info!(records = report.records, skipped = report.skipped, "index completed");
        Ok(report)
    }

    /// Streams `reader` into `writer`; returns the report once the writer is flushed.
    pub fn index<R, W>(&self, mut reader: R, writer: W) -> ApiResult<IndexReport>
    where
        R: BufRead,
        W: Write + Send + 'static,
    {
        let shared = Arc::new(Mutex::new(SharedOutput {
            writer,
            position: 0,
            records: 0,
        }));
        let reporter = {
            let shared = Arc::clone(&shared);
            StatusReporter::spawn("index", self.status_interval, move || {
                shared
                    .lock()
                    .map(|state| Progress {
                        items: state.records,
                        bytes: state.position,
                        ..Progress::default()
                    })
                    .unwrap_or_default()
            })
        };

        let result = self.index_into(&mut reader, &shared);
        let status_reports = reporter.stop();
        let mut report = result?;
        report.status_reports = status_reports;

        let mut state = lock(&shared)?;
        state.writer.flush().map_err(|err| write_error(err, "failed to flush index"))?;
        report.records = state.records;
        report.bytes_written = state.position;
        Ok(report)
    }

    fn index_into<R: BufRead, W: Write>(
        &self,
        reader: &mut R,
        shared: &Mutex<SharedOutput<W>>,
    ) -> ApiResult<IndexReport> {
        let mut report = IndexReport::default();
        let mut line = Vec::new();
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                tracing::warn!(lines = report.lines, "stop requested; closing index");
                report.interrupted = true;
                break;
            }
            line.clear();
            let read = reader
                .read_until(b'\n', &mut line)
                .map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to read wordlist")
                        .with_source(err)
                })?;
            if read == 0 {
                break;
            }
            report.lines += 1;

            let word = line.trim();
            if word.is_empty() {
                continue;
            }
            let record = match self.pipeline.compute_record_bytes(word) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(line = report.lines, error = %err, "skipping undecodable line");
                    report.skipped += 1;
                    continue;
                }
            };
            let encoded = record.to_json_line()?;

            let mut state = lock(shared)?;
            state
                .writer
                .write_all(encoded.as_bytes())
                .map_err(|err| write_error(err, "failed to write index record"))?;
            state.position += encoded.len() as u64;
            state.records += 1;
        }
        Ok(report)
    }
}

fn open_output(path: &Path, mode: OutputMode) -> ApiResult<File> {
    let mut options = OpenOptions::new();
    match mode {
        OutputMode::Create => options.write(true).create_new(true),
        OutputMode::Overwrite => options.write(true).create(true).truncate(true),
        OutputMode::Append => options.append(true).create(true),
    };
    options.open(path).map_err(|err| {
        if err.kind() == io::ErrorKind::AlreadyExists {
            return Error::new(ErrorKind::Usage)
                .with_message("output file already exists")
                .with_path(path)
                .with_hint("Pass --append to extend it or --overwrite to replace it.");
        }
        Error::new(ErrorKind::Io)
            .with_message("failed to open index output")
            .with_path(path)
            .with_source(err)
    })
}

fn lock<W>(shared: &Mutex<SharedOutput<W>>) -> ApiResult<MutexGuard<'_, SharedOutput<W>>> {
    shared
        .lock()
        .map_err(|_| Error::new(ErrorKind::Internal).with_message("index output lock poisoned"))
}

fn write_error(err: io::Error, message: &str) -> Error {
    Error::new(ErrorKind::Io).with_message(message).with_source(err)
}

#[cfg(test)]
mod tests {
    use super::{OutputMode, WordlistIndexer};
    use crate::core::digest::{AlgorithmRegistry, DigestPipeline};
    use crate::core::error::ErrorKind;
    use bstr::ByteSlice;
    use std::io::{BufReader, Cursor, Read, Write};
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn indexer() -> WordlistIndexer {
        let pipeline = DigestPipeline::new(AlgorithmRegistry::builtin().select(&["md5"])).with_truncate(None);
        WordlistIndexer::new(pipeline)
    }

    #[test]
    fn trims_lines_and_skips_undecodable_ones() {
        let input = b"password\r\n  \n\xff\xfe\n hunter2 \n".to_vec();
        let report = indexer().index(Cursor::new(input), Vec::new()).unwrap();
        assert_eq!(report.lines, 4);
        assert_eq!(report.records, 2);
        assert_eq!(report.skipped, 1);
        assert!(!report.interrupted);
    }

    #[test]
    fn index_file_writes_whole_digests_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let wordlist = dir.path().join("words.txt");
        let output = dir.path().join("index.json");
        std::fs::write(&wordlist, "password\n").unwrap();

        let report = indexer().index_file(&wordlist, &output, OutputMode::Create).unwrap();
        let text = std::fs::read_to_string(&output).unwrap();
        assert_eq!(report.bytes_written, text.len() as u64);
        assert_eq!(text, "{\"preimage\":\"password\",\"md5\":\"X03MO1qnZdYdgyfeuILPmQ==\"}\n");

        let err = indexer().index_file(&wordlist, &output, OutputMode::Create).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);

        indexer().index_file(&wordlist, &output, OutputMode::Append).unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap().lines().count(), 2);
        indexer().index_file(&wordlist, &output, OutputMode::Overwrite).unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap().lines().count(), 1);
    }

    #[test]
    fn missing_wordlist_is_a_usage_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = indexer()
            .index_file(&dir.path().join("nope"), &dir.path().join("out"), OutputMode::Overwrite)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    /// Hands out at most 512 bytes per read and pauses first, so writes span many intervals.
    struct TricklingReader {
        inner: Cursor<Vec<u8>>,
    }

    impl Read for TricklingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(1));
            let len = buf.len().min(512);
            self.inner.read(&mut buf[..len])
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(bytes);
            Ok(bytes.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn status_snapshots_run_alongside_writes() {
        let words: String = (0..5000).map(|i| format!("word{i}\n")).collect();
        let reader = BufReader::with_capacity(
            256,
            TricklingReader {
                inner: Cursor::new(words.into_bytes()),
            },
        );
        let output = SharedBuffer::default();
        let report = indexer()
            .with_status_interval(Duration::from_millis(1))
            .index(reader, output.clone())
            .unwrap();

        assert_eq!(report.records, 5000);
        assert!(report.status_reports >= 1, "reporter never took a snapshot");
        let written = output.0.lock().unwrap();
        assert_eq!(report.bytes_written, written.len() as u64);
        assert_eq!(written.lines().count(), 5000);
    }

    #[test]
    fn stop_request_ends_the_run_cleanly() {
        let report = indexer()
            .with_cancel(Arc::new(AtomicBool::new(true)))
            .index(Cursor::new(b"a\nb\n".to_vec()), Vec::new())
            .unwrap();
        assert!(report.interrupted);
        assert_eq!(report.records, 0);
    }
}
