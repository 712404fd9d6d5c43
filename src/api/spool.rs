//! Purpose: Directory-backed work queue shared by many OS processes on one host.
//! Exports: `SpoolQueue`.
//! Role: Durable `WorkQueue` for `fill` and `work`; plays the managed queue's part locally.
//! Invariants: Every operation holds an exclusive `fs2` lock on `spool.lock`.
//! Invariants: Message files move `ready/` -> `inflight/` -> deleted, by rename only.
//! Invariants: In-flight names lead with the visibility deadline; expired ones go back to `ready/`.
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use libc::{EACCES, EPERM};

use crate::api::queue::{
    ApiResult, DEFAULT_VISIBILITY_TIMEOUT, OutgoingMessage, ReceivedMessage, WorkQueue, check_batch,
};
use crate::core::error::{Error, ErrorKind};

const LOCK_FILE: &str = "spool.lock";
const SEQ_FILE: &str = "seq";
const READY_DIR: &str = "ready";
const INFLIGHT_DIR: &str = "inflight";
const DEDUP_DIR: &str = "dedup";
const MESSAGE_SUFFIX: &str = "msg";

#[derive(Clone, Debug)]
pub struct SpoolQueue {
    root: PathBuf,
    visibility_timeout: Duration,
}

impl SpoolQueue {
    /// Opens (creating if needed) a spool rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> ApiResult<Self> {
        let root = root.into();
        for dir in [READY_DIR, INFLIGHT_DIR, DEDUP_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to create spool directory")
                    .with_path(&path)
                    .with_source(err)
            })?;
        }
        Ok(Self {
            root,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        })
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ready_len(&self) -> ApiResult<usize> {
        let _lock = self.lock()?;
        Ok(self.message_names(READY_DIR)?.len())
    }

    pub fn in_flight_len(&self) -> ApiResult<usize> {
        let _lock = self.lock()?;
        Ok(self.message_names(INFLIGHT_DIR)?.len())
    }

    fn lock(&self) -> ApiResult<SpoolLock> {
        let path = self.root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| io_error(err, "failed to open spool lock", &path))?;
        file.lock_exclusive().map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_message("failed to lock spool")
                .with_path(&path)
                .with_source(err)
        })?;
        Ok(SpoolLock { file })
    }

    fn next_seq(&self) -> ApiResult<u64> {
        let path = self.root.join(SEQ_FILE);
        let current = match fs::read_to_string(&path) {
            Ok(text) => text.trim().parse::<u64>().map_err(|err| {
                Error::new(ErrorKind::Queue)
                    .with_message("corrupt spool sequence file")
                    .with_path(&path)
                    .with_source(err)
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => 0,
            Err(err) => return Err(io_error(err, "failed to read spool sequence", &path)),
        };
        let next = current + 1;
        write_atomic(&path, next.to_string().as_bytes())?;
        Ok(next)
    }

    /// Sorted message file names in `dir`; temp files are ignored.
    fn message_names(&self, dir: &str) -> ApiResult<Vec<String>> {
        let path = self.root.join(dir);
        let entries =
            fs::read_dir(&path).map_err(|err| io_error(err, "failed to list spool directory", &path))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| io_error(err, "failed to list spool directory", &path))?;
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(MESSAGE_SUFFIX) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn requeue_expired(&self, now_ms: u64) -> ApiResult<()> {
        for name in self.message_names(INFLIGHT_DIR)? {
            let Some(receipt) = InFlightName::parse(&name) else {
                tracing::warn!(file = %name, "ignoring unrecognised in-flight spool file");
                continue;
            };
            if receipt.deadline_ms > now_ms {
                continue;
            }
            let ready = ReadyName {
                seq: receipt.seq,
                receive_count: receipt.receive_count,
                id: receipt.id.to_string(),
            };
            self.rename(INFLIGHT_DIR, &name, READY_DIR, &ready.render())?;
            tracing::debug!(seq = receipt.seq, "visibility timeout lapsed; message requeued");
        }
        Ok(())
    }

    fn rename(&self, from_dir: &str, from: &str, to_dir: &str, to: &str) -> ApiResult<()> {
        let source = self.root.join(from_dir).join(from);
        let target = self.root.join(to_dir).join(to);
        fs::rename(&source, &target).map_err(|err| io_error(err, "failed to move spool message", &source))
    }
}

impl WorkQueue for SpoolQueue {
    fn send_batch(&self, entries: &[OutgoingMessage]) -> ApiResult<usize> {
        check_batch(entries)?;
        let _lock = self.lock()?;
        let mut accepted = 0;
        for entry in entries {
            check_token(&entry.id)?;
            check_token(&entry.dedup_id)?;
            let marker = self.root.join(DEDUP_DIR).join(&entry.dedup_id);
            match OpenOptions::new().write(true).create_new(true).open(&marker) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    tracing::debug!(dedup_id = %entry.dedup_id, "duplicate message suppressed");
                    continue;
                }
                Err(err) => return Err(io_error(err, "failed to record dedup id", &marker)),
            }

            let name = ReadyName {
                seq: self.next_seq()?,
                receive_count: 0,
                id: entry.id.clone(),
            };
            write_atomic(&self.root.join(READY_DIR).join(name.render()), entry.body.as_bytes())?;
            accepted += 1;
        }
        Ok(accepted)
    }

    fn receive(&self, max: usize) -> ApiResult<Vec<ReceivedMessage>> {
        let _lock = self.lock()?;
        let now_ms = now_millis();
        self.requeue_expired(now_ms)?;

        let deadline_ms = now_ms.saturating_add(self.visibility_timeout.as_millis() as u64);
        let mut received = Vec::new();
        for name in self.message_names(READY_DIR)?.into_iter().take(max) {
            let Some(ready) = ReadyName::parse(&name) else {
                tracing::warn!(file = %name, "ignoring unrecognised ready spool file");
                continue;
            };
            let path = self.root.join(READY_DIR).join(&name);
            let body = fs::read_to_string(&path)
                .map_err(|err| io_error(err, "failed to read spool message", &path))?;
            let receipt = InFlightName {
                deadline_ms,
                seq: ready.seq,
                receive_count: ready.receive_count + 1,
                id: &ready.id,
            }
            .render();
            self.rename(READY_DIR, &name, INFLIGHT_DIR, &receipt)?;
            received.push(ReceivedMessage {
                receipt,
                body,
                receive_count: ready.receive_count + 1,
            });
        }
        Ok(received)
    }

    fn delete(&self, receipt: &str) -> ApiResult<()> {
        if InFlightName::parse(receipt).is_none() {
            return Err(Error::new(ErrorKind::Queue).with_message(format!("malformed receipt {receipt}")));
        }
        let _lock = self.lock()?;
        let path = self.root.join(INFLIGHT_DIR).join(receipt);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(Error::new(ErrorKind::Queue)
                .with_message(format!("receipt {receipt} is not in flight"))
                .with_hint("The visibility timeout lapsed and the block was handed to another worker.")),
            Err(err) => Err(io_error(err, "failed to delete spool message", &path)),
        }
    }
}

struct SpoolLock {
    file: File,
}

impl Drop for SpoolLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

struct ReadyName {
    seq: u64,
    receive_count: u32,
    id: String,
}

impl ReadyName {
    fn render(&self) -> String {
        format!("{:020}.{}.{}.{MESSAGE_SUFFIX}", self.seq, self.receive_count, self.id)
    }

    fn parse(name: &str) -> Option<Self> {
        let mut parts = name.split('.');
        let seq = parts.next()?.parse().ok()?;
        let receive_count = parts.next()?.parse().ok()?;
        let id = parts.next()?.to_string();
        (parts.next()? == MESSAGE_SUFFIX && parts.next().is_none()).then_some(Self {
            seq,
            receive_count,
            id,
        })
    }
}

struct InFlightName<'a> {
    deadline_ms: u64,
    seq: u64,
    receive_count: u32,
    id: &'a str,
}

impl<'a> InFlightName<'a> {
    fn render(&self) -> String {
        format!(
            "{:020}.{:020}.{}.{}.{MESSAGE_SUFFIX}",
            self.deadline_ms, self.seq, self.receive_count, self.id
        )
    }

    fn parse(name: &'a str) -> Option<Self> {
        let mut parts = name.split('.');
        let deadline_ms = parts.next()?.parse().ok()?;
        let seq = parts.next()?.parse().ok()?;
        let receive_count = parts.next()?.parse().ok()?;
        let id = parts.next()?;
        if id.is_empty() || parts.next()? != MESSAGE_SUFFIX || parts.next().is_some() {
            return None;
        }
        Some(Self {
            deadline_ms,
            seq,
            receive_count,
            id,
        })
    }
}

fn check_token(value: &str) -> ApiResult<()> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("message id {value:?} is not a plain token")));
    }
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> ApiResult<()> {
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp).map_err(|err| io_error(err, "failed to create spool file", &tmp))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|err| io_error(err, "failed to write spool file", &tmp))?;
    fs::rename(&tmp, path).map_err(|err| io_error(err, "failed to publish spool file", path))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

fn io_error(err: io::Error, message: &str, path: &Path) -> Error {
    Error::new(ErrorKind::Io)
        .with_message(message)
        .with_path(path)
        .with_source(err)
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Usage;
    }
    match err.kind() {
        io::ErrorKind::PermissionDenied => ErrorKind::Usage,
        io::ErrorKind::WouldBlock => ErrorKind::Queue,
        _ => ErrorKind::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::{InFlightName, ReadyName, SpoolQueue};
    use crate::api::queue::{OutgoingMessage, WorkQueue};
    use crate::core::error::ErrorKind;
    use std::time::Duration;

    #[test]
    fn messages_survive_reopening_the_spool() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpoolQueue::open(dir.path()).unwrap();
        let entries = [
            OutgoingMessage::new("first").unwrap(),
            OutgoingMessage::new("second").unwrap(),
        ];
        assert_eq!(queue.send_batch(&entries).unwrap(), 2);

        let reopened = SpoolQueue::open(dir.path()).unwrap();
        let received = reopened.receive(10).unwrap();
        let bodies: Vec<&str> = received.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["first", "second"]);
        assert_eq!(reopened.ready_len().unwrap(), 0);
        assert_eq!(reopened.in_flight_len().unwrap(), 2);
    }

    #[test]
    fn dedup_ids_suppress_replays() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpoolQueue::open(dir.path()).unwrap();
        let message = OutgoingMessage::new("body").unwrap();
        assert_eq!(queue.send_batch(&[message.clone()]).unwrap(), 1);
        assert_eq!(queue.send_batch(&[message]).unwrap(), 0);
        assert_eq!(queue.ready_len().unwrap(), 1);
    }

    #[test]
    fn expired_messages_are_redelivered_with_a_new_receipt() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpoolQueue::open(dir.path())
            .unwrap()
            .with_visibility_timeout(Duration::ZERO);
        queue.send_batch(&[OutgoingMessage::new("body").unwrap()]).unwrap();

        let first = queue.receive(1).unwrap().remove(0);
        std::thread::sleep(Duration::from_millis(5));
        let second = queue.receive(1).unwrap().remove(0);
        assert_eq!(second.body, "body");
        assert_eq!(second.receive_count, 2);
        assert_ne!(first.receipt, second.receipt);

        assert_eq!(queue.delete(&first.receipt).unwrap_err().kind(), ErrorKind::Queue);
        queue.delete(&second.receipt).unwrap();
        assert_eq!(queue.in_flight_len().unwrap(), 0);
    }

    #[test]
    fn malformed_receipts_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpoolQueue::open(dir.path()).unwrap();
        let err = queue.delete("../escape").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Queue);
    }

    #[test]
    fn file_names_round_trip() {
        let ready = ReadyName {
            seq: 7,
            receive_count: 1,
            id: "abc".to_string(),
        };
        let parsed = ReadyName::parse(&ready.render()).unwrap();
        assert_eq!((parsed.seq, parsed.receive_count, parsed.id.as_str()), (7, 1, "abc"));

        let name = InFlightName {
            deadline_ms: 99,
            seq: 7,
            receive_count: 2,
            id: "abc",
        }
        .render();
        assert_eq!(name, "00000000000000000099.00000000000000000007.2.abc.msg");
        assert!(ReadyName::parse(&name).is_none());
        assert!(InFlightName::parse("7.1.abc.msg").is_none());
    }

    #[test]
    fn permission_errors_are_not_transient() {
        let err = std::io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(super::lock_error_kind(&err), ErrorKind::Usage);
        let err = std::io::Error::from_raw_os_error(libc::EBADF);
        assert_eq!(super::lock_error_kind(&err), ErrorKind::Io);
    }
}
