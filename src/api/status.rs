//! Purpose: Periodic progress logging for long-running producers.
//! Exports: `StatusReporter`, `Progress`.
//! Role: Side thread used by the local pool and the wordlist indexer.
//! Invariants: The reporter only reads shared state through the snapshot closure it is given.
//! Invariants: `stop` (or drop) wakes the thread immediately and joins it.
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Progress {
    pub items: u64,
    pub blocks: u64,
    pub bytes: u64,
}

pub struct StatusReporter {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<u64>>,
}

impl StatusReporter {
    pub fn spawn<F>(label: &'static str, interval: Duration, snapshot: F) -> Self
    where
        F: Fn() -> Progress + Send + 'static,
    {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let started = Instant::now();
            let (lock, wake) = &*signal;
            let mut reports = 0u64;
            let Ok(mut stopped) = lock.lock() else {
                return reports;
            };
            while !*stopped {
                match wake.wait_timeout(stopped, interval) {
                    Ok((guard, _)) => stopped = guard,
                    Err(_) => return reports,
                }
                if *stopped {
                    break;
                }
                let progress = snapshot();
                let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
                tracing::info!(
                    task = label,
                    items = progress.items,
                    blocks = progress.blocks,
                    bytes = progress.bytes,
                    rate = %format!("{:.0}/s", progress.items as f64 / elapsed),
                    "progress"
                );
                reports += 1;
            }
            reports
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stops the thread; returns how many progress lines it logged.
    pub fn stop(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        let (lock, wake) = &*self.stop;
        if let Ok(mut stopped) = lock.lock() {
            *stopped = true;
        }
        wake.notify_all();
        self.handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for StatusReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::{Progress, StatusReporter};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{Duration, Instant};

    #[test]
    fn reports_until_stopped() {
        let counter = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&counter);
        let reporter = StatusReporter::spawn("test", Duration::from_millis(10), move || Progress {
            items: seen.fetch_add(1, Ordering::SeqCst),
            ..Progress::default()
        });
        std::thread::sleep(Duration::from_millis(80));
        let reports = reporter.stop();
        assert!(reports >= 1);
        assert_eq!(reports, counter.load(Ordering::SeqCst));
    }

    #[test]
    fn stop_does_not_wait_for_the_interval() {
        let reporter = StatusReporter::spawn("test", Duration::from_secs(3600), Progress::default);
        let started = Instant::now();
        assert_eq!(reporter.stop(), 0);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
