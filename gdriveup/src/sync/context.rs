use std::sync::Mutex;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Shared per-run state: the failure/byte counters behind one lock, the
/// cooperative cancellation signal, the run modes, and the two
/// bounded-concurrency gates. Created once per `copy` and discarded after.
pub struct RunContext {
    pub remains_only: bool,
    pub estimate_only: bool,
    pub cancel: CancellationToken,
    /// Bounds concurrent per-file reconciliation (hashing dominates here).
    pub file_gate: Semaphore,
    /// Bounds in-flight uploads; deliberately narrower than the file gate.
    pub upload_gate: Semaphore,
    stats: Mutex<RunStats>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub failed_files: u64,
    pub failed_folders: u64,
    pub bytes_uploaded: u64,
}

impl RunContext {
    pub fn new(
        remains_only: bool,
        estimate_only: bool,
        file_concurrency: usize,
        upload_concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            remains_only,
            estimate_only,
            cancel,
            file_gate: Semaphore::new(file_concurrency.max(1)),
            upload_gate: Semaphore::new(upload_concurrency.max(1)),
            stats: Mutex::new(RunStats::default()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn record_failed_file(&self) {
        self.lock_stats().failed_files += 1;
    }

    pub fn record_failed_folder(&self) {
        self.lock_stats().failed_folders += 1;
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.lock_stats().bytes_uploaded += bytes;
    }

    pub fn stats(&self) -> RunStats {
        *self.lock_stats()
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, RunStats> {
        match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
