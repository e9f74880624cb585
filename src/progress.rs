use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

/// Byte progress of a transfer after one chunk landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub delta: u64,
    pub transferred: u64,
    pub total: u64,
}

impl TransferProgress {
    pub fn previous(&self) -> u64 {
        self.transferred.saturating_sub(self.delta)
    }

    /// The highest tenth of `total` this chunk carried the transfer into,
    /// as a percentage. `None` while the transfer stays in the same tenth.
    pub fn percent_step(&self) -> Option<u64> {
        if self.total == 0 {
            return None;
        }
        let before = self.previous().saturating_mul(10) / self.total;
        let after = self.transferred.saturating_mul(10) / self.total;
        (after > before).then(|| (after * 10).min(100))
    }
}

pub trait ProgressSink: Send + Sync {
    fn update(&self, progress: TransferProgress);
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&self, _progress: TransferProgress) {}
}

/// Reports through `tracing` every time another tenth of the batch arrives.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn update(&self, progress: TransferProgress) {
        if let Some(percent) = progress.percent_step() {
            info!(
                transferred = progress.transferred,
                total = progress.total,
                "transferred {percent}%"
            );
        }
    }
}

/// Byte counter shared by every worker of one transfer.
pub struct ProgressCounter<'a> {
    total: u64,
    transferred: AtomicU64,
    sink: &'a dyn ProgressSink,
}

impl<'a> ProgressCounter<'a> {
    pub fn new(total: u64, sink: &'a dyn ProgressSink) -> Self {
        Self {
            total,
            transferred: AtomicU64::new(0),
            sink,
        }
    }

    pub fn advance(&self, bytes: u64) {
        let previous = self.transferred.fetch_add(bytes, Ordering::Relaxed);
        self.sink.update(TransferProgress {
            delta: bytes,
            transferred: previous + bytes,
            total: self.total,
        });
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}
