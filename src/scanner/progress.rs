/// Scan progress reporting — lightweight messages sent from worker
/// threads to the facade via a bounded crossbeam channel.
///
/// Progress is advisory and lossy: when the channel is full, updates are
/// dropped rather than blocking a worker. Completion is authoritative
/// only through the coordinator's `wait_for_completion_or_cancel`.

use std::time::Duration;

/// Maximum number of progress messages that may queue up in the channel.
///
/// A consumer draining once per frame has tens of seconds of headroom; a
/// consumer that ignores the channel costs the scanner nothing because
/// sends are non-blocking.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 4_096;

/// Progress updates emitted while a scan runs.
#[derive(Debug)]
pub enum ScanProgress {
    /// Periodic update with running totals.
    Update {
        files_found: u64,
        dirs_found: u64,
        total_bytes: u64,
        current_path: String,
    },
    /// A non-fatal error (e.g. permission denied); the offending item is
    /// flagged in-tree and the scan continues.
    Error { path: String, message: String },
    /// All queues drained naturally.
    Completed { duration: Duration, error_count: u64 },
    /// The scan was cancelled; the partial tree remains navigable.
    Cancelled,
}
