/// Scanner module — the parallel scanning pipeline.
///
/// One [`coordinator::ScanCoordinator`] per scan owns a
/// [`queue::TaskQueue`] and worker pool per volume. Workers pop
/// directory tasks, run the [`enumerate`] pass, and write children into
/// a **shared `LiveTree`** (`Arc<RwLock<ItemTree>>`) so consumers can
/// read a real-time, incrementally-growing tree while the scan runs.
///
/// Suspension and cancellation are cooperative: workers observe them at
/// task boundaries and at the enumerator's safe point, never mid-syscall.
pub mod coordinator;
pub mod enumerate;
pub mod hardlinks;
pub mod progress;
pub mod queue;

use crate::model::ItemTree;
use parking_lot::RwLock;
use std::sync::Arc;

/// A shared, concurrently-readable item tree.
///
/// Workers hold the write lock briefly when inserting one directory's
/// children. Readers (views, treemap, statistics) hold the read lock
/// while taking snapshots.
pub type LiveTree = Arc<RwLock<ItemTree>>;

pub use coordinator::{ScanCoordinator, ScanState};
pub use enumerate::{ScanContext, ScanTask};
pub use progress::{ScanProgress, PROGRESS_CHANNEL_CAPACITY};
pub use queue::TaskQueue;
