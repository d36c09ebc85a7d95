/// Scan coordinator — owns the queues and worker pools for one scan.
///
/// Lifecycle per scan: Idle → Running → (Suspended ↔ Running) →
/// {Done, Cancelled} → Idle. Tasks are sharded into one queue per
/// volume so parallel roots on different disks never contend for the
/// same spindle; each queue gets its own fixed worker pool.
///
/// A dedicated watcher thread blocks on every queue's completion and
/// finalizes the scan (pseudo-item fixup, terminal event, completion
/// callback), so workers never call back into the facade directly.
use crate::model::size::{format_count, format_size};
use crate::model::ticks_from_system_time;
use crate::model::{Item, ItemFlags, ItemId, ItemKind};
use crate::options::ScanOptions;
use crate::platform;
use crate::scanner::enumerate::{scan_directory, ScanContext, ScanTask};
use crate::scanner::hardlinks::{HardlinkRegistry, VisitedDirectories};
use crate::scanner::progress::{ScanProgress, PROGRESS_CHANNEL_CAPACITY};
use crate::scanner::queue::TaskQueue;
use crate::scanner::LiveTree;
use compact_str::CompactString;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info};

/// Observable lifecycle state of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Running,
    Suspended,
    Done,
    Cancelled,
}

/// Handle to a running (or finished) scan.
pub struct ScanCoordinator {
    tree: LiveTree,
    queues: Vec<Arc<TaskQueue<ScanTask>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    state: Arc<Mutex<ScanState>>,
    error_count: Arc<AtomicU64>,
    events_rx: Receiver<ScanProgress>,
    /// Upper bound for progress reporting; 0 when no sensible bound exists.
    range: u64,
}

impl ScanCoordinator {
    /// Start scanning `roots`. With more than one root a MyComputer
    /// pseudo-root is installed and each root becomes a child of it.
    /// `worker_count == 0` selects one worker per CPU.
    ///
    /// `on_finished(true)` fires on natural completion, `on_finished(false)`
    /// after cancellation; it runs on the watcher thread.
    pub fn start(
        tree: LiveTree,
        roots: &[PathBuf],
        worker_count: u32,
        options: ScanOptions,
        on_finished: impl FnOnce(bool, u64) + Send + 'static,
    ) -> Self {
        let error_count = Arc::new(AtomicU64::new(0));
        let mut tasks: Vec<ScanTask> = Vec::new();
        let mut scan_roots: Vec<(ItemId, PathBuf)> = Vec::new();

        {
            let mut t = tree.write();
            if roots.len() == 1 {
                let path = &roots[0];
                let item = root_item(path, &options, &error_count);
                let pending = !item.done;
                let id = t.set_root(item);
                if pending {
                    tasks.push(ScanTask {
                        item: id,
                        path: path.clone(),
                        volume: volume_of_path(path).unwrap_or(0),
                    });
                }
                scan_roots.push((id, path.clone()));
            } else {
                let mut computer =
                    Item::new_directory(CompactString::new("My Computer"), None);
                computer.kind = ItemKind::MyComputer;
                let computer_id = t.set_root(computer);
                for path in roots {
                    let item = root_item(path, &options, &error_count);
                    let pending = !item.done;
                    let id = t.add_child(computer_id, item);
                    if pending {
                        tasks.push(ScanTask {
                            item: id,
                            path: path.clone(),
                            volume: volume_of_path(path).unwrap_or(0),
                        });
                    }
                    scan_roots.push((id, path.clone()));
                }
                t.mark_enumerated(computer_id);
            }
        }

        let range = progress_range(roots, &options);
        Self::launch(tree, tasks, scan_roots, worker_count, options, range, error_count, on_finished)
    }

    /// Re-scan the given subtrees in place: each is unlinked (aggregates
    /// subtracted), replaced by a fresh empty container at the same path,
    /// and enqueued as new scan work. Untouched siblings keep their ids.
    pub fn start_refresh(
        tree: LiveTree,
        items: &[ItemId],
        worker_count: u32,
        options: ScanOptions,
        on_finished: impl FnOnce(bool, u64) + Send + 'static,
    ) -> Self {
        let error_count = Arc::new(AtomicU64::new(0));
        let mut tasks: Vec<ScanTask> = Vec::new();

        {
            let mut t = tree.write();
            for &id in items {
                if !t.get(id).kind.is_container() {
                    continue;
                }
                let path = PathBuf::from(t.full_path(id));
                let parent = t.get(id).parent;
                let kind = t.get(id).kind;
                let name = t.get(id).name.clone();

                let fresh = match parent {
                    Some(p) => {
                        t.remove_subtree(id);
                        let item = refreshed_container(kind, name, &path, &error_count);
                        t.add_child(p, item)
                    }
                    None => {
                        let item = refreshed_container(kind, name, &path, &error_count);
                        t.set_root(item)
                    }
                };
                if !t.get(fresh).done {
                    let volume = volume_of_path(&path).unwrap_or(0);
                    tasks.push(ScanTask {
                        item: fresh,
                        path,
                        volume,
                    });
                } else {
                    t.mark_enumerated(fresh);
                }
            }
        }

        // Refresh never re-creates drive pseudo-items, so no fixup roots.
        Self::launch(tree, tasks, Vec::new(), worker_count, options, 0, error_count, on_finished)
    }

    /// Shared machinery: shard tasks per volume, spin up the pools, and
    /// start the completion watcher.
    #[allow(clippy::too_many_arguments)]
    fn launch(
        tree: LiveTree,
        tasks: Vec<ScanTask>,
        scan_roots: Vec<(ItemId, PathBuf)>,
        worker_count: u32,
        options: ScanOptions,
        range: u64,
        error_count: Arc<AtomicU64>,
        on_finished: impl FnOnce(bool, u64) + Send + 'static,
    ) -> Self {
        let worker_count = if worker_count == 0 {
            num_cpus::get() as u32
        } else {
            worker_count
        };
        let (events_tx, events_rx) = crossbeam_channel::bounded(PROGRESS_CHANNEL_CAPACITY);
        let state = Arc::new(Mutex::new(ScanState::Running));
        let hardlinks = Arc::new(HardlinkRegistry::new());
        let visited = Arc::new(VisitedDirectories::new());
        if options.follows_any_reparse() {
            // Seed the cycle-rejection set with the roots themselves, so
            // a link pointing back at a scan root is cut off too.
            for task in &tasks {
                if let Ok(meta) = std::fs::symlink_metadata(&task.path) {
                    if let Some(id) = platform::file_identity(&meta) {
                        visited.enter(id);
                    }
                }
            }
        }
        let files_found = Arc::new(AtomicU64::new(0));
        let dirs_found = Arc::new(AtomicU64::new(0));
        let bytes_found = Arc::new(AtomicU64::new(0));

        // One queue per volume.
        let mut by_volume: HashMap<u64, Vec<ScanTask>> = HashMap::new();
        for task in tasks {
            by_volume.entry(task.volume).or_default().push(task);
        }

        let mut queues: Vec<Arc<TaskQueue<ScanTask>>> = Vec::new();
        let mut threads: Vec<JoinHandle<()>> = Vec::new();
        for (volume, volume_tasks) in by_volume {
            let queue = Arc::new(TaskQueue::new(worker_count));
            for task in volume_tasks {
                queue.push(task);
            }
            let ctx = Arc::new(ScanContext {
                tree: tree.clone(),
                queue: queue.clone(),
                options: options.clone(),
                hardlinks: hardlinks.clone(),
                visited: visited.clone(),
                events: events_tx.clone(),
                error_count: error_count.clone(),
                files_found: files_found.clone(),
                dirs_found: dirs_found.clone(),
                bytes_found: bytes_found.clone(),
            });
            for worker in 0..worker_count {
                let ctx = ctx.clone();
                let handle = thread::Builder::new()
                    .name(format!("dirscope-scan-{volume:x}-{worker}"))
                    .spawn(move || loop {
                        match ctx.queue.pop() {
                            Ok(task) => {
                                if scan_directory(&ctx, &task).is_err() {
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    })
                    .expect("failed to spawn scan worker");
                threads.push(handle);
            }
            queues.push(queue);
        }

        info!(
            queues = queues.len(),
            workers_per_queue = worker_count,
            "scan started"
        );

        // Completion watcher: observes every queue, then finalizes.
        let watcher = {
            let tree = tree.clone();
            let queues = queues.clone();
            let state = state.clone();
            let events_tx = events_tx.clone();
            let error_count = error_count.clone();
            let options = options.clone();
            let started_at = Instant::now();
            thread::Builder::new()
                .name("dirscope-watch".into())
                .spawn(move || {
                    let ok = queues.iter().all(|q| q.wait_for_completion_or_cancel());
                    if ok {
                        fixup_pseudo_items(&tree, &scan_roots, &options);
                        *state.lock() = ScanState::Done;
                        let errors = error_count.load(Ordering::Relaxed);
                        let (bytes, files) = {
                            let t = tree.read();
                            t.root()
                                .map(|r| (t.get(r).size_logical, t.get(r).files))
                                .unwrap_or((0, 0))
                        };
                        info!(
                            duration = ?started_at.elapsed(),
                            errors,
                            files = %format_count(files),
                            total = %format_size(bytes),
                            "scan complete"
                        );
                        let _ = events_tx.try_send(ScanProgress::Completed {
                            duration: started_at.elapsed(),
                            error_count: errors,
                        });
                        // Release the parked workers; the pools are joined
                        // by `stop` or on drop.
                        for q in &queues {
                            q.cancel();
                        }
                    } else {
                        // Leave the partial tree consistent and navigable.
                        tree.write().finish_partial();
                        let mut st = state.lock();
                        if *st != ScanState::Done {
                            *st = ScanState::Cancelled;
                        }
                        drop(st);
                        let _ = events_tx.try_send(ScanProgress::Cancelled);
                    }
                    on_finished(ok, error_count.load(Ordering::Relaxed));
                })
                .expect("failed to spawn scan watcher")
        };
        threads.push(watcher);

        Self {
            tree,
            queues,
            threads: Mutex::new(threads),
            state,
            error_count,
            events_rx,
            range,
        }
    }

    /// Pause all queues; returns once every worker is observed idle.
    pub fn suspend(&self) {
        for q in &self.queues {
            q.suspend();
        }
        let mut st = self.state.lock();
        if *st == ScanState::Running {
            *st = ScanState::Suspended;
        }
        debug!("scan suspended");
    }

    /// Resume a suspended scan. Idempotent.
    pub fn resume(&self) {
        for q in &self.queues {
            q.resume();
        }
        let mut st = self.state.lock();
        if *st == ScanState::Suspended {
            *st = ScanState::Running;
        }
        debug!("scan resumed");
    }

    /// Cancel the scan and join every worker. The watcher thread (joined
    /// here too) finalizes the tree as done-with-partial and settles the
    /// state, so after `stop` returns no scan thread remains and the
    /// verdict is final. Idempotent; also used to reap threads after a
    /// natural completion.
    pub fn stop(&self) {
        for q in &self.queues {
            q.cancel();
        }
        let handles = std::mem::take(&mut *self.threads.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Block until every queue reports natural completion or cancellation.
    /// Returns `true` only on natural completion.
    pub fn wait_for_completion_or_cancel(&self) -> bool {
        if self.queues.iter().all(|q| q.wait_for_completion_or_cancel()) {
            return true;
        }
        // The queues were cancelled — either by `stop`, or by the watcher
        // reaping parked workers after a natural completion. The watcher
        // settles the verdict; wait for it.
        loop {
            match *self.state.lock() {
                ScanState::Done => return true,
                ScanState::Cancelled => return false,
                _ => thread::sleep(std::time::Duration::from_millis(2)),
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ScanState {
        *self.state.lock()
    }

    /// `(pos, range)`: bytes aggregated so far, against the summed
    /// capacity of the scanned volumes (0 = indeterminate).
    pub fn progress(&self) -> (u64, u64) {
        let pos = {
            let t = self.tree.read();
            t.root().map(|r| t.get(r).size_logical).unwrap_or(0)
        };
        (pos, self.range)
    }

    /// Number of non-fatal errors recorded so far.
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Receiver for advisory progress events.
    pub fn events(&self) -> &Receiver<ScanProgress> {
        &self.events_rx
    }
}

impl Drop for ScanCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build the item for a scan root, flagging it PROTECTED when the path
/// cannot be read.
fn root_item(path: &Path, options: &ScanOptions, error_count: &AtomicU64) -> Item {
    let name = CompactString::from(path.to_string_lossy().as_ref());
    let mut item = Item::new_directory(name, None);
    if path.parent().is_none() {
        item.kind = ItemKind::Drive;
    }
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            item.last_change = meta
                .modified()
                .ok()
                .map(ticks_from_system_time)
                .unwrap_or(0);
            item.attributes = platform::attributes(&meta);
            if options.collect_owner {
                item.owner = platform::owner(&meta);
            }
        }
        Ok(_) | Err(_) => {
            error_count.fetch_add(1, Ordering::Relaxed);
            item.flags.insert(ItemFlags::PROTECTED);
            item.done = true;
            item.enumerated = true;
        }
    }
    item
}

/// Fresh empty container for a subtree refresh, re-statted so its own
/// timestamp and attributes are current.
fn refreshed_container(
    kind: ItemKind,
    name: CompactString,
    path: &Path,
    error_count: &AtomicU64,
) -> Item {
    let mut item = Item::new_directory(name, None);
    item.kind = kind;
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            item.last_change = meta
                .modified()
                .ok()
                .map(ticks_from_system_time)
                .unwrap_or(0);
            item.attributes = platform::attributes(&meta);
        }
        Ok(_) | Err(_) => {
            error_count.fetch_add(1, Ordering::Relaxed);
            item.flags.insert(ItemFlags::PROTECTED);
            item.done = true;
            item.enumerated = true;
        }
    }
    item
}

fn volume_of_path(path: &Path) -> Option<u64> {
    std::fs::symlink_metadata(path)
        .ok()
        .map(|m| platform::volume_of(&m))
}

/// Sum of the distinct volumes' capacities, or 0 when link-following
/// makes the scan unbounded (the consumer then shows an indeterminate
/// gauge).
fn progress_range(roots: &[PathBuf], options: &ScanOptions) -> u64 {
    if options.follows_any_reparse() {
        return 0;
    }
    let mut seen = std::collections::HashSet::new();
    let mut total = 0u64;
    for path in roots {
        let Some(volume) = volume_of_path(path) else {
            continue;
        };
        if seen.insert(volume) {
            if let Some(info) = platform::volume_info(path) {
                total += info.capacity;
            }
        }
    }
    total
}

/// Post-completion pass: install `<Free Space>` / `<Unknown>` pseudo
/// items under drive roots when the corresponding options are set.
fn fixup_pseudo_items(tree: &LiveTree, scan_roots: &[(ItemId, PathBuf)], options: &ScanOptions) {
    if !options.show_free_space && !options.show_unknown {
        return;
    }
    for (root, path) in scan_roots {
        let Some(info) = platform::volume_info(path) else {
            continue;
        };
        let mut t = tree.write();
        if t.get(*root).kind != ItemKind::Drive {
            continue;
        }
        if options.show_free_space {
            let mut item = Item::new_leaf(
                ItemKind::FreeSpace,
                CompactString::new("<Free Space>"),
                None,
            );
            item.size_logical = info.free;
            item.size_physical = info.free;
            t.add_child(*root, item);
        }
        if options.show_unknown {
            let used = info.capacity.saturating_sub(info.free);
            let unknown = used.saturating_sub(t.get(*root).size_physical);
            let mut item =
                Item::new_leaf(ItemKind::Unknown, CompactString::new("<Unknown>"), None);
            item.size_logical = unknown;
            item.size_physical = unknown;
            t.add_child(*root, item);
        }
    }
}
