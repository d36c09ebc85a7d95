/// Directory enumerator — processes one scan task.
///
/// Lists a single directory, classifies every entry, resolves metadata
/// *before* touching the shared tree (the stat syscalls are the
/// expensive part), then installs all children under one write lock and
/// enqueues follow-up tasks for subdirectories.
///
/// Errors are local: an unreadable directory or entry is flagged
/// PROTECTED in-tree with zero aggregates and the scan continues, so
/// completion detection never stalls on inaccessible paths.
use crate::error::Cancelled;
use crate::model::{ticks_from_system_time, Item, ItemFlags, ItemId, ItemKind};
use crate::options::ScanOptions;
use crate::platform;
use crate::scanner::hardlinks::{HardlinkRegistry, VisitedDirectories};
use crate::scanner::progress::ScanProgress;
use crate::scanner::queue::TaskQueue;
use crate::scanner::LiveTree;
use compact_str::CompactString;
use crossbeam_channel::Sender;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A unit of scan work: one directory awaiting enumeration.
#[derive(Debug)]
pub struct ScanTask {
    pub item: ItemId,
    pub path: PathBuf,
    /// Volume the directory lives on; a child on a different volume is a
    /// mount point.
    pub volume: u64,
}

/// Shared state for one queue's workers.
pub struct ScanContext {
    pub tree: LiveTree,
    pub queue: Arc<TaskQueue<ScanTask>>,
    pub options: ScanOptions,
    pub hardlinks: Arc<HardlinkRegistry>,
    pub visited: Arc<VisitedDirectories>,
    pub events: Sender<ScanProgress>,
    pub error_count: Arc<AtomicU64>,
    pub files_found: Arc<AtomicU64>,
    pub dirs_found: Arc<AtomicU64>,
    pub bytes_found: Arc<AtomicU64>,
}

impl ScanContext {
    fn record_error(&self, path: &std::path::Path, err: &std::io::Error) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        // Lossy by design; see progress.rs.
        let _ = self.events.try_send(ScanProgress::Error {
            path: path.to_string_lossy().into_owned(),
            message: err.to_string(),
        });
    }
}

/// A classified child ready for insertion.
struct PendingChild {
    item: Item,
    /// `Some((path, volume))` when the child is a directory to scan.
    descend: Option<(PathBuf, u64)>,
}

/// Enumerate one directory and install its children.
///
/// Returns `Err(Cancelled)` only when cancellation interrupts the
/// suspension point; all I/O failures are absorbed into the tree.
pub fn scan_directory(ctx: &ScanContext, task: &ScanTask) -> Result<(), Cancelled> {
    let reader = match fs::read_dir(&task.path) {
        Ok(r) => r,
        Err(err) => {
            debug!(path = %task.path.display(), %err, "directory listing failed");
            ctx.record_error(&task.path, &err);
            let mut tree = ctx.tree.write();
            tree.get_mut(task.item).flags.insert(ItemFlags::PROTECTED);
            tree.mark_enumerated(task.item);
            return Ok(());
        }
    };

    let mut pending: Vec<PendingChild> = Vec::new();
    for entry in reader {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                ctx.record_error(&task.path, &err);
                continue;
            }
        };
        let name = CompactString::from(entry.file_name().to_string_lossy().as_ref());
        let path = entry.path();

        // DirEntry::metadata has lstat semantics: reparse points are
        // classified before any traversal decision.
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                ctx.record_error(&path, &err);
                pending.push(PendingChild {
                    item: protected_leaf(name),
                    descend: None,
                });
                continue;
            }
        };

        if meta.file_type().is_symlink() {
            if !ctx.options.follow_symlinks {
                pending.push(PendingChild {
                    item: reparse_leaf(name, &meta),
                    descend: None,
                });
                continue;
            }
            // Follow: classify the target instead.
            match fs::metadata(&path) {
                Ok(target) if target.is_dir() => {
                    pending.push(classify_directory(ctx, name, path, &target, task.volume));
                }
                Ok(target) => pending.push(PendingChild {
                    item: file_item(ctx, name, &target),
                    descend: None,
                }),
                Err(err) => {
                    ctx.record_error(&path, &err);
                    pending.push(PendingChild {
                        item: protected_leaf(name),
                        descend: None,
                    });
                }
            }
        } else if meta.is_dir() {
            pending.push(classify_directory(ctx, name, path, &meta, task.volume));
        } else {
            pending.push(PendingChild {
                item: file_item(ctx, name, &meta),
                descend: None,
            });
        }
    }

    // Install all children under a single write lock, then mark this
    // directory's own listing finished so completion can bubble once the
    // subdirectory tasks drain.
    let mut follow_ups: Vec<ScanTask> = Vec::new();
    {
        let mut tree = ctx.tree.write();
        for child in pending {
            let descend = child.descend;
            let id = tree.add_child(task.item, child.item);
            if let Some((path, volume)) = descend {
                follow_ups.push(ScanTask {
                    item: id,
                    path,
                    volume,
                });
            }
        }
        tree.mark_enumerated(task.item);
    }

    ctx.queue.wait_if_suspended()?;
    for follow_up in follow_ups {
        ctx.queue.push(follow_up);
    }

    ctx.dirs_found.fetch_add(1, Ordering::Relaxed);
    let _ = ctx.events.try_send(ScanProgress::Update {
        files_found: ctx.files_found.load(Ordering::Relaxed),
        dirs_found: ctx.dirs_found.load(Ordering::Relaxed),
        total_bytes: ctx.bytes_found.load(Ordering::Relaxed),
        current_path: task.path.to_string_lossy().into_owned(),
    });
    Ok(())
}

/// Decide whether a directory entry is scanned or cut off as a reparse
/// leaf (mount-point crossing, or a cycle when links are followed).
fn classify_directory(
    ctx: &ScanContext,
    name: CompactString,
    path: PathBuf,
    meta: &fs::Metadata,
    parent_volume: u64,
) -> PendingChild {
    let crosses_volume = platform::volume_of(meta) != parent_volume;
    if crosses_volume && !ctx.options.follow_mount_points && !ctx.options.follow_junctions {
        return PendingChild {
            item: reparse_leaf(name, meta),
            descend: None,
        };
    }
    if ctx.options.follows_any_reparse() {
        if let Some(id) = platform::file_identity(meta) {
            if !ctx.visited.enter(id) {
                // Cycle edge: already entered this directory in this scan.
                return PendingChild {
                    item: reparse_leaf(name, meta),
                    descend: None,
                };
            }
        }
    }

    let mut item = Item::new_directory(name, None);
    item.last_change = meta
        .modified()
        .ok()
        .map(ticks_from_system_time)
        .unwrap_or(0);
    item.attributes = platform::attributes(meta);
    if ctx.options.collect_owner {
        item.owner = platform::owner(meta);
    }
    PendingChild {
        item,
        descend: Some((path, platform::volume_of(meta))),
    }
}

/// Build a leaf file item, with hardlink-deduplicated physical size.
fn file_item(ctx: &ScanContext, name: CompactString, meta: &fs::Metadata) -> Item {
    let logical = meta.len();
    let ticks = meta
        .modified()
        .ok()
        .map(ticks_from_system_time)
        .unwrap_or(0);
    let mut item = Item::new_file(name, logical, 0, ticks, platform::attributes(meta), None);

    let mut physical = if ctx.options.use_physical_sizes {
        platform::physical_size(meta)
    } else {
        logical
    };
    if platform::link_count(meta) > 1 {
        if let Some(id) = platform::file_identity(meta) {
            if !ctx.hardlinks.first_observer(id) {
                item.flags.insert(ItemFlags::HARDLINK);
                physical = 0;
            }
        }
    }
    item.size_physical = physical;

    if ctx.options.collect_owner {
        item.owner = platform::owner(meta);
    }

    ctx.files_found.fetch_add(1, Ordering::Relaxed);
    ctx.bytes_found.fetch_add(logical, Ordering::Relaxed);
    item
}

/// Leaf for a reparse point that is not followed.
fn reparse_leaf(name: CompactString, meta: &fs::Metadata) -> Item {
    let mut item = Item::new_leaf(ItemKind::Reparse, name, None);
    item.size_logical = if meta.file_type().is_symlink() {
        meta.len()
    } else {
        0
    };
    item.last_change = meta
        .modified()
        .ok()
        .map(ticks_from_system_time)
        .unwrap_or(0);
    item.attributes = platform::attributes(meta);
    item
}

/// Leaf for an entry whose metadata could not be read. Zero aggregates
/// apart from counting itself, so parent counts still advance.
fn protected_leaf(name: CompactString) -> Item {
    let mut item = Item::new_file(name, 0, 0, 0, 0, None);
    item.flags.insert(ItemFlags::PROTECTED);
    item
}
