/// Engine facade — the thread-safe surface the shell consumes.
///
/// Owns the shared tree, the current scan (if any), the lazily rebuilt
/// extension index, zoom/selection state, and the cached treemap layout.
/// Views never receive callbacks on engine threads: every notification
/// is a typed [`EngineHint`] posted through the [`HintSink`] trampoline
/// the shell injects at construction, which marshals it onto the shell
/// thread however the shell sees fit.
use crate::analysis::{duplicates, DuplicateGroup, ExtensionIndex};
use crate::csv;
use crate::error::{EngineError, Result};
use crate::model::{Aggregates, ItemId, ItemTree, SortSpec};
use crate::options::{ScanOptions, TreemapOptions};
use crate::scanner::{LiveTree, ScanCoordinator, ScanProgress, ScanState};
use crate::treemap::{self, Rect, TreemapLayout};
use parking_lot::{Mutex, RwLock};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Typed change notifications delivered to the shell.
#[derive(Debug, Clone)]
pub enum EngineHint {
    /// The root item changed (new scan or loaded results); all views
    /// rebuild from scratch.
    NewRoot { root: Option<ItemId> },
    /// A scan or refresh finished. `success` is false after cancellation.
    ScanCompleted { success: bool, error_count: u64 },
    /// The selected items changed.
    SelectionChanged { items: Vec<ItemId> },
    /// The treemap zoom root changed.
    ZoomChanged { item: ItemId },
    /// List presentation (sort order) changed.
    ListStyleChanged,
    /// Treemap presentation (size policy, shading) changed.
    TreemapStyleChanged,
}

/// Trampoline the shell provides; `post` must marshal onto the shell
/// thread. Called from engine internals and from watcher threads, never
/// while an engine lock is held.
pub trait HintSink: Send + Sync {
    fn post(&self, hint: EngineHint);
}

/// Cached treemap layout plus the inputs it was computed from.
struct CachedLayout {
    layout: TreemapLayout,
    root: ItemId,
    bounds: Rect,
}

/// The engine facade.
pub struct Engine {
    tree: LiveTree,
    sink: Arc<dyn HintSink>,
    coordinator: Mutex<Option<ScanCoordinator>>,
    scan_options: Mutex<ScanOptions>,
    treemap_options: Mutex<TreemapOptions>,
    extensions: Arc<Mutex<Option<Arc<ExtensionIndex>>>>,
    layout: Mutex<Option<CachedLayout>>,
    zoom: Mutex<Option<ItemId>>,
    selection: Mutex<Vec<ItemId>>,
}

impl Engine {
    pub fn new(sink: Arc<dyn HintSink>) -> Self {
        Self {
            tree: Arc::new(RwLock::new(ItemTree::default())),
            sink,
            coordinator: Mutex::new(None),
            scan_options: Mutex::new(ScanOptions::default()),
            treemap_options: Mutex::new(TreemapOptions::default()),
            extensions: Arc::new(Mutex::new(None)),
            layout: Mutex::new(None),
            zoom: Mutex::new(None),
            selection: Mutex::new(Vec::new()),
        }
    }

    /// The shared tree, for read snapshots by views.
    pub fn tree(&self) -> &LiveTree {
        &self.tree
    }

    // ── Scan control ───────────────────────────────────────────────

    /// Start scanning `roots`, replacing any previous tree. A running
    /// scan is stopped first.
    pub fn start_scan(&self, roots: &[PathBuf], workers: u32, options: ScanOptions) {
        self.stop_scan();
        self.reset_view_state();
        *self.scan_options.lock() = options.clone();

        let sink = self.sink.clone();
        let extensions = self.extensions.clone();
        let coordinator = ScanCoordinator::start(
            self.tree.clone(),
            roots,
            workers,
            options,
            move |success, error_count| {
                extensions.lock().take();
                sink.post(EngineHint::ScanCompleted {
                    success,
                    error_count,
                });
            },
        );
        *self.coordinator.lock() = Some(coordinator);
        self.sink.post(EngineHint::NewRoot {
            root: self.tree.read().root(),
        });
    }

    /// Re-scan the given subtrees in place. Untouched siblings keep
    /// their ids and aggregates.
    pub fn refresh(&self, items: &[ItemId]) {
        self.stop_scan();
        self.extensions.lock().take();
        self.layout.lock().take();
        // The zoom item may be inside a refreshed subtree; fall back to
        // the root rather than pointing at an unlinked id.
        self.zoom.lock().take();

        let options = self.scan_options.lock().clone();
        let sink = self.sink.clone();
        let extensions = self.extensions.clone();
        let coordinator = ScanCoordinator::start_refresh(
            self.tree.clone(),
            items,
            0,
            options,
            move |success, error_count| {
                extensions.lock().take();
                sink.post(EngineHint::ScanCompleted {
                    success,
                    error_count,
                });
            },
        );
        *self.coordinator.lock() = Some(coordinator);
    }

    /// Cancel the running scan, if any. The partial tree stays
    /// navigable, marked done-with-partial, and the scan state reads
    /// Cancelled until the next scan replaces it.
    pub fn stop_scan(&self) {
        let guard = self.coordinator.lock();
        if let Some(coordinator) = guard.as_ref() {
            coordinator.stop();
        }
    }

    pub fn suspend_scan(&self) {
        if let Some(coordinator) = self.coordinator.lock().as_ref() {
            coordinator.suspend();
        }
    }

    pub fn resume_scan(&self) {
        if let Some(coordinator) = self.coordinator.lock().as_ref() {
            coordinator.resume();
        }
    }

    /// Block until the current scan finishes; `true` on natural
    /// completion, `false` after cancellation. Returns `true`
    /// immediately when no scan is active.
    pub fn wait_for_scan(&self) -> bool {
        // Clone nothing: waiting must not hold the coordinator lock, or
        // stop_scan would deadlock. Take the state out, wait, put back.
        let waiter = {
            let guard = self.coordinator.lock();
            guard.as_ref().map(|c| c.state())
        };
        match waiter {
            None | Some(ScanState::Done) => true,
            Some(ScanState::Cancelled) => false,
            Some(_) => loop {
                std::thread::sleep(std::time::Duration::from_millis(5));
                let state = self.coordinator.lock().as_ref().map(|c| c.state());
                match state {
                    None | Some(ScanState::Done) => return true,
                    Some(ScanState::Cancelled) => return false,
                    Some(_) => {}
                }
            },
        }
    }

    /// `(pos, range)` for a progress gauge; range 0 means indeterminate.
    pub fn progress(&self) -> (u64, u64) {
        self.coordinator
            .lock()
            .as_ref()
            .map(|c| c.progress())
            .unwrap_or((0, 0))
    }

    /// Lifecycle state of the current scan, if one exists.
    pub fn scan_state(&self) -> Option<ScanState> {
        self.coordinator.lock().as_ref().map(|c| c.state())
    }

    /// Non-fatal errors recorded by the current scan.
    pub fn error_count(&self) -> u64 {
        self.coordinator
            .lock()
            .as_ref()
            .map(|c| c.error_count())
            .unwrap_or(0)
    }

    /// Drain pending advisory progress events.
    pub fn poll_progress(&self) -> Vec<ScanProgress> {
        let guard = self.coordinator.lock();
        match guard.as_ref() {
            Some(c) => c.events().try_iter().collect(),
            None => Vec::new(),
        }
    }

    // ── Tree queries ───────────────────────────────────────────────

    pub fn root(&self) -> Option<ItemId> {
        self.tree.read().root()
    }

    /// Atomic snapshot of one item's aggregate tuple.
    pub fn aggregates(&self, item: ItemId) -> Aggregates {
        self.tree.read().get(item).aggregates()
    }

    /// Reorder the whole tree by a new sort spec.
    pub fn sort(&self, spec: SortSpec) {
        self.tree.write().sort(spec);
        self.sink.post(EngineHint::ListStyleChanged);
    }

    pub fn set_selection(&self, items: Vec<ItemId>) {
        *self.selection.lock() = items.clone();
        self.sink.post(EngineHint::SelectionChanged { items });
    }

    pub fn selection(&self) -> Vec<ItemId> {
        self.selection.lock().clone()
    }

    // ── Zoom ───────────────────────────────────────────────────────

    /// The current treemap root: the zoom item, or the tree root.
    pub fn get_zoom(&self) -> Option<ItemId> {
        let zoom = *self.zoom.lock();
        zoom.or_else(|| self.root())
    }

    pub fn set_zoom(&self, item: ItemId) {
        *self.zoom.lock() = Some(item);
        self.layout.lock().take();
        self.sink.post(EngineHint::ZoomChanged { item });
    }

    // ── Statistics ─────────────────────────────────────────────────

    /// Per-extension records, rebuilt lazily after invalidation.
    pub fn extension_data(&self) -> Arc<ExtensionIndex> {
        let mut cache = self.extensions.lock();
        if let Some(index) = cache.as_ref() {
            return index.clone();
        }
        let index = Arc::new(ExtensionIndex::rebuild(&self.tree.read()));
        info!(extensions = index.sorted().len(), "extension index rebuilt");
        *cache = Some(index.clone());
        index
    }

    /// Duplicate groups, computed on demand (content hashing).
    pub fn duplicates(&self) -> Vec<DuplicateGroup> {
        duplicates::find_duplicates(&self.tree.read())
    }

    // ── Treemap ────────────────────────────────────────────────────

    /// Replace the treemap options; invalidates the cached layout.
    pub fn set_treemap_options(&self, options: TreemapOptions) {
        *self.treemap_options.lock() = options;
        self.layout.lock().take();
        self.sink.post(EngineHint::TreemapStyleChanged);
    }

    /// Render the treemap for the current zoom root into `buffer`
    /// (RGBA, `width * height * 4` bytes). Recomputes the layout only
    /// when the root or viewport changed since the last call.
    pub fn render_treemap(&self, buffer: &mut [u8], width: u32, height: u32) {
        let Some(root) = self.get_zoom() else { return };
        let bounds = Rect::new(0, 0, width as i32, height as i32);
        let options = self.treemap_options.lock().clone();
        let extensions = self.extension_data();

        let mut cache = self.layout.lock();
        let tree = self.tree.read();
        let stale = match cache.as_ref() {
            Some(c) => c.root != root || c.bounds != bounds,
            None => true,
        };
        if stale {
            *cache = Some(CachedLayout {
                layout: TreemapLayout::compute(&tree, root, bounds, &options),
                root,
                bounds,
            });
        }
        let layout = &cache.as_ref().expect("just filled").layout;
        treemap::render(layout, &tree, &extensions, &options, buffer, width, height);
    }

    /// Map a treemap pixel back to the deepest item covering it, using
    /// the layout from the last `render_treemap` call.
    pub fn hit_test_treemap(&self, x: i32, y: i32) -> Option<ItemId> {
        let cache = self.layout.lock();
        let cached = cache.as_ref()?;
        cached.layout.hit_test(&self.tree.read(), x, y)
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Save the whole tree to a results file.
    pub fn save_results(&self, path: &Path) -> Result<()> {
        let tree = self.tree.read();
        let root = tree
            .root()
            .ok_or_else(|| EngineError::Invariant("no tree to save".into()))?;
        let file = std::fs::File::create(path).map_err(|e| EngineError::io(path, e))?;
        let mut out = BufWriter::new(file);
        let collect_owner = self.scan_options.lock().collect_owner;
        csv::save_results(&mut out, &tree, root, collect_owner)
            .map_err(|e| EngineError::io(path, e))
    }

    /// Load a results file, replacing the current tree. On any format
    /// error the existing tree is left untouched.
    pub fn load_results(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::open(path).map_err(|e| EngineError::io(path, e))?;
        let sort = self.tree.read().sort_spec();
        let loaded = csv::load_results(BufReader::new(file), sort)?;

        self.stop_scan();
        self.reset_view_state();
        *self.tree.write() = loaded;
        self.sink.post(EngineHint::NewRoot {
            root: self.tree.read().root(),
        });
        Ok(())
    }

    fn reset_view_state(&self) {
        self.extensions.lock().take();
        self.layout.lock().take();
        self.zoom.lock().take();
        self.selection.lock().clear();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop_scan();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Item, SortColumn, SortDirection};
    use compact_str::CompactString;
    use crossbeam_channel::{unbounded, Receiver, Sender};

    /// Test trampoline: hints land on a channel the "shell" drains.
    struct ChannelSink(Sender<EngineHint>);

    impl HintSink for ChannelSink {
        fn post(&self, hint: EngineHint) {
            let _ = self.0.send(hint);
        }
    }

    fn engine() -> (Engine, Receiver<EngineHint>) {
        let (tx, rx) = unbounded();
        (Engine::new(Arc::new(ChannelSink(tx))), rx)
    }

    /// Seed the engine tree directly, bypassing the scanner.
    fn seed(engine: &Engine) -> ItemId {
        let mut tree = engine.tree().write();
        let root = tree.set_root(Item::new_directory(CompactString::new("/r"), None));
        tree.add_child(
            root,
            Item::new_file(CompactString::new("a.iso"), 100, 512, 0, 0, None),
        );
        tree.add_child(
            root,
            Item::new_file(CompactString::new("b.txt"), 50, 512, 0, 0, None),
        );
        tree.mark_enumerated(root);
        root
    }

    #[test]
    fn zoom_posts_a_typed_hint() {
        let (engine, rx) = engine();
        let root = seed(&engine);
        assert_eq!(engine.get_zoom(), Some(root), "defaults to the tree root");

        let child = engine.tree().read().get(root).children[0];
        engine.set_zoom(child);
        assert_eq!(engine.get_zoom(), Some(child));
        assert!(matches!(
            rx.try_recv(),
            Ok(EngineHint::ZoomChanged { item }) if item == child
        ));
    }

    #[test]
    fn sort_posts_list_style_hint() {
        let (engine, rx) = engine();
        seed(&engine);
        engine.sort(SortSpec {
            column: SortColumn::Name,
            direction: SortDirection::Ascending,
        });
        assert!(matches!(rx.try_recv(), Ok(EngineHint::ListStyleChanged)));
    }

    #[test]
    fn extension_data_is_cached_until_invalidated() {
        let (engine, _rx) = engine();
        seed(&engine);
        let first = engine.extension_data();
        let second = engine.extension_data();
        assert!(Arc::ptr_eq(&first, &second), "cached between queries");
        assert!(first.lookup("iso").is_some());
        assert!(first.lookup("txt").is_some());
    }

    #[test]
    fn render_then_hit_test_uses_the_cached_layout() {
        let (engine, _rx) = engine();
        seed(&engine);
        assert_eq!(
            engine.hit_test_treemap(5, 5),
            None,
            "no layout before the first render"
        );

        let mut buffer = vec![0u8; 64 * 64 * 4];
        engine.render_treemap(&mut buffer, 64, 64);
        let hit = engine.hit_test_treemap(5, 5).expect("pixel inside treemap");
        assert!(engine.tree().read().get(hit).is_leaf());
    }

    #[test]
    fn save_and_load_round_trip_through_the_facade() {
        let (engine, rx) = engine();
        let root = seed(&engine);
        let before = engine.aggregates(root);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        engine.save_results(&path).unwrap();

        let (fresh, fresh_rx) = self::engine();
        fresh.load_results(&path).unwrap();
        let loaded_root = fresh.root().expect("root after load");
        assert_eq!(fresh.aggregates(loaded_root), before);
        assert!(fresh.tree().read().get(loaded_root).done);
        assert!(matches!(
            fresh_rx.try_recv(),
            Ok(EngineHint::NewRoot { root: Some(_) })
        ));
        drop(rx);
    }

    #[test]
    fn load_failure_leaves_tree_untouched() {
        let (engine, _rx) = engine();
        let root = seed(&engine);
        let before = engine.aggregates(root);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "\"Name\",\"Files\"\r\n\"/x\",0\r\n").unwrap();
        assert!(engine.load_results(&path).is_err());
        assert_eq!(engine.aggregates(root), before, "tree unchanged");
    }

    #[test]
    fn selection_round_trips_and_notifies() {
        let (engine, rx) = engine();
        let root = seed(&engine);
        let child = engine.tree().read().get(root).children[0];
        engine.set_selection(vec![child]);
        assert_eq!(engine.selection(), vec![child]);
        assert!(matches!(
            rx.try_recv(),
            Ok(EngineHint::SelectionChanged { items }) if items == vec![child]
        ));
    }
}
