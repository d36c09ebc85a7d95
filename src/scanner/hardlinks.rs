/// Hardlink and cycle bookkeeping for one scan.
///
/// Both sets hold only `(volume, file id)` identifiers, never item
/// references, and are cleared at every scan start.
use crate::platform::FileId;
use parking_lot::Mutex;
use std::collections::HashSet;

/// First-observer registry for hardlinked files.
///
/// The first directory entry seen for a file id contributes the file's
/// physical size; every later observer is flagged HARDLINK and adds to
/// logical size only.
#[derive(Debug, Default)]
pub struct HardlinkRegistry {
    seen: Mutex<HashSet<FileId>>,
}

impl HardlinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation. Returns `true` iff this is the first
    /// observer of the file id.
    pub fn first_observer(&self, id: FileId) -> bool {
        self.seen.lock().insert(id)
    }

    /// New-scan boundary.
    pub fn clear(&self) {
        self.seen.lock().clear();
    }
}

/// Directory ids already entered, consulted only when reparse-point
/// following is enabled. Rejects re-entry at directory granularity so
/// symlink cycles terminate.
#[derive(Debug, Default)]
pub struct VisitedDirectories {
    seen: Mutex<HashSet<FileId>>,
}

impl VisitedDirectories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to enter a directory. Returns `false` if it was already
    /// visited in this scan.
    pub fn enter(&self, id: FileId) -> bool {
        self.seen.lock().insert(id)
    }

    pub fn clear(&self) {
        self.seen.lock().clear();
    }
}
