/// A single node in the arena-allocated item tree.
///
/// Nodes are stored in a flat `Vec<Item>` for cache-friendly traversal.
/// Parent-child relationships use indices rather than pointers, which
/// keeps sibling ids stable across subtree refresh and makes
/// serialisation trivial.
use compact_str::CompactString;
use std::time::{SystemTime, UNIX_EPOCH};

/// Lightweight index into the arena `Vec<Item>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub u32);

impl ItemId {
    /// Create a new `ItemId` from a `usize`, panicking if it exceeds `u32::MAX`.
    #[inline]
    pub fn new(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize, "ItemId overflow");
        Self(index as u32)
    }

    /// Return the index as a `usize` for Vec indexing.
    #[inline]
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

/// What an item represents.
///
/// `MyComputer`, `Drive` and `Directory` are containers; everything else
/// is a leaf. A reparse point that the scan is configured to follow is
/// recorded as a `Directory`, not a `Reparse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    /// Pseudo-root shown when more than one root is scanned.
    MyComputer,
    /// A scanned volume root.
    Drive,
    Directory,
    File,
    /// Pseudo-item covering unallocated volume space.
    FreeSpace,
    /// Pseudo-item covering space the scan could not account for.
    Unknown,
    /// A reparse point (symlink, junction, mount point) that was not followed.
    Reparse,
}

impl ItemKind {
    /// `true` for kinds that may carry children.
    #[inline]
    pub fn is_container(self) -> bool {
        matches!(self, Self::MyComputer | Self::Drive | Self::Directory)
    }

    /// Bit used in the results-file flag word.
    pub fn bits(self) -> u16 {
        match self {
            Self::MyComputer => 0x0001,
            Self::Drive => 0x0002,
            Self::Directory => 0x0004,
            Self::FreeSpace => 0x0008,
            Self::Unknown => 0x0010,
            Self::File => 0x0020,
            Self::Reparse => 0x0040,
        }
    }

    /// Decode the kind from a results-file flag word.
    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits & 0x00ff {
            0x0001 => Some(Self::MyComputer),
            0x0002 => Some(Self::Drive),
            0x0004 => Some(Self::Directory),
            0x0008 => Some(Self::FreeSpace),
            0x0010 => Some(Self::Unknown),
            0x0020 => Some(Self::File),
            0x0040 => Some(Self::Reparse),
            _ => None,
        }
    }
}

/// Per-item flag bits, stored alongside the kind in results files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemFlags(pub u16);

impl ItemFlags {
    /// Set iff the item has no parent.
    pub const ROOT: ItemFlags = ItemFlags(0x0100);
    /// A later observer of an already-seen (volume, file id) pair.
    pub const HARDLINK: ItemFlags = ItemFlags(0x0200);
    /// The item (or its listing) could not be read.
    pub const PROTECTED: ItemFlags = ItemFlags(0x0400);

    #[inline]
    pub fn contains(self, other: ItemFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: ItemFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: ItemFlags) {
        self.0 &= !other.0;
    }
}

/// The aggregate tuple readers snapshot atomically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Aggregates {
    pub files: u64,
    pub folders: u64,
    pub size_logical: u64,
    pub size_physical: u64,
    pub last_change: u64,
}

/// A file, directory, or pseudo-entry in the tree.
#[derive(Debug, Clone)]
pub struct Item {
    pub kind: ItemKind,
    pub flags: ItemFlags,

    /// Leaf label only (NOT the full path). Roots keep their full path
    /// as the name; everything else is reconstructed by walking up.
    pub name: CompactString,

    /// Logical size in bytes. For containers, the running sum over
    /// children observed so far.
    pub size_logical: u64,

    /// On-disk allocation in bytes. Hardlink-deduplicated: only the
    /// first observer of a file id contributes here.
    pub size_physical: u64,

    /// Descendant file count. A file item reports 0 for itself; the +1
    /// is added at the parent when aggregating.
    pub files: u64,

    /// Descendant folder count.
    pub folders: u64,

    /// Last-change timestamp in 100-ns ticks since the Unix epoch.
    /// Containers hold the max over themselves and their descendants.
    pub last_change: u64,

    /// OS attribute bitmask.
    pub attributes: u32,

    /// Owning user, resolved only when the scan collects owners.
    pub owner: Option<CompactString>,

    /// Back-reference; `None` for the root.
    pub parent: Option<ItemId>,

    /// Ordered by the current global sort spec.
    pub children: Vec<ItemId>,

    /// Subtree fully scanned (or declared done-with-partial).
    pub done: bool,

    /// This directory's own listing has completed.
    pub enumerated: bool,

    /// Directory tasks still outstanding below this node.
    pub pending_dirs: u32,
}

impl Item {
    /// Create a leaf file.
    pub fn new_file(
        name: CompactString,
        size_logical: u64,
        size_physical: u64,
        last_change: u64,
        attributes: u32,
        parent: Option<ItemId>,
    ) -> Self {
        Self {
            kind: ItemKind::File,
            flags: ItemFlags::default(),
            name,
            size_logical,
            size_physical,
            files: 0,
            folders: 0,
            last_change,
            attributes,
            owner: None,
            parent,
            children: Vec::new(),
            done: true,
            enumerated: true,
            pending_dirs: 0,
        }
    }

    /// Create an interior directory awaiting enumeration.
    pub fn new_directory(name: CompactString, parent: Option<ItemId>) -> Self {
        Self {
            kind: ItemKind::Directory,
            flags: ItemFlags::default(),
            name,
            size_logical: 0,
            size_physical: 0,
            files: 0,
            folders: 0,
            last_change: 0,
            attributes: 0,
            owner: None,
            parent,
            children: Vec::new(),
            done: false,
            enumerated: false,
            pending_dirs: 0,
        }
    }

    /// Create a leaf pseudo-item or reparse entry of the given kind.
    pub fn new_leaf(kind: ItemKind, name: CompactString, parent: Option<ItemId>) -> Self {
        debug_assert!(!kind.is_container());
        Self {
            kind,
            flags: ItemFlags::default(),
            name,
            size_logical: 0,
            size_physical: 0,
            files: 0,
            folders: 0,
            last_change: 0,
            attributes: 0,
            owner: None,
            parent,
            children: Vec::new(),
            done: true,
            enumerated: true,
            pending_dirs: 0,
        }
    }

    /// `true` when the item can never have children.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        !self.kind.is_container()
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.flags.contains(ItemFlags::ROOT)
    }

    #[inline]
    pub fn is_protected(&self) -> bool {
        self.flags.contains(ItemFlags::PROTECTED)
    }

    /// The kind+flags word written to results files (`0x%04X`).
    pub fn type_bits(&self) -> u16 {
        self.kind.bits() | self.flags.0
    }

    /// Snapshot the aggregate tuple.
    pub fn aggregates(&self) -> Aggregates {
        Aggregates {
            files: self.files,
            folders: self.folders,
            size_logical: self.size_logical,
            size_physical: self.size_physical,
            last_change: self.last_change,
        }
    }

    /// Lowercased extension for files ("" when there is no dot).
    pub fn extension(&self) -> CompactString {
        if self.kind != ItemKind::File {
            return CompactString::default();
        }
        match self.name.rfind('.') {
            // A leading dot is a hidden-file convention, not an extension.
            Some(0) | None => CompactString::default(),
            Some(pos) => {
                let mut ext = CompactString::from(&self.name[pos + 1..]);
                if ext.chars().any(|c| c.is_ascii_uppercase()) {
                    ext = CompactString::from(ext.to_ascii_lowercase());
                }
                ext
            }
        }
    }
}

/// Convert a filesystem timestamp to 100-ns ticks since the Unix epoch.
/// Pre-epoch times clamp to zero.
pub fn ticks_from_system_time(t: SystemTime) -> u64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_nanos() / 100) as u64,
        Err(_) => 0,
    }
}
