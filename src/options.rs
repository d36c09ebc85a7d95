/// Engine configuration structs.
///
/// All options are plain data passed in at construction — the engine has
/// no global state. Defaults match the conservative behaviour: reparse
/// points are never followed, physical sizes drive the treemap, owners
/// are not collected.

/// Options controlling a scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Descend through mount points (volume boundaries).
    pub follow_mount_points: bool,
    /// Descend through junctions (treated as mount points on non-Windows).
    pub follow_junctions: bool,
    /// Descend through symbolic links.
    pub follow_symlinks: bool,
    /// Account sizes by on-disk allocation rather than logical length.
    pub use_physical_sizes: bool,
    /// Resolve and store the owning user for every item.
    pub collect_owner: bool,
    /// Add a `<Free Space>` pseudo-item under each drive root.
    pub show_free_space: bool,
    /// Add an `<Unknown>` pseudo-item under each drive root covering the
    /// difference between used space and what the scan accounted for.
    pub show_unknown: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            follow_mount_points: false,
            follow_junctions: false,
            follow_symlinks: false,
            use_physical_sizes: true,
            collect_owner: false,
            show_free_space: false,
            show_unknown: false,
        }
    }
}

impl ScanOptions {
    /// Whether any class of reparse point will be followed.
    pub fn follows_any_reparse(&self) -> bool {
        self.follow_mount_points || self.follow_junctions || self.follow_symlinks
    }
}

/// Which size drives treemap areas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizePolicy {
    Logical,
    Physical,
}

/// Options controlling treemap layout and shading.
#[derive(Debug, Clone)]
pub struct TreemapOptions {
    /// Size used for area proportions.
    pub size_policy: SizePolicy,
    /// Initial cushion ridge height.
    pub cushion_height: f32,
    /// Per-level ridge height decay.
    pub cushion_falloff: f32,
    /// Ambient light intensity.
    pub ambient: f32,
    /// Diffuse light intensity.
    pub diffuse: f32,
    /// Light direction, normalized at render time.
    pub light: [f32; 3],
}

impl Default for TreemapOptions {
    fn default() -> Self {
        Self {
            size_policy: SizePolicy::Physical,
            cushion_height: 0.75,
            cushion_falloff: 0.75,
            ambient: 0.26,
            diffuse: 0.92,
            light: [1.0, 2.0, 10.0],
        }
    }
}
