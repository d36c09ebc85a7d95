/// DirScope Engine — directory-size analysis without the window chrome.
///
/// Scans one or more filesystem roots in parallel, aggregates per-subtree
/// size and count statistics, classifies files by extension, lays the
/// result out as a cushioned treemap with pixel→item hit testing, and
/// persists scan results as CSV.
///
/// This crate contains the engine only; a desktop shell consumes it
/// through [`engine::Engine`] and receives change notifications as typed
/// hints over a trampoline it injects.
///
/// # Modules
///
/// - [`model`] — Arena-allocated item tree with incremental upward
///   aggregate propagation and completion tracking.
/// - [`scanner`] — Parallel scanning pipeline: suspendable work queues,
///   per-volume worker pools, directory enumeration, hardlink dedup.
/// - [`analysis`] — Extension statistics and duplicate detection.
/// - [`treemap`] — Squarified layout with cushion shading.
/// - [`csv`] — Results persistence (save/load).
/// - [`engine`] — The thread-safe facade.
/// - [`platform`] — File identity, allocated size, volume info.
pub mod analysis;
pub mod csv;
pub mod engine;
pub mod error;
pub mod model;
pub mod options;
pub mod platform;
pub mod scanner;
pub mod treemap;

pub use engine::{Engine, EngineHint, HintSink};
pub use error::{EngineError, Result};
pub use options::{ScanOptions, SizePolicy, TreemapOptions};
