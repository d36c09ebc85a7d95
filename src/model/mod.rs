/// Data model for the item tree.
///
/// Re-exports the arena-allocated tree structure and supporting types.
pub mod item;
pub mod size;
pub mod tree;

pub use item::{ticks_from_system_time, Aggregates, Item, ItemFlags, ItemId, ItemKind};
pub use tree::{ItemTree, SortColumn, SortDirection, SortSpec};
