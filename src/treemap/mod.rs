/// Treemap — squarified layout with cushion shading.
///
/// `layout` turns a subtree plus a pixel rectangle into exactly-tiling
/// integer rects with a pixel→item reverse mapping; `cushion` shades a
/// computed layout into an RGBA buffer.
pub mod cushion;
pub mod layout;

pub use cushion::render;
pub use layout::{Rect, TreemapLayout, TreemapRect};
