/// Squarified treemap layout with integer-aligned, exactly-tiling
/// rectangles.
///
/// At each directory the children are taken in size-descending order and
/// packed into strips that alternate with the remaining rectangle's
/// longer axis; a strip grows while its worst aspect ratio keeps
/// improving (Bruls, Huizing, van Wijk). Pixel edges come from
/// cumulative rounding, so every strip tiles its span exactly and the
/// last child absorbs the rounding error.
///
/// Each emitted rectangle carries the accumulated cushion surface
/// coefficients for the shading pass; see `cushion.rs`.
use crate::model::{ItemId, ItemTree};
use crate::options::{SizePolicy, TreemapOptions};
use std::collections::HashMap;

/// An integer pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    #[inline]
    pub fn area(&self) -> i64 {
        self.w.max(0) as i64 * self.h.max(0) as i64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    #[inline]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }
}

/// One laid-out item.
#[derive(Debug, Clone, Copy)]
pub struct TreemapRect {
    pub item: ItemId,
    pub rect: Rect,
    pub depth: u16,
    /// Accumulated cushion surface coefficients [sx1, sx2, sy1, sy2]
    /// (linear x, quadratic x, linear y, quadratic y), van Wijk &
    /// van de Wetering 1999.
    pub surface: [f32; 4],
}

/// The full layout result: rects in parent-before-child order, plus a
/// reverse map for hit testing.
#[derive(Debug)]
pub struct TreemapLayout {
    pub rects: Vec<TreemapRect>,
    by_item: HashMap<ItemId, usize>,
    root: ItemId,
}

/// Add a parabolic ridge over [x1, x2] to one axis of the surface.
fn add_ridge(x1: f32, x2: f32, h: f32, s1: &mut f32, s2: &mut f32) {
    let width = x2 - x1;
    if width.abs() < 1e-6 {
        return;
    }
    *s1 += 4.0 * h * (x2 + x1) / width;
    *s2 -= 4.0 * h / width;
}

impl TreemapLayout {
    /// Lay out the subtree under `root` into `bounds`.
    pub fn compute(
        tree: &ItemTree,
        root: ItemId,
        bounds: Rect,
        options: &TreemapOptions,
    ) -> Self {
        let mut layout = Self {
            rects: Vec::with_capacity(tree.len()),
            by_item: HashMap::with_capacity(tree.len()),
            root,
        };
        if bounds.is_empty() {
            return layout;
        }
        layout.push(TreemapRect {
            item: root,
            rect: bounds,
            depth: 0,
            surface: [0.0; 4],
        });
        if !tree.get(root).is_leaf() {
            layout.layout_children(
                tree,
                root,
                bounds,
                0,
                [0.0; 4],
                options.cushion_height,
                options,
            );
        }
        layout
    }

    fn push(&mut self, rect: TreemapRect) {
        self.by_item.insert(rect.item, self.rects.len());
        self.rects.push(rect);
    }

    /// The rectangle assigned to an item, if it received one.
    pub fn rect_of(&self, item: ItemId) -> Option<Rect> {
        self.by_item.get(&item).map(|&i| self.rects[i].rect)
    }

    /// Descend from the layout root to the deepest item whose rectangle
    /// contains the point. O(depth × children-per-node).
    pub fn hit_test(&self, tree: &ItemTree, x: i32, y: i32) -> Option<ItemId> {
        let root_rect = self.rect_of(self.root)?;
        if !root_rect.contains(x, y) {
            return None;
        }
        let mut current = self.root;
        loop {
            let mut next = None;
            for &child in &tree.get(current).children {
                if let Some(rect) = self.rect_of(child) {
                    if rect.contains(x, y) {
                        next = Some(child);
                        break;
                    }
                }
            }
            match next {
                Some(child) => current = child,
                None => return Some(current),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn layout_children(
        &mut self,
        tree: &ItemTree,
        parent: ItemId,
        bounds: Rect,
        depth: u16,
        surface: [f32; 4],
        ridge_height: f32,
        options: &TreemapOptions,
    ) {
        if bounds.is_empty() {
            return;
        }
        let mut entries: Vec<(ItemId, u64)> = tree
            .get(parent)
            .children
            .iter()
            .map(|&c| (c, size_by_policy(tree, c, options.size_policy)))
            .filter(|&(_, size)| size > 0)
            .collect();
        if entries.is_empty() {
            return;
        }
        // Size-descending regardless of the user's list sort; ties break
        // by id so the layout is deterministic.
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut remaining = bounds;
        let mut remaining_size: f64 = entries.iter().map(|&(_, s)| s as f64).sum();
        let mut idx = 0;

        while idx < entries.len() && !remaining.is_empty() && remaining_size > 0.0 {
            let side = remaining.w.min(remaining.h) as f64;
            let long = remaining.w.max(remaining.h) as f64;
            let area_total = remaining.w as f64 * remaining.h as f64;

            // Grow the strip while the worst aspect ratio improves.
            let mut count = 1;
            let mut strip_size = entries[idx].1 as f64;
            let mut min_size = strip_size;
            let mut max_size = strip_size;
            let mut worst = worst_ratio(
                min_size, max_size, strip_size, side, remaining_size, area_total,
            );
            while idx + count < entries.len() {
                let next = entries[idx + count].1 as f64;
                let trial = worst_ratio(
                    min_size.min(next),
                    max_size.max(next),
                    strip_size + next,
                    side,
                    remaining_size,
                    area_total,
                );
                if trial > worst {
                    break;
                }
                worst = trial;
                strip_size += next;
                min_size = min_size.min(next);
                max_size = max_size.max(next);
                count += 1;
            }

            // Strip thickness along the longer axis; the final strip
            // absorbs whatever rounding left behind.
            let is_last = idx + count == entries.len();
            let thickness = if is_last {
                long as i32
            } else {
                (((strip_size / remaining_size) * long).round() as i32).clamp(1, long as i32)
            };

            let column = remaining.w >= remaining.h;
            let (strip_rect, rest) = if column {
                (
                    Rect::new(remaining.x, remaining.y, thickness, remaining.h),
                    Rect::new(
                        remaining.x + thickness,
                        remaining.y,
                        remaining.w - thickness,
                        remaining.h,
                    ),
                )
            } else {
                (
                    Rect::new(remaining.x, remaining.y, remaining.w, thickness),
                    Rect::new(
                        remaining.x,
                        remaining.y + thickness,
                        remaining.w,
                        remaining.h - thickness,
                    ),
                )
            };

            // Cumulative rounding along the strip: offsets are rounded,
            // lengths are their differences, so the span tiles exactly.
            let side_len = if column { strip_rect.h } else { strip_rect.w };
            let mut cum = 0.0;
            let mut prev_edge = 0i32;
            for j in 0..count {
                let (child, size) = entries[idx + j];
                cum += size as f64;
                let edge = if j == count - 1 {
                    side_len
                } else {
                    ((cum / strip_size) * side_len as f64).round() as i32
                };
                let len = edge - prev_edge;
                prev_edge = edge;
                if len <= 0 || strip_rect.is_empty() {
                    continue;
                }

                let child_rect = if column {
                    Rect::new(
                        strip_rect.x,
                        strip_rect.y + (edge - len),
                        strip_rect.w,
                        len,
                    )
                } else {
                    Rect::new(
                        strip_rect.x + (edge - len),
                        strip_rect.y,
                        len,
                        strip_rect.h,
                    )
                };

                let [mut sx1, mut sx2, mut sy1, mut sy2] = surface;
                add_ridge(
                    child_rect.x as f32,
                    (child_rect.x + child_rect.w) as f32,
                    ridge_height,
                    &mut sx1,
                    &mut sx2,
                );
                add_ridge(
                    child_rect.y as f32,
                    (child_rect.y + child_rect.h) as f32,
                    ridge_height,
                    &mut sy1,
                    &mut sy2,
                );
                let child_surface = [sx1, sx2, sy1, sy2];

                self.push(TreemapRect {
                    item: child,
                    rect: child_rect,
                    depth: depth + 1,
                    surface: child_surface,
                });

                if !tree.get(child).is_leaf() {
                    self.layout_children(
                        tree,
                        child,
                        child_rect,
                        depth + 1,
                        child_surface,
                        ridge_height * options.cushion_falloff,
                        options,
                    );
                }
            }

            remaining = rest;
            remaining_size -= strip_size;
            idx += count;
        }
    }
}

fn size_by_policy(tree: &ItemTree, id: ItemId, policy: SizePolicy) -> u64 {
    let item = tree.get(id);
    match policy {
        SizePolicy::Logical => item.size_logical,
        SizePolicy::Physical => item.size_physical,
    }
}

/// Worst aspect ratio of a strip holding `strip_size` out of
/// `remaining_size`, laid along `side` of a region with `area_total`
/// pixels. Only the largest and smallest member matter.
fn worst_ratio(
    min_size: f64,
    max_size: f64,
    strip_size: f64,
    side: f64,
    remaining_size: f64,
    area_total: f64,
) -> f64 {
    if strip_size <= 0.0 || side <= 0.0 || remaining_size <= 0.0 {
        return f64::MAX;
    }
    let scale = area_total / remaining_size;
    let strip_area = strip_size * scale;
    let min_area = min_size * scale;
    let max_area = max_size * scale;
    let side_sq = side * side;
    let area_sq = strip_area * strip_area;
    (side_sq * max_area / area_sq).max(area_sq / (side_sq * min_area))
}
