/// Cushion shading — rasterizes a computed layout into an RGBA buffer.
///
/// Every rectangle carries accumulated parabolic ridge coefficients from
/// the layout pass; the per-pixel surface normal falls out of the two
/// quadratics, and a fixed light direction shades the base color with
/// Lambertian reflectance. Rects are drawn parents-first so nested
/// children overdraw their ancestors, which is what produces the
/// characteristic nested-cushion look without any borders.
use crate::analysis::extensions::{ExtensionIndex, Rgb};
use crate::model::ItemTree;
use crate::options::TreemapOptions;
use crate::treemap::layout::{Rect, TreemapLayout};

/// Background for pixels no rectangle covers.
const BACKGROUND: Rgb = Rgb(20, 22, 28);

/// Render `layout` into `buffer` (tightly packed RGBA, `width * height`).
///
/// Pixels outside the layout's root rectangle are filled with the
/// background color. The buffer origin is the layout origin.
pub fn render(
    layout: &TreemapLayout,
    tree: &ItemTree,
    extensions: &ExtensionIndex,
    options: &TreemapOptions,
    buffer: &mut [u8],
    width: u32,
    height: u32,
) {
    let w = width as usize;
    let h = height as usize;
    assert!(
        buffer.len() >= w * h * 4,
        "buffer too small: {} < {}",
        buffer.len(),
        w * h * 4
    );

    for pixel in buffer[..w * h * 4].chunks_exact_mut(4) {
        pixel[0] = BACKGROUND.0;
        pixel[1] = BACKGROUND.1;
        pixel[2] = BACKGROUND.2;
        pixel[3] = 255;
    }

    // Normalize the light once per pass.
    let [mut lx, mut ly, mut lz] = options.light;
    let len = (lx * lx + ly * ly + lz * lz).sqrt();
    if len > 1e-6 {
        lx /= len;
        ly /= len;
        lz /= len;
    } else {
        (lx, ly, lz) = (0.0, 0.0, 1.0);
    }

    for rect in &layout.rects {
        let base = extensions.color_for(tree, rect.item);
        shade_rect(buffer, w, h, rect.rect, rect.surface, base, options, lx, ly, lz);
    }
}

#[allow(clippy::too_many_arguments)]
fn shade_rect(
    buffer: &mut [u8],
    w: usize,
    h: usize,
    rect: Rect,
    surface: [f32; 4],
    base: Rgb,
    options: &TreemapOptions,
    lx: f32,
    ly: f32,
    lz: f32,
) {
    let [sx1, sx2, sy1, sy2] = surface;
    let x0 = rect.x.max(0) as usize;
    let y0 = rect.y.max(0) as usize;
    let x1 = ((rect.x + rect.w).max(0) as usize).min(w);
    let y1 = ((rect.y + rect.h).max(0) as usize).min(h);

    for py in y0..y1 {
        let fy = py as f32 + 0.5;
        // Surface gradient: d/dy of (sy2·y² + sy1·y); the normal is
        // (-dz/dx, -dz/dy, 1).
        let ny = -(2.0 * sy2 * fy + sy1);
        let row = py * w;
        for px in x0..x1 {
            let fx = px as f32 + 0.5;
            let nx = -(2.0 * sx2 * fx + sx1);

            let dot = nx * lx + ny * ly + lz;
            let n_len = (nx * nx + ny * ny + 1.0).sqrt();
            let cos_theta = (dot / n_len).max(0.0);
            let intensity = (options.ambient + options.diffuse * cos_theta).clamp(0.0, 1.0);

            let idx = (row + px) * 4;
            buffer[idx] = (base.0 as f32 * intensity) as u8;
            buffer[idx + 1] = (base.1 as f32 * intensity) as u8;
            buffer[idx + 2] = (base.2 as f32 * intensity) as u8;
            buffer[idx + 3] = 255;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Item, ItemTree};
    use compact_str::CompactString;

    fn one_leaf_setup() -> (ItemTree, TreemapLayout, ExtensionIndex) {
        let mut tree = ItemTree::with_capacity(4);
        let root = tree.set_root(Item::new_directory(CompactString::new("/r"), None));
        tree.add_child(
            root,
            Item::new_file(CompactString::new("big.iso"), 1000, 1000, 0, 0, None),
        );
        let layout = TreemapLayout::compute(
            &tree,
            root,
            Rect::new(0, 0, 64, 64),
            &TreemapOptions::default(),
        );
        let index = ExtensionIndex::rebuild(&tree);
        (tree, layout, index)
    }

    fn pixel(buffer: &[u8], w: usize, x: usize, y: usize) -> (u8, u8, u8) {
        let i = (y * w + x) * 4;
        (buffer[i], buffer[i + 1], buffer[i + 2])
    }

    fn luma(p: (u8, u8, u8)) -> u32 {
        p.0 as u32 + p.1 as u32 + p.2 as u32
    }

    #[test]
    fn cushion_center_is_brighter_than_edges() {
        let (tree, layout, index) = one_leaf_setup();
        let mut buffer = vec![0u8; 64 * 64 * 4];
        render(
            &layout,
            &tree,
            &index,
            &TreemapOptions::default(),
            &mut buffer,
            64,
            64,
        );
        let center = luma(pixel(&buffer, 64, 32, 32));
        let corner = luma(pixel(&buffer, 64, 1, 62));
        assert!(
            center > corner,
            "cushion must peak near the center: {center} vs {corner}"
        );
    }

    #[test]
    fn base_color_comes_from_the_extension() {
        let (tree, layout, index) = one_leaf_setup();
        let mut buffer = vec![0u8; 64 * 64 * 4];
        render(
            &layout,
            &tree,
            &index,
            &TreemapOptions::default(),
            &mut buffer,
            64,
            64,
        );
        let expected = index.lookup("iso").unwrap().color;
        let (r, g, b) = pixel(&buffer, 64, 32, 32);
        // Shading scales all channels equally, so channel ordering is
        // preserved.
        let ordered = |a: u8, b: u8, x: u8, y: u8| (a <= b) == (x <= y);
        assert!(ordered(expected.0, expected.1, r, g));
        assert!(ordered(expected.1, expected.2, g, b));
    }

    #[test]
    fn alpha_is_opaque_and_background_fills_gaps() {
        let mut tree = ItemTree::with_capacity(2);
        let root = tree.set_root(Item::new_directory(CompactString::new("/r"), None));
        // No children: only the root rect is drawn over part of the buffer.
        let layout = TreemapLayout::compute(
            &tree,
            root,
            Rect::new(0, 0, 16, 16),
            &TreemapOptions::default(),
        );
        let index = ExtensionIndex::rebuild(&tree);
        let mut buffer = vec![0u8; 32 * 32 * 4];
        render(
            &layout,
            &tree,
            &index,
            &TreemapOptions::default(),
            &mut buffer,
            32,
            32,
        );
        // Outside the 16x16 root rect: background.
        assert_eq!(pixel(&buffer, 32, 30, 30), (BACKGROUND.0, BACKGROUND.1, BACKGROUND.2));
        // Every alpha byte is opaque.
        assert!(buffer.chunks_exact(4).all(|p| p[3] == 255));
    }
}
