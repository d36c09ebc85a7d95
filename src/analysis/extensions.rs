/// Extension statistics — per-extension file counts, byte totals, and
/// treemap colors.
///
/// Rebuilt by a single pass over the tree (after scan completion, or on
/// first query after a structural mutation invalidated the previous
/// index). Only real files contribute; directories, reparse points and
/// pseudo-items are skipped.
use crate::model::{ItemId, ItemKind, ItemTree};
use compact_str::CompactString;
use std::collections::HashMap;

/// All assigned colors share this brightness, defined as
/// (r + g + b) / 255 on a 0..3 scale. RGB(127, 255, 0), for example,
/// has a brightness of 1.5.
pub const BASE_BRIGHTNESS: f64 = 1.8;

/// Hue table the assigned colors cycle through. Each entry is
/// re-balanced to [`BASE_BRIGHTNESS`]; once the table is exhausted the
/// cycle repeats with progressively darker variants.
const PALETTE: &[(u8, u8, u8)] = &[
    (0x00, 0x00, 0xff),
    (0xff, 0x00, 0x00),
    (0x00, 0xff, 0x00),
    (0x00, 0xff, 0xff),
    (0xff, 0x00, 0xff),
    (0xff, 0xff, 0x00),
    (0x96, 0x96, 0xff),
    (0xff, 0x96, 0x96),
    (0x96, 0xff, 0x96),
    (0x96, 0xff, 0xff),
    (0xff, 0x96, 0xff),
    (0xff, 0xff, 0x96),
    (0xff, 0xff, 0xff),
];

/// Darkening factor applied per full palette cycle.
const CYCLE_DARKEN: f64 = 0.75;

/// A plain sRGB triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// (r + g + b) / 255, in [0, 3].
    pub fn brightness(self) -> f64 {
        (self.0 as f64 + self.1 as f64 + self.2 as f64) / 255.0
    }
}

/// Data stored for each extension.
#[derive(Debug, Clone)]
pub struct ExtensionRecord {
    /// Lowercased, without the dot; empty for files with no extension.
    pub extension: CompactString,
    pub files: u64,
    pub bytes: u64,
    pub color: Rgb,
}

/// Maps an extension to its record, plus the size-descending order.
#[derive(Debug, Default)]
pub struct ExtensionIndex {
    records: Vec<ExtensionRecord>,
    by_extension: HashMap<CompactString, usize>,
}

impl ExtensionIndex {
    /// Accumulate (files, bytes) per extension over the whole tree, sort
    /// by bytes descending, and assign palette colors in that order so
    /// the biggest extensions take the most distinguishable hues.
    pub fn rebuild(tree: &ItemTree) -> Self {
        let mut totals: HashMap<CompactString, (u64, u64)> = HashMap::new();
        if let Some(root) = tree.root() {
            tree.walk(root, |_, item| {
                if item.kind != ItemKind::File {
                    return;
                }
                let entry = totals.entry(item.extension()).or_insert((0, 0));
                entry.0 += 1;
                entry.1 += item.size_physical;
            });
        }

        let mut records: Vec<ExtensionRecord> = totals
            .into_iter()
            .map(|(extension, (files, bytes))| ExtensionRecord {
                extension,
                files,
                bytes,
                color: Rgb(0, 0, 0),
            })
            .collect();
        records.sort_by(|a, b| {
            b.bytes
                .cmp(&a.bytes)
                .then_with(|| a.extension.cmp(&b.extension))
        });

        for (i, record) in records.iter_mut().enumerate() {
            record.color = assigned_color(i);
        }

        let by_extension = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.extension.clone(), i))
            .collect();
        Self {
            records,
            by_extension,
        }
    }

    /// Look up the record for an extension (case-insensitive).
    pub fn lookup(&self, extension: &str) -> Option<&ExtensionRecord> {
        let key = if extension.chars().any(|c| c.is_ascii_uppercase()) {
            CompactString::from(extension.to_ascii_lowercase())
        } else {
            CompactString::from(extension)
        };
        self.by_extension.get(&key).map(|&i| &self.records[i])
    }

    /// Records in size-descending order.
    pub fn sorted(&self) -> &[ExtensionRecord] {
        &self.records
    }

    /// Cushion base color for an item, falling back to mid-grey for
    /// anything the index has no record for (directories, pseudo-items).
    pub fn color_for(&self, tree: &ItemTree, id: ItemId) -> Rgb {
        let item = tree.get(id);
        if item.kind == ItemKind::File {
            if let Some(record) = self.lookup(&item.extension()) {
                return record.color;
            }
        }
        Rgb(0x99, 0x99, 0x99)
    }
}

/// Color for the i-th extension in size order: palette hue re-balanced
/// to [`BASE_BRIGHTNESS`], darkened once per completed cycle.
fn assigned_color(i: usize) -> Rgb {
    let (r, g, b) = PALETTE[i % PALETTE.len()];
    let cycle = (i / PALETTE.len()) as i32;
    let darken = CYCLE_DARKEN.powi(cycle);
    with_brightness(Rgb(r, g, b), BASE_BRIGHTNESS * darken)
}

/// Scale a color to the target brightness, pushing per-channel overflow
/// beyond 255 into the remaining channels so the hue survives where
/// possible.
fn with_brightness(color: Rgb, target: f64) -> Rgb {
    let goal = (target * 255.0).min(3.0 * 255.0);
    let sum = color.0 as f64 + color.1 as f64 + color.2 as f64;
    if sum <= 0.0 {
        let v = (goal / 3.0).round() as u8;
        return Rgb(v, v, v);
    }

    let f = goal / sum;
    let mut ch = [color.0 as f64 * f, color.1 as f64 * f, color.2 as f64 * f];
    loop {
        let overflow: f64 = ch.iter().map(|c| (c - 255.0).max(0.0)).sum();
        for c in ch.iter_mut() {
            if *c > 255.0 {
                *c = 255.0;
            }
        }
        if overflow < 0.5 {
            break;
        }
        let open = ch.iter().filter(|c| **c < 255.0).count();
        if open == 0 {
            break;
        }
        let add = overflow / open as f64;
        for c in ch.iter_mut() {
            if *c < 255.0 {
                *c += add;
            }
        }
    }
    Rgb(
        ch[0].round() as u8,
        ch[1].round() as u8,
        ch[2].round() as u8,
    )
}
