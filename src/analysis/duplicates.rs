/// Duplicate file detection (size-first, then partial hash, then full hash).
///
/// Built lazily on request, never maintained during a scan:
/// 1. Group files by logical size — unique sizes cannot be duplicates.
/// 2. For size-matching groups, hash the first 4 KiB to eliminate most
///    false positives cheaply.
/// 3. Hash the full content of whatever still collides.
///
/// Hashing is I/O-bound and runs the size groups in parallel. Files that
/// disappear or turn unreadable between scan and hashing are silently
/// dropped from their group — a stale candidate is not a duplicate we
/// can prove.
use crate::model::{ItemId, ItemKind, ItemTree};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use tracing::debug;

/// Bytes hashed in the screening pass.
const PARTIAL_HASH_LEN: usize = 4096;

/// A group of files with identical content.
#[derive(Debug)]
pub struct DuplicateGroup {
    /// Size of each file in the group.
    pub size: u64,
    /// Full-content digest shared by the group.
    pub hash: [u8; 32],
    /// All members, in tree order.
    pub items: Vec<ItemId>,
}

impl DuplicateGroup {
    /// Bytes that deleting all but one copy would reclaim.
    pub fn wasted_bytes(&self) -> u64 {
        self.size * (self.items.len() as u64 - 1)
    }
}

/// Find duplicate files in the tree, largest waste first.
pub fn find_duplicates(tree: &ItemTree) -> Vec<DuplicateGroup> {
    let Some(root) = tree.root() else {
        return Vec::new();
    };

    // Phase 1: size buckets.
    let mut by_size: HashMap<u64, Vec<(ItemId, PathBuf)>> = HashMap::new();
    tree.walk(root, |id, item| {
        if item.kind == ItemKind::File && item.size_logical > 0 && !item.is_protected() {
            by_size
                .entry(item.size_logical)
                .or_default()
                .push((id, PathBuf::from(tree.full_path(id))));
        }
    });
    let candidates: Vec<(u64, Vec<(ItemId, PathBuf)>)> = by_size
        .into_iter()
        .filter(|(_, entries)| entries.len() > 1)
        .collect();
    debug!(groups = candidates.len(), "duplicate candidate size groups");

    // Phases 2 and 3, one size group at a time.
    let mut groups: Vec<DuplicateGroup> = candidates
        .par_iter()
        .map(|(size, entries)| resolve_size_group(*size, entries))
        .reduce(Vec::new, |mut acc, mut part| {
            acc.append(&mut part);
            acc
        });

    groups.sort_by(|a, b| {
        b.wasted_bytes()
            .cmp(&a.wasted_bytes())
            .then_with(|| a.hash.cmp(&b.hash))
    });
    groups
}

/// Screen one size bucket with partial hashes, then confirm with full
/// hashes.
fn resolve_size_group(size: u64, entries: &[(ItemId, PathBuf)]) -> Vec<DuplicateGroup> {
    let mut by_partial: HashMap<[u8; 32], Vec<&(ItemId, PathBuf)>> = HashMap::new();
    for entry in entries {
        if let Ok(digest) = partial_hash(&entry.1) {
            by_partial.entry(digest).or_default().push(entry);
        }
    }

    let mut groups = Vec::new();
    for (partial, matched) in by_partial {
        if matched.len() < 2 {
            continue;
        }
        if size as usize <= PARTIAL_HASH_LEN {
            // The screening hash already covered the whole file.
            groups.push(DuplicateGroup {
                size,
                hash: partial,
                items: matched.iter().map(|e| e.0).collect(),
            });
            continue;
        }
        let mut by_full: HashMap<[u8; 32], Vec<ItemId>> = HashMap::new();
        for entry in matched {
            if let Ok(digest) = full_hash(&entry.1) {
                by_full.entry(digest).or_default().push(entry.0);
            }
        }
        for (hash, items) in by_full {
            if items.len() > 1 {
                groups.push(DuplicateGroup { size, hash, items });
            }
        }
    }
    groups
}

fn partial_hash(path: &std::path::Path) -> io::Result<[u8; 32]> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; PARTIAL_HASH_LEN];
    let mut hasher = Sha256::new();
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    hasher.update(&buf[..filled]);
    Ok(hasher.finalize().into())
}

fn full_hash(path: &std::path::Path) -> io::Result<[u8; 32]> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Item;
    use compact_str::CompactString;
    use std::fs;

    /// Build a tree whose root name is the tempdir path, so
    /// `full_path` resolves to real on-disk files.
    fn tree_over(dir: &std::path::Path, files: &[(&str, &[u8])]) -> ItemTree {
        let mut tree = ItemTree::with_capacity(files.len() + 1);
        let root = tree.set_root(Item::new_directory(
            CompactString::from(dir.to_string_lossy().as_ref()),
            None,
        ));
        for (name, content) in files {
            fs::write(dir.join(name), content).unwrap();
            tree.add_child(
                root,
                Item::new_file(
                    CompactString::new(*name),
                    content.len() as u64,
                    content.len() as u64,
                    0,
                    0,
                    None,
                ),
            );
        }
        tree
    }

    #[test]
    fn identical_files_group_together() {
        let tmp = tempfile::tempdir().unwrap();
        let tree = tree_over(
            tmp.path(),
            &[
                ("a.bin", b"same content".as_slice()),
                ("b.bin", b"same content".as_slice()),
                ("c.bin", b"different!!!".as_slice()),
            ],
        );
        let groups = find_duplicates(&tree);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].items.len(), 2);
        assert_eq!(groups[0].size, 12);
        assert_eq!(groups[0].wasted_bytes(), 12);
    }

    #[test]
    fn same_size_different_content_is_not_a_duplicate() {
        let tmp = tempfile::tempdir().unwrap();
        let tree = tree_over(
            tmp.path(),
            &[
                ("a.bin", b"aaaaaaaa".as_slice()),
                ("b.bin", b"bbbbbbbb".as_slice()),
            ],
        );
        assert!(find_duplicates(&tree).is_empty());
    }

    #[test]
    fn large_files_reach_the_full_hash_phase() {
        let tmp = tempfile::tempdir().unwrap();
        // Same first 4 KiB, divergent tails: the screening pass must not
        // call these duplicates.
        let mut same_head_a = vec![0xABu8; PARTIAL_HASH_LEN + 64];
        let mut same_head_b = same_head_a.clone();
        same_head_a.extend_from_slice(b"tail-a");
        same_head_b.extend_from_slice(b"tail-b");
        let dup = vec![0xCDu8; PARTIAL_HASH_LEN + 70];

        let tree = tree_over(
            tmp.path(),
            &[
                ("head_a.dat", same_head_a.as_slice()),
                ("head_b.dat", same_head_b.as_slice()),
                ("dup1.dat", dup.as_slice()),
                ("dup2.dat", dup.as_slice()),
            ],
        );
        let groups = find_duplicates(&tree);
        assert_eq!(groups.len(), 1, "only the truly identical pair survives");
        assert_eq!(groups[0].size, dup.len() as u64);
    }

    #[test]
    fn empty_and_singleton_trees() {
        let tree = ItemTree::with_capacity(0);
        assert!(find_duplicates(&tree).is_empty());

        let tmp = tempfile::tempdir().unwrap();
        let tree = tree_over(tmp.path(), &[("only.bin", b"alone".as_slice())]);
        assert!(find_duplicates(&tree).is_empty());
    }
}
