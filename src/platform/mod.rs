/// Platform layer — file identity, allocated size, attributes, owner,
/// and volume information.
///
/// Everything the enumerator needs from the OS beyond `std::fs` lives
/// here behind small cfg-gated functions, so `scanner` and `model` stay
/// platform-neutral.

use std::fs::Metadata;
use std::path::Path;

use compact_str::CompactString;

/// Identity of a file on disk: (volume id, file id).
///
/// Two directory entries with the same `FileId` are hardlinks to one
/// physical file and must be accounted to physical size exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    pub volume: u64,
    pub file: u64,
}

/// Resolve the file identity from metadata, if the platform exposes one.
#[cfg(unix)]
pub fn file_identity(meta: &Metadata) -> Option<FileId> {
    use std::os::unix::fs::MetadataExt;
    Some(FileId {
        volume: meta.dev(),
        file: meta.ino(),
    })
}

/// Stable file ids are not available through std on this platform; the
/// scanner then treats every entry as unique (no hardlink dedup).
#[cfg(not(unix))]
pub fn file_identity(_meta: &Metadata) -> Option<FileId> {
    None
}

/// The volume id a path's metadata belongs to. Used to detect mount-point
/// crossings and to shard scan queues per volume.
#[cfg(unix)]
pub fn volume_of(meta: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.dev()
}

#[cfg(not(unix))]
pub fn volume_of(_meta: &Metadata) -> u64 {
    0
}

/// Number of directory entries referring to this file.
#[cfg(unix)]
pub fn link_count(meta: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.nlink()
}

#[cfg(not(unix))]
pub fn link_count(_meta: &Metadata) -> u64 {
    1
}

/// On-disk allocated size for a file.
///
/// Unix reports 512-byte allocation blocks; elsewhere the logical size is
/// rounded up to the 512-byte boundary as an approximation.
#[cfg(unix)]
pub fn physical_size(meta: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.blocks() * 512
}

#[cfg(not(unix))]
pub fn physical_size(meta: &Metadata) -> u64 {
    meta.len().div_ceil(512) * 512
}

/// OS attribute bitmask as stored in results files (`0x%08X`).
///
/// On Windows these are the FILE_ATTRIBUTE_* bits; on Unix the low 16
/// bits of the mode word (type + permissions) fill the same role.
#[cfg(unix)]
pub fn attributes(meta: &Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(windows)]
pub fn attributes(meta: &Metadata) -> u32 {
    use std::os::windows::fs::MetadataExt;
    meta.file_attributes()
}

#[cfg(not(any(unix, windows)))]
pub fn attributes(_meta: &Metadata) -> u32 {
    0
}

/// Owning user of a file, if resolvable cheaply.
#[cfg(unix)]
pub fn owner(meta: &Metadata) -> Option<CompactString> {
    use std::os::unix::fs::MetadataExt;
    Some(CompactString::from(format!("uid:{}", meta.uid())))
}

#[cfg(not(unix))]
pub fn owner(_meta: &Metadata) -> Option<CompactString> {
    None
}

/// Capacity and free space of the volume containing `path`.
#[derive(Debug, Clone, Copy)]
pub struct VolumeInfo {
    pub capacity: u64,
    pub free: u64,
}

/// Query volume capacity/free space via `statvfs`.
#[cfg(unix)]
pub fn volume_info(path: &Path) -> Option<VolumeInfo> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let path_c = CString::new(path.as_os_str().as_bytes()).ok()?;
    // SAFETY: statvfs writes into the zeroed struct on success only.
    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(path_c.as_ptr(), &mut stat) != 0 {
            return None;
        }
        let block = stat.f_frsize as u64;
        Some(VolumeInfo {
            capacity: (stat.f_blocks as u64) * block,
            free: (stat.f_bfree as u64) * block,
        })
    }
}

#[cfg(not(unix))]
pub fn volume_info(_path: &Path) -> Option<VolumeInfo> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn identity_distinguishes_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"x").unwrap();
        fs::write(&b, b"y").unwrap();

        let ia = file_identity(&fs::metadata(&a).unwrap());
        let ib = file_identity(&fs::metadata(&b).unwrap());
        if let (Some(ia), Some(ib)) = (ia, ib) {
            assert_ne!(ia, ib, "distinct files must have distinct ids");
            assert_eq!(ia.volume, ib.volume, "same tempdir, same volume");
        }
    }

    #[cfg(unix)]
    #[test]
    fn hardlinks_share_identity() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"content").unwrap();
        fs::hard_link(&a, &b).unwrap();

        let ia = file_identity(&fs::metadata(&a).unwrap()).unwrap();
        let ib = file_identity(&fs::metadata(&b).unwrap()).unwrap();
        assert_eq!(ia, ib);
        assert_eq!(link_count(&fs::metadata(&a).unwrap()), 2);
    }

    #[test]
    fn physical_size_covers_logical() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("f");
        fs::write(&f, vec![0u8; 100]).unwrap();
        let meta = fs::metadata(&f).unwrap();
        // Allocation is cluster-rounded, so it is at least the data length
        // on any non-compressing filesystem (sparse files aside).
        assert_eq!(physical_size(&meta) % 512, 0);
    }

    #[cfg(unix)]
    #[test]
    fn volume_info_reports_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let info = volume_info(dir.path()).expect("statvfs on tempdir");
        assert!(info.capacity > 0);
        assert!(info.free <= info.capacity);
    }
}
