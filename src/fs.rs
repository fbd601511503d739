//! Filesystem primitives: directory fsync, preallocation, atomic replace.
//!
//! Everything that makes durability claims in this crate funnels through
//! these helpers so the fsync discipline lives in one place.

use std::fs::File;
use std::io;
use std::path::Path;

/// Fsync a directory so that entry creations, deletions, and renames inside
/// it are durable.
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    let f = File::open(dir)?;
    f.sync_all()
}

/// Grow `file` to `size` bytes of zeros if it is currently smaller.
///
/// Appends into the preallocated region then never extend the file, so the
/// per-append fsync does not have to write file metadata.
pub(crate) fn preallocate(file: &File, size: u64) -> io::Result<()> {
    let len = file.metadata()?.len();
    if len < size {
        file.set_len(size)?;
    }
    Ok(())
}

/// Atomically replace `dst` with `tmp` and make the swap durable.
///
/// `tmp` must already be written and fsynced by the caller.
pub(crate) fn atomic_replace(tmp: &Path, dst: &Path) -> io::Result<()> {
    std::fs::rename(tmp, dst)?;
    match dst.parent() {
        Some(parent) => sync_dir(parent),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_preallocate_grows_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"header").unwrap();

        preallocate(&file, 4096).unwrap();
        assert_eq!(file.metadata().unwrap().len(), 4096);

        // A second call with a smaller size must not shrink the file.
        preallocate(&file, 1024).unwrap();
        assert_eq!(file.metadata().unwrap().len(), 4096);
    }

    #[test]
    fn test_preallocated_region_is_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg");
        let file = File::create(&path).unwrap();
        preallocate(&file, 64).unwrap();
        drop(file);

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(raw, vec![0u8; 64]);
    }

    #[test]
    fn test_atomic_replace() {
        let dir = tempdir().unwrap();
        let tmp = dir.path().join("state.tmp");
        let dst = dir.path().join("state");

        std::fs::write(&dst, b"old").unwrap();
        std::fs::write(&tmp, b"new").unwrap();
        atomic_replace(&tmp, &dst).unwrap();

        assert_eq!(std::fs::read(&dst).unwrap(), b"new");
        assert!(!tmp.exists());
    }
}
