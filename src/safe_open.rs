//! The only permitted way to open a path for reading in this crate
//!: link-stat, open, then stat-the-handle, rejecting
//! anything that isn't a regular file at both checks.

use std::fs::{File, Metadata};
use std::path::Path;

use crate::error::VrclogError;

/// Opens `path` for reading, refusing symlinks, FIFOs, devices,
/// sockets, and directories.
///
/// Two checks, not one:
/// 1. `symlink_metadata` (does not follow symlinks) — catches a
///    symlink pointing anywhere, before we ever call `open(2)` on it.
/// 2. `File::metadata()` on the already-open handle — narrows, but
///    does not eliminate, the TOCTOU window between check 1 and the
///    open call.
pub fn open_regular(path: &Path) -> Result<(File, Metadata), VrclogError> {
    let link_meta = std::fs::symlink_metadata(path)
        .map_err(|e| VrclogError::io("stat", path, e))?;
    if !link_meta.is_file() {
        return Err(VrclogError::NotRegularFile {
            path: path.to_path_buf(),
        });
    }

    let file = File::open(path).map_err(|e| VrclogError::io("open", path, e))?;

    let handle_meta = file.metadata().map_err(|e| VrclogError::io("fstat", path, e))?;
    if !handle_meta.is_file() {
        return Err(VrclogError::NotRegularFile {
            path: path.to_path_buf(),
        });
    }

    Ok((file, handle_meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn opens_a_regular_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "hello").unwrap();

        let (file, meta) = open_regular(&path).unwrap();
        assert!(meta.is_file());
        drop(file);
    }

    #[test]
    fn rejects_a_directory() {
        let dir = tempdir().unwrap();
        let err = open_regular(dir.path()).unwrap_err();
        assert!(matches!(err, VrclogError::NotRegularFile { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_a_symlink() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("real.txt");
        std::fs::write(&target, b"data").unwrap();
        let link = dir.path().join("link.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let err = open_regular(&link).unwrap_err();
        assert!(matches!(err, VrclogError::NotRegularFile { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_a_fifo() {
        use std::ffi::CString;

        let dir = tempdir().unwrap();
        let path = dir.path().join("pipe");
        let c_path = CString::new(path.to_str().unwrap()).unwrap();
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
        if rc != 0 {
            // mkfifo unavailable in this sandbox; skip rather than fail spuriously.
            return;
        }

        let err = open_regular(&path).unwrap_err();
        assert!(matches!(err, VrclogError::NotRegularFile { .. }));
    }
}
