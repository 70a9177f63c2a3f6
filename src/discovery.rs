//! Log directory and latest-log-file discovery.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::VrclogError;
use crate::safe_open::open_regular;

/// Environment variable that overrides auto-discovery.
pub const LOGDIR_ENV_VAR: &str = "VRCLOG_LOGDIR";

const LOG_FILE_PREFIX: &str = "output_log_";
const LOG_FILE_SUFFIX: &str = ".txt";

/// True iff `name` matches the `output_log_*.txt` glob.
fn matches_log_filename(name: &str) -> bool {
    name.starts_with(LOG_FILE_PREFIX) && name.ends_with(LOG_FILE_SUFFIX) && name.len() > LOG_FILE_PREFIX.len() + LOG_FILE_SUFFIX.len()
}

/// OS-specific candidate directories, checked in order after the
/// explicit argument and environment variable. On the target
/// platform (Windows, via `LocalLow`) this is `%LOCALAPPDATA%\..\LocalLow\VRChat\VRChat`
/// and its lowercase variant; on other platforms we fall back to
/// `$HOME`-relative equivalents so discovery degrades gracefully in
/// development and CI rather than panicking on an unsupported OS.
fn platform_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    let base = std::env::var_os("LOCALAPPDATA")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("USERPROFILE").map(PathBuf::from));

    if let Some(base) = base {
        // LOCALAPPDATA is typically `...\AppData\Local`; LocalLow is a
        // sibling of Local under AppData.
        let applocal_parent = base.parent().map(Path::to_path_buf).unwrap_or_else(|| base.clone());
        candidates.push(applocal_parent.join("LocalLow").join("VRChat").join("VRChat"));
        candidates.push(applocal_parent.join("locallow").join("VRChat").join("VRChat"));
    }

    candidates
}

/// A directory is "valid" iff it resolves (symlinks fully followed,
/// with resolution failure treated as invalid rather than falling back
/// to the unresolved path) and contains at least one file matching
/// `output_log_*.txt`.
fn is_valid_log_dir(path: &Path) -> bool {
    let Ok(resolved) = std::fs::canonicalize(path) else {
        return false;
    };
    let Ok(meta) = std::fs::metadata(&resolved) else {
        return false;
    };
    if !meta.is_dir() {
        return false;
    }
    directory_has_log_file(&resolved)
}

fn directory_has_log_file(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.flatten() {
        if let Some(name) = entry.file_name().to_str() {
            if matches_log_filename(name) {
                return true;
            }
        }
    }
    false
}

/// Resolves the log directory, trying in order: `explicit`, the
/// `VRCLOG_LOGDIR` environment variable, then the OS-specific candidate
/// list. Each candidate is fully symlink-resolved; resolution failure
/// is treated as "not this one," never as a fallback to the unresolved
/// path (prevents dangling-symlink attacks).
pub fn resolve_log_dir(explicit: Option<&Path>) -> Result<PathBuf, VrclogError> {
    let mut searched = Vec::new();

    if let Some(dir) = explicit {
        searched.push(dir.to_path_buf());
        if is_valid_log_dir(dir) {
            return Ok(std::fs::canonicalize(dir).map_err(|e| VrclogError::io("canonicalize", dir, e))?);
        }
    }

    if let Ok(env_dir) = std::env::var(LOGDIR_ENV_VAR) {
        let path = PathBuf::from(env_dir);
        searched.push(path.clone());
        if is_valid_log_dir(&path) {
            return Ok(std::fs::canonicalize(&path).map_err(|e| VrclogError::io("canonicalize", &path, e))?);
        }
    }

    for candidate in platform_candidates() {
        searched.push(candidate.clone());
        if is_valid_log_dir(&candidate) {
            return Ok(std::fs::canonicalize(&candidate)
                .map_err(|e| VrclogError::io("canonicalize", &candidate, e))?);
        }
    }

    Err(VrclogError::LogDirNotFound { searched })
}

/// One candidate log file, stat'd exactly once into `(path, mtime)` so
/// a sort comparator never has to re-stat a file that may have been
/// deleted between compares ("a real crash vector").
struct StampedFile {
    path: PathBuf,
    modified_nanos: i128,
}

fn modified_nanos(meta: &Metadata) -> i128 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i128)
        .unwrap_or(0)
}

/// Lists every `output_log_*.txt` file in `dir`, stat'd once each,
/// non-regular files filtered out, sorted by modification time
/// ascending (chronological order under the producer's naming — shared
/// by directory discovery's "find latest" and the batch parser's
/// directory merge).
pub fn list_log_files_chronological(dir: &Path) -> Result<Vec<PathBuf>, VrclogError> {
    let entries = std::fs::read_dir(dir).map_err(|e| VrclogError::io("readdir", dir, e))?;

    let mut stamped = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| VrclogError::io("readdir", dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !matches_log_filename(name) {
            continue;
        }

        let path = entry.path();
        // Stat once via symlink_metadata so a non-regular entry (a
        // broken symlink, a fifo dropped into the log dir) is filtered
        // here rather than crashing a later open.
        let Ok(link_meta) = std::fs::symlink_metadata(&path) else {
            continue;
        };
        if !link_meta.is_file() {
            continue;
        }
        let Ok(meta) = std::fs::metadata(&path) else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }

        stamped.push(StampedFile {
            path,
            modified_nanos: modified_nanos(&meta),
        });
    }

    stamped.sort_by_key(|f| f.modified_nanos);
    Ok(stamped.into_iter().map(|f| f.path).collect())
}

/// Finds the most recently modified `output_log_*.txt` in `dir`.
/// Returns [`VrclogError::NoLogFiles`] if none exist.
pub fn find_latest_log_file(dir: &Path) -> Result<PathBuf, VrclogError> {
    let mut files = list_log_files_chronological(dir)?;
    files.pop().ok_or(VrclogError::NoLogFiles)
}

/// Opens the latest log file in `dir` through the safe-open contract
///, returning both the path and the open handle.
pub fn open_latest_log_file(dir: &Path) -> Result<(PathBuf, std::fs::File), VrclogError> {
    let path = find_latest_log_file(dir)?;
    let (file, _meta) = open_regular(&path)?;
    Ok((path, file))
}
