//! The abstraction over a growing, possibly rotating log file that
//! yields complete lines.
//!
//! A `LineSource` wraps a single open file and the directory it lives
//! in. Each call to [`LineSource::next_line`] either returns the next
//! complete line or suspends — at end-of-file, at a rotation poll, or
//! at cancellation — exactly the three suspension points
//! It never emits a line until a `\n` terminates it: an EOF mid-line is
//! "wait and retry," not a premature emission.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::discovery::find_latest_log_file;
use crate::error::VrclogError;
use crate::safe_open::open_regular;

/// One line yielded by [`LineSource::next_line`], paired with the byte
/// offset in the *current* file immediately after the line's
/// terminator ("(offset, line) pairs").
#[derive(Debug, Clone, PartialEq)]
pub struct TailedLine {
    pub offset: u64,
    pub line: String,
    /// True the first time a line is yielded from a file other than
    /// the one the source started on — signals a rotation to the
    /// caller without the caller needing to track paths itself.
    pub rotated: bool,
}

/// Tails a single file within `dir`, transparently following rotation
/// and truncation.
pub struct LineSource {
    dir: PathBuf,
    path: PathBuf,
    file: File,
    position: u64,
    carry: Vec<u8>,
    poll_interval: Duration,
    just_rotated: bool,
}

fn strip_trailing_cr(bytes: &[u8]) -> &[u8] {
    match bytes.last() {
        Some(b'\r') => &bytes[..bytes.len() - 1],
        _ => bytes,
    }
}

impl LineSource {
    /// Opens `path` (which must live inside `dir`) for tailing,
    /// starting at `start_offset` bytes in.
    pub fn open(dir: &Path, path: PathBuf, start_offset: u64, poll_interval: Duration) -> Result<Self, VrclogError> {
        let (mut file, _meta) = open_regular(&path)?;
        file.seek(SeekFrom::Start(start_offset))
            .map_err(|e| VrclogError::io("seek", &path, e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            path,
            file,
            position: start_offset,
            carry: Vec::new(),
            poll_interval,
            just_rotated: false,
        })
    }

    pub fn current_path(&self) -> &Path {
        &self.path
    }

    /// Pulls any complete line(s) already sitting in `self.carry` into
    /// `self.position`'s yield, returning the oldest one.
    fn take_buffered_line(&mut self) -> Option<Vec<u8>> {
        let newline_pos = self.carry.iter().position(|&b| b == b'\n')?;
        let mut line = self.carry.split_off(newline_pos + 1);
        std::mem::swap(&mut line, &mut self.carry);
        // `line` now holds everything through the `\n`; drop the
        // terminator itself.
        line.pop();
        Some(line)
    }

    fn file_len(&self) -> Result<u64, VrclogError> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| VrclogError::io("fstat", &self.path, e))
    }

    fn read_available(&mut self) -> Result<usize, VrclogError> {
        let mut buf = [0u8; 64 * 1024];
        self.file
            .seek(SeekFrom::Start(self.position + self.carry.len() as u64))
            .map_err(|e| VrclogError::io("seek", &self.path, e))?;
        let n = self
            .file
            .read(&mut buf)
            .map_err(|e| VrclogError::io("read", &self.path, e))?;
        if n > 0 {
            self.carry.extend_from_slice(&buf[..n]);
        }
        Ok(n)
    }

    fn switch_to(&mut self, new_path: PathBuf) -> Result<(), VrclogError> {
        let (file, _meta) = open_regular(&new_path)?;
        self.path = new_path;
        self.file = file;
        self.position = 0;
        // A partial trailing line in the old file at rotation time has
        // ambiguous semantics by design (open questions) — it is
        // discarded rather than carried across files.
        self.carry.clear();
        self.just_rotated = true;
        Ok(())
    }

    /// Returns the next complete line, suspending at EOF, at each
    /// rotation poll, or returning [`VrclogError::Cancelled`] if `ctx`
    /// is cancelled while waiting.
    pub async fn next_line(&mut self, ctx: &CancellationToken) -> Result<TailedLine, VrclogError> {
        loop {
            if ctx.is_cancelled() {
                return Err(VrclogError::Cancelled);
            }

            if let Some(raw) = self.take_buffered_line() {
                self.position += raw.len() as u64 + 1;
                let rotated = std::mem::take(&mut self.just_rotated);
                let line = String::from_utf8_lossy(strip_trailing_cr(&raw)).into_owned();
                return Ok(TailedLine {
                    offset: self.position,
                    line,
                    rotated,
                });
            }

            let current_len = self.file_len()?;
            if current_len < self.position {
                // Truncation: the producer replaced the file's content
                // in place. Restart from the beginning rather than
                // seeking past data that no longer exists.
                self.position = 0;
                self.carry.clear();
                continue;
            }

            if self.read_available()? > 0 {
                continue;
            }

            // At EOF for the current file. Check whether the producer
            // has rotated to a newer file before waiting.
            match find_latest_log_file(&self.dir) {
                Ok(latest) if latest != self.path => {
                    self.switch_to(latest)?;
                    continue;
                }
                _ => {}
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = ctx.cancelled() => return Err(VrclogError::Cancelled),
            }
        }
    }
}
