//! Reverse chunked reader reconstructing the last *N* non-empty lines
//! of a file without reading it end to end.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use crate::error::VrclogError;

/// Size of each backward read. Fixed
const CHUNK_SIZE: u64 = 4096;

/// Budgets and target count for [`scan_last_lines`].
#[derive(Debug, Clone, Copy)]
pub struct BackwardScanOptions {
    pub max_lines: usize,
    pub max_total_bytes: u64,
    pub max_line_bytes: usize,
}

impl Default for BackwardScanOptions {
    fn default() -> Self {
        Self {
            max_lines: 10_000,
            max_total_bytes: 10 * 1024 * 1024,
            max_line_bytes: 512 * 1024,
        }
    }
}

/// Strip a single trailing `\r`, matching the CRLF tolerance the live
/// tailer applies.
fn strip_trailing_cr(bytes: &[u8]) -> &[u8] {
    match bytes.last() {
        Some(b'\r') => &bytes[..bytes.len() - 1],
        _ => bytes,
    }
}

/// Reconstructs the last `opts.max_lines` non-empty lines of `file`, in
/// forward (chronological) order, reading at most `opts.max_total_bytes`
/// bytes of file content and never letting a single in-progress line
/// exceed `opts.max_line_bytes`.
///
/// On either budget being exceeded, returns
/// [`VrclogError::ReplayLimitExceeded`] and discards whatever partial
/// result had been assembled.
pub fn scan_last_lines(file: &mut File, opts: &BackwardScanOptions) -> Result<Vec<String>, VrclogError> {
    if opts.max_lines == 0 {
        return Ok(Vec::new());
    }

    let file_len = file
        .seek(SeekFrom::End(0))
        .map_err(|e| VrclogError::io("seek", "<fd>", e))?;

    let mut lines: VecDeque<Vec<u8>> = VecDeque::new();
    // Bytes read so far that have not yet resolved into a complete
    // line — always a prefix of the eventual oldest-so-far line.
    let mut carry: Vec<u8> = Vec::new();
    let mut position = file_len;
    let mut total_read: u64 = 0;

    while position > 0 && lines.len() < opts.max_lines {
        let read_size = CHUNK_SIZE.min(position);
        let chunk_start = position - read_size;

        file.seek(SeekFrom::Start(chunk_start))
            .map_err(|e| VrclogError::io("seek", "<fd>", e))?;
        let mut chunk = vec![0u8; read_size as usize];
        file.read_exact(&mut chunk)
            .map_err(|e| VrclogError::io("read", "<fd>", e))?;

        total_read += read_size;
        if total_read > opts.max_total_bytes {
            return Err(VrclogError::ReplayLimitExceeded);
        }

        position = chunk_start;

        // `chunk` is older than everything in `carry`; file order is
        // chunk followed by carry.
        let mut buf = chunk;
        buf.extend_from_slice(&carry);

        let at_start_of_file = position == 0;
        let mut parts: Vec<Vec<u8>> = buf.split(|&b| b == b'\n').map(|s| s.to_vec()).collect();

        // The first fragment might continue into data we haven't read
        // yet; it only becomes a complete line once we've reached the
        // start of the file.
        let new_carry = if at_start_of_file {
            Vec::new()
        } else {
            parts.remove(0)
        };

        if new_carry.len() > opts.max_line_bytes {
            return Err(VrclogError::ReplayLimitExceeded);
        }
        carry = new_carry;

        for part in parts.into_iter().rev() {
            let trimmed = strip_trailing_cr(&part);
            if !trimmed.is_empty() {
                lines.push_front(trimmed.to_vec());
            }
        }
        while lines.len() > opts.max_lines {
            lines.pop_front();
        }
    }

    // At start of file, `carry` would already have been folded into a
    // complete line above (at_start_of_file clears it); nothing left
    // to flush here. If the loop exited early due to max_lines, any
    // remaining carry is simply an unreconstructed older prefix we
    // never needed.

    Ok(lines
        .into_iter()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_lines(path: &std::path::Path, lines: &[&str]) {
        let mut f = File::create(path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
    }

    #[test]
    fn returns_last_n_lines_in_forward_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        write_lines(&path, &["L1", "L2", "L3", "L4", "L5"]);

        let mut file = File::open(&path).unwrap();
        let opts = BackwardScanOptions {
            max_lines: 3,
            ..Default::default()
        };
        let lines = scan_last_lines(&mut file, &opts).unwrap();
        assert_eq!(lines, vec!["L3", "L4", "L5"]);
    }

    #[test]
    fn skips_empty_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        write_lines(&path, &["L1", "", "L2", "", "L3"]);

        let mut file = File::open(&path).unwrap();
        let opts = BackwardScanOptions {
            max_lines: 10,
            ..Default::default()
        };
        let lines = scan_last_lines(&mut file, &opts).unwrap();
        assert_eq!(lines, vec!["L1", "L2", "L3"]);
    }

    #[test]
    fn matches_forward_reader_for_small_chunk_boundaries() {
        // Exercise the carry-buffer invariant: lines whose length is a
        // multiple of, or straddles, the 4 KiB chunk boundary must
        // never be split or dropped.
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let long_line_a = "x".repeat(5000);
        let long_line_b = "y".repeat(9000);
        write_lines(&path, &[&long_line_a, &long_line_b, "short"]);

        let mut file = File::open(&path).unwrap();
        let opts = BackwardScanOptions {
            max_lines: 10,
            ..Default::default()
        };
        let lines = scan_last_lines(&mut file, &opts).unwrap();
        assert_eq!(lines, vec![long_line_a, long_line_b, "short".to_string()]);
    }

    #[test]
    fn exceeding_total_byte_budget_discards_partial_result() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let mut f = File::create(&path).unwrap();
        for i in 0..5000 {
            writeln!(f, "line number {i}").unwrap();
        }
        drop(f);

        let mut file = File::open(&path).unwrap();
        let opts = BackwardScanOptions {
            max_lines: 10,
            max_total_bytes: 100,
            max_line_bytes: 1024,
        };
        let err = scan_last_lines(&mut file, &opts).unwrap_err();
        assert!(matches!(err, VrclogError::ReplayLimitExceeded));
    }

    #[test]
    fn single_line_over_max_line_bytes_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let huge = "z".repeat(20_000);
        write_lines(&path, &[&huge]);

        let mut file = File::open(&path).unwrap();
        let opts = BackwardScanOptions {
            max_lines: 10,
            max_total_bytes: 10 * 1024 * 1024,
            max_line_bytes: 10_000,
        };
        let err = scan_last_lines(&mut file, &opts).unwrap_err();
        assert!(matches!(err, VrclogError::ReplayLimitExceeded));
    }

    #[test]
    fn empty_file_returns_no_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        File::create(&path).unwrap();

        let mut file = File::open(&path).unwrap();
        let lines = scan_last_lines(&mut file, &BackwardScanOptions::default()).unwrap();
        assert!(lines.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn carry_buffer_matches_forward_reader(
            lines in proptest::collection::vec("[a-zA-Z0-9 ]{0,50}", 0..40)
        ) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("log.txt");
            let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
            write_lines(&path, &refs);

            let mut file = File::open(&path).unwrap();
            let opts = BackwardScanOptions {
                max_lines: usize::MAX / 2,
                max_total_bytes: u64::MAX / 2,
                max_line_bytes: 1 << 20,
            };
            let scanned = scan_last_lines(&mut file, &opts).unwrap();

            let expected: Vec<String> = lines.into_iter().filter(|l| !l.is_empty()).collect();
            proptest::prop_assert_eq!(scanned, expected);
        }
    }
}
