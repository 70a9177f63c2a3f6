//! Offline batch parsing: iterate a single file or a
//! whole log directory, reusing the same parser, filter, and line
//! budget as the live watcher, without ever following a file past its
//! current end.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ParseOptions;
use crate::discovery::list_log_files_chronological;
use crate::error::VrclogError;
use crate::event::Event;
use crate::filter::EventFilter;
use crate::parser::builtin::sanitize_line;
use crate::parser::Parser;
use crate::safe_open::open_regular;

/// One item out of a batch sequence: either a surviving event or a
/// non-fatal error tied to the line (or file) that produced it.
///
/// Unlike [`Parser::parse_line`]'s `(ParseResult, Option<error>)` pair,
/// a batch consumer pulls one item at a time, so a single input line
/// that both matches and errors yields two items in sequence rather
/// than one compound value.
#[derive(Debug)]
pub enum BatchItem {
    Event(Event),
    Error(VrclogError),
}

fn build_filter(opts: &ParseOptions) -> EventFilter {
    let mut filter = EventFilter::new(opts.include_kinds.clone(), opts.exclude_kinds.clone());
    if let Some(since) = opts.since {
        filter = filter.with_since(since);
    }
    if let Some(until) = opts.until {
        filter = filter.with_until(until);
    }
    filter
}

/// A lazy pull sequence over one file's lines.
///
/// `Iterator::next` does the actual line read and parse, so nothing
/// beyond the first requested item is ever read into memory at once.
pub struct FileParser<R> {
    reader: R,
    path: PathBuf,
    ctx: CancellationToken,
    parser: Arc<dyn Parser>,
    filter: EventFilter,
    stop_on_error: bool,
    include_raw_line: bool,
    max_line_bytes: usize,
    line_number: u64,
    pending: VecDeque<BatchItem>,
    finished: bool,
    past_until: bool,
}

impl<R: BufRead> FileParser<R> {
    /// True once this file stopped early because an event past the
    /// configured `until` bound was reached, as opposed to reaching
    /// its own end-of-file normally. [`DirParser`] uses this to decide
    /// whether to keep opening subsequent files.
    pub fn stopped_at_until(&self) -> bool {
        self.past_until
    }
}

impl<R: BufRead> Iterator for FileParser<R> {
    type Item = BatchItem;

    fn next(&mut self) -> Option<BatchItem> {
        loop {
            if self.finished {
                return None;
            }

            if let Some(item) = self.pending.pop_front() {
                if matches!(item, BatchItem::Error(_)) && self.stop_on_error {
                    self.finished = true;
                }
                return Some(item);
            }

            if self.ctx.is_cancelled() {
                self.finished = true;
                return Some(BatchItem::Error(VrclogError::Cancelled));
            }

            // `read_until` rather than `read_line`: the latter is
            // UTF-8-strict and would abort the whole file on a single
            // invalid byte, diverging from the live tailer's lossy
            // handling.
            let mut raw: Vec<u8> = Vec::new();
            let n = match self.reader.read_until(b'\n', &mut raw) {
                Ok(n) => n,
                Err(e) => {
                    self.finished = true;
                    return Some(BatchItem::Error(VrclogError::io("read", &self.path, e)));
                }
            };
            if n == 0 {
                self.finished = true;
                return None;
            }
            self.line_number += 1;

            let mut bytes: &[u8] = &raw;
            if bytes.last() == Some(&b'\n') {
                bytes = &bytes[..bytes.len() - 1];
            }
            if bytes.last() == Some(&b'\r') {
                bytes = &bytes[..bytes.len() - 1];
            }
            let line = sanitize_line(bytes);

            if line.len() > self.max_line_bytes {
                let item = BatchItem::Error(VrclogError::LineTooLong {
                    line_number: self.line_number,
                    length: line.len(),
                    max: self.max_line_bytes,
                });
                if self.stop_on_error {
                    self.finished = true;
                }
                return Some(item);
            }

            let (result, err) = self.parser.parse_line(&self.ctx, &line);

            let mut hit_until = false;
            for mut event in result.events {
                if self.filter.is_past_until(&event) {
                    hit_until = true;
                    break;
                }
                if !self.filter.allows(&event) {
                    continue;
                }
                if self.include_raw_line {
                    event.raw_line = Some(line.to_string());
                }
                self.pending.push_back(BatchItem::Event(event));
            }

            if let Some(e) = err {
                self.pending.push_back(BatchItem::Error(VrclogError::ParseError {
                    line: self.line_number,
                    underlying: e.to_string(),
                }));
            }

            if hit_until {
                self.past_until = true;
                if self.pending.is_empty() {
                    self.finished = true;
                    return None;
                }
                // Drain what's already queued (events from before the
                // cutoff) before the top-of-loop check on `finished`
                // ends the sequence for good.
                let item = self.pending.pop_front().unwrap();
                self.finished = self.pending.is_empty();
                if matches!(item, BatchItem::Error(_)) && self.stop_on_error {
                    self.finished = true;
                }
                return Some(item);
            }
        }
    }
}

fn build_file_parser(
    ctx: CancellationToken,
    path: &Path,
    parser: Arc<dyn Parser>,
    filter: EventFilter,
    opts: &ParseOptions,
) -> Result<FileParser<BufReader<File>>, VrclogError> {
    let (file, _meta) = open_regular(path)?;
    Ok(FileParser {
        reader: BufReader::new(file),
        path: path.to_path_buf(),
        ctx,
        parser,
        filter,
        stop_on_error: opts.stop_on_error,
        include_raw_line: opts.include_raw_line,
        max_line_bytes: opts.max_line_bytes,
        line_number: 0,
        pending: VecDeque::new(),
        finished: false,
        past_until: false,
    })
}

/// Opens `path` and returns a lazy sequence over its lines.
pub fn parse_file(
    ctx: CancellationToken,
    path: impl AsRef<Path>,
    opts: &ParseOptions,
) -> Result<FileParser<BufReader<File>>, VrclogError> {
    let parser = opts.resolve_parser();
    let filter = build_filter(opts);
    build_file_parser(ctx, path.as_ref(), parser, filter, opts)
}

/// Convenience over [`parse_file`] for files small enough to hold
/// entirely in memory: collects the whole sequence eagerly.
pub fn parse_file_all(
    ctx: CancellationToken,
    path: impl AsRef<Path>,
    opts: &ParseOptions,
) -> Result<Vec<BatchItem>, VrclogError> {
    Ok(parse_file(ctx, path, opts)?.collect())
}

/// A lazy pull sequence over every file in a directory (or an
/// explicit file list), in chronological order, with a `stop-on-error`
/// boundary and an `until` cutoff that span the whole sequence rather
/// than resetting per file.
pub struct DirParser {
    ctx: CancellationToken,
    opts: ParseOptions,
    parser: Arc<dyn Parser>,
    filter: EventFilter,
    files: VecDeque<PathBuf>,
    current: Option<FileParser<BufReader<File>>>,
    finished: bool,
}

impl Iterator for DirParser {
    type Item = BatchItem;

    fn next(&mut self) -> Option<BatchItem> {
        loop {
            if self.finished {
                return None;
            }

            if self.ctx.is_cancelled() {
                self.finished = true;
                return Some(BatchItem::Error(VrclogError::Cancelled));
            }

            if let Some(cur) = &mut self.current {
                match cur.next() {
                    Some(item) => {
                        if self.opts.stop_on_error && matches!(item, BatchItem::Error(_)) {
                            self.finished = true;
                        }
                        return Some(item);
                    }
                    None => {
                        let stopped_at_until = cur.stopped_at_until();
                        self.current = None;
                        if stopped_at_until {
                            self.finished = true;
                        }
                        continue;
                    }
                }
            }

            let Some(path) = self.files.pop_front() else {
                self.finished = true;
                return None;
            };

            match build_file_parser(self.ctx.clone(), &path, self.parser.clone(), self.filter.clone(), &self.opts) {
                Ok(fp) => self.current = Some(fp),
                Err(e) => {
                    if self.opts.stop_on_error {
                        self.finished = true;
                    }
                    return Some(BatchItem::Error(e));
                }
            }
        }
    }
}

/// Iterates `files` if given, else every `output_log_*.txt` file
/// discovered in `dir`, merged in file-modification-time order.
pub fn parse_dir(
    ctx: CancellationToken,
    dir: impl AsRef<Path>,
    files: Option<Vec<PathBuf>>,
    opts: ParseOptions,
) -> Result<DirParser, VrclogError> {
    let files = match files {
        Some(f) => f,
        None => list_log_files_chronological(dir.as_ref())?,
    };
    let parser = opts.resolve_parser();
    let filter = build_filter(&opts);
    Ok(DirParser {
        ctx,
        opts,
        parser,
        filter,
        files: files.into(),
        current: None,
        finished: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::kinds;
    use chrono::NaiveDateTime;
    use std::io::Write;
    use tempfile::tempdir;

    fn touch(path: &Path, contents: &str) {
        let mut f = File::create(path).unwrap();
        write!(f, "{contents}").unwrap();
    }

    fn join_line(ts: &str, name: &str) -> String {
        format!("{ts} Log        -  [Behaviour] OnPlayerJoined {name}\n")
    }

    fn leave_line(ts: &str, name: &str) -> String {
        format!("{ts} Log        -  [Behaviour] OnPlayerLeft {name}\n")
    }

    #[test]
    fn parse_file_yields_events_in_source_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("output_log_2024-01-01.txt");
        let contents = format!(
            "{}{}",
            join_line("2024.01.15 12:00:00", "Alice"),
            leave_line("2024.01.15 12:00:05", "Alice"),
        );
        touch(&path, &contents);

        let opts = ParseOptions::new();
        let items: Vec<_> = parse_file(CancellationToken::new(), &path, &opts).unwrap().collect();

        assert_eq!(items.len(), 2);
        let BatchItem::Event(first) = &items[0] else { panic!("expected event") };
        assert_eq!(first.kind, kinds::PLAYER_JOIN);
        let BatchItem::Event(second) = &items[1] else { panic!("expected event") };
        assert_eq!(second.kind, kinds::PLAYER_LEFT);
    }

    #[test]
    fn stop_on_error_halts_after_first_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("output_log_2024-01-01.txt");
        let long_line = "A".repeat(10);
        touch(&path, &format!("{long_line}\n{}", join_line("2024.01.15 12:00:00", "Alice")));

        let opts = ParseOptions::new().with_stop_on_error(true).with_max_line_bytes(5);
        let items: Vec<_> = parse_file(CancellationToken::new(), &path, &opts).unwrap().collect();

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], BatchItem::Error(VrclogError::LineTooLong { .. })));
    }

    #[test]
    fn default_continues_past_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("output_log_2024-01-01.txt");
        let long_line = "A".repeat(10);
        touch(&path, &format!("{long_line}\n{}", join_line("2024.01.15 12:00:00", "Alice")));

        let opts = ParseOptions::new().with_max_line_bytes(5);
        let items: Vec<_> = parse_file(CancellationToken::new(), &path, &opts).unwrap().collect();

        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], BatchItem::Error(VrclogError::LineTooLong { .. })));
        assert!(matches!(items[1], BatchItem::Event(_)));
    }

    #[test]
    fn until_cutoff_stops_the_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("output_log_2024-01-01.txt");
        let contents = format!(
            "{}{}",
            join_line("2024.01.15 12:00:00", "Alice"),
            join_line("2024.01.15 13:00:00", "Bob"),
        );
        touch(&path, &contents);

        let until = NaiveDateTime::parse_from_str("2024.01.15 12:30:00", "%Y.%m.%d %H:%M:%S").unwrap();
        let opts = ParseOptions::new().with_until(until);
        let items: Vec<_> = parse_file(CancellationToken::new(), &path, &opts).unwrap().collect();

        assert_eq!(items.len(), 1);
        let BatchItem::Event(e) = &items[0] else { panic!("expected event") };
        assert_eq!(e.player_name.as_deref(), Some("Alice"));
    }

    #[test]
    fn parse_dir_merges_files_in_mtime_order() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("output_log_2024-01-01.txt");
        touch(&first, &join_line("2024.01.15 12:00:00", "Alice"));
        std::thread::sleep(std::time::Duration::from_millis(10));
        let second = dir.path().join("output_log_2024-01-02.txt");
        touch(&second, &join_line("2024.01.16 12:00:00", "Bob"));

        let opts = ParseOptions::new();
        let items: Vec<_> = parse_dir(CancellationToken::new(), dir.path(), None, opts)
            .unwrap()
            .collect();

        assert_eq!(items.len(), 2);
        let BatchItem::Event(a) = &items[0] else { panic!("expected event") };
        let BatchItem::Event(b) = &items[1] else { panic!("expected event") };
        assert_eq!(a.player_name.as_deref(), Some("Alice"));
        assert_eq!(b.player_name.as_deref(), Some("Bob"));
    }

    #[test]
    fn cancellation_surfaces_before_the_next_line_is_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("output_log_2024-01-01.txt");
        touch(&path, &join_line("2024.01.15 12:00:00", "Alice"));

        let ctx = CancellationToken::new();
        ctx.cancel();
        let opts = ParseOptions::new();
        let items: Vec<_> = parse_file(ctx, &path, &opts).unwrap().collect();

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], BatchItem::Error(VrclogError::Cancelled)));
    }

    #[test]
    fn invalid_utf8_is_lossy_sanitized_instead_of_aborting_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("output_log_2024-01-01.txt");
        let mut contents = Vec::new();
        contents.extend_from_slice(b"2024.01.15 12:00:00 Log        -  [Behaviour] garbled \xff\xfe line\n");
        contents.extend_from_slice(join_line("2024.01.15 12:00:05", "Alice").as_bytes());
        std::fs::write(&path, &contents).unwrap();

        let opts = ParseOptions::new();
        let items: Vec<_> = parse_file(CancellationToken::new(), &path, &opts).unwrap().collect();

        // The garbled line carries no recognizable event and no error;
        // the stream continues on to parse the following valid line.
        assert_eq!(items.len(), 1);
        let BatchItem::Event(e) = &items[0] else { panic!("expected event") };
        assert_eq!(e.player_name.as_deref(), Some("Alice"));
    }
}
