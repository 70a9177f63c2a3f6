//! Watch and batch-parse configuration ("Watch configuration" /
//! "Parse configuration").
//!
//! Both structs are plain builder-style structs — `with_*` methods
//! returning `Self` — rather than a YAML-backed config file; the
//! pattern-file format is the only on-disk config surface this
//! crate owns.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;

use crate::error::{Result, VrclogError};
use crate::parser::Parser;

/// Which historical lines, if any, a [`crate::watcher::Watcher`] should
/// replay before it starts live tailing (`replay-mode`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ReplayMode {
    #[default]
    None,
    FromStart,
    LastN(usize),
    SinceTime(NaiveDateTime),
}

/// Options consumed by [`crate::watcher::Watcher`].
#[derive(Clone)]
pub struct WatchOptions {
    pub log_dir: Option<PathBuf>,
    pub poll_interval: Duration,
    pub wait_for_logs: bool,
    pub include_raw_line: bool,
    pub include_kinds: Vec<String>,
    pub exclude_kinds: Vec<String>,
    pub replay_mode: ReplayMode,
    pub replay_last_n: usize,
    pub replay_since: Option<NaiveDateTime>,
    pub max_replay_bytes: u64,
    pub max_replay_line_bytes: usize,
    pub max_line_bytes: usize,
    pub parser: Option<Arc<dyn Parser>>,
    /// Composed in [`crate::parser::chain::ChainMode::All`] when
    /// non-empty and `parser` is not set ("parsers").
    pub parsers: Vec<Arc<dyn Parser>>,
}

impl std::fmt::Debug for WatchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchOptions")
            .field("log_dir", &self.log_dir)
            .field("poll_interval", &self.poll_interval)
            .field("wait_for_logs", &self.wait_for_logs)
            .field("include_raw_line", &self.include_raw_line)
            .field("include_kinds", &self.include_kinds)
            .field("exclude_kinds", &self.exclude_kinds)
            .field("replay_mode", &self.replay_mode)
            .field("replay_last_n", &self.replay_last_n)
            .field("replay_since", &self.replay_since)
            .field("max_replay_bytes", &self.max_replay_bytes)
            .field("max_replay_line_bytes", &self.max_replay_line_bytes)
            .field("max_line_bytes", &self.max_line_bytes)
            .field("parser", &self.parser.as_ref().map(|_| "<dyn Parser>"))
            .field("parsers", &self.parsers.len())
            .finish()
    }
}

impl WatchOptions {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
    pub const DEFAULT_REPLAY_LAST_N_CAP: usize = 10_000;
    pub const DEFAULT_MAX_REPLAY_BYTES: u64 = 10 * 1024 * 1024;
    pub const DEFAULT_MAX_REPLAY_LINE_BYTES: usize = 512 * 1024;
    pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_wait_for_logs(mut self, wait: bool) -> Self {
        self.wait_for_logs = wait;
        self
    }

    pub fn with_include_raw_line(mut self, include: bool) -> Self {
        self.include_raw_line = include;
        self
    }

    pub fn with_include_kinds(mut self, kinds: Vec<String>) -> Self {
        self.include_kinds = kinds;
        self
    }

    pub fn with_exclude_kinds(mut self, kinds: Vec<String>) -> Self {
        self.exclude_kinds = kinds;
        self
    }

    pub fn with_replay_mode(mut self, mode: ReplayMode) -> Self {
        self.replay_mode = mode;
        self
    }

    pub fn with_replay_last_n(mut self, n: usize) -> Self {
        self.replay_last_n = n;
        self
    }

    pub fn with_replay_since(mut self, since: NaiveDateTime) -> Self {
        self.replay_since = Some(since);
        self
    }

    pub fn with_max_replay_bytes(mut self, max: u64) -> Self {
        self.max_replay_bytes = max;
        self
    }

    pub fn with_max_replay_line_bytes(mut self, max: usize) -> Self {
        self.max_replay_line_bytes = max;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn Parser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn with_parsers(mut self, parsers: Vec<Arc<dyn Parser>>) -> Self {
        self.parsers = parsers;
        self
    }

    /// Resolves which parser this watcher should actually run: the
    /// explicit override if set, else a `ChainAll` composition of
    /// `parsers` if non-empty, else the built-in parser.
    pub fn resolve_parser(&self) -> Arc<dyn Parser> {
        if let Some(p) = &self.parser {
            return p.clone();
        }
        if !self.parsers.is_empty() {
            let list = self.parsers.iter().cloned().map(Some).collect();
            return Arc::new(crate::parser::chain::Chain::all(list));
        }
        Arc::new(crate::parser::builtin::BuiltinParser::new())
    }

    /// Validates option combinations (Phase 1). Called once at
    /// `Watcher::new`; also exposed for callers that want to
    /// pre-validate before constructing a watcher.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(VrclogError::InvalidOption {
                message: "poll-interval must be > 0".into(),
            });
        }
        Ok(())
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            log_dir: None,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            wait_for_logs: false,
            include_raw_line: false,
            include_kinds: Vec::new(),
            exclude_kinds: Vec::new(),
            replay_mode: ReplayMode::None,
            replay_last_n: Self::DEFAULT_REPLAY_LAST_N_CAP,
            replay_since: None,
            max_replay_bytes: Self::DEFAULT_MAX_REPLAY_BYTES,
            max_replay_line_bytes: Self::DEFAULT_MAX_REPLAY_LINE_BYTES,
            max_line_bytes: Self::DEFAULT_MAX_LINE_BYTES,
            parser: None,
            parsers: Vec::new(),
        }
    }
}

/// Options consumed by the batch parser.
#[derive(Clone)]
pub struct ParseOptions {
    pub include_kinds: Vec<String>,
    pub exclude_kinds: Vec<String>,
    pub since: Option<NaiveDateTime>,
    pub until: Option<NaiveDateTime>,
    pub stop_on_error: bool,
    pub include_raw_line: bool,
    pub max_line_bytes: usize,
    pub parser: Option<Arc<dyn Parser>>,
    pub parsers: Vec<Arc<dyn Parser>>,
}

impl std::fmt::Debug for ParseOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseOptions")
            .field("include_kinds", &self.include_kinds)
            .field("exclude_kinds", &self.exclude_kinds)
            .field("since", &self.since)
            .field("until", &self.until)
            .field("stop_on_error", &self.stop_on_error)
            .field("include_raw_line", &self.include_raw_line)
            .field("max_line_bytes", &self.max_line_bytes)
            .field("parser", &self.parser.as_ref().map(|_| "<dyn Parser>"))
            .field("parsers", &self.parsers.len())
            .finish()
    }
}

impl ParseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_include_kinds(mut self, kinds: Vec<String>) -> Self {
        self.include_kinds = kinds;
        self
    }

    pub fn with_exclude_kinds(mut self, kinds: Vec<String>) -> Self {
        self.exclude_kinds = kinds;
        self
    }

    pub fn with_since(mut self, since: NaiveDateTime) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_until(mut self, until: NaiveDateTime) -> Self {
        self.until = Some(until);
        self
    }

    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    pub fn with_include_raw_line(mut self, include: bool) -> Self {
        self.include_raw_line = include;
        self
    }

    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn Parser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn with_parsers(mut self, parsers: Vec<Arc<dyn Parser>>) -> Self {
        self.parsers = parsers;
        self
    }

    /// Resolves which parser this batch run should actually use — see
    /// [`WatchOptions::resolve_parser`] for the precedence rule.
    pub fn resolve_parser(&self) -> Arc<dyn Parser> {
        if let Some(p) = &self.parser {
            return p.clone();
        }
        if !self.parsers.is_empty() {
            let list = self.parsers.iter().cloned().map(Some).collect();
            return Arc::new(crate::parser::chain::Chain::all(list));
        }
        Arc::new(crate::parser::builtin::BuiltinParser::new())
    }
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            include_kinds: Vec::new(),
            exclude_kinds: Vec::new(),
            since: None,
            until: None,
            stop_on_error: false,
            include_raw_line: false,
            max_line_bytes: WatchOptions::DEFAULT_MAX_LINE_BYTES,
            parser: None,
            parsers: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_poll_interval_is_positive() {
        let opts = WatchOptions::new();
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let opts = WatchOptions::new().with_poll_interval(Duration::from_secs(0));
        let err = opts.validate().unwrap_err();
        assert!(matches!(err, VrclogError::InvalidOption { .. }));
    }
}
