//! Error types for vrclog operations.
//!
//! [`VrclogError`] is a single enum covering every failure kind in the
//! system: discovery, configuration, parsing, watching, pattern-file
//! loading, and the plugin host. Error messages derived from
//! filesystem paths never embed the path directly — callers that need
//! the raw path (internal logging, tests) use [`VrclogError::path`].

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias using [`VrclogError`].
pub type Result<T> = std::result::Result<T, VrclogError>;

/// The operation a [`VrclogError::Watch`] failure occurred during.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOp {
    FindLatest,
    Replay,
    Parse,
    Tail,
    Rotation,
}

impl std::fmt::Display for WatchOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::FindLatest => "find-latest",
            Self::Replay => "replay",
            Self::Parse => "parse",
            Self::Tail => "tail",
            Self::Rotation => "rotation",
        };
        write!(f, "{s}")
    }
}

/// Comprehensive error type for all vrclog operations.
#[derive(Debug, Error)]
pub enum VrclogError {
    // -- Discovery --
    #[error("log directory not found")]
    LogDirNotFound { searched: Vec<PathBuf> },

    #[error("no log files found")]
    NoLogFiles,

    // -- Config --
    #[error("invalid option: {message}")]
    InvalidOption { message: String },

    // -- Lifecycle --
    #[error("watcher is closed")]
    WatcherClosed,

    #[error("watcher is already watching")]
    AlreadyWatching,

    // -- Parsing --
    #[error("parse error on line {line}: {underlying}")]
    ParseError { line: u64, underlying: String },

    #[error("line too long: line {line_number} is {length} bytes (max {max})")]
    LineTooLong {
        line_number: u64,
        length: usize,
        max: usize,
    },

    #[error("replay limit exceeded")]
    ReplayLimitExceeded,

    // -- Watching --
    #[error("watch error during {operation}")]
    Watch {
        operation: WatchOp,
        path: Option<PathBuf>,
        #[source]
        underlying: Option<Box<VrclogError>>,
    },

    // -- Pattern load --
    #[error("pattern file validation failed: {reason}")]
    Validation { reason: String },

    #[error("pattern error in '{pattern_id}': {reason}")]
    Pattern {
        pattern_id: String,
        reason: String,
        #[source]
        underlying: Option<Box<regex::Error>>,
    },

    // -- Plugin host --
    #[error("plugin ABI error in {function}: {reason}")]
    Abi { function: String, reason: String },

    #[error("plugin ABI version mismatch: expected 1, found {found}")]
    AbiVersionMismatch { found: u32 },

    #[error("plugin is missing required export '{export}'")]
    MissingExport { export: String },

    #[error("plugin panicked: {message}")]
    PluginPanic { message: String },

    #[error("plugin returned error {code}: {message}")]
    PluginError { code: String, message: String },

    #[error("file too large ({actual} bytes, max {max})")]
    FileTooLarge { actual: u64, max: u64 },

    #[error("plugin runtime error during {operation}: {underlying}")]
    Runtime {
        operation: String,
        underlying: String,
    },

    #[error("plugin call timed out")]
    Timeout,

    // -- Cancellation (never wrapped — callers match on this directly) --
    #[error("operation cancelled")]
    Cancelled,

    // -- I/O, with path scrubbed from Display --
    #[error("I/O error during {operation}")]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("refused to open non-regular file")]
    NotRegularFile { path: PathBuf },
}

impl VrclogError {
    pub fn io(operation: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    pub fn watch(operation: WatchOp, path: Option<PathBuf>, underlying: Option<VrclogError>) -> Self {
        Self::Watch {
            operation,
            path,
            underlying: underlying.map(Box::new),
        }
    }

    pub fn pattern(pattern_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Pattern {
            pattern_id: pattern_id.into(),
            reason: reason.into(),
            underlying: None,
        }
    }

    pub fn pattern_with_source(
        pattern_id: impl Into<String>,
        reason: impl Into<String>,
        source: regex::Error,
    ) -> Self {
        Self::Pattern {
            pattern_id: pattern_id.into(),
            reason: reason.into(),
            underlying: Some(Box::new(source)),
        }
    }

    /// The path associated with this error, if any. Never rendered by
    /// `Display` — callers that are permitted to see raw paths (internal
    /// logging, tests) use this explicitly.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Io { path, .. } => Some(path),
            Self::NotRegularFile { path } => Some(path),
            Self::Watch { path, .. } => path.as_deref(),
            Self::LogDirNotFound { searched } => searched.first().map(PathBuf::as_path),
            _ => None,
        }
    }

    /// True if the watcher should *not* terminate on this error — it
    /// belongs on the error channel, not a synchronous return.
    pub fn is_non_fatal_during_tail(&self) -> bool {
        matches!(
            self,
            Self::ParseError { .. }
                | Self::LineTooLong { .. }
                | Self::ReplayLimitExceeded
                | Self::Watch { .. }
                | Self::PluginError { .. }
        )
    }
}
