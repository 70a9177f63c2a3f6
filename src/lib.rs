//! Extraction of semantic events (player joins, world changes, ...)
//! from VRChat-style diagnostic logs: a live watcher that tails the
//! newest log file through rotation, and an offline batch parser over
//! already-written files.
//!
//! ```no_run
//! # async fn example() -> vrclog::Result<()> {
//! use tokio_util::sync::CancellationToken;
//! use vrclog::{watch, WatchOptions};
//!
//! let (watcher, mut events, mut errors) =
//!     watch(CancellationToken::new(), WatchOptions::new()).await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! watcher.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod backward_scan;
pub mod batch;
pub mod config;
pub mod discovery;
pub mod error;
pub mod event;
pub mod filter;
pub mod line_source;
pub mod logging;
pub mod parser;
pub mod safe_open;
pub mod watcher;

pub use batch::{parse_dir, parse_file, parse_file_all, BatchItem, DirParser, FileParser};
pub use config::{ParseOptions, ReplayMode, WatchOptions};
pub use error::{Result, VrclogError};
pub use event::{kinds, Event, ParseResult};
pub use filter::EventFilter;
pub use logging::{init_logging, init_test_logging, LogGuard};
pub use watcher::{watch, ErrorReceiver, EventReceiver, Watcher, WatcherState};

use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

use parser::builtin::BuiltinParser;
use parser::Parser;

fn shared_builtin_parser() -> &'static BuiltinParser {
    static PARSER: OnceLock<BuiltinParser> = OnceLock::new();
    PARSER.get_or_init(BuiltinParser::new)
}

/// Parses a single line with the built-in parser, returning the
/// first event it produces, if any. A thin convenience over
/// constructing a [`BuiltinParser`] directly — prefer
/// [`parser::builtin::BuiltinParser`] or a full [`config::WatchOptions`]
/// when more than one line needs parsing.
pub fn parse_line(line: &str) -> Option<Event> {
    let ctx = CancellationToken::new();
    let (result, _err) = shared_builtin_parser().parse_line(&ctx, line);
    result.events.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_line_recognizes_a_player_join() {
        let event = parse_line("2024.01.15 12:00:00 Log        -  [Behaviour] OnPlayerJoined Alice").unwrap();
        assert_eq!(event.kind, kinds::PLAYER_JOIN);
        assert_eq!(event.player_name.as_deref(), Some("Alice"));
    }

    #[test]
    fn parse_line_returns_none_for_unrecognized_input() {
        assert!(parse_line("not a vrchat log line").is_none());
    }
}
