//! The fixed regex-based parser for the three built-in event kinds
//!.

use chrono::NaiveDateTime;
use regex::Regex;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

use crate::error::VrclogError;
use crate::event::{kinds, Event, ParseResult};

use super::Parser;

/// Lines containing any of these substrings are known not to carry an
/// event and are rejected before the regex engine runs at all.
const EXCLUSION_PREFIXES: &[&str] = &[
    "OnPlayerJoined:",
    "OnPlayerLeftRoom",
    "Joining or Creating",
    "Joining friend",
];

const TIMESTAMP_LAYOUT: &str = "%Y.%m.%d %H:%M:%S";

fn timestamp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4}\.\d{2}\.\d{2}\s+\d{2}:\d{2}:\d{2})").unwrap())
}

fn player_join_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[Behaviour\]\s+OnPlayerJoined\s+(.+?)(?:\s+\((usr_[A-Za-z0-9-]+)\))?\s*$").unwrap()
    })
}

fn player_left_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[Behaviour\]\s+OnPlayerLeft\s+(.+?)\s*$").unwrap())
}

fn entering_room_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[Behaviour\]\s+Entering Room:\s*(.+?)\s*$").unwrap())
}

fn joining_world_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[Behaviour\]\s+Joining\s+(wrld_[^:]+):(\S+)").unwrap())
}

/// Extract a `YYYY.MM.DD HH:MM:SS` timestamp from anywhere in the line.
/// Returns `None` if no timestamp is present — that means
/// "not mine" for the built-in parser, regardless of whether the rest
/// of the line otherwise looks like an event.
fn extract_timestamp(line: &str) -> Option<NaiveDateTime> {
    let caps = timestamp_regex().captures(line)?;
    NaiveDateTime::parse_from_str(caps.get(1)?.as_str(), TIMESTAMP_LAYOUT).ok()
}

/// Replace invalid UTF-8 bytes with the Unicode replacement character
/// before a line is handed to any parser, so downstream JSON encoding
/// can never fail on bad bytes.
pub fn sanitize_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// The built-in parser. Stateless, so it is safe to share across tasks
/// — a single process-wide instance backs
/// [`crate::parse_line`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinParser;

impl BuiltinParser {
    pub fn new() -> Self {
        Self
    }

    fn try_parse(&self, line: &str) -> ParseResult {
        if EXCLUSION_PREFIXES.iter().any(|p| line.contains(p)) {
            return ParseResult::no_match();
        }

        let Some(timestamp) = extract_timestamp(line) else {
            return ParseResult::no_match();
        };

        // Tie-break order: join, then left, then world — the first
        // pattern that matches wins; no line emits more than one
        // built-in event.
        if let Some(caps) = player_join_regex().captures(line) {
            let name = caps.get(1).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
            let mut event = Event::new(kinds::PLAYER_JOIN, timestamp);
            event.player_name = Some(name);
            event.player_id = caps.get(2).map(|m| m.as_str().to_string());
            return ParseResult::single(event);
        }

        if let Some(caps) = player_left_regex().captures(line) {
            let name = caps.get(1).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
            let mut event = Event::new(kinds::PLAYER_LEFT, timestamp);
            event.player_name = Some(name);
            return ParseResult::single(event);
        }

        if let Some(caps) = entering_room_regex().captures(line) {
            let room = caps.get(1).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
            let mut event = Event::new(kinds::WORLD_JOIN, timestamp);
            event.world_name = Some(room);
            return ParseResult::single(event);
        }

        if let Some(caps) = joining_world_regex().captures(line) {
            let world_id = caps.get(1).map(|m| m.as_str().trim().to_string());
            let instance_id = caps.get(2).map(|m| m.as_str().trim().to_string());
            let mut event = Event::new(kinds::WORLD_JOIN, timestamp);
            event.world_id = world_id;
            event.instance_id = instance_id;
            return ParseResult::single(event);
        }

        ParseResult::no_match()
    }
}

impl Parser for BuiltinParser {
    fn parse_line(&self, _ctx: &CancellationToken, line: &str) -> (ParseResult, Option<VrclogError>) {
        (self.try_parse(line), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> BuiltinParser {
        BuiltinParser::new()
    }

    #[test]
    fn player_join_with_id() {
        let line = "2024.01.15 23:59:59 Log        -  [Behaviour] OnPlayerJoined TestUser (usr_12345678-1234-1234-1234-123456789abc)";
        let (result, err) = parser().parse_line(&CancellationToken::new(), line);
        assert!(err.is_none());
        assert_eq!(result.events.len(), 1);
        let e = &result.events[0];
        assert_eq!(e.kind, kinds::PLAYER_JOIN);
        assert_eq!(e.player_name.as_deref(), Some("TestUser"));
        assert_eq!(
            e.player_id.as_deref(),
            Some("usr_12345678-1234-1234-1234-123456789abc")
        );
        assert_eq!(
            e.timestamp,
            NaiveDateTime::parse_from_str("2024.01.15 23:59:59", TIMESTAMP_LAYOUT).unwrap()
        );
    }

    #[test]
    fn world_join_room_form_has_no_world_id() {
        let line = "2024.01.15 23:59:59 Log        -  [Behaviour] Entering Room: Test [World] (v1.0)";
        let (result, _) = parser().parse_line(&CancellationToken::new(), line);
        assert_eq!(result.events.len(), 1);
        let e = &result.events[0];
        assert_eq!(e.kind, kinds::WORLD_JOIN);
        assert_eq!(e.world_name.as_deref(), Some("Test [World] (v1.0)"));
        assert!(e.world_id.is_none());
        assert!(e.instance_id.is_none());
    }

    #[test]
    fn exclusion_pattern_yields_no_event_and_no_error() {
        let line = "2024.01.15 23:59:59 Log        -  [Behaviour] OnPlayerLeftRoom";
        let (result, err) = parser().parse_line(&CancellationToken::new(), line);
        assert!(err.is_none());
        assert!(!result.matched);
        assert!(result.events.is_empty());
    }

    #[test]
    fn line_without_timestamp_is_not_mine() {
        let line = "[Behaviour] OnPlayerJoined TestUser (usr_abcdef)";
        let (result, err) = parser().parse_line(&CancellationToken::new(), line);
        assert!(err.is_none());
        assert!(!result.matched);
    }

    #[test]
    fn world_join_id_form() {
        let line = "2024.01.15 12:00:00 Log        -  [Behaviour] Joining wrld_12345678-1234-1234-1234-123456789abc:12345~private(usr_x)~region(us)";
        let (result, _) = parser().parse_line(&CancellationToken::new(), line);
        assert_eq!(result.events.len(), 1);
        let e = &result.events[0];
        assert_eq!(
            e.world_id.as_deref(),
            Some("wrld_12345678-1234-1234-1234-123456789abc")
        );
        assert_eq!(e.instance_id.as_deref(), Some("12345~private(usr_x)~region(us)"));
    }

    #[test]
    fn never_panics_on_arbitrary_bytes() {
        let raw: &[u8] = &[0xff, 0xfe, b'[', b'B', 0x00, b']'];
        let line = sanitize_line(raw);
        let (_result, err) = parser().parse_line(&CancellationToken::new(), &line);
        assert!(err.is_none());
    }
}
