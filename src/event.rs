//! The data model shared by every parser and consumer: [`Event`] and
//! [`ParseResult`].

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// The built-in event kinds. Custom parsers (pattern files, plugins)
/// may emit arbitrary string tags; these are the closed set the
/// built-in parser produces.
pub mod kinds {
    pub const PLAYER_JOIN: &str = "player_join";
    pub const PLAYER_LEFT: &str = "player_left";
    pub const WORLD_JOIN: &str = "world_join";
}

/// A single semantic event extracted from a log line.
///
/// `kind` and `timestamp` are always populated; every other field
/// defaults to absent. `data` is `None` (not `Some(empty map)`) when a
/// parser had no named captures to report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: String,
    pub timestamp: NaiveDateTime,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_line: Option<String>,
}

impl Event {
    /// Construct a minimal event with only the two mandatory fields set.
    pub fn new(kind: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            kind: kind.into(),
            timestamp,
            player_name: None,
            player_id: None,
            world_name: None,
            world_id: None,
            instance_id: None,
            data: None,
            raw_line: None,
        }
    }

    pub fn with_raw_line(mut self, line: impl Into<String>) -> Self {
        self.raw_line = Some(line.into());
        self
    }

    /// Case-insensitive, whitespace-insensitive comparison against a
    /// kind filter set — see [`crate::filter::EventFilter`] for the
    /// combining rule (include vs. exclude).
    pub fn kind_matches(&self, other: &str) -> bool {
        self.kind.trim().eq_ignore_ascii_case(other.trim())
    }
}

/// What a parser returns for one input line.
///
/// `matched = false` with no events and no error means "not mine, let
/// the next parser in a chain try." A parser may also set `matched =
/// true` while emitting zero events (it recognized the line but chose
/// not to produce an event for it).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseResult {
    pub events: Vec<Event>,
    pub matched: bool,
}

impl ParseResult {
    pub fn no_match() -> Self {
        Self::default()
    }

    pub fn matched_with(events: Vec<Event>) -> Self {
        Self {
            events,
            matched: true,
        }
    }

    pub fn matched_empty() -> Self {
        Self {
            events: Vec::new(),
            matched: true,
        }
    }

    pub fn single(event: Event) -> Self {
        Self {
            events: vec![event],
            matched: true,
        }
    }
}
