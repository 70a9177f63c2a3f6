//! YAML-driven, named-capture-group parser.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::VrclogError;
use crate::event::{Event, ParseResult};
use crate::safe_open::open_regular;

use super::Parser;

/// Load-time safety limits.
pub const MAX_PATTERN_FILE_SIZE: u64 = 1024 * 1024; // 1 MiB
pub const MAX_PATTERN_LENGTH: usize = 512; // bytes
pub const SUPPORTED_SCHEMA_VERSION: u32 = 1;

const TIMESTAMP_LAYOUT: &str = "%Y.%m.%d %H:%M:%S";

#[derive(Debug, Deserialize)]
struct PatternFileRaw {
    version: u32,
    patterns: Vec<PatternEntryRaw>,
}

#[derive(Debug, Deserialize)]
struct PatternEntryRaw {
    id: String,
    event_type: String,
    regex: String,
}

struct CompiledPattern {
    id: String,
    event_type: String,
    regex: Regex,
}

/// A parser built from a validated, compiled YAML pattern file.
pub struct RegexPatternParser {
    patterns: Vec<CompiledPattern>,
    path: Option<PathBuf>,
}

fn timestamp_regex() -> &'static Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4}\.\d{2}\.\d{2}\s+\d{2}:\d{2}:\d{2})").unwrap())
}

fn extract_timestamp(line: &str) -> Option<NaiveDateTime> {
    let caps = timestamp_regex().captures(line)?;
    NaiveDateTime::parse_from_str(caps.get(1)?.as_str(), TIMESTAMP_LAYOUT).ok()
}

impl RegexPatternParser {
    /// Load and validate a pattern file from disk, through the safe
    /// open contract. Rejects files over [`MAX_PATTERN_FILE_SIZE`]
    /// rather than silently truncating them.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, VrclogError> {
        let path = path.as_ref();
        let (mut file, meta) = open_regular(path)?;

        if meta.len() > MAX_PATTERN_FILE_SIZE {
            return Err(VrclogError::FileTooLarge {
                actual: meta.len(),
                max: MAX_PATTERN_FILE_SIZE,
            });
        }

        let mut contents = Vec::with_capacity(meta.len() as usize);
        file.read_to_end(&mut contents)
            .map_err(|e| VrclogError::io("read", path, e))?;

        let mut parser = Self::from_yaml_bytes(&contents)?;
        parser.path = Some(path.to_path_buf());
        Ok(parser)
    }

    /// Parse and validate a pattern file already held in memory — used
    /// both by [`Self::from_path`] and by callers constructing a
    /// pattern set programmatically. Validation always re-runs; it is
    /// never skipped just because the source wasn't a file.
    pub fn from_yaml_bytes(bytes: &[u8]) -> Result<Self, VrclogError> {
        let raw: PatternFileRaw = serde_yaml::from_slice(bytes)
            .map_err(|e| VrclogError::Validation {
                reason: format!("invalid YAML: {e}"),
            })?;

        if raw.version != SUPPORTED_SCHEMA_VERSION {
            return Err(VrclogError::Validation {
                reason: format!(
                    "unsupported schema version {} (expected {})",
                    raw.version, SUPPORTED_SCHEMA_VERSION
                ),
            });
        }

        let mut patterns = Vec::with_capacity(raw.patterns.len());
        for entry in raw.patterns {
            if entry.id.trim().is_empty() {
                return Err(VrclogError::pattern(entry.id.clone(), "id must be non-empty"));
            }
            if entry.event_type.trim().is_empty() {
                return Err(VrclogError::pattern(entry.id.clone(), "event_type must be non-empty"));
            }
            if entry.regex.len() > MAX_PATTERN_LENGTH {
                return Err(VrclogError::pattern(
                    entry.id.clone(),
                    format!("regex exceeds {MAX_PATTERN_LENGTH} bytes"),
                ));
            }

            let regex = Regex::new(&entry.regex).map_err(|e| {
                VrclogError::pattern_with_source(entry.id.clone(), "failed to compile regex", e)
            })?;

            patterns.push(CompiledPattern {
                id: entry.id,
                event_type: entry.event_type,
                regex,
            });
        }

        Ok(Self {
            patterns,
            path: None,
        })
    }

    /// Re-read and re-validate from the original path, if this parser
    /// was loaded from one. The existing parser keeps serving calls
    /// already in flight — this only affects calls made after it
    /// returns.
    pub fn reload(&mut self) -> Result<(), VrclogError> {
        let Some(path) = self.path.clone() else {
            return Err(VrclogError::Validation {
                reason: "parser was not loaded from a path".into(),
            });
        };
        let fresh = Self::from_path(&path)?;
        *self = fresh;
        Ok(())
    }

    fn try_parse(&self, line: &str) -> ParseResult {
        for pattern in &self.patterns {
            let Some(caps) = pattern.regex.captures(line) else {
                continue;
            };

            let Some(timestamp) = extract_timestamp(line) else {
                continue;
            };

            let mut data: HashMap<String, String> = HashMap::new();
            for name in pattern.regex.capture_names().flatten() {
                if let Some(m) = caps.name(name) {
                    data.insert(name.to_string(), m.as_str().to_string());
                }
            }

            let mut event = Event::new(pattern.event_type.clone(), timestamp);
            if !data.is_empty() {
                event.data = Some(data);
            }
            return ParseResult::single(event);
        }

        ParseResult::no_match()
    }
}

impl Parser for RegexPatternParser {
    fn parse_line(&self, _ctx: &CancellationToken, line: &str) -> (ParseResult, Option<VrclogError>) {
        (self.try_parse(line), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POKER_PATTERN: &str = r#"
version: 1
patterns:
  - id: poker_hole_cards
    event_type: poker_hole_cards
    regex: '\[Seat\]: Draw Local Hole Cards: (?P<card1>\w+), (?P<card2>\w+)'
"#;

    #[test]
    fn custom_pattern_with_named_groups() {
        let parser = RegexPatternParser::from_yaml_bytes(POKER_PATTERN.as_bytes()).unwrap();
        let line = "2024.01.15 12:00:00 Log        -  [Seat]: Draw Local Hole Cards: AceSpades, KingHearts";
        let (result, err) = parser.parse_line(&CancellationToken::new(), line);

        assert!(err.is_none());
        assert_eq!(result.events.len(), 1);
        let e = &result.events[0];
        assert_eq!(e.kind, "poker_hole_cards");
        let data = e.data.as_ref().unwrap();
        assert_eq!(data.get("card1").map(String::as_str), Some("AceSpades"));
        assert_eq!(data.get("card2").map(String::as_str), Some("KingHearts"));
    }

    #[test]
    fn rejects_unsupported_schema_version() {
        let yaml = "version: 2\npatterns: []\n";
        let err = RegexPatternParser::from_yaml_bytes(yaml.as_bytes()).unwrap_err();
        assert!(matches!(err, VrclogError::Validation { .. }));
    }

    #[test]
    fn rejects_regex_over_max_length() {
        let long_regex = "a".repeat(MAX_PATTERN_LENGTH + 1);
        let yaml = format!(
            "version: 1\npatterns:\n  - id: x\n    event_type: x\n    regex: '{long_regex}'\n"
        );
        let err = RegexPatternParser::from_yaml_bytes(yaml.as_bytes()).unwrap_err();
        assert!(matches!(err, VrclogError::Pattern { .. }));
    }

    #[test]
    fn accepts_regex_at_exactly_max_length() {
        // Pad with a harmless alternation so the pattern still compiles.
        let filler = "a".repeat(MAX_PATTERN_LENGTH - "(?:)".len());
        let regex = format!("(?:{filler})");
        assert_eq!(regex.len(), MAX_PATTERN_LENGTH);
        let yaml = format!("version: 1\npatterns:\n  - id: x\n    event_type: x\n    regex: '{regex}'\n");
        RegexPatternParser::from_yaml_bytes(yaml.as_bytes()).unwrap();
    }

    #[test]
    fn requires_non_empty_id_and_event_type() {
        let yaml = "version: 1\npatterns:\n  - id: ''\n    event_type: x\n    regex: 'a'\n";
        let err = RegexPatternParser::from_yaml_bytes(yaml.as_bytes()).unwrap_err();
        assert!(matches!(err, VrclogError::Pattern { .. }));
    }

    #[test]
    fn data_is_absent_when_no_named_groups() {
        let yaml = "version: 1\npatterns:\n  - id: x\n    event_type: custom\n    regex: 'hello'\n";
        let parser = RegexPatternParser::from_yaml_bytes(yaml.as_bytes()).unwrap();
        let line = "2024.01.15 12:00:00 Log        -  hello world";
        let (result, _) = parser.parse_line(&CancellationToken::new(), line);
        assert_eq!(result.events.len(), 1);
        assert!(result.events[0].data.is_none());
    }

    #[test]
    fn file_over_size_cap_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        use std::io::Write;
        // One byte over the 1 MiB cap.
        let filler = vec![b' '; (MAX_PATTERN_FILE_SIZE + 1) as usize];
        f.write_all(b"version: 1\npatterns: []\n").unwrap();
        f.write_all(&filler).unwrap();
        drop(f);

        let err = RegexPatternParser::from_path(&path).unwrap_err();
        assert!(matches!(err, VrclogError::FileTooLarge { .. }));
    }
}
