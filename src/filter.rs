//! Include/exclude-by-kind and time-window event filtering.

use chrono::NaiveDateTime;

use crate::event::Event;

/// Composes the include/exclude kind sets and an optional `[since,
/// until)` time window into one predicate.
///
/// Kind comparisons are case-insensitive and whitespace-trimmed,
/// matching [`Event::kind_matches`]. An empty include set means "allow
/// all"; exclude always wins over include.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    include: Vec<String>,
    exclude: Vec<String>,
    since: Option<NaiveDateTime>,
    until: Option<NaiveDateTime>,
}

impl EventFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self {
            include,
            exclude,
            since: None,
            until: None,
        }
    }

    pub fn with_since(mut self, since: NaiveDateTime) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_until(mut self, until: NaiveDateTime) -> Self {
        self.until = Some(until);
        self
    }

    /// True iff `event` should be emitted: `(include.empty ∨ kind ∈
    /// include) ∧ kind ∉ exclude`, further narrowed by the time window
    /// (`since` inclusive, `until` exclusive) when configured.
    pub fn allows(&self, event: &Event) -> bool {
        let excluded = self.exclude.iter().any(|k| event.kind_matches(k));
        if excluded {
            return false;
        }

        let included = self.include.is_empty() || self.include.iter().any(|k| event.kind_matches(k));
        if !included {
            return false;
        }

        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.timestamp >= until {
                return false;
            }
        }

        true
    }

    /// True once `event.timestamp >= until` — used by the batch parser
    /// to short-circuit on the assumption that timestamps are
    /// monotonically non-decreasing across the input.
    pub fn is_past_until(&self, event: &Event) -> bool {
        matches!(self.until, Some(until) if event.timestamp >= until)
    }
}

impl Event {
    /// Convenience mirroring [`EventFilter::allows`] as an inherent
    /// method on `Event` (mirrors small classification helpers on the
    /// reference crate's core types).
    pub fn matches_filter(&self, filter: &EventFilter) -> bool {
        filter.allows(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::kinds;

    fn event(kind: &str, ts: &str) -> Event {
        Event::new(kind, NaiveDateTime::parse_from_str(ts, "%Y.%m.%d %H:%M:%S").unwrap())
    }

    #[test]
    fn empty_include_allows_all() {
        let filter = EventFilter::new(vec![], vec![]);
        let e = event(kinds::PLAYER_JOIN, "2024.01.15 12:00:00");
        assert!(filter.allows(&e));
    }

    #[test]
    fn exclude_wins_over_include() {
        let filter = EventFilter::new(
            vec![kinds::PLAYER_JOIN.to_string()],
            vec![kinds::PLAYER_JOIN.to_string()],
        );
        let e = event(kinds::PLAYER_JOIN, "2024.01.15 12:00:00");
        assert!(!filter.allows(&e));
    }

    #[test]
    fn since_is_inclusive_until_is_exclusive() {
        let ts = NaiveDateTime::parse_from_str("2024.01.15 12:00:00", "%Y.%m.%d %H:%M:%S").unwrap();
        let filter = EventFilter::new(vec![], vec![]).with_since(ts).with_until(ts);
        let e = event(kinds::PLAYER_JOIN, "2024.01.15 12:00:00");
        // since == ts: included. until == ts: excluded. until wins since
        // it additionally constrains the same instant out.
        assert!(!filter.allows(&e));
    }

    #[test]
    fn kind_comparison_is_case_insensitive_and_trims_whitespace() {
        let filter = EventFilter::new(vec![" Player_Join ".to_string()], vec![]);
        let e = event(kinds::PLAYER_JOIN, "2024.01.15 12:00:00");
        assert!(filter.allows(&e));
    }
}
