//! An ordered composition of parsers with one of three combining rules
//!.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::VrclogError;
use crate::event::{Event, ParseResult};

use super::Parser;

/// How a [`Chain`] combines its inner parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainMode {
    /// Run every parser; stop on the first error; aggregate events from
    /// every parser that ran, in parser order.
    All,
    /// Run parsers in order; stop at the first one that reports
    /// `matched = true`, using only its events; stop on first error.
    First,
    /// Run every parser regardless of error; join every error
    /// encountered; events from parsers that errored are still
    /// collected (partial success is not lost).
    ContinueOnError,
}

/// An ordered list of parsers plus a [`ChainMode`]. A chain is itself a
/// [`Parser`], so chains compose.
pub struct Chain {
    parsers: Vec<Option<Arc<dyn Parser>>>,
    mode: ChainMode,
}

impl Chain {
    pub fn new(mode: ChainMode, parsers: Vec<Option<Arc<dyn Parser>>>) -> Self {
        Self { parsers, mode }
    }

    pub fn all(parsers: Vec<Option<Arc<dyn Parser>>>) -> Self {
        Self::new(ChainMode::All, parsers)
    }

    pub fn first(parsers: Vec<Option<Arc<dyn Parser>>>) -> Self {
        Self::new(ChainMode::First, parsers)
    }

    pub fn continue_on_error(parsers: Vec<Option<Arc<dyn Parser>>>) -> Self {
        Self::new(ChainMode::ContinueOnError, parsers)
    }
}

/// Joins several errors into one message. Used by `ChainContinueOnError`
/// so the joined error's text still names every inner failure.
#[derive(Debug)]
pub struct JoinedParseError {
    pub errors: Vec<VrclogError>,
}

impl std::fmt::Display for JoinedParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} parser error(s): ", self.errors.len())?;
        let messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for JoinedParseError {}

impl Parser for Chain {
    fn parse_line(&self, ctx: &CancellationToken, line: &str) -> (ParseResult, Option<VrclogError>) {
        let mut events: Vec<Event> = Vec::new();
        let mut matched = false;
        let mut errors: Vec<VrclogError> = Vec::new();

        for maybe_parser in &self.parsers {
            let Some(parser) = maybe_parser else {
                // Null/absent parsers in the list are silently skipped.
                continue;
            };

            if ctx.is_cancelled() {
                return (
                    ParseResult {
                        events,
                        matched,
                    },
                    Some(VrclogError::Cancelled),
                );
            }

            let (result, err) = parser.parse_line(ctx, line);
            if result.matched {
                matched = true;
            }
            events.extend(result.events);

            match (&self.mode, err) {
                (ChainMode::All, Some(e)) => {
                    return (ParseResult { events, matched }, Some(e));
                }
                (ChainMode::First, Some(e)) => {
                    return (ParseResult { events, matched }, Some(e));
                }
                (ChainMode::ContinueOnError, Some(e)) => {
                    errors.push(e);
                }
                (_, None) => {}
            }

            if self.mode == ChainMode::First && result.matched {
                break;
            }
        }

        let final_error = match self.mode {
            ChainMode::ContinueOnError if !errors.is_empty() => {
                Some(VrclogError::ParseError {
                    line: 0,
                    underlying: JoinedParseError { errors }.to_string(),
                })
            }
            _ => None,
        };

        (ParseResult { events, matched }, final_error)
    }

    fn close(&self) -> Result<(), VrclogError> {
        let mut first_err = None;
        for maybe_parser in &self.parsers {
            if let Some(parser) = maybe_parser {
                if let Err(e) = parser.close() {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
