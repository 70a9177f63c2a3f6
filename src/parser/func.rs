//! Functional adapter: wraps a plain closure as a [`Parser`] without a
//! bespoke type for every ad hoc parsing rule.

use tokio_util::sync::CancellationToken;

use crate::error::VrclogError;
use crate::event::ParseResult;

use super::Parser;

/// Adapts `F: Fn(&CancellationToken, &str) -> (ParseResult, Option<VrclogError>)`
/// into a [`Parser`].
pub struct FuncParser<F>
where
    F: Fn(&CancellationToken, &str) -> (ParseResult, Option<VrclogError>) + Send + Sync,
{
    f: F,
}

impl<F> FuncParser<F>
where
    F: Fn(&CancellationToken, &str) -> (ParseResult, Option<VrclogError>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Parser for FuncParser<F>
where
    F: Fn(&CancellationToken, &str) -> (ParseResult, Option<VrclogError>) + Send + Sync,
{
    fn parse_line(&self, ctx: &CancellationToken, line: &str) -> (ParseResult, Option<VrclogError>) {
        (self.f)(ctx, line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use chrono::NaiveDateTime;

    #[test]
    fn wraps_a_closure_as_a_parser() {
        let p = FuncParser::new(|_ctx: &CancellationToken, line: &str| {
            if line.contains("hit") {
                (
                    ParseResult::single(Event::new("custom", NaiveDateTime::default())),
                    None,
                )
            } else {
                (ParseResult::no_match(), None)
            }
        });

        let ctx = CancellationToken::new();
        let (result, err) = p.parse_line(&ctx, "a hit line");
        assert!(err.is_none());
        assert!(result.matched);
        assert_eq!(result.events.len(), 1);

        let (result, _) = p.parse_line(&ctx, "no match here");
        assert!(!result.matched);
    }
}
