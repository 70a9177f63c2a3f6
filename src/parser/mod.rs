//! The parser abstraction: a narrow trait every built-in, custom,
//! and plugin-backed parser implements, plus the composing pieces
//! ([`chain::Chain`], [`func::FuncParser`]) used to build a pipeline
//! out of them.

pub mod builtin;
pub mod chain;
pub mod func;
pub mod pattern;
pub mod plugin;

use tokio_util::sync::CancellationToken;

use crate::error::VrclogError;
use crate::event::ParseResult;

/// The parser contract. `parse_line` returns a `(ParseResult, error)`
/// pair rather than `Result<ParseResult>` — a chain in
/// `ChainContinueOnError` mode must be able to keep events a parser
/// already produced even when that same call also reports an error
///. A bare parse failure with no partial events uses an empty
/// [`ParseResult`] alongside `Some(error)`.
///
/// Implementations must never panic on arbitrary input bytes (item
/// 1) and must be safe to call from multiple tasks concurrently
/// — state that can't be shared across calls (the plugin host's
/// per-call instance) must be created and torn down inside a single
/// `parse_line` invocation, not stored on `&self`.
pub trait Parser: Send + Sync {
    fn parse_line(&self, ctx: &CancellationToken, line: &str) -> (ParseResult, Option<VrclogError>);

    /// Release any resources this parser owns (compiled plugin
    /// artifacts, file handles). Idempotent; default no-op. Chains
    /// propagate `close` to every inner parser.
    fn close(&self) -> Result<(), VrclogError> {
        Ok(())
    }
}

/// Blanket impl so `Arc<dyn Parser>` (and any other wrapper) composes
/// like a parser without re-deriving the contract.
impl<P: Parser + ?Sized> Parser for std::sync::Arc<P> {
    fn parse_line(&self, ctx: &CancellationToken, line: &str) -> (ParseResult, Option<VrclogError>) {
        (**self).parse_line(ctx, line)
    }

    fn close(&self) -> Result<(), VrclogError> {
        (**self).close()
    }
}
