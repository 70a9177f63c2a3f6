//! The watcher orchestrator: lifecycle, replay, live
//! tailing, and the two output channels.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backward_scan::{scan_last_lines, BackwardScanOptions};
use crate::config::{ReplayMode, WatchOptions};
use crate::discovery::{find_latest_log_file, resolve_log_dir};
use crate::error::{VrclogError, WatchOp};
use crate::event::Event;
use crate::filter::EventFilter;
use crate::line_source::LineSource;
use crate::parser::Parser;
use crate::safe_open::open_regular;

/// The watcher's lifecycle state (state machine). `Rotating` is
/// folded into `Tailing` here — [`LineSource`] detects rotation
/// transparently within its own poll loop (a valid choice
/// "coroutines/async"), so there is no externally observable instant
/// where the watcher is "rotating" rather than "tailing".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Discovering,
    Replaying,
    Tailing,
    Closing,
    Closed,
}

pub type EventReceiver = mpsc::Receiver<Event>;
pub type ErrorReceiver = mpsc::Receiver<VrclogError>;

/// Bounded channel capacity (small buffer so a slow consumer
/// backpressures the producer instead of unbounded growth).
const CHANNEL_CAPACITY: usize = 64;

/// Spawns two short-lived forwarder tasks so that cancelling *either*
/// `a` or `b` cancels the returned token; both forwarders exit as soon
/// as the merged token is cancelled, bounding their lifetime to this
/// watch session.
fn merge_tokens(a: CancellationToken, b: CancellationToken) -> CancellationToken {
    let merged = CancellationToken::new();

    let merged_a = merged.clone();
    let a2 = a.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = a2.cancelled() => merged_a.cancel(),
            _ = merged_a.cancelled() => {}
        }
    });

    let merged_b = merged.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = b.cancelled() => merged_b.cancel(),
            _ = merged_b.cancelled() => {}
        }
    });

    merged
}

/// Two-phase watcher: [`Watcher::new`] validates options and resolves
/// the log directory synchronously (Phase 1); [`Watcher::watch`] locates
/// the latest file, optionally replays, and starts live tailing on a
/// spawned task (Phase 2).
pub struct Watcher {
    opts: WatchOptions,
    log_dir: PathBuf,
    parser: Arc<dyn Parser>,
    filter: EventFilter,
    state: Arc<Mutex<WatcherState>>,
    internal_cancel: CancellationToken,
    task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Watcher {
    /// Phase 1: validate `opts` and resolve the log directory. Returns
    /// synchronously; spawns nothing.
    pub fn new(opts: WatchOptions) -> Result<Self, VrclogError> {
        opts.validate()?;
        let log_dir = resolve_log_dir(opts.log_dir.as_deref())?;
        let parser = opts.resolve_parser();
        let filter = EventFilter::new(opts.include_kinds.clone(), opts.exclude_kinds.clone());

        Ok(Self {
            opts,
            log_dir,
            parser,
            filter,
            state: Arc::new(Mutex::new(WatcherState::Idle)),
            internal_cancel: CancellationToken::new(),
            task: tokio::sync::Mutex::new(None),
        })
    }

    pub fn state(&self) -> WatcherState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, s: WatcherState) {
        *self.state.lock().unwrap() = s;
    }

    /// Phase 2: locate the latest log file (retrying at `poll-interval`
    /// if `wait-for-logs`, else failing fast), replay if configured,
    /// then start live tailing on a spawned task. Returns the event and
    /// error channels.
    pub async fn watch(&self, ctx: CancellationToken) -> Result<(EventReceiver, ErrorReceiver), VrclogError> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != WatcherState::Idle {
                return Err(VrclogError::AlreadyWatching);
            }
            *state = WatcherState::Discovering;
        }

        let run_token = merge_tokens(ctx, self.internal_cancel.clone());

        let path = loop {
            match find_latest_log_file(&self.log_dir) {
                Ok(p) => break p,
                Err(VrclogError::NoLogFiles) if self.opts.wait_for_logs => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.opts.poll_interval) => {}
                        _ = run_token.cancelled() => {
                            self.set_state(WatcherState::Idle);
                            return Err(VrclogError::Cancelled);
                        }
                    }
                }
                Err(e) => {
                    self.set_state(WatcherState::Idle);
                    return Err(e);
                }
            }
        };

        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel(CHANNEL_CAPACITY);

        self.set_state(WatcherState::Replaying);

        let opts = self.opts.clone();
        let parser = self.parser.clone();
        let filter = self.filter.clone();
        let log_dir = self.log_dir.clone();
        let state = self.state.clone();

        let handle = tokio::spawn(async move {
            run_producer(log_dir, path, opts, parser, filter, event_tx, err_tx, run_token, state).await;
        });

        *self.task.lock().await = Some(handle);

        Ok((event_rx, err_rx))
    }

    /// Synchronous shutdown path: cancels the producer, awaits its
    /// completion, and is idempotent — a second call is a no-op that
    /// still succeeds.
    pub async fn close(&self) -> Result<(), VrclogError> {
        self.internal_cancel.cancel();

        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        if let Err(e) = self.parser.close() {
            warn!("parser close failed: {e}");
        }
        self.set_state(WatcherState::Closed);
        Ok(())
    }
}

/// The producer task body: replay (if configured) then live tail,
/// feeding both channels until cancelled. Sole closer of the channels
/// — they're dropped when this function returns.
#[allow(clippy::too_many_arguments)]
async fn run_producer(
    log_dir: PathBuf,
    path: PathBuf,
    opts: WatchOptions,
    parser: Arc<dyn Parser>,
    filter: EventFilter,
    event_tx: mpsc::Sender<Event>,
    err_tx: mpsc::Sender<VrclogError>,
    ctx: CancellationToken,
    state: Arc<Mutex<WatcherState>>,
) {
    let line_number = AtomicU64::new(0);

    let starting_offset = match run_replay(&path, &opts, &parser, &filter, &event_tx, &err_tx, &line_number, &ctx).await {
        Ok(offset) => offset,
        Err(e) => {
            let _ = err_tx
                .send(VrclogError::watch(WatchOp::Replay, Some(path.clone()), Some(e)))
                .await;
            0
        }
    };

    *state.lock().unwrap() = WatcherState::Tailing;

    let mut source = match LineSource::open(&log_dir, path.clone(), starting_offset, opts.poll_interval) {
        Ok(s) => s,
        Err(e) => {
            let _ = err_tx
                .send(VrclogError::watch(WatchOp::Tail, Some(path), Some(e)))
                .await;
            *state.lock().unwrap() = WatcherState::Closing;
            *state.lock().unwrap() = WatcherState::Closed;
            return;
        }
    };

    loop {
        match source.next_line(&ctx).await {
            Ok(tailed) => {
                if tailed.rotated {
                    info!(path = %source.current_path().display(), "log file rotated");
                }
                handle_line(&tailed.line, &line_number, &opts, &parser, &filter, &event_tx, &err_tx, &ctx).await;
            }
            Err(VrclogError::Cancelled) => break,
            Err(e) => {
                let _ = err_tx
                    .send(VrclogError::watch(WatchOp::Tail, None, Some(e)))
                    .await;
                if ctx.is_cancelled() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(opts.poll_interval) => {}
                    _ = ctx.cancelled() => break,
                }
            }
        }
    }

    *state.lock().unwrap() = WatcherState::Closing;
    debug!("watcher producer shutting down");
    *state.lock().unwrap() = WatcherState::Closed;
}

/// Runs the configured replay mode to completion, emitting events
/// directly, and returns the file offset live tailing should resume
/// from.
///
/// `FromStart`/`SinceTime` need no special-cased reverse scan: starting
/// a plain forward tail at offset 0 already reads every existing line
/// before it ever reaches EOF and begins waiting, which is exactly
/// "replayed events precede live events" — so those two modes are
/// handled by the caller returning offset 0 and letting the ordinary
/// tail loop serve as the replay. Only `LastN` needs an actual
/// bounded reverse scan here, since it must avoid reading the whole
/// file forward.
#[allow(clippy::too_many_arguments)]
async fn run_replay(
    path: &PathBuf,
    opts: &WatchOptions,
    parser: &Arc<dyn Parser>,
    filter: &EventFilter,
    event_tx: &mpsc::Sender<Event>,
    err_tx: &mpsc::Sender<VrclogError>,
    line_number: &AtomicU64,
    ctx: &CancellationToken,
) -> Result<u64, VrclogError> {
    match &opts.replay_mode {
        ReplayMode::None => {
            let (_file, meta) = open_regular(path)?;
            Ok(meta.len())
        }
        ReplayMode::FromStart | ReplayMode::SinceTime(_) => Ok(0),
        ReplayMode::LastN(requested) => {
            let (mut file, meta) = open_regular(path)?;
            // `replay_last_n` is the hard ceiling; a caller-requested
            // count above it is silently capped, never rejected.
            let max_lines = if opts.replay_last_n == 0 {
                *requested
            } else {
                (*requested).min(opts.replay_last_n)
            };
            let scan_opts = BackwardScanOptions {
                max_lines,
                max_total_bytes: opts.max_replay_bytes,
                max_line_bytes: opts.max_replay_line_bytes,
            };
            match scan_last_lines(&mut file, &scan_opts) {
                Ok(lines) => {
                    for line in lines {
                        handle_line(&line, line_number, opts, parser, filter, event_tx, err_tx, ctx).await;
                    }
                    Ok(meta.len())
                }
                Err(e) => {
                    let _ = err_tx.send(e).await;
                    Ok(meta.len())
                }
            }
        }
    }
}

/// Parses one line, applies the since-time replay skip and the kind
/// filter, and emits the surviving events. Shared between the replay
/// (`LastN`) and live-tail paths so both apply identical semantics.
#[allow(clippy::too_many_arguments)]
async fn handle_line(
    line: &str,
    line_number: &AtomicU64,
    opts: &WatchOptions,
    parser: &Arc<dyn Parser>,
    filter: &EventFilter,
    event_tx: &mpsc::Sender<Event>,
    err_tx: &mpsc::Sender<VrclogError>,
    ctx: &CancellationToken,
) {
    let n = line_number.fetch_add(1, Ordering::Relaxed) + 1;

    if line.len() > opts.max_line_bytes {
        let _ = err_tx
            .send(VrclogError::LineTooLong {
                line_number: n,
                length: line.len(),
                max: opts.max_line_bytes,
            })
            .await;
        return;
    }

    let (result, err) = parser.parse_line(ctx, line);

    for mut event in result.events {
        if let ReplayMode::SinceTime(since) = &opts.replay_mode {
            if event.timestamp < *since {
                continue;
            }
        }
        if !filter.allows(&event) {
            continue;
        }
        if opts.include_raw_line {
            event.raw_line = Some(line.to_string());
        }
        let _ = event_tx.send(event).await;
    }

    if let Some(e) = err {
        // Cancellation must reach the error channel verbatim — never
        // wrapped — so callers can `matches!` it directly.
        let to_send = match e {
            VrclogError::Cancelled => VrclogError::Cancelled,
            other => VrclogError::ParseError {
                line: n,
                underlying: other.to_string(),
            },
        };
        let _ = err_tx.send(to_send).await;
    }
}

/// Convenience wrapper: constructs and starts a watcher in one call
/// ("simple variant").
pub async fn watch(
    ctx: CancellationToken,
    opts: WatchOptions,
) -> Result<(Watcher, EventReceiver, ErrorReceiver), VrclogError> {
    let watcher = Watcher::new(opts)?;
    let (events, errors) = watcher.watch(ctx).await?;
    Ok((watcher, events, errors))
}
