//! Sandboxed WebAssembly plugin host.
//!
//! Untrusted byte-code is loaded through [`PluginParser::load`], which
//! performs the full load-path contract: size cap, ahead-of-time
//! compilation with an on-disk cache, ABI version check, and required
//! export verification. Every [`Parser::parse_line`] call then
//! instantiates a fresh module so concurrent calls never share linear
//! memory.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use lru::LruCache;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use wasmtime::{Caller, Config, Engine, Instance, Linker, Module, Store};

use crate::error::VrclogError;
use crate::event::{Event, ParseResult};
use crate::safe_open::open_regular;

use super::Parser;

/// Required ABI version. No other version is accepted.
const ABI_VERSION: u32 = 1;

/// Fixed address the host writes the JSON input payload to.
const INPUT_REGION: u32 = 0x10000;
/// Size of the input region; inputs larger than this are rejected
/// before the call is attempted.
const INPUT_REGION_LEN: u32 = 8 * 1024;
/// Cap on a plugin's returned output, enforced before `free` is called.
const MAX_OUTPUT_BYTES: u32 = 1024 * 1024;

const DEFAULT_MAX_ARTIFACT_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_TIMEOUT_MS: u64 = 50;

const REGEX_CACHE_CAPACITY: usize = 100;
const MAX_CACHED_PATTERN_BYTES: usize = 512;
const REGEX_EXEC_TIMEOUT: Duration = Duration::from_millis(5);

const LOG_RATE_PER_SEC: u32 = 10;
const LOG_TRUNCATE_BYTES: usize = 256;
const LOG_TRUNCATED_MARKER: &str = "[truncated]";

const TIMESTAMP_LAYOUT: &str = "%Y.%m.%d %H:%M:%S";

/// Load-time options for [`PluginParser::load`].
#[derive(Debug, Clone)]
pub struct PluginHostOptions {
    pub max_artifact_bytes: u64,
    pub timeout_ms: u64,
    /// Directory for cached compiled artifacts. Created with mode 0700
    /// if missing. `None` disables the cache (always recompile).
    pub cache_dir: Option<PathBuf>,
}

impl Default for PluginHostOptions {
    fn default() -> Self {
        Self {
            max_artifact_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            cache_dir: None,
        }
    }
}

/// A simple token bucket, shared across plugin calls on a single host,
/// rate-limiting the `log` host function to `LOG_RATE_PER_SEC`.
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new() -> Self {
        Self {
            tokens: LOG_RATE_PER_SEC as f64,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * LOG_RATE_PER_SEC as f64).min(LOG_RATE_PER_SEC as f64);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Regex cache shared across every plugin call on one host. A
/// read-write lock guards a bounded LRU; a cache miss takes the write
/// lock to compile and insert, double-checking under that lock in
/// case another call raced the same pattern in.
type SharedRegexCache = Arc<RwLock<LruCache<String, Regex>>>;

fn new_regex_cache() -> SharedRegexCache {
    Arc::new(RwLock::new(LruCache::new(
        std::num::NonZeroUsize::new(REGEX_CACHE_CAPACITY).unwrap(),
    )))
}

fn cached_regex(cache: &SharedRegexCache, pattern: &str) -> Option<Regex> {
    if let Some(re) = cache.write().unwrap().get(pattern) {
        return Some(re.clone());
    }
    let mut guard = cache.write().unwrap();
    if let Some(re) = guard.get(pattern) {
        return Some(re.clone());
    }
    let re = Regex::new(pattern).ok()?;
    guard.put(pattern.to_string(), re.clone());
    Some(re)
}

/// Runs `f` on a helper thread and waits at most `REGEX_EXEC_TIMEOUT`.
/// On timeout the helper thread is abandoned — the regex engine is
/// linear-time and guaranteed to terminate, so the leaked match is
/// safe, only wasteful (regex timeout caveat).
fn run_with_regex_timeout<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> Option<T> {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(REGEX_EXEC_TIMEOUT).ok()
}

/// Per-instance state available to host functions via `Caller::data`.
struct HostState {
    regex_cache: SharedRegexCache,
    log_bucket: Arc<Mutex<TokenBucket>>,
}

fn read_memory(caller: &mut Caller<'_, HostState>, ptr: u32, len: u32) -> Option<Vec<u8>> {
    let memory = caller.get_export("memory")?.into_memory()?;
    let data = memory.data(&*caller);
    let start = ptr as usize;
    let end = start.checked_add(len as usize)?;
    data.get(start..end).map(|s| s.to_vec())
}

fn write_memory(caller: &mut Caller<'_, HostState>, ptr: u32, bytes: &[u8]) -> Option<()> {
    let memory = caller.get_export("memory")?.into_memory()?;
    memory.write(&mut *caller, ptr as usize, bytes).ok()
}

fn sanitize_for_log(bytes: &[u8]) -> String {
    let mut s = String::from_utf8_lossy(bytes).into_owned();
    if s.len() > LOG_TRUNCATE_BYTES {
        s.truncate(LOG_TRUNCATE_BYTES);
        s.push_str(LOG_TRUNCATED_MARKER);
    }
    s
}

fn register_host_functions(linker: &mut Linker<HostState>) -> Result<(), VrclogError> {
    linker
        .func_wrap(
            "env",
            "regex_match",
            |mut caller: Caller<'_, HostState>, str_ptr: u32, str_len: u32, re_ptr: u32, re_len: u32| -> u32 {
                if re_len as usize > MAX_CACHED_PATTERN_BYTES {
                    return 0;
                }
                let Some(text_bytes) = read_memory(&mut caller, str_ptr, str_len) else {
                    return 0;
                };
                let Some(pattern_bytes) = read_memory(&mut caller, re_ptr, re_len) else {
                    return 0;
                };
                let text = String::from_utf8_lossy(&text_bytes).into_owned();
                let pattern = String::from_utf8_lossy(&pattern_bytes).into_owned();
                let cache = caller.data().regex_cache.clone();
                let Some(re) = cached_regex(&cache, &pattern) else {
                    return 0;
                };
                run_with_regex_timeout(move || re.is_match(&text)).unwrap_or(false) as u32
            },
        )
        .map_err(|e| VrclogError::Abi {
            function: "regex_match".into(),
            reason: e.to_string(),
        })?;

    linker
        .func_wrap(
            "env",
            "regex_find_submatch",
            |mut caller: Caller<'_, HostState>,
             str_ptr: u32,
             str_len: u32,
             re_ptr: u32,
             re_len: u32,
             out_ptr: u32,
             out_max: u32|
             -> u32 {
                if re_len as usize > MAX_CACHED_PATTERN_BYTES {
                    return 0;
                }
                let Some(text_bytes) = read_memory(&mut caller, str_ptr, str_len) else {
                    return 0;
                };
                let Some(pattern_bytes) = read_memory(&mut caller, re_ptr, re_len) else {
                    return 0;
                };
                let text = String::from_utf8_lossy(&text_bytes).into_owned();
                let pattern = String::from_utf8_lossy(&pattern_bytes).into_owned();
                let cache = caller.data().regex_cache.clone();
                let Some(re) = cached_regex(&cache, &pattern) else {
                    return 0;
                };

                let matched = run_with_regex_timeout(move || {
                    re.captures(&text).map(|caps| {
                        caps.iter()
                            .skip(1)
                            .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                            .collect::<Vec<String>>()
                    })
                })
                .flatten();

                let Some(groups) = matched else {
                    return 0;
                };
                let encoded = match serde_json::to_vec(&groups) {
                    Ok(bytes) => bytes,
                    Err(_) => return 0,
                };
                if encoded.len() as u32 > out_max {
                    return 0xFFFF_FFFF;
                }
                match write_memory(&mut caller, out_ptr, &encoded) {
                    Some(()) => encoded.len() as u32,
                    None => 0xFFFF_FFFF,
                }
            },
        )
        .map_err(|e| VrclogError::Abi {
            function: "regex_find_submatch".into(),
            reason: e.to_string(),
        })?;

    linker
        .func_wrap(
            "env",
            "log",
            |mut caller: Caller<'_, HostState>, level: u32, ptr: u32, len: u32| {
                let bucket = caller.data().log_bucket.clone();
                if !bucket.lock().unwrap().try_take() {
                    return;
                }
                let Some(bytes) = read_memory(&mut caller, ptr, len) else {
                    return;
                };
                let message = sanitize_for_log(&bytes);
                match level {
                    0 => debug!(target: "vrclog::plugin", "{message}"),
                    1 => tracing::info!(target: "vrclog::plugin", "{message}"),
                    2 => warn!(target: "vrclog::plugin", "{message}"),
                    _ => error!(target: "vrclog::plugin", "{message}"),
                }
            },
        )
        .map_err(|e| VrclogError::Abi {
            function: "log".into(),
            reason: e.to_string(),
        })?;

    linker
        .func_wrap("env", "now_ms", |_caller: Caller<'_, HostState>| -> i64 {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0)
        })
        .map_err(|e| VrclogError::Abi {
            function: "now_ms".into(),
            reason: e.to_string(),
        })?;

    Ok(())
}

#[derive(Deserialize)]
struct PluginEventWire {
    kind: String,
    timestamp: String,
    #[serde(default)]
    player_name: Option<String>,
    #[serde(default)]
    player_id: Option<String>,
    #[serde(default)]
    world_name: Option<String>,
    #[serde(default)]
    world_id: Option<String>,
    #[serde(default)]
    instance_id: Option<String>,
    #[serde(default)]
    data: Option<std::collections::HashMap<String, String>>,
}

impl PluginEventWire {
    fn into_event(self) -> Result<Event, VrclogError> {
        let timestamp = NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_LAYOUT).map_err(|e| {
            VrclogError::PluginError {
                code: "invalid_timestamp".into(),
                message: e.to_string(),
            }
        })?;
        Ok(Event {
            kind: self.kind,
            timestamp,
            player_name: self.player_name,
            player_id: self.player_id,
            world_name: self.world_name,
            world_id: self.world_id,
            instance_id: self.instance_id,
            data: self.data,
            raw_line: None,
        })
    }
}

#[derive(Deserialize)]
struct PluginResponse {
    ok: bool,
    #[serde(default)]
    events: Vec<PluginEventWire>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Serialize)]
struct PluginRequest<'a> {
    line: &'a str,
}

/// A sandboxed plugin-backed parser.
///
/// Stateless from the caller's point of view: every call instantiates
/// a fresh module, so `PluginParser` is safe to share across tasks
/// despite the plugin code itself being untrusted.
pub struct PluginParser {
    engine: Engine,
    module: Module,
    linker: Linker<HostState>,
    instance_counter: AtomicU64,
    timeout_ms: AtomicU64,
    regex_cache: SharedRegexCache,
    log_bucket: Arc<Mutex<TokenBucket>>,
}

fn cache_path_for(cache_dir: &Path, artifact: &[u8]) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    artifact.hash(&mut hasher);
    wasmtime::VERSION.hash(&mut hasher);
    cache_dir.join(format!("{:016x}.cwasm", hasher.finish()))
}

#[cfg(unix)]
fn make_private_dir(path: &Path) -> Result<(), VrclogError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::create_dir_all(path).map_err(|e| VrclogError::io("mkdir", path, e))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| VrclogError::io("chmod", path, e))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_private_dir(path: &Path) -> Result<(), VrclogError> {
    std::fs::create_dir_all(path).map_err(|e| VrclogError::io("mkdir", path, e))
}

impl PluginParser {
    /// Loads a plugin artifact from `path` per the load path:
    /// safe-open, size cap, ahead-of-time compile (with an on-disk
    /// cache when `opts.cache_dir` is set), ABI version check, and
    /// required-export verification.
    pub fn load(path: impl AsRef<Path>, opts: PluginHostOptions) -> Result<Self, VrclogError> {
        let path = path.as_ref();
        let (mut file, meta) = open_regular(path)?;

        if meta.len() > opts.max_artifact_bytes {
            return Err(VrclogError::FileTooLarge {
                actual: meta.len(),
                max: opts.max_artifact_bytes,
            });
        }

        // Bound the read at max+1 to catch growth after the stat above.
        let mut limited = file.by_ref().take(opts.max_artifact_bytes + 1);
        let mut bytes = Vec::with_capacity(meta.len() as usize);
        limited
            .read_to_end(&mut bytes)
            .map_err(|e| VrclogError::io("read", path, e))?;
        if bytes.len() as u64 > opts.max_artifact_bytes {
            return Err(VrclogError::FileTooLarge {
                actual: bytes.len() as u64,
                max: opts.max_artifact_bytes,
            });
        }

        let mut config = Config::new();
        config.epoch_interruption(true);
        let engine = Engine::new(&config).map_err(|e| VrclogError::Runtime {
            operation: "engine init".into(),
            underlying: e.to_string(),
        })?;

        let module = Self::compile_with_cache(&engine, &bytes, opts.cache_dir.as_deref())?;

        let mut linker = Linker::new(&engine);
        register_host_functions(&mut linker)?;

        let host = Self {
            engine,
            module,
            linker,
            instance_counter: AtomicU64::new(0),
            timeout_ms: AtomicU64::new(opts.timeout_ms),
            regex_cache: new_regex_cache(),
            log_bucket: Arc::new(Mutex::new(TokenBucket::new())),
        };

        host.verify_abi()?;
        Ok(host)
    }

    fn compile_with_cache(engine: &Engine, bytes: &[u8], cache_dir: Option<&Path>) -> Result<Module, VrclogError> {
        let Some(cache_dir) = cache_dir else {
            return Module::new(engine, bytes).map_err(|e| VrclogError::Runtime {
                operation: "module compile".into(),
                underlying: e.to_string(),
            });
        };

        make_private_dir(cache_dir)?;
        let cache_path = cache_path_for(cache_dir, bytes);

        if cache_path.exists() {
            // Safety: only ever reads artifacts this process previously
            // serialized to this user-private directory with this engine.
            if let Ok(module) = unsafe { Module::deserialize_file(engine, &cache_path) } {
                return Ok(module);
            }
        }

        let module = Module::new(engine, bytes).map_err(|e| VrclogError::Runtime {
            operation: "module compile".into(),
            underlying: e.to_string(),
        })?;

        if let Ok(serialized) = module.serialize() {
            let _ = std::fs::write(&cache_path, serialized);
        }

        Ok(module)
    }

    fn verify_abi(&self) -> Result<(), VrclogError> {
        for export in ["abi_version", "alloc", "free", "parse_line"] {
            if !self.module.exports().any(|e| e.name() == export) {
                return Err(VrclogError::MissingExport { export: export.into() });
            }
        }

        let mut store = self.new_store();
        let instance = self
            .linker
            .instantiate(&mut store, &self.module)
            .map_err(|e| VrclogError::Runtime {
                operation: "instantiate".into(),
                underlying: e.to_string(),
            })?;
        let abi_version = instance
            .get_typed_func::<(), u32>(&mut store, "abi_version")
            .map_err(|e| VrclogError::Abi {
                function: "abi_version".into(),
                reason: e.to_string(),
            })?
            .call(&mut store, ())
            .map_err(|e| VrclogError::Abi {
                function: "abi_version".into(),
                reason: e.to_string(),
            })?;

        if abi_version != ABI_VERSION {
            return Err(VrclogError::AbiVersionMismatch { found: abi_version });
        }
        Ok(())
    }

    fn new_store(&self) -> Store<HostState> {
        let mut store = Store::new(
            &self.engine,
            HostState {
                regex_cache: self.regex_cache.clone(),
                log_bucket: self.log_bucket.clone(),
            },
        );
        store.set_epoch_deadline(1);
        store
    }

    /// Overrides the per-call timeout. Thread-safe; takes effect on
    /// the next call.
    pub fn set_timeout_ms(&self, timeout_ms: u64) {
        self.timeout_ms.store(timeout_ms, Ordering::Relaxed);
    }

    fn try_call(&self, line: &str) -> Result<PluginResponse, VrclogError> {
        let request = PluginRequest { line };
        let payload = serde_json::to_vec(&request).map_err(|e| VrclogError::Abi {
            function: "parse_line".into(),
            reason: format!("failed to encode request: {e}"),
        })?;
        if payload.len() as u32 > INPUT_REGION_LEN {
            return Err(VrclogError::Abi {
                function: "parse_line".into(),
                reason: "input exceeds 8 KiB".into(),
            });
        }

        let mut store = self.new_store();
        let n = self.instance_counter.fetch_add(1, Ordering::Relaxed);
        let instance_name = format!("plugin-{n}");

        let instance = self
            .linker
            .instantiate(&mut store, &self.module)
            .map_err(|e| VrclogError::Runtime {
                operation: format!("instantiate {instance_name}"),
                underlying: e.to_string(),
            })?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| VrclogError::MissingExport { export: "memory".into() })?;

        if (memory.data_size(&store) as u64) < (INPUT_REGION as u64 + payload.len() as u64) {
            return Err(VrclogError::Abi {
                function: "parse_line".into(),
                reason: "plugin linear memory too small for input region".into(),
            });
        }
        memory
            .write(&mut store, INPUT_REGION as usize, &payload)
            .map_err(|e| VrclogError::Runtime {
                operation: "write input".into(),
                underlying: e.to_string(),
            })?;

        let parse_line = instance
            .get_typed_func::<(u32, u32), u64>(&mut store, "parse_line")
            .map_err(|e| VrclogError::Abi {
                function: "parse_line".into(),
                reason: e.to_string(),
            })?;

        let packed = parse_line
            .call(&mut store, (INPUT_REGION, payload.len() as u32))
            .map_err(|e| VrclogError::Runtime {
                operation: format!("call {instance_name}::parse_line"),
                underlying: e.to_string(),
            })?;

        let out_ptr = (packed & 0xFFFF_FFFF) as u32;
        let out_len = (packed >> 32) as u32;
        if out_len > MAX_OUTPUT_BYTES {
            return Err(VrclogError::Abi {
                function: "parse_line".into(),
                reason: "output too large".into(),
            });
        }

        let out_bytes = memory
            .data(&store)
            .get(out_ptr as usize..(out_ptr as usize + out_len as usize))
            .ok_or_else(|| VrclogError::Abi {
                function: "parse_line".into(),
                reason: "output pointer out of bounds".into(),
            })?
            .to_vec();

        self.close_instance(&mut store, &instance, out_ptr, out_len);

        serde_json::from_slice(&out_bytes).map_err(|e| VrclogError::Abi {
            function: "parse_line".into(),
            reason: format!("failed to decode response: {e}"),
        })
    }

    /// Tears down an instance in a background, non-cancelled scope so
    /// an already-cancelled caller context can never prevent the
    /// plugin's `free` export from running.
    fn close_instance(&self, store: &mut Store<HostState>, instance: &Instance, out_ptr: u32, out_len: u32) {
        if let Ok(free) = instance.get_typed_func::<(u32, u32), ()>(&mut *store, "free") {
            if let Err(e) = free.call(&mut *store, (out_ptr, out_len)) {
                warn!("plugin free() failed: {e}");
            }
        }
    }

    fn packed_response_into_result(response: PluginResponse) -> (ParseResult, Option<VrclogError>) {
        if !response.ok {
            let err = VrclogError::PluginError {
                code: response.code.unwrap_or_default(),
                message: response.error.unwrap_or_default(),
            };
            return (ParseResult::no_match(), Some(err));
        }
        if response.events.is_empty() {
            return (ParseResult::no_match(), None);
        }

        let mut events = Vec::with_capacity(response.events.len());
        for wire in response.events {
            match wire.into_event() {
                Ok(event) => events.push(event),
                Err(e) => return (ParseResult::no_match(), Some(e)),
            }
        }
        (ParseResult::matched_with(events), None)
    }
}

/// What interrupted an in-flight call, if anything — used to
/// distinguish a timeout from an explicit cancel.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    None,
    Timeout,
    Cancelled,
}

impl Parser for PluginParser {
    fn parse_line(&self, ctx: &CancellationToken, line: &str) -> (ParseResult, Option<VrclogError>) {
        if ctx.is_cancelled() {
            return (ParseResult::no_match(), Some(VrclogError::Cancelled));
        }

        let interrupt = Arc::new(AtomicU32::new(Interrupt::None as u32));
        let timeout_ms = self.timeout_ms.load(Ordering::Relaxed);

        let timer_engine = self.engine.clone();
        let timer_interrupt = interrupt.clone();
        let _timer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(timeout_ms));
            let _ = timer_interrupt.compare_exchange(
                Interrupt::None as u32,
                Interrupt::Timeout as u32,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
            timer_engine.increment_epoch();
        });

        let cancel_task = tokio::runtime::Handle::try_current().ok().map(|handle| {
            let cancel_engine = self.engine.clone();
            let cancel_interrupt = interrupt.clone();
            let ctx = ctx.clone();
            handle.spawn(async move {
                ctx.cancelled().await;
                let _ = cancel_interrupt.compare_exchange(
                    Interrupt::None as u32,
                    Interrupt::Cancelled as u32,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                cancel_engine.increment_epoch();
            })
        });

        let result = self.try_call(line);

        if let Some(task) = cancel_task {
            task.abort();
        }

        match interrupt.load(Ordering::SeqCst) {
            x if x == Interrupt::Cancelled as u32 => {
                return (ParseResult::no_match(), Some(VrclogError::Cancelled));
            }
            x if x == Interrupt::Timeout as u32 && result.is_err() => {
                return (ParseResult::no_match(), Some(VrclogError::Timeout));
            }
            _ => {}
        }

        match result {
            Ok(response) => Self::packed_response_into_result(response),
            Err(e) => (ParseResult::no_match(), Some(e)),
        }
    }

    fn close(&self) -> Result<(), VrclogError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// A tiny WAT module implementing the parse_line ABI, always
    /// returning a single fixed `test_event`, ignoring its input.
    const FIXED_EVENT_WAT: &str = r#"
        (module
          (memory (export "memory") 2)
          (func (export "abi_version") (result i32) (i32.const 1))
          (func (export "alloc") (param i32) (result i32) (i32.const 262144))
          (func (export "free") (param i32 i32))
          (func (export "parse_line") (param i32 i32) (result i64)
            (i64.const 335007711232) ;; (len=78 << 32) | ptr=262144
          )
          (data (i32.const 262144) "{\"ok\":true,\"events\":[{\"kind\":\"test_event\",\"timestamp\":\"2024.01.15 12:00:00\"}]}")
        )
    "#;

    const MISSING_ALLOC_WAT: &str = r#"
        (module
          (memory (export "memory") 2)
          (func (export "abi_version") (result i32) (i32.const 1))
          (func (export "free") (param i32 i32))
          (func (export "parse_line") (param i32 i32) (result i64) (i64.const 0))
        )
    "#;

    const WRONG_ABI_VERSION_WAT: &str = r#"
        (module
          (memory (export "memory") 2)
          (func (export "abi_version") (result i32) (i32.const 2))
          (func (export "alloc") (param i32) (result i32) (i32.const 0))
          (func (export "free") (param i32 i32))
          (func (export "parse_line") (param i32 i32) (result i64) (i64.const 0))
        )
    "#;

    fn write_wat(dir: &Path, name: &str, source: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(source.as_bytes()).unwrap();
        path
    }

    #[test]
    fn rejects_missing_required_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wat(dir.path(), "missing_alloc.wat", MISSING_ALLOC_WAT);
        let err = PluginParser::load(&path, PluginHostOptions::default()).unwrap_err();
        assert!(matches!(err, VrclogError::MissingExport { .. }));
    }

    #[test]
    fn rejects_abi_version_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wat(dir.path(), "wrong_version.wat", WRONG_ABI_VERSION_WAT);
        let err = PluginParser::load(&path, PluginHostOptions::default()).unwrap_err();
        assert!(matches!(err, VrclogError::AbiVersionMismatch { found: 2 }));
    }

    #[test]
    fn rejects_artifact_over_size_cap() {
        let dir = tempfile::tempdir().unwrap();
        let padding = ";; padding\n".repeat(2000);
        let source = format!("{padding}{FIXED_EVENT_WAT}");
        let path = write_wat(dir.path(), "huge.wat", &source);

        let opts = PluginHostOptions {
            max_artifact_bytes: 100,
            ..Default::default()
        };
        let err = PluginParser::load(&path, opts).unwrap_err();
        assert!(matches!(err, VrclogError::FileTooLarge { .. }));
    }

    #[test]
    fn parse_line_runs_fixed_plugin_and_decodes_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wat(dir.path(), "fixed.wat", FIXED_EVENT_WAT);
        let parser = PluginParser::load(&path, PluginHostOptions::default()).unwrap();

        let (result, err) = parser.parse_line(&CancellationToken::new(), "anything");
        assert!(err.is_none(), "unexpected error: {err:?}");
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].kind, "test_event");
    }

    #[test]
    fn concurrent_calls_use_distinct_instance_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wat(dir.path(), "fixed2.wat", FIXED_EVENT_WAT);
        let parser = Arc::new(PluginParser::load(&path, PluginHostOptions::default()).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let parser = parser.clone();
                std::thread::spawn(move || parser.parse_line(&CancellationToken::new(), "line"))
            })
            .collect();

        for h in handles {
            let (result, err) = h.join().unwrap();
            assert!(err.is_none());
            assert_eq!(result.events.len(), 1);
        }
        assert!(parser.instance_counter.load(Ordering::SeqCst) >= 4);
    }

    #[test]
    fn token_bucket_limits_rate() {
        let mut bucket = TokenBucket::new();
        let mut allowed = 0;
        for _ in 0..(LOG_RATE_PER_SEC * 2) {
            if bucket.try_take() {
                allowed += 1;
            }
        }
        assert!(allowed <= LOG_RATE_PER_SEC);
    }

    #[test]
    fn sanitize_for_log_truncates_long_messages() {
        let long = "x".repeat(LOG_TRUNCATE_BYTES + 100);
        let sanitized = sanitize_for_log(long.as_bytes());
        assert!(sanitized.ends_with(LOG_TRUNCATED_MARKER));
        assert!(sanitized.len() <= LOG_TRUNCATE_BYTES + LOG_TRUNCATED_MARKER.len());
    }

    #[test]
    fn regex_cache_returns_semantically_equal_pattern() {
        let cache = new_regex_cache();
        let a = cached_regex(&cache, r"^foo\d+$").unwrap();
        let b = cached_regex(&cache, r"^foo\d+$").unwrap();
        assert_eq!(a.as_str(), b.as_str());
        assert!(a.is_match("foo123"));
        assert!(b.is_match("foo123"));
    }
}
